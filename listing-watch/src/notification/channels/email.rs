//! Email notification channel using SMTP.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::NotificationChannel;
use crate::notification::events::{Message, NotificationPriority};
use crate::{Error, Result};

const CHANNEL: &str = "email";

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (usually port 587).
    #[default]
    StartTls,
    /// Implicit TLS (usually port 465).
    Tls,
    /// No encryption. Local relays only.
    None,
}

/// Email channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub security: SmtpSecurity,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

fn default_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: default_port(),
            username: None,
            password: None,
            security: SmtpSecurity::StartTls,
            from_address: String::new(),
            to_addresses: Vec::new(),
        }
    }
}

/// Email notification channel.
pub struct EmailChannel {
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailChannel {
    /// Validate addresses and build the SMTP transport.
    pub fn new(config: EmailConfig, timeout: Duration) -> Result<Self> {
        if config.smtp_host.trim().is_empty() {
            return Err(Error::config("email: smtp_host is empty"));
        }
        let from = parse_mailbox(&config.from_address)?;
        if config.to_addresses.is_empty() {
            return Err(Error::config("email: no recipients configured"));
        }
        let to = config
            .to_addresses
            .iter()
            .map(|addr| parse_mailbox(addr))
            .collect::<Result<Vec<_>>>()?;

        crate::utils::http_client::install_rustls_provider();
        let host = config.smtp_host.trim();
        let builder = match config.security {
            SmtpSecurity::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| Error::config(format!("email: invalid SMTP relay {host}: {e}")))?,
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| Error::config(format!("email: invalid SMTP relay {host}: {e}")))?,
            SmtpSecurity::None => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };
        let mut builder = builder.port(config.smtp_port).timeout(Some(timeout));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            builder = builder.credentials(Credentials::new(username, password));
        }

        Ok(Self {
            from,
            to,
            transport: builder.build(),
        })
    }

    fn build_email(&self, message: &Message) -> Result<lettre::Message> {
        let mut builder = lettre::Message::builder()
            .from(self.from.clone())
            .subject(format!("[listing-watch] {}", message.title));
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .multipart(MultiPart::alternative_plain_html(
                build_body_text(message),
                build_body_html(message),
            ))
            .map_err(|e| Error::delivery(CHANNEL, format!("failed to build message: {e}")))
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| Error::config(format!("email: invalid address {address:?}: {e}")))
}

fn build_body_text(message: &Message) -> String {
    // Markdown emphasis reads poorly in plain text.
    format!("{}\n\n{}", message.title, message.body.replace("**", ""))
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn build_body_html(message: &Message) -> String {
    let header_color = match message.priority {
        NotificationPriority::Low => "#808080",
        NotificationPriority::Normal => "#3498db",
        NotificationPriority::High => "#f39c12",
        NotificationPriority::Urgent => "#e74c3c",
    };
    let body = escape_html(&message.body.replace("**", "")).replace('\n', "<br>\n");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <style>
        body {{ font-family: Arial, sans-serif; margin: 20px; }}
        .header {{ background-color: {}; color: white; padding: 15px; border-radius: 5px; }}
        .content {{ padding: 20px; background-color: #f9f9f9; border-radius: 5px; margin-top: 10px; }}
    </style>
</head>
<body>
    <div class="header"><h2>{}</h2></div>
    <div class="content"><p>{}</p></div>
</body>
</html>"#,
        header_color,
        escape_html(&message.title),
        body
    )
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let email = self.build_email(message)?;
        self.transport
            .send(email)
            .await
            .map_err(|e| Error::delivery(CHANNEL, format!("SMTP send failed: {e}")))?;

        debug!(title = %message.title, recipients = self.to.len(), "Email notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmailConfig {
        EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            from_address: "watch@example.com".to_string(),
            to_addresses: vec!["me@example.com".to_string(), "Ops <ops@example.com>".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_email_config_default() {
        let config = EmailConfig::default();
        assert_eq!(config.smtp_port, 587);
        assert_eq!(config.security, SmtpSecurity::StartTls);
    }

    #[tokio::test]
    async fn test_new_validates_addresses() {
        let timeout = Duration::from_secs(10);
        assert!(EmailChannel::new(config(), timeout).is_ok());

        let mut bad_from = config();
        bad_from.from_address = "not an address".to_string();
        assert!(matches!(
            EmailChannel::new(bad_from, timeout),
            Err(Error::Configuration(_))
        ));

        let mut no_rcpt = config();
        no_rcpt.to_addresses.clear();
        assert!(EmailChannel::new(no_rcpt, timeout).is_err());
    }

    #[tokio::test]
    async fn test_build_email_subject() {
        let channel = EmailChannel::new(config(), Duration::from_secs(10)).unwrap();
        let email = channel
            .build_email(&Message::new("Listing matched", "**Price:** 10"))
            .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("Subject: [listing-watch] Listing matched"));
        assert!(raw.contains("ops@example.com"));
    }

    #[test]
    fn test_html_body_escapes() {
        let html = build_body_html(&Message::new("<b>", "a & b\nline"));
        assert!(html.contains("&lt;b&gt;"));
        assert!(html.contains("a &amp; b<br>"));
    }
}
