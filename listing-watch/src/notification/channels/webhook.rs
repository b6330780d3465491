//! Generic webhook notification channel.

use async_trait::async_trait;
use reqwest::{
    Client,
    header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::signing::{hmac_sha256_base64, now_millis};
use super::{NotificationChannel, require_url};
use crate::notification::events::Message;
use crate::{Error, Result};

const CHANNEL: &str = "webhook";

/// Webhook channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL.
    pub url: String,
    /// HTTP method (default: POST).
    #[serde(default = "default_method")]
    pub method: String,
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    #[serde(default)]
    pub auth: Option<WebhookAuth>,
    /// When set, requests carry `x-timestamp` and `x-signature` headers.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl WebhookConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: Vec::new(),
            auth: None,
            secret: None,
        }
    }
}

/// Generic webhook notification channel.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig, client: Client) -> Result<Self> {
        require_url(CHANNEL, &config.url)?;
        match config.method.to_uppercase().as_str() {
            "POST" | "PUT" => {}
            other => {
                return Err(Error::config(format!(
                    "webhook: unsupported method {other}, expected POST or PUT"
                )));
            }
        }
        Ok(Self { config, client })
    }

    /// Build the request headers.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in &self.config.headers {
            match (name.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping invalid webhook header"),
            }
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {token}").parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) =
                    (name.parse::<HeaderName>(), value.parse::<HeaderValue>())
                {
                    headers.insert(name, value);
                }
            }
            // Basic auth is applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    fn build_payload(message: &Message) -> serde_json::Value {
        json!({
            "title": message.title,
            "content": message.body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "priority": message.priority.to_string(),
        })
    }

    /// `base64(HMAC-SHA256(secret, timestamp + body + secret))`.
    fn sign(secret: &str, timestamp_ms: i64, body: &str) -> Result<String> {
        let string_to_sign = format!("{timestamp_ms}{body}{secret}");
        hmac_sha256_base64(secret.as_bytes(), string_to_sign.as_bytes())
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let body = serde_json::to_string(&Self::build_payload(message))?;
        let mut headers = self.build_headers();

        if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
            let timestamp = now_millis();
            let signature = Self::sign(secret, timestamp, &body)?;
            if let (Ok(ts), Ok(sig)) = (
                HeaderValue::from_str(&timestamp.to_string()),
                HeaderValue::from_str(&signature),
            ) {
                headers.insert("x-timestamp", ts);
                headers.insert("x-signature", sig);
            }
        }

        let url = self.config.url.trim();
        let mut request = match self.config.method.to_uppercase().as_str() {
            "PUT" => self.client.put(url),
            _ => self.client.post(url),
        };
        request = request.headers(headers).body(body);

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::delivery(CHANNEL, format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(Error::delivery(CHANNEL, format!("HTTP {status}: {body}")));
        }

        debug!(title = %message.title, "Webhook notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http_client::build_http_client;
    use std::time::Duration;

    fn channel(config: WebhookConfig) -> WebhookChannel {
        WebhookChannel::new(config, build_http_client(Duration::from_secs(5), None).unwrap())
            .unwrap()
    }

    #[test]
    fn test_webhook_config_defaults() {
        let config: WebhookConfig =
            serde_json::from_str(r#"{"url": "https://example.com/hook"}"#).unwrap();
        assert_eq!(config.method, "POST");
        assert!(config.headers.is_empty());
        assert!(config.secret.is_none());
    }

    #[test]
    fn test_rejects_unsupported_method() {
        let mut config = WebhookConfig::new("https://example.com/hook");
        config.method = "DELETE".to_string();
        let client = build_http_client(Duration::from_secs(5), None).unwrap();
        assert!(WebhookChannel::new(config, client).is_err());
    }

    #[test]
    fn test_build_payload() {
        let message = Message::new("Run failed", "timeout")
            .with_priority(crate::notification::NotificationPriority::High);
        let payload = WebhookChannel::build_payload(&message);
        assert_eq!(payload["title"], "Run failed");
        assert_eq!(payload["content"], "timeout");
        assert_eq!(payload["priority"], "high");
        assert!(payload["timestamp"].is_string());
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let mut config = WebhookConfig::new("https://example.com/webhook");
        config.auth = Some(WebhookAuth::Bearer {
            token: "test-token".to_string(),
        });
        config.headers = vec![("X-Source".to_string(), "listing-watch".to_string())];
        let headers = channel(config).build_headers();

        assert_eq!(headers[reqwest::header::AUTHORIZATION], "Bearer test-token");
        assert_eq!(headers["x-source"], "listing-watch");
        assert_eq!(headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn test_signature_matches_reference() {
        let sig = WebhookChannel::sign("SECtest", 1_700_000_000_000, r#"{"a":1}"#).unwrap();
        assert_eq!(sig, "LyOr4jbHC3mcZk67Kipw2/H30fQzESuN51GJqPCcXyM=");
    }
}
