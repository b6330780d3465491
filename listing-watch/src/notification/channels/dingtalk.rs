//! DingTalk group robot channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::signing::{hmac_sha256_base64, now_millis};
use super::{NotificationChannel, check_errcode, require_url, send_for_json};
use crate::Result;
use crate::notification::events::Message;

const CHANNEL: &str = "dingtalk";

/// DingTalk robot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DingTalkConfig {
    /// Robot webhook URL including `access_token`.
    pub webhook_url: String,
    /// Signing secret (`SEC...`). When set, requests carry `timestamp` and `sign`.
    #[serde(default)]
    pub secret: Option<String>,
    /// Phone numbers to @-mention.
    #[serde(default)]
    pub at_mobiles: Vec<String>,
    #[serde(default)]
    pub at_all: bool,
}

/// DingTalk robot channel.
pub struct DingTalkChannel {
    config: DingTalkConfig,
    client: Client,
}

impl DingTalkChannel {
    pub fn new(config: DingTalkConfig, client: Client) -> Result<Self> {
        require_url(CHANNEL, &config.webhook_url)?;
        Ok(Self { config, client })
    }

    /// `base64(HMAC-SHA256(secret, "{timestamp}\n{secret}"))`.
    fn sign(secret: &str, timestamp_ms: i64) -> Result<String> {
        let string_to_sign = format!("{timestamp_ms}\n{secret}");
        hmac_sha256_base64(secret.as_bytes(), string_to_sign.as_bytes())
    }

    /// Webhook URL with `timestamp` and url-encoded `sign` appended when a secret is set.
    fn signed_url(&self, timestamp_ms: i64) -> Result<String> {
        let url = self.config.webhook_url.trim();
        let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(url.to_string());
        };
        let sign = Self::sign(secret, timestamp_ms)?;
        let sep = if url.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{url}{sep}timestamp={timestamp_ms}&sign={}",
            urlencoding::encode(&sign)
        ))
    }

    fn build_payload(&self, message: &Message) -> serde_json::Value {
        let mut text = format!("## {}\n\n{}", message.title, message.body);
        // DingTalk only notifies mentioned numbers that also appear in the text.
        for mobile in &self.config.at_mobiles {
            text.push_str(&format!(" @{mobile}"));
        }
        json!({
            "msgtype": "markdown",
            "markdown": {
                "title": message.title,
                "text": text,
            },
            "at": {
                "atMobiles": self.config.at_mobiles,
                "isAtAll": self.config.at_all,
            }
        })
    }
}

#[async_trait]
impl NotificationChannel for DingTalkChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let url = self.signed_url(now_millis())?;
        let payload = self.build_payload(message);

        let reply = send_for_json(CHANNEL, self.client.post(url).json(&payload)).await?;
        check_errcode(CHANNEL, &reply)?;

        debug!(title = %message.title, "DingTalk notification sent");
        Ok(())
    }
}
