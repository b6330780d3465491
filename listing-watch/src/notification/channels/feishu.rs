//! Feishu (Lark) custom bot channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use super::signing::{hmac_sha256_base64, now_millis};
use super::{NotificationChannel, require_url, send_for_json};
use crate::notification::events::Message;
use crate::{Error, Result};

const CHANNEL: &str = "feishu";

/// Feishu bot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeishuConfig {
    pub webhook_url: String,
    /// Signature verification secret from the bot's security settings.
    #[serde(default)]
    pub secret: Option<String>,
}

/// Feishu bot channel.
pub struct FeishuChannel {
    config: FeishuConfig,
    client: Client,
}

impl FeishuChannel {
    pub fn new(config: FeishuConfig, client: Client) -> Result<Self> {
        require_url(CHANNEL, &config.webhook_url)?;
        Ok(Self { config, client })
    }

    /// Feishu keys the HMAC with `"{timestamp}\n{secret}"` over an empty message.
    fn sign(secret: &str, timestamp_secs: i64) -> Result<String> {
        let key = format!("{timestamp_secs}\n{secret}");
        hmac_sha256_base64(key.as_bytes(), b"")
    }

    fn build_payload(&self, message: &Message, timestamp_secs: i64) -> Result<Value> {
        // One paragraph per body line.
        let paragraphs: Vec<Value> = message
            .body
            .lines()
            .map(|line| json!([{ "tag": "text", "text": line }]))
            .collect();

        let mut payload = json!({
            "msg_type": "post",
            "content": {
                "post": {
                    "zh_cn": {
                        "title": message.title,
                        "content": paragraphs,
                    }
                }
            }
        });

        if let Some(secret) = self.config.secret.as_deref().filter(|s| !s.is_empty()) {
            payload["timestamp"] = json!(timestamp_secs.to_string());
            payload["sign"] = json!(Self::sign(secret, timestamp_secs)?);
        }
        Ok(payload)
    }

    /// Current replies carry `code`; older ones `StatusCode`.
    fn check_reply(reply: &Value) -> Result<()> {
        let code = reply
            .get("code")
            .or_else(|| reply.get("StatusCode"))
            .and_then(Value::as_i64);
        match code {
            Some(0) => Ok(()),
            Some(code) => {
                let msg = reply
                    .get("msg")
                    .or_else(|| reply.get("StatusMessage"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Err(Error::delivery(CHANNEL, format!("code {code}: {msg}")))
            }
            None => Err(Error::delivery(CHANNEL, format!("reply has no code: {reply}"))),
        }
    }
}

#[async_trait]
impl NotificationChannel for FeishuChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let payload = self.build_payload(message, now_millis() / 1000)?;
        let reply = send_for_json(
            CHANNEL,
            self.client.post(self.config.webhook_url.trim()).json(&payload),
        )
        .await?;
        Self::check_reply(&reply)?;

        debug!(title = %message.title, "Feishu notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http_client::build_http_client;
    use std::time::Duration;

    fn channel(secret: Option<&str>) -> FeishuChannel {
        let config = FeishuConfig {
            webhook_url: "https://open.feishu.cn/open-apis/bot/v2/hook/xyz".to_string(),
            secret: secret.map(str::to_string),
        };
        FeishuChannel::new(config, build_http_client(Duration::from_secs(5), None).unwrap())
            .unwrap()
    }

    #[test]
    fn test_sign_matches_reference() {
        let sign = FeishuChannel::sign("SECtest", 1_700_000_000).unwrap();
        assert_eq!(sign, "G7XpBpG8NgG02fJOAhX6FRAObIljmFoxVReo8I62pEk=");
    }

    #[test]
    fn test_post_payload_paragraphs() {
        let payload = channel(None)
            .build_payload(&Message::new("Title", "line one\nline two"), 0)
            .unwrap();

        assert_eq!(payload["msg_type"], "post");
        let post = &payload["content"]["post"]["zh_cn"];
        assert_eq!(post["title"], "Title");
        assert_eq!(post["content"][1][0]["text"], "line two");
        assert!(payload.get("sign").is_none());
    }

    #[test]
    fn test_signed_payload_carries_timestamp() {
        let payload = channel(Some("SECtest"))
            .build_payload(&Message::new("t", "b"), 1_700_000_000)
            .unwrap();
        assert_eq!(payload["timestamp"], "1700000000");
        assert_eq!(payload["sign"], "G7XpBpG8NgG02fJOAhX6FRAObIljmFoxVReo8I62pEk=");
    }

    #[test]
    fn test_check_reply_codes() {
        assert!(FeishuChannel::check_reply(&json!({"code": 0, "msg": "success"})).is_ok());
        assert!(FeishuChannel::check_reply(&json!({"StatusCode": 0})).is_ok());

        let err = FeishuChannel::check_reply(&json!({"code": 19021, "msg": "sign match fail"}))
            .unwrap_err();
        assert!(err.to_string().contains("19021"));
    }
}
