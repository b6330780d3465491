//! WeChat Work (WeCom) group robot channel.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{NotificationChannel, check_errcode, require_url, send_for_json};
use crate::Result;
use crate::notification::events::Message;

const CHANNEL: &str = "wechat_work";

/// Markdown content limit in bytes.
const MAX_MARKDOWN_BYTES: usize = 4096;

/// Remote "API freq out of limit".
const ERRCODE_RATE_LIMITED: i64 = 45009;

/// WeChat Work robot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeChatWorkConfig {
    /// Robot webhook URL including `key`.
    pub webhook_url: String,
}

/// WeChat Work robot channel.
pub struct WeChatWorkChannel {
    config: WeChatWorkConfig,
    client: Client,
}

impl WeChatWorkChannel {
    pub fn new(config: WeChatWorkConfig, client: Client) -> Result<Self> {
        require_url(CHANNEL, &config.webhook_url)?;
        Ok(Self { config, client })
    }

    fn build_payload(&self, message: &Message) -> serde_json::Value {
        let content = format!("## {}\n\n{}", message.title, message.body);
        json!({
            "msgtype": "markdown",
            "markdown": { "content": truncate_bytes(&content, MAX_MARKDOWN_BYTES) },
        })
    }
}

/// Cut `s` to at most `max` bytes on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[async_trait]
impl NotificationChannel for WeChatWorkChannel {
    fn channel_type(&self) -> &'static str {
        CHANNEL
    }

    async fn send(&self, message: &Message) -> Result<()> {
        let payload = self.build_payload(message);
        let reply = send_for_json(
            CHANNEL,
            self.client.post(self.config.webhook_url.trim()).json(&payload),
        )
        .await?;

        if reply.get("errcode").and_then(serde_json::Value::as_i64) == Some(ERRCODE_RATE_LIMITED) {
            warn!("WeChat Work robot rate limit hit (errcode 45009)");
        }
        check_errcode(CHANNEL, &reply)?;

        debug!(title = %message.title, "WeChat Work notification sent");
        Ok(())
    }
}
