//! Notification channels.
//!
//! Each [`ChannelConfig`] variant builds one adapter behind
//! [`NotificationChannel`] when the target is registered:
//! - DingTalk group robot (markdown, optional HMAC signing)
//! - Feishu/Lark custom bot (rich-text post, optional HMAC signing)
//! - WeChat Work group robot (markdown)
//! - Email (SMTP via lettre)
//! - Generic webhook (JSON POST, optional HMAC signature header)

mod dingtalk;
mod email;
mod feishu;
mod signing;
mod webhook;
mod wechat_work;

pub use dingtalk::{DingTalkChannel, DingTalkConfig};
pub use email::{EmailChannel, EmailConfig, SmtpSecurity};
pub use feishu::{FeishuChannel, FeishuConfig};
pub use webhook::{WebhookAuth, WebhookChannel, WebhookConfig};
pub use wechat_work::{WeChatWorkChannel, WeChatWorkConfig};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::events::{EventKind, EventSubscriptions, Message};
use super::rate_limiter::RatePolicy;
use crate::{Error, Result};

/// Default per-target admission limit, in messages per minute.
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;

/// WeChat Work robots answer errcode 45009 when sends come in too fast.
pub const WECHAT_WORK_MIN_SPACING: Duration = Duration::from_secs(2);

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Deliver one message. Every failure is reported as [`Error::DeliveryFailed`].
    async fn send(&self, message: &Message) -> Result<()>;

    /// Send a fixed test message.
    async fn test(&self) -> Result<()> {
        self.send(&Message::test()).await
    }
}

/// Supported channel kinds.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum ChannelKind {
    #[serde(rename = "dingtalk")]
    #[strum(serialize = "dingtalk")]
    DingTalk,
    #[serde(rename = "feishu")]
    #[strum(serialize = "feishu")]
    Feishu,
    #[serde(rename = "wechat_work")]
    #[strum(serialize = "wechat_work")]
    WeChatWork,
    #[serde(rename = "email")]
    #[strum(serialize = "email")]
    Email,
    #[serde(rename = "webhook")]
    #[strum(serialize = "webhook")]
    GenericWebhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Minimum gap between two sends to one target of this kind.
    pub fn min_send_spacing(&self) -> Duration {
        match self {
            Self::WeChatWork => WECHAT_WORK_MIN_SPACING,
            _ => Duration::ZERO,
        }
    }
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelConfig {
    #[serde(rename = "dingtalk")]
    DingTalk(DingTalkConfig),
    #[serde(rename = "feishu")]
    Feishu(FeishuConfig),
    #[serde(rename = "wechat_work")]
    WeChatWork(WeChatWorkConfig),
    #[serde(rename = "email")]
    Email(EmailConfig),
    #[serde(rename = "webhook")]
    GenericWebhook(WebhookConfig),
}

impl ChannelConfig {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::DingTalk(_) => ChannelKind::DingTalk,
            Self::Feishu(_) => ChannelKind::Feishu,
            Self::WeChatWork(_) => ChannelKind::WeChatWork,
            Self::Email(_) => ChannelKind::Email,
            Self::GenericWebhook(_) => ChannelKind::GenericWebhook,
        }
    }

    /// Build the adapter for this configuration.
    ///
    /// HTTP channels share `client`; the email channel owns its SMTP transport
    /// and uses `timeout` for it.
    pub fn build(
        &self,
        client: &reqwest::Client,
        timeout: Duration,
    ) -> Result<Arc<dyn NotificationChannel>> {
        let channel: Arc<dyn NotificationChannel> = match self {
            Self::DingTalk(c) => Arc::new(DingTalkChannel::new(c.clone(), client.clone())?),
            Self::Feishu(c) => Arc::new(FeishuChannel::new(c.clone(), client.clone())?),
            Self::WeChatWork(c) => Arc::new(WeChatWorkChannel::new(c.clone(), client.clone())?),
            Self::Email(c) => Arc::new(EmailChannel::new(c.clone(), timeout)?),
            Self::GenericWebhook(c) => Arc::new(WebhookChannel::new(c.clone(), client.clone())?),
        };
        Ok(channel)
    }
}

/// A configured delivery destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelTarget {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub config: ChannelConfig,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub events: EventSubscriptions,
}

fn default_rate_limit() -> u32 {
    DEFAULT_RATE_LIMIT_PER_MINUTE
}

impl ChannelTarget {
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            enabled: true,
            config,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            events: EventSubscriptions::default(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self
    }

    pub fn with_events(mut self, events: EventSubscriptions) -> Self {
        self.events = events;
        self
    }

    pub fn kind(&self) -> ChannelKind {
        self.config.kind()
    }

    /// Admission policy for the dispatcher's limiter.
    pub fn rate_policy(&self) -> RatePolicy {
        RatePolicy::per_minute(self.rate_limit_per_minute)
            .with_min_spacing(self.kind().min_send_spacing())
    }

    /// Enabled and subscribed to `kind`.
    pub fn subscribes(&self, kind: EventKind) -> bool {
        self.enabled && self.events.contains(kind)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("channel name must not be empty"));
        }
        if self.rate_limit_per_minute == 0 {
            return Err(Error::validation("rate_limit_per_minute must be at least 1"));
        }
        Ok(())
    }
}

fn require_url(channel: &'static str, url: &str) -> Result<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::config(format!("{channel}: webhook URL is empty")));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(Error::config(format!(
            "{channel}: webhook URL must be http(s), got {url}"
        )));
    }
    Ok(())
}

/// Send a prepared request and decode the JSON reply.
///
/// Transport errors and non-2xx statuses become [`Error::DeliveryFailed`].
async fn send_for_json(
    channel: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::delivery(channel, format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(channel, %status, body = %body, "Channel returned error status");
        return Err(Error::delivery(channel, format!("HTTP {status}: {body}")));
    }

    response
        .json::<serde_json::Value>()
        .await
        .map_err(|e| Error::delivery(channel, format!("invalid response body: {e}")))
}

/// Check a robot-API style `{"errcode": 0, "errmsg": "ok"}` reply.
fn check_errcode(channel: &'static str, reply: &serde_json::Value) -> Result<()> {
    match reply.get("errcode").and_then(serde_json::Value::as_i64) {
        Some(0) => Ok(()),
        Some(code) => {
            let msg = reply
                .get("errmsg")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            Err(Error::delivery(channel, format!("errcode {code}: {msg}")))
        }
        None => Err(Error::delivery(channel, format!("reply has no errcode: {reply}"))),
    }
}
