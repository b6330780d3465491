//! Channel target and dead letter models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::notification::channels::{ChannelConfig, ChannelTarget};
use crate::notification::dispatcher::{DeadLetter, NotificationJob};
use crate::notification::events::NotificationPriority;
use crate::{Error, Result};

/// `channel_target` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChannelTargetDbModel {
    pub id: String,
    pub name: String,
    /// dingtalk, feishu, wechat_work, email or webhook
    pub channel_type: String,
    pub enabled: bool,
    /// JSON blob of the tagged [`ChannelConfig`]
    pub settings: String,
    pub rate_limit_per_minute: i64,
    /// JSON blob of the event subscriptions
    pub events: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChannelTargetDbModel {
    pub fn from_domain(target: &ChannelTarget) -> Result<Self> {
        let now = now_ms();
        Ok(Self {
            id: target.id.clone(),
            name: target.name.clone(),
            channel_type: target.kind().as_str().to_string(),
            enabled: target.enabled,
            settings: to_json(&target.config)?,
            rate_limit_per_minute: i64::from(target.rate_limit_per_minute),
            events: to_json(&target.events)?,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn into_domain(self) -> Result<ChannelTarget> {
        let config: ChannelConfig = from_json("settings", &self.settings)?;
        if config.kind().as_str() != self.channel_type {
            return Err(Error::validation(format!(
                "channel {} is typed {} but its settings describe {}",
                self.id,
                self.channel_type,
                config.kind()
            )));
        }
        Ok(ChannelTarget {
            id: self.id,
            name: self.name,
            enabled: self.enabled,
            config,
            rate_limit_per_minute: u32::try_from(self.rate_limit_per_minute).unwrap_or(0),
            events: from_json("events", &self.events)?,
        })
    }
}

/// `notification_dead_letter` row.
/// A notification that exhausted its attempts or was still queued at shutdown.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDeadLetterDbModel {
    pub id: String,
    pub target_id: String,
    pub title: String,
    pub body: String,
    pub priority: String,
    pub attempts: i64,
    pub error_message: String,
    pub created_at: i64,
    pub failed_at: i64,
}

impl NotificationDeadLetterDbModel {
    /// Dead letter for a job that never got its turn before shutdown.
    pub fn from_pending(job: &NotificationJob, reason: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: job.target_id.clone(),
            title: job.title.clone(),
            body: job.body.clone(),
            priority: job.priority.to_string(),
            attempts: i64::from(job.attempt_count),
            error_message: match &job.last_error {
                Some(last) => format!("{reason} (last error: {last})"),
                None => reason.to_string(),
            },
            created_at: datetime_to_ms(job.created_at),
            failed_at: now_ms(),
        }
    }

    pub fn into_domain(self) -> DeadLetter {
        DeadLetter {
            job_id: 0,
            target_id: self.target_id,
            title: self.title,
            body: self.body,
            priority: self.priority.parse().unwrap_or(NotificationPriority::Normal),
            attempts: u32::try_from(self.attempts).unwrap_or(0),
            error: self.error_message,
            created_at: ms_to_datetime(self.created_at),
            failed_at: ms_to_datetime(self.failed_at),
        }
    }
}

impl From<&DeadLetter> for NotificationDeadLetterDbModel {
    fn from(letter: &DeadLetter) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            target_id: letter.target_id.clone(),
            title: letter.title.clone(),
            body: letter.body.clone(),
            priority: letter.priority.to_string(),
            attempts: i64::from(letter.attempts),
            error_message: letter.error.clone(),
            created_at: datetime_to_ms(letter.created_at),
            failed_at: datetime_to_ms(letter.failed_at),
        }
    }
}
