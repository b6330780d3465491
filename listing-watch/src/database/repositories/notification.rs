//! Channel target and dead letter repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{ChannelTargetDbModel, NotificationDeadLetterDbModel};
use crate::database::time::now_ms;
use crate::notification::channels::ChannelTarget;
use crate::{Error, Result};

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    // Channel targets
    async fn get_channel(&self, id: &str) -> Result<ChannelTarget>;
    async fn list_channels(&self) -> Result<Vec<ChannelTarget>>;
    async fn create_channel(&self, target: &ChannelTarget) -> Result<()>;
    async fn update_channel(&self, target: &ChannelTarget) -> Result<()>;
    async fn delete_channel(&self, id: &str) -> Result<()>;

    // Dead letters
    async fn add_to_dead_letter(&self, entry: &NotificationDeadLetterDbModel) -> Result<()>;
    async fn list_dead_letters(
        &self,
        target_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<NotificationDeadLetterDbModel>>;
    async fn delete_dead_letter(&self, id: &str) -> Result<()>;
    async fn cleanup_old_dead_letters(&self, retention_days: i64) -> Result<u64>;
}

pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn get_channel(&self, id: &str) -> Result<ChannelTarget> {
        sqlx::query_as::<_, ChannelTargetDbModel>("SELECT * FROM channel_target WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("ChannelTarget", id))?
            .into_domain()
    }

    async fn list_channels(&self) -> Result<Vec<ChannelTarget>> {
        let rows = sqlx::query_as::<_, ChannelTargetDbModel>(
            "SELECT * FROM channel_target ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ChannelTargetDbModel::into_domain).collect()
    }

    async fn create_channel(&self, target: &ChannelTarget) -> Result<()> {
        target.validate()?;
        let row = ChannelTargetDbModel::from_domain(target)?;
        sqlx::query(
            r#"
            INSERT INTO channel_target (
                id, name, channel_type, enabled, settings, rate_limit_per_minute,
                events, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.channel_type)
        .bind(row.enabled)
        .bind(&row.settings)
        .bind(row.rate_limit_per_minute)
        .bind(&row.events)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_channel(&self, target: &ChannelTarget) -> Result<()> {
        target.validate()?;
        let row = ChannelTargetDbModel::from_domain(target)?;
        let result = sqlx::query(
            r#"
            UPDATE channel_target SET
                name = ?,
                channel_type = ?,
                enabled = ?,
                settings = ?,
                rate_limit_per_minute = ?,
                events = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&row.name)
        .bind(&row.channel_type)
        .bind(row.enabled)
        .bind(&row.settings)
        .bind(row.rate_limit_per_minute)
        .bind(&row.events)
        .bind(row.updated_at)
        .bind(&row.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("ChannelTarget", &target.id));
        }
        Ok(())
    }

    async fn delete_channel(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM channel_target WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_to_dead_letter(&self, entry: &NotificationDeadLetterDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_dead_letter (
                id, target_id, title, body, priority, attempts,
                error_message, created_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.target_id)
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(&entry.priority)
        .bind(entry.attempts)
        .bind(&entry.error_message)
        .bind(entry.created_at)
        .bind(entry.failed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_dead_letters(
        &self,
        target_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<NotificationDeadLetterDbModel>> {
        let entries = match target_id {
            Some(target_id) => {
                sqlx::query_as::<_, NotificationDeadLetterDbModel>(
                    "SELECT * FROM notification_dead_letter WHERE target_id = ? ORDER BY failed_at DESC LIMIT ?",
                )
                .bind(target_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, NotificationDeadLetterDbModel>(
                    "SELECT * FROM notification_dead_letter ORDER BY failed_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(entries)
    }

    async fn delete_dead_letter(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM notification_dead_letter WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cleanup_old_dead_letters(&self, retention_days: i64) -> Result<u64> {
        let cutoff = now_ms() - retention_days.saturating_mul(24 * 60 * 60 * 1000);
        let result = sqlx::query("DELETE FROM notification_dead_letter WHERE failed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
