//! Seen item repository, used to drop listings that were already processed.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::SeenItemDbModel;
use crate::database::time::now_ms;
use crate::domain::item::CollectedItem;

#[async_trait]
pub trait SeenItemRepository: Send + Sync {
    async fn seen(&self, external_id: &str) -> Result<bool>;
    /// Record `item` as seen. Returns `false` if it already was.
    async fn mark_seen(&self, item: &CollectedItem) -> Result<bool>;
    async fn count(&self) -> Result<i64>;
    /// Forget items first seen more than `retention_days` ago.
    async fn purge_older_than(&self, retention_days: i64) -> Result<u64>;
}

pub struct SqlxSeenItemRepository {
    pool: SqlitePool,
}

impl SqlxSeenItemRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SeenItemRepository for SqlxSeenItemRepository {
    async fn seen(&self, external_id: &str) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM seen_item WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn mark_seen(&self, item: &CollectedItem) -> Result<bool> {
        let row = SeenItemDbModel::from(item);
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO seen_item (external_id, title, source_keyword, first_seen_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&row.external_id)
        .bind(&row.title)
        .bind(&row.source_keyword)
        .bind(row.first_seen_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seen_item")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn purge_older_than(&self, retention_days: i64) -> Result<u64> {
        let cutoff = now_ms() - retention_days.saturating_mul(24 * 60 * 60 * 1000);
        let result = sqlx::query("DELETE FROM seen_item WHERE first_seen_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
