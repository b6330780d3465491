//! Run history repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::RunRecordDbModel;
use crate::domain::schedule::RunRecord;

#[async_trait]
pub trait RunRecordRepository: Send + Sync {
    async fn add_run(&self, run: &RunRecord) -> Result<()>;
    /// Most recent `limit` runs of a task, oldest first.
    async fn list_runs(&self, task_id: &str, limit: i64) -> Result<Vec<RunRecord>>;
    /// Keep the newest `keep` runs of a task. Returns the number removed.
    async fn prune_runs(&self, task_id: &str, keep: i64) -> Result<u64>;
}

pub struct SqlxRunRecordRepository {
    pool: SqlitePool,
}

impl SqlxRunRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunRecordRepository for SqlxRunRecordRepository {
    async fn add_run(&self, run: &RunRecord) -> Result<()> {
        let row = RunRecordDbModel::from(run);
        sqlx::query(
            r#"
            INSERT INTO run_record (
                id, task_id, started_at, finished_at, outcome,
                items_found, items_new, items_matched, jobs_enqueued, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.task_id)
        .bind(row.started_at)
        .bind(row.finished_at)
        .bind(&row.outcome)
        .bind(row.items_found)
        .bind(row.items_new)
        .bind(row.items_matched)
        .bind(row.jobs_enqueued)
        .bind(&row.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_runs(&self, task_id: &str, limit: i64) -> Result<Vec<RunRecord>> {
        let mut rows = sqlx::query_as::<_, RunRecordDbModel>(
            "SELECT * FROM run_record WHERE task_id = ? ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(task_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.reverse();
        rows.into_iter().map(RunRecordDbModel::into_domain).collect()
    }

    async fn prune_runs(&self, task_id: &str, keep: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM run_record
            WHERE task_id = ?
              AND id NOT IN (
                SELECT id FROM run_record WHERE task_id = ?
                ORDER BY started_at DESC, id DESC LIMIT ?
              )
            "#,
        )
        .bind(task_id)
        .bind(task_id)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
