//! Schedule repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::ScheduleTaskDbModel;
use crate::database::time::{now_ms, opt_datetime_to_ms};
use crate::domain::schedule::ScheduleSpec;
use crate::{Error, Result};

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_task(&self, id: &str) -> Result<ScheduleSpec>;
    async fn list_tasks(&self) -> Result<Vec<ScheduleSpec>>;
    /// Insert or fully replace a task.
    async fn save_task(&self, spec: &ScheduleSpec) -> Result<()>;
    /// Persist the bookkeeping fields after a run or toggle.
    async fn update_run_state(
        &self,
        id: &str,
        active: bool,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn delete_task(&self, id: &str) -> Result<()>;
}

pub struct SqlxScheduleRepository {
    pool: SqlitePool,
}

impl SqlxScheduleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepository for SqlxScheduleRepository {
    async fn get_task(&self, id: &str) -> Result<ScheduleSpec> {
        sqlx::query_as::<_, ScheduleTaskDbModel>("SELECT * FROM schedule_task WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("ScheduleTask", id))?
            .into_domain()
    }

    async fn list_tasks(&self) -> Result<Vec<ScheduleSpec>> {
        let rows = sqlx::query_as::<_, ScheduleTaskDbModel>(
            "SELECT * FROM schedule_task ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ScheduleTaskDbModel::into_domain).collect()
    }

    async fn save_task(&self, spec: &ScheduleSpec) -> Result<()> {
        let row = ScheduleTaskDbModel::from(spec);
        sqlx::query(
            r#"
            INSERT INTO schedule_task (
                id, name, keyword, max_pages, page_delay_secs, mode, interval_secs,
                start_at, end_at, active, notify_events, last_run, next_run,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                keyword = excluded.keyword,
                max_pages = excluded.max_pages,
                page_delay_secs = excluded.page_delay_secs,
                mode = excluded.mode,
                interval_secs = excluded.interval_secs,
                start_at = excluded.start_at,
                end_at = excluded.end_at,
                active = excluded.active,
                notify_events = excluded.notify_events,
                last_run = excluded.last_run,
                next_run = excluded.next_run,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.id)
        .bind(&row.name)
        .bind(&row.keyword)
        .bind(row.max_pages)
        .bind(row.page_delay_secs)
        .bind(&row.mode)
        .bind(row.interval_secs)
        .bind(row.start_at)
        .bind(row.end_at)
        .bind(row.active)
        .bind(row.notify_events)
        .bind(row.last_run)
        .bind(row.next_run)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_run_state(
        &self,
        id: &str,
        active: bool,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE schedule_task SET active = ?, last_run = ?, next_run = ?, updated_at = ? WHERE id = ?",
        )
        .bind(active)
        .bind(opt_datetime_to_ms(last_run))
        .bind(opt_datetime_to_ms(next_run))
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("ScheduleTask", id));
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_record WHERE task_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM schedule_task WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
