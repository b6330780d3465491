//! Schedule and run history models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::{
    datetime_to_ms, ms_to_datetime, now_ms, opt_datetime_to_ms, opt_ms_to_datetime,
};
use crate::domain::schedule::{RunOutcome, RunRecord, ScheduleMode, ScheduleSpec};
use crate::{Error, Result};

/// `schedule_task` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduleTaskDbModel {
    pub id: String,
    pub name: String,
    pub keyword: String,
    pub max_pages: i64,
    pub page_delay_secs: i64,
    /// `interval` or `once`
    pub mode: String,
    pub interval_secs: Option<i64>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub active: bool,
    pub notify_events: bool,
    pub last_run: Option<i64>,
    pub next_run: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&ScheduleSpec> for ScheduleTaskDbModel {
    fn from(spec: &ScheduleSpec) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            keyword: spec.keyword.clone(),
            max_pages: i64::from(spec.max_pages),
            page_delay_secs: i64::try_from(spec.page_delay_secs).unwrap_or(i64::MAX),
            mode: spec.mode.to_string(),
            interval_secs: spec.interval_secs,
            start_at: opt_datetime_to_ms(spec.start),
            end_at: opt_datetime_to_ms(spec.end),
            active: spec.active,
            notify_events: spec.notify_events,
            last_run: opt_datetime_to_ms(spec.last_run),
            next_run: opt_datetime_to_ms(spec.next_run),
            created_at: datetime_to_ms(spec.created_at),
            updated_at: now_ms(),
        }
    }
}

impl ScheduleTaskDbModel {
    pub fn into_domain(self) -> Result<ScheduleSpec> {
        let mode: ScheduleMode = self
            .mode
            .parse()
            .map_err(|_| Error::validation(format!("unknown schedule mode {:?}", self.mode)))?;
        Ok(ScheduleSpec {
            id: self.id,
            name: self.name,
            keyword: self.keyword,
            max_pages: u32::try_from(self.max_pages).unwrap_or(0),
            page_delay_secs: u64::try_from(self.page_delay_secs).unwrap_or(0),
            mode,
            interval_secs: self.interval_secs,
            start: opt_ms_to_datetime(self.start_at),
            end: opt_ms_to_datetime(self.end_at),
            active: self.active,
            notify_events: self.notify_events,
            last_run: opt_ms_to_datetime(self.last_run),
            next_run: opt_ms_to_datetime(self.next_run),
            created_at: ms_to_datetime(self.created_at),
        })
    }
}

/// `run_record` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RunRecordDbModel {
    pub id: String,
    pub task_id: String,
    pub started_at: i64,
    pub finished_at: i64,
    /// `success`, `failure` or `stopped`
    pub outcome: String,
    pub items_found: i64,
    pub items_new: i64,
    pub items_matched: i64,
    pub jobs_enqueued: i64,
    pub error: Option<String>,
}

impl From<&RunRecord> for RunRecordDbModel {
    fn from(run: &RunRecord) -> Self {
        Self {
            id: run.id.clone(),
            task_id: run.task_id.clone(),
            started_at: datetime_to_ms(run.started_at),
            finished_at: datetime_to_ms(run.finished_at),
            outcome: run.outcome.to_string(),
            items_found: i64::from(run.items_found),
            items_new: i64::from(run.items_new),
            items_matched: i64::from(run.items_matched),
            jobs_enqueued: i64::from(run.jobs_enqueued),
            error: run.error.clone(),
        }
    }
}

impl RunRecordDbModel {
    pub fn into_domain(self) -> Result<RunRecord> {
        let outcome: RunOutcome = self
            .outcome
            .parse()
            .map_err(|_| Error::validation(format!("unknown run outcome {:?}", self.outcome)))?;
        let count = |v: i64| u32::try_from(v).unwrap_or(0);
        Ok(RunRecord {
            id: self.id,
            task_id: self.task_id,
            started_at: ms_to_datetime(self.started_at),
            finished_at: ms_to_datetime(self.finished_at),
            outcome,
            items_found: count(self.items_found),
            items_new: count(self.items_new),
            items_matched: count(self.items_matched),
            jobs_enqueued: count(self.jobs_enqueued),
            error: self.error,
        })
    }
}
