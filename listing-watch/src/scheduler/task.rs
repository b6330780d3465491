//! Per-task bookkeeping.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::domain::schedule::{RunRecord, ScheduleSpec, TaskStats};

/// Execution state of a task. `Idle -> Running -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Idle,
    Running,
}

/// A registered task as held by the scheduler.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    pub spec: ScheduleSpec,
    pub state: TaskState,
    /// Set while `Running`; cancelling it stops the run between pages.
    pub run_token: Option<CancellationToken>,
    pub history: VecDeque<RunRecord>,
    pub stats: TaskStats,
}

impl TaskEntry {
    pub fn new(spec: ScheduleSpec) -> Self {
        Self {
            spec,
            state: TaskState::Idle,
            run_token: None,
            history: VecDeque::new(),
            stats: TaskStats::default(),
        }
    }

    /// Append a finished run, evicting the oldest beyond `limit`.
    pub fn record_run(&mut self, run: RunRecord, limit: usize) {
        self.stats.record(&run);
        self.history.push_back(run);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            spec: self.spec.clone(),
            state: self.state,
            stats: self.stats,
            success_rate: self.stats.success_rate(),
            last_outcome: self.history.back().map(|run| run.outcome.to_string()),
        }
    }
}

/// Read-only view of a task for listings.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInfo {
    pub spec: ScheduleSpec,
    pub state: TaskState,
    pub stats: TaskStats,
    pub success_rate: f64,
    pub last_outcome: Option<String>,
}

/// A run that has claimed its task (state is `Running`) but not executed yet.
#[derive(Debug)]
pub(crate) struct RunTicket {
    pub task_id: String,
    pub spec: ScheduleSpec,
    pub token: CancellationToken,
    pub started_at: DateTime<Utc>,
}
