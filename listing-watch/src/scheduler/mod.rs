//! Scheduler for collection tasks.
//!
//! The [`Scheduler`] keeps every registered [`ScheduleSpec`](crate::domain::ScheduleSpec)
//! in memory, fires due tasks from a single timer loop and records a
//! [`RunRecord`](crate::domain::RunRecord) for each run. Runs execute on their
//! own tokio tasks, so a slow collection never delays other tasks.

mod service;
mod task;

pub use service::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_TICK, Scheduler, SchedulerConfig, SchedulerPersistence,
};
pub use task::{TaskInfo, TaskState};
