//! Collection schedules and run bookkeeping.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of result pages a run fetches.
pub const DEFAULT_MAX_PAGES: u32 = 3;

/// Default pause between page fetches, in seconds.
pub const DEFAULT_PAGE_DELAY_SECS: u64 = 3;

/// Schedule mode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScheduleMode {
    /// Fire every `interval` after the previous run.
    Interval,
    /// Fire once at `start`.
    Once,
}

/// A scheduled collection task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub id: String,
    pub name: String,
    /// Search keyword handed to the collector.
    pub keyword: String,
    pub max_pages: u32,
    pub page_delay_secs: u64,
    pub mode: ScheduleMode,
    /// Interval between runs in seconds. Only meaningful for [`ScheduleMode::Interval`].
    pub interval_secs: Option<i64>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub active: bool,
    /// Send run start/success/failure notifications.
    pub notify_events: bool,
    pub last_run: Option<DateTime<Utc>>,
    /// Always `<= end` or `None`.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduleSpec {
    /// Create an interval schedule.
    pub fn interval(name: impl Into<String>, keyword: impl Into<String>, every: Duration) -> Self {
        Self::base(name.into(), keyword.into(), ScheduleMode::Interval)
            .with_interval_secs(every.num_seconds())
    }

    /// Create a one-shot schedule.
    pub fn once(name: impl Into<String>, keyword: impl Into<String>, at: DateTime<Utc>) -> Self {
        let mut spec = Self::base(name.into(), keyword.into(), ScheduleMode::Once);
        spec.start = Some(at);
        spec
    }

    fn base(name: String, keyword: String, mode: ScheduleMode) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            keyword,
            max_pages: DEFAULT_MAX_PAGES,
            page_delay_secs: DEFAULT_PAGE_DELAY_SECS,
            mode,
            interval_secs: None,
            start: None,
            end: None,
            active: true,
            notify_events: false,
            last_run: None,
            next_run: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_interval_secs(mut self, secs: i64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    pub fn with_page_delay_secs(mut self, secs: u64) -> Self {
        self.page_delay_secs = secs;
        self
    }

    pub fn with_notify_events(mut self, notify: bool) -> Self {
        self.notify_events = notify;
        self
    }

    /// The configured interval, if any and representable.
    pub fn interval_duration(&self) -> Option<Duration> {
        self.interval_secs.and_then(Duration::try_seconds)
    }

    /// Reject schedules that can never fire.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_schedule("task name must not be empty"));
        }
        if self.keyword.trim().is_empty() {
            return Err(Error::invalid_schedule("search keyword must not be empty"));
        }
        if self.max_pages == 0 {
            return Err(Error::invalid_schedule("max_pages must be at least 1"));
        }
        match self.mode {
            ScheduleMode::Interval => match self.interval_secs {
                Some(secs) if secs <= 0 => {
                    return Err(Error::invalid_schedule(format!(
                        "interval must be positive, got {secs}s"
                    )));
                }
                Some(secs) => {
                    let fits = self
                        .interval_duration()
                        .and_then(|interval| now.checked_add_signed(interval))
                        .is_some();
                    if !fits {
                        return Err(Error::invalid_schedule(format!(
                            "interval {secs}s is out of range"
                        )));
                    }
                }
                None => return Err(Error::invalid_schedule("interval schedule has no interval")),
            },
            ScheduleMode::Once => match self.start {
                Some(start) if start > now => {}
                Some(start) => {
                    return Err(Error::invalid_schedule(format!(
                        "one-shot start {start} is not in the future"
                    )));
                }
                None => return Err(Error::invalid_schedule("one-shot schedule has no start")),
            },
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && end < start
        {
            return Err(Error::invalid_schedule("end is before start"));
        }
        Ok(())
    }

    /// Recompute `next_run` from `last_run`, deactivating the schedule once it passes `end`.
    pub fn refresh_next_run(&mut self, now: DateTime<Utc>) {
        if !self.active {
            self.next_run = None;
            return;
        }
        let candidate = candidate_next_run(self, self.last_run, now);
        match (candidate, self.end) {
            (Some(next), Some(end)) if next > end => {
                self.active = false;
                self.next_run = None;
            }
            (next, _) => self.next_run = next,
        }
    }

    /// Whether the task should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_run.is_some_and(|next| next <= now)
    }
}

fn candidate_next_run(
    spec: &ScheduleSpec,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match spec.mode {
        ScheduleMode::Interval => {
            let interval = spec.interval_duration()?;
            match last_run {
                Some(last) => last.checked_add_signed(interval),
                None => Some(spec.start.map_or(now, |start| start.max(now))),
            }
        }
        ScheduleMode::Once => match last_run {
            Some(_) => None,
            None => spec.start,
        },
    }
}

/// Next fire time for `spec`, or `None` when it will not fire again.
///
/// Never returns a time after `spec.end`. Does not mutate the spec; use
/// [`ScheduleSpec::refresh_next_run`] to apply the deactivation rule.
pub fn compute_next_run(
    spec: &ScheduleSpec,
    last_run: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if !spec.active {
        return None;
    }
    let next = candidate_next_run(spec, last_run, now)?;
    match spec.end {
        Some(end) if next > end => None,
        _ => Some(next),
    }
}

/// Terminal state of one run.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    /// Cancelled cooperatively; partial results were still processed.
    Stopped,
}

/// One execution of a scheduled task. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Items the collector returned, before de-duplication.
    pub items_found: u32,
    /// Items not seen in any earlier run.
    pub items_new: u32,
    pub items_matched: u32,
    pub jobs_enqueued: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }
}

/// Aggregated counters over a task's runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub stopped_runs: u64,
    pub total_items_found: u64,
}

impl TaskStats {
    pub fn record(&mut self, run: &RunRecord) {
        self.total_runs += 1;
        match run.outcome {
            RunOutcome::Success => self.successful_runs += 1,
            RunOutcome::Failure => self.failed_runs += 1,
            RunOutcome::Stopped => self.stopped_runs += 1,
        }
        self.total_items_found += u64::from(run.items_found);
    }

    /// Successful runs as a percentage, rounded to two decimals.
    pub fn success_rate(&self) -> f64 {
        if self.total_runs == 0 {
            return 0.0;
        }
        let rate = self.successful_runs as f64 / self.total_runs as f64 * 100.0;
        (rate * 100.0).round() / 100.0
    }
}
