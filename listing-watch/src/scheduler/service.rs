//! Job scheduler.
//!
//! Owns the schedules, fires due tasks from a timer loop and records every run.
//! Each task runs at most once at a time: a fire request for a `Running` task
//! is logged and ignored.
//!
//! A run goes: collector -> matching engine -> dispatcher queue. Collector
//! errors become `Failure` runs; nothing a single run does can stop the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::task::{RunTicket, TaskEntry, TaskInfo, TaskState};
use crate::collector::{CollectRequest, Collector};
use crate::database::repositories::{RunRecordRepository, ScheduleRepository};
use crate::domain::schedule::{RunOutcome, RunRecord, ScheduleMode, ScheduleSpec, TaskStats};
use crate::notification::events::EventKind;
use crate::notification::templates;
use crate::services::ItemRouter;
use crate::{Error, Result};

/// Default timer tick.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default number of runs kept per task.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Optional persistence for schedules and run history.
#[derive(Clone, Default)]
pub struct SchedulerPersistence {
    pub schedules: Option<Arc<dyn ScheduleRepository>>,
    pub runs: Option<Arc<dyn RunRecordRepository>>,
}

struct Inner {
    config: SchedulerConfig,
    tasks: DashMap<String, TaskEntry>,
    collector: Arc<dyn Collector>,
    router: ItemRouter,
    persistence: SchedulerPersistence,
    /// Parent of every run token.
    shutdown: CancellationToken,
    /// Runs started by `fire_now`, awaited when the timer loop exits.
    background: TaskTracker,
}

/// Timer-driven task scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        collector: Arc<dyn Collector>,
        router: ItemRouter,
        persistence: SchedulerPersistence,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tasks: DashMap::new(),
                collector,
                router,
                persistence,
                shutdown: CancellationToken::new(),
                background: TaskTracker::new(),
            }),
        }
    }

    // ========== Registration ==========

    /// Validate and add a task. Returns its id.
    pub async fn register(&self, mut spec: ScheduleSpec) -> Result<String> {
        let now = Utc::now();
        spec.validate(now)?;
        if self.inner.tasks.contains_key(&spec.id) {
            return Err(Error::validation(format!("task {} already exists", spec.id)));
        }
        spec.refresh_next_run(now);

        if let Some(repo) = &self.inner.persistence.schedules {
            repo.save_task(&spec).await?;
        }

        let id = spec.id.clone();
        info!(
            task_id = %id,
            name = %spec.name,
            mode = %spec.mode,
            next_run = ?spec.next_run,
            "Task registered"
        );
        self.inner.tasks.insert(id.clone(), TaskEntry::new(spec));
        Ok(id)
    }

    /// Remove a task, stopping it if it is running.
    pub async fn unregister(&self, task_id: &str) -> Result<ScheduleSpec> {
        let (_, entry) = self
            .inner
            .tasks
            .remove(task_id)
            .ok_or_else(|| Error::not_found("ScheduleTask", task_id))?;
        if let Some(token) = &entry.run_token {
            token.cancel();
        }
        if let Some(repo) = &self.inner.persistence.schedules {
            repo.delete_task(task_id).await?;
        }
        info!(task_id, "Task unregistered");
        Ok(entry.spec)
    }

    /// Replace a task's definition. Run bookkeeping is kept.
    pub async fn update(&self, task_id: &str, mut spec: ScheduleSpec) -> Result<ScheduleSpec> {
        let now = Utc::now();
        spec.id = task_id.to_string();
        spec.validate(now)?;

        let updated = {
            let mut entry = self
                .inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::not_found("ScheduleTask", task_id))?;
            spec.created_at = entry.spec.created_at;
            spec.last_run = entry.spec.last_run;
            spec.refresh_next_run(now);
            entry.spec = spec;
            entry.spec.clone()
        };

        if let Some(repo) = &self.inner.persistence.schedules {
            repo.save_task(&updated).await?;
        }
        info!(task_id, next_run = ?updated.next_run, "Task updated");
        Ok(updated)
    }

    /// Activate or deactivate a task and recompute its next run.
    pub async fn set_active(&self, task_id: &str, active: bool) -> Result<ScheduleSpec> {
        let spec = {
            let mut entry = self
                .inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| Error::not_found("ScheduleTask", task_id))?;
            entry.spec.active = active;
            entry.spec.refresh_next_run(Utc::now());
            entry.spec.clone()
        };
        self.persist_run_state(&spec).await;
        info!(task_id, active = spec.active, next_run = ?spec.next_run, "Task toggled");
        Ok(spec)
    }

    /// Register every persisted schedule.
    ///
    /// One-shot tasks whose start has passed are kept but inactive. Returns the
    /// number of tasks loaded.
    pub async fn load_from_repository(&self) -> Result<usize> {
        let Some(repo) = self.inner.persistence.schedules.clone() else {
            return Ok(0);
        };
        let now = Utc::now();
        let mut loaded = 0;

        for mut spec in repo.list_tasks().await? {
            if let Err(e) = spec.validate(now) {
                let expired_once = spec.mode == ScheduleMode::Once
                    && spec.start.is_some_and(|start| start <= now);
                if !expired_once {
                    warn!(task_id = %spec.id, error = %e, "Skipping invalid persisted task");
                    continue;
                }
                spec.active = false;
            }
            spec.refresh_next_run(now);

            let mut entry = TaskEntry::new(spec);
            if let Some(runs) = &self.inner.persistence.runs {
                let limit = i64::try_from(self.inner.config.history_limit).unwrap_or(i64::MAX);
                match runs.list_runs(&entry.spec.id, limit).await {
                    Ok(history) => {
                        for run in history {
                            entry.record_run(run, self.inner.config.history_limit);
                        }
                    }
                    Err(e) => warn!(task_id = %entry.spec.id, error = %e, "Failed to load run history"),
                }
            }

            self.persist_run_state(&entry.spec).await;
            self.inner.tasks.insert(entry.spec.id.clone(), entry);
            loaded += 1;
        }

        info!(loaded, "Tasks loaded from database");
        Ok(loaded)
    }

    // ========== Queries ==========

    pub fn get(&self, task_id: &str) -> Option<TaskInfo> {
        self.inner.tasks.get(task_id).map(|entry| entry.info())
    }

    /// All tasks, ordered by creation time.
    pub fn list(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<_> = self.inner.tasks.iter().map(|entry| entry.info()).collect();
        tasks.sort_by(|a, b| a.spec.created_at.cmp(&b.spec.created_at));
        tasks
    }

    /// Recent runs of a task, oldest first.
    pub fn history(&self, task_id: &str) -> Result<Vec<RunRecord>> {
        self.inner
            .tasks
            .get(task_id)
            .map(|entry| entry.history.iter().cloned().collect())
            .ok_or_else(|| Error::not_found("ScheduleTask", task_id))
    }

    pub fn stats(&self, task_id: &str) -> Result<TaskStats> {
        self.inner
            .tasks
            .get(task_id)
            .map(|entry| entry.stats)
            .ok_or_else(|| Error::not_found("ScheduleTask", task_id))
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.inner
            .tasks
            .get(task_id)
            .is_some_and(|entry| entry.state == TaskState::Running)
    }

    // ========== Execution ==========

    /// Ask a running task to stop. Returns `false` if it was idle.
    pub fn stop(&self, task_id: &str) -> Result<bool> {
        let entry = self
            .inner
            .tasks
            .get(task_id)
            .ok_or_else(|| Error::not_found("ScheduleTask", task_id))?;
        match &entry.run_token {
            Some(token) => {
                info!(task_id, "Stop requested");
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run a task now and wait for it.
    ///
    /// Returns `None` when the task is already running.
    pub async fn fire(&self, task_id: &str) -> Result<Option<RunRecord>> {
        match self.begin_run(task_id)? {
            Some(ticket) => Ok(Some(self.execute(ticket).await)),
            None => Ok(None),
        }
    }

    /// Start a task in the background. Returns `false` when it is already running.
    pub fn fire_now(&self, task_id: &str) -> Result<bool> {
        let Some(ticket) = self.begin_run(task_id)? else {
            return Ok(false);
        };
        let scheduler = self.clone();
        self.inner.background.spawn(async move {
            scheduler.execute(ticket).await;
        });
        Ok(true)
    }

    /// Claim a task for a run: `Idle -> Running`.
    fn begin_run(&self, task_id: &str) -> Result<Option<RunTicket>> {
        let mut entry = self
            .inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| Error::not_found("ScheduleTask", task_id))?;

        if entry.state == TaskState::Running {
            info!(task_id, "Task already running, ignoring fire request");
            return Ok(None);
        }

        let token = self.inner.shutdown.child_token();
        entry.state = TaskState::Running;
        entry.run_token = Some(token.clone());

        Ok(Some(RunTicket {
            task_id: task_id.to_string(),
            spec: entry.spec.clone(),
            token,
            started_at: Utc::now(),
        }))
    }

    /// Execute a claimed run and return the task to `Idle`.
    async fn execute(&self, ticket: RunTicket) -> RunRecord {
        let RunTicket {
            task_id,
            spec,
            token,
            started_at,
        } = ticket;
        info!(task_id = %task_id, name = %spec.name, keyword = %spec.keyword, "Run started");

        if spec.notify_events {
            self.inner.router.notify_event(
                EventKind::RunStarted,
                &templates::run_started(&spec, started_at),
            );
        }

        let request = CollectRequest::from(&spec);
        let mut run = RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.clone(),
            started_at,
            finished_at: started_at,
            outcome: RunOutcome::Success,
            items_found: 0,
            items_new: 0,
            items_matched: 0,
            jobs_enqueued: 0,
            error: None,
        };

        match self.inner.collector.collect(&request, &token).await {
            Ok(batch) => {
                run.items_found = count(batch.found);
                run.items_new = count(batch.items.len());
                for item in &batch.items {
                    let routed = self.inner.router.route(item);
                    if routed.matched {
                        run.items_matched += 1;
                    }
                    run.jobs_enqueued += count(routed.jobs_enqueued);
                }
                if batch.interrupted || token.is_cancelled() {
                    run.outcome = RunOutcome::Stopped;
                }
            }
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Run failed");
                run.outcome = RunOutcome::Failure;
                run.error = Some(e.to_string());
            }
        }
        run.finished_at = Utc::now();

        let spec_after = self.finish_run(&task_id, &run);

        info!(
            task_id = %task_id,
            outcome = %run.outcome,
            found = run.items_found,
            new = run.items_new,
            matched = run.items_matched,
            jobs = run.jobs_enqueued,
            duration_ms = run.duration().num_milliseconds(),
            "Run finished"
        );

        if let Some(spec) = &spec_after {
            self.persist_run_state(spec).await;
        }
        if let Some(repo) = &self.inner.persistence.runs {
            if let Err(e) = repo.add_run(&run).await {
                warn!(task_id = %task_id, error = %e, "Failed to persist run record");
            } else {
                let keep = i64::try_from(self.inner.config.history_limit).unwrap_or(i64::MAX);
                if let Err(e) = repo.prune_runs(&task_id, keep).await {
                    debug!(task_id = %task_id, error = %e, "Failed to prune run history");
                }
            }
        }

        if spec.notify_events {
            let kind = match run.outcome {
                RunOutcome::Failure => EventKind::RunFailed,
                RunOutcome::Success | RunOutcome::Stopped => EventKind::RunSucceeded,
            };
            self.inner
                .router
                .notify_event(kind, &templates::run_finished(&spec, &run));
        }

        run
    }

    /// Record the run and return the task to `Idle`. `None` if it was unregistered meanwhile.
    fn finish_run(&self, task_id: &str, run: &RunRecord) -> Option<ScheduleSpec> {
        let mut entry = self.inner.tasks.get_mut(task_id)?;
        entry.spec.last_run = Some(run.started_at);
        entry.spec.refresh_next_run(Utc::now());
        entry.record_run(run.clone(), self.inner.config.history_limit);
        entry.state = TaskState::Idle;
        entry.run_token = None;
        if !entry.spec.active {
            debug!(task_id, "Task has no further runs");
        }
        Some(entry.spec.clone())
    }

    async fn persist_run_state(&self, spec: &ScheduleSpec) {
        if let Some(repo) = &self.inner.persistence.schedules
            && let Err(e) = repo
                .update_run_state(&spec.id, spec.active, spec.last_run, spec.next_run)
                .await
        {
            warn!(task_id = %spec.id, error = %e, "Failed to persist task state");
        }
    }

    /// Ids of idle, active tasks due at `now`.
    fn due_tasks(&self) -> Vec<String> {
        let now = Utc::now();
        self.inner
            .tasks
            .iter()
            .filter(|entry| entry.state == TaskState::Idle && entry.spec.is_due(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Timer loop. Fires due tasks on their own tokio tasks until `cancel` fires,
    /// then stops in-flight runs and waits for them to record their outcome.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            tick_ms = self.inner.config.tick.as_millis() as u64,
            tasks = self.inner.tasks.len(),
            "Scheduler started"
        );
        let mut ticker = tokio::time::interval(self.inner.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut runs = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for task_id in self.due_tasks() {
                        match self.begin_run(&task_id) {
                            Ok(Some(ticket)) => {
                                let scheduler = self.clone();
                                runs.spawn(async move {
                                    scheduler.execute(ticket).await;
                                });
                            }
                            Ok(None) => {}
                            Err(e) => debug!(task_id = %task_id, error = %e, "Due task vanished"),
                        }
                    }
                }
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Run task panicked");
                    }
                }
            }
        }

        self.inner.shutdown.cancel();
        let in_flight = runs.len() + self.inner.background.len();
        if in_flight > 0 {
            info!(in_flight, "Waiting for running tasks to stop");
        }
        while let Some(joined) = runs.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Run task panicked");
            }
        }
        self.inner.background.close();
        self.inner.background.wait().await;
        info!("Scheduler stopped");
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::CollectBatch;
    use crate::domain::item::CollectedItem;
    use crate::domain::rule::{PriceRange, QuickFilter, Rule};
    use crate::matcher::MatchingEngine;
    use crate::notification::channels::{ChannelConfig, ChannelTarget, WebhookConfig};
    use crate::notification::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::notification::events::EventSubscriptions;
    use crate::notification::registry::ChannelRegistry;
    use crate::utils::http_client::build_http_client;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Notify;

    /// Returns fixed items; optionally blocks until released or stopped.
    struct FakeCollector {
        items: Vec<CollectedItem>,
        fail: bool,
        gate: Option<Arc<Notify>>,
        calls: AtomicU32,
    }

    impl FakeCollector {
        fn new(items: Vec<CollectedItem>) -> Self {
            Self {
                items,
                fail: false,
                gate: None,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Collector for FakeCollector {
        fn name(&self) -> &str {
            "fake"
        }

        async fn collect(
            &self,
            _request: &CollectRequest,
            stop: &CancellationToken,
        ) -> Result<CollectBatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = stop.cancelled() => {
                        return Ok(CollectBatch::new(self.items[..1].to_vec(), 1, true));
                    }
                }
            }
            if self.fail {
                return Err(Error::collector("captcha wall"));
            }
            Ok(CollectBatch::new(self.items.clone(), 1, false))
        }
    }

    fn items() -> Vec<CollectedItem> {
        vec![
            CollectedItem::new("1", "iPhone 12 未拆封", "2800"),
            CollectedItem::new("2", "iPhone 12", "3500"),
            CollectedItem::new("3", "Pixel 7", "900"),
        ]
    }

    fn scheduler(collector: FakeCollector) -> (Scheduler, Dispatcher) {
        let timeout = std::time::Duration::from_secs(5);
        let registry = Arc::new(ChannelRegistry::new(
            build_http_client(timeout, None).unwrap(),
            timeout,
        ));
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), registry);
        dispatcher
            .register_target(
                ChannelTarget::new(
                    "ops",
                    ChannelConfig::GenericWebhook(WebhookConfig::new("https://example.com/hook")),
                )
                .with_id("ops")
                .with_events(EventSubscriptions {
                    run_started: true,
                    run_succeeded: true,
                    run_failed: true,
                    latest_item: false,
                }),
            )
            .unwrap();

        let rule = Rule::new("cheap iPhone")
            .with_include_keywords("iPhone")
            .with_price(PriceRange::at_most(3000.0))
            .with_targets(["ops"]);
        let engine = Arc::new(MatchingEngine::new(vec![rule], QuickFilter::default()));
        let router = ItemRouter::new(engine, dispatcher.clone());

        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(collector),
            router,
            SchedulerPersistence::default(),
        );
        (scheduler, dispatcher)
    }

    fn hourly() -> ScheduleSpec {
        ScheduleSpec::interval("phones", "iPhone", ChronoDuration::minutes(60))
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_schedules() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));

        let bad_interval = hourly().with_interval_secs(0);
        assert!(matches!(
            scheduler.register(bad_interval).await,
            Err(Error::InvalidSchedule(_))
        ));

        let past_once = ScheduleSpec::once("once", "k", Utc::now() - ChronoDuration::minutes(1));
        assert!(matches!(
            scheduler.register(past_once).await,
            Err(Error::InvalidSchedule(_))
        ));
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_never_run_interval_is_due_now() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let before = Utc::now();
        let id = scheduler.register(hourly()).await.unwrap();

        let info = scheduler.get(&id).unwrap();
        let next = info.spec.next_run.unwrap();
        assert!(next >= before && next <= Utc::now());
        assert_eq!(scheduler.due_tasks(), vec![id]);
    }

    #[tokio::test]
    async fn test_fire_records_run_and_routes_items() {
        let (scheduler, dispatcher) = scheduler(FakeCollector::new(items()));
        let id = scheduler
            .register(hourly().with_notify_events(true))
            .await
            .unwrap();

        let run = scheduler.fire(&id).await.unwrap().unwrap();
        assert_eq!(run.outcome, RunOutcome::Success);
        assert_eq!(run.items_found, 3);
        assert_eq!(run.items_new, 3);
        assert_eq!(run.items_matched, 1);
        assert_eq!(run.jobs_enqueued, 1);

        // started + matched item + succeeded
        assert_eq!(dispatcher.stats().queue_depth, 3);

        let info = scheduler.get(&id).unwrap();
        assert_eq!(info.state, TaskState::Idle);
        assert_eq!(info.spec.last_run, Some(run.started_at));
        assert_eq!(
            info.spec.next_run,
            Some(run.started_at + ChronoDuration::minutes(60))
        );
        assert_eq!(scheduler.history(&id).unwrap(), vec![run]);
    }

    #[tokio::test]
    async fn test_collector_error_is_failure_run() {
        let mut collector = FakeCollector::new(items());
        collector.fail = true;
        let (scheduler, _) = scheduler(collector);
        let id = scheduler.register(hourly()).await.unwrap();

        let run = scheduler.fire(&id).await.unwrap().unwrap();
        assert_eq!(run.outcome, RunOutcome::Failure);
        assert!(run.error.unwrap().contains("captcha wall"));
        assert_eq!(scheduler.stats(&id).unwrap().failed_runs, 1);
        assert!(!scheduler.is_running(&id));
    }

    #[tokio::test]
    async fn test_concurrent_fire_runs_once() {
        let gate = Arc::new(Notify::new());
        let mut collector = FakeCollector::new(items());
        collector.gate = Some(gate.clone());
        let (scheduler, _) = scheduler(collector);
        let id = scheduler.register(hourly()).await.unwrap();

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            let id = id.clone();
            async move { scheduler.fire(&id).await }
        });
        while !scheduler.is_running(&id) {
            tokio::task::yield_now().await;
        }

        assert!(scheduler.fire(&id).await.unwrap().is_none());
        assert!(!scheduler.fire_now(&id).unwrap());

        gate.notify_one();
        assert!(first.await.unwrap().unwrap().is_some());
        assert_eq!(scheduler.stats(&id).unwrap().total_runs, 1);
    }

    #[tokio::test]
    async fn test_stop_yields_stopped_outcome() {
        let gate = Arc::new(Notify::new());
        let mut collector = FakeCollector::new(items());
        collector.gate = Some(gate);
        let (scheduler, _) = scheduler(collector);
        let id = scheduler.register(hourly()).await.unwrap();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let id = id.clone();
            async move { scheduler.fire(&id).await }
        });
        while !scheduler.is_running(&id) {
            tokio::task::yield_now().await;
        }
        assert!(scheduler.stop(&id).unwrap());

        let run = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(run.outcome, RunOutcome::Stopped);
        assert_eq!(run.items_new, 1);
        assert!(!scheduler.stop(&id).unwrap());
    }

    #[tokio::test]
    async fn test_once_task_does_not_repeat() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let spec = ScheduleSpec::once("once", "iPhone", Utc::now() + ChronoDuration::hours(1));
        let id = scheduler.register(spec).await.unwrap();

        scheduler.fire(&id).await.unwrap();
        let info = scheduler.get(&id).unwrap();
        assert_eq!(info.spec.next_run, None);
        assert!(!info.spec.is_due(Utc::now() + ChronoDuration::days(1)));
    }

    #[tokio::test]
    async fn test_end_deactivates_after_run() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let spec = hourly().with_end(Utc::now() + ChronoDuration::minutes(30));
        let id = scheduler.register(spec).await.unwrap();

        scheduler.fire(&id).await.unwrap();
        let info = scheduler.get(&id).unwrap();
        assert!(!info.spec.active);
        assert_eq!(info.spec.next_run, None);
    }

    #[tokio::test]
    async fn test_set_active_and_unregister() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let id = scheduler.register(hourly()).await.unwrap();

        let spec = scheduler.set_active(&id, false).await.unwrap();
        assert_eq!(spec.next_run, None);
        assert!(scheduler.due_tasks().is_empty());

        let spec = scheduler.set_active(&id, true).await.unwrap();
        assert!(spec.next_run.is_some());

        scheduler.unregister(&id).await.unwrap();
        assert!(matches!(scheduler.fire(&id).await, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_keeps_last_run() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let id = scheduler.register(hourly()).await.unwrap();
        let run = scheduler.fire(&id).await.unwrap().unwrap();

        let updated = scheduler
            .update(&id, hourly().with_interval_secs(120))
            .await
            .unwrap();
        assert_eq!(updated.id, id);
        assert_eq!(updated.last_run, Some(run.started_at));
        assert_eq!(
            updated.next_run,
            Some(run.started_at + ChronoDuration::seconds(120))
        );
    }

    #[tokio::test]
    async fn test_run_loop_fires_due_tasks() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let id = scheduler.register(hourly()).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        // The first tick fires immediately.
        for _ in 0..200 {
            if scheduler.stats(&id).unwrap().total_runs > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(scheduler.stats(&id).unwrap().total_runs, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_out_of_range_interval() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let huge = hourly().with_interval_secs(i64::MAX);
        assert!(matches!(
            scheduler.register(huge).await,
            Err(Error::InvalidSchedule(_))
        ));
        assert!(scheduler.list().is_empty());
    }

    #[tokio::test]
    async fn test_end_already_passed_is_inactive_at_registration() {
        let (scheduler, _) = scheduler(FakeCollector::new(items()));
        let now = Utc::now();

        let ended = hourly().with_end(now - ChronoDuration::minutes(1));
        let id = scheduler.register(ended).await.unwrap();
        let info = scheduler.get(&id).unwrap();
        assert!(!info.spec.active);
        assert_eq!(info.spec.next_run, None);

        // First computed run (now) already lies after the end.
        let window_closed = hourly()
            .with_start(now - ChronoDuration::hours(2))
            .with_end(now - ChronoDuration::hours(1));
        let id = scheduler.register(window_closed).await.unwrap();
        let info = scheduler.get(&id).unwrap();
        assert!(!info.spec.active);
        assert_eq!(info.spec.next_run, None);

        assert!(scheduler.due_tasks().is_empty());
    }

    #[tokio::test]
    async fn test_run_loop_waits_for_background_fires() {
        let gate = Arc::new(Notify::new());
        let mut collector = FakeCollector::new(items());
        collector.gate = Some(gate);
        let (scheduler, _) = scheduler(collector);
        let id = scheduler
            .register(hourly().with_start(Utc::now() + ChronoDuration::hours(1)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        assert!(scheduler.fire_now(&id).unwrap());
        while !scheduler.is_running(&id) {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        handle.await.unwrap();

        // The loop only returns once the fired run has recorded its outcome.
        assert!(!scheduler.is_running(&id));
        let history = scheduler.history(&id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, RunOutcome::Stopped);
    }
}
