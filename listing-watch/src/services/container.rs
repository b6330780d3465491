//! Service container for dependency injection.
//!
//! The ServiceContainer builds the repositories, the notification dispatcher,
//! the matching engine and the scheduler, wires them together and manages
//! their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::ItemRouter;
use crate::collector::{CommandCollector, Collector, DedupCollector};
use crate::config::AppConfig;
use crate::database::models::NotificationDeadLetterDbModel;
use crate::database::repositories::{
    NotificationRepository, RuleRepository, RunRecordRepository, ScheduleRepository,
    SeenItemRepository, SqlxNotificationRepository, SqlxRuleRepository, SqlxRunRecordRepository,
    SqlxScheduleRepository, SqlxSeenItemRepository,
};
use crate::domain::rule::{QuickFilter, Rule};
use crate::matcher::MatchingEngine;
use crate::notification::channels::ChannelTarget;
use crate::notification::dispatcher::{DispatchStats, Dispatcher};
use crate::notification::registry::ChannelRegistry;
use crate::scheduler::{Scheduler, SchedulerPersistence};
use crate::utils::http_client::build_http_client;
use crate::{Error, Result};

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Dead letters older than this are removed by the maintenance task.
const DEAD_LETTER_RETENTION_DAYS: i64 = 30;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Reason recorded for jobs still queued at shutdown.
const SHUTDOWN_REASON: &str = "shutdown";

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Database connection pool.
    pub pool: SqlitePool,
    pub schedule_repo: Arc<dyn ScheduleRepository>,
    pub run_repo: Arc<dyn RunRecordRepository>,
    pub rule_repo: Arc<dyn RuleRepository>,
    pub notification_repo: Arc<dyn NotificationRepository>,
    pub seen_repo: Arc<dyn SeenItemRepository>,
    pub registry: Arc<ChannelRegistry>,
    pub dispatcher: Dispatcher,
    pub engine: Arc<MatchingEngine>,
    pub router: ItemRouter,
    pub scheduler: Scheduler,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
    tasks: TaskTracker,
}

impl ServiceContainer {
    /// Create a container that collects through the configured scraper command.
    pub async fn new(pool: SqlitePool, config: &AppConfig) -> Result<Self> {
        let collector_config = config.collector.clone().ok_or_else(|| {
            Error::config("COLLECTOR_COMMAND must be set to run collection tasks")
        })?;
        let collector = Arc::new(CommandCollector::new(collector_config)?);
        Self::with_collector(pool, config, collector).await
    }

    /// Create a container around an arbitrary collector.
    ///
    /// The collector is wrapped so that only unseen items reach the matcher.
    pub async fn with_collector(
        pool: SqlitePool,
        config: &AppConfig,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        info!("Initializing service container");

        let schedule_repo: Arc<dyn ScheduleRepository> =
            Arc::new(SqlxScheduleRepository::new(pool.clone()));
        let run_repo: Arc<dyn RunRecordRepository> =
            Arc::new(SqlxRunRecordRepository::new(pool.clone()));
        let rule_repo: Arc<dyn RuleRepository> = Arc::new(SqlxRuleRepository::new(pool.clone()));
        let notification_repo: Arc<dyn NotificationRepository> =
            Arc::new(SqlxNotificationRepository::new(pool.clone()));
        let seen_repo: Arc<dyn SeenItemRepository> =
            Arc::new(SqlxSeenItemRepository::new(pool.clone()));

        let client = build_http_client(config.http_timeout, None)?;
        let registry = Arc::new(ChannelRegistry::new(client, config.http_timeout));
        let dispatcher = Dispatcher::with_dead_letter_repository(
            config.dispatcher.clone(),
            registry.clone(),
            notification_repo.clone(),
        );

        let engine = Arc::new(MatchingEngine::default());
        let router = ItemRouter::new(engine.clone(), dispatcher.clone());

        let collector: Arc<dyn Collector> =
            Arc::new(DedupCollector::new(collector, seen_repo.clone()));
        let scheduler = Scheduler::new(
            config.scheduler.clone(),
            collector,
            router.clone(),
            SchedulerPersistence {
                schedules: Some(schedule_repo.clone()),
                runs: Some(run_repo.clone()),
            },
        );

        info!("Service container initialized");

        Ok(Self {
            pool,
            schedule_repo,
            run_repo,
            rule_repo,
            notification_repo,
            seen_repo,
            registry,
            dispatcher,
            engine,
            router,
            scheduler,
            cancellation_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Load channel targets, rules and schedules from the database.
    pub async fn initialize(&self) -> Result<()> {
        info!("Initializing services");

        let mut targets = 0;
        for target in self.notification_repo.list_channels().await? {
            let id = target.id.clone();
            match self.dispatcher.register_target(target) {
                Ok(()) => targets += 1,
                Err(e) => warn!(target_id = %id, error = %e, "Skipping invalid channel target"),
            }
        }

        let rules = self.rule_repo.list_rules().await?;
        let rule_count = rules.len();
        self.engine.replace_rules(rules);
        let quick_filter = self.rule_repo.get_quick_filter().await?;
        if let Err(e) = self.engine.set_quick_filter(quick_filter) {
            warn!(error = %e, "Ignoring invalid quick filter");
        }

        let tasks = self.scheduler.load_from_repository().await?;

        info!(targets, rules = rule_count, tasks, "Services initialized");
        Ok(())
    }

    /// Spawn the dispatcher, scheduler and maintenance loops.
    pub fn start(&self) {
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancellation_token.child_token();
        self.tasks.spawn(async move { dispatcher.run(cancel).await });

        let scheduler = self.scheduler.clone();
        let cancel = self.cancellation_token.child_token();
        self.tasks.spawn(async move { scheduler.run(cancel).await });

        let repo = self.notification_repo.clone();
        let cancel = self.cancellation_token.child_token();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Maintenance task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(MAINTENANCE_INTERVAL) => {
                        match repo.cleanup_old_dead_letters(DEAD_LETTER_RETENTION_DAYS).await {
                            Ok(0) => {}
                            Ok(removed) => info!(removed, "Removed expired dead letters"),
                            Err(e) => warn!(error = %e, "Failed to clean up dead letters"),
                        }
                    }
                }
            }
        });

        info!("Background services started");
    }

    // ========== Rules ==========

    pub async fn create_rule(&self, rule: Rule) -> Result<Rule> {
        rule.validate()?;
        self.rule_repo.create_rule(&rule).await?;
        self.engine.upsert_rule(rule.clone())?;
        info!(rule_id = %rule.id, name = %rule.name, "Rule created");
        Ok(rule)
    }

    pub async fn update_rule(&self, mut rule: Rule) -> Result<Rule> {
        rule.validate()?;
        rule.updated_at = chrono::Utc::now();
        self.rule_repo.update_rule(&rule).await?;
        self.engine.upsert_rule(rule.clone())?;
        info!(rule_id = %rule.id, "Rule updated");
        Ok(rule)
    }

    pub async fn delete_rule(&self, id: &str) -> Result<()> {
        self.rule_repo.delete_rule(id).await?;
        self.engine.remove_rule(id);
        info!(rule_id = %id, "Rule deleted");
        Ok(())
    }

    pub async fn save_quick_filter(&self, quick_filter: QuickFilter) -> Result<()> {
        quick_filter.validate()?;
        self.rule_repo.save_quick_filter(&quick_filter).await?;
        self.engine.set_quick_filter(quick_filter)
    }

    // ========== Channel targets ==========

    /// Build the adapter first so a bad config never reaches the database.
    pub async fn create_target(&self, target: ChannelTarget) -> Result<ChannelTarget> {
        let channel = self.registry.build(&target)?;
        self.notification_repo.create_channel(&target).await?;
        self.dispatcher.register_channel(target.clone(), channel);
        Ok(target)
    }

    pub async fn update_target(&self, target: ChannelTarget) -> Result<ChannelTarget> {
        let channel = self.registry.build(&target)?;
        self.notification_repo.update_channel(&target).await?;
        self.dispatcher.register_channel(target.clone(), channel);
        Ok(target)
    }

    pub async fn delete_target(&self, id: &str) -> Result<()> {
        self.notification_repo.delete_channel(id).await?;
        self.dispatcher.remove_target(id);
        Ok(())
    }

    /// Send the fixed test message through a target.
    pub async fn test_target(&self, id: &str) -> Result<()> {
        self.registry.test(id).await
    }

    // ========== Lifecycle ==========

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Jobs still queued in the dispatcher are persisted as dead letters.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!(timeout_secs = timeout.as_secs(), "Shutting down services");

        self.cancellation_token.cancel();
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        let pending = self.dispatcher.shutdown();
        let mut persisted = 0;
        for job in &pending {
            let entry = NotificationDeadLetterDbModel::from_pending(job, SHUTDOWN_REASON);
            match self.notification_repo.add_to_dead_letter(&entry).await {
                Ok(()) => persisted += 1,
                Err(e) => warn!(job_id = job.id, error = %e, "Failed to persist pending notification"),
            }
        }
        if !pending.is_empty() {
            info!(persisted, pending = pending.len(), "Persisted pending notifications");
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> ServiceStats {
        let tasks = self.scheduler.list();
        ServiceStats {
            task_count: tasks.len(),
            running_task_count: tasks
                .iter()
                .filter(|t| t.state == crate::scheduler::TaskState::Running)
                .count(),
            rule_count: self.engine.snapshot().rules.len(),
            target_count: self.registry.targets().len(),
            dispatch: self.dispatcher.stats(),
        }
    }
}

/// Service statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub task_count: usize,
    pub running_task_count: usize,
    pub rule_count: usize,
    pub target_count: usize,
    pub dispatch: DispatchStats,
}
