//! Integration tests for the listing-watch database layer and pipeline.
//!
//! These tests use a real SQLite database (in-memory, or a temp file where a
//! test needs to reopen it) to verify repository operations and the wired
//! pipeline work correctly with the actual schema.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;

use listing_watch::Error;
use listing_watch::collector::{CollectBatch, CollectRequest, Collector};
use listing_watch::database::{DbPool, init_pool, run_migrations};
use listing_watch::domain::{CollectedItem, PriceRange, QuickFilter, Rule, ScheduleSpec};
use listing_watch::notification::channels::{ChannelConfig, ChannelTarget, WebhookConfig};

/// Helper to create a test database pool with migrations applied.
async fn setup_test_db() -> DbPool {
    let pool = init_pool("sqlite::memory:")
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn webhook_target(id: &str) -> ChannelTarget {
    ChannelTarget::new(
        id,
        ChannelConfig::GenericWebhook(WebhookConfig::new("http://127.0.0.1:9/hook")),
    )
    .with_id(id)
}

mod database_tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();

        for table in [
            "schedule_task",
            "run_record",
            "match_rule",
            "quick_filter",
            "channel_target",
            "seen_item",
            "notification_dead_letter",
        ] {
            assert!(table_names.contains(&table), "{table} table missing");
        }
    }

    #[tokio::test]
    async fn test_journal_mode() {
        let pool = setup_test_db().await;

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("Failed to query journal mode");

        // Memory databases can't use WAL, but file-based would
        assert!(result.0 == "memory" || result.0 == "wal");
    }
}

mod schedule_repository_tests {
    use super::*;
    use listing_watch::database::repositories::{
        RunRecordRepository, ScheduleRepository, SqlxRunRecordRepository, SqlxScheduleRepository,
    };
    use listing_watch::domain::{RunOutcome, RunRecord, ScheduleMode};

    fn run(task_id: &str, minutes_ago: i64, outcome: RunOutcome) -> RunRecord {
        let started = Utc::now() - Duration::minutes(minutes_ago);
        RunRecord {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            started_at: started,
            finished_at: started + Duration::seconds(5),
            outcome,
            items_found: 10,
            items_new: 4,
            items_matched: 1,
            jobs_enqueued: 2,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_task_save_and_update_run_state() {
        let pool = setup_test_db().await;
        let repo = SqlxScheduleRepository::new(pool);

        let spec = ScheduleSpec::interval("phones", "iPhone", Duration::minutes(30))
            .with_max_pages(5)
            .with_notify_events(true);
        repo.save_task(&spec).await.unwrap();

        let loaded = repo.get_task(&spec.id).await.unwrap();
        assert_eq!(loaded.name, "phones");
        assert_eq!(loaded.mode, ScheduleMode::Interval);
        assert_eq!(loaded.interval_secs, Some(1800));
        assert_eq!(loaded.max_pages, 5);
        assert!(loaded.notify_events);
        assert!(loaded.last_run.is_none());

        let last = Utc::now();
        repo.update_run_state(&spec.id, false, Some(last), None)
            .await
            .unwrap();
        let loaded = repo.get_task(&spec.id).await.unwrap();
        assert!(!loaded.active);
        assert_eq!(
            loaded.last_run.map(|t| t.timestamp_millis()),
            Some(last.timestamp_millis())
        );

        let err = repo
            .update_run_state("missing", true, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_save_task_upserts() {
        let pool = setup_test_db().await;
        let repo = SqlxScheduleRepository::new(pool);

        let mut spec = ScheduleSpec::interval("phones", "iPhone", Duration::minutes(30));
        repo.save_task(&spec).await.unwrap();
        spec.keyword = "Pixel".to_string();
        repo.save_task(&spec).await.unwrap();

        let tasks = repo.list_tasks().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].keyword, "Pixel");
    }

    #[tokio::test]
    async fn test_runs_listed_oldest_first_and_pruned() {
        let pool = setup_test_db().await;
        let tasks = SqlxScheduleRepository::new(pool.clone());
        let runs = SqlxRunRecordRepository::new(pool);

        let spec = ScheduleSpec::interval("t", "k", Duration::minutes(5));
        tasks.save_task(&spec).await.unwrap();

        for minutes_ago in [30, 20, 10] {
            runs.add_run(&run(&spec.id, minutes_ago, RunOutcome::Success))
                .await
                .unwrap();
        }
        let mut failed = run(&spec.id, 1, RunOutcome::Failure);
        failed.error = Some("captcha wall".to_string());
        runs.add_run(&failed).await.unwrap();

        let listed = runs.list_runs(&spec.id, 3).await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].started_at < w[1].started_at));
        let last = listed.last().unwrap();
        assert_eq!(last.outcome, RunOutcome::Failure);
        assert_eq!(last.error.as_deref(), Some("captcha wall"));

        assert_eq!(runs.prune_runs(&spec.id, 2).await.unwrap(), 2);
        assert_eq!(runs.list_runs(&spec.id, 10).await.unwrap().len(), 2);

        tasks.delete_task(&spec.id).await.unwrap();
        assert!(runs.list_runs(&spec.id, 10).await.unwrap().is_empty());
    }
}

mod rule_repository_tests {
    use super::*;
    use listing_watch::database::repositories::{RuleRepository, SqlxRuleRepository};

    #[tokio::test]
    async fn test_rule_crud() {
        let pool = setup_test_db().await;
        let repo = SqlxRuleRepository::new(pool);

        let rule = Rule::new("cheap iPhone")
            .with_include_keywords("iPhone，苹果")
            .with_exclude_keywords("broken")
            .with_price(PriceRange::at_most(3000.0))
            .with_targets(["ops", "mail"]);
        repo.create_rule(&rule).await.unwrap();

        let loaded = repo.get_rule(&rule.id).await.unwrap();
        assert_eq!(loaded.criteria, rule.criteria);
        assert_eq!(loaded.target_ids, vec!["ops", "mail"]);

        let mut updated = loaded.clone();
        updated.enabled = false;
        updated.criteria.price = PriceRange::new(Some(100.0), None);
        repo.update_rule(&updated).await.unwrap();
        let loaded = repo.get_rule(&rule.id).await.unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.criteria.price, PriceRange::new(Some(100.0), None));

        repo.delete_rule(&rule.id).await.unwrap();
        assert!(matches!(
            repo.get_rule(&rule.id).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_quick_filter_defaults_then_persists() {
        let pool = setup_test_db().await;
        let repo = SqlxRuleRepository::new(pool);

        assert_eq!(repo.get_quick_filter().await.unwrap(), QuickFilter::default());

        let mut filter = QuickFilter {
            enabled: true,
            target_ids: vec!["ops".to_string()],
            ..Default::default()
        };
        filter.criteria.price = PriceRange::at_most(500.0);
        repo.save_quick_filter(&filter).await.unwrap();
        filter.enabled = false;
        repo.save_quick_filter(&filter).await.unwrap();

        assert_eq!(repo.get_quick_filter().await.unwrap(), filter);
    }
}

mod notification_repository_tests {
    use super::*;
    use listing_watch::database::models::NotificationDeadLetterDbModel;
    use listing_watch::database::repositories::{
        NotificationRepository, SqlxNotificationRepository,
    };
    use listing_watch::notification::events::{EventSubscriptions, Message};
    use listing_watch::notification::dispatcher::NotificationJob;

    #[tokio::test]
    async fn test_channel_crud() {
        let pool = setup_test_db().await;
        let repo = SqlxNotificationRepository::new(pool);

        let target = webhook_target("ops")
            .with_rate_limit(20)
            .with_events(EventSubscriptions {
                run_failed: true,
                ..Default::default()
            });
        repo.create_channel(&target).await.unwrap();
        assert_eq!(repo.get_channel("ops").await.unwrap(), target);

        let mut disabled = target.clone();
        disabled.enabled = false;
        repo.update_channel(&disabled).await.unwrap();
        assert!(!repo.list_channels().await.unwrap()[0].enabled);

        repo.delete_channel("ops").await.unwrap();
        assert!(repo.list_channels().await.unwrap().is_empty());
        assert!(matches!(
            repo.update_channel(&target).await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dead_letters_by_target() {
        let pool = setup_test_db().await;
        let repo = SqlxNotificationRepository::new(pool);

        for target in ["a", "a", "b"] {
            let job = NotificationJob::new(target, Message::new("title", "body"), 3);
            let entry = NotificationDeadLetterDbModel::from_pending(&job, "shutdown");
            repo.add_to_dead_letter(&entry).await.unwrap();
        }

        assert_eq!(repo.list_dead_letters(None, 10).await.unwrap().len(), 3);
        let only_a = repo.list_dead_letters(Some("a"), 10).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert_eq!(only_a[0].error_message, "shutdown");

        repo.delete_dead_letter(&only_a[0].id).await.unwrap();
        assert_eq!(repo.list_dead_letters(Some("a"), 10).await.unwrap().len(), 1);

        // Everything is younger than a day.
        assert_eq!(repo.cleanup_old_dead_letters(1).await.unwrap(), 0);
    }
}

mod seen_item_tests {
    use super::*;
    use listing_watch::database::repositories::{SeenItemRepository, SqlxSeenItemRepository};

    #[tokio::test]
    async fn test_mark_seen_once() {
        let pool = setup_test_db().await;
        let repo = SqlxSeenItemRepository::new(pool);
        let item = CollectedItem::new("x-1", "Switch OLED", "1800");

        assert!(!repo.seen("x-1").await.unwrap());
        assert!(repo.mark_seen(&item).await.unwrap());
        assert!(!repo.mark_seen(&item).await.unwrap());
        assert!(repo.seen("x-1").await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.purge_older_than(1).await.unwrap(), 0);
    }
}

mod pipeline_tests {
    use super::*;
    use listing_watch::config::AppConfig;
    use listing_watch::database::repositories::{
        NotificationRepository, RunRecordRepository, ScheduleRepository, SeenItemRepository,
    };
    use listing_watch::domain::RunOutcome;
    use listing_watch::services::ServiceContainer;
    use tempfile::TempDir;

    /// Returns the same listings on every run.
    struct StaticCollector(Vec<CollectedItem>);

    #[async_trait]
    impl Collector for StaticCollector {
        fn name(&self) -> &str {
            "static"
        }

        async fn collect(
            &self,
            _request: &CollectRequest,
            _stop: &CancellationToken,
        ) -> listing_watch::Result<CollectBatch> {
            Ok(CollectBatch::new(self.0.clone(), 1, false))
        }
    }

    fn listings() -> Vec<CollectedItem> {
        vec![
            CollectedItem::new("1", "iPhone 12 未拆封", "2800"),
            CollectedItem::new("2", "iPhone 12", "3500"),
            CollectedItem::new("3", "Pixel 7", "900"),
        ]
    }

    async fn open_file_db(dir: &TempDir) -> DbPool {
        let db_path = dir.path().join("listing-watch.db");
        let db_url = format!(
            "sqlite:{}?mode=rwc",
            db_path.to_string_lossy().replace('\\', "/")
        );
        let pool = init_pool(&db_url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    async fn container(pool: DbPool) -> ServiceContainer {
        ServiceContainer::with_collector(
            pool,
            &AppConfig::default(),
            Arc::new(StaticCollector(listings())),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_requires_collector_command() {
        let pool = setup_test_db().await;
        let result = ServiceContainer::new(pool, &AppConfig::default()).await;
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[tokio::test]
    async fn test_run_dedups_matches_and_survives_restart() {
        let dir = TempDir::new().unwrap();
        let services = container(open_file_db(&dir).await).await;
        services.initialize().await.unwrap();

        services.create_target(webhook_target("ops")).await.unwrap();
        let rule = Rule::new("cheap iPhone")
            .with_include_keywords("iPhone")
            .with_price(PriceRange::at_most(3000.0))
            .with_targets(["ops"]);
        services.create_rule(rule).await.unwrap();

        let spec = ScheduleSpec::interval("phones", "iPhone", Duration::minutes(60));
        let task_id = services.scheduler.register(spec).await.unwrap();

        let first = services.scheduler.fire(&task_id).await.unwrap().unwrap();
        assert_eq!(first.outcome, RunOutcome::Success);
        assert_eq!(first.items_found, 3);
        assert_eq!(first.items_new, 3);
        assert_eq!(first.items_matched, 1);
        assert_eq!(first.jobs_enqueued, 1);

        let second = services.scheduler.fire(&task_id).await.unwrap().unwrap();
        assert_eq!(second.items_found, 3);
        assert_eq!(second.items_new, 0);
        assert_eq!(second.jobs_enqueued, 0);

        assert_eq!(services.seen_repo.count().await.unwrap(), 3);
        assert_eq!(services.run_repo.list_runs(&task_id, 10).await.unwrap().len(), 2);
        let stored = services.schedule_repo.get_task(&task_id).await.unwrap();
        assert_eq!(
            stored.last_run.map(|t| t.timestamp_millis()),
            Some(second.started_at.timestamp_millis())
        );

        let stats = services.stats();
        assert_eq!(stats.task_count, 1);
        assert_eq!(stats.rule_count, 1);
        assert_eq!(stats.target_count, 1);
        assert_eq!(stats.dispatch.queue_depth, 1);

        // The dispatcher never ran: the queued job is kept as a dead letter.
        services.shutdown().await.unwrap();

        let restarted = container(open_file_db(&dir).await).await;
        restarted.initialize().await.unwrap();

        let letters = restarted
            .notification_repo
            .list_dead_letters(Some("ops"), 10)
            .await
            .unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].error_message, "shutdown");
        assert!(letters[0].body.contains("iPhone 12 未拆封"));

        let tasks = restarted.scheduler.list();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].stats.total_runs, 2);
        assert_eq!(restarted.scheduler.history(&task_id).unwrap().len(), 2);
        assert_eq!(restarted.engine.snapshot().rules.len(), 1);
        assert!(restarted.registry.contains("ops"));

        restarted.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_quick_filter_routes_through_container() {
        let pool = setup_test_db().await;
        let services = container(pool).await;
        services.initialize().await.unwrap();
        services.create_target(webhook_target("cheap")).await.unwrap();

        let mut filter = QuickFilter {
            enabled: true,
            target_ids: vec!["cheap".to_string()],
            ..Default::default()
        };
        filter.criteria.price = PriceRange::at_most(1000.0);
        services.save_quick_filter(filter).await.unwrap();

        let spec = ScheduleSpec::interval("all", "phone", Duration::minutes(10));
        let task_id = services.scheduler.register(spec).await.unwrap();
        let run = services.scheduler.fire(&task_id).await.unwrap().unwrap();

        assert_eq!(run.items_matched, 1);
        assert_eq!(services.dispatcher.stats().queue_depth, 1);
    }

    #[tokio::test]
    async fn test_deleted_rule_stops_matching() {
        let pool = setup_test_db().await;
        let services = container(pool).await;
        services.create_target(webhook_target("ops")).await.unwrap();
        let rule = services
            .create_rule(Rule::new("pixels").with_include_keywords("pixel").with_targets(["ops"]))
            .await
            .unwrap();
        services.delete_rule(&rule.id).await.unwrap();

        let spec = ScheduleSpec::interval("all", "phone", Duration::minutes(10));
        let task_id = services.scheduler.register(spec).await.unwrap();
        let run = services.scheduler.fire(&task_id).await.unwrap().unwrap();
        assert_eq!(run.items_matched, 0);
        assert_eq!(services.dispatcher.stats().queue_depth, 0);
    }

    #[tokio::test]
    async fn test_unbuildable_target_is_not_persisted() {
        use listing_watch::notification::channels::FeishuConfig;

        let pool = setup_test_db().await;
        let services = container(pool).await;

        let broken = ChannelTarget::new(
            "feishu",
            ChannelConfig::Feishu(FeishuConfig {
                webhook_url: String::new(),
                secret: None,
            }),
        );
        let err = services.create_target(broken).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(services.notification_repo.list_channels().await.unwrap().is_empty());
        assert!(services.registry.targets().is_empty());

        // A failed update leaves both the row and the live adapter untouched.
        let ops = services.create_target(webhook_target("ops")).await.unwrap();
        let mut bad_update = ops.clone();
        bad_update.config = ChannelConfig::GenericWebhook(WebhookConfig::new("ftp://nowhere"));
        assert!(services.update_target(bad_update).await.is_err());

        let stored = services.notification_repo.get_channel("ops").await.unwrap();
        assert_eq!(stored, ops);
        assert_eq!(services.registry.targets(), vec![ops]);
    }
}
