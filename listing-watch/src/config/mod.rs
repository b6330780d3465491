//! Application configuration loaded from environment variables.
//!
//! Supported env vars (all optional):
//! - `DATABASE_URL` (default `sqlite:listing-watch.db`)
//! - `LOG_DIR` (default `logs`), `LOG_FILTER`
//! - `SCHEDULER_TICK_MS`, `RUN_HISTORY_LIMIT`
//! - `DISPATCH_QUEUE_SIZE`, `DISPATCH_MAX_ATTEMPTS`, `DISPATCH_BASE_DELAY_MS`,
//!   `DISPATCH_MAX_CONCURRENCY`
//! - `HTTP_TIMEOUT_SECS`
//! - `COLLECTOR_COMMAND`, `COLLECTOR_ARGS` (whitespace separated),
//!   `COLLECTOR_TIMEOUT_SECS`
//!
//! Empty values count as unset. Values that fail to parse are errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::collector::CommandCollectorConfig;
use crate::notification::dispatcher::DispatcherConfig;
use crate::scheduler::SchedulerConfig;
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:listing-watch.db";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default timeout for outbound channel requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub log_dir: PathBuf,
    /// Overrides the default log filter when `RUST_LOG` is unset.
    pub log_filter: Option<String>,
    pub scheduler: SchedulerConfig,
    pub dispatcher: DispatcherConfig,
    pub http_timeout: Duration,
    /// `None` when no scraper command is configured.
    pub collector: Option<CommandCollectorConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            log_filter: None,
            scheduler: SchedulerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            collector: None,
        }
    }
}

impl AppConfig {
    /// Load from the process environment. Call `dotenvy::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(dir) = env.string("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        config.log_filter = env.string("LOG_FILTER");

        if let Some(ms) = env.positive::<u64>("SCHEDULER_TICK_MS")? {
            config.scheduler.tick = Duration::from_millis(ms);
        }
        if let Some(limit) = env.positive::<usize>("RUN_HISTORY_LIMIT")? {
            config.scheduler.history_limit = limit;
        }

        if let Some(size) = env.positive::<usize>("DISPATCH_QUEUE_SIZE")? {
            config.dispatcher.queue_capacity = size;
        }
        if let Some(attempts) = env.positive::<u32>("DISPATCH_MAX_ATTEMPTS")? {
            config.dispatcher.max_attempts = attempts;
        }
        if let Some(ms) = env.positive::<u64>("DISPATCH_BASE_DELAY_MS")? {
            config.dispatcher.base_delay = Duration::from_millis(ms);
        }
        if let Some(n) = env.positive::<usize>("DISPATCH_MAX_CONCURRENCY")? {
            config.dispatcher.max_concurrent_deliveries = n;
        }

        if let Some(secs) = env.positive::<u64>("HTTP_TIMEOUT_SECS")? {
            config.http_timeout = Duration::from_secs(secs);
        }

        if let Some(program) = env.string("COLLECTOR_COMMAND") {
            let args = env
                .string("COLLECTOR_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            let mut collector = CommandCollectorConfig::new(program, args);
            if let Some(secs) = env.positive::<u64>("COLLECTOR_TIMEOUT_SECS")? {
                collector.page_timeout = Duration::from_secs(secs);
            }
            config.collector = Some(collector);
        }

        Ok(config)
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    /// Parse a strictly positive number.
    fn positive<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr + PartialOrd + Default,
    {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        match raw.parse::<T>() {
            Ok(value) if value > T::default() => Ok(Some(value)),
            _ => Err(Error::config(format!(
                "{key} must be a positive number, got {raw:?}"
            ))),
        }
    }
}
