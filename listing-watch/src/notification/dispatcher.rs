//! Notification dispatcher.
//!
//! Jobs wait in one bounded in-memory queue. A single drain loop hands
//! eligible jobs to per-delivery tasks:
//!
//! - a job is eligible once `now >= not_before`, its target has no delivery in
//!   flight and the target's rate limiter admits it;
//! - ineligible jobs are skipped, not waited on, so a slow or throttled target
//!   never blocks the others;
//! - a failed attempt re-queues the job with
//!   `not_before = now + base_delay * 2^attempt_count` until `max_attempts` is
//!   reached, then the job becomes a dead letter.
//!
//! Delivery is at-least-once. The queue lives in memory only; on shutdown the
//! remaining jobs are handed back by [`Dispatcher::take_pending`] so the
//! caller can persist them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::channels::{ChannelTarget, NotificationChannel};
use super::events::{Message, NotificationPriority};
use super::rate_limiter::RateLimiter;
use super::registry::ChannelRegistry;
use crate::database::models::NotificationDeadLetterDbModel;
use crate::database::repositories::NotificationRepository;
use crate::{Error, Result};

/// Default maximum queued jobs.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Default delivery attempts per job.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Attempts granted to urgent jobs, regardless of the configured default.
pub const URGENT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff base.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on a single backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Default cap on concurrent deliveries across all targets.
pub const DEFAULT_MAX_CONCURRENT_DELIVERIES: usize = 4;

/// Dead letters kept in memory for inspection.
pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 200;

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_concurrent_deliveries: usize,
    pub dead_letter_capacity: usize,
    /// Default per-target limit for targets without their own.
    pub default_rate_limit_per_minute: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_concurrent_deliveries: DEFAULT_MAX_CONCURRENT_DELIVERIES,
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            default_rate_limit_per_minute: super::channels::DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }
}

impl DispatcherConfig {
    /// Delay before the next attempt after `attempt_count` failures.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// One message for one target.
#[derive(Debug, Clone)]
pub struct NotificationJob {
    /// Assigned on enqueue.
    pub id: u64,
    pub target_id: String,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub not_before: Instant,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl NotificationJob {
    pub fn new(target_id: impl Into<String>, message: Message, max_attempts: u32) -> Self {
        Self {
            id: 0,
            target_id: target_id.into(),
            title: message.title,
            body: message.body,
            priority: message.priority,
            attempt_count: 0,
            max_attempts,
            not_before: Instant::now(),
            created_at: Utc::now(),
            last_error: None,
        }
    }

    pub fn message(&self) -> Message {
        Message::new(self.title.clone(), self.body.clone()).with_priority(self.priority)
    }
}

/// A job that will not be delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub job_id: u64,
    pub target_id: String,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub attempts: u32,
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_job(job: &NotificationJob, error: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            target_id: job.target_id.clone(),
            title: job.title.clone(),
            body: job.body.clone(),
            priority: job.priority,
            attempts: job.attempt_count,
            error: error.into(),
            created_at: job.created_at,
            failed_at: Utc::now(),
        }
    }
}

/// Per-target delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    pub sent: u64,
    pub failed: u64,
    pub last_sent: Option<DateTime<Utc>>,
}

/// Dispatcher statistics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub sent: u64,
    pub failed: u64,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub last_sent: Option<DateTime<Utc>>,
    pub per_target: HashMap<String, TargetStats>,
}

#[derive(Debug, Default)]
struct Counters {
    sent: u64,
    failed: u64,
    last_sent: Option<DateTime<Utc>>,
    per_target: HashMap<String, TargetStats>,
}

struct Inner {
    config: DispatcherConfig,
    registry: Arc<ChannelRegistry>,
    limiter: RateLimiter,
    queue: Mutex<VecDeque<NotificationJob>>,
    in_flight: Mutex<HashSet<String>>,
    counters: Mutex<Counters>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    dead_letter_repo: Option<Arc<dyn NotificationRepository>>,
    next_id: AtomicU64,
    wake: Notify,
    shutdown: CancellationToken,
}

/// Queue + retry orchestration over the registered channels.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, registry: Arc<ChannelRegistry>) -> Self {
        Self::build(config, registry, None)
    }

    /// Persist dead letters through `repo` as well as keeping them in memory.
    pub fn with_dead_letter_repository(
        config: DispatcherConfig,
        registry: Arc<ChannelRegistry>,
        repo: Arc<dyn NotificationRepository>,
    ) -> Self {
        Self::build(config, registry, Some(repo))
    }

    fn build(
        config: DispatcherConfig,
        registry: Arc<ChannelRegistry>,
        dead_letter_repo: Option<Arc<dyn NotificationRepository>>,
    ) -> Self {
        let limiter = RateLimiter::new(config.default_rate_limit_per_minute);
        for target in registry.targets() {
            limiter.set_policy(&target.id, target.rate_policy());
        }
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                limiter,
                queue: Mutex::new(VecDeque::new()),
                in_flight: Mutex::new(HashSet::new()),
                counters: Mutex::new(Counters::default()),
                dead_letters: Mutex::new(VecDeque::new()),
                dead_letter_repo,
                next_id: AtomicU64::new(1),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.inner.registry
    }

    /// Register (or replace) a target and apply its rate policy.
    pub fn register_target(&self, target: ChannelTarget) -> Result<()> {
        let id = target.id.clone();
        let policy = target.rate_policy();
        self.inner.registry.register(target)?;
        self.inner.limiter.set_policy(&id, policy);
        Ok(())
    }

    /// Register a target with a prebuilt adapter.
    pub fn register_channel(&self, target: ChannelTarget, channel: Arc<dyn NotificationChannel>) {
        self.inner.limiter.set_policy(&target.id, target.rate_policy());
        self.inner.registry.register_with_channel(target, channel);
    }

    /// Remove a target. Its queued jobs fail with "unknown target" when reached.
    pub fn remove_target(&self, id: &str) -> Option<ChannelTarget> {
        self.inner.limiter.remove(id);
        self.inner.registry.remove(id)
    }

    /// Attempts a new job for `priority` gets.
    pub fn max_attempts_for(&self, priority: NotificationPriority) -> u32 {
        if priority == NotificationPriority::Urgent {
            URGENT_MAX_ATTEMPTS
        } else {
            self.inner.config.max_attempts
        }
    }

    /// Build a job for `target_id` with the configured attempt budget.
    pub fn job(&self, target_id: impl Into<String>, message: Message) -> NotificationJob {
        let max_attempts = self.max_attempts_for(message.priority);
        NotificationJob::new(target_id, message, max_attempts)
    }

    /// Queue a job. Fails with [`Error::QueueFull`] at capacity.
    pub fn enqueue(&self, mut job: NotificationJob) -> Result<u64> {
        if self.is_shut_down() {
            return Err(Error::Other("notification dispatcher is shut down".to_string()));
        }
        if job.max_attempts == 0 {
            return Err(Error::validation("max_attempts must be at least 1"));
        }
        let capacity = self.inner.config.queue_capacity;
        let id = {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= capacity {
                warn!(target_id = %job.target_id, capacity, "Notification queue full, rejecting job");
                return Err(Error::QueueFull { capacity });
            }
            job.id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let id = job.id;
            debug!(job_id = id, target_id = %job.target_id, title = %job.title, "Job queued");
            queue.push_back(job);
            id
        };
        self.inner.wake.notify_one();
        Ok(id)
    }

    /// Queue `message` once per target. Returns how many jobs were accepted.
    ///
    /// A full queue stops the fan-out; the remaining targets are skipped and logged.
    pub fn notify_targets<'a, I>(&self, target_ids: I, message: &Message) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut accepted = 0;
        for target_id in target_ids {
            match self.enqueue(self.job(target_id, message.clone())) {
                Ok(_) => accepted += 1,
                Err(e) => {
                    warn!(target_id, error = %e, title = %message.title, "Could not queue notification");
                    break;
                }
            }
        }
        accepted
    }

    pub fn stats(&self) -> DispatchStats {
        let counters = self.inner.counters.lock();
        DispatchStats {
            sent: counters.sent,
            failed: counters.failed,
            queue_depth: self.inner.queue.lock().len(),
            in_flight: self.inner.in_flight.lock().len(),
            last_sent: counters.last_sent,
            per_target: counters.per_target.clone(),
        }
    }

    /// Most recent dead letters, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().iter().cloned().collect()
    }

    /// Remove and return every queued job.
    pub fn take_pending(&self) -> Vec<NotificationJob> {
        self.inner.queue.lock().drain(..).collect()
    }

    /// Stop the drain loop and hand back the jobs it never got to.
    ///
    /// The queue is in memory only; callers persist the returned jobs.
    pub fn shutdown(&self) -> Vec<NotificationJob> {
        self.inner.shutdown.cancel();
        let pending = self.take_pending();
        if !pending.is_empty() {
            warn!(count = pending.len(), "Notification dispatcher shut down with queued jobs");
        }
        pending
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run the drain loop until `cancel` fires.
    ///
    /// Deliveries already in flight are allowed to finish (each is bounded by
    /// its channel timeout); queued jobs stay queued for [`take_pending`](Self::take_pending).
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            capacity = self.inner.config.queue_capacity,
            max_attempts = self.inner.config.max_attempts,
            "Notification dispatcher started"
        );
        self.drive(Some(&cancel)).await;
        info!("Notification dispatcher stopped");
    }

    /// Process until the queue is empty and nothing is in flight.
    ///
    /// Waits out backoff and rate-limit windows as needed.
    pub async fn drain(&self) {
        self.drive(None).await;
    }

    async fn drive(&self, cancel: Option<&CancellationToken>) {
        let mut deliveries = JoinSet::new();

        loop {
            while let Some(joined) = deliveries.try_join_next() {
                log_join(joined);
            }

            let next_wake = self.dispatch_ready(&mut deliveries);

            if cancel.is_none() && deliveries.is_empty() && self.inner.queue.lock().is_empty() {
                break;
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => break,
                _ = async {
                    match cancel {
                        Some(token) => token.cancelled().await,
                        None => std::future::pending().await,
                    }
                } => break,
                _ = self.inner.wake.notified() => {}
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => log_join(joined),
                _ = sleep_until_opt(next_wake), if next_wake.is_some() => {}
            }
        }

        while let Some(joined) = deliveries.join_next().await {
            log_join(joined);
        }
    }

    /// Start every eligible delivery. Returns when the earliest skipped job could become eligible.
    fn dispatch_ready(&self, deliveries: &mut JoinSet<()>) -> Option<Instant> {
        let inner = &self.inner;
        let now = Instant::now();
        let mut next_wake: Option<Instant> = None;
        let mut wake_at = |at: Instant| {
            next_wake = Some(next_wake.map_or(at, |current| current.min(at)));
        };
        let mut unroutable = Vec::new();

        {
            let mut queue = inner.queue.lock();
            let mut in_flight = inner.in_flight.lock();
            let mut i = 0;

            while i < queue.len() {
                if in_flight.len() >= inner.config.max_concurrent_deliveries {
                    break;
                }
                let job = &queue[i];
                if job.not_before > now {
                    wake_at(job.not_before);
                    i += 1;
                    continue;
                }
                if in_flight.contains(&job.target_id) {
                    i += 1;
                    continue;
                }

                let entry = match inner.registry.get(&job.target_id) {
                    Some(entry) if entry.target.enabled => entry,
                    Some(_) => {
                        if let Some(job) = queue.remove(i) {
                            unroutable.push((job, "target disabled"));
                        }
                        continue;
                    }
                    None => {
                        if let Some(job) = queue.remove(i) {
                            unroutable.push((job, "unknown target"));
                        }
                        continue;
                    }
                };

                if !inner.limiter.try_admit(&job.target_id) {
                    if let Some(wait) = inner.limiter.time_until_reset(&job.target_id) {
                        wake_at(now + wait);
                    }
                    i += 1;
                    continue;
                }

                let Some(job) = queue.remove(i) else { break };
                in_flight.insert(job.target_id.clone());
                deliveries.spawn(deliver(inner.clone(), job, entry.channel));
            }
        }

        for (job, reason) in unroutable {
            warn!(job_id = job.id, target_id = %job.target_id, reason, "Dropping undeliverable job");
            let inner = inner.clone();
            deliveries.spawn(async move { inner.give_up(job, reason.to_string()).await });
        }

        next_wake
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Notification delivery task panicked");
    }
}

/// Clears the target's in-flight mark even if the delivery panics.
struct InFlightGuard {
    inner: Arc<Inner>,
    target_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.target_id);
        self.inner.wake.notify_one();
    }
}

async fn deliver(inner: Arc<Inner>, mut job: NotificationJob, channel: Arc<dyn NotificationChannel>) {
    let guard = InFlightGuard {
        inner: inner.clone(),
        target_id: job.target_id.clone(),
    };

    let result = channel.send(&job.message()).await;

    match result {
        Ok(()) => {
            let now = Utc::now();
            let mut counters = inner.counters.lock();
            counters.sent += 1;
            counters.last_sent = Some(now);
            let target = counters.per_target.entry(job.target_id.clone()).or_default();
            target.sent += 1;
            target.last_sent = Some(now);
            drop(counters);
            info!(
                job_id = job.id,
                target_id = %job.target_id,
                channel = channel.channel_type(),
                attempt = job.attempt_count + 1,
                "Notification delivered"
            );
            drop(guard);
        }
        Err(e) => {
            job.attempt_count += 1;
            job.last_error = Some(e.to_string());

            if job.attempt_count < job.max_attempts {
                let delay = inner.config.backoff(job.attempt_count);
                job.not_before = Instant::now() + delay;
                warn!(
                    job_id = job.id,
                    target_id = %job.target_id,
                    attempt = job.attempt_count,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Notification delivery failed, will retry"
                );
                // Retries bypass the capacity check: the job was admitted once already.
                inner.queue.lock().push_back(job);
                drop(guard);
            } else {
                drop(guard);
                inner.give_up(job, e.to_string()).await;
            }
        }
    }
}

impl Inner {
    async fn give_up(&self, job: NotificationJob, reason: String) {
        {
            let mut counters = self.counters.lock();
            counters.failed += 1;
            counters
                .per_target
                .entry(job.target_id.clone())
                .or_default()
                .failed += 1;
        }
        error!(
            job_id = job.id,
            target_id = %job.target_id,
            attempts = job.attempt_count,
            error = %reason,
            "Notification dropped"
        );

        let letter = DeadLetter::from_job(&job, reason);
        {
            let mut letters = self.dead_letters.lock();
            if letters.len() >= self.config.dead_letter_capacity {
                letters.pop_front();
            }
            letters.push_back(letter.clone());
        }

        if let Some(repo) = &self.dead_letter_repo
            && let Err(e) = repo
                .add_to_dead_letter(&NotificationDeadLetterDbModel::from(&letter))
                .await
        {
            warn!(job_id = job.id, error = %e, "Failed to persist dead letter");
        }
    }
}
