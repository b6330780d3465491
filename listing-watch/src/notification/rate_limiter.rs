//! Per-target admission control.
//!
//! Sliding-window log: each key keeps the instants of its admissions inside
//! the window, so at most `limit` sends fall in any rolling window (60s by
//! default). A key's policy may also demand a minimum spacing between two
//! successive admissions. Old admissions are dropped lazily on access, so no
//! timer task is needed.
//!
//! All state sits behind a synchronous lock that is never held across an
//! `.await`, so every method is cheap and cancel-safe.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::{Error, Result};

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Admission policy for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    /// Admissions allowed in any rolling `window`.
    pub limit: u32,
    pub window: Duration,
    /// Minimum gap between two successive admissions.
    pub min_spacing: Duration,
}

impl RatePolicy {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: DEFAULT_WINDOW,
            min_spacing: Duration::ZERO,
        }
    }

    pub fn with_min_spacing(mut self, min_spacing: Duration) -> Self {
        self.min_spacing = min_spacing;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    admitted: HashMap<String, VecDeque<Instant>>,
    policies: HashMap<String, RatePolicy>,
}

impl State {
    fn policy(&self, key: &str, default: RatePolicy) -> RatePolicy {
        self.policies.get(key).copied().unwrap_or(default)
    }
}

/// Sliding-window rate limiter keyed by target id.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
    default_policy: RatePolicy,
}

impl RateLimiter {
    pub fn new(default_limit: u32) -> Self {
        Self::with_policy(RatePolicy::per_minute(default_limit))
    }

    pub fn with_window(default_limit: u32, window: Duration) -> Self {
        Self::with_policy(RatePolicy {
            window,
            ..RatePolicy::per_minute(default_limit)
        })
    }

    pub fn with_policy(default_policy: RatePolicy) -> Self {
        Self {
            state: Mutex::new(State::default()),
            default_policy,
        }
    }

    /// Override the limit for `key`, keeping the rest of its policy.
    pub fn set_limit(&self, key: &str, limit: u32) {
        let mut state = self.state.lock();
        let policy = RatePolicy {
            limit,
            ..state.policy(key, self.default_policy)
        };
        state.policies.insert(key.to_string(), policy);
    }

    /// Replace the whole policy for `key`.
    pub fn set_policy(&self, key: &str, policy: RatePolicy) {
        self.state.lock().policies.insert(key.to_string(), policy);
    }

    pub fn policy(&self, key: &str) -> RatePolicy {
        self.state.lock().policy(key, self.default_policy)
    }

    /// Forget `key` entirely.
    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock();
        state.policies.remove(key);
        state.admitted.remove(key);
    }

    /// Admit one send for `key` if its window has room and the spacing allows.
    ///
    /// A refused call does not consume anything.
    pub fn try_admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let policy = state.policy(key, self.default_policy);
        self.purge_expired(&mut state, now);

        let log = state.admitted.entry(key.to_string()).or_default();
        if log.len() >= policy.limit as usize {
            trace!(key, limit = policy.limit, "Rate limit reached");
            return false;
        }
        if let Some(&last) = log.back() {
            if now.duration_since(last) < policy.min_spacing {
                trace!(key, "Minimum send spacing not reached");
                return false;
            }
        }
        log.push_back(now);
        true
    }

    /// [`try_admit`](Self::try_admit) as a `Result`, carrying the wait on refusal.
    pub fn check(&self, key: &str) -> Result<()> {
        if self.try_admit(key) {
            return Ok(());
        }
        Err(Error::RateLimited {
            key: key.to_string(),
            retry_after: self
                .time_until_reset(key)
                .unwrap_or(self.policy(key).window),
        })
    }

    /// Admissions left in the current rolling window.
    pub fn remaining(&self, key: &str) -> u32 {
        let now = Instant::now();
        let state = self.state.lock();
        let policy = state.policy(key, self.default_policy);
        let used = state
            .admitted
            .get(key)
            .map_or(0, |log| in_window(log, now, policy.window).count());
        policy.limit.saturating_sub(u32::try_from(used).unwrap_or(u32::MAX))
    }

    /// How long until `key` can be admitted again, or `None` if it can be now.
    pub fn time_until_reset(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let state = self.state.lock();
        let policy = state.policy(key, self.default_policy);
        let log = state.admitted.get(key)?;
        let live: Vec<Instant> = in_window(log, now, policy.window).collect();

        let mut wait = Duration::ZERO;
        if live.len() >= policy.limit as usize {
            // The slot frees when the admission `limit` places back leaves.
            let index = live.len() - policy.limit as usize;
            if let Some(&oldest) = live.get(index) {
                wait = wait.max((oldest + policy.window).saturating_duration_since(now));
            }
        }
        if let Some(&last) = live.last() {
            wait = wait.max((last + policy.min_spacing).saturating_duration_since(now));
        }
        (!wait.is_zero()).then_some(wait)
    }

    fn purge_expired(&self, state: &mut State, now: Instant) {
        let State { admitted, policies } = state;
        admitted.retain(|key, log| {
            let window = policies
                .get(key)
                .map_or(self.default_policy.window, |p| p.window);
            while log
                .front()
                .is_some_and(|&at| now.duration_since(at) >= window)
            {
                log.pop_front();
            }
            !log.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.state.lock().admitted.len()
    }
}

fn in_window(
    log: &VecDeque<Instant>,
    now: Instant,
    window: Duration,
) -> impl Iterator<Item = Instant> + '_ {
    log.iter()
        .copied()
        .filter(move |&at| now.duration_since(at) < window)
}
