//! Listing collection.
//!
//! A [`Collector`] fetches up to `max_pages` result pages for a keyword and
//! honors the stop token between pages, returning what it has so far.

pub mod command;
pub mod dedup;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::item::CollectedItem;
use crate::domain::schedule::ScheduleSpec;

pub use command::{CommandCollector, CommandCollectorConfig};
pub use dedup::DedupCollector;

/// What to collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectRequest {
    pub keyword: String,
    pub max_pages: u32,
    /// Pause between page fetches.
    pub page_delay: Duration,
}

impl CollectRequest {
    pub fn new(keyword: impl Into<String>, max_pages: u32, page_delay: Duration) -> Self {
        Self {
            keyword: keyword.into(),
            max_pages,
            page_delay,
        }
    }
}

impl From<&ScheduleSpec> for CollectRequest {
    fn from(spec: &ScheduleSpec) -> Self {
        Self::new(
            spec.keyword.clone(),
            spec.max_pages,
            Duration::from_secs(spec.page_delay_secs),
        )
    }
}

/// Result of one collection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectBatch {
    pub items: Vec<CollectedItem>,
    /// Items seen on the pages, before any de-duplication.
    pub found: usize,
    pub pages_fetched: u32,
    /// The stop token fired before every page was fetched.
    pub interrupted: bool,
}

impl CollectBatch {
    pub fn new(items: Vec<CollectedItem>, pages_fetched: u32, interrupted: bool) -> Self {
        Self {
            found: items.len(),
            items,
            pages_fetched,
            interrupted,
        }
    }
}

#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch listings for `request`. Checks `stop` between pages.
    async fn collect(&self, request: &CollectRequest, stop: &CancellationToken)
    -> Result<CollectBatch>;
}

/// Sleep for `delay` unless `stop` fires first. Returns `false` when stopped.
pub(crate) async fn pause_between_pages(delay: Duration, stop: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !stop.is_cancelled();
    }
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_request_from_schedule() {
        let spec = ScheduleSpec::interval("phones", "iPhone", ChronoDuration::minutes(10))
            .with_max_pages(2)
            .with_page_delay_secs(5);
        let request = CollectRequest::from(&spec);
        assert_eq!(request.keyword, "iPhone");
        assert_eq!(request.max_pages, 2);
        assert_eq!(request.page_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_interrupted_by_stop() {
        let stop = CancellationToken::new();
        let waiter = tokio::spawn({
            let stop = stop.clone();
            async move { pause_between_pages(Duration::from_secs(30), &stop).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        stop.cancel();
        assert!(!waiter.await.unwrap());
    }
}
