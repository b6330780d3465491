//! Drops listings that earlier runs already processed.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CollectBatch, CollectRequest, Collector};
use crate::Result;
use crate::database::repositories::SeenItemRepository;

/// Wraps a collector and filters its items through the seen-item history.
///
/// Each new item is marked seen as it passes, and duplicates inside one batch
/// are dropped too. An item whose seen-mark cannot be written is kept as new.
pub struct DedupCollector {
    inner: Arc<dyn Collector>,
    seen: Arc<dyn SeenItemRepository>,
}

impl DedupCollector {
    pub fn new(inner: Arc<dyn Collector>, seen: Arc<dyn SeenItemRepository>) -> Self {
        Self { inner, seen }
    }
}

#[async_trait]
impl Collector for DedupCollector {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn collect(
        &self,
        request: &CollectRequest,
        stop: &CancellationToken,
    ) -> Result<CollectBatch> {
        let mut batch = self.inner.collect(request, stop).await?;
        let found = batch.found;

        let mut fresh = Vec::with_capacity(batch.items.len());
        let mut in_batch = HashSet::new();
        let mut unrecorded = 0usize;
        for item in batch.items.drain(..) {
            if !in_batch.insert(item.external_id.clone()) {
                continue;
            }
            match self.seen.mark_seen(&item).await {
                Ok(true) => fresh.push(item),
                Ok(false) => {}
                Err(e) => {
                    warn!(external_id = %item.external_id, error = %e, "Failed to record seen item, keeping it");
                    unrecorded += 1;
                    fresh.push(item);
                }
            }
        }

        debug!(
            keyword = %request.keyword,
            found,
            new = fresh.len(),
            unrecorded,
            "De-duplicated collected items"
        );
        batch.items = fresh;
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::item::CollectedItem;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::time::Duration;

    struct FixedCollector(Vec<CollectedItem>);

    #[async_trait]
    impl Collector for FixedCollector {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn collect(&self, _: &CollectRequest, _: &CancellationToken) -> Result<CollectBatch> {
            Ok(CollectBatch::new(self.0.clone(), 1, false))
        }
    }

    #[derive(Default)]
    struct MemorySeen(Mutex<HashSet<String>>);

    #[async_trait]
    impl SeenItemRepository for MemorySeen {
        async fn seen(&self, external_id: &str) -> Result<bool> {
            Ok(self.0.lock().contains(external_id))
        }

        async fn mark_seen(&self, item: &CollectedItem) -> Result<bool> {
            Ok(self.0.lock().insert(item.external_id.clone()))
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.0.lock().len() as i64)
        }

        async fn purge_older_than(&self, _: i64) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_drops_seen_and_in_batch_duplicates() {
        let items = vec![
            CollectedItem::new("a", "first", "1"),
            CollectedItem::new("b", "second", "2"),
            CollectedItem::new("a", "first again", "1"),
        ];
        let seen = Arc::new(MemorySeen::default());
        let collector = DedupCollector::new(Arc::new(FixedCollector(items)), seen.clone());
        let request = CollectRequest::new("k", 1, Duration::ZERO);
        let stop = CancellationToken::new();

        let batch = collector.collect(&request, &stop).await.unwrap();
        assert_eq!(batch.found, 3);
        let ids: Vec<_> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let again = collector.collect(&request, &stop).await.unwrap();
        assert_eq!(again.found, 3);
        assert!(again.items.is_empty());
        assert!(seen.seen("b").await.unwrap());
    }

    /// Fails every `mark_seen` after the first.
    #[derive(Default)]
    struct FlakySeen {
        inner: MemorySeen,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl SeenItemRepository for FlakySeen {
        async fn seen(&self, external_id: &str) -> Result<bool> {
            self.inner.seen(external_id).await
        }

        async fn mark_seen(&self, item: &CollectedItem) -> Result<bool> {
            let call = {
                let mut calls = self.calls.lock();
                *calls += 1;
                *calls
            };
            if call >= 2 {
                return Err(crate::Error::Other("database is locked".into()));
            }
            self.inner.mark_seen(item).await
        }

        async fn count(&self) -> Result<i64> {
            self.inner.count().await
        }

        async fn purge_older_than(&self, _: i64) -> Result<u64> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_seen_write_failure_keeps_items() {
        let items = vec![
            CollectedItem::new("a", "first", "1"),
            CollectedItem::new("b", "second", "2"),
            CollectedItem::new("c", "third", "3"),
            CollectedItem::new("b", "second again", "2"),
        ];
        let seen = Arc::new(FlakySeen::default());
        let collector = DedupCollector::new(Arc::new(FixedCollector(items)), seen.clone());
        let request = CollectRequest::new("k", 1, Duration::ZERO);

        let batch = collector
            .collect(&request, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<_> = batch.items.iter().map(|i| i.external_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(seen.seen("a").await.unwrap());
        assert!(!seen.seen("b").await.unwrap());
    }
}
