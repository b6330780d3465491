//! Routes collected items and run events into the notification queue.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::domain::item::CollectedItem;
use crate::matcher::MatchingEngine;
use crate::notification::dispatcher::Dispatcher;
use crate::notification::events::{EventKind, Message};
use crate::notification::templates;

/// What routing one item produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouteOutcome {
    /// At least one rule or the quick filter matched.
    pub matched: bool,
    pub jobs_enqueued: usize,
}

/// Glue between the matching engine and the dispatcher.
#[derive(Clone)]
pub struct ItemRouter {
    engine: Arc<MatchingEngine>,
    dispatcher: Dispatcher,
}

impl ItemRouter {
    pub fn new(engine: Arc<MatchingEngine>, dispatcher: Dispatcher) -> Self {
        Self { engine, dispatcher }
    }

    pub fn engine(&self) -> &Arc<MatchingEngine> {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Match `item` and queue its notifications.
    ///
    /// Matched items produce one job per distinct target, naming every matched
    /// rule. Targets subscribed to `latest_item` get a job for every item.
    pub fn route(&self, item: &CollectedItem) -> RouteOutcome {
        let outcome = self.engine.match_item(item);
        let mut jobs_enqueued = 0;

        if outcome.is_match() && !outcome.target_ids.is_empty() {
            let message = templates::item_matched(item, &outcome.rule_names);
            jobs_enqueued += self
                .dispatcher
                .notify_targets(outcome.target_ids.iter().map(String::as_str), &message);
        }

        let latest = self.dispatcher.registry().subscribed(EventKind::LatestItem);
        if !latest.is_empty() {
            let message = templates::latest_item(item);
            jobs_enqueued += self
                .dispatcher
                .notify_targets(latest.iter().map(|t| t.id.as_str()), &message);
        }

        if jobs_enqueued > 0 {
            debug!(external_id = %item.external_id, jobs = jobs_enqueued, "Item routed");
        }
        RouteOutcome {
            matched: outcome.is_match(),
            jobs_enqueued,
        }
    }

    /// Queue `message` for every enabled target subscribed to `kind`.
    pub fn notify_event(&self, kind: EventKind, message: &Message) -> usize {
        let targets = self.dispatcher.registry().subscribed(kind);
        if targets.is_empty() {
            return 0;
        }
        self.dispatcher
            .notify_targets(targets.iter().map(|t| t.id.as_str()), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{PriceRange, QuickFilter, Rule};
    use crate::notification::channels::{ChannelConfig, ChannelTarget, WebhookConfig};
    use crate::notification::dispatcher::DispatcherConfig;
    use crate::notification::events::EventSubscriptions;
    use crate::notification::registry::ChannelRegistry;
    use crate::utils::http_client::build_http_client;
    use std::time::Duration;

    fn target(id: &str, events: EventSubscriptions) -> ChannelTarget {
        ChannelTarget::new(
            id,
            ChannelConfig::GenericWebhook(WebhookConfig::new("https://example.com/hook")),
        )
        .with_id(id)
        .with_events(events)
    }

    fn router() -> ItemRouter {
        let timeout = Duration::from_secs(5);
        let registry = Arc::new(ChannelRegistry::new(
            build_http_client(timeout, None).unwrap(),
            timeout,
        ));
        let dispatcher = Dispatcher::new(DispatcherConfig::default(), registry);
        dispatcher
            .register_target(target("rule-target", EventSubscriptions::default()))
            .unwrap();
        dispatcher
            .register_target(target(
                "firehose",
                EventSubscriptions {
                    latest_item: true,
                    run_failed: true,
                    ..Default::default()
                },
            ))
            .unwrap();

        let rule = Rule::new("cheap iPhone")
            .with_include_keywords("iPhone")
            .with_price(PriceRange::at_most(3000.0))
            .with_targets(["rule-target"]);
        let engine = Arc::new(MatchingEngine::new(vec![rule], QuickFilter::default()));
        ItemRouter::new(engine, dispatcher)
    }

    #[test]
    fn test_matched_item_queues_rule_and_latest_jobs() {
        let router = router();
        let outcome = router.route(&CollectedItem::new("1", "iPhone 12 未拆封", "2800"));
        assert_eq!(
            outcome,
            RouteOutcome {
                matched: true,
                jobs_enqueued: 2
            }
        );
        assert_eq!(router.dispatcher().stats().queue_depth, 2);
    }

    #[test]
    fn test_unmatched_item_only_reaches_latest_subscribers() {
        let router = router();
        let outcome = router.route(&CollectedItem::new("2", "iPhone 12", "3500"));
        assert!(!outcome.matched);
        assert_eq!(outcome.jobs_enqueued, 1);
    }

    #[test]
    fn test_notify_event_uses_subscriptions() {
        let router = router();
        assert_eq!(router.notify_event(EventKind::RunFailed, &Message::new("x", "")), 1);
        assert_eq!(router.notify_event(EventKind::RunStarted, &Message::new("x", "")), 0);
    }
}
