//! Built-in message templates.
//!
//! Templates use `{name}` placeholders. Unknown placeholders are left as-is so
//! a typo shows up in the delivered message instead of silently vanishing.

use chrono::{DateTime, Local, Utc};

use super::events::{Message, NotificationPriority};
use crate::domain::{CollectedItem, RunRecord, ScheduleSpec};

/// A title/body pair with placeholders.
#[derive(Debug, Clone, Copy)]
pub struct MessageTemplate {
    pub name: &'static str,
    pub title: &'static str,
    pub body: &'static str,
    pub priority: NotificationPriority,
}

impl MessageTemplate {
    /// Substitute `vars` into title and body.
    pub fn render(&self, vars: &[(&str, String)]) -> Message {
        Message::new(substitute(self.title, vars), substitute(self.body, vars))
            .with_priority(self.priority)
    }
}

fn substitute(template: &str, vars: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

pub const RUN_STARTED: MessageTemplate = MessageTemplate {
    name: "run_started",
    title: "🚀 Collection started: {task_name}",
    body: "**Keyword:** {keyword}\n**Pages:** {max_pages}\n**Page delay:** {page_delay}s\n**Started:** {started_at}",
    priority: NotificationPriority::Low,
};

pub const RUN_SUCCEEDED: MessageTemplate = MessageTemplate {
    name: "run_succeeded",
    title: "✅ Collection finished: {task_name}",
    body: "**Keyword:** {keyword}\n**Items found:** {items_found}\n**New items:** {items_new}\n**Matched:** {items_matched}\n**Duration:** {duration}s",
    priority: NotificationPriority::Normal,
};

pub const RUN_FAILED: MessageTemplate = MessageTemplate {
    name: "run_failed",
    title: "❌ Collection failed: {task_name}",
    body: "**Keyword:** {keyword}\n**Error:** {error}\n**Duration:** {duration}s",
    priority: NotificationPriority::High,
};

pub const RUN_STOPPED: MessageTemplate = MessageTemplate {
    name: "run_stopped",
    title: "⏹ Collection stopped: {task_name}",
    body: "**Keyword:** {keyword}\n**Items found before stop:** {items_found}",
    priority: NotificationPriority::Normal,
};

pub const ITEM_MATCHED: MessageTemplate = MessageTemplate {
    name: "item_matched",
    title: "🎯 Listing matched: {title}",
    body: "**Title:** {title}\n**Price:** {price}\n**Location:** {location}\n**Seller credit:** {seller_credit}\n**Keyword:** {keyword}\n\n**Matched rules:** {rules}\n\n**Link:** {link}\n\n---\n⏰ Found at {found_at}",
    priority: NotificationPriority::Normal,
};

pub const LATEST_ITEM: MessageTemplate = MessageTemplate {
    name: "latest_item",
    title: "🆕 New listing: {title}",
    body: "**Title:** {title}\n**Price:** {price}\n**Location:** {location}\n**Keyword:** {keyword}\n\n**Link:** {link}\n\n---\n⏰ Found at {found_at}",
    priority: NotificationPriority::Low,
};

/// All built-in templates, for listing in admin views.
pub const BUILTIN: [MessageTemplate; 6] = [
    RUN_STARTED,
    RUN_SUCCEEDED,
    RUN_FAILED,
    RUN_STOPPED,
    ITEM_MATCHED,
    LATEST_ITEM,
];

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn or_unknown(value: &str) -> String {
    if value.trim().is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}

fn item_vars(item: &CollectedItem) -> Vec<(&'static str, String)> {
    vec![
        ("title", or_unknown(&item.title)),
        ("price", or_unknown(&item.price_text)),
        ("location", or_unknown(&item.location)),
        (
            "seller_credit",
            or_unknown(item.seller_credit.as_deref().unwrap_or_default()),
        ),
        ("keyword", or_unknown(&item.source_keyword)),
        ("link", item.link.clone().unwrap_or_else(|| "none".to_string())),
        ("found_at", local_time(item.collected_at)),
    ]
}

fn run_vars(spec: &ScheduleSpec, run: &RunRecord) -> Vec<(&'static str, String)> {
    vec![
        ("task_name", spec.name.clone()),
        ("keyword", spec.keyword.clone()),
        ("items_found", run.items_found.to_string()),
        ("items_new", run.items_new.to_string()),
        ("items_matched", run.items_matched.to_string()),
        ("duration", run.duration().num_seconds().to_string()),
        ("error", run.error.clone().unwrap_or_default()),
    ]
}

pub fn run_started(spec: &ScheduleSpec, started_at: DateTime<Utc>) -> Message {
    RUN_STARTED.render(&[
        ("task_name", spec.name.clone()),
        ("keyword", spec.keyword.clone()),
        ("max_pages", spec.max_pages.to_string()),
        ("page_delay", spec.page_delay_secs.to_string()),
        ("started_at", local_time(started_at)),
    ])
}

/// Message for a finished run, picked by its outcome.
pub fn run_finished(spec: &ScheduleSpec, run: &RunRecord) -> Message {
    use crate::domain::RunOutcome;

    let template = match run.outcome {
        RunOutcome::Success => RUN_SUCCEEDED,
        RunOutcome::Failure => RUN_FAILED,
        RunOutcome::Stopped => RUN_STOPPED,
    };
    template.render(&run_vars(spec, run))
}

pub fn item_matched(item: &CollectedItem, rule_names: &[String]) -> Message {
    let mut vars = item_vars(item);
    vars.push(("rules", rule_names.join(", ")));
    ITEM_MATCHED.render(&vars)
}

pub fn latest_item(item: &CollectedItem) -> Message {
    LATEST_ITEM.render(&item_vars(item))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunOutcome;

    #[test]
    fn test_substitute_leaves_unknown_placeholders() {
        let out = substitute("{a} and {b}", &[("a", "x".to_string())]);
        assert_eq!(out, "x and {b}");
    }

    #[test]
    fn test_item_matched_lists_rules() {
        let item = CollectedItem::new("1", "iPhone 12 未拆封", "¥2800")
            .with_location("上海")
            .with_link("https://example.com/item/1");
        let msg = item_matched(&item, &["cheap phones".to_string(), "Quick filter".to_string()]);

        assert_eq!(msg.title, "🎯 Listing matched: iPhone 12 未拆封");
        assert!(msg.body.contains("**Price:** ¥2800"));
        assert!(msg.body.contains("cheap phones, Quick filter"));
        assert!(msg.body.contains("https://example.com/item/1"));
        assert!(msg.body.contains("**Seller credit:** unknown"));
        assert!(!msg.body.contains('{'));
    }

    #[test]
    fn test_run_finished_picks_template_by_outcome() {
        let spec = ScheduleSpec::interval("nightly", "switch", chrono::Duration::hours(1));
        let now = Utc::now();
        let mut run = RunRecord {
            id: "r".into(),
            task_id: spec.id.clone(),
            started_at: now,
            finished_at: now,
            outcome: RunOutcome::Failure,
            items_found: 0,
            items_new: 0,
            items_matched: 0,
            jobs_enqueued: 0,
            error: Some("timeout".into()),
        };

        let failed = run_finished(&spec, &run);
        assert_eq!(failed.priority, NotificationPriority::High);
        assert!(failed.body.contains("timeout"));

        run.outcome = RunOutcome::Success;
        let ok = run_finished(&spec, &run);
        assert!(ok.title.starts_with("✅"));
    }

    #[test]
    fn test_builtin_names_unique() {
        let mut names: Vec<_> = BUILTIN.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), BUILTIN.len());
    }
}
