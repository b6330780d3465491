//! Notification messages, priorities and the events channels subscribe to.

use serde::{Deserialize, Serialize};

/// Priority level for notifications.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NotificationPriority {
    /// Informational only.
    Low,
    #[default]
    Normal,
    /// Failures and other events worth a look.
    High,
    /// Always gets three delivery attempts.
    Urgent,
}

/// Pipeline events a channel target can subscribe to.
///
/// Rule matches are not listed here: a rule names its targets directly.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    RunSucceeded,
    RunFailed,
    /// Every newly collected item, regardless of rules.
    LatestItem,
}

/// Per-target event subscriptions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubscriptions {
    #[serde(default)]
    pub run_started: bool,
    #[serde(default)]
    pub run_succeeded: bool,
    #[serde(default)]
    pub run_failed: bool,
    #[serde(default)]
    pub latest_item: bool,
}

impl EventSubscriptions {
    pub fn all() -> Self {
        Self {
            run_started: true,
            run_succeeded: true,
            run_failed: true,
            latest_item: true,
        }
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::RunStarted => self.run_started,
            EventKind::RunSucceeded => self.run_succeeded,
            EventKind::RunFailed => self.run_failed,
            EventKind::LatestItem => self.latest_item,
        }
    }
}

/// A rendered message, independent of the channel it goes out on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub title: String,
    /// Markdown-flavoured body. Channels without markdown send it as plain text.
    pub body: String,
    pub priority: NotificationPriority,
}

impl Message {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: NotificationPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Fixed message sent by the "test channel" admin action.
    pub fn test() -> Self {
        Self::new(
            "listing-watch test notification",
            "If you can read this, the channel is configured correctly.",
        )
        .with_priority(NotificationPriority::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_priority_ordering() {
        assert!(NotificationPriority::Urgent > NotificationPriority::High);
        assert!(NotificationPriority::High > NotificationPriority::Normal);
        assert_eq!(NotificationPriority::default(), NotificationPriority::Normal);
        assert_eq!(
            "URGENT".parse::<NotificationPriority>().unwrap(),
            NotificationPriority::Urgent
        );
    }

    #[test]
    fn test_subscriptions_cover_every_event() {
        let all = EventSubscriptions::all();
        let none = EventSubscriptions::default();
        for kind in EventKind::iter() {
            assert!(all.contains(kind), "{kind} missing from all()");
            assert!(!none.contains(kind));
        }
    }

    #[test]
    fn test_subscriptions_deserialize_partial() {
        let subs: EventSubscriptions = serde_json::from_str(r#"{"latest_item": true}"#).unwrap();
        assert!(subs.contains(EventKind::LatestItem));
        assert!(!subs.contains(EventKind::RunFailed));
    }
}
