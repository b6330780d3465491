//! Notification delivery.
//!
//! Jobs are queued on the [`Dispatcher`], which delivers them through the
//! [`ChannelRegistry`] adapters with per-target rate limits and exponential
//! backoff. Jobs that exhaust their attempts end up as dead letters.
//!
//! # Features
//!
//! - DingTalk, Feishu, WeChat Work, email and generic webhook channels
//! - Fixed-window rate limiting per target
//! - Retry with exponential backoff, driven by the drain loop
//! - Dead letter list for failed notifications
//! - Built-in templates for run lifecycle and item events

pub mod channels;
pub mod dispatcher;
pub mod events;
pub mod rate_limiter;
pub mod registry;
pub mod templates;

pub use channels::{ChannelConfig, ChannelKind, ChannelTarget, NotificationChannel};
pub use dispatcher::{
    DeadLetter, DispatchStats, Dispatcher, DispatcherConfig, NotificationJob, TargetStats,
};
pub use events::{EventKind, EventSubscriptions, Message, NotificationPriority};
pub use rate_limiter::{RatePolicy, RateLimiter};
pub use registry::ChannelRegistry;
