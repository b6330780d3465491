//! Repository layer.
//!
//! One trait per aggregate, each with an sqlx-backed implementation. Services
//! hold `Arc<dyn ...Repository>` so tests can swap in fakes.

pub mod notification;
pub mod rule;
pub mod run_record;
pub mod schedule;
pub mod seen_item;

pub use notification::*;
pub use rule::*;
pub use run_record::*;
pub use schedule::*;
pub use seen_item::*;
