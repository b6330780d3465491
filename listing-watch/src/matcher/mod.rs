//! Matching engine: decides which collected items are worth a notification.

pub mod engine;
pub mod predicate;

pub use engine::{MatchOutcome, MatchingEngine, RuleSet, RuleTestResult};
pub use predicate::{Predicate, PredicateResult};
