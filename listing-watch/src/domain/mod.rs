//! Domain types for the listing watch pipeline.
//!
//! Items come in from collectors, rules decide which of them matter, and
//! schedules decide when collection runs.

pub mod item;
pub mod rule;
pub mod schedule;

pub use item::{CollectedItem, parse_price};
pub use rule::{MatchCriteria, MatchLogic, PriceRange, QuickFilter, Rule, TermSet};
pub use schedule::{
    RunOutcome, RunRecord, ScheduleMode, ScheduleSpec, TaskStats, compute_next_run,
};
