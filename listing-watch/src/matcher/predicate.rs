//! Predicate evaluation shared by rules and the quick filter.

use serde::Serialize;

use crate::domain::item::CollectedItem;
use crate::domain::rule::{MatchCriteria, MatchLogic};

/// One configurable check of a [`MatchCriteria`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::IntoStaticStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Predicate {
    IncludeKeywords,
    ExcludeKeywords,
    PriceRange,
    IncludeLocations,
    ExcludeLocations,
}

/// Outcome of one configured predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PredicateResult {
    pub predicate: Predicate,
    pub passed: bool,
}

/// Evaluate every configured predicate of `criteria` against `item`.
///
/// Unconfigured predicates are omitted, so an empty result means the criteria
/// have nothing to say about any item.
pub fn explain(criteria: &MatchCriteria, item: &CollectedItem) -> Vec<PredicateResult> {
    let mut results = Vec::with_capacity(5);
    let mut push = |predicate, passed| results.push(PredicateResult { predicate, passed });

    if !criteria.include_keywords.is_empty() {
        push(Predicate::IncludeKeywords, criteria.include_keywords.any_in(&item.title));
    }
    if !criteria.exclude_keywords.is_empty() {
        push(Predicate::ExcludeKeywords, !criteria.exclude_keywords.any_in(&item.title));
    }
    if criteria.price.is_configured() {
        // No parsed price, no match.
        let passed = item.price.is_some_and(|price| criteria.price.contains(price));
        push(Predicate::PriceRange, passed);
    }
    if !criteria.include_locations.is_empty() {
        push(Predicate::IncludeLocations, criteria.include_locations.any_in(&item.location));
    }
    if !criteria.exclude_locations.is_empty() {
        push(Predicate::ExcludeLocations, !criteria.exclude_locations.any_in(&item.location));
    }

    results
}

/// Combine the configured predicates with `logic`. No predicates never matches.
pub fn matches(criteria: &MatchCriteria, item: &CollectedItem, logic: MatchLogic) -> bool {
    let results = explain(criteria, item);
    if results.is_empty() {
        return false;
    }
    match logic {
        MatchLogic::And => results.iter().all(|r| r.passed),
        MatchLogic::Or => results.iter().any(|r| r.passed),
    }
}
