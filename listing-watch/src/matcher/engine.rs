//! Rule matching over an immutable snapshot.
//!
//! Admin edits build a new [`RuleSet`] and swap the `Arc`; a pass that is
//! already running keeps the snapshot it started with.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use super::predicate::{self, PredicateResult};
use crate::Result;
use crate::domain::item::CollectedItem;
use crate::domain::rule::{MatchLogic, QuickFilter, Rule};

/// Rules and the quick filter as seen by one matching pass.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
    pub quick_filter: QuickFilter,
}

/// Which rules matched an item and where to notify.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub rule_ids: Vec<String>,
    /// Rule names in match order; the quick filter appears as [`QuickFilter::NAME`].
    pub rule_names: Vec<String>,
    pub quick_filter_matched: bool,
    /// Union of the matched rules' targets, first occurrence wins.
    pub target_ids: Vec<String>,
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        !self.rule_names.is_empty()
    }

    fn add(&mut self, name: &str, targets: &[String], seen: &mut HashSet<String>) {
        self.rule_names.push(name.to_string());
        for target in targets {
            if seen.insert(target.clone()) {
                self.target_ids.push(target.clone());
            }
        }
    }
}

/// Per-predicate detail returned by [`MatchingEngine::test_rule`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleTestResult {
    pub matched: bool,
    pub predicates: Vec<PredicateResult>,
}

/// Evaluates collected items against the current rule snapshot.
#[derive(Debug, Default)]
pub struct MatchingEngine {
    snapshot: RwLock<Arc<RuleSet>>,
}

impl MatchingEngine {
    pub fn new(rules: Vec<Rule>, quick_filter: QuickFilter) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(RuleSet {
                rules,
                quick_filter,
            })),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RuleSet> {
        self.snapshot.read().clone()
    }

    /// Whether `rule` matches `item`. Disabled rules are evaluated as written.
    pub fn evaluate(item: &CollectedItem, rule: &Rule) -> bool {
        predicate::matches(&rule.criteria, item, rule.match_logic)
    }

    /// Evaluate a rule that may not be saved yet, with per-predicate detail.
    pub fn test_rule(rule: &Rule, item: &CollectedItem) -> RuleTestResult {
        RuleTestResult {
            matched: Self::evaluate(item, rule),
            predicates: predicate::explain(&rule.criteria, item),
        }
    }

    /// Match `item` against every enabled rule and the quick filter.
    pub fn match_item(&self, item: &CollectedItem) -> MatchOutcome {
        let snapshot = self.snapshot();
        let mut outcome = MatchOutcome::default();
        let mut seen = HashSet::new();

        for rule in snapshot.rules.iter().filter(|r| r.enabled) {
            if Self::evaluate(item, rule) {
                outcome.rule_ids.push(rule.id.clone());
                outcome.add(&rule.name, &rule.target_ids, &mut seen);
            }
        }

        let quick = &snapshot.quick_filter;
        if quick.enabled && predicate::matches(&quick.criteria, item, MatchLogic::And) {
            outcome.quick_filter_matched = true;
            outcome.add(QuickFilter::NAME, &quick.target_ids, &mut seen);
        }

        if outcome.is_match() {
            debug!(
                external_id = %item.external_id,
                rules = ?outcome.rule_names,
                targets = outcome.target_ids.len(),
                "Item matched"
            );
        }
        outcome
    }

    /// Target ids triggered by `item`, deduplicated.
    pub fn run(&self, item: &CollectedItem) -> Vec<String> {
        self.match_item(item).target_ids
    }

    /// Replace the whole rule list.
    pub fn replace_rules(&self, rules: Vec<Rule>) {
        self.update(|set| set.rules = rules);
    }

    /// Insert or replace the rule with `rule.id`.
    pub fn upsert_rule(&self, rule: Rule) -> Result<()> {
        rule.validate()?;
        self.update(|set| match set.rules.iter().position(|r| r.id == rule.id) {
            Some(i) => set.rules[i] = rule,
            None => set.rules.push(rule),
        });
        Ok(())
    }

    /// Returns whether a rule was removed.
    pub fn remove_rule(&self, id: &str) -> bool {
        let mut removed = false;
        self.update(|set| {
            let before = set.rules.len();
            set.rules.retain(|r| r.id != id);
            removed = set.rules.len() != before;
        });
        removed
    }

    pub fn set_quick_filter(&self, quick_filter: QuickFilter) -> Result<()> {
        quick_filter.validate()?;
        self.update(|set| set.quick_filter = quick_filter);
        Ok(())
    }

    fn update(&self, edit: impl FnOnce(&mut RuleSet)) {
        let mut guard = self.snapshot.write();
        let mut next = RuleSet::clone(&guard);
        edit(&mut next);
        info!(
            rules = next.rules.len(),
            enabled = next.rules.iter().filter(|r| r.enabled).count(),
            quick_filter = next.quick_filter.enabled,
            "Rule snapshot updated"
        );
        *guard = Arc::new(next);
    }
}
