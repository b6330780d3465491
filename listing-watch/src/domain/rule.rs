//! Match rules and the quick filter.
//!
//! Keyword and location lists arrive as comma-separated text from the admin
//! surface. They are parsed into [`TermSet`]s once, on load, so evaluation
//! never re-splits strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a rule combines its configured predicates.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum MatchLogic {
    #[default]
    And,
    Or,
}

/// A set of case-insensitive terms.
///
/// Keeps the terms as entered for display and a lowercased copy for matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TermSet {
    terms: Vec<String>,
    folded: Vec<String>,
}

impl TermSet {
    /// Parse a comma-separated list. Both `,` and `，` separate terms; blanks are skipped.
    pub fn parse(list: &str) -> Self {
        Self::from_terms(list.split([',', '，']))
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for term in terms {
            let term = term.as_ref().trim();
            if term.is_empty() {
                continue;
            }
            let folded = term.to_lowercase();
            if set.folded.contains(&folded) {
                continue;
            }
            set.terms.push(term.to_string());
            set.folded.push(folded);
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// Whether any term occurs in `haystack`, ignoring case.
    pub fn any_in(&self, haystack: &str) -> bool {
        let haystack = haystack.to_lowercase();
        self.folded.iter().any(|term| haystack.contains(term.as_str()))
    }

    /// Terms joined back into the comma-separated admin form.
    pub fn to_list_string(&self) -> String {
        self.terms.join(",")
    }
}

impl From<Vec<String>> for TermSet {
    fn from(terms: Vec<String>) -> Self {
        Self::from_terms(terms)
    }
}

impl From<TermSet> for Vec<String> {
    fn from(set: TermSet) -> Self {
        set.terms
    }
}

/// Inclusive price bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl PriceRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub fn at_most(max: f64) -> Self {
        Self::new(None, Some(max))
    }

    /// A range is a predicate only when at least one bound is set.
    pub fn is_configured(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    pub fn contains(&self, price: f64) -> bool {
        self.min.is_none_or(|min| price >= min) && self.max.is_none_or(|max| price <= max)
    }

    fn validate(&self) -> Result<()> {
        for bound in [self.min, self.max].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(Error::validation(format!(
                    "price bound must be a non-negative number, got {bound}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min, self.max)
            && min > max
        {
            return Err(Error::validation(format!(
                "price_min ({min}) is greater than price_max ({max})"
            )));
        }
        Ok(())
    }
}

/// The predicate inputs shared by rules and the quick filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    #[serde(default)]
    pub include_keywords: TermSet,
    #[serde(default)]
    pub exclude_keywords: TermSet,
    #[serde(default)]
    pub price: PriceRange,
    #[serde(default)]
    pub include_locations: TermSet,
    #[serde(default)]
    pub exclude_locations: TermSet,
}

impl MatchCriteria {
    /// True when no predicate is configured. Such criteria never match.
    pub fn is_empty(&self) -> bool {
        self.include_keywords.is_empty()
            && self.exclude_keywords.is_empty()
            && !self.price.is_configured()
            && self.include_locations.is_empty()
            && self.exclude_locations.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        self.price.validate()
    }
}

/// A user-defined match rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(flatten)]
    pub criteria: MatchCriteria,
    #[serde(default)]
    pub match_logic: MatchLogic,
    /// Ids of the channel targets notified on a match.
    #[serde(default)]
    pub target_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: None,
            enabled: true,
            criteria: MatchCriteria::default(),
            match_logic: MatchLogic::And,
            target_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_include_keywords(mut self, list: &str) -> Self {
        self.criteria.include_keywords = TermSet::parse(list);
        self
    }

    pub fn with_exclude_keywords(mut self, list: &str) -> Self {
        self.criteria.exclude_keywords = TermSet::parse(list);
        self
    }

    pub fn with_price(mut self, price: PriceRange) -> Self {
        self.criteria.price = price;
        self
    }

    pub fn with_include_locations(mut self, list: &str) -> Self {
        self.criteria.include_locations = TermSet::parse(list);
        self
    }

    pub fn with_exclude_locations(mut self, list: &str) -> Self {
        self.criteria.exclude_locations = TermSet::parse(list);
        self
    }

    pub fn with_logic(mut self, logic: MatchLogic) -> Self {
        self.match_logic = logic;
        self
    }

    pub fn with_targets<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("rule name must not be empty"));
        }
        self.criteria.validate()
    }
}

/// The single global shortcut rule.
///
/// Always AND-combined; when enabled its targets are OR'd into every match pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuickFilter {
    pub enabled: bool,
    #[serde(flatten)]
    pub criteria: MatchCriteria,
    #[serde(default)]
    pub target_ids: Vec<String>,
}

impl QuickFilter {
    /// Display name used in notification bodies.
    pub const NAME: &'static str = "Quick filter";

    pub fn validate(&self) -> Result<()> {
        self.criteria.validate()
    }
}
