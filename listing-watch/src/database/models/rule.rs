//! Match rule and quick filter models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{from_json, to_json};
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::domain::rule::{MatchCriteria, MatchLogic, PriceRange, QuickFilter, Rule};
use crate::{Error, Result};

/// `match_rule` row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MatchRuleDbModel {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// JSON array
    pub include_keywords: String,
    /// JSON array
    pub exclude_keywords: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// JSON array
    pub include_locations: String,
    /// JSON array
    pub exclude_locations: String,
    /// `AND` or `OR`
    pub match_logic: String,
    /// JSON array of channel target ids
    pub target_ids: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MatchRuleDbModel {
    pub fn from_domain(rule: &Rule) -> Result<Self> {
        let c = &rule.criteria;
        Ok(Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            description: rule.description.clone(),
            enabled: rule.enabled,
            include_keywords: to_json(&c.include_keywords)?,
            exclude_keywords: to_json(&c.exclude_keywords)?,
            min_price: c.price.min,
            max_price: c.price.max,
            include_locations: to_json(&c.include_locations)?,
            exclude_locations: to_json(&c.exclude_locations)?,
            match_logic: rule.match_logic.to_string(),
            target_ids: to_json(&rule.target_ids)?,
            created_at: datetime_to_ms(rule.created_at),
            updated_at: datetime_to_ms(rule.updated_at),
        })
    }

    pub fn into_domain(self) -> Result<Rule> {
        let match_logic: MatchLogic = self
            .match_logic
            .parse()
            .map_err(|_| Error::validation(format!("unknown match logic {:?}", self.match_logic)))?;
        Ok(Rule {
            id: self.id,
            name: self.name,
            description: self.description,
            enabled: self.enabled,
            criteria: MatchCriteria {
                include_keywords: from_json("include_keywords", &self.include_keywords)?,
                exclude_keywords: from_json("exclude_keywords", &self.exclude_keywords)?,
                price: PriceRange::new(self.min_price, self.max_price),
                include_locations: from_json("include_locations", &self.include_locations)?,
                exclude_locations: from_json("exclude_locations", &self.exclude_locations)?,
            },
            match_logic,
            target_ids: from_json("target_ids", &self.target_ids)?,
            created_at: ms_to_datetime(self.created_at),
            updated_at: ms_to_datetime(self.updated_at),
        })
    }
}

/// `quick_filter` row. The table holds at most one row, `id = 1`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuickFilterDbModel {
    pub id: i64,
    pub enabled: bool,
    pub include_keywords: String,
    pub exclude_keywords: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub include_locations: String,
    pub exclude_locations: String,
    pub target_ids: String,
    pub updated_at: i64,
}

impl QuickFilterDbModel {
    pub const ROW_ID: i64 = 1;

    pub fn from_domain(filter: &QuickFilter) -> Result<Self> {
        let c = &filter.criteria;
        Ok(Self {
            id: Self::ROW_ID,
            enabled: filter.enabled,
            include_keywords: to_json(&c.include_keywords)?,
            exclude_keywords: to_json(&c.exclude_keywords)?,
            min_price: c.price.min,
            max_price: c.price.max,
            include_locations: to_json(&c.include_locations)?,
            exclude_locations: to_json(&c.exclude_locations)?,
            target_ids: to_json(&filter.target_ids)?,
            updated_at: now_ms(),
        })
    }

    pub fn into_domain(self) -> Result<QuickFilter> {
        Ok(QuickFilter {
            enabled: self.enabled,
            criteria: MatchCriteria {
                include_keywords: from_json("include_keywords", &self.include_keywords)?,
                exclude_keywords: from_json("exclude_keywords", &self.exclude_keywords)?,
                price: PriceRange::new(self.min_price, self.max_price),
                include_locations: from_json("include_locations", &self.include_locations)?,
                exclude_locations: from_json("exclude_locations", &self.exclude_locations)?,
            },
            target_ids: from_json("target_ids", &self.target_ids)?,
        })
    }
}
