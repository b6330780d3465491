//! Collected marketplace listings.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static NON_NUMERIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\d.]").unwrap());

/// Parse a display price ("¥2,800", "2800元") into a number.
///
/// Every character other than digits and `.` is dropped before parsing.
/// Returns `None` when nothing numeric remains.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned = NON_NUMERIC.replace_all(raw.trim(), "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// A listing returned by the collector.
///
/// `external_id` is unique; the collector drops items it has already seen
/// before they reach the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedItem {
    pub external_id: String,
    pub title: String,
    /// Price as displayed on the listing.
    pub price_text: String,
    /// Parsed numeric price, if the display text contained one.
    pub price: Option<f64>,
    #[serde(default)]
    pub location: String,
    /// Search keyword the collection run was started with.
    #[serde(default)]
    pub source_keyword: String,
    pub collected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_credit: Option<String>,
}

impl CollectedItem {
    /// Create an item, parsing `price_text` once.
    pub fn new(
        external_id: impl Into<String>,
        title: impl Into<String>,
        price_text: impl Into<String>,
    ) -> Self {
        let price_text = price_text.into();
        Self {
            external_id: external_id.into(),
            title: title.into(),
            price: parse_price(&price_text),
            price_text,
            location: String::new(),
            source_keyword: String::new(),
            collected_at: Utc::now(),
            link: None,
            image_url: None,
            seller_credit: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_source_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.source_keyword = keyword.into();
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn with_collected_at(mut self, at: DateTime<Utc>) -> Self {
        self.collected_at = at;
        self
    }
}
