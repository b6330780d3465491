//! Seen item model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::datetime_to_ms;
use crate::domain::item::CollectedItem;

/// `seen_item` row: an external id that has already been through the pipeline.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SeenItemDbModel {
    pub external_id: String,
    pub title: String,
    pub source_keyword: String,
    pub first_seen_at: i64,
}

impl From<&CollectedItem> for SeenItemDbModel {
    fn from(item: &CollectedItem) -> Self {
        Self {
            external_id: item.external_id.clone(),
            title: item.title.clone(),
            source_keyword: item.source_keyword.clone(),
            first_seen_at: datetime_to_ms(item.collected_at),
        }
    }
}
