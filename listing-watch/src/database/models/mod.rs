//! Row models for the SQLite schema.
//!
//! Each model maps one table. List and config columns are JSON text and are
//! parsed once when a row is turned into its domain type.

pub mod item;
pub mod notification;
pub mod rule;
pub mod schedule;

pub use item::*;
pub use notification::*;
pub use rule::*;
pub use schedule::*;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::validation(format!("malformed JSON in column {column}: {e}")))
}
