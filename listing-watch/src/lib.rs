//! listing-watch library crate.
//!
//! Scheduled marketplace collection, rule matching and rate-limited
//! notification delivery. The binary in `main.rs` wires these together
//! through [`services::ServiceContainer`].

pub mod collector;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod logging;
pub mod matcher;
pub mod notification;
pub mod scheduler;
pub mod services;
pub mod utils;

pub use error::{Error, Result};
