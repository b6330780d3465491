//! Service layer.
//!
//! [`ServiceContainer`] builds and owns every long-lived service;
//! [`ItemRouter`] connects the matching engine to the dispatcher.

pub mod container;
pub mod router;

pub use container::{ServiceContainer, ServiceStats};
pub use router::{ItemRouter, RouteOutcome};
