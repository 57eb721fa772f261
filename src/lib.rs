// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod anchor;
pub mod api;
pub mod bootstrap;
pub mod change_detector;
pub mod config;
pub mod ingest;
pub mod metrics;
pub mod reconcile;
pub mod store;

pub use crate::api::router;
pub use crate::bootstrap::Pipeline;
