//! Service layer for business logic and orchestration.
//!
//! Services sit between the repositories and the HTTP handlers: they read
//! uploaded files, compute the dashboard indicators and drive the imports.
//! Every function is generic over [`FullRepository`] so it runs unchanged
//! against Postgres and the in-memory repository.
//!
//! [`FullRepository`]: crate::db::repository::FullRepository

pub mod availability;
pub mod error;
pub mod geo_import;
pub mod ingestion;
pub mod job_tracker;
pub mod kpi;
pub mod measurements;
pub mod tabular;
pub mod templates;
pub mod timeseries;

pub use error::{ImportError, ImportResult};
pub use job_tracker::JobTracker;
