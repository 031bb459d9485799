//! Repository trait definitions for database operations.
//!
//! Persistence is split across focused traits so each storage backend can be
//! implemented and tested one concern at a time.
//!
//! # Module Organization
//!
//! - [`error`]: Error types for repository operations
//! - [`station`]: Stations and the health check
//! - [`basin`]: Watershed polygons
//! - [`reference`]: Variables, sources and runs
//! - [`measurement`]: Time-series facts
//! - [`ingestion`]: Ingestion history rows
//!
//! # Convenience Trait Bound
//!
//! Services that need every capability take a [`FullRepository`]:
//!
//! ```ignore
//! async fn purge<R: FullRepository + ?Sized>(repo: &R, id: StationId) -> RepositoryResult<()> {
//!     repo.delete_station(id).await
//! }
//! ```

pub mod basin;
pub mod error;
pub mod ingestion;
pub mod measurement;
pub mod reference;
pub mod station;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};

pub use basin::BasinRepository;
pub use ingestion::IngestionRepository;
pub use measurement::MeasurementRepository;
pub use reference::ReferenceRepository;
pub use station::StationRepository;

/// Composite trait bound for a complete repository implementation.
pub trait FullRepository:
    StationRepository
    + BasinRepository
    + ReferenceRepository
    + MeasurementRepository
    + IngestionRepository
{
}

// Blanket implementation: any type implementing all five traits is a FullRepository
impl<T> FullRepository for T where
    T: StationRepository
        + BasinRepository
        + ReferenceRepository
        + MeasurementRepository
        + IngestionRepository
{
}
