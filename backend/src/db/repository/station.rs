//! Station repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{NewStation, Station, StationId, StationPatch};

/// CRUD over monitored points (gauges, rain posts, dams).
///
/// # Thread Safety
/// Implementations must be `Send + Sync` to work with async Rust.
#[async_trait]
pub trait StationRepository: Send + Sync {
    // ==================== Health & Connection ====================

    /// Check if the storage backend is reachable.
    ///
    /// # Returns
    /// - `Ok(true)` if connection is healthy
    /// - `Ok(false)` if connection is unhealthy but no error occurred
    /// - `Err(RepositoryError)` if an error occurred during the check
    async fn health_check(&self) -> RepositoryResult<bool>;

    // ==================== Station Operations ====================

    /// List stations ordered by id.
    ///
    /// # Arguments
    /// * `skip` - Number of rows to skip
    /// * `limit` - Maximum number of rows to return
    async fn list_stations(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Station>>;

    /// Get a station by id.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the station doesn't exist
    async fn get_station(&self, id: StationId) -> RepositoryResult<Station>;

    /// Find a station by its unique code.
    async fn find_station_by_code(&self, code: &str) -> RepositoryResult<Option<Station>>;

    /// Insert a new station. The type defaults to "Station hydrologique".
    async fn create_station(&self, station: &NewStation) -> RepositoryResult<Station>;

    /// Apply a partial update.
    ///
    /// # Returns
    /// * `Err(RepositoryError::NotFound)` - If the station doesn't exist
    async fn update_station(
        &self,
        id: StationId,
        patch: &StationPatch,
    ) -> RepositoryResult<Station>;

    /// Delete a station and every measurement attached to it.
    async fn delete_station(&self, id: StationId) -> RepositoryResult<()>;

    /// Insert the station, or update the one already holding its code.
    async fn upsert_station_by_code(&self, station: &NewStation) -> RepositoryResult<Station>;

    /// Delete every station (and their measurements). Returns the number removed.
    async fn truncate_stations(&self) -> RepositoryResult<usize>;
}
