//! Basin repository trait.

use async_trait::async_trait;

use super::error::RepositoryResult;
use crate::api::{Basin, BasinId, BasinPatch, NewBasin};

/// CRUD over watershed polygons.
#[async_trait]
pub trait BasinRepository: Send + Sync {
    /// List basins ordered by id.
    async fn list_basins(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Basin>>;

    async fn get_basin(&self, id: BasinId) -> RepositoryResult<Basin>;

    async fn find_basin_by_code(&self, code: &str) -> RepositoryResult<Option<Basin>>;

    async fn create_basin(&self, basin: &NewBasin) -> RepositoryResult<Basin>;

    async fn update_basin(&self, id: BasinId, patch: &BasinPatch) -> RepositoryResult<Basin>;

    /// Delete a basin and its measurements. Stations keep existing with no basin.
    async fn delete_basin(&self, id: BasinId) -> RepositoryResult<()>;

    async fn upsert_basin_by_code(&self, basin: &NewBasin) -> RepositoryResult<Basin>;

    async fn truncate_basins(&self) -> RepositoryResult<usize>;
}
