//! High-level database service layer.
//!
//! Repository-agnostic operations carrying the administration rules that must
//! hold whatever the storage backend: which entity kinds exist, which fields a
//! new station needs, what an empty update means.
//!
//! # Usage
//!
//! ```no_run
//! use hydro_sentinel::api::EntityKind;
//! use hydro_sentinel::db::{services, repositories::LocalRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = LocalRepository::new();
//!     let stations = services::list_entities(&repo, EntityKind::Station).await?;
//!     println!("Found {} stations", stations.len());
//!     Ok(())
//! }
//! ```

use log::info;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::repository::{FullRepository, RepositoryError, RepositoryResult};
use crate::api::{
    BasinId, BasinPatch, EntityKind, EntityRef, NewBasin, NewStation, StationId, StationPatch,
    STATION_TYPE_HYDRO,
};

/// Maximum rows returned by the administration listing.
pub const ADMIN_LIST_LIMIT: usize = 500;

const COORDINATES_REQUIRED: &str = "Latitude and Longitude are required for new stations";

// ==================== Health & Connection ====================

/// Check if the database connection is healthy.
pub async fn health_check<R: FullRepository + ?Sized>(repo: &R) -> RepositoryResult<bool> {
    repo.health_check().await
}

// ==================== Entity Administration ====================

/// Body of create and update requests for stations and basins.
///
/// Stations ignore the basin-only fields and vice versa.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPayload {
    pub code: Option<String>,
    pub name: Option<String>,
    #[serde(alias = "type")]
    pub station_type: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Absent leaves the basin as is, `null` detaches the station.
    #[serde(default, deserialize_with = "present")]
    pub basin_id: Option<Option<i64>>,
    pub active: Option<bool>,
    pub level: Option<i32>,
    pub parent_basin_id: Option<i64>,
    pub color: Option<String>,
    pub geometry: Option<Value>,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn required(field: Option<&String>, name: &str) -> RepositoryResult<String> {
    field
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| RepositoryError::validation(format!("Field '{}' is required", name)))
}

/// List up to [`ADMIN_LIST_LIMIT`] stations or basins as JSON objects.
pub async fn list_entities<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
) -> RepositoryResult<Vec<Value>> {
    let values = match kind {
        EntityKind::Station => repo
            .list_stations(0, ADMIN_LIST_LIMIT)
            .await?
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>(),
        EntityKind::Basin => repo
            .list_basins(0, ADMIN_LIST_LIMIT)
            .await?
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>(),
    };
    values.map_err(|e| RepositoryError::internal(e.to_string()))
}

/// Create a station or basin. New stations must carry coordinates.
pub async fn create_entity<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
    payload: &EntityPayload,
) -> RepositoryResult<Value> {
    let code = required(payload.code.as_ref(), "code")?;
    let name = required(payload.name.as_ref(), "name")?;

    let created = match kind {
        EntityKind::Station => {
            if payload.lat.is_none() || payload.lon.is_none() {
                return Err(RepositoryError::validation(COORDINATES_REQUIRED));
            }
            let station = repo
                .create_station(&NewStation {
                    code,
                    name,
                    basin_id: payload.basin_id.flatten().map(BasinId::new),
                    lat: payload.lat,
                    lon: payload.lon,
                    station_type: Some(
                        payload
                            .station_type
                            .clone()
                            .unwrap_or_else(|| STATION_TYPE_HYDRO.to_string()),
                    ),
                })
                .await?;
            info!("Created station {} ({})", station.code, station.id);
            serde_json::to_value(station)
        }
        EntityKind::Basin => {
            let basin = repo
                .create_basin(&NewBasin {
                    code,
                    name,
                    level: payload.level,
                    parent_basin_id: payload.parent_basin_id.map(BasinId::new),
                    geometry: payload.geometry.clone(),
                    color: payload.color.clone(),
                })
                .await?;
            info!("Created basin {} ({})", basin.code, basin.id);
            serde_json::to_value(basin)
        }
    };
    created.map_err(|e| RepositoryError::internal(e.to_string()))
}

/// Apply the fields present in `payload`.
///
/// Station coordinates move as a pair: latitude without longitude, or the
/// reverse, is rejected.
pub async fn update_entity<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
    id: i64,
    payload: &EntityPayload,
) -> RepositoryResult<Value> {
    let updated = match kind {
        EntityKind::Station => {
            if payload.lat.is_some() != payload.lon.is_some() {
                return Err(RepositoryError::validation(COORDINATES_REQUIRED));
            }
            let patch = StationPatch {
                code: payload.code.clone(),
                name: payload.name.clone(),
                basin_id: payload.basin_id.map(|b| b.map(BasinId::new)),
                lat: payload.lat,
                lon: payload.lon,
                station_type: payload.station_type.clone(),
                active: payload.active,
            };
            if patch.is_empty() {
                return Err(RepositoryError::validation("No fields to update"));
            }
            serde_json::to_value(repo.update_station(StationId::new(id), &patch).await?)
        }
        EntityKind::Basin => {
            let patch = BasinPatch {
                code: payload.code.clone(),
                name: payload.name.clone(),
                level: payload.level,
                parent_basin_id: payload.parent_basin_id.map(BasinId::new),
                geometry: payload.geometry.clone(),
                color: payload.color.clone(),
            };
            if patch.is_empty() {
                return Err(RepositoryError::validation("No fields to update"));
            }
            serde_json::to_value(repo.update_basin(BasinId::new(id), &patch).await?)
        }
    };
    updated.map_err(|e| RepositoryError::internal(e.to_string()))
}

/// Delete a station or basin together with its measurements.
pub async fn delete_entity<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
    id: i64,
) -> RepositoryResult<()> {
    match kind {
        EntityKind::Station => repo.delete_station(StationId::new(id)).await?,
        EntityKind::Basin => repo.delete_basin(BasinId::new(id)).await?,
    }
    info!("Deleted {} {}", kind, id);
    Ok(())
}

/// Check that the entity exists and return a measurement reference to it.
pub async fn resolve_entity<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
    id: i64,
) -> RepositoryResult<EntityRef> {
    match kind {
        EntityKind::Station => {
            let station = repo.get_station(StationId::new(id)).await?;
            Ok(EntityRef::station(station.id))
        }
        EntityKind::Basin => {
            let basin = repo.get_basin(BasinId::new(id)).await?;
            Ok(EntityRef::basin(basin.id))
        }
    }
}
