//! Time-series repository trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::RepositoryResult;
use crate::api::{EntityKind, EntityRef, Measurement, MeasurementQuery, SeriesCoverage};

#[async_trait]
pub trait MeasurementRepository: Send + Sync {
    /// Insert measurements, replacing the value and flag of any row sharing the
    /// natural key `(time, entity, variable, source, run)`.
    ///
    /// # Returns
    /// * `Ok(usize)` - Number of rows written
    async fn upsert_measurements(&self, rows: &[Measurement]) -> RepositoryResult<usize>;

    /// Filter, order and limit measurements.
    async fn query_measurements(&self, query: &MeasurementQuery)
        -> RepositoryResult<Vec<Measurement>>;

    /// Most recent measurement per entity for each `(variable, source)` pair.
    async fn latest_measurements(
        &self,
        kind: EntityKind,
        series: &[(&str, &str)],
    ) -> RepositoryResult<Vec<Measurement>>;

    /// Delete every measurement of `variable_code` for `entity` at `time`.
    async fn delete_measurement(
        &self,
        entity: EntityRef,
        variable_code: &str,
        time: DateTime<Utc>,
    ) -> RepositoryResult<usize>;

    /// Delete the whole series of `variable_code` for `entity`.
    async fn delete_variable_series(
        &self,
        entity: EntityRef,
        variable_code: &str,
    ) -> RepositoryResult<usize>;

    /// Delete `[start, end]` of one series of one source.
    async fn delete_time_range(
        &self,
        entity: EntityRef,
        variable_code: &str,
        source_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<usize>;

    /// Record counts and spans grouped by `(entity, variable, source)`.
    async fn series_coverage(
        &self,
        kind: Option<EntityKind>,
    ) -> RepositoryResult<Vec<SeriesCoverage>>;

    async fn count_measurements(&self) -> RepositoryResult<i64>;
}
