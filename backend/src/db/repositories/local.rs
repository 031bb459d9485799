//! In-memory local repository implementation.
//!
//! This module provides a local implementation of all repository traits
//! suitable for unit testing and local development. Reference tables live in
//! ordered maps and measurements are keyed by their natural key, so upserts and
//! range deletes behave the way the SQL schema's unique constraint makes them
//! behave in Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::api::*;
use crate::db::repository::*;

/// In-memory local repository.
///
/// # Example
/// ```
/// use hydro_sentinel::api::NewStation;
/// use hydro_sentinel::db::repositories::LocalRepository;
/// use hydro_sentinel::db::repository::StationRepository;
///
/// let repo = LocalRepository::new();
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let station = rt
///     .block_on(repo.create_station(&NewStation {
///         code: "ST01".into(),
///         name: "Ain Sebou".into(),
///         lat: Some(33.9),
///         lon: Some(-4.9),
///         ..Default::default()
///     }))
///     .unwrap();
/// assert_eq!(station.station_type, "Station hydrologique");
/// ```
#[derive(Clone)]
pub struct LocalRepository {
    data: Arc<RwLock<LocalData>>,
}

struct LocalData {
    stations: BTreeMap<StationId, Station>,
    basins: BTreeMap<BasinId, Basin>,
    variables: BTreeMap<String, Variable>,
    sources: BTreeMap<String, Source>,
    runs: Vec<Run>,
    measurements: BTreeMap<MeasurementKey, Measurement>,
    ingestions: Vec<IngestionRecord>,

    // ID counters
    next_station_id: i64,
    next_basin_id: i64,
    next_run_id: i64,
    next_ingestion_id: i64,

    // Connection health
    is_healthy: bool,
}

impl Default for LocalData {
    fn default() -> Self {
        Self {
            stations: BTreeMap::new(),
            basins: BTreeMap::new(),
            variables: default_variables()
                .into_iter()
                .map(|v| (v.code.clone(), v))
                .collect(),
            sources: default_sources()
                .into_iter()
                .map(|s| (s.code.clone(), s))
                .collect(),
            runs: Vec::new(),
            measurements: BTreeMap::new(),
            ingestions: Vec::new(),
            next_station_id: 1,
            next_basin_id: 1,
            next_run_id: 1,
            next_ingestion_id: 1,
            is_healthy: true,
        }
    }
}

impl LocalData {
    fn remove_measurements<F>(&mut self, mut remove: F) -> usize
    where
        F: FnMut(&Measurement) -> bool,
    {
        let before = self.measurements.len();
        self.measurements.retain(|_, m| !remove(m));
        before - self.measurements.len()
    }

    fn ensure_unique_station_code(&self, code: &str, except: Option<StationId>) -> RepositoryResult<()> {
        let clash = self
            .stations
            .values()
            .any(|s| s.code == code && Some(s.id) != except);
        if clash {
            return Err(RepositoryError::validation_with_context(
                format!("Station code '{}' already exists", code),
                ErrorContext::new("save_station").with_entity("station"),
            ));
        }
        Ok(())
    }

    fn ensure_unique_basin_code(&self, code: &str, except: Option<BasinId>) -> RepositoryResult<()> {
        let clash = self
            .basins
            .values()
            .any(|b| b.code == code && Some(b.id) != except);
        if clash {
            return Err(RepositoryError::validation_with_context(
                format!("Basin code '{}' already exists", code),
                ErrorContext::new("save_basin").with_entity("basin"),
            ));
        }
        Ok(())
    }
}

impl LocalRepository {
    /// Create a repository seeded with the reference variables and sources.
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(LocalData::default())),
        }
    }

    /// Set the health status for testing connection failures.
    pub fn set_healthy(&self, healthy: bool) {
        self.data.write().is_healthy = healthy;
    }

    /// Clear all data, keeping the seeded reference tables.
    pub fn clear(&self) {
        let mut data = self.data.write();
        let healthy = data.is_healthy;
        *data = LocalData {
            is_healthy: healthy,
            ..Default::default()
        };
    }

    /// Register an extra variable.
    pub fn add_variable(&self, variable: Variable) {
        self.data
            .write()
            .variables
            .insert(variable.code.clone(), variable);
    }

    /// Get the number of stored measurements.
    pub fn measurement_count(&self) -> usize {
        self.data.read().measurements.len()
    }

    fn check_health(&self) -> RepositoryResult<()> {
        if !self.data.read().is_healthy {
            return Err(RepositoryError::connection("Local repository marked unhealthy"));
        }
        Ok(())
    }
}

impl Default for LocalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StationRepository for LocalRepository {
    async fn health_check(&self) -> RepositoryResult<bool> {
        Ok(self.data.read().is_healthy)
    }

    async fn list_stations(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Station>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.stations.values().skip(skip).take(limit).cloned().collect())
    }

    async fn get_station(&self, id: StationId) -> RepositoryResult<Station> {
        self.check_health()?;
        self.data
            .read()
            .stations
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::entity_not_found("station", id))
    }

    async fn find_station_by_code(&self, code: &str) -> RepositoryResult<Option<Station>> {
        self.check_health()?;
        Ok(self
            .data
            .read()
            .stations
            .values()
            .find(|s| s.code == code)
            .cloned())
    }

    async fn create_station(&self, station: &NewStation) -> RepositoryResult<Station> {
        self.check_health()?;
        let mut data = self.data.write();
        data.ensure_unique_station_code(&station.code, None)?;

        let id = StationId::new(data.next_station_id);
        data.next_station_id += 1;

        let created = Station {
            id,
            code: station.code.clone(),
            name: station.name.clone(),
            basin_id: station.basin_id,
            lat: station.lat,
            lon: station.lon,
            station_type: station
                .station_type
                .clone()
                .unwrap_or_else(|| STATION_TYPE_HYDRO.to_string()),
            active: true,
        };
        data.stations.insert(id, created.clone());
        Ok(created)
    }

    async fn update_station(
        &self,
        id: StationId,
        patch: &StationPatch,
    ) -> RepositoryResult<Station> {
        self.check_health()?;
        let mut data = self.data.write();
        if let Some(code) = &patch.code {
            data.ensure_unique_station_code(code, Some(id))?;
        }
        let station = data
            .stations
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::entity_not_found("station", id))?;
        patch.apply(station);
        Ok(station.clone())
    }

    async fn delete_station(&self, id: StationId) -> RepositoryResult<()> {
        self.check_health()?;
        let mut data = self.data.write();
        if data.stations.remove(&id).is_none() {
            return Err(RepositoryError::entity_not_found("station", id));
        }
        let entity = EntityRef::station(id);
        data.remove_measurements(|m| m.entity == entity);
        Ok(())
    }

    async fn upsert_station_by_code(&self, station: &NewStation) -> RepositoryResult<Station> {
        let existing = self.find_station_by_code(&station.code).await?;
        match existing {
            Some(found) => {
                let patch = StationPatch {
                    name: Some(station.name.clone()),
                    basin_id: station.basin_id.map(Some),
                    lat: station.lat,
                    lon: station.lon,
                    station_type: station.station_type.clone(),
                    ..Default::default()
                };
                self.update_station(found.id, &patch).await
            }
            None => self.create_station(station).await,
        }
    }

    async fn truncate_stations(&self) -> RepositoryResult<usize> {
        self.check_health()?;
        let mut data = self.data.write();
        let removed = data.stations.len();
        data.stations.clear();
        data.remove_measurements(|m| m.entity.kind == EntityKind::Station);
        Ok(removed)
    }
}

#[async_trait]
impl BasinRepository for LocalRepository {
    async fn list_basins(&self, skip: usize, limit: usize) -> RepositoryResult<Vec<Basin>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.basins.values().skip(skip).take(limit).cloned().collect())
    }

    async fn get_basin(&self, id: BasinId) -> RepositoryResult<Basin> {
        self.check_health()?;
        self.data
            .read()
            .basins
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::entity_not_found("basin", id))
    }

    async fn find_basin_by_code(&self, code: &str) -> RepositoryResult<Option<Basin>> {
        self.check_health()?;
        Ok(self
            .data
            .read()
            .basins
            .values()
            .find(|b| b.code == code)
            .cloned())
    }

    async fn create_basin(&self, basin: &NewBasin) -> RepositoryResult<Basin> {
        self.check_health()?;
        let mut data = self.data.write();
        data.ensure_unique_basin_code(&basin.code, None)?;

        let id = BasinId::new(data.next_basin_id);
        data.next_basin_id += 1;

        let created = Basin {
            id,
            code: basin.code.clone(),
            name: basin.name.clone(),
            level: basin.level,
            parent_basin_id: basin.parent_basin_id,
            geometry: basin.geometry.clone(),
            color: basin.color.clone(),
        };
        data.basins.insert(id, created.clone());
        Ok(created)
    }

    async fn update_basin(&self, id: BasinId, patch: &BasinPatch) -> RepositoryResult<Basin> {
        self.check_health()?;
        let mut data = self.data.write();
        if let Some(code) = &patch.code {
            data.ensure_unique_basin_code(code, Some(id))?;
        }
        let basin = data
            .basins
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::entity_not_found("basin", id))?;
        patch.apply(basin);
        Ok(basin.clone())
    }

    async fn delete_basin(&self, id: BasinId) -> RepositoryResult<()> {
        self.check_health()?;
        let mut data = self.data.write();
        if data.basins.remove(&id).is_none() {
            return Err(RepositoryError::entity_not_found("basin", id));
        }
        for station in data.stations.values_mut() {
            if station.basin_id == Some(id) {
                station.basin_id = None;
            }
        }
        let entity = EntityRef::basin(id);
        data.remove_measurements(|m| m.entity == entity);
        Ok(())
    }

    async fn upsert_basin_by_code(&self, basin: &NewBasin) -> RepositoryResult<Basin> {
        let existing = self.find_basin_by_code(&basin.code).await?;
        match existing {
            Some(found) => {
                let patch = BasinPatch {
                    name: Some(basin.name.clone()),
                    level: basin.level,
                    parent_basin_id: basin.parent_basin_id,
                    geometry: basin.geometry.clone(),
                    color: basin.color.clone(),
                    ..Default::default()
                };
                self.update_basin(found.id, &patch).await
            }
            None => self.create_basin(basin).await,
        }
    }

    async fn truncate_basins(&self) -> RepositoryResult<usize> {
        self.check_health()?;
        let mut data = self.data.write();
        let removed = data.basins.len();
        data.basins.clear();
        for station in data.stations.values_mut() {
            station.basin_id = None;
        }
        data.remove_measurements(|m| m.entity.kind == EntityKind::Basin);
        Ok(removed)
    }
}

#[async_trait]
impl ReferenceRepository for LocalRepository {
    async fn list_variables(&self) -> RepositoryResult<Vec<Variable>> {
        self.check_health()?;
        let mut variables: Vec<Variable> = self.data.read().variables.values().cloned().collect();
        variables.sort_by(|a, b| a.label.cmp(&b.label));
        Ok(variables)
    }

    async fn get_variable(&self, code: &str) -> RepositoryResult<Option<Variable>> {
        self.check_health()?;
        Ok(self.data.read().variables.get(code).cloned())
    }

    async fn list_sources(&self) -> RepositoryResult<Vec<Source>> {
        self.check_health()?;
        Ok(self.data.read().sources.values().cloned().collect())
    }

    async fn get_source(&self, code: &str) -> RepositoryResult<Option<Source>> {
        self.check_health()?;
        Ok(self.data.read().sources.get(code).cloned())
    }

    async fn get_or_create_run(
        &self,
        source_code: &str,
        label: &str,
        run_time: DateTime<Utc>,
    ) -> RepositoryResult<Run> {
        self.check_health()?;
        let mut data = self.data.write();
        if !data.sources.contains_key(source_code) {
            return Err(RepositoryError::not_found(format!(
                "Source {} not found",
                source_code
            )));
        }
        if let Some(run) = data
            .runs
            .iter()
            .find(|r| r.source_code == source_code && r.label == label)
        {
            return Ok(run.clone());
        }

        let run = Run {
            run_id: RunId::new(data.next_run_id),
            label: label.to_string(),
            source_code: source_code.to_string(),
            run_time,
        };
        data.next_run_id += 1;
        data.runs.push(run.clone());
        Ok(run)
    }

    async fn list_run_times(
        &self,
        source_code: &str,
        limit: usize,
    ) -> RepositoryResult<Vec<DateTime<Utc>>> {
        self.check_health()?;
        let data = self.data.read();
        let mut times: Vec<DateTime<Utc>> = data
            .runs
            .iter()
            .filter(|r| r.source_code == source_code)
            .map(|r| r.run_time)
            .collect();
        times.sort_unstable_by(|a, b| b.cmp(a));
        times.dedup();
        times.truncate(limit);
        Ok(times)
    }
}

#[async_trait]
impl MeasurementRepository for LocalRepository {
    async fn upsert_measurements(&self, rows: &[Measurement]) -> RepositoryResult<usize> {
        self.check_health()?;
        let mut data = self.data.write();
        for row in rows {
            data.measurements.insert(row.key(), row.clone());
        }
        Ok(rows.len())
    }

    async fn query_measurements(
        &self,
        query: &MeasurementQuery,
    ) -> RepositoryResult<Vec<Measurement>> {
        self.check_health()?;
        let data = self.data.read();
        let mut rows: Vec<Measurement> = data
            .measurements
            .values()
            .filter(|m| query.matches(m))
            .cloned()
            .collect();

        match query.order {
            TimeOrder::Ascending => rows.sort_by(|a, b| a.time.cmp(&b.time)),
            TimeOrder::Descending => rows.sort_by(|a, b| b.time.cmp(&a.time)),
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn latest_measurements(
        &self,
        kind: EntityKind,
        series: &[(&str, &str)],
    ) -> RepositoryResult<Vec<Measurement>> {
        self.check_health()?;
        let data = self.data.read();
        let mut latest: HashMap<(EntityRef, &str, &str), &Measurement> = HashMap::new();

        for m in data.measurements.values() {
            if m.entity.kind != kind {
                continue;
            }
            let Some((variable, source)) = series
                .iter()
                .find(|(v, s)| *v == m.variable_code && *s == m.source_code)
            else {
                continue;
            };
            let slot = latest.entry((m.entity, *variable, *source)).or_insert(m);
            if m.time > slot.time {
                *slot = m;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn delete_measurement(
        &self,
        entity: EntityRef,
        variable_code: &str,
        time: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.check_health()?;
        Ok(self.data.write().remove_measurements(|m| {
            m.entity == entity && m.variable_code == variable_code && m.time == time
        }))
    }

    async fn delete_variable_series(
        &self,
        entity: EntityRef,
        variable_code: &str,
    ) -> RepositoryResult<usize> {
        self.check_health()?;
        Ok(self
            .data
            .write()
            .remove_measurements(|m| m.entity == entity && m.variable_code == variable_code))
    }

    async fn delete_time_range(
        &self,
        entity: EntityRef,
        variable_code: &str,
        source_code: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepositoryResult<usize> {
        self.check_health()?;
        Ok(self.data.write().remove_measurements(|m| {
            m.entity == entity
                && m.variable_code == variable_code
                && m.source_code == source_code
                && m.time >= start
                && m.time <= end
        }))
    }

    async fn series_coverage(
        &self,
        kind: Option<EntityKind>,
    ) -> RepositoryResult<Vec<SeriesCoverage>> {
        self.check_health()?;
        let data = self.data.read();
        let mut groups: BTreeMap<(EntityRef, String, String), SeriesCoverage> = BTreeMap::new();

        for m in data.measurements.values() {
            if kind.is_some_and(|k| k != m.entity.kind) {
                continue;
            }
            groups
                .entry((m.entity, m.variable_code.clone(), m.source_code.clone()))
                .and_modify(|c| {
                    c.record_count += 1;
                    c.first_record = c.first_record.min(m.time);
                    c.last_record = c.last_record.max(m.time);
                })
                .or_insert_with(|| SeriesCoverage {
                    entity: m.entity,
                    variable_code: m.variable_code.clone(),
                    source_code: m.source_code.clone(),
                    record_count: 1,
                    first_record: m.time,
                    last_record: m.time,
                });
        }
        Ok(groups.into_values().collect())
    }

    async fn count_measurements(&self) -> RepositoryResult<i64> {
        self.check_health()?;
        Ok(self.data.read().measurements.len() as i64)
    }
}

#[async_trait]
impl IngestionRepository for LocalRepository {
    async fn start_ingestion(
        &self,
        pipeline_name: &str,
        file_checksum: Option<&str>,
    ) -> RepositoryResult<IngestionRecord> {
        self.check_health()?;
        let mut data = self.data.write();
        let record = IngestionRecord {
            ingestion_id: data.next_ingestion_id,
            pipeline_name: pipeline_name.to_string(),
            status: IngestionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            file_checksum: file_checksum.map(str::to_string),
            summary: serde_json::Value::Null,
        };
        data.next_ingestion_id += 1;
        data.ingestions.push(record.clone());
        Ok(record)
    }

    async fn finish_ingestion(
        &self,
        ingestion_id: i64,
        status: IngestionStatus,
        summary: serde_json::Value,
    ) -> RepositoryResult<IngestionRecord> {
        self.check_health()?;
        let mut data = self.data.write();
        let record = data
            .ingestions
            .iter_mut()
            .find(|r| r.ingestion_id == ingestion_id)
            .ok_or_else(|| RepositoryError::entity_not_found("ingestion", ingestion_id))?;
        record.status = status;
        record.finished_at = Some(Utc::now());
        record.summary = summary;
        Ok(record.clone())
    }

    async fn list_ingestions(&self, limit: usize) -> RepositoryResult<Vec<IngestionRecord>> {
        self.check_health()?;
        let data = self.data.read();
        Ok(data.ingestions.iter().rev().take(limit).cloned().collect())
    }
}
