use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use super::schema::{
    ingestion_history, ref_basin, ref_run, ref_source, ref_station, ref_variable, ts_measurement,
};
use crate::api::{
    Basin, BasinId, EntityKind, EntityRef, IngestionRecord, IngestionStatus, Measurement, Run,
    RunId, Source, Station, StationId, Variable,
};
use crate::db::repository::{RepositoryError, RepositoryResult};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ref_station)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct StationRow {
    pub station_id: i64,
    pub code: String,
    pub name: String,
    pub basin_id: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub station_type: String,
    pub active: bool,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        Station {
            id: StationId::new(row.station_id),
            code: row.code,
            name: row.name,
            basin_id: row.basin_id.map(BasinId::new),
            lat: row.lat,
            lon: row.lon,
            station_type: row.station_type,
            active: row.active,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ref_station)]
pub struct NewStationRow {
    pub code: String,
    pub name: String,
    pub basin_id: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub station_type: String,
}

/// Partial update; `None` columns are left out of the SET clause.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = ref_station)]
pub struct StationChangeset {
    pub code: Option<String>,
    pub name: Option<String>,
    pub basin_id: Option<Option<i64>>,
    pub lat: Option<Option<f64>>,
    pub lon: Option<Option<f64>>,
    pub station_type: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ref_basin)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct BasinRow {
    pub basin_id: i64,
    pub code: String,
    pub name: String,
    pub level: Option<i32>,
    pub parent_basin_id: Option<i64>,
    pub geometry: Option<Value>,
    pub color: Option<String>,
}

impl From<BasinRow> for Basin {
    fn from(row: BasinRow) -> Self {
        Basin {
            id: BasinId::new(row.basin_id),
            code: row.code,
            name: row.name,
            level: row.level,
            parent_basin_id: row.parent_basin_id.map(BasinId::new),
            geometry: row.geometry,
            color: row.color,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ref_basin)]
pub struct NewBasinRow {
    pub code: String,
    pub name: String,
    pub level: Option<i32>,
    pub parent_basin_id: Option<i64>,
    pub geometry: Option<Value>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = ref_basin)]
pub struct BasinChangeset {
    pub code: Option<String>,
    pub name: Option<String>,
    pub level: Option<Option<i32>>,
    pub parent_basin_id: Option<Option<i64>>,
    pub geometry: Option<Option<Value>>,
    pub color: Option<Option<String>>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ref_variable)]
pub struct VariableRow {
    pub code: String,
    pub label: String,
    pub unit: String,
}

impl From<VariableRow> for Variable {
    fn from(row: VariableRow) -> Self {
        Variable {
            code: row.code,
            label: row.label,
            unit: row.unit,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ref_source)]
pub struct SourceRow {
    pub code: String,
    pub label: String,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            code: row.code,
            label: row.label,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ref_run)]
pub struct RunRow {
    pub run_id: i64,
    pub source_code: String,
    pub label: String,
    pub run_time: DateTime<Utc>,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            run_id: RunId::new(row.run_id),
            label: row.label,
            source_code: row.source_code,
            run_time: row.run_time,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ref_run)]
pub struct NewRunRow {
    pub source_code: String,
    pub label: String,
    pub run_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ts_measurement)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[allow(dead_code)] // measurement_id is only used by the database
pub struct MeasurementRow {
    pub measurement_id: i64,
    pub time: DateTime<Utc>,
    pub entity_type: String,
    pub entity_id: i64,
    pub variable_code: String,
    pub source_code: String,
    pub run_id: Option<i64>,
    pub value: f64,
    pub qc_flag: String,
}

impl TryFrom<MeasurementRow> for Measurement {
    type Error = RepositoryError;

    fn try_from(row: MeasurementRow) -> RepositoryResult<Self> {
        let kind: EntityKind = row.entity_type.parse().map_err(RepositoryError::internal)?;
        Ok(Measurement {
            time: row.time,
            entity: EntityRef {
                kind,
                id: row.entity_id,
            },
            variable_code: row.variable_code,
            source_code: row.source_code,
            run_id: row.run_id.map(RunId::new),
            value: row.value,
            qc_flag: row.qc_flag,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ts_measurement)]
pub struct NewMeasurementRow {
    pub time: DateTime<Utc>,
    pub entity_type: String,
    pub entity_id: i64,
    pub variable_code: String,
    pub source_code: String,
    pub run_id: Option<i64>,
    pub value: f64,
    pub qc_flag: String,
}

impl From<&Measurement> for NewMeasurementRow {
    fn from(m: &Measurement) -> Self {
        NewMeasurementRow {
            time: m.time,
            entity_type: m.entity.kind.as_str().to_string(),
            entity_id: m.entity.id,
            variable_code: m.variable_code.clone(),
            source_code: m.source_code.clone(),
            run_id: m.run_id.map(|r| r.value()),
            value: m.value,
            qc_flag: m.qc_flag.clone(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = ingestion_history)]
pub struct IngestionRow {
    pub ingestion_id: i64,
    pub pipeline_name: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub file_checksum: Option<String>,
    pub summary: Value,
}

impl TryFrom<IngestionRow> for IngestionRecord {
    type Error = RepositoryError;

    fn try_from(row: IngestionRow) -> RepositoryResult<Self> {
        let status: IngestionStatus = row.status.parse().map_err(RepositoryError::internal)?;
        Ok(IngestionRecord {
            ingestion_id: row.ingestion_id,
            pipeline_name: row.pipeline_name,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            file_checksum: row.file_checksum,
            summary: row.summary,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ingestion_history)]
pub struct NewIngestionRow {
    pub pipeline_name: String,
    pub status: String,
    pub file_checksum: Option<String>,
}
