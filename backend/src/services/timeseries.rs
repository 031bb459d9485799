//! Time series import and manual editing.
//!
//! Uploads come in three layouts:
//!
//! ```text
//! simple          timestamp | value | quality_flag        one station, one variable
//! multi_station   timestamp | P1 | P2 | ...               one variable, columns = entities
//! multi_variable  timestamp | debit_m3s (m³/s) | ...      one station, columns = variables
//! ```
//!
//! All three write through [`MeasurementRepository::upsert_measurements`] under
//! a run named `Import_{SOURCE}_{YYYYMMDD}`.
//!
//! [`MeasurementRepository::upsert_measurements`]: crate::db::MeasurementRepository::upsert_measurements

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::error::{ImportError, ImportResult};
use super::tabular::{load_table, Cell, Table};
use crate::api::{
    is_dam_type, EntityKind, EntityRef, Measurement, MeasurementQuery, RunId, StationId,
    TimeOrder, DAM_ONLY_VARIABLES,
};
use crate::db::repository::{FullRepository, RepositoryResult};
use crate::db::services::resolve_entity;

pub const DEFAULT_QC_FLAG: &str = "good";
const PREVIEW_ROWS: usize = 5;
const ENTITY_SCAN_LIMIT: usize = 100_000;
const MANUAL_SERIES_LIMIT: usize = 1000;

// ==================== Entity lookup ====================

/// Station or basin as seen by column matching.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEntry {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub entity_type: String,
}

/// Lowercased code, then lowercased name, to entity. Codes win over names.
pub async fn entity_index<R: FullRepository + ?Sized>(
    repo: &R,
    kind: EntityKind,
) -> RepositoryResult<HashMap<String, EntityEntry>> {
    let entries: Vec<EntityEntry> = match kind {
        EntityKind::Station => repo
            .list_stations(0, ENTITY_SCAN_LIMIT)
            .await?
            .into_iter()
            .map(|s| EntityEntry {
                id: s.id.value(),
                code: s.code,
                name: s.name,
                entity_type: s.station_type,
            })
            .collect(),
        EntityKind::Basin => repo
            .list_basins(0, ENTITY_SCAN_LIMIT)
            .await?
            .into_iter()
            .map(|b| EntityEntry {
                id: b.id.value(),
                code: b.code,
                name: b.name,
                entity_type: "Bassin".to_string(),
            })
            .collect(),
    };

    let mut index = HashMap::new();
    for entry in &entries {
        index.insert(entry.code.to_lowercase(), entry.clone());
    }
    for entry in entries {
        index.entry(entry.name.to_lowercase()).or_insert(entry);
    }
    Ok(index)
}

fn is_unnamed(column: &str) -> bool {
    column.to_lowercase().starts_with("unnamed")
}

// ==================== Analyze ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMatch {
    pub column: String,
    pub matched_station: String,
    pub station_code: String,
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub filename: String,
    pub rows_count: usize,
    pub time_column: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub stations_found: usize,
    pub stations_details: Vec<ColumnMatch>,
    pub unknown_columns: Vec<String>,
    pub preview: Vec<BTreeMap<String, String>>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum AnalysisOutcome {
    Success(AnalysisReport),
    Error { message: String },
}

fn format_stamp(t: chrono::NaiveDateTime) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Inspect an upload before importing it: time span, matched entities, preview.
pub async fn analyze_upload<R: FullRepository + ?Sized>(
    repo: &R,
    filename: &str,
    bytes: &[u8],
    kind: EntityKind,
) -> ImportResult<AnalysisOutcome> {
    let table = load_table(filename, bytes)?;
    let Some(ts_col) = table.time_column() else {
        return Ok(AnalysisOutcome::Error {
            message: "Timestamp column not found".to_string(),
        });
    };

    let index = entity_index(repo, kind).await?;
    let times: Vec<_> = table.values(ts_col).filter_map(Cell::as_datetime).collect();

    let mut details = Vec::new();
    let mut unknown = Vec::new();
    for (i, column) in table.columns.iter().enumerate() {
        if i == ts_col || is_unnamed(column) {
            continue;
        }
        match index.get(&column.to_lowercase()) {
            Some(entry) => details.push(ColumnMatch {
                column: column.clone(),
                matched_station: entry.name.clone(),
                station_code: entry.code.clone(),
                entity_type: entry.entity_type.clone(),
            }),
            None => unknown.push(column.clone()),
        }
    }

    let preview = table
        .rows
        .iter()
        .take(PREVIEW_ROWS)
        .map(|row| {
            table
                .columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| (c.clone(), v.text()))
                .collect()
        })
        .collect();

    Ok(AnalysisOutcome::Success(AnalysisReport {
        filename: filename.to_string(),
        rows_count: table.rows.len(),
        time_column: table.columns[ts_col].clone(),
        start_date: times.iter().min().copied().map(format_stamp),
        end_date: times.iter().max().copied().map(format_stamp),
        stations_found: details.len(),
        stations_details: details,
        unknown_columns: unknown,
        preview,
        columns: table.columns.clone(),
    }))
}

// ==================== Upload ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    #[default]
    Simple,
    MultiStation,
    MultiVariable,
}

impl FromStr for ImportMode {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(ImportMode::Simple),
            "multi_station" => Ok(ImportMode::MultiStation),
            "multi_variable" => Ok(ImportMode::MultiVariable),
            other => Err(ImportError::bad_request(format!(
                "Unknown import mode: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub import_mode: ImportMode,
    pub replace_existing: bool,
    pub entity_id: Option<i64>,
    pub variable_code: Option<String>,
    pub source_code: String,
    pub kind: EntityKind,
}

impl Default for UploadRequest {
    fn default() -> Self {
        UploadRequest {
            import_mode: ImportMode::Simple,
            replace_existing: false,
            entity_id: None,
            variable_code: None,
            source_code: "OBS".to_string(),
            kind: EntityKind::Station,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadOutcome {
    pub status: String,
    pub message: String,
    pub records: usize,
}

/// Rows of the table with a parsable timestamp, normalised to UTC.
struct TimedRows<'a> {
    table: &'a Table,
    ts_col: usize,
    rows: Vec<(DateTime<Utc>, &'a [Cell])>,
}

impl<'a> TimedRows<'a> {
    fn new(table: &'a Table) -> ImportResult<Self> {
        let ts_col = table.time_column().unwrap_or(0);
        let rows: Vec<_> = table
            .rows
            .iter()
            .filter_map(|row| {
                row.get(ts_col)
                    .and_then(Cell::as_datetime)
                    .map(|t| (t.and_utc(), row.as_slice()))
            })
            .collect();
        if table.columns.is_empty() || rows.is_empty() {
            return Err(ImportError::bad_request(
                "File is empty or no valid timestamps found",
            ));
        }
        Ok(TimedRows {
            table,
            ts_col,
            rows,
        })
    }

    fn data_columns(&self) -> impl Iterator<Item = (usize, &'a String)> + '_ {
        let ts_col = self.ts_col;
        self.table
            .columns
            .iter()
            .enumerate()
            .filter(move |(i, c)| *i != ts_col && !is_unnamed(c))
    }

    fn series(
        &self,
        col: usize,
        flag_col: Option<usize>,
        entity: EntityRef,
        variable_code: &str,
        source_code: &str,
        run_id: RunId,
    ) -> Vec<Measurement> {
        self.rows
            .iter()
            .filter_map(|(time, row)| {
                let value = row.get(col).and_then(Cell::as_f64)?;
                let qc_flag = flag_col
                    .and_then(|f| row.get(f))
                    .filter(|c| !c.is_empty())
                    .map(Cell::text)
                    .unwrap_or_else(|| DEFAULT_QC_FLAG.to_string());
                Some(Measurement {
                    time: *time,
                    entity,
                    variable_code: variable_code.to_string(),
                    source_code: source_code.to_string(),
                    run_id: Some(run_id),
                    value,
                    qc_flag,
                })
            })
            .collect()
    }
}

async fn write_series<R: FullRepository + ?Sized>(
    repo: &R,
    rows: &[Measurement],
    replace_existing: bool,
) -> RepositoryResult<usize> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    if replace_existing {
        let start = rows.iter().map(|m| m.time).min().unwrap_or(first.time);
        let end = rows.iter().map(|m| m.time).max().unwrap_or(first.time);
        let removed = repo
            .delete_time_range(
                first.entity,
                &first.variable_code,
                &first.source_code,
                start,
                end,
            )
            .await?;
        debug!(
            "Replaced {} existing points of {} for {}",
            removed, first.variable_code, first.entity.id
        );
    }
    repo.upsert_measurements(rows).await
}

async fn require_variable<R: FullRepository + ?Sized>(repo: &R, code: &str) -> ImportResult<()> {
    match repo.get_variable(code).await? {
        Some(_) => Ok(()),
        None => Err(ImportError::not_found(format!("Variable {} not found", code))),
    }
}

/// Import an uploaded file according to `request`.
pub async fn upload_timeseries<R: FullRepository + ?Sized>(
    repo: &R,
    filename: &str,
    bytes: &[u8],
    request: &UploadRequest,
    now: DateTime<Utc>,
) -> ImportResult<UploadOutcome> {
    let table = load_table(filename, bytes)?;
    let run_label = format!("Import_{}_{}", request.source_code, now.format("%Y%m%d"));
    let records = import_table(repo, &table, request, &run_label, now).await?;

    info!(
        "Imported {} points from {} ({:?}, source {})",
        records, filename, request.import_mode, request.source_code
    );
    Ok(UploadOutcome {
        status: "success".to_string(),
        message: format!("Imported {} data points", records),
        records,
    })
}

/// Write one parsed table under the run `run_label` of the request's source.
/// Returns the number of points written.
pub async fn import_table<R: FullRepository + ?Sized>(
    repo: &R,
    table: &Table,
    request: &UploadRequest,
    run_label: &str,
    run_time: DateTime<Utc>,
) -> ImportResult<usize> {
    let timed = TimedRows::new(table)?;

    if repo.get_source(&request.source_code).await?.is_none() {
        return Err(ImportError::not_found(format!(
            "Source {} not found",
            request.source_code
        )));
    }
    let run = repo
        .get_or_create_run(&request.source_code, run_label, run_time)
        .await?;
    let source = request.source_code.as_str();

    let mut records = 0;
    match request.import_mode {
        ImportMode::Simple => {
            let (Some(entity_id), Some(variable)) =
                (request.entity_id, request.variable_code.as_deref())
            else {
                return Err(ImportError::bad_request(
                    "Station and Variable required for simple mode",
                ));
            };
            let (value_col, _) = timed
                .data_columns()
                .next()
                .ok_or_else(|| ImportError::bad_request("No value column found"))?;
            require_variable(repo, variable).await?;
            let entity = resolve_entity(repo, request.kind, entity_id).await?;

            let flag_col = table.column("quality_flag");
            let rows = timed.series(value_col, flag_col, entity, variable, source, run.run_id);
            records += write_series(repo, &rows, request.replace_existing).await?;
        }
        ImportMode::MultiStation => {
            let variable = request.variable_code.as_deref().ok_or_else(|| {
                ImportError::bad_request("Variable required for multi-station mode")
            })?;
            require_variable(repo, variable).await?;
            let dam_only = DAM_ONLY_VARIABLES.contains(&variable);
            let index = entity_index(repo, request.kind).await?;

            for (col, name) in timed.data_columns() {
                let Some(entry) = index.get(&name.to_lowercase()) else {
                    warn!("Entity '{}' not found, column skipped", name);
                    continue;
                };
                if request.kind == EntityKind::Station && dam_only && !is_dam_type(&entry.entity_type)
                {
                    info!("Skipping station {} for {} (not a dam)", name, variable);
                    continue;
                }
                let entity = EntityRef {
                    kind: request.kind,
                    id: entry.id,
                };
                let rows = timed.series(col, None, entity, variable, source, run.run_id);
                records += write_series(repo, &rows, request.replace_existing).await?;
            }
        }
        ImportMode::MultiVariable => {
            let entity_id = request.entity_id.ok_or_else(|| {
                ImportError::bad_request("Station required for multi-variable mode")
            })?;
            let entity = resolve_entity(repo, request.kind, entity_id).await?;
            let is_dam = match request.kind {
                EntityKind::Station => {
                    let station = repo.get_station(StationId::new(entity_id)).await?;
                    is_dam_type(&station.station_type)
                }
                EntityKind::Basin => true,
            };

            let mut variables: HashMap<String, String> = HashMap::new();
            for v in repo.list_variables().await? {
                variables.insert(v.code.to_lowercase(), v.code.clone());
                variables.insert(v.label.to_lowercase(), v.code);
            }

            for (col, name) in timed.data_columns() {
                let lowered = name.to_lowercase();
                let code = variables.get(&lowered).or_else(|| {
                    lowered
                        .split_once('(')
                        .and_then(|(head, _)| variables.get(head.trim()))
                });
                let Some(code) = code else {
                    continue;
                };
                if DAM_ONLY_VARIABLES.contains(&code.as_str()) && !is_dam {
                    continue;
                }
                let rows = timed.series(col, None, entity, code, source, run.run_id);
                records += write_series(repo, &rows, request.replace_existing).await?;
            }
        }
    }

    Ok(records)
}

// ==================== Manual editing ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointInput {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub quality_flag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub quality_flag: String,
    pub source_code: String,
    pub variable_code: String,
    pub variable_name: String,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSeries {
    pub variable_code: String,
    pub station_id: i64,
    pub data_count: usize,
    pub data: Vec<SeriesRow>,
}

/// One variable of one station, newest first.
pub async fn station_series<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: &str,
    station_id: i64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> ImportResult<StationSeries> {
    let entity = resolve_entity(repo, EntityKind::Station, station_id).await?;
    let (label, unit) = match repo.get_variable(variable_code).await? {
        Some(v) => (v.label, v.unit),
        None => (variable_code.to_string(), String::new()),
    };

    let query = MeasurementQuery {
        variable_codes: vec![variable_code.to_string()],
        start,
        end,
        order: TimeOrder::Descending,
        limit: Some(MANUAL_SERIES_LIMIT),
        ..MeasurementQuery::for_entity(entity)
    };
    let data: Vec<SeriesRow> = repo
        .query_measurements(&query)
        .await?
        .into_iter()
        .map(|m| SeriesRow {
            timestamp: m.time,
            value: m.value,
            quality_flag: m.qc_flag,
            source_code: m.source_code,
            variable_code: m.variable_code,
            variable_name: label.clone(),
            unit: unit.clone(),
        })
        .collect();

    Ok(StationSeries {
        variable_code: variable_code.to_string(),
        station_id,
        data_count: data.len(),
        data,
    })
}

/// Add or overwrite one observed point.
pub async fn add_point<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: &str,
    station_id: i64,
    point: &PointInput,
) -> ImportResult<()> {
    require_variable(repo, variable_code).await?;
    let entity = resolve_entity(repo, EntityKind::Station, station_id).await?;
    repo.upsert_measurements(&[Measurement {
        time: point.timestamp,
        entity,
        variable_code: variable_code.to_string(),
        source_code: "OBS".to_string(),
        run_id: None,
        value: point.value,
        qc_flag: point
            .quality_flag
            .clone()
            .unwrap_or_else(|| DEFAULT_QC_FLAG.to_string()),
    }])
    .await?;
    Ok(())
}

/// Delete every point of one variable of one station at `time`.
pub async fn delete_point<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: &str,
    station_id: i64,
    time: DateTime<Utc>,
) -> ImportResult<usize> {
    let entity = EntityRef::station(StationId::new(station_id));
    let deleted = repo.delete_measurement(entity, variable_code, time).await?;
    if deleted == 0 {
        return Err(ImportError::not_found("Measurement not found"));
    }
    Ok(deleted)
}

/// Delete the whole series of one variable of one station.
pub async fn delete_series<R: FullRepository + ?Sized>(
    repo: &R,
    variable_code: &str,
    station_id: i64,
) -> ImportResult<String> {
    require_variable(repo, variable_code).await?;
    let entity = EntityRef::station(StationId::new(station_id));
    let deleted = repo.delete_variable_series(entity, variable_code).await?;
    Ok(format!(
        "Deleted {} measurements for variable {}",
        deleted, variable_code
    ))
}

#[cfg(test)]
#[path = "timeseries_tests.rs"]
mod timeseries_tests;
