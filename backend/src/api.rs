//! Public API surface for the Hydro Sentinel backend.
//!
//! Reference entities, measurements and the enums shared by the repository,
//! service and HTTP layers. All types derive Serialize/Deserialize for JSON
//! serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Station identifier (database primary key).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StationId(pub i64);

/// Basin identifier (database primary key).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BasinId(pub i64);

/// Run identifier (database primary key).
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl StationId {
    pub fn new(value: i64) -> Self {
        StationId(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl BasinId {
    pub fn new(value: i64) -> Self {
        BasinId(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl RunId {
    pub fn new(value: i64) -> Self {
        RunId(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for StationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for BasinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =========================================================
// Station types
// =========================================================

pub const STATION_TYPE_HYDRO: &str = "Station hydrologique";
pub const STATION_TYPE_RAIN: &str = "Poste Pluviométrique";
pub const STATION_TYPE_DAM: &str = "Barrage";
pub const STATION_TYPE_RESULT: &str = "point resultats";

/// Variables that only make sense on a dam.
pub const DAM_ONLY_VARIABLES: [&str; 5] = ["lacher_m3s", "volume_k", "cote_m", "lachers", "volume"];

/// Whether a station type string designates a dam.
pub fn is_dam_type(station_type: &str) -> bool {
    station_type.to_lowercase().contains("barrage")
}

// =========================================================
// Reference entities
// =========================================================

/// A monitored point: gauge, rain post or dam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub code: String,
    pub name: String,
    pub basin_id: Option<BasinId>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(rename = "type")]
    pub station_type: String,
    pub active: bool,
}

/// Fields accepted when creating a station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewStation {
    pub code: String,
    pub name: String,
    pub basin_id: Option<BasinId>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub station_type: Option<String>,
}

/// Partial station update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    /// `Some(None)` detaches the station from its basin.
    pub basin_id: Option<Option<BasinId>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub station_type: Option<String>,
    pub active: Option<bool>,
}

impl StationPatch {
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.name.is_none()
            && self.basin_id.is_none()
            && self.lat.is_none()
            && self.lon.is_none()
            && self.station_type.is_none()
            && self.active.is_none()
    }

    pub fn apply(&self, station: &mut Station) {
        if let Some(code) = &self.code {
            station.code = code.clone();
        }
        if let Some(name) = &self.name {
            station.name = name.clone();
        }
        if let Some(basin_id) = self.basin_id {
            station.basin_id = basin_id;
        }
        if let Some(lat) = self.lat {
            station.lat = Some(lat);
        }
        if let Some(lon) = self.lon {
            station.lon = Some(lon);
        }
        if let Some(station_type) = &self.station_type {
            station.station_type = station_type.clone();
        }
        if let Some(active) = self.active {
            station.active = active;
        }
    }
}

/// A watershed polygon, possibly nested in a parent basin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basin {
    pub id: BasinId,
    pub code: String,
    pub name: String,
    pub level: Option<i32>,
    pub parent_basin_id: Option<BasinId>,
    pub geometry: Option<serde_json::Value>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBasin {
    pub code: String,
    pub name: String,
    pub level: Option<i32>,
    pub parent_basin_id: Option<BasinId>,
    pub geometry: Option<serde_json::Value>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasinPatch {
    pub code: Option<String>,
    pub name: Option<String>,
    pub level: Option<i32>,
    pub parent_basin_id: Option<BasinId>,
    pub geometry: Option<serde_json::Value>,
    pub color: Option<String>,
}

impl BasinPatch {
    pub fn is_empty(&self) -> bool {
        self.code.is_none()
            && self.name.is_none()
            && self.level.is_none()
            && self.parent_basin_id.is_none()
            && self.geometry.is_none()
            && self.color.is_none()
    }

    pub fn apply(&self, basin: &mut Basin) {
        if let Some(code) = &self.code {
            basin.code = code.clone();
        }
        if let Some(name) = &self.name {
            basin.name = name.clone();
        }
        if let Some(level) = self.level {
            basin.level = Some(level);
        }
        if let Some(parent) = self.parent_basin_id {
            basin.parent_basin_id = Some(parent);
        }
        if let Some(geometry) = &self.geometry {
            basin.geometry = Some(geometry.clone());
        }
        if let Some(color) = &self.color {
            basin.color = Some(color.clone());
        }
    }
}

/// A measured quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub code: String,
    pub label: String,
    pub unit: String,
}

/// Provenance of a measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub code: String,
    pub label: String,
}

/// A model run or an import batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub label: String,
    pub source_code: String,
    pub run_time: DateTime<Utc>,
}

/// Reference variables present in every fresh database.
pub fn default_variables() -> Vec<Variable> {
    [
        ("precip_mm", "Précipitations", "mm"),
        ("debit_m3s", "Débit", "m3/s"),
        ("lacher_m3s", "Lâcher", "m3/s"),
        ("volume_hm3", "Volume", "hm3"),
        ("apport_m3s", "Apport", "m3/s"),
        ("cote_m", "Cote", "m"),
    ]
    .into_iter()
    .map(|(code, label, unit)| Variable {
        code: code.to_string(),
        label: label.to_string(),
        unit: unit.to_string(),
    })
    .collect()
}

/// Reference sources present in every fresh database.
pub fn default_sources() -> Vec<Source> {
    [
        ("OBS", "Observé"),
        ("AROME", "Prévision Arome"),
        ("ECMWF", "Prévision ECMWF"),
        ("SIM", "Simulé"),
        ("ABHS_RES", "Données ABH"),
    ]
    .into_iter()
    .map(|(code, label)| Source {
        code: code.to_string(),
        label: label.to_string(),
    })
    .collect()
}

// =========================================================
// Entity kinds
// =========================================================

/// Kind of entity a measurement is attached to.
#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum EntityKind {
    #[default]
    #[serde(rename = "stations")]
    Station,
    #[serde(rename = "bassins")]
    Basin,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Station => "stations",
            EntityKind::Basin => "bassins",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stations" => Ok(EntityKind::Station),
            "bassins" => Ok(EntityKind::Basin),
            other => Err(format!(
                "Invalid entity type: {}. Allowed: stations, bassins",
                other
            )),
        }
    }
}

/// Reference to a station or a basin.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    pub fn station(id: StationId) -> Self {
        EntityRef {
            kind: EntityKind::Station,
            id: id.value(),
        }
    }

    pub fn basin(id: BasinId) -> Self {
        EntityRef {
            kind: EntityKind::Basin,
            id: id.value(),
        }
    }
}

// =========================================================
// Measurements
// =========================================================

/// One value of one variable for one entity at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub time: DateTime<Utc>,
    pub entity: EntityRef,
    pub variable_code: String,
    pub source_code: String,
    pub run_id: Option<RunId>,
    pub value: f64,
    pub qc_flag: String,
}

impl Measurement {
    /// Natural key used by upserts.
    pub fn key(&self) -> MeasurementKey {
        MeasurementKey {
            time: self.time,
            entity: self.entity,
            variable_code: self.variable_code.clone(),
            source_code: self.source_code.clone(),
            run_id: self.run_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeasurementKey {
    pub time: DateTime<Utc>,
    pub entity: EntityRef,
    pub variable_code: String,
    pub source_code: String,
    pub run_id: Option<RunId>,
}

/// Sort direction for measurement queries.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TimeOrder {
    Ascending,
    #[default]
    Descending,
}

/// Filter for measurement queries. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementQuery {
    pub entity: Option<EntityRef>,
    pub entity_kind: Option<EntityKind>,
    pub variable_codes: Vec<String>,
    pub source_codes: Vec<String>,
    pub run_id: Option<RunId>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub order: TimeOrder,
    pub limit: Option<usize>,
}

impl MeasurementQuery {
    pub fn for_entity(entity: EntityRef) -> Self {
        MeasurementQuery {
            entity: Some(entity),
            ..Default::default()
        }
    }

    /// Whether a measurement passes every filter except ordering and limit.
    pub fn matches(&self, m: &Measurement) -> bool {
        if let Some(entity) = self.entity {
            if m.entity != entity {
                return false;
            }
        }
        if let Some(kind) = self.entity_kind {
            if m.entity.kind != kind {
                return false;
            }
        }
        if !self.variable_codes.is_empty() && !self.variable_codes.contains(&m.variable_code) {
            return false;
        }
        if !self.source_codes.is_empty() && !self.source_codes.contains(&m.source_code) {
            return false;
        }
        if let Some(run_id) = self.run_id {
            if m.run_id != Some(run_id) {
                return false;
            }
        }
        if let Some(start) = self.start {
            if m.time < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if m.time > end {
                return false;
            }
        }
        true
    }
}

/// Record count and time span of one (entity, variable, source) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesCoverage {
    pub entity: EntityRef,
    pub variable_code: String,
    pub source_code: String,
    pub record_count: i64,
    pub first_record: DateTime<Utc>,
    pub last_record: DateTime<Utc>,
}

// =========================================================
// Severity
// =========================================================

/// Alert level of a station over the last 24 hours.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Ok,
    VigilancePluie,
    AlertePluie,
    AlerteDebit,
    AlerteLacher,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::VigilancePluie => "VIGILANCE_PLUIE",
            Severity::AlertePluie => "ALERTE_PLUIE",
            Severity::AlerteDebit => "ALERTE_DEBIT",
            Severity::AlerteLacher => "ALERTE_LACHER",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =========================================================
// Ingestion history
// =========================================================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IngestionStatus {
    Running,
    Success,
    Failed,
}

impl IngestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestionStatus::Running => "RUNNING",
            IngestionStatus::Success => "SUCCESS",
            IngestionStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for IngestionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Ok(IngestionStatus::Running),
            "SUCCESS" => Ok(IngestionStatus::Success),
            "FAILED" => Ok(IngestionStatus::Failed),
            _ => Err(format!("Unknown ingestion status: {}", s)),
        }
    }
}

/// One row of the ingestion history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
    pub ingestion_id: i64,
    pub pipeline_name: String,
    pub status: IngestionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub file_checksum: Option<String>,
    pub summary: serde_json::Value,
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod api_tests;
