//! Spatial import of stations and basins from GeoJSON.
//!
//! The upload is a FeatureCollection. Feature properties play the role of
//! attribute columns: the code, name, type and basin columns are detected by
//! name unless the caller supplies an explicit mapping.

use std::collections::HashMap;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use super::error::{ImportError, ImportResult};
use super::tabular::clean_header;
use crate::api::{
    BasinId, EntityKind, NewBasin, NewStation, STATION_TYPE_DAM, STATION_TYPE_HYDRO,
    STATION_TYPE_RAIN, STATION_TYPE_RESULT,
};
use crate::db::repository::FullRepository;

const CODE_COLUMNS: [&str; 3] = ["code", "id", "identifiant"];
const NAME_COLUMNS: [&str; 3] = ["name", "nom", "label"];
const TYPE_COLUMNS: [&str; 5] = ["station_type", "type_station", "type_statt", "genre", "type"];
const BASIN_COLUMNS: [&str; 4] = ["basin", "bassin", "bassin_versant", "bv"];
const LEVEL_COLUMNS: [&str; 2] = ["level", "niveau"];
const BASIN_LOOKUP_LIMIT: usize = 100_000;

/// Explicit column choices sent by the admin UI as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ColumnMapping {
    pub code: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub station_type: Option<String>,
    pub basin: Option<String>,
    pub force_type: Option<String>,
}

impl ColumnMapping {
    /// Malformed mappings are ignored and detection applies.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str(raw) {
            Ok(mapping) => mapping,
            Err(e) => {
                warn!("Ignoring invalid column mapping: {}", e);
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeoUploadRequest {
    pub dry_run: bool,
    pub kind: EntityKind,
    pub replace_mode: bool,
    pub column_mapping: Option<String>,
    pub force_type: Option<String>,
}

impl Default for GeoUploadRequest {
    fn default() -> Self {
        GeoUploadRequest {
            dry_run: true,
            kind: EntityKind::Station,
            replace_mode: false,
            column_mapping: None,
            force_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoUploadOutcome {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<usize>,
}

struct Feature {
    properties: HashMap<String, Value>,
    geometry: Option<Value>,
}

impl Feature {
    fn text(&self, column: &str) -> Option<String> {
        let value = match self.properties.get(column)? {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            other => clean_header(&other.to_string()),
        };
        (!value.is_empty()).then_some(value)
    }

    /// `(lat, lon)` of a Point geometry.
    fn point(&self) -> Option<(f64, f64)> {
        let geometry = self.geometry.as_ref()?;
        if geometry.get("type")?.as_str()? != "Point" {
            return None;
        }
        let coords = geometry.get("coordinates")?.as_array()?;
        let lon = coords.first()?.as_f64()?;
        let lat = coords.get(1)?.as_f64()?;
        Some((lat, lon))
    }
}

/// Parsed document plus its features and original property names.
struct GeoDocument {
    raw: Value,
    features: Vec<Feature>,
    columns: Vec<String>,
}

fn parse_document(bytes: &[u8]) -> ImportResult<GeoDocument> {
    let raw: Value = serde_json::from_slice(bytes)?;
    let items: Vec<Value> = match raw.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => raw
            .get("features")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        Some("Feature") => vec![raw.clone()],
        _ => {
            return Err(ImportError::bad_request(
                "GeoJSON must be a Feature or FeatureCollection",
            ))
        }
    };

    let mut columns: Vec<String> = Vec::new();
    let mut features = Vec::with_capacity(items.len());
    for item in items {
        let mut properties = HashMap::new();
        if let Some(Value::Object(props)) = item.get("properties") {
            for (key, value) in props {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
                properties.insert(key.to_lowercase(), value.clone());
            }
        }
        features.push(Feature {
            properties,
            geometry: item.get("geometry").filter(|g| !g.is_null()).cloned(),
        });
    }
    columns.push("geometry".to_string());

    Ok(GeoDocument {
        raw,
        features,
        columns,
    })
}

fn pick_column(mapped: Option<&String>, candidates: &[&str], columns: &[String]) -> Option<String> {
    if let Some(m) = mapped.filter(|m| !m.trim().is_empty()) {
        return Some(m.trim().to_lowercase());
    }
    candidates
        .iter()
        .find(|c| columns.iter().any(|col| col == *c))
        .map(|c| c.to_string())
}

/// Station type from a free-text attribute.
pub fn map_station_type(raw: &str) -> &'static str {
    let value = raw.trim().to_lowercase();
    if value.contains("pluvio") {
        STATION_TYPE_RAIN
    } else if value.contains("barrage") {
        STATION_TYPE_DAM
    } else if ["hydrologique", "limni", "hydro", "poste"]
        .iter()
        .any(|k| value.contains(k))
    {
        STATION_TYPE_HYDRO
    } else if value.contains("result") {
        STATION_TYPE_RESULT
    } else {
        STATION_TYPE_HYDRO
    }
}

/// Station type imposed on every feature. Unrecognised values are kept verbatim.
pub fn map_forced_type(forced: &str) -> String {
    let normalized: String = forced.nfc().collect();
    let value = normalized.trim().to_lowercase();
    if value.contains("pluvio") {
        STATION_TYPE_RAIN.to_string()
    } else if value.contains("barrage") {
        STATION_TYPE_DAM.to_string()
    } else if value.contains("result") {
        STATION_TYPE_RESULT.to_string()
    } else if value.contains("hydrologique") || value.contains("station") {
        STATION_TYPE_HYDRO.to_string()
    } else {
        normalized.trim().to_string()
    }
}

/// Parse a GeoJSON upload and, unless it is a dry run, write it.
pub async fn upload_geo<R: FullRepository + ?Sized>(
    repo: &R,
    filename: &str,
    bytes: &[u8],
    request: &GeoUploadRequest,
) -> ImportResult<GeoUploadOutcome> {
    let doc = parse_document(bytes)?;
    let count = doc.features.len();

    if request.dry_run {
        return Ok(GeoUploadOutcome {
            status: "success",
            message: format!("Parsed {} features from {}", count, filename),
            preview: Some(doc.raw),
            columns: Some(doc.columns),
            committed: None,
        });
    }

    let mapping = ColumnMapping::parse(request.column_mapping.as_deref());
    let columns: Vec<String> = doc.columns.iter().map(|c| c.to_lowercase()).collect();

    let code_col = pick_column(mapping.code.as_ref(), &CODE_COLUMNS, &columns).ok_or_else(|| {
        ImportError::bad_request(format!(
            "GeoJSON must have a 'code', 'id' or 'identifiant' column. Found: [{}]",
            columns.join(", ")
        ))
    })?;
    let name_col = pick_column(mapping.name.as_ref(), &NAME_COLUMNS, &columns);
    let type_col = pick_column(mapping.station_type.as_ref(), &TYPE_COLUMNS, &columns);
    let basin_col = pick_column(mapping.basin.as_ref(), &BASIN_COLUMNS, &columns);
    let level_col = pick_column(None, &LEVEL_COLUMNS, &columns);
    let forced = request
        .force_type
        .as_ref()
        .or(mapping.force_type.as_ref())
        .filter(|f| !f.trim().is_empty())
        .map(|f| map_forced_type(f));

    if request.replace_mode {
        let removed = match request.kind {
            EntityKind::Station => repo.truncate_stations().await?,
            EntityKind::Basin => repo.truncate_basins().await?,
        };
        info!("Replace mode: removed {} existing {}", removed, request.kind);
    }

    let basins: HashMap<String, BasinId> = match basin_col {
        Some(_) => repo
            .list_basins(0, BASIN_LOOKUP_LIMIT)
            .await?
            .into_iter()
            .flat_map(|b| [(b.code.clone(), b.id), (b.name.clone(), b.id)])
            .collect(),
        None => HashMap::new(),
    };

    let mut committed = 0;
    for feature in &doc.features {
        let Some(code) = feature.text(&code_col) else {
            warn!("Feature without '{}' skipped", code_col);
            continue;
        };
        let name = name_col
            .as_deref()
            .and_then(|c| feature.text(c))
            .unwrap_or_else(|| code.clone());

        match request.kind {
            EntityKind::Station => {
                let station_type = match (&forced, type_col.as_deref()) {
                    (Some(forced), _) => forced.clone(),
                    (None, Some(col)) => map_station_type(&feature.text(col).unwrap_or_default())
                        .to_string(),
                    (None, None) => STATION_TYPE_HYDRO.to_string(),
                };
                let basin_id = basin_col
                    .as_deref()
                    .and_then(|c| feature.text(c))
                    .and_then(|b| basins.get(&b).copied());
                let (lat, lon) = match feature.point() {
                    Some((lat, lon)) => (Some(lat), Some(lon)),
                    None => (None, None),
                };
                repo.upsert_station_by_code(&NewStation {
                    code,
                    name,
                    basin_id,
                    lat,
                    lon,
                    station_type: Some(station_type),
                })
                .await?;
            }
            EntityKind::Basin => {
                let level = level_col
                    .as_deref()
                    .and_then(|c| feature.text(c))
                    .and_then(|l| l.parse::<i32>().ok());
                let parent_basin_id = basin_col
                    .as_deref()
                    .and_then(|c| feature.text(c))
                    .and_then(|b| basins.get(&b).copied());
                repo.upsert_basin_by_code(&NewBasin {
                    code,
                    name,
                    level,
                    parent_basin_id,
                    geometry: feature.geometry.clone(),
                    color: None,
                })
                .await?;
            }
        }
        committed += 1;
    }

    info!("Committed {} of {} features to {}", committed, count, request.kind);
    Ok(GeoUploadOutcome {
        status: "success",
        message: format!("Successfully committed {} features to {}", committed, request.kind),
        preview: None,
        columns: None,
        committed: Some(committed),
    })
}
