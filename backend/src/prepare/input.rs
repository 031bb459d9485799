//! Raw input readers.
//!
//! Observed exports come as a time column followed by one column per
//! station. They are melted into [`RawPoint`]s keyed by the column label
//! (or a station code when the workbook carries a code row). Model runs come
//! as a long `;` CSV with one row per station and time step.

use std::path::Path;

use serde_json::{json, Map, Value};

use super::error::{PrepareError, PrepareResult};
use super::normalize::normalize_label;
use crate::services::tabular::{read_csv, read_html_table, read_workbook, Cell, Sheet};

/// One input cell before station mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPoint {
    pub time: Cell,
    pub column: String,
    /// Code given by the input itself (code row of layout A).
    pub code: Option<i64>,
    pub value: Cell,
}

#[derive(Debug, Clone, Default)]
pub struct RawInput {
    pub points: Vec<RawPoint>,
    /// Metric columns in file order.
    pub columns: Vec<String>,
    pub format: &'static str,
    pub warnings: Vec<String>,
}

impl RawInput {
    pub fn stats(&self) -> Map<String, Value> {
        let mut stats = Map::new();
        stats.insert("input_format".into(), json!(self.format));
        stats.insert("input_rows_raw".into(), json!(self.points.len()));
        stats.insert("input_station_cols_raw".into(), json!(self.columns.len()));
        stats
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Read an observed export: HTML `.xls`, `.xlsx` (sheet `sheet_name`, or the
/// first sheet when `None`) or CSV.
pub fn read_wide_input(
    path: &Path,
    bytes: &[u8],
    sheet_name: Option<&str>,
    csv_delimiter: Option<u8>,
) -> PrepareResult<RawInput> {
    match extension(path).as_str() {
        "xls" => {
            let sheet = read_html_table(bytes)?;
            melt_header_layout(&sheet, "html_xls", true)
        }
        "xlsx" | "xlsm" => {
            let sheets = read_workbook(bytes)?;
            let sheet = match sheet_name {
                Some(name) => sheets.iter().find(|s| s.name == name).ok_or_else(|| {
                    PrepareError::invalid_input(format!("Input sheet not found: {}", name))
                })?,
                None => sheets
                    .first()
                    .ok_or_else(|| PrepareError::invalid_input("Input workbook has no sheet"))?,
            };
            if normalize_label(&sheet.cell(0, 0).text()) == "code" {
                Ok(melt_code_layout(sheet))
            } else {
                let mut input = melt_header_layout(sheet, "xlsx", false)?;
                input.warnings.push(
                    "Excel DataTable has no code row; station mapping will rely on station names."
                        .to_string(),
                );
                Ok(input)
            }
        }
        "csv" => {
            let sheet = read_csv(bytes, csv_delimiter)?;
            melt_header_layout(&sheet, "csv", false)
        }
        other => Err(PrepareError::invalid_input(format!(
            "Unsupported input format: .{}",
            other
        ))),
    }
}

/// Layout A: row 1 `code` + station codes, row 2 labels, data from row 3.
fn melt_code_layout(sheet: &Sheet) -> RawInput {
    let width = sheet.width();
    let meta: Vec<(usize, Option<i64>, String)> = (1..width)
        .map(|col| {
            let code = sheet.cell(0, col).as_f64().map(|v| v.trunc() as i64);
            (col, code, sheet.cell(1, col).text())
        })
        .collect();

    let mut points = Vec::new();
    for row in 2..sheet.rows.len() {
        let time = sheet.cell(row, 0);
        if time.is_empty() {
            continue;
        }
        for (col, code, label) in &meta {
            if code.is_none() {
                continue;
            }
            points.push(RawPoint {
                time: time.clone(),
                column: label.clone(),
                code: *code,
                value: sheet.cell(row, *col).clone(),
            });
        }
    }
    RawInput {
        points,
        columns: meta
            .into_iter()
            .filter(|(_, code, _)| code.is_some())
            .map(|(_, _, label)| label)
            .collect(),
        format: "xlsx_code_row",
        warnings: Vec::new(),
    }
}

/// Layout B: header on row 1, data below. `strict_width` drops rows whose
/// cell count differs from the header's.
fn melt_header_layout(
    sheet: &Sheet,
    format: &'static str,
    strict_width: bool,
) -> PrepareResult<RawInput> {
    let header = sheet
        .rows
        .first()
        .ok_or_else(|| PrepareError::invalid_input("Input has no header row"))?;
    if header.len() < 2 {
        return Err(PrepareError::invalid_input(
            "Input needs one datetime column and at least one station column",
        ));
    }
    let columns: Vec<String> = header.iter().skip(1).map(Cell::text).collect();

    let mut points = Vec::new();
    for row in sheet.rows.iter().skip(1) {
        if strict_width && row.len() != header.len() {
            continue;
        }
        let time = row.first().cloned().unwrap_or_default();
        if time.is_empty() {
            continue;
        }
        for (idx, column) in columns.iter().enumerate() {
            points.push(RawPoint {
                time: time.clone(),
                column: column.clone(),
                code: None,
                value: row.get(idx + 1).cloned().unwrap_or_default(),
            });
        }
    }
    Ok(RawInput {
        points,
        columns,
        format,
        warnings: Vec::new(),
    })
}

/// Columns of a model run CSV.
pub const MODEL_COLUMNS: [&str; 6] = ["time", "echance", "station_id", "name", "station_name", "rr"];

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRow {
    pub time: Cell,
    pub station_id: Cell,
    pub rr: Cell,
}

/// Read a `;` separated model run. Every column of [`MODEL_COLUMNS`] must exist.
pub fn read_model_csv(bytes: &[u8]) -> PrepareResult<Vec<ModelRow>> {
    let sheet = read_csv(bytes, Some(b';'))?;
    let header: Vec<String> = sheet
        .rows
        .first()
        .map(|r| r.iter().map(Cell::text).collect())
        .unwrap_or_default();

    let missing: Vec<&str> = MODEL_COLUMNS
        .iter()
        .copied()
        .filter(|c| !header.iter().any(|h| h == c))
        .collect();
    if !missing.is_empty() {
        return Err(PrepareError::invalid_input(format!(
            "Missing required columns: {:?}",
            missing
        )));
    }
    let position = |name: &str| header.iter().position(|h| h == name).unwrap_or(0);
    let (time, station, rr) = (position("time"), position("station_id"), position("rr"));

    Ok(sheet
        .rows
        .iter()
        .skip(1)
        .map(|row| {
            let at = |col: usize| row.get(col).cloned().unwrap_or_default();
            ModelRow {
                time: at(time),
                station_id: at(station),
                rr: at(rr),
            }
        })
        .collect())
}

/// Classification of volume export columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeColumns {
    pub kept: Vec<String>,
    pub rate: Vec<String>,
    pub other: Vec<String>,
}

/// Keep the volume columns of a reservoir export; fill-rate columns
/// (`remplissage`, `taux`, `%`) and anything else are reported and dropped.
pub fn select_volume_columns(input: &mut RawInput) -> PrepareResult<VolumeColumns> {
    let mut split = VolumeColumns::default();
    for column in &input.columns {
        let normalized = normalize_label(column);
        if normalized.contains("remplissage") || normalized.contains("taux") || column.contains('%')
        {
            split.rate.push(column.clone());
        } else if normalized.contains("volume") {
            split.kept.push(column.clone());
        } else {
            split.other.push(column.clone());
        }
    }

    if !split.rate.is_empty() {
        input.warnings.push(format!(
            "Rate/fill columns ignored for now: {}",
            split.rate.join(", ")
        ));
    }
    if !split.other.is_empty() {
        input
            .warnings
            .push(format!("Non-volume columns ignored: {}", split.other.join(", ")));
    }
    if split.kept.is_empty() {
        return Err(PrepareError::invalid_input("No volume column detected in input"));
    }

    input.points.retain(|p| split.kept.contains(&p.column));
    input.columns = split.kept.clone();
    Ok(split)
}
