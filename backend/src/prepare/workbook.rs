//! Template workbook: read with calamine, written back with rust_xlsxwriter.
//!
//! Only cell values survive the round trip. The data sheet gets its header
//! row rewritten and its data region replaced by the prepared matrix.

use std::path::Path;

use rust_xlsxwriter::{Workbook, Worksheet};
use serde_json::{json, Map, Value};

use super::catalog::HEADER_ROW;
use super::error::{PrepareError, PrepareResult};
use super::series::Matrix;
use crate::services::tabular::{read_workbook, Cell, Sheet};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone)]
pub struct TemplateBook {
    pub sheets: Vec<Sheet>,
}

impl TemplateBook {
    pub fn read(bytes: &[u8]) -> PrepareResult<Self> {
        Ok(TemplateBook {
            sheets: read_workbook(bytes)?,
        })
    }

    pub fn sheet(&self, name: &str) -> PrepareResult<&Sheet> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| PrepareError::SheetNotFound(name.to_string()))
    }

    /// Write the template to `path` with `matrix` in `data_sheet`.
    /// `data_start_row` is 1-based. Returns the write statistics.
    pub fn write_with_matrix(
        &self,
        path: &Path,
        data_sheet: &str,
        matrix: &Matrix,
        data_start_row: u32,
    ) -> PrepareResult<Map<String, Value>> {
        self.sheet(data_sheet)?;
        let first_row = data_start_row.saturating_sub(1) as usize;
        let cleared_cols = matrix.codes.len() + 1;

        let mut workbook = Workbook::new();
        for sheet in &self.sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;

            let is_data = sheet.name == data_sheet;
            for (r, row) in sheet.rows.iter().enumerate() {
                for (c, cell) in row.iter().enumerate() {
                    let replaced = is_data
                        && ((r == HEADER_ROW && c < cleared_cols)
                            || (r >= first_row && c < cleared_cols));
                    if !replaced {
                        write_cell(worksheet, r as u32, c as u16, cell)?;
                    }
                }
            }

            if is_data {
                write_matrix(worksheet, matrix, first_row as u32)?;
            }
        }
        workbook.save(path)?;

        let written = matrix.times.len() as u32;
        let mut stats = Map::new();
        stats.insert("written_rows".into(), json!(written));
        stats.insert("written_station_columns".into(), json!(matrix.codes.len()));
        stats.insert("first_output_row".into(), json!(data_start_row));
        stats.insert(
            "last_output_row".into(),
            json!((data_start_row + written).saturating_sub(1)),
        );
        Ok(stats)
    }
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, cell: &Cell) -> PrepareResult<()> {
    match cell {
        Cell::Empty => {}
        Cell::Number(v) => {
            worksheet.write_number(row, col, *v)?;
        }
        Cell::Text(s) => {
            worksheet.write_string(row, col, s)?;
        }
        Cell::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Cell::DateTime(dt) => {
            worksheet.write_string(row, col, dt.format(TIMESTAMP_FORMAT).to_string())?;
        }
    }
    Ok(())
}

fn write_matrix(worksheet: &mut Worksheet, matrix: &Matrix, first_row: u32) -> PrepareResult<()> {
    worksheet.write_string(HEADER_ROW as u32, 0, "timestamp")?;
    for (i, code) in matrix.codes.iter().enumerate() {
        worksheet.write_number(HEADER_ROW as u32, (i + 1) as u16, *code as f64)?;
    }
    for (offset, (time, values)) in matrix.times.iter().zip(&matrix.values).enumerate() {
        let row = first_row + offset as u32;
        worksheet.write_string(row, 0, time.format(TIMESTAMP_FORMAT).to_string())?;
        for (i, value) in values.iter().enumerate() {
            if let Some(v) = value {
                worksheet.write_number(row, (i + 1) as u16, *v)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn template_bytes() -> Vec<u8> {
        let mut workbook = Workbook::new();
        let data = workbook.add_worksheet();
        data.set_name("Données").unwrap();
        data.write_string(0, 0, "Pluie horaire").unwrap();
        data.write_string(2, 0, "timestamp").unwrap();
        data.write_number(2, 1, 101.0).unwrap();
        data.write_string(3, 0, "2023-01-01T00:00:00").unwrap();
        data.write_number(3, 1, 9.0).unwrap();
        data.write_string(3, 4, "note").unwrap();
        let stations = workbook.add_worksheet();
        stations.set_name("Stations").unwrap();
        stations.write_string(0, 0, "code").unwrap();
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_missing_sheet() {
        let book = TemplateBook::read(&template_bytes()).unwrap();
        let err = book.sheet("Data").unwrap_err();
        assert_eq!(err.to_string(), "Template sheet not found: Data");
    }

    #[test]
    fn test_matrix_replaces_data_region() {
        let book = TemplateBook::read(&template_bytes()).unwrap();
        let t0 = NaiveDate::from_ymd_opt(2024, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let matrix = Matrix {
            times: vec![t0, t0 + chrono::Duration::hours(1)],
            codes: vec![101, 205],
            values: vec![vec![Some(1.5), None], vec![Some(0.0), Some(2.0)]],
        };

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.xlsx");
        let stats = book.write_with_matrix(&out, "Données", &matrix, 4).unwrap();
        assert_eq!(stats["last_output_row"], 5);

        let written = TemplateBook::read(&std::fs::read(&out).unwrap()).unwrap();
        let data = written.sheet("Données").unwrap();
        assert_eq!(data.cell(0, 0).text(), "Pluie horaire");
        assert_eq!(data.cell(2, 2), &Cell::Number(205.0));
        assert_eq!(data.cell(3, 0).text(), "2024-02-01T00:00:00");
        assert_eq!(data.cell(3, 1), &Cell::Number(1.5));
        assert!(data.cell(3, 2).is_empty());
        assert_eq!(data.cell(3, 4).text(), "note");
        assert_eq!(data.cell(4, 2), &Cell::Number(2.0));
        assert!(written.sheet("Stations").is_ok());
    }
}
