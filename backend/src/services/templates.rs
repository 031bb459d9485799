//! Pre-filled xlsx import templates.
//!
//! Every template has a `Données` sheet laid out as:
//!
//! ```text
//! row 1   information line (station / variable)
//! row 2   expected format
//! row 3   headers
//! row 4+  three example timestamps: today, yesterday, the day before, at midnight
//! ```

use chrono::{Duration, NaiveDate};
use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet};

use super::error::{ImportError, ImportResult};
use crate::api::{Station, StationId, Variable};
use crate::db::repository::FullRepository;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const DATA_SHEET: &str = "Données";
const EXAMPLE_ROWS: i64 = 3;
const TEMPLATE_STATION_LIMIT: usize = 10_000;

/// A generated workbook ready to be sent as an attachment.
#[derive(Debug, Clone)]
pub struct TemplateFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Simple,
    MultiVariable,
    MultiStation,
}

impl std::str::FromStr for TemplateKind {
    type Err = ImportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(TemplateKind::Simple),
            "multi_variable" => Ok(TemplateKind::MultiVariable),
            "multi_station" => Ok(TemplateKind::MultiStation),
            other => Err(ImportError::bad_request(format!(
                "Unknown template type: {}",
                other
            ))),
        }
    }
}

struct Styles {
    title: Format,
    info: Format,
    header: Format,
}

impl Styles {
    fn new() -> Self {
        let info_fill = Color::RGB(0xE8F4FD);
        Styles {
            title: Format::new()
                .set_bold()
                .set_font_size(12)
                .set_background_color(info_fill),
            info: Format::new().set_background_color(info_fill),
            header: Format::new()
                .set_bold()
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(0x1E3A5F))
                .set_align(FormatAlign::Center)
                .set_text_wrap(),
        }
    }
}

/// Text across columns `0..=last_col` of `row`, merged when wider than one cell.
fn banner(
    sheet: &mut Worksheet,
    row: u32,
    last_col: u16,
    text: &str,
    format: &Format,
) -> ImportResult<()> {
    if last_col > 0 {
        sheet.merge_range(row, 0, row, last_col, text, format)?;
    } else {
        sheet.write_string_with_format(row, 0, text, format)?;
    }
    Ok(())
}

fn example_rows(sheet: &mut Worksheet, today: NaiveDate, extra: &[&str]) -> ImportResult<()> {
    for i in 0..EXAMPLE_ROWS {
        let row = 3 + i as u32;
        let day = today - Duration::days(i);
        let stamp = format!("{}T00:00:00", day.format("%Y-%m-%d"));
        sheet.write_string(row, 0, &stamp)?;
        for (j, value) in extra.iter().enumerate() {
            if !value.is_empty() {
                sheet.write_string(row, 2 + j as u16, *value)?;
            }
        }
    }
    Ok(())
}

fn data_sheet<'a>(workbook: &'a mut Workbook) -> ImportResult<&'a mut Worksheet> {
    let sheet = workbook.add_worksheet();
    sheet.set_name(DATA_SHEET)?;
    Ok(sheet)
}

/// One station, one variable: `timestamp, value, quality_flag`.
pub fn simple_template(
    station_label: &str,
    variable_code: Option<&str>,
    variable_label: &str,
    today: NaiveDate,
) -> ImportResult<TemplateFile> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    let sheet = data_sheet(&mut workbook)?;

    banner(
        sheet,
        0,
        2,
        &format!("Station: {} | Variable: {}", station_label, variable_label),
        &styles.title,
    )?;
    banner(
        sheet,
        1,
        2,
        "Format: timestamp ISO8601, valeur numérique, flag qualité (good/suspect/bad)",
        &styles.info,
    )?;
    for (i, header) in ["timestamp", "value", "quality_flag"].iter().enumerate() {
        sheet.write_string_with_format(2, i as u16, *header, &styles.header)?;
        sheet.set_column_width(i as u16, if i == 0 { 22 } else { 15 })?;
    }
    example_rows(sheet, today, &["good"])?;

    Ok(TemplateFile {
        filename: format!(
            "template_simple_{}_{}.xlsx",
            station_label,
            variable_code.unwrap_or("variable")
        ),
        bytes: workbook.save_to_buffer()?,
    })
}

/// One station, one column per variable, plus a `Variables` legend sheet.
pub fn multi_variable_template(
    station_name: &str,
    station_code: &str,
    variables: &[Variable],
    today: NaiveDate,
) -> ImportResult<TemplateFile> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    let last_col = variables.len() as u16;

    let sheet = data_sheet(&mut workbook)?;
    banner(
        sheet,
        0,
        last_col,
        &format!("Station: {} ({})", station_name, station_code),
        &styles.title,
    )?;
    banner(
        sheet,
        1,
        last_col,
        "Format: timestamp ISO8601 (YYYY-MM-DDTHH:MM:SS), valeurs numériques par colonne variable",
        &styles.info,
    )?;
    sheet.write_string_with_format(2, 0, "timestamp", &styles.header)?;
    sheet.set_column_width(0, 22)?;
    for (i, variable) in variables.iter().enumerate() {
        let col = 1 + i as u16;
        let header = format!("{}\n({})", variable.code, variable.unit);
        sheet.write_string_with_format(2, col, &header, &styles.header)?;
        sheet.set_column_width(col, 16)?;
    }
    sheet.set_row_height(2, 35)?;
    example_rows(sheet, today, &[])?;

    let legend = workbook.add_worksheet();
    legend.set_name("Variables")?;
    for (col, title) in ["Code", "Label", "Unité"].iter().enumerate() {
        legend.write_string(0, col as u16, *title)?;
    }
    for (i, variable) in variables.iter().enumerate() {
        let row = 1 + i as u32;
        legend.write_string(row, 0, &variable.code)?;
        legend.write_string(row, 1, &variable.label)?;
        legend.write_string(row, 2, &variable.unit)?;
    }

    Ok(TemplateFile {
        filename: format!("template_multi_variable_{}.xlsx", station_code),
        bytes: workbook.save_to_buffer()?,
    })
}

/// One variable, one column per station code, plus a `Stations` legend sheet.
pub fn multi_station_template(
    variable_code: Option<&str>,
    variable_label: &str,
    variable_unit: &str,
    stations: &[Station],
    today: NaiveDate,
) -> ImportResult<TemplateFile> {
    let styles = Styles::new();
    let mut workbook = Workbook::new();
    let last_col = stations.len() as u16;

    let sheet = data_sheet(&mut workbook)?;
    banner(
        sheet,
        0,
        last_col,
        &format!("Variable: {} ({})", variable_label, variable_unit),
        &styles.title,
    )?;
    banner(
        sheet,
        1,
        last_col,
        "Format: timestamp ISO8601 (YYYY-MM-DDTHH:MM:SS), valeurs numériques par colonne station (code station en entête)",
        &styles.info,
    )?;
    sheet.write_string_with_format(2, 0, "timestamp", &styles.header)?;
    sheet.set_column_width(0, 22)?;
    for (i, station) in stations.iter().enumerate() {
        let col = 1 + i as u16;
        let header = if station.code.is_empty() {
            &station.name
        } else {
            &station.code
        };
        sheet.write_string_with_format(2, col, header, &styles.header)?;
        sheet.set_column_width(col, 16)?;
    }
    sheet.set_row_height(2, 35)?;
    example_rows(sheet, today, &[])?;

    let legend = workbook.add_worksheet();
    legend.set_name("Stations")?;
    legend.write_string(0, 0, "Code")?;
    legend.write_string(0, 1, "Nom")?;
    for (i, station) in stations.iter().enumerate() {
        let row = 1 + i as u32;
        legend.write_string(row, 0, &station.code)?;
        legend.write_string(row, 1, &station.name)?;
    }

    Ok(TemplateFile {
        filename: format!(
            "template_multi_station_{}.xlsx",
            variable_code.unwrap_or("variable")
        ),
        bytes: workbook.save_to_buffer()?,
    })
}

/// Resolve names from the repository and build the requested template.
///
/// Unknown stations or variables fall back to placeholder labels so a
/// template can always be downloaded.
pub async fn build_template<R: FullRepository + ?Sized>(
    repo: &R,
    kind: TemplateKind,
    station_id: Option<i64>,
    variable_code: Option<&str>,
    today: NaiveDate,
) -> ImportResult<TemplateFile> {
    let station = match station_id {
        Some(id) => repo.get_station(StationId::new(id)).await.ok(),
        None => None,
    };
    let variable = match variable_code {
        Some(code) => repo.get_variable(code).await?,
        None => None,
    };

    match kind {
        TemplateKind::Simple => {
            let station_label = station
                .as_ref()
                .map(|s| s.code.clone())
                .unwrap_or_else(|| "STATION_CODE".to_string());
            let variable_label = match (&variable, variable_code) {
                (Some(v), _) => format!("{} ({})", v.label, v.unit),
                (None, Some(code)) => code.to_string(),
                (None, None) => "VARIABLE".to_string(),
            };
            simple_template(&station_label, variable_code, &variable_label, today)
        }
        TemplateKind::MultiVariable => {
            let (name, code) = station
                .as_ref()
                .map(|s| (s.name.clone(), s.code.clone()))
                .unwrap_or_else(|| ("STATION".to_string(), "CODE".to_string()));
            let variables = repo.list_variables().await?;
            multi_variable_template(&name, &code, &variables, today)
        }
        TemplateKind::MultiStation => {
            let (label, unit) = match (&variable, variable_code) {
                (Some(v), _) => (v.label.clone(), v.unit.clone()),
                (None, Some(code)) => (code.to_string(), String::new()),
                (None, None) => ("VARIABLE".to_string(), String::new()),
            };
            let mut stations = repo.list_stations(0, TEMPLATE_STATION_LIMIT).await?;
            stations.sort_by(|a, b| a.name.cmp(&b.name));
            multi_station_template(variable_code, &label, &unit, &stations, today)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::default_variables;
    use crate::db::repositories::LocalRepository;
    use crate::services::tabular::{read_workbook, Cell};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_simple_template_layout() {
        let file = simple_template("P1", Some("precip_mm"), "Précipitations (mm)", today()).unwrap();
        assert_eq!(file.filename, "template_simple_P1_precip_mm.xlsx");

        let sheets = read_workbook(&file.bytes).unwrap();
        let data = &sheets[0];
        assert_eq!(data.name, "Données");
        assert_eq!(
            data.cell(0, 0).text(),
            "Station: P1 | Variable: Précipitations (mm)"
        );
        assert_eq!(data.cell(2, 2).text(), "quality_flag");
        assert_eq!(data.cell(3, 0).text(), "2024-03-15T00:00:00");
        assert_eq!(data.cell(5, 0).text(), "2024-03-13T00:00:00");
        assert_eq!(data.cell(4, 2), &Cell::Text("good".into()));
        assert!(data.cell(3, 1).is_empty());
    }

    #[test]
    fn test_multi_variable_template_headers() {
        let variables = default_variables();
        let file = multi_variable_template("Fès", "P1", &variables, today()).unwrap();
        let sheets = read_workbook(&file.bytes).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].cell(2, 1).text(), "precip_mm\n(mm)");
        assert_eq!(sheets[1].name, "Variables");
        assert_eq!(sheets[1].cell(0, 2).text(), "Unité");
        assert_eq!(sheets[1].rows.len(), variables.len() + 1);
    }

    #[tokio::test]
    async fn test_build_template_with_placeholders() {
        let repo = LocalRepository::new();
        let file = build_template(&repo, TemplateKind::MultiStation, None, None, today())
            .await
            .unwrap();
        assert_eq!(file.filename, "template_multi_station_variable.xlsx");
        let sheets = read_workbook(&file.bytes).unwrap();
        assert_eq!(sheets[1].name, "Stations");
        assert_eq!(sheets[0].cell(2, 0).text(), "timestamp");

        let simple = build_template(&repo, TemplateKind::Simple, Some(99), None, today())
            .await
            .unwrap();
        assert_eq!(simple.filename, "template_simple_STATION_CODE_variable.xlsx");
    }
}
