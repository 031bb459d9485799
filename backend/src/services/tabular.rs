//! Cell grids read from uploaded spreadsheets.
//!
//! Every reader produces the same shape, a list of [`Sheet`]s holding rows of
//! [`Cell`]s, so the import and preparation code never cares whether a file
//! was xlsx, CSV or an HTML table saved with an `.xls` extension.
//!
//! ```text
//! bytes ──┬── .csv ───────────── csv (`;` or `,` sniffed) ──┐
//!         ├── .xls (HTML) ────── regex table scrape ────────┼──► Vec<Sheet> ──► Table
//!         └── .xlsx/.xls/.ods ── calamine ──────────────────┘
//! ```

use std::fmt;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

use super::error::{ImportError, ImportResult};

/// Cell values after loading, independent of the file format.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric value; text accepts a decimal comma.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) if v.is_finite() => Some(*v),
            Cell::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Timestamp value, text parsed day-first. Aware inputs are shifted to UTC.
    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Cell::DateTime(dt) => Some(*dt),
            Cell::Text(s) => parse_timestamp(s),
            _ => None,
        }
    }

    pub fn text(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Number(v) if v.fract() == 0.0 && v.abs() < 1e15 => write!(f, "{}", *v as i64),
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => f.write_str(s.trim()),
            Cell::Bool(b) => write!(f, "{}", b),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// Parse `12.5`, `12,5`, ` 1 234,5 ` or `1.234,5`; empty and non-numeric text give `None`.
pub fn parse_number(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // with both separators present, the last one is the decimal mark
    let normalised = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned.replace(',', ""),
    };
    normalised.parse::<f64>().ok().filter(|v| v.is_finite())
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Parse the timestamp spellings found in station exports, day first.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let s = text.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(aware) = DateTime::parse_from_rfc3339(s) {
        return Some(aware.naive_utc());
    }
    if let Ok(aware) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(aware.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

static EMPTY_CELL: Cell = Cell::Empty;

/// One worksheet as absolute rows (row 0 is spreadsheet row 1).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY_CELL)
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }
}

// ==================== Readers ====================

fn extension(filename: &str) -> String {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default()
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(2048)]).to_lowercase();
    let trimmed = head.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with('<') && (head.contains("<table") || head.contains("<html"))
}

/// Read every sheet of an uploaded file, dispatching on its extension.
pub fn read_sheets(filename: &str, bytes: &[u8]) -> ImportResult<Vec<Sheet>> {
    match extension(filename).as_str() {
        "csv" | "txt" => Ok(vec![read_csv(bytes, None)?]),
        "xls" | "htm" | "html" if looks_like_html(bytes) => Ok(vec![read_html_table(bytes)?]),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook(bytes),
        other => Err(ImportError::UnsupportedFormat(if other.is_empty() {
            filename.to_string()
        } else {
            format!(".{}", other)
        })),
    }
}

fn convert(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) => {
            if s.trim().is_empty() {
                Cell::Empty
            } else {
                Cell::Text(s.clone())
            }
        }
        Data::DateTime(_) | Data::DateTimeIso(_) => match data.as_datetime() {
            Some(dt) => Cell::DateTime(dt),
            None => Cell::Text(data.to_string()),
        },
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

/// Read an xlsx/xls/ods workbook. Cell positions are absolute.
pub fn read_workbook(bytes: &[u8]) -> ImportResult<Vec<Sheet>> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name)?;
        let (row0, col0) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row0];
        for source_row in range.rows() {
            let mut row = vec![Cell::Empty; col0];
            row.extend(source_row.iter().map(convert));
            while row.last().is_some_and(Cell::is_empty) {
                row.pop();
            }
            rows.push(row);
        }
        sheets.push(Sheet { name, rows });
    }
    Ok(sheets)
}

/// Pick `;` when the first line has more semicolons than commas.
pub fn sniff_delimiter(text: &str) -> u8 {
    let first = text.lines().next().unwrap_or_default();
    let semicolons = first.matches(';').count();
    let commas = first.matches(',').count();
    if semicolons > 0 && semicolons >= commas {
        b';'
    } else {
        b','
    }
}

/// Read a CSV file into a single sheet named `csv`. Every value stays text.
pub fn read_csv(bytes: &[u8], delimiter: Option<u8>) -> ImportResult<Sheet> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}');
    let delimiter = delimiter.unwrap_or_else(|| sniff_delimiter(text));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Cell> = record
            .iter()
            .map(|v| {
                if v.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(v.trim().to_string())
                }
            })
            .collect();
        rows.push(row);
    }
    Ok(Sheet {
        name: "csv".to_string(),
        rows,
    })
}

struct HtmlPatterns {
    row: Regex,
    cell: Regex,
    tag: Regex,
}

impl HtmlPatterns {
    fn compile() -> ImportResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| ImportError::Spreadsheet(e.to_string()))
        };
        Ok(HtmlPatterns {
            row: compile(r"(?is)<tr[^>]*>(.*?)</tr>")?,
            cell: compile(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>")?,
            tag: compile(r"(?s)<[^>]+>")?,
        })
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Scrape the first HTML table of a web export saved as `.xls`.
pub fn read_html_table(bytes: &[u8]) -> ImportResult<Sheet> {
    let text = String::from_utf8_lossy(bytes);
    let patterns = HtmlPatterns::compile()?;

    let rows: Vec<Vec<Cell>> = patterns
        .row
        .captures_iter(&text)
        .map(|row| {
            patterns
                .cell
                .captures_iter(&row[1])
                .map(|cell| {
                    let value = decode_entities(&patterns.tag.replace_all(&cell[1], ""));
                    let value = value.trim();
                    if value.is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(value.to_string())
                    }
                })
                .collect()
        })
        .filter(|row: &Vec<Cell>| !row.is_empty())
        .collect();

    if rows.is_empty() {
        return Err(ImportError::Spreadsheet("no HTML table found".into()));
    }
    Ok(Sheet {
        name: "html".to_string(),
        rows,
    })
}

// ==================== Tables ====================

pub const TIME_KEYWORDS: [&str; 6] = [
    "timestamp",
    "time",
    "date",
    "datetime",
    "horodatage",
    "date/heure",
];

/// Rows scanned when looking for the header line of a workbook.
const HEADER_SCAN_ROWS: usize = 10;

/// Header row of a sheet: the first of the first rows that has two or more
/// values and a cell equal to a time keyword, or a short cell containing one.
pub fn detect_header_row(sheet: &Sheet) -> Option<usize> {
    sheet
        .rows
        .iter()
        .take(HEADER_SCAN_ROWS)
        .position(|row| {
            let values: Vec<String> = row
                .iter()
                .filter(|c| !c.is_empty())
                .map(|c| c.text().to_lowercase())
                .collect();
            if values.len() < 2 {
                return false;
            }
            values.iter().any(|v| TIME_KEYWORDS.contains(&v.as_str()))
                || values
                    .iter()
                    .any(|v| v.chars().count() < 20 && TIME_KEYWORDS.iter().any(|k| v.contains(k)))
        })
}

/// Header text as shown to users: trimmed, `101.0` written `101`.
pub fn clean_header(text: &str) -> String {
    let t = text.trim();
    match t.strip_suffix(".0") {
        Some(int) if !int.is_empty() && int.chars().all(|c| c.is_ascii_digit()) => int.to_string(),
        _ => t.to_string(),
    }
}

/// A sheet split into named columns and data rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Use `header_row` as column names; blank names become `Unnamed: i`.
    /// Fully empty data rows are dropped.
    pub fn from_sheet(sheet: &Sheet, header_row: usize) -> Self {
        let width = sheet.width();
        let columns = (0..width)
            .map(|i| {
                let cell = sheet.cell(header_row, i);
                if cell.is_empty() {
                    format!("Unnamed: {}", i)
                } else {
                    clean_header(&cell.text())
                }
            })
            .collect();
        let rows = sheet
            .rows
            .iter()
            .skip(header_row + 1)
            .filter(|r| r.iter().any(|c| !c.is_empty()))
            .map(|r| {
                let mut row = r.clone();
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Table { columns, rows }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Column whose lowercased name is a time keyword.
    pub fn time_column(&self) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| TIME_KEYWORDS.contains(&c.to_lowercase().as_str()))
    }

    pub fn values(&self, col: usize) -> impl Iterator<Item = &Cell> {
        self.rows.iter().map(move |r| r.get(col).unwrap_or(&EMPTY_CELL))
    }
}

/// Load the table of an upload: CSV header on row 1, workbooks on the
/// detected header row of their first sheet.
pub fn load_table(filename: &str, bytes: &[u8]) -> ImportResult<Table> {
    let sheets = read_sheets(filename, bytes)?;
    let sheet = sheets
        .first()
        .ok_or_else(|| ImportError::bad_request("File contains no sheet"))?;
    let header = if extension(filename) == "csv" {
        0
    } else {
        detect_header_row(sheet).unwrap_or(0)
    };
    Ok(Table::from_sheet(sheet, header))
}

#[cfg(test)]
#[path = "tabular_tests.rs"]
mod tabular_tests;
