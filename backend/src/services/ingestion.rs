//! Bulk ingestion of the agency's recurring files.
//!
//! Three file families are recognised:
//!
//! ```text
//! datatable   CSV, one date column, one column per station
//! pluie       workbook, one sheet per provider (synthesis, AROME, ECMWF, observed history)
//! abhs        workbook of model results, one sheet per dam or station (recap sheets ignored)
//! ```
//!
//! [`analyze_file`] produces a dry-run report. [`run_ingestion_job`] writes the
//! data under the job tracker and closes the ingestion history row.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::{ImportError, ImportResult};
use super::job_tracker::{JobTracker, LogLevel};
use super::tabular::{detect_header_row, read_csv, read_workbook, Cell, Sheet, Table};
use super::timeseries::{entity_index, import_table, ImportMode, UploadRequest};
use crate::api::{EntityKind, IngestionStatus};
use crate::db::calculate_checksum;
use crate::db::repository::FullRepository;

pub const DEFAULT_INGEST_SOURCE: &str = "ABHS_RES";
pub const DEFAULT_DATATABLE_VARIABLE: &str = "precip_mm";
const RAIN_VARIABLE: &str = "precip_mm";
const DAM_KEYWORDS: [&str; 4] = ["wahda", "driss", "ouljet", "alla"];
const STAMP: &str = "%Y-%m-%d %H:%M:%S";

// ==================== File families ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestKind {
    Datatable,
    Pluie,
    Abhs,
}

impl IngestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestKind::Datatable => "datatable",
            IngestKind::Pluie => "pluie",
            IngestKind::Abhs => "abhs",
        }
    }

    pub fn pipeline_name(&self) -> String {
        format!("ingest_{}", self.as_str())
    }
}

impl fmt::Display for IngestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IngestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "datatable" => Ok(IngestKind::Datatable),
            "pluie" | "precip" => Ok(IngestKind::Pluie),
            "abhs" => Ok(IngestKind::Abhs),
            other => Err(format!("Unknown file type: {}", other)),
        }
    }
}

/// Provider of a rainfall sheet, from its name.
pub fn rain_sheet_label(sheet: &str) -> &'static str {
    let name = sheet.to_lowercase();
    if name.contains("synt") {
        "Synthesis (Calculated)"
    } else if name.contains("arome") {
        "Model AROME"
    } else if name.contains("ecmwf") {
        "Model ECMWF"
    } else if name.contains("obs") || name.contains("his") {
        "History Obs"
    } else {
        "Unknown"
    }
}

/// Source written for a rainfall sheet. Synthesis sheets are derived and not imported.
fn rain_sheet_source(sheet: &str) -> Option<&'static str> {
    match rain_sheet_label(sheet) {
        "Model AROME" => Some("AROME"),
        "Model ECMWF" => Some("ECMWF"),
        "History Obs" => Some("OBS"),
        _ => None,
    }
}

/// Category of a results sheet.
pub fn results_sheet_category(sheet: &str) -> String {
    let name = sheet.to_lowercase();
    if DAM_KEYWORDS.iter().any(|d| name.contains(d)) {
        if name.contains("jour") || name.contains("synt") {
            "Barrage (Journalier)".to_string()
        } else {
            "Barrage (Horaire)".to_string()
        }
    } else {
        "Station/Poste".to_string()
    }
}

fn is_recap(sheet: &str) -> bool {
    sheet.to_lowercase().starts_with("recap")
}

// ==================== Analysis ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDetail {
    pub entity: String,
    pub variable: String,
    pub range: String,
    pub count: usize,
    pub status: String,
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub status: ReportStatus,
    pub summary: String,
    pub details: Vec<ReportDetail>,
    pub errors: Vec<String>,
    pub logs: String,
}

impl IngestReport {
    fn new(
        status: ReportStatus,
        summary: String,
        details: Vec<ReportDetail>,
        errors: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let logs = render_logs(&summary, &details, &errors, now);
        IngestReport {
            status,
            summary,
            details,
            errors,
            logs,
        }
    }

    fn failure(summary: &str, error: String, now: DateTime<Utc>) -> Self {
        Self::new(ReportStatus::Error, summary.to_string(), vec![], vec![error], now)
    }
}

/// Plain-text trace shown under the analysis table.
pub fn render_logs(
    summary: &str,
    details: &[ReportDetail],
    errors: &[String],
    now: DateTime<Utc>,
) -> String {
    let stamp = now.format(STAMP);
    let mut lines = vec![
        format!("[{}] ANALYSIS STARTED", stamp),
        format!("[{}] SUMMARY: {}", stamp, summary),
        String::new(),
    ];

    if !errors.is_empty() {
        lines.push("!!! ERRORS DETECTED !!!".to_string());
        lines.extend(errors.iter().map(|e| format!("[ERROR] {}", e)));
        lines.push(String::new());
    }

    if details.is_empty() {
        lines.push("No details available.".to_string());
    } else {
        lines.push("--- DETAILS ---".to_string());
        for d in details {
            lines.push(format!("Entity: {}", d.entity));
            lines.push(format!("  - Variable: {}", d.variable));
            lines.push(format!("  - Range: {}", d.range));
            lines.push(format!("  - Rows: {}", d.count));
            lines.push(format!("  - Status: {}", d.status));
            lines.push(String::new());
        }
    }

    lines.push(format!("[{}] ANALYSIS COMPLETED", stamp));
    lines.join("\n")
}

fn date_range(cells: impl Iterator<Item = Cell>) -> Option<String> {
    let stamps: Vec<NaiveDateTime> = cells.filter_map(|c| c.as_datetime()).collect();
    let start = stamps.iter().min()?;
    let end = stamps.iter().max()?;
    Some(format!("{} - {}", start.format(STAMP), end.format(STAMP)))
}

fn first_column_containing(table: &Table, keywords: &[&str]) -> Option<usize> {
    table.columns.iter().position(|c| {
        let lowered = c.to_lowercase();
        keywords.iter().any(|k| lowered.contains(k))
    })
}

fn header_table(sheet: &Sheet) -> Table {
    Table::from_sheet(sheet, detect_header_row(sheet).unwrap_or(0))
}

/// Dry-run report of an ingestion file. Never fails: problems end up in
/// `errors` with an `error` status.
pub fn analyze_file(bytes: &[u8], file_type: &str, now: DateTime<Utc>) -> IngestReport {
    let kind = match file_type.parse::<IngestKind>() {
        Ok(kind) => kind,
        Err(_) => {
            return IngestReport::failure(
                "Analysis failed",
                format!("Unknown file type: {}", file_type),
                now,
            )
        }
    };
    match kind {
        IngestKind::Datatable => analyze_datatable(bytes, now),
        IngestKind::Pluie => analyze_rainfall(bytes, now),
        IngestKind::Abhs => analyze_results(bytes, now),
    }
}

fn analyze_datatable(bytes: &[u8], now: DateTime<Utc>) -> IngestReport {
    let sheet = match read_csv(bytes, None) {
        Ok(sheet) => sheet,
        Err(e) => return IngestReport::failure("Error parsing CSV", e.to_string(), now),
    };
    let table = Table::from_sheet(&sheet, 0);
    let Some(date_col) = first_column_containing(&table, &["date", "time"]) else {
        return IngestReport::failure(
            "Error parsing CSV",
            "No Date/Time column found in CSV".to_string(),
            now,
        );
    };

    let range = date_range(table.values(date_col).cloned())
        .unwrap_or_else(|| "Could not parse dates".to_string());
    let details: Vec<ReportDetail> = table
        .columns
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != date_col)
        .map(|(i, name)| ReportDetail {
            entity: name.clone(),
            variable: "Observation".to_string(),
            range: range.clone(),
            count: table.values(i).filter(|c| !c.is_empty()).count(),
            status: "Ready".to_string(),
            action: "Append/Update".to_string(),
        })
        .collect();

    let summary = format!("Found {} stations. Range: {}", details.len(), range);
    IngestReport::new(ReportStatus::Success, summary, details, vec![], now)
}

fn analyze_rainfall(bytes: &[u8], now: DateTime<Utc>) -> IngestReport {
    let sheets = match read_workbook(bytes) {
        Ok(sheets) => sheets,
        Err(e) => return IngestReport::failure("Error parsing Excel", e.to_string(), now),
    };

    let mut details = Vec::new();
    let mut parts = Vec::new();
    for sheet in &sheets {
        let table = Table::from_sheet(sheet, 0);
        let rows = table.rows.len();
        let range = first_column_containing(&table, &["date"])
            .and_then(|col| date_range(table.values(col).cloned()))
            .unwrap_or_else(|| "Unknown".to_string());
        details.push(ReportDetail {
            entity: format!("Sheet: {}", sheet.name),
            variable: rain_sheet_label(&sheet.name).to_string(),
            range,
            count: rows,
            status: if rows > 0 { "Ready" } else { "Empty" }.to_string(),
            action: "Process".to_string(),
        });
        parts.push(format!("{}({})", sheet.name, rows));
    }

    let summary = format!("Excel Analyzed. Sheets: {}", parts.join(", "));
    IngestReport::new(ReportStatus::Success, summary, details, vec![], now)
}

fn analyze_results(bytes: &[u8], now: DateTime<Utc>) -> IngestReport {
    let sheets = match read_workbook(bytes) {
        Ok(sheets) => sheets,
        Err(e) => return IngestReport::failure("Error parsing HMS Excel", e.to_string(), now),
    };

    let details: Vec<ReportDetail> = sheets
        .iter()
        .filter(|s| !is_recap(&s.name))
        .map(|sheet| ReportDetail {
            entity: sheet.name.clone(),
            variable: results_sheet_category(&sheet.name),
            range: "N/A".to_string(),
            count: Table::from_sheet(sheet, 0).rows.len(),
            status: "Ready".to_string(),
            action: "Import".to_string(),
        })
        .collect();

    let summary = format!(
        "Found {} sheets (Dams/Stations). Recap sheets filtered out.",
        details.len()
    );
    IngestReport::new(ReportStatus::Success, summary, details, vec![], now)
}

// ==================== Execution ====================

/// Parameters of an ingestion run.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub ingestion_id: i64,
    pub filename: String,
    pub bytes: Vec<u8>,
    pub kind: IngestKind,
    /// Source of `datatable` and `abhs` files.
    pub source_code: String,
    /// Variable of `datatable` columns.
    pub variable_code: String,
    pub run_time: DateTime<Utc>,
    pub run_label: String,
}

/// Immediate answer of the execute endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    pub status: String,
    pub message: String,
    pub logs: String,
    pub ingestion_id: Option<i64>,
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
struct SheetOutcome {
    sheet: String,
    records: usize,
}

/// Outcome of one sheet: written points, or a skip reason that does not fail the run.
enum SheetResult {
    Written(usize),
    Skipped(String),
}

async fn import_sheet<R: FullRepository + ?Sized>(
    repo: &R,
    table: &Table,
    request: &UploadRequest,
    job: &IngestJob,
) -> ImportResult<SheetResult> {
    match import_table(repo, table, request, &job.run_label, job.run_time).await {
        Ok(written) => Ok(SheetResult::Written(written)),
        Err(ImportError::BadRequest(reason)) => Ok(SheetResult::Skipped(reason)),
        Err(e) => Err(e),
    }
}

async fn ingest<R: FullRepository + ?Sized>(
    repo: &R,
    tracker: &JobTracker,
    job_id: &str,
    job: &IngestJob,
) -> ImportResult<Vec<SheetOutcome>> {
    let mut outcomes = Vec::new();
    let mut record = |sheet: &str, result: SheetResult| match result {
        SheetResult::Written(records) => {
            tracker.log(
                job_id,
                LogLevel::Success,
                format!("{}: {} points written", sheet, records),
            );
            outcomes.push(SheetOutcome {
                sheet: sheet.to_string(),
                records,
            });
        }
        SheetResult::Skipped(reason) => {
            tracker.log(job_id, LogLevel::Warning, format!("{} skipped: {}", sheet, reason));
        }
    };

    match job.kind {
        IngestKind::Datatable => {
            let sheet = read_csv(&job.bytes, None)?;
            let table = Table::from_sheet(&sheet, 0);
            let request = UploadRequest {
                import_mode: ImportMode::MultiStation,
                variable_code: Some(job.variable_code.clone()),
                source_code: job.source_code.clone(),
                ..Default::default()
            };
            let result = import_sheet(repo, &table, &request, job).await?;
            record(&job.filename, result);
        }
        IngestKind::Pluie => {
            for sheet in read_workbook(&job.bytes)? {
                let Some(source) = rain_sheet_source(&sheet.name) else {
                    record(
                        &sheet.name,
                        SheetResult::Skipped(rain_sheet_label(&sheet.name).to_string()),
                    );
                    continue;
                };
                let request = UploadRequest {
                    import_mode: ImportMode::MultiStation,
                    variable_code: Some(RAIN_VARIABLE.to_string()),
                    source_code: source.to_string(),
                    ..Default::default()
                };
                let result = import_sheet(repo, &header_table(&sheet), &request, job).await?;
                record(&sheet.name, result);
            }
        }
        IngestKind::Abhs => {
            let index = entity_index(repo, EntityKind::Station).await?;
            for sheet in read_workbook(&job.bytes)? {
                if is_recap(&sheet.name) {
                    continue;
                }
                let lowered = sheet.name.trim().to_lowercase();
                let station = index.get(&lowered).or_else(|| {
                    index
                        .iter()
                        .filter(|(key, _)| !key.is_empty() && lowered.contains(key.as_str()))
                        .max_by_key(|(key, _)| key.len())
                        .map(|(_, entry)| entry)
                });
                let Some(station) = station else {
                    record(&sheet.name, SheetResult::Skipped("no matching station".into()));
                    continue;
                };
                let request = UploadRequest {
                    import_mode: ImportMode::MultiVariable,
                    entity_id: Some(station.id),
                    source_code: job.source_code.clone(),
                    ..Default::default()
                };
                let result = import_sheet(repo, &header_table(&sheet), &request, job).await?;
                record(&sheet.name, result);
            }
        }
    }
    Ok(outcomes)
}

/// Run an ingestion to completion, logging progress to `tracker` and closing
/// the history row. Designed to be spawned as a background task.
pub async fn run_ingestion_job(
    job_id: String,
    tracker: JobTracker,
    repo: Arc<dyn FullRepository>,
    job: IngestJob,
) -> Result<usize, String> {
    tracker.log(
        &job_id,
        LogLevel::Info,
        format!("Reading {} ({})", job.filename, job.kind),
    );

    match ingest(repo.as_ref(), &tracker, &job_id, &job).await {
        Ok(outcomes) => {
            let records: usize = outcomes.iter().map(|o| o.records).sum();
            let summary = json!({
                "filename": job.filename,
                "type": job.kind,
                "records": records,
                "sheets": outcomes,
            });
            if let Err(e) = repo
                .finish_ingestion(job.ingestion_id, IngestionStatus::Success, summary.clone())
                .await
            {
                warn!("Could not close ingestion {}: {}", job.ingestion_id, e);
            }
            tracker.log(
                &job_id,
                LogLevel::Success,
                format!("Ingestion complete: {} points", records),
            );
            tracker.complete_job(&job_id, Some(summary));
            info!("Ingestion {} wrote {} points", job.ingestion_id, records);
            Ok(records)
        }
        Err(e) => {
            let msg = format!("Ingestion failed: {}", e);
            let summary = json!({ "filename": job.filename, "error": e.to_string() });
            if let Err(e) = repo
                .finish_ingestion(job.ingestion_id, IngestionStatus::Failed, summary)
                .await
            {
                warn!("Could not close ingestion {}: {}", job.ingestion_id, e);
            }
            tracker.fail_job(&job_id, &msg);
            Err(msg)
        }
    }
}

/// Open the history row, register a job and spawn the ingestion in the background.
///
/// Must be called inside a Tokio runtime.
pub async fn start_ingestion_job(
    repo: Arc<dyn FullRepository>,
    tracker: &JobTracker,
    filename: String,
    bytes: Vec<u8>,
    kind: IngestKind,
    source_code: Option<String>,
    run_time: DateTime<Utc>,
) -> ImportResult<ExecuteOutcome> {
    let pipeline = kind.pipeline_name();
    let checksum = calculate_checksum(&bytes);
    let record = repo.start_ingestion(&pipeline, Some(&checksum)).await?;
    let job_id = tracker.create_job(pipeline.as_str());
    tracker.log(
        &job_id,
        LogLevel::Info,
        format!("Ingestion {} started for {}", record.ingestion_id, filename),
    );

    let job = IngestJob {
        ingestion_id: record.ingestion_id,
        filename,
        bytes,
        kind,
        source_code: source_code
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_INGEST_SOURCE.to_string()),
        variable_code: DEFAULT_DATATABLE_VARIABLE.to_string(),
        run_time,
        run_label: format!("Import via Web {}", Utc::now().format("%H:%M")),
    };
    tokio::spawn(run_ingestion_job(job_id.clone(), tracker.clone(), repo, job));

    Ok(ExecuteOutcome {
        status: "running".to_string(),
        message: format!("Ingestion started. Follow progress at /ingest/jobs/{}/logs", job_id),
        logs: tracker.log_text(&job_id),
        ingestion_id: Some(record.ingestion_id),
        job_id,
    })
}

#[cfg(test)]
#[path = "ingestion_tests.rs"]
mod ingestion_tests;
