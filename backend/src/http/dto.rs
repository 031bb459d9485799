//! Data Transfer Objects for the HTTP API.
//!
//! Query strings and small response envelopes. Domain payloads (stations,
//! KPI items, availability trees, import reports) are serialised directly
//! from the service layer types.

use std::collections::HashMap;

use axum::extract::Multipart;
use serde::{Deserialize, Serialize};

use super::error::AppError;

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Always `db`: the API serves repository data, never fixtures.
    pub data_mode: String,
    /// `connected` or `disconnected`
    pub db_status: String,
    pub version: String,
}

/// Offset pagination for reference lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

fn default_page_limit() -> usize {
    100
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: default_page_limit(),
        }
    }
}

/// Query parameters of `GET /measurements/timeseries`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimeseriesQuery {
    #[serde(default)]
    pub station_id: Option<i64>,
    /// Comma separated variable codes
    #[serde(default)]
    pub variables: Option<String>,
    /// Single variable, used when `variables` is absent
    #[serde(default)]
    pub variable_code: Option<String>,
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    /// `stations` (default) or `bassins`
    #[serde(default)]
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WindowQuery {
    #[serde(default)]
    pub station_id: Option<i64>,
}

/// Query parameters of `GET /measurements/compare`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareQuery {
    pub station_id: i64,
    #[serde(default)]
    pub variable_code: Option<String>,
    /// Comma separated source codes
    #[serde(default)]
    pub sources: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunsQuery {
    #[serde(default)]
    pub source_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StationsWithDataQuery {
    #[serde(default)]
    pub variable_code: Option<String>,
    #[serde(default)]
    pub source_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariableStationsQuery {
    #[serde(default)]
    pub all_stations: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableStationsResponse {
    pub variable_code: String,
    pub stations: Vec<crate::services::availability::VariableStation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SeriesRangeQuery {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

/// Query parameters of `GET /admin/timeseries/template`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateQuery {
    #[serde(default)]
    pub template_type: Option<String>,
    #[serde(default)]
    pub station_id: Option<i64>,
    #[serde(default)]
    pub variable_code: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

/// `{ status, message }` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }
}

/// `{ status, entity }` answer of entity creation and update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityResponse {
    pub status: String,
    pub entity: serde_json::Value,
}

/// Job status response for async processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    /// What the job does, e.g. `ingest_abhs`
    pub label: String,
    /// `running`, `completed` or `failed`
    pub status: crate::services::job_tracker::JobStatus,
    pub logs: Vec<crate::services::job_tracker::LogEntry>,
    /// Result if completed
    pub result: Option<serde_json::Value>,
}

/// A multipart form holding one uploaded `file` and plain text fields.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub filename: Option<String>,
    pub file: Option<Vec<u8>>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                form.filename = field.file_name().map(String::from);
                form.file = Some(field.bytes().await?.to_vec());
            } else {
                form.fields.insert(name, field.text().await?);
            }
        }
        Ok(form)
    }

    /// The uploaded file and its name; missing or empty files are rejected.
    pub fn take_file(&mut self) -> Result<(String, Vec<u8>), AppError> {
        let bytes = self
            .file
            .take()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| AppError::BadRequest("A non-empty file field is required".into()))?;
        let filename = self.filename.take().unwrap_or_else(|| "upload".to_string());
        Ok((filename, bytes))
    }

    /// Trimmed non-empty text field.
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(String::from)
    }

    /// `true`/`1`/`yes`/`on` (any case) are true, anything else is false.
    pub fn flag(&self, name: &str, default: bool) -> bool {
        match self.text(name) {
            Some(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
            None => default,
        }
    }

    pub fn parsed<T>(&self, name: &str) -> Result<Option<T>, AppError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.text(name)
            .map(|v| {
                v.parse::<T>()
                    .map_err(|e| AppError::BadRequest(format!("Invalid {}: {}", name, e)))
            })
            .transpose()
    }
}
