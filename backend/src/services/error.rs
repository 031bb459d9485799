//! Errors raised while reading uploaded files and applying imports.

use thiserror::Error;

use crate::db::RepositoryError;

#[derive(Debug, Error)]
pub enum ImportError {
    /// The request itself is unusable (missing field, empty file, bad option).
    #[error("{0}")]
    BadRequest(String),

    /// A referenced source, variable or entity does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to read spreadsheet: {0}")]
    Spreadsheet(String),

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write workbook: {0}")]
    Workbook(#[from] rust_xlsxwriter::XlsxError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ImportError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ImportError::NotFound(message.into())
    }
}

impl From<calamine::Error> for ImportError {
    fn from(err: calamine::Error) -> Self {
        ImportError::Spreadsheet(err.to_string())
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
