use std::path::PathBuf;

use thiserror::Error;

use crate::services::ImportError;

pub type PrepareResult<T> = Result<T, PrepareError>;

#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("input not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("template not found: {}", .0.display())]
    TemplateNotFound(PathBuf),

    #[error("Template sheet not found: {0}")]
    SheetNotFound(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Invalid option {option}: {message}")]
    InvalidOption {
        option: &'static str,
        message: String,
    },

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Workbook write failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Report serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl PrepareError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        PrepareError::InvalidInput(message.into())
    }

    /// Process exit status: 2 for missing files, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        match self {
            PrepareError::InputNotFound(_) | PrepareError::TemplateNotFound(_) => 2,
            _ => 1,
        }
    }
}
