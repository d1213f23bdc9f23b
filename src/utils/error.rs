//! Error types and handling
//!
//! Crate-level error wrapping the per-module errors.

use crate::config::ConfigError;
use crate::export::ExportError;
use crate::path::PathError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),
}

/// Serializable error summary, e.g. for a control socket or status file
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Path(_) => "PATH_ERROR",
            AppError::Export(ExportError::AlreadyExporting) => "ALREADY_EXPORTING",
            AppError::Export(_) => "EXPORT_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
