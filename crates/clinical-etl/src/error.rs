//! Error types for the clinical-etl library.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for conversion and configuration failures.
///
/// Validation problems are never reported through this type; they are
/// collected as [`crate::validation::Diagnostic`] values instead.
#[derive(Debug, Error)]
pub enum EtlError {
    /// Error reading or accessing a file.
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error from the CSV library.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Empty file or no data to convert.
    #[error("Empty data: {0}")]
    EmptyData(String),

    /// Manifest or run configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed mapping template.
    #[error("Template error at '{line}': {message}")]
    Template { line: String, message: String },

    /// A mapping function failed for one subject.
    #[error("Mapping error for {subject} in {field}: {message}")]
    Mapping {
        subject: String,
        field: String,
        message: String,
    },

    /// The context stack was not balanced at the end of a subject.
    #[error("Stack imbalance for {subject}: {detail}")]
    StackImbalance { subject: String, detail: String },

    /// The target schema could not be loaded or compiled.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Fetching a remote schema failed.
    #[error("HTTP error for '{url}': {message}")]
    Http { url: String, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Regex compilation error.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl EtlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EtlError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn template(line: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Template {
            line: line.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for clinical-etl operations.
pub type Result<T> = std::result::Result<T, EtlError>;
