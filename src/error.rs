//! Error type shared by every pipeline stage.
//!
//! Only conditions that must halt a run are represented here. Per-key
//! collector failures are logged and counted as zero records, and total
//! source unavailability is masked by a fallback dataset, so neither ever
//! surfaces as a `PipelineError`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("{stage} validation failed with {} error(s): {}", errors.len(), errors.join("; "))]
    ValidationFailed { stage: String, errors: Vec<String> },

    #[error("Calculation invariant violated: {0}")]
    Invariant(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
