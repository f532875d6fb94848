//! Data-quality gates on either side of the model.
//!
//! This module is the gateway for validation and follows the Explicit Module
//! Boundary Pattern (EMBP):
//! - `dataset`: pre-merge checks of the four raw files
//! - `results`: post-score checks of the SRI table plus the advisory
//!   reasonableness check
//!
//! Both validators read files through the untyped `ColumnTable` so that a
//! missing column or a null share can be reported instead of aborting the
//! parse. Errors fail the gate; warnings are recorded and never block.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

mod dataset;
mod results;

pub use dataset::{validate_all, validate_dataset};
pub use results::{check_reasonableness, validate_results, Reasonableness, ResultValidation};

// ---

/// Checks of one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetValidation {
    pub dataset: String,
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: BTreeMap<String, Value>,
}

impl DatasetValidation {
    pub fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            passed: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            stats: BTreeMap::new(),
        }
    }

    pub fn error(&mut self, message: String) {
        error!("    {}: {}", self.dataset, message);
        self.errors.push(message);
    }

    pub fn warn(&mut self, message: String) {
        warn!("    {}: {}", self.dataset, message);
        self.warnings.push(message);
    }

    pub fn stat(&mut self, key: &str, value: impl Into<Value>) {
        self.stats.insert(key.to_string(), value.into());
    }

    /// Seal the report: it passes exactly when no error was recorded.
    pub fn finish(mut self) -> Self {
        self.passed = self.errors.is_empty();
        if self.passed {
            info!(
                "    {} valid ({} warnings)",
                self.dataset,
                self.warnings.len()
            );
        } else {
            error!(
                "    {} validation failed: {} errors",
                self.dataset,
                self.errors.len()
            );
        }
        self
    }
}

/// Pre-merge report over all four datasets. Written once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineValidation {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub year: i32,
    /// AND of every dataset's `passed`.
    pub overall_passed: bool,
    pub total_errors: usize,
    pub total_warnings: usize,
    pub datasets: BTreeMap<String, DatasetValidation>,
}

impl PipelineValidation {
    pub fn from_datasets(year: i32, datasets: Vec<DatasetValidation>) -> Self {
        // ---
        let overall_passed = datasets.iter().all(|d| d.passed);
        let total_errors = datasets.iter().map(|d| d.errors.len()).sum();
        let total_warnings = datasets.iter().map(|d| d.warnings.len()).sum();

        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            year,
            overall_passed,
            total_errors,
            total_warnings,
            datasets: datasets
                .into_iter()
                .map(|d| (d.dataset.clone(), d))
                .collect(),
        }
    }

    /// Every error, prefixed with its dataset, in dataset order.
    pub fn all_errors(&self) -> Vec<String> {
        self.datasets
            .values()
            .flat_map(|d| d.errors.iter().map(move |e| format!("{}: {}", d.dataset, e)))
            .collect()
    }
}
