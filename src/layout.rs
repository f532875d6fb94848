//! File layout of the stage handoff directories.
//!
//! Every stage reads its inputs from, and writes its output to, a path
//! derived here, so the naming convention lives in one place.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::models::Source;

/// Paths of the four raw files of one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFiles {
    pub crop: PathBuf,
    pub weather: PathBuf,
    pub drought: PathBuf,
    pub economic: PathBuf,
}

impl RawFiles {
    pub fn get(&self, source: Source) -> &Path {
        match source {
            Source::Crop => &self.crop,
            Source::Weather => &self.weather,
            Source::Drought => &self.drought,
            Source::Economic => &self.economic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    pub raw_root: PathBuf,
    pub processed_root: PathBuf,
    pub results_root: PathBuf,
}

impl DataLayout {
    /// Standard `raw/`, `processed/`, `results/` tiers under one root.
    pub fn under(root: &Path) -> Self {
        Self {
            raw_root: root.join("raw"),
            processed_root: root.join("processed"),
            results_root: root.join("results"),
        }
    }

    /// `{raw-root}/{year}/{source}_{year}.csv`
    pub fn raw_file(&self, source: Source, year: i32) -> PathBuf {
        self.raw_root
            .join(year.to_string())
            .join(format!("{}_{}.csv", source.file_stem(), year))
    }

    pub fn raw_files(&self, year: i32) -> RawFiles {
        RawFiles {
            crop: self.raw_file(Source::Crop, year),
            weather: self.raw_file(Source::Weather, year),
            drought: self.raw_file(Source::Drought, year),
            economic: self.raw_file(Source::Economic, year),
        }
    }

    pub fn merged_file(&self, year: i32) -> PathBuf {
        self.processed_root
            .join(year.to_string())
            .join(format!("merged_data_{}.csv", year))
    }

    pub fn validation_report_file(&self, year: i32) -> PathBuf {
        self.processed_root
            .join(year.to_string())
            .join(format!("validation_report_{}.json", year))
    }

    pub fn sri_file(&self, year: i32) -> PathBuf {
        self.results_root
            .join(year.to_string())
            .join(format!("sri_results_{}.csv", year))
    }

    pub fn sri_validation_file(&self, year: i32) -> PathBuf {
        self.results_root
            .join(year.to_string())
            .join(format!("sri_validation_{}.json", year))
    }

    pub fn comparison_file(&self, year: i32) -> PathBuf {
        self.results_root
            .join(year.to_string())
            .join("comparisons")
            .join(format!("sri_comparison_{}.csv", year))
    }

    pub fn comparison_summary_file(&self, year: i32) -> PathBuf {
        self.results_root
            .join(year.to_string())
            .join("comparisons")
            .join(format!("sri_comparison_{}.json", year))
    }

    pub fn run_summary_file(&self, year: i32) -> PathBuf {
        self.results_root
            .join(year.to_string())
            .join(format!("run_summary_{}.json", year))
    }
}
