//! Stage functions and the full yearly run.
//!
//! Each stage reads its inputs from files and fully overwrites its own
//! output, so any stage can be re-run on its own. Inputs and outputs are
//! explicit structs; the scheduler only ever sees the paths and summaries
//! they carry.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::collectors::{self, CollectOutput};
use crate::compare::{self, ComparisonOutcome, ComparisonSummary};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::layout::{DataLayout, RawFiles};
use crate::merge::{self, MergeSummary, SourceTables};
use crate::models::{
    CropRecord, DroughtRecord, EconomicRecord, MergedRecord, SriResult, WeatherRecord,
};
use crate::scoring::{self, ScoreSummary, ScoringConfig};
use crate::table;
use crate::validation::{self, PipelineValidation, ResultValidation};

// ---

#[derive(Debug, Clone, Serialize)]
pub struct ValidateOutput {
    pub report_path: PathBuf,
    pub report: PipelineValidation,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeInput {
    pub year: i32,
    pub files: RawFiles,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutput {
    pub file_path: PathBuf,
    pub summary: MergeSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreInput {
    pub year: i32,
    pub merged_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreOutput {
    pub file_path: PathBuf,
    pub summary: ScoreSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutput {
    pub file_path: PathBuf,
    pub report_path: PathBuf,
    pub report: ResultValidation,
}

/// Everything one `run` produced, written as `run_summary_{year}.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub year: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collection: CollectOutput,
    pub validation_report: PathBuf,
    pub merge: MergeOutput,
    pub score: ScoreOutput,
    pub check: CheckOutput,
    pub comparison: ComparisonOutcome,
}

// ---

/// Pre-merge gate. The report is always written; a failing dataset makes
/// the stage fail with every error collected.
pub fn validate(layout: &DataLayout, files: &RawFiles, year: i32) -> Result<ValidateOutput> {
    // ---
    let report = validation::validate_all(files, year);
    let report_path = layout.validation_report_file(year);
    table::write_json(&report_path, &report)?;
    debug!("Validation report written to {}", report_path.display());

    if !report.overall_passed {
        return Err(PipelineError::ValidationFailed {
            stage: "dataset".to_string(),
            errors: report.all_errors(),
        });
    }
    Ok(ValidateOutput {
        report_path,
        report,
    })
}

/// Read the four raw files, merge them and persist the merged table.
pub fn merge(layout: &DataLayout, input: &MergeInput, config: &ScoringConfig) -> Result<MergeOutput> {
    // ---
    let crop: Vec<CropRecord> = table::read_csv(&input.files.crop)?;
    let weather: Vec<WeatherRecord> = table::read_csv(&input.files.weather)?;
    let drought: Vec<DroughtRecord> = table::read_csv(&input.files.drought)?;
    let economic: Vec<EconomicRecord> = table::read_csv(&input.files.economic)?;

    let tables = SourceTables {
        crop: &crop,
        weather: &weather,
        drought: &drought,
        economic: &economic,
    };
    let (records, summary) = merge::merge(input.year, &tables, &config.features);

    let file_path = layout.merged_file(input.year);
    table::write_csv(&file_path, &records)?;
    info!("Saved merged data to {}", file_path.display());

    Ok(MergeOutput { file_path, summary })
}

/// Score the merged table and persist the SRI table.
///
/// Nothing is written if any score violates its range invariant.
pub fn score(layout: &DataLayout, input: &ScoreInput, config: &ScoringConfig) -> Result<ScoreOutput> {
    // ---
    let records: Vec<MergedRecord> = table::read_csv(&input.merged_file)?;
    let results = scoring::score(&records, config)?;
    let summary = ScoreSummary::from_results(input.year, &results, config);

    let file_path = layout.sri_file(input.year);
    table::write_csv(&file_path, &results)?;
    info!(
        "Saved {} SRI results to {} (avg {:.1}, {} high risk)",
        summary.total_records,
        file_path.display(),
        summary.avg_sri,
        summary.high_risk_records()
    );
    if summary.fallback_records > 0 {
        warn!(
            "{} of {} SRI rows rest on fallback data",
            summary.fallback_records, summary.total_records
        );
    }

    Ok(ScoreOutput { file_path, summary })
}

/// Post-score gate. The report is always written; on failure the SRI table
/// is removed so that no downstream consumer reads it.
pub fn check(layout: &DataLayout, year: i32) -> Result<CheckOutput> {
    // ---
    let file_path = layout.sri_file(year);
    let report = validation::validate_results(&file_path);
    let report_path = layout.sri_validation_file(year);
    table::write_json(&report_path, &report)?;

    if let Some(r) = &report.reasonableness {
        for issue in &r.issues {
            warn!("  Reasonableness: {}", issue);
        }
    }

    if !report.passed {
        if file_path.exists() {
            error!("Removing invalid SRI table {}", file_path.display());
            fs::remove_file(&file_path)?;
        }
        return Err(PipelineError::ValidationFailed {
            stage: "sri".to_string(),
            errors: report.errors.clone(),
        });
    }
    Ok(CheckOutput {
        file_path,
        report_path,
        report,
    })
}

/// Compare the year's SRI table with the prior year's.
///
/// A missing prior table is not an error.
pub fn compare(layout: &DataLayout, year: i32) -> Result<ComparisonOutcome> {
    // ---
    let prior_path = layout.sri_file(year - 1);
    if !prior_path.exists() {
        warn!("No {} SRI results found, skipping comparison", year - 1);
        return Ok(ComparisonOutcome::unavailable(
            year,
            format!("No SRI results for {} at {}", year - 1, prior_path.display()),
        ));
    }

    let current: Vec<SriResult> = table::read_csv(&layout.sri_file(year))?;
    let prior: Vec<SriResult> = table::read_csv(&prior_path)?;
    info!(
        "Comparing {} ({} rows) with {} ({} rows)",
        year,
        current.len(),
        year - 1,
        prior.len()
    );

    let rows = compare::compare_tables(&current, &prior);
    let summary = ComparisonSummary::from_rows(year, &rows);

    let file_path = layout.comparison_file(year);
    table::write_csv_records(&file_path, &compare::csv_header(year), &compare::csv_records(&rows))?;
    let summary_path = layout.comparison_summary_file(year);
    table::write_json(&summary_path, &summary)?;

    info!(
        "Comparison saved to {}: national avg change {:+.2}, {} significant",
        file_path.display(),
        summary.national_avg_change,
        summary.significant_changes
    );
    for finding in &summary.digest.key_findings {
        info!("  {}", finding);
    }

    Ok(ComparisonOutcome::available(
        year,
        file_path,
        summary_path,
        summary,
    ))
}

/// Run every stage for `year`, stopping at the first fatal gate.
pub async fn run(config: &Config, year: i32) -> Result<RunSummary> {
    // ---
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let layout = &config.layout;
    info!("Starting SRI pipeline run {} for {}", run_id, year);

    // Step 1: Collect
    debug!("Run {} - Step 1", run_id);
    let collection = collectors::collect_all(config, year).await?;
    let files = collection.raw_files();

    // Step 2: Validate raw datasets
    debug!("Run {} - Step 2", run_id);
    let validated = validate(layout, &files, year)?;

    // Step 3: Merge
    debug!("Run {} - Step 3", run_id);
    let merged = merge(layout, &MergeInput { year, files }, &config.scoring)?;

    // Step 4: Score
    debug!("Run {} - Step 4", run_id);
    let scored = score(
        layout,
        &ScoreInput {
            year,
            merged_file: merged.file_path.clone(),
        },
        &config.scoring,
    )?;

    // Step 5: Validate results
    debug!("Run {} - Step 5", run_id);
    let checked = check(layout, year)?;

    // Step 6: Compare with the prior year
    debug!("Run {} - Step 6", run_id);
    let comparison = compare(layout, year)?;

    let summary = RunSummary {
        run_id,
        year,
        started_at,
        finished_at: Utc::now(),
        collection,
        validation_report: validated.report_path,
        merge: merged,
        score: scored,
        check: checked,
        comparison,
    };
    let summary_path = layout.run_summary_file(year);
    table::write_json(&summary_path, &summary)?;
    info!("Pipeline run {} complete, summary at {}", run_id, summary_path.display());

    Ok(summary)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::{DataSource, RiskCategory};
    use tempfile::TempDir;

    fn create_test_result(state: &str, sri: f64) -> SriResult {
        SriResult {
            year: 2024,
            state_name: state.to_string(),
            commodity: "CORN".to_string(),
            yield_per_acre: 170.0,
            yield_risk: 50.0,
            weather_risk: 10.0,
            drought_risk: 10.0,
            economic_risk: 35.0,
            sri,
            risk_category: RiskCategory::Moderate,
            recommendation: "Monitor closely, consider +5% stockpile".to_string(),
            avg_temp: 70.0,
            total_precip: 20.0,
            avg_dsci: 10.0,
            data_source: DataSource::Live,
        }
    }

    #[test]
    fn test_compare_without_prior_year_is_unavailable() -> Result<()> {
        // ---
        let dir = TempDir::new()?;
        let layout = DataLayout::under(dir.path());
        table::write_csv(&layout.sri_file(2024), &[create_test_result("Iowa", 30.0)])?;

        let outcome = compare(&layout, 2024)?;

        assert!(!outcome.comparison_available);
        assert!(!layout.comparison_file(2024).exists());
        Ok(())
    }

    #[test]
    fn test_check_removes_table_that_fails() -> Result<()> {
        // ---
        let dir = TempDir::new()?;
        let layout = DataLayout::under(dir.path());
        let path = layout.sri_file(2024);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(&path, "state_name,commodity,SRI,risk_category\nIowa,CORN,140,High\n")?;

        let err = check(&layout, 2024).unwrap_err();

        assert!(matches!(err, PipelineError::ValidationFailed { ref stage, .. } if stage == "sri"));
        assert!(!path.exists());
        assert!(layout.sri_validation_file(2024).exists());
        Ok(())
    }

    #[test]
    fn test_validate_fails_on_missing_files_and_writes_report() -> Result<()> {
        // ---
        let dir = TempDir::new()?;
        let layout = DataLayout::under(dir.path());

        let err = validate(&layout, &layout.raw_files(2024), 2024).unwrap_err();

        match err {
            PipelineError::ValidationFailed { stage, errors } => {
                assert_eq!(stage, "dataset");
                assert_eq!(errors.len(), 4);
            }
            other => panic!("unexpected error: {}", other),
        }
        let report: PipelineValidation = table::read_json(&layout.validation_report_file(2024))?;
        assert!(!report.overall_passed);
        Ok(())
    }
}
