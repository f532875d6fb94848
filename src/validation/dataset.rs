//! Pre-merge validation of the raw collector files.

use std::path::Path;

use tracing::{error, info};

use super::{DatasetValidation, PipelineValidation};
use crate::layout::RawFiles;
use crate::models::Source;
use crate::stats;
use crate::table::ColumnTable;

/// Null share of a required column above which the dataset fails.
const NULL_ERROR_PCT: f64 = 20.0;
/// Null share of a required column above which a warning is recorded.
const NULL_WARNING_PCT: f64 = 5.0;

const MIN_STATES: usize = 40;
const MIN_COMMODITIES: usize = 3;

fn required_columns(source: Source) -> &'static [&'static str] {
    match source {
        Source::Crop => &["year", "state_name", "commodity", "yield_per_acre"],
        Source::Weather => &["state_name", "year", "avg_temp", "total_precip", "total_gdd"],
        Source::Drought => &["state_name", "year", "avg_dsci"],
        Source::Economic => &["commodity", "year", "price_index"],
    }
}

/// Validate one raw file.
///
/// A missing file, an unreadable file or a missing required column ends the
/// checks for that dataset immediately; nothing else is inspected.
pub fn validate_dataset(source: Source, path: &Path) -> DatasetValidation {
    // ---
    info!("  Validating {} data...", source);
    let mut v = DatasetValidation::new(source.as_str());

    if !path.exists() {
        v.error(format!("File not found: {}", path.display()));
        return v.finish();
    }
    let table = match ColumnTable::read(path) {
        Ok(table) => table,
        Err(e) => {
            v.error(format!("Error reading file: {}", e));
            return v.finish();
        }
    };

    let required = required_columns(source);
    let missing = table.missing_columns(required);
    if !missing.is_empty() {
        v.error(format!("Missing columns: {}", missing.join(", ")));
        return v.finish();
    }

    check_nulls(&table, required, &mut v);
    check_years(&table, &mut v);
    match source {
        Source::Crop => check_crop(&table, &mut v),
        Source::Weather => check_weather(&table, &mut v),
        Source::Drought => check_drought(&table, &mut v),
        Source::Economic => check_economic(&table, &mut v),
    }
    check_provenance(&table, &mut v);

    v.finish()
}

/// Validate the four raw files of a year. The run may proceed only if every
/// dataset passes.
pub fn validate_all(files: &RawFiles, year: i32) -> PipelineValidation {
    // ---
    info!("Validating all datasets for {}", year);
    let datasets = Source::ALL
        .iter()
        .map(|source| validate_dataset(*source, files.get(*source)))
        .collect();
    let report = PipelineValidation::from_datasets(year, datasets);

    if report.overall_passed {
        info!("All datasets valid ({} warnings)", report.total_warnings);
    } else {
        error!(
            "Validation failed: {} errors, {} warnings",
            report.total_errors, report.total_warnings
        );
    }
    report
}

// ---

/// Required columns read as text; the rest must hold numbers.
const TEXT_COLUMNS: [&str; 2] = ["state_name", "commodity"];

/// A cell the merger cannot read as a number is as missing as a null one,
/// so unparseable cells count toward the null share of numeric columns.
fn check_nulls(table: &ColumnTable, required: &[&str], v: &mut DatasetValidation) {
    // ---
    for column in required.iter().filter(|c| **c != "year") {
        let numeric = !TEXT_COLUMNS.contains(column);
        let pct = if numeric {
            table.missing_number_pct(column)
        } else {
            table.null_pct(column)
        };
        let Some(pct) = pct else {
            continue;
        };

        let non_numeric = if numeric {
            table.non_numeric_count(column)
        } else {
            0
        };
        if non_numeric > 0 {
            v.warn(format!(
                "Column '{}' has {} non-numeric values",
                column, non_numeric
            ));
        }
        let kind = if non_numeric > 0 {
            "null or non-numeric"
        } else {
            "null"
        };
        if pct > NULL_ERROR_PCT {
            v.error(format!("Column '{}' has {:.1}% {} values", column, pct, kind));
        } else if pct > NULL_WARNING_PCT {
            v.warn(format!("Column '{}' has {:.1}% {} values", column, pct, kind));
        }
    }
}

/// Every row is keyed by its year, so a single unreadable year fails the file.
fn check_years(table: &ColumnTable, v: &mut DatasetValidation) {
    // ---
    let Some(cells) = table.text("year") else {
        return;
    };
    let invalid = cells
        .iter()
        .filter(|c| c.map_or(true, |y| y.parse::<i32>().is_err()))
        .count();
    if invalid > 0 {
        v.error(format!(
            "Column 'year' has {} missing or non-integer values",
            invalid
        ));
    }
}

fn check_state_coverage(table: &ColumnTable, v: &mut DatasetValidation) {
    let states = table.distinct_count("state_name");
    v.stat("states", states);
    if states < MIN_STATES {
        v.warn(format!("Low state coverage: {} states (expected ~50)", states));
    }
}

fn check_commodity_coverage(table: &ColumnTable, v: &mut DatasetValidation) {
    let commodities = table.distinct_count("commodity");
    v.stat("commodities", commodities);
    if commodities < MIN_COMMODITIES {
        v.warn(format!(
            "Low commodity coverage: {} commodities (expected 3)",
            commodities
        ));
    }
}

fn check_crop(table: &ColumnTable, v: &mut DatasetValidation) {
    // ---
    v.stat("total_records", table.len());
    let yields = table.values("yield_per_acre");
    if yields.is_empty() {
        v.error("No valid yield data".to_string());
        return;
    }

    let min_yield = stats::min(&yields);
    let max_yield = stats::max(&yields);
    if min_yield <= 0.0 {
        v.error(format!("Non-positive yield values found: {}", min_yield));
    } else if min_yield < 10.0 {
        v.warn(format!("Very low minimum yield: {}", min_yield));
    }
    if max_yield > 500.0 {
        v.warn(format!("Very high maximum yield: {}", max_yield));
    }

    v.stat("min_yield", min_yield);
    v.stat("max_yield", max_yield);
    v.stat("mean_yield", stats::mean(&yields));
    check_state_coverage(table, v);
    check_commodity_coverage(table, v);
}

fn check_weather(table: &ColumnTable, v: &mut DatasetValidation) {
    // ---
    v.stat("total_records", table.len());
    let temps = table.values("avg_temp");
    if !temps.is_empty() {
        let (lo, hi) = (stats::min(&temps), stats::max(&temps));
        if lo < -50.0 || hi > 120.0 {
            v.warn(format!(
                "Temperature out of expected range: {:.1} to {:.1}°F",
                lo, hi
            ));
        }
    }

    let precip = table.values("total_precip");
    if !precip.is_empty() {
        if stats::min(&precip) < 0.0 {
            v.error("Negative precipitation values".to_string());
        }
        if stats::max(&precip) > 150.0 {
            v.warn(format!(
                "Very high precipitation: {:.1} inches",
                stats::max(&precip)
            ));
        }
    }

    v.stat("avg_temp_mean", (!temps.is_empty()).then(|| stats::mean(&temps)));
    v.stat("avg_precip_mean", (!precip.is_empty()).then(|| stats::mean(&precip)));
    check_state_coverage(table, v);
}

fn check_drought(table: &ColumnTable, v: &mut DatasetValidation) {
    // ---
    v.stat("total_records", table.len());
    let dsci = table.values("avg_dsci");
    if !dsci.is_empty() {
        let (lo, hi) = (stats::min(&dsci), stats::max(&dsci));
        if lo < 0.0 || hi > 100.0 {
            v.error(format!(
                "DSCI out of valid range (0-100): {:.1} to {:.1}",
                lo, hi
            ));
        }
    }
    v.stat("avg_dsci_mean", (!dsci.is_empty()).then(|| stats::mean(&dsci)));
    check_state_coverage(table, v);
}

fn check_economic(table: &ColumnTable, v: &mut DatasetValidation) {
    v.stat("total_records", table.len());
    check_commodity_coverage(table, v);
}

/// Fallback rows are legitimate input but must not pass unnoticed.
fn check_provenance(table: &ColumnTable, v: &mut DatasetValidation) {
    // ---
    let Some(cells) = table.text("data_source") else {
        return;
    };
    let fallback = cells
        .iter()
        .flatten()
        .filter(|c| c.eq_ignore_ascii_case("fallback"))
        .count();
    v.stat("fallback_records", fallback);
    if fallback > 0 {
        v.warn(format!(
            "{} of {} records are fallback values (source unavailable)",
            fallback,
            table.len()
        ));
    }
}
