use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use agri_sri::compare::ComparisonSummary;
use agri_sri::models::{CropRecord, DroughtRecord, EconomicRecord, WeatherRecord};
use agri_sri::pipeline::{self, MergeInput, ScoreInput};
use agri_sri::{
    table, DataLayout, DataSource, MergedRecord, PipelineError, RiskCategory, ScoringConfig,
    SriResult,
};

const STATES: [&str; 3] = ["Iowa", "Kansas", "Ohio"];
const COMMODITIES: [(&str, f64); 2] = [("CORN", 180.0), ("WHEAT", 50.0)];

fn create_test_crop(year: i32, data_source: DataSource) -> Vec<CropRecord> {
    // ---
    let mut rows = Vec::new();
    for (i, state) in STATES.iter().enumerate() {
        for (commodity, base) in COMMODITIES {
            rows.push(CropRecord {
                year,
                state_name: state.to_string(),
                commodity: commodity.to_string(),
                yield_per_acre: Some(base + 5.0 * i as f64),
                data_source,
            });
        }
    }
    rows
}

fn create_test_weather(year: i32) -> Vec<WeatherRecord> {
    STATES
        .iter()
        .map(|state| WeatherRecord {
            state_name: state.to_string(),
            year,
            avg_temp: Some(70.0),
            max_temp: Some(84.0),
            min_temp: Some(55.0),
            total_precip: Some(22.0),
            total_gdd: Some(2600.0),
            avg_humidity: Some(66.0),
            data_source: DataSource::Live,
        })
        .collect()
}

fn create_test_drought(year: i32, kansas_dsci: f64) -> Vec<DroughtRecord> {
    STATES
        .iter()
        .map(|state| {
            let dsci = if *state == "Kansas" { kansas_dsci } else { 5.0 };
            DroughtRecord {
                state_name: state.to_string(),
                year,
                avg_dsci: Some(dsci),
                avg_d0_pct: Some(10.0),
                avg_d1_pct: Some(5.0),
                avg_d2_pct: Some(0.0),
                avg_d3_pct: Some(0.0),
                avg_d4_pct: Some(0.0),
                avg_none_pct: Some(85.0),
                drought_category: "None".to_string(),
                data_source: DataSource::Live,
            }
        })
        .collect()
}

fn create_test_economic(year: i32) -> Vec<EconomicRecord> {
    COMMODITIES
        .iter()
        .map(|(commodity, _)| EconomicRecord {
            commodity: commodity.to_string(),
            year,
            production: Some(15_000.0),
            total_supply: Some(16_500.0),
            domestic_consumption: Some(12_000.0),
            exports: Some(2_000.0),
            ending_stocks: Some(2_100.0),
            stocks_to_use_ratio: Some(15.0),
            price_index: Some(100.0),
            supply_risk_score: Some(70.0),
            data_source: DataSource::Live,
        })
        .collect()
}

fn write_raw_files(
    layout: &DataLayout,
    year: i32,
    kansas_dsci: f64,
    crop_source: DataSource,
) -> Result<()> {
    // ---
    let files = layout.raw_files(year);
    table::write_csv(&files.crop, &create_test_crop(year, crop_source))?;
    table::write_csv(&files.weather, &create_test_weather(year))?;
    table::write_csv(&files.drought, &create_test_drought(year, kansas_dsci))?;
    table::write_csv(&files.economic, &create_test_economic(year))?;
    Ok(())
}

/// Validate, merge, score and check one year, returning the SRI table.
fn run_offline_stages(layout: &DataLayout, year: i32) -> Result<Vec<SriResult>> {
    // ---
    let config = ScoringConfig::default();
    let files = layout.raw_files(year);

    let validated = pipeline::validate(layout, &files, year)?;
    assert!(validated.report.overall_passed);

    let merged = pipeline::merge(layout, &MergeInput { year, files }, &config)?;
    assert_eq!(merged.summary.total_records, 6);

    let scored = pipeline::score(
        layout,
        &ScoreInput {
            year,
            merged_file: merged.file_path.clone(),
        },
        &config,
    )?;
    assert_eq!(scored.summary.total_records, 6);

    let checked = pipeline::check(layout, year)?;
    assert!(checked.report.passed);

    Ok(table::read_csv(&layout.sri_file(year))?)
}

fn find<'a>(results: &'a [SriResult], state: &str, commodity: &str) -> &'a SriResult {
    results
        .iter()
        .find(|r| r.state_name == state && r.commodity == commodity)
        .unwrap_or_else(|| panic!("no SRI row for {} / {}", state, commodity))
}

#[test]
fn test_two_years_end_to_end() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let layout = DataLayout::under(dir.path());

    write_raw_files(&layout, 2023, 0.0, DataSource::Live)?;
    write_raw_files(&layout, 2024, 80.0, DataSource::Live)?;

    let first = run_offline_stages(&layout, 2023)?;
    let first_compare = pipeline::compare(&layout, 2023)?;
    assert!(!first_compare.comparison_available);

    let second = run_offline_stages(&layout, 2024)?;

    // Only the Kansas drought signal changed: 80 points at weight 0.25
    let before = find(&first, "Kansas", "CORN").sri;
    let after = find(&second, "Kansas", "CORN").sri;
    assert!((after - before - 20.0).abs() < 1e-9);
    assert_eq!(find(&second, "Iowa", "WHEAT").sri, find(&first, "Iowa", "WHEAT").sri);

    // Highest risk first
    assert!(second.windows(2).all(|w| w[0].sri >= w[1].sri));
    assert_eq!(second[0].state_name, "Kansas");
    assert!(second.iter().all(|r| r.data_source == DataSource::Live));

    let outcome = pipeline::compare(&layout, 2024)?;
    assert!(outcome.comparison_available);
    let summary_path = outcome.summary_path.as_deref().unwrap_or(Path::new(""));
    let summary: ComparisonSummary = table::read_json(summary_path)?;
    assert_eq!(summary.total_comparisons, 6);
    assert_eq!(summary.significant_changes, 2);
    assert_eq!(summary.trend_distribution["Increasing Risk"], 2);
    assert_eq!(summary.trend_distribution["Stable"], 4);
    assert_eq!(summary.top_10_increasing[0].state_name, "Kansas");
    assert_eq!(summary.digest.states_with_increasing_risk[0].state, "Kansas");

    let csv = std::fs::read_to_string(layout.comparison_file(2024))?;
    let header = csv.lines().next().unwrap_or_default();
    assert!(header.starts_with("state_name,commodity,SRI_2024,risk_category_2024,SRI_2023"));
    Ok(())
}

#[test]
fn test_fallback_crop_data_is_flagged_in_results() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let layout = DataLayout::under(dir.path());
    write_raw_files(&layout, 2024, 5.0, DataSource::Fallback)?;

    let validated = pipeline::validate(&layout, &layout.raw_files(2024), 2024)?;
    assert!(validated.report.datasets["crop"]
        .warnings
        .iter()
        .any(|w| w.contains("fallback")));

    let results = run_offline_stages(&layout, 2024)?;
    assert!(results.iter().all(|r| r.data_source == DataSource::Fallback));

    let raw = std::fs::read_to_string(layout.sri_file(2024))?;
    let header = raw.lines().next().unwrap_or_default();
    assert!(header.ends_with(",data_source"));
    assert!(header.contains(",SRI,risk_category,recommendation,"));
    Ok(())
}

#[test]
fn test_invalid_drought_data_halts_before_merge() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let layout = DataLayout::under(dir.path());
    write_raw_files(&layout, 2024, 140.0, DataSource::Live)?;

    let err = pipeline::validate(&layout, &layout.raw_files(2024), 2024)
        .err()
        .ok_or_else(|| anyhow::anyhow!("validation unexpectedly passed"))?;

    match err {
        PipelineError::ValidationFailed { stage, errors } => {
            assert_eq!(stage, "dataset");
            assert!(errors.iter().any(|e| e.starts_with("drought: DSCI out of valid range")));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(layout.validation_report_file(2024).exists());
    assert!(!layout.merged_file(2024).exists());
    Ok(())
}

#[test]
fn test_neutral_inputs_score_low() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let layout = DataLayout::under(dir.path());
    write_raw_files(&layout, 2024, 5.0, DataSource::Live)?;

    let results = run_offline_stages(&layout, 2024)?;

    assert!(results
        .iter()
        .all(|r| (0.0..=100.0).contains(&r.sri) && r.risk_category <= RiskCategory::High));
    Ok(())
}

/// Hand-written raw files for 45 states, as an upstream export would look,
/// with a few null spellings under the warning threshold.
fn write_raw_files_with_gaps(layout: &DataLayout, year: i32) -> Result<()> {
    // ---
    let files = layout.raw_files(year);
    let mut crop = String::from("year,state_name,commodity,yield_per_acre,data_source\n");
    let mut weather = String::from(
        "state_name,year,avg_temp,max_temp,min_temp,total_precip,total_gdd,avg_humidity,data_source\n",
    );
    let mut drought = String::from(
        "state_name,year,avg_dsci,avg_d0_pct,avg_d1_pct,avg_d2_pct,avg_d3_pct,avg_d4_pct,avg_none_pct,drought_category,data_source\n",
    );
    for i in 0..45 {
        let state = format!("State {:02}", i);
        for (commodity, base) in [("CORN", 180.0), ("SOYBEANS", 55.0), ("WHEAT", 50.0)] {
            crop.push_str(&format!("{},{},{},{:.1},live\n", year, state, commodity, base + i as f64));
        }
        let avg_temp = if i == 0 { "NA" } else { "70" };
        let total_precip = if i == 1 { "nan" } else { "22" };
        weather.push_str(&format!(
            "{},{},{},84,55,{},2600,66,live\n",
            state, year, avg_temp, total_precip
        ));
        let avg_dsci = if i == 2 { "None" } else { "5" };
        drought.push_str(&format!(
            "{},{},{},10,5,0,0,0,85,None,live\n",
            state, year, avg_dsci
        ));
    }
    let mut economic = String::from("commodity,year,price_index,supply_risk_score,data_source\n");
    for commodity in ["CORN", "SOYBEANS", "WHEAT"] {
        economic.push_str(&format!("{},{},100,70,live\n", commodity, year));
    }

    if let Some(parent) = files.crop.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&files.crop, crop)?;
    std::fs::write(&files.weather, weather)?;
    std::fs::write(&files.drought, drought)?;
    std::fs::write(&files.economic, economic)?;
    Ok(())
}

#[test]
fn test_null_spellings_are_imputed_through_scoring() -> Result<()> {
    // ---
    let dir = TempDir::new()?;
    let layout = DataLayout::under(dir.path());
    let config = ScoringConfig::default();
    write_raw_files_with_gaps(&layout, 2024)?;
    let files = layout.raw_files(2024);

    let validated = pipeline::validate(&layout, &files, 2024)?;
    assert!(validated.report.overall_passed);
    assert!(validated.report.datasets["weather"].warnings.is_empty());

    let merged = pipeline::merge(&layout, &MergeInput { year: 2024, files }, &config)?;
    assert_eq!(merged.summary.total_records, 135);
    assert_eq!(merged.summary.imputed["avg_temp"], 3);
    assert_eq!(merged.summary.imputed["total_precip"], 3);
    assert_eq!(merged.summary.imputed["avg_dsci"], 3);

    let records: Vec<MergedRecord> = table::read_csv(&merged.file_path)?;
    let imputed: Vec<&MergedRecord> = records.iter().filter(|r| r.imputed_fields > 0).collect();
    assert_eq!(imputed.len(), 9);
    assert!(imputed.iter().all(|r| r.imputed_fields == 1));
    // No other value for these states, so the table-wide mean or neutral value is used
    for r in imputed {
        match r.state_name.as_str() {
            "State 00" => assert_eq!(r.avg_temp, 70.0),
            "State 01" => assert_eq!(r.total_precip, 22.0),
            "State 02" => assert_eq!(r.avg_dsci, 0.0),
            other => panic!("unexpected imputation for {}", other),
        }
    }

    let scored = pipeline::score(
        &layout,
        &ScoreInput {
            year: 2024,
            merged_file: merged.file_path.clone(),
        },
        &config,
    )?;
    assert_eq!(scored.summary.total_records, 135);

    let checked = pipeline::check(&layout, 2024)?;
    assert!(checked.report.passed);
    let results: Vec<SriResult> = table::read_csv(&layout.sri_file(2024))?;
    assert!(results
        .iter()
        .all(|r| r.sri.is_finite() && (0.0..=100.0).contains(&r.sri)));
    Ok(())
}
