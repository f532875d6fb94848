//! Post-score validation of the SRI table.
//!
//! Only structural problems are errors: missing key columns, no SRI values,
//! or SRI outside [0, 100], which clipping makes unreachable unless the
//! calculation itself is broken. Distribution shape and coverage findings
//! are warnings.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::stats;
use crate::table::ColumnTable;

const REQUIRED_COLUMNS: [&str; 4] = ["SRI", "state_name", "commodity", "risk_category"];
const COMPONENT_COLUMNS: [&str; 4] = ["yield_risk", "weather_risk", "drought_risk", "economic_risk"];

/// Band the national average SRI falls in for a typical year.
pub const EXPECTED_AVG_SRI: (f64, f64) = (20.0, 40.0);

/// Lowest SRI counted as high risk by the reasonableness check.
const HIGH_RISK_SRI: f64 = 50.0;

/// Post-score report, written next to the SRI table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultValidation {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub stats: BTreeMap<String, Value>,
    /// Absent when the table could not be read far enough to judge it.
    pub reasonableness: Option<Reasonableness>,
}

/// Advisory comparison of the table against historically typical values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasonableness {
    pub reasonable: bool,
    pub issues: Vec<String>,
    pub avg_sri: f64,
    pub expected_avg_range: (f64, f64),
    pub high_risk_pct: f64,
    pub commodity_avg_sri: BTreeMap<String, f64>,
}

impl ResultValidation {
    fn new() -> Self {
        Self {
            passed: false,
            errors: Vec::new(),
            warnings: Vec::new(),
            stats: BTreeMap::new(),
            reasonableness: None,
        }
    }

    fn error(&mut self, message: String) {
        error!("    {}", message);
        self.errors.push(message);
    }

    fn warn(&mut self, message: String) {
        warn!("    {}", message);
        self.warnings.push(message);
    }

    fn stat(&mut self, key: &str, value: impl Into<Value>) {
        self.stats.insert(key.to_string(), value.into());
    }

    fn finish(mut self) -> Self {
        self.passed = self.errors.is_empty();
        if self.passed {
            info!("  SRI validation passed ({} warnings)", self.warnings.len());
        } else {
            error!("  SRI validation failed: {} errors", self.errors.len());
        }
        self
    }
}

/// Validate a scored table on disk.
pub fn validate_results(path: &Path) -> ResultValidation {
    // ---
    info!("Validating SRI results in {}", path.display());
    let mut v = ResultValidation::new();

    let table = match ColumnTable::read(path) {
        Ok(table) => table,
        Err(e) => {
            v.error(format!("Error validating SRI: {}", e));
            return v.finish();
        }
    };

    let missing = table.missing_columns(&REQUIRED_COLUMNS);
    if !missing.is_empty() {
        v.error(format!("Missing columns: {}", missing.join(", ")));
        return v.finish();
    }

    let sri = table.values("SRI");
    if sri.is_empty() {
        v.error("No valid SRI values".to_string());
        return v.finish();
    }

    let (min_sri, max_sri) = (stats::min(&sri), stats::max(&sri));
    if min_sri < 0.0 || max_sri > 100.0 {
        v.error(format!(
            "SRI values out of range (0-100): {:.1} to {:.1}",
            min_sri, max_sri
        ));
    }
    let missing_sri = table.len() - sri.len();
    if missing_sri > 0 {
        v.warn(format!("{} records with missing SRI values", missing_sri));
    }

    check_components(&table, &mut v);

    let avg_sri = stats::mean(&sri);
    let std_sri = stats::sample_std(&sri);
    v.stat("total_records", table.len());
    v.stat("avg_sri", avg_sri);
    v.stat("median_sri", stats::median(sri.clone()));
    v.stat("std_sri", std_sri);
    v.stat("min_sri", min_sri);
    v.stat("max_sri", max_sri);

    if !(5.0..=95.0).contains(&avg_sri) {
        v.warn(format!("Unusual average SRI: {:.1} (expected 5-95)", avg_sri));
    }
    if std_sri < 5.0 {
        v.warn(format!(
            "Very low SRI variance: {:.1} (may indicate calculation issue)",
            std_sri
        ));
    }

    check_categories(&table, &mut v);
    check_coverage(&table, &mut v);

    let outliers = sri
        .iter()
        .filter(|x| (*x - avg_sri).abs() > 3.0 * std_sri)
        .count();
    v.stat("outliers", outliers);
    if outliers as f64 > table.len() as f64 * 0.05 {
        v.warn(format!("High number of outliers: {} records", outliers));
    }

    v.reasonableness = Some(check_reasonableness(&table, EXPECTED_AVG_SRI));
    v.finish()
}

fn check_components(table: &ColumnTable, v: &mut ResultValidation) {
    // ---
    let missing = table.missing_columns(&COMPONENT_COLUMNS);
    if !missing.is_empty() {
        v.warn(format!("Not all risk components present, missing: {}", missing.join(", ")));
    }
    for component in COMPONENT_COLUMNS.iter().filter(|c| table.has_column(c)) {
        let values = table.values(component);
        if values.iter().any(|x| !(0.0..=100.0).contains(x)) {
            v.warn(format!("{} has values outside 0-100 range", component));
        }
    }
}

fn check_categories(table: &ColumnTable, v: &mut ResultValidation) {
    // ---
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    if let Some(cells) = table.text("risk_category") {
        for cell in cells.into_iter().flatten() {
            *counts.entry(cell.to_string()).or_default() += 1;
        }
    }
    if counts.len() == 1 {
        v.warn("All records in single risk category (unusual)".to_string());
    }
    let counts: serde_json::Map<String, Value> =
        counts.into_iter().map(|(k, n)| (k, Value::from(n))).collect();
    v.stat("risk_categories", Value::Object(counts));
}

fn check_coverage(table: &ColumnTable, v: &mut ResultValidation) {
    // ---
    let states = table.distinct_count("state_name");
    v.stat("states", states);
    if states < 40 {
        v.warn(format!("Low state coverage: {} states (expected ~50)", states));
    }
    let commodities = table.distinct_count("commodity");
    v.stat("commodities", commodities);
    if commodities < 3 {
        v.warn(format!(
            "Low commodity coverage: {} commodities (expected 3)",
            commodities
        ));
    }
}

/// Compare a scored table with the ranges seen in typical years.
///
/// Purely advisory: the issues never affect `passed`.
pub fn check_reasonableness(table: &ColumnTable, expected_avg_range: (f64, f64)) -> Reasonableness {
    // ---
    let sri = table.values("SRI");
    let avg_sri = stats::mean(&sri);
    let mut issues = Vec::new();

    if avg_sri < expected_avg_range.0 {
        issues.push(format!(
            "Average SRI ({:.1}) below expected minimum ({})",
            avg_sri, expected_avg_range.0
        ));
    } else if avg_sri > expected_avg_range.1 {
        issues.push(format!(
            "Average SRI ({:.1}) above expected maximum ({})",
            avg_sri, expected_avg_range.1
        ));
    }

    let high_risk_pct = if sri.is_empty() {
        0.0
    } else {
        sri.iter().filter(|x| **x >= HIGH_RISK_SRI).count() as f64 / sri.len() as f64 * 100.0
    };
    if high_risk_pct > 30.0 {
        issues.push(format!(
            "High percentage of high-risk records: {:.1}% (expected < 30%)",
            high_risk_pct
        ));
    } else if high_risk_pct < 5.0 {
        issues.push(format!(
            "Very low percentage of high-risk records: {:.1}% (unusual)",
            high_risk_pct
        ));
    }

    let mut by_commodity: HashMap<&str, Vec<f64>> = HashMap::new();
    if let (Some(commodities), Some(values)) = (table.text("commodity"), table.numbers("SRI")) {
        for (commodity, value) in commodities.into_iter().zip(values) {
            if let (Some(c), Some(x)) = (commodity, value) {
                by_commodity.entry(c).or_default().push(x);
            }
        }
    }
    let commodity_avg_sri: BTreeMap<String, f64> = by_commodity
        .into_iter()
        .map(|(c, v)| (c.to_string(), stats::mean(&v)))
        .collect();
    for (commodity, avg) in &commodity_avg_sri {
        if *avg > 70.0 {
            issues.push(format!("{} has very high average SRI: {:.1}", commodity, avg));
        } else if *avg < 10.0 {
            issues.push(format!("{} has very low average SRI: {:.1}", commodity, avg));
        }
    }

    let reasonable = issues.is_empty();
    if reasonable {
        info!("    SRI results appear reasonable");
    } else {
        warn!("    {} reasonableness concerns", issues.len());
    }

    Reasonableness {
        reasonable,
        issues,
        avg_sri,
        expected_avg_range,
        high_risk_pct,
        commodity_avg_sri,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::path::PathBuf;

    const HEADER: &str = "year,state_name,commodity,yield_per_acre,yield_risk,weather_risk,drought_risk,economic_risk,SRI,risk_category,recommendation,avg_temp,total_precip,avg_dsci,data_source\n";

    fn create_test_results(dir: &Path, rows: &[(String, &str, f64)]) -> PathBuf {
        // ---
        let mut s = String::from(HEADER);
        for (state, commodity, sri) in rows {
            let category = if *sri < 25.0 {
                "Low"
            } else if *sri < 50.0 {
                "Moderate"
            } else if *sri < 75.0 {
                "High"
            } else {
                "Very High"
            };
            s.push_str(&format!(
                "2024,{},{},150,50,10,20,35,{},{},text,70,20,10,live\n",
                state, commodity, sri, category
            ));
        }
        let path = dir.join("sri_results_2024.csv");
        std::fs::write(&path, s).unwrap();
        path
    }

    fn spread_rows() -> Vec<(String, &'static str, f64)> {
        let mut rows = Vec::new();
        for i in 0..45 {
            for (j, commodity) in ["CORN", "SOYBEANS", "WHEAT"].iter().enumerate() {
                rows.push((format!("State {}", i), *commodity, 10.0 + ((i * 3 + j) % 50) as f64));
            }
        }
        rows
    }

    #[test]
    fn test_well_formed_table_passes() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_results(dir.path(), &spread_rows());

        let v = validate_results(&path);

        assert!(v.passed, "{:?}", v.errors);
        assert!(v.warnings.is_empty(), "{:?}", v.warnings);
        assert_eq!(v.stats["states"], 45);
        assert!(v.reasonableness.is_some());
    }

    #[test]
    fn test_out_of_range_sri_is_error() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = create_test_results(
            dir.path(),
            &[("Iowa".to_string(), "CORN", 30.0), ("Ohio".to_string(), "CORN", 104.0)],
        );

        let v = validate_results(&path);

        assert!(!v.passed);
        assert_eq!(v.errors, vec!["SRI values out of range (0-100): 30.0 to 104.0"]);
    }

    #[test]
    fn test_uniform_output_is_only_warned() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<_> = (0..10).map(|i| (format!("S{}", i), "CORN", 22.75)).collect();
        let path = create_test_results(dir.path(), &rows);

        let v = validate_results(&path);

        assert!(v.passed);
        assert!(v.warnings.iter().any(|w| w.starts_with("Very low SRI variance")));
        assert!(v.warnings.contains(&"All records in single risk category (unusual)".to_string()));
        assert!(v.warnings.iter().any(|w| w.starts_with("Low state coverage")));
        assert!(v.warnings.iter().any(|w| w.starts_with("Low commodity coverage")));
    }

    #[test]
    fn test_missing_required_column() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sri.csv");
        std::fs::write(&path, "state_name,commodity,SRI\nIowa,CORN,40\n").unwrap();

        let v = validate_results(&path);

        assert!(!v.passed);
        assert_eq!(v.errors, vec!["Missing columns: risk_category"]);
        assert!(v.reasonableness.is_none());
    }

    #[test]
    fn test_reasonableness_flags_skewed_tables() {
        // ---
        let data = "state_name,commodity,SRI\nIowa,CORN,80\nOhio,CORN,90\nIowa,WHEAT,5\nOhio,WHEAT,6\n";
        let table = ColumnTable::from_reader(data.as_bytes()).unwrap();

        let r = check_reasonableness(&table, (20.0, 40.0));

        assert!(!r.reasonable);
        assert_eq!(r.high_risk_pct, 50.0);
        assert_eq!(r.commodity_avg_sri["CORN"], 85.0);
        assert_eq!(r.commodity_avg_sri["WHEAT"], 5.5);
        assert!(r.issues.iter().any(|i| i.starts_with("Average SRI")));
        assert!(r.issues.iter().any(|i| i.starts_with("High percentage")));
        assert!(r.issues.iter().any(|i| i.starts_with("CORN has very high")));
        assert!(r.issues.iter().any(|i| i.starts_with("WHEAT has very low")));
    }
}
