//! Year-over-year comparison of scored tables.
//!
//! The current table is left-joined onto the prior year's on (state,
//! commodity). A pair with no prior score is compared against 0. Trends use a
//! fixed ±5 point deadband and a change of 10 points or more is significant.
//! A missing prior-year table is normal for the first year the pipeline runs
//! and yields an "unavailable" outcome instead of an error.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::{commodity_key, state_key, RiskCategory, SriResult};
use crate::stats;

pub const TREND_DEADBAND: f64 = 5.0;
pub const SIGNIFICANT_CHANGE: f64 = 10.0;
/// Change counted as a major increase in the key findings.
const MAJOR_INCREASE: f64 = 20.0;
const TOP_N: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trend {
    Stable,
    #[serde(rename = "Increasing Risk")]
    IncreasingRisk,
    #[serde(rename = "Decreasing Risk")]
    DecreasingRisk,
}

impl Trend {
    pub const ALL: [Trend; 3] = [Trend::IncreasingRisk, Trend::Stable, Trend::DecreasingRisk];

    pub fn classify(change: f64) -> Trend {
        if change.abs() < TREND_DEADBAND {
            Trend::Stable
        } else if change >= TREND_DEADBAND {
            Trend::IncreasingRisk
        } else {
            Trend::DecreasingRisk
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Stable => "Stable",
            Trend::IncreasingRisk => "Increasing Risk",
            Trend::DecreasingRisk => "Decreasing Risk",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (state, commodity) pair across the two years.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub state_name: String,
    pub commodity: String,
    pub sri_current: f64,
    pub category_current: RiskCategory,
    /// 0 when the pair was not scored in the prior year.
    pub sri_prior: f64,
    pub category_prior: Option<RiskCategory>,
    pub sri_change: f64,
    /// 0 when the prior score is 0.
    pub sri_change_pct: f64,
    pub trend: Trend,
    pub significant_change: bool,
}

/// Join the current table onto the prior one and classify every change.
///
/// Rows are ordered by change, largest increase first.
pub fn compare_tables(current: &[SriResult], prior: &[SriResult]) -> Vec<ComparisonRow> {
    // ---
    let mut prior_index: HashMap<(String, String), &SriResult> = HashMap::new();
    for r in prior {
        prior_index
            .entry((state_key(&r.state_name), commodity_key(&r.commodity)))
            .or_insert(r);
    }

    let mut rows: Vec<ComparisonRow> = current
        .iter()
        .map(|cur| {
            let previous =
                prior_index.get(&(state_key(&cur.state_name), commodity_key(&cur.commodity)));
            let sri_prior = previous.map(|p| p.sri).unwrap_or(0.0);
            let sri_change = cur.sri - sri_prior;
            let sri_change_pct = if sri_prior == 0.0 {
                0.0
            } else {
                sri_change / sri_prior * 100.0
            };

            ComparisonRow {
                state_name: cur.state_name.clone(),
                commodity: cur.commodity.clone(),
                sri_current: cur.sri,
                category_current: cur.risk_category,
                sri_prior,
                category_prior: previous.map(|p| p.risk_category),
                sri_change,
                sri_change_pct,
                trend: Trend::classify(sri_change),
                significant_change: sri_change.abs() >= SIGNIFICANT_CHANGE,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.sri_change
            .total_cmp(&a.sri_change)
            .then_with(|| a.state_name.cmp(&b.state_name))
            .then_with(|| a.commodity.cmp(&b.commodity))
    });
    rows
}

/// Header of the comparison CSV; score columns carry their year.
pub fn csv_header(year: i32) -> Vec<String> {
    vec![
        "state_name".to_string(),
        "commodity".to_string(),
        format!("SRI_{}", year),
        format!("risk_category_{}", year),
        format!("SRI_{}", year - 1),
        format!("risk_category_{}", year - 1),
        "SRI_change".to_string(),
        "SRI_change_pct".to_string(),
        "trend".to_string(),
        "significant_change".to_string(),
    ]
}

pub fn csv_records(rows: &[ComparisonRow]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|r| {
            vec![
                r.state_name.clone(),
                r.commodity.clone(),
                r.sri_current.to_string(),
                r.category_current.to_string(),
                r.sri_prior.to_string(),
                r.category_prior.map(|c| c.to_string()).unwrap_or_default(),
                r.sri_change.to_string(),
                r.sri_change_pct.to_string(),
                r.trend.to_string(),
                r.significant_change.to_string(),
            ]
        })
        .collect()
}

// ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub state_name: String,
    pub commodity: String,
    pub sri_current: f64,
    pub sri_prior: f64,
    pub sri_change: f64,
}

impl From<&ComparisonRow> for ChangeEntry {
    fn from(r: &ComparisonRow) -> Self {
        Self {
            state_name: r.state_name.clone(),
            commodity: r.commodity.clone(),
            sri_current: r.sri_current,
            sri_prior: r.sri_prior,
            sri_change: r.sri_change,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: String,
    pub avg_change: f64,
}

/// Trend highlights aggregated by state and by commodity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendDigest {
    pub states_with_increasing_risk: Vec<StateChange>,
    pub states_with_decreasing_risk: Vec<StateChange>,
    pub commodity_avg_change: BTreeMap<String, f64>,
    pub key_findings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub current_year: i32,
    pub previous_year: i32,
    pub total_comparisons: usize,
    /// Pairs that had a prior-year score.
    pub matched_prior: usize,
    pub national_avg_current: f64,
    pub national_avg_previous: f64,
    pub national_avg_change: f64,
    pub trend_distribution: BTreeMap<String, usize>,
    pub significant_changes: usize,
    pub top_10_increasing: Vec<ChangeEntry>,
    pub top_10_decreasing: Vec<ChangeEntry>,
    pub digest: TrendDigest,
}

impl ComparisonSummary {
    /// `rows` must be in [`compare_tables`] order.
    pub fn from_rows(year: i32, rows: &[ComparisonRow]) -> Self {
        // ---
        let column = |f: fn(&ComparisonRow) -> f64| rows.iter().map(f).collect::<Vec<_>>();

        let mut trend_distribution: BTreeMap<String, usize> =
            Trend::ALL.iter().map(|t| (t.to_string(), 0)).collect();
        for r in rows {
            *trend_distribution.entry(r.trend.to_string()).or_default() += 1;
        }

        Self {
            current_year: year,
            previous_year: year - 1,
            total_comparisons: rows.len(),
            matched_prior: rows.iter().filter(|r| r.category_prior.is_some()).count(),
            national_avg_current: stats::mean(&column(|r| r.sri_current)),
            national_avg_previous: stats::mean(&column(|r| r.sri_prior)),
            national_avg_change: stats::mean(&column(|r| r.sri_change)),
            trend_distribution,
            significant_changes: rows.iter().filter(|r| r.significant_change).count(),
            top_10_increasing: rows.iter().take(TOP_N).map(ChangeEntry::from).collect(),
            top_10_decreasing: rows.iter().rev().take(TOP_N).map(ChangeEntry::from).collect(),
            digest: trend_digest(rows),
        }
    }
}

fn trend_digest(rows: &[ComparisonRow]) -> TrendDigest {
    // ---
    let mut by_state: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    let mut by_commodity: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for r in rows {
        by_state.entry(&r.state_name).or_default().push(r.sri_change);
        by_commodity.entry(&r.commodity).or_default().push(r.sri_change);
    }

    let state_avg: Vec<StateChange> = by_state
        .into_iter()
        .map(|(state, changes)| StateChange {
            state: state.to_string(),
            avg_change: stats::mean(&changes),
        })
        .collect();

    let mut increasing: Vec<StateChange> = state_avg
        .iter()
        .filter(|s| s.avg_change >= TREND_DEADBAND)
        .cloned()
        .collect();
    increasing.sort_by(|a, b| b.avg_change.total_cmp(&a.avg_change));
    let mut decreasing: Vec<StateChange> = state_avg
        .iter()
        .filter(|s| s.avg_change <= -TREND_DEADBAND)
        .cloned()
        .collect();
    decreasing.sort_by(|a, b| a.avg_change.total_cmp(&b.avg_change));

    let mut key_findings = Vec::new();
    if increasing.len() > decreasing.len() {
        key_findings.push(format!(
            "More states showing increased risk ({}) than decreased ({})",
            increasing.len(),
            decreasing.len()
        ));
    }
    let major = rows.iter().filter(|r| r.sri_change >= MAJOR_INCREASE).count();
    if major > 0 {
        key_findings.push(format!(
            "{} state-commodity combinations show major risk increases (>{} points)",
            major, MAJOR_INCREASE
        ));
    }

    increasing.truncate(TOP_N);
    decreasing.truncate(TOP_N);

    TrendDigest {
        states_with_increasing_risk: increasing,
        states_with_decreasing_risk: decreasing,
        commodity_avg_change: by_commodity
            .into_iter()
            .map(|(c, changes)| (c.to_string(), stats::mean(&changes)))
            .collect(),
        key_findings,
    }
}

// ---

/// Result of the comparison stage. `comparison_available` is false, with a
/// reason, when there is no prior-year table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub comparison_available: bool,
    pub year: i32,
    pub previous_year: i32,
    pub reason: Option<String>,
    pub file_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    pub summary: Option<ComparisonSummary>,
}

impl ComparisonOutcome {
    pub fn unavailable(year: i32, reason: String) -> Self {
        Self {
            comparison_available: false,
            year,
            previous_year: year - 1,
            reason: Some(reason),
            file_path: None,
            summary_path: None,
            summary: None,
        }
    }

    pub fn available(
        year: i32,
        file_path: PathBuf,
        summary_path: PathBuf,
        summary: ComparisonSummary,
    ) -> Self {
        Self {
            comparison_available: true,
            year,
            previous_year: year - 1,
            reason: None,
            file_path: Some(file_path),
            summary_path: Some(summary_path),
            summary: Some(summary),
        }
    }
}
