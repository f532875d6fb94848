//! Stock Risk Index calculator.
//!
//! Each [`MergedRecord`] is scored independently: four component risks, each
//! clipped to [0, 100], are combined by fixed weights into the SRI, which is
//! then banded into a [`RiskCategory`] with a stockpile recommendation.
//!
//! Every constant of the model lives in [`ScoringConfig`], a versioned and
//! serializable methodology handed in by the caller. The built-in methodology
//! is version `1.0.0`; a replacement can be loaded from JSON with
//! [`ScoringConfig::from_file`].

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::models::{MergedRecord, RiskCategory, SriResult};
use crate::stats;

pub const METHODOLOGY_VERSION: &str = "1.0.0";

// ---

/// Weights of the four components in the final SRI. They must sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentWeights {
    pub yield_risk: f64,
    pub weather_risk: f64,
    pub drought_risk: f64,
    pub economic_risk: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            yield_risk: 0.35,
            weather_risk: 0.25,
            drought_risk: 0.25,
            economic_risk: 0.15,
        }
    }
}

impl ComponentWeights {
    pub fn sum(&self) -> f64 {
        self.yield_risk + self.weather_risk + self.drought_risk + self.economic_risk
    }
}

/// Reference values the merger uses to derive model features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureReference {
    /// Crop-optimal growing-season temperature (°F) for `temp_stress`.
    pub optimal_temp_f: f64,
    /// Adequate growing-season precipitation (inches) for `precip_deficit`.
    pub adequate_precip_in: f64,
}

impl Default for FeatureReference {
    fn default() -> Self {
        Self {
            optimal_temp_f: 75.0,
            adequate_precip_in: 20.0,
        }
    }
}

/// `clip(baseline − slope · yield_zscore, 0, 100)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YieldModel {
    pub baseline: f64,
    pub slope: f64,
}

impl Default for YieldModel {
    fn default() -> Self {
        Self {
            baseline: 50.0,
            slope: 20.0,
        }
    }
}

/// Temperature and precipitation stress each scale linearly against a
/// reference range up to `stress_points`; a GDD shortfall below
/// `gdd_reference` adds one point per `gdd_per_point` up to `gdd_max_points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherModel {
    pub temp_stress_range: f64,
    pub precip_deficit_range: f64,
    pub stress_points: f64,
    pub gdd_reference: f64,
    pub gdd_per_point: f64,
    pub gdd_max_points: f64,
    pub temp_weight: f64,
    pub precip_weight: f64,
    pub gdd_weight: f64,
}

impl Default for WeatherModel {
    fn default() -> Self {
        Self {
            temp_stress_range: 20.0,
            precip_deficit_range: 30.0,
            stress_points: 40.0,
            gdd_reference: 1500.0,
            gdd_per_point: 50.0,
            gdd_max_points: 20.0,
            temp_weight: 0.3,
            precip_weight: 0.3,
            gdd_weight: 0.4,
        }
    }
}

/// `supply_weight · supply_risk + price_weight · clip(|price − baseline| / divisor, 0, cap)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EconomicModel {
    pub supply_weight: f64,
    pub price_weight: f64,
    pub price_baseline: f64,
    pub price_divisor: f64,
    pub price_cap: f64,
}

impl Default for EconomicModel {
    fn default() -> Self {
        Self {
            supply_weight: 0.7,
            price_weight: 0.3,
            price_baseline: 100.0,
            price_divisor: 2.0,
            price_cap: 50.0,
        }
    }
}

/// Lower bounds of the Moderate, High and Very High bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryBreakpoints {
    pub moderate: f64,
    pub high: f64,
    pub very_high: f64,
}

impl Default for CategoryBreakpoints {
    fn default() -> Self {
        Self {
            moderate: 25.0,
            high: 50.0,
            very_high: 75.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendations {
    pub low: String,
    pub moderate: String,
    pub high: String,
    pub very_high: String,
}

impl Default for Recommendations {
    fn default() -> Self {
        Self {
            low: "Normal inventory".to_string(),
            moderate: "Monitor closely, consider +5% stockpile".to_string(),
            high: "Increase stockpile by +15%".to_string(),
            very_high: "Critical: Increase stockpile by +25%".to_string(),
        }
    }
}

/// Versioned scoring methodology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub version: String,
    pub weights: ComponentWeights,
    pub features: FeatureReference,
    pub yield_model: YieldModel,
    pub weather_model: WeatherModel,
    pub economic_model: EconomicModel,
    pub breakpoints: CategoryBreakpoints,
    pub recommendations: Recommendations,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            version: METHODOLOGY_VERSION.to_string(),
            weights: ComponentWeights::default(),
            features: FeatureReference::default(),
            yield_model: YieldModel::default(),
            weather_model: WeatherModel::default(),
            economic_model: EconomicModel::default(),
            breakpoints: CategoryBreakpoints::default(),
            recommendations: Recommendations::default(),
        }
    }
}

impl ScoringConfig {
    /// Load a methodology from JSON. Fields absent from the file keep their
    /// built-in values.
    pub fn from_file(path: &Path) -> Result<Self> {
        // ---
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Cannot read scoring config {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: ScoringConfig = serde_json::from_str(&text).map_err(|e| {
            PipelineError::Config(format!(
                "Invalid scoring config {}: {}",
                path.display(),
                e
            ))
        })?;
        config.check()?;
        Ok(config)
    }

    /// Reject methodologies whose weights do not sum to 1 or whose bands
    /// are not strictly ascending within (0, 100].
    pub fn check(&self) -> Result<()> {
        // ---
        if (self.weights.sum() - 1.0).abs() > 1e-9 {
            return Err(PipelineError::Config(format!(
                "Scoring weights sum to {}, expected 1",
                self.weights.sum()
            )));
        }
        let b = &self.breakpoints;
        if !(0.0 < b.moderate && b.moderate < b.high && b.high < b.very_high && b.very_high <= 100.0)
        {
            return Err(PipelineError::Config(format!(
                "Risk category breakpoints must ascend within (0, 100]: {}/{}/{}",
                b.moderate, b.high, b.very_high
            )));
        }
        Ok(())
    }

    pub fn categorize(&self, sri: f64) -> RiskCategory {
        let b = &self.breakpoints;
        if sri < b.moderate {
            RiskCategory::Low
        } else if sri < b.high {
            RiskCategory::Moderate
        } else if sri < b.very_high {
            RiskCategory::High
        } else {
            RiskCategory::VeryHigh
        }
    }

    /// Recommended action; depends on the category alone.
    pub fn recommendation(&self, category: RiskCategory) -> &str {
        match category {
            RiskCategory::Low => &self.recommendations.low,
            RiskCategory::Moderate => &self.recommendations.moderate,
            RiskCategory::High => &self.recommendations.high,
            RiskCategory::VeryHigh => &self.recommendations.very_high,
        }
    }
}

// ---

/// The four component risks of one record, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub yield_risk: f64,
    pub weather_risk: f64,
    pub drought_risk: f64,
    pub economic_risk: f64,
}

pub fn yield_risk(record: &MergedRecord, config: &ScoringConfig) -> f64 {
    let m = &config.yield_model;
    stats::clip(m.baseline - m.slope * record.yield_zscore, 0.0, 100.0)
}

pub fn weather_risk(record: &MergedRecord, config: &ScoringConfig) -> f64 {
    // ---
    let m = &config.weather_model;
    let temp = record.temp_stress / m.temp_stress_range * m.stress_points;
    let precip = record.precip_deficit / m.precip_deficit_range * m.stress_points;
    let gdd = stats::clip(
        (m.gdd_reference - record.total_gdd) / m.gdd_per_point,
        0.0,
        m.gdd_max_points,
    );
    stats::clip(
        m.temp_weight * temp + m.precip_weight * precip + m.gdd_weight * gdd,
        0.0,
        100.0,
    )
}

/// The season-average DSCI is already a 0–100 severity index.
pub fn drought_risk(record: &MergedRecord) -> f64 {
    stats::clip(record.avg_dsci, 0.0, 100.0)
}

pub fn economic_risk(record: &MergedRecord, config: &ScoringConfig) -> f64 {
    // ---
    let m = &config.economic_model;
    let price = stats::clip(
        (record.price_index - m.price_baseline).abs() / m.price_divisor,
        0.0,
        m.price_cap,
    );
    stats::clip(
        m.supply_weight * record.supply_risk_score + m.price_weight * price,
        0.0,
        100.0,
    )
}

pub fn components(record: &MergedRecord, config: &ScoringConfig) -> Components {
    Components {
        yield_risk: yield_risk(record, config),
        weather_risk: weather_risk(record, config),
        drought_risk: drought_risk(record),
        economic_risk: economic_risk(record, config),
    }
}

/// Weighted sum of the components before clipping.
pub fn composite(c: &Components, weights: &ComponentWeights) -> f64 {
    weights.yield_risk * c.yield_risk
        + weights.weather_risk * c.weather_risk
        + weights.drought_risk * c.drought_risk
        + weights.economic_risk * c.economic_risk
}

/// Score one merged record.
pub fn score_record(record: &MergedRecord, config: &ScoringConfig) -> SriResult {
    // ---
    let c = components(record, config);
    let sri = stats::clip(composite(&c, &config.weights), 0.0, 100.0);
    let risk_category = config.categorize(sri);

    SriResult {
        year: record.year,
        state_name: record.state_name.clone(),
        commodity: record.commodity.clone(),
        yield_per_acre: record.yield_per_acre,
        yield_risk: c.yield_risk,
        weather_risk: c.weather_risk,
        drought_risk: c.drought_risk,
        economic_risk: c.economic_risk,
        sri,
        risk_category,
        recommendation: config.recommendation(risk_category).to_string(),
        avg_temp: record.avg_temp,
        total_precip: record.total_precip,
        avg_dsci: record.avg_dsci,
        data_source: record.data_source,
    }
}

/// Clipping would hide a NaN input, so model inputs are checked first.
fn check_inputs(record: &MergedRecord) -> Result<()> {
    // ---
    let checked = [
        ("yield_zscore", record.yield_zscore),
        ("avg_temp", record.avg_temp),
        ("total_precip", record.total_precip),
        ("total_gdd", record.total_gdd),
        ("avg_dsci", record.avg_dsci),
        ("price_index", record.price_index),
        ("supply_risk_score", record.supply_risk_score),
        ("temp_stress", record.temp_stress),
        ("precip_deficit", record.precip_deficit),
    ];

    for (name, value) in checked {
        if !value.is_finite() {
            return Err(PipelineError::Invariant(format!(
                "{} = {} for {} / {} (model inputs must be finite)",
                name, value, record.state_name, record.commodity
            )));
        }
    }
    Ok(())
}

fn check_invariants(result: &SriResult) -> Result<()> {
    // ---
    let checked = [
        ("yield_risk", result.yield_risk),
        ("weather_risk", result.weather_risk),
        ("drought_risk", result.drought_risk),
        ("economic_risk", result.economic_risk),
        ("SRI", result.sri),
    ];

    for (name, value) in checked {
        if !value.is_finite() || !(0.0..=100.0).contains(&value) {
            return Err(PipelineError::Invariant(format!(
                "{} = {} for {} / {} (expected a finite value in [0, 100])",
                name, value, result.state_name, result.commodity
            )));
        }
    }
    Ok(())
}

/// Highest risk first; ties by state then commodity so output is stable.
fn by_risk_desc(a: &SriResult, b: &SriResult) -> Ordering {
    b.sri
        .total_cmp(&a.sri)
        .then_with(|| a.state_name.cmp(&b.state_name))
        .then_with(|| a.commodity.cmp(&b.commodity))
}

/// Score the merged table.
///
/// Fails with [`PipelineError::Invariant`] if any value leaves [0, 100] or is
/// not finite after clipping; that indicates a defect in the inputs' upstream
/// processing, not a data-quality issue, so no partial table is returned.
pub fn score(records: &[MergedRecord], config: &ScoringConfig) -> Result<Vec<SriResult>> {
    // ---
    info!(
        "Calculating SRI for {} records (methodology v{})",
        records.len(),
        config.version
    );

    let mut results = Vec::with_capacity(records.len());
    for record in records {
        check_inputs(record)?;
        let result = score_record(record, config);
        check_invariants(&result)?;
        debug!(
            "{} / {}: SRI {:.2} ({})",
            result.state_name, result.commodity, result.sri, result.risk_category
        );
        results.push(result);
    }
    results.sort_by(by_risk_desc);
    Ok(results)
}

// ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentAverages {
    pub yield_risk: f64,
    pub weather_risk: f64,
    pub drought_risk: f64,
    pub economic_risk: f64,
}

/// Statistics over one scored table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub year: i32,
    pub total_records: usize,
    pub avg_sri: f64,
    pub median_sri: f64,
    pub min_sri: f64,
    pub max_sri: f64,
    /// Record count per category, keyed by category label.
    pub risk_distribution: BTreeMap<String, usize>,
    /// States with at least one record at SRI ≥ 50.
    pub high_risk_states: usize,
    pub component_averages: ComponentAverages,
    pub fallback_records: usize,
    pub methodology_version: String,
}

impl ScoreSummary {
    pub fn from_results(year: i32, results: &[SriResult], config: &ScoringConfig) -> Self {
        // ---
        let column = |f: fn(&SriResult) -> f64| results.iter().map(f).collect::<Vec<_>>();
        let sri = column(|r| r.sri);

        let mut risk_distribution: BTreeMap<String, usize> = RiskCategory::ALL
            .iter()
            .map(|c| (c.to_string(), 0))
            .collect();
        for r in results {
            *risk_distribution.entry(r.risk_category.to_string()).or_default() += 1;
        }

        let high_risk_states = results
            .iter()
            .filter(|r| r.sri >= config.breakpoints.high)
            .map(|r| r.state_name.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        Self {
            year,
            total_records: results.len(),
            avg_sri: stats::mean(&sri),
            median_sri: stats::median(sri.clone()),
            min_sri: stats::min(&sri),
            max_sri: stats::max(&sri),
            risk_distribution,
            high_risk_states,
            component_averages: ComponentAverages {
                yield_risk: stats::mean(&column(|r| r.yield_risk)),
                weather_risk: stats::mean(&column(|r| r.weather_risk)),
                drought_risk: stats::mean(&column(|r| r.drought_risk)),
                economic_risk: stats::mean(&column(|r| r.economic_risk)),
            },
            fallback_records: results.iter().filter(|r| r.data_source.is_fallback()).count(),
            methodology_version: config.version.clone(),
        }
    }

    /// Records in the High and Very High bands.
    pub fn high_risk_records(&self) -> usize {
        [RiskCategory::High, RiskCategory::VeryHigh]
            .iter()
            .filter_map(|c| self.risk_distribution.get(c.as_str()))
            .sum()
    }
}
