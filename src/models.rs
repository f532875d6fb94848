//! Data models flowing between the pipeline stages.
//!
//! Raw records mirror the per-source CSV files written by the collectors
//! (numeric cells that are null, unparseable or non-finite read as `None`),
//! `MergedRecord` is the unit of analysis keyed by (year, state, commodity),
//! and `SriResult` is one scored row of the published results table.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::table::lenient_number;

// ---

/// The four upstream datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Crop,
    Weather,
    Drought,
    Economic,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Crop,
        Source::Weather,
        Source::Drought,
        Source::Economic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Crop => "crop",
            Source::Weather => "weather",
            Source::Drought => "drought",
            Source::Economic => "economic",
        }
    }

    /// File name stem used under the raw root.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Source::Crop => "crop_yield",
            Source::Weather => "weather",
            Source::Drought => "drought",
            Source::Economic => "economic",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown source '{}' (expected crop, weather, drought or economic)", s)
            })
    }
}

/// Commodities covered by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Commodity {
    Corn,
    Soybeans,
    Wheat,
}

impl Commodity {
    pub const ALL: [Commodity; 3] = [Commodity::Corn, Commodity::Soybeans, Commodity::Wheat];

    /// Upper-case name as used by the USDA APIs and in every output file.
    pub fn as_str(&self) -> &'static str {
        match self {
            Commodity::Corn => "CORN",
            Commodity::Soybeans => "SOYBEANS",
            Commodity::Wheat => "WHEAT",
        }
    }
}

impl fmt::Display for Commodity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a value came from the live upstream API or from the synthetic
/// neutral dataset substituted when the source was unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Live,
    Fallback,
}

impl DataSource {
    /// Fallback taints anything it is combined with.
    pub fn combine(self, other: DataSource) -> DataSource {
        if self == DataSource::Fallback || other == DataSource::Fallback {
            DataSource::Fallback
        } else {
            DataSource::Live
        }
    }

    pub fn is_fallback(&self) -> bool {
        *self == DataSource::Fallback
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Live => f.write_str("live"),
            DataSource::Fallback => f.write_str("fallback"),
        }
    }
}

/// One collector's output before it is written to disk.
#[derive(Debug, Clone)]
pub struct RawDataset<T> {
    pub source: Source,
    pub year: i32,
    pub data_source: DataSource,
    pub records: Vec<T>,
    /// Records obtained per queried key (state or commodity).
    pub per_key: BTreeMap<String, usize>,
}

// ---

/// `crop_yield_{year}.csv`: one row per state × commodity × year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
    pub year: i32,
    pub state_name: String,
    pub commodity: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub yield_per_acre: Option<f64>,
    #[serde(default)]
    pub data_source: DataSource,
}

/// `weather_{year}.csv`: growing-season aggregates per state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub state_name: String,
    pub year: i32,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub max_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub min_temp: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_precip: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_gdd: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_humidity: Option<f64>,
    #[serde(default)]
    pub data_source: DataSource,
}

/// `drought_{year}.csv`: growing-season drought statistics per state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroughtRecord {
    pub state_name: String,
    pub year: i32,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_dsci: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_d0_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_d1_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_d2_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_d3_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_d4_pct: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub avg_none_pct: Option<f64>,
    pub drought_category: String,
    #[serde(default)]
    pub data_source: DataSource,
}

/// `economic_{year}.csv`: supply and demand indicators per commodity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicRecord {
    pub commodity: String,
    pub year: i32,
    #[serde(default, deserialize_with = "lenient_number")]
    pub production: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total_supply: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub domestic_consumption: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub exports: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub ending_stocks: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub stocks_to_use_ratio: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price_index: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub supply_risk_score: Option<f64>,
    #[serde(default)]
    pub data_source: DataSource,
}

/// Joined, imputed and feature-enriched row: the model's input.
///
/// Every numeric field is populated; nulls are resolved by the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub year: i32,
    pub state_name: String,
    pub commodity: String,
    pub yield_per_acre: f64,
    pub yield_zscore: f64,
    pub avg_temp: f64,
    pub total_precip: f64,
    pub total_gdd: f64,
    pub avg_humidity: f64,
    pub avg_dsci: f64,
    pub price_index: f64,
    pub supply_risk_score: f64,
    pub temp_stress: f64,
    pub precip_deficit: f64,
    #[serde(default)]
    pub data_source: DataSource,
    #[serde(default)]
    pub imputed_fields: u32,
}

/// Ordered risk bands assigned from the final SRI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 4] = [
        RiskCategory::Low,
        RiskCategory::Moderate,
        RiskCategory::High,
        RiskCategory::VeryHigh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskCategory::Low => "Low",
            RiskCategory::Moderate => "Moderate",
            RiskCategory::High => "High",
            RiskCategory::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `sri_results_{year}.csv`.
///
/// Field order is the published schema read by the query service;
/// `data_source` is appended after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SriResult {
    pub year: i32,
    pub state_name: String,
    pub commodity: String,
    pub yield_per_acre: f64,
    pub yield_risk: f64,
    pub weather_risk: f64,
    pub drought_risk: f64,
    pub economic_risk: f64,
    #[serde(rename = "SRI")]
    pub sri: f64,
    pub risk_category: RiskCategory,
    pub recommendation: String,
    pub avg_temp: f64,
    pub total_precip: f64,
    pub avg_dsci: f64,
    #[serde(default)]
    pub data_source: DataSource,
}

// ---

/// Normalize an upstream state name ("NEW YORK", " new york ") to "New York".
pub fn title_case_state(name: &str) -> String {
    // ---
    name.split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Join key for state names coming from different sources.
pub fn state_key(name: &str) -> String {
    name.trim().to_uppercase()
}

/// Join key for commodity names coming from different sources.
pub fn commodity_key(name: &str) -> String {
    name.trim().to_uppercase()
}
