//! Drought collector (U.S. Drought Monitor state statistics).
//!
//! Weekly categorical area percentages per state over the growing season are
//! turned into a weekly DSCI and averaged into one row per state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{field, json_f64, Collector, HttpFetcher};
use crate::config::SourceEndpoints;
use crate::models::{DataSource, DroughtRecord, RawDataset, Source};
use crate::states::{StateInfo, STATES};
use crate::stats;

/// Drought Severity and Coverage Index:
/// `(D0·1 + D1·2 + D2·3 + D3·4 + D4·5) / 5`, rounded to 2 decimals.
///
/// `levels` are the D0..D4 area percentages; the result lies in [0, 100]
/// for percentages that each lie in [0, 100] and sum to at most 100.
pub fn calculate_dsci(levels: [f64; 5]) -> f64 {
    let weighted: f64 = levels
        .iter()
        .enumerate()
        .map(|(i, pct)| pct * (i as f64 + 1.0))
        .sum();
    stats::round_to(weighted / 5.0, 2)
}

/// Seasonal severity label for an average DSCI.
pub fn drought_category(avg_dsci: f64) -> &'static str {
    if avg_dsci < 10.0 {
        "None"
    } else if avg_dsci < 25.0 {
        "Moderate"
    } else if avg_dsci < 50.0 {
        "Severe"
    } else {
        "Extreme"
    }
}

/// One week of the statistics response.
#[derive(Debug, Clone, PartialEq)]
struct DroughtWeek {
    levels: [f64; 5],
    none: Option<f64>,
}

impl DroughtWeek {
    fn dsci(&self) -> f64 {
        calculate_dsci(self.levels)
    }
}

pub struct DroughtCollector {
    fetcher: HttpFetcher,
    base_url: String,
}

impl DroughtCollector {
    pub fn new(fetcher: HttpFetcher, endpoints: &SourceEndpoints) -> Self {
        Self {
            fetcher,
            base_url: endpoints.drought_url.clone(),
        }
    }

    async fn fetch_state(&self, state: &StateInfo, year: i32) -> Option<DroughtRecord> {
        // ---
        let query = [
            ("aoi", state.fips.to_string()),
            ("startdate", format!("{}-03-01", year)),
            ("enddate", format!("{}-10-31", year)),
            ("statisticsType", "1".to_string()),
        ];

        match self.fetcher.get_json(&self.base_url, &query).await {
            Ok(payload) => {
                let weeks = parse_weeks(&payload);
                if weeks.is_empty() {
                    warn!("    {}: no data returned", state.name);
                    None
                } else {
                    info!("    {}: {} weeks", state.name, weeks.len());
                    Some(summarize_season(state.name, year, &weeks))
                }
            }
            Err(failure) => {
                warn!("    {}: {}", state.name, failure);
                None
            }
        }
    }
}

#[async_trait]
impl Collector for DroughtCollector {
    type Record = DroughtRecord;

    fn source(&self) -> Source {
        Source::Drought
    }

    async fn fetch(&self, year: i32) -> RawDataset<DroughtRecord> {
        // ---
        let mut per_key = BTreeMap::new();
        let mut records = Vec::new();

        for (i, state) in STATES.iter().enumerate() {
            if i > 0 {
                self.fetcher.pace().await;
            }
            info!("  Fetching {}...", state.name);
            let record = self.fetch_state(state, year).await;
            per_key.insert(state.name.to_string(), usize::from(record.is_some()));
            records.extend(record);
        }

        if records.is_empty() {
            warn!("No drought data collected, generating fallback no-drought values");
            return fallback_dataset(year);
        }

        RawDataset {
            source: Source::Drought,
            year,
            data_source: DataSource::Live,
            records,
            per_key,
        }
    }
}

/// Weekly rows from the response; anything other than a JSON array is malformed.
fn parse_weeks(payload: &Value) -> Vec<DroughtWeek> {
    // ---
    let Some(rows) = payload.as_array() else {
        return Vec::new();
    };

    rows.iter()
        .filter(|row| row.is_object())
        .map(|row| {
            let level = |key: &str| field(row, key).and_then(json_f64).unwrap_or(0.0);
            DroughtWeek {
                levels: [level("D0"), level("D1"), level("D2"), level("D3"), level("D4")],
                none: field(row, "None").and_then(json_f64),
            }
        })
        .collect()
}

fn summarize_season(state_name: &str, year: i32, weeks: &[DroughtWeek]) -> DroughtRecord {
    // ---
    let dsci: Vec<f64> = weeks.iter().map(DroughtWeek::dsci).collect();
    let level_mean = |i: usize| Some(stats::mean(&weeks.iter().map(|w| w.levels[i]).collect::<Vec<_>>()));
    let none: Vec<Option<f64>> = weeks.iter().map(|w| w.none).collect();
    let avg_dsci = stats::mean(&dsci);

    DroughtRecord {
        state_name: state_name.to_string(),
        year,
        avg_dsci: Some(avg_dsci),
        avg_d0_pct: level_mean(0),
        avg_d1_pct: level_mean(1),
        avg_d2_pct: level_mean(2),
        avg_d3_pct: level_mean(3),
        avg_d4_pct: level_mean(4),
        avg_none_pct: stats::mean_present(&none),
        drought_category: drought_category(avg_dsci).to_string(),
        data_source: DataSource::Live,
    }
}

fn fallback_dataset(year: i32) -> RawDataset<DroughtRecord> {
    // ---
    let records = STATES
        .iter()
        .map(|state| DroughtRecord {
            state_name: state.name.to_string(),
            year,
            avg_dsci: Some(0.0),
            avg_d0_pct: Some(0.0),
            avg_d1_pct: Some(0.0),
            avg_d2_pct: Some(0.0),
            avg_d3_pct: Some(0.0),
            avg_d4_pct: Some(0.0),
            avg_none_pct: Some(100.0),
            drought_category: drought_category(0.0).to_string(),
            data_source: DataSource::Fallback,
        })
        .collect();
    let per_key = STATES.iter().map(|s| (s.name.to_string(), 1)).collect();

    RawDataset {
        source: Source::Drought,
        year,
        data_source: DataSource::Fallback,
        records,
        per_key,
    }
}
