//! Crop yield collector (USDA NASS QuickStats).
//!
//! One query per commodity for state-level annual yields. Aggregates such as
//! `OTHER STATES`, suppressed values (`(D)`, `(NA)`, ...) and non bushel
//! units are dropped; state names are title-cased so they join with the
//! weather and drought tables.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{field, json_f64, AvailabilityProbe, Collector, HttpFetcher};
use crate::config::SourceEndpoints;
use crate::models::{title_case_state, Commodity, CropRecord, DataSource, RawDataset, Source};
use crate::states::STATES;

/// Values NASS publishes in place of a number.
const DISCLOSURE_CODES: [&str; 4] = ["(D)", "(NA)", "(Z)", "(X)"];

/// National average yields (bu/acre) substituted when the source is unreachable.
pub const FALLBACK_YIELDS: [(Commodity, f64); 3] = [
    (Commodity::Corn, 177.3),
    (Commodity::Soybeans, 50.6),
    (Commodity::Wheat, 48.6),
];

pub struct CropCollector {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
}

impl CropCollector {
    pub fn new(fetcher: HttpFetcher, endpoints: &SourceEndpoints) -> Self {
        Self {
            fetcher,
            base_url: endpoints.nass_url.clone(),
            api_key: endpoints.usda_api_key.clone(),
        }
    }

    fn query(&self, key: &str, commodity: Commodity, year: i32) -> Vec<(&'static str, String)> {
        vec![
            ("key", key.to_string()),
            ("commodity_desc", commodity.as_str().to_string()),
            ("statisticcat_desc", "YIELD".to_string()),
            ("agg_level_desc", "STATE".to_string()),
            ("year", year.to_string()),
            ("format", "JSON".to_string()),
        ]
    }

    /// One CORN query to see whether yields for `year` are published yet.
    pub async fn probe(&self, year: i32) -> AvailabilityProbe {
        // ---
        let Some(key) = &self.api_key else {
            return AvailabilityProbe {
                year,
                available: false,
                records: 0,
                detail: "USDA_API_KEY not set".to_string(),
            };
        };

        let query = self.query(key, Commodity::Corn, year);
        match self.fetcher.get_json(&self.base_url, &query).await {
            Ok(payload) => {
                let records = parse_crop_payload(&payload, Commodity::Corn, year).len();
                AvailabilityProbe {
                    year,
                    available: records > 0,
                    records,
                    detail: format!("{} state yield records for CORN", records),
                }
            }
            Err(failure) => AvailabilityProbe {
                year,
                available: false,
                records: 0,
                detail: failure.to_string(),
            },
        }
    }
}

#[async_trait]
impl Collector for CropCollector {
    type Record = CropRecord;

    fn source(&self) -> Source {
        Source::Crop
    }

    async fn fetch(&self, year: i32) -> RawDataset<CropRecord> {
        // ---
        let mut per_key = BTreeMap::new();
        let mut records = Vec::new();

        match &self.api_key {
            None => warn!("No USDA API key provided, crop collector will use fallback data"),
            Some(key) => {
                for (i, commodity) in Commodity::ALL.iter().enumerate() {
                    if i > 0 {
                        self.fetcher.pace().await;
                    }
                    info!("  Fetching {}...", commodity);

                    let query = self.query(key, *commodity, year);
                    let rows = match self.fetcher.get_json(&self.base_url, &query).await {
                        Ok(payload) => parse_crop_payload(&payload, *commodity, year),
                        Err(failure) => {
                            warn!("    {}: {}", commodity, failure);
                            Vec::new()
                        }
                    };

                    if rows.is_empty() {
                        warn!("    {}: no data returned", commodity);
                    } else {
                        info!("    {}: {} records", commodity, rows.len());
                    }
                    per_key.insert(commodity.to_string(), rows.len());
                    records.extend(rows);
                }
            }
        }

        if records.is_empty() {
            warn!("No crop data collected, generating fallback national-average yields");
            return fallback_dataset(year);
        }

        records.sort_by(|a, b| {
            a.commodity
                .cmp(&b.commodity)
                .then_with(|| a.state_name.cmp(&b.state_name))
        });

        RawDataset {
            source: Source::Crop,
            year,
            data_source: DataSource::Live,
            records,
            per_key,
        }
    }
}

/// Extract state yields for one commodity from a QuickStats payload.
///
/// A payload without a `data` array is malformed and yields no records.
fn parse_crop_payload(payload: &Value, commodity: Commodity, year: i32) -> Vec<CropRecord> {
    // ---
    let Some(data) = payload.get("data").and_then(|d| d.as_array()) else {
        warn!("    {}: response missing 'data' array", commodity);
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for item in data {
        let Some(state) = field(item, "state_name").and_then(|s| s.as_str()) else {
            continue;
        };
        if state.trim().eq_ignore_ascii_case("OTHER STATES") {
            continue;
        }

        // Silage yields are in tons and forecasts precede the final estimate
        if let Some(unit) = field(item, "unit_desc").and_then(|u| u.as_str()) {
            if unit.trim() != "BU / ACRE" {
                continue;
            }
        }
        if let Some(period) = field(item, "reference_period_desc").and_then(|p| p.as_str()) {
            if period.trim() != "YEAR" {
                continue;
            }
        }

        let Some(raw_value) = field(item, "Value") else {
            continue;
        };
        if let Some(text) = raw_value.as_str() {
            if DISCLOSURE_CODES.contains(&text.trim()) {
                continue;
            }
        }
        let Some(yield_per_acre) = json_f64(raw_value) else {
            continue;
        };

        let record_year = field(item, "year")
            .and_then(json_f64)
            .map(|y| y as i32)
            .unwrap_or(year);
        let state_name = title_case_state(state);

        if !seen.insert((state_name.clone(), record_year)) {
            continue;
        }

        records.push(CropRecord {
            year: record_year,
            state_name,
            commodity: commodity.as_str().to_string(),
            yield_per_acre: Some(yield_per_acre),
            data_source: DataSource::Live,
        });
    }

    records
}

fn fallback_dataset(year: i32) -> RawDataset<CropRecord> {
    // ---
    let mut records = Vec::with_capacity(FALLBACK_YIELDS.len() * STATES.len());
    let mut per_key = BTreeMap::new();

    for (commodity, yield_per_acre) in FALLBACK_YIELDS {
        for state in STATES.iter() {
            records.push(CropRecord {
                year,
                state_name: state.name.to_string(),
                commodity: commodity.as_str().to_string(),
                yield_per_acre: Some(yield_per_acre),
                data_source: DataSource::Fallback,
            });
        }
        per_key.insert(commodity.to_string(), STATES.len());
    }

    RawDataset {
        source: Source::Crop,
        year,
        data_source: DataSource::Fallback,
        records,
        per_key,
    }
}
