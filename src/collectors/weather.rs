//! Weather collector (Visual Crossing timeline API).
//!
//! Daily observations at each state capital over the growing season
//! (March 1 – October 31) are reduced to one row per state.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{field, json_f64, Collector, HttpFetcher};
use crate::config::SourceEndpoints;
use crate::models::{DataSource, RawDataset, Source, WeatherRecord};
use crate::states::{StateInfo, STATES};
use crate::stats;

/// Base temperature (°F) for growing degree days.
pub const GDD_BASE_TEMP_F: f64 = 50.0;

const ELEMENTS: &str = "datetime,tempmax,tempmin,temp,precip,precipcover,humidity,windspeed";

/// Typical growing-season values for a U.S. state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Climatology {
    pub avg_temp: f64,
    pub max_temp: f64,
    pub min_temp: f64,
    pub total_precip: f64,
    pub total_gdd: f64,
    pub avg_humidity: f64,
}

/// Substituted when the source is unreachable, and the last resort of the
/// merger's weather imputation.
pub const CLIMATOLOGY: Climatology = Climatology {
    avg_temp: 68.0,
    max_temp: 80.0,
    min_temp: 56.0,
    total_precip: 25.0,
    total_gdd: 2500.0,
    avg_humidity: 65.0,
};

/// Growing degree days for one day: `max(0, (tmax + tmin) / 2 − base)`.
pub fn calculate_gdd(temp_max: f64, temp_min: f64, base_temp: f64) -> f64 {
    ((temp_max + temp_min) / 2.0 - base_temp).max(0.0)
}

/// One day of the timeline response.
#[derive(Debug, Clone, PartialEq, Default)]
struct DailyWeather {
    temp: Option<f64>,
    temp_max: Option<f64>,
    temp_min: Option<f64>,
    precip: f64,
    humidity: Option<f64>,
}

pub struct WeatherCollector {
    fetcher: HttpFetcher,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherCollector {
    pub fn new(fetcher: HttpFetcher, endpoints: &SourceEndpoints) -> Self {
        Self {
            fetcher,
            base_url: endpoints.weather_url.trim_end_matches('/').to_string(),
            api_key: endpoints.weather_api_key.clone(),
        }
    }

    async fn fetch_state(&self, key: &str, state: &StateInfo, year: i32) -> Option<WeatherRecord> {
        // ---
        let url = format!(
            "{}/{}/{}-03-01/{}-10-31",
            self.base_url, state.capital, year, year
        );
        let query = [
            ("unitGroup", "us".to_string()),
            ("key", key.to_string()),
            ("include", "days".to_string()),
            ("elements", ELEMENTS.to_string()),
        ];

        match self.fetcher.get_json(&url, &query).await {
            Ok(payload) => {
                let days = parse_days(&payload);
                if days.is_empty() {
                    warn!("    {}: no daily data in response", state.name);
                    None
                } else {
                    info!("    {}: {} days", state.name, days.len());
                    Some(summarize_season(state.name, year, &days))
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
impl Collector for WeatherCollector {
    type Record = WeatherRecord;

    fn source(&self) -> Source {
        Source::Weather
    }

    async fn fetch(&self, year: i32) -> RawDataset<WeatherRecord> {
        // ---
        let mut per_key = BTreeMap::new();
        let mut records = Vec::new();

        match &self.api_key {
            None => warn!("No Visual Crossing API key provided, using fallback weather data"),
            Some(key) => {
                for (i, state) in STATES.iter().enumerate() {
                    if i > 0 {
                        self.fetcher.pace().await;
                    }
                    info!("  Fetching {}...", state.name);
                    let record = self.fetch_state(key, state, year).await;
                    per_key.insert(state.name.to_string(), usize::from(record.is_some()));
                    records.extend(record);
                }
            }
        }

        if records.is_empty() {
            warn!("No weather data collected, generating fallback growing-season values");
            return fallback_dataset(year);
        }

        RawDataset {
            source: Source::Weather,
            year,
            data_source: DataSource::Live,
            records,
            per_key,
        }
    }
}

/// Extract the `days` array; a payload without one is malformed.
fn parse_days(payload: &Value) -> Vec<DailyWeather> {
    // ---
    let Some(days) = payload.get("days").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    days.iter()
        .map(|day| DailyWeather {
            temp: field(day, "temp").and_then(json_f64),
            temp_max: field(day, "tempmax").and_then(json_f64),
            temp_min: field(day, "tempmin").and_then(json_f64),
            // Missing precipitation means none was recorded
            precip: field(day, "precip").and_then(json_f64).unwrap_or(0.0),
            humidity: field(day, "humidity").and_then(json_f64),
        })
        .collect()
}

/// Reduce a season of daily observations to one state row.
fn summarize_season(state_name: &str, year: i32, days: &[DailyWeather]) -> WeatherRecord {
    // ---
    let temps: Vec<Option<f64>> = days.iter().map(|d| d.temp).collect();
    let humidity: Vec<Option<f64>> = days.iter().map(|d| d.humidity).collect();
    let max_temp = days.iter().filter_map(|d| d.temp_max).reduce(f64::max);
    let min_temp = days.iter().filter_map(|d| d.temp_min).reduce(f64::min);
    let total_gdd: f64 = days
        .iter()
        .filter_map(|d| match (d.temp_max, d.temp_min) {
            (Some(hi), Some(lo)) => Some(calculate_gdd(hi, lo, GDD_BASE_TEMP_F)),
            _ => None,
        })
        .sum();

    WeatherRecord {
        state_name: state_name.to_string(),
        year,
        avg_temp: stats::mean_present(&temps),
        max_temp,
        min_temp,
        total_precip: Some(days.iter().map(|d| d.precip).sum()),
        total_gdd: Some(total_gdd),
        avg_humidity: stats::mean_present(&humidity),
        data_source: DataSource::Live,
    }
}

fn fallback_dataset(year: i32) -> RawDataset<WeatherRecord> {
    // ---
    let records = STATES
        .iter()
        .map(|state| WeatherRecord {
            state_name: state.name.to_string(),
            year,
            avg_temp: Some(CLIMATOLOGY.avg_temp),
            max_temp: Some(CLIMATOLOGY.max_temp),
            min_temp: Some(CLIMATOLOGY.min_temp),
            total_precip: Some(CLIMATOLOGY.total_precip),
            total_gdd: Some(CLIMATOLOGY.total_gdd),
            avg_humidity: Some(CLIMATOLOGY.avg_humidity),
            data_source: DataSource::Fallback,
        })
        .collect();
    let per_key = STATES.iter().map(|s| (s.name.to_string(), 1)).collect();

    RawDataset {
        source: Source::Weather,
        year,
        data_source: DataSource::Fallback,
        records,
        per_key,
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::config::HttpPolicy;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_gdd_calculation() {
        // ---
        assert_eq!(calculate_gdd(80.0, 60.0, 50.0), 20.0);
        // Cold days contribute nothing rather than negative heat units
        assert_eq!(calculate_gdd(45.0, 30.0, 50.0), 0.0);
    }

    #[test]
    fn test_season_summary() {
        // ---
        let payload = json!({
            "days": [
                {"temp": 70.0, "tempmax": 80.0, "tempmin": 60.0, "precip": 0.5, "humidity": 60.0},
                {"temp": 60.0, "tempmax": 70.0, "tempmin": 50.0, "precip": null, "humidity": 70.0},
                {"temp": 50.0, "tempmax": 55.0, "tempmin": 35.0, "precip": 1.25}
            ]
        });
        let days = parse_days(&payload);
        let record = summarize_season("Iowa", 2024, &days);

        assert_eq!(record.avg_temp, Some(60.0));
        assert_eq!(record.max_temp, Some(80.0));
        assert_eq!(record.min_temp, Some(35.0));
        assert_eq!(record.total_precip, Some(1.75));
        // 20 + 10 + 0
        assert_eq!(record.total_gdd, Some(30.0));
        assert_eq!(record.avg_humidity, Some(65.0));
        assert_eq!(record.data_source, DataSource::Live);
    }

    #[test]
    fn test_payload_without_days_is_empty() {
        // ---
        assert!(parse_days(&json!({"message": "rate limited"})).is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_uses_fallback() {
        // ---
        let policy = HttpPolicy {
            timeout: Duration::from_secs(1),
            retries: 0,
            retry_delay: Duration::ZERO,
            request_delay: Duration::ZERO,
        };
        let collector = WeatherCollector::new(
            HttpFetcher::new(&policy).unwrap(),
            &SourceEndpoints::default(),
        );

        let dataset = collector.fetch(2024).await;

        assert_eq!(dataset.data_source, DataSource::Fallback);
        assert_eq!(dataset.records.len(), 50);
        let iowa = dataset.records.iter().find(|r| r.state_name == "Iowa").unwrap();
        assert_eq!(iowa.avg_temp, Some(68.0));
        assert_eq!(iowa.total_gdd, Some(2500.0));
    }
}
