//! Source collectors: one per upstream dataset.
//!
//! This module is the gateway for the collector family and follows the
//! Explicit Module Boundary Pattern (EMBP):
//! - Internal to each sibling file: the API query, payload parsing, per-key
//!   aggregation and the neutral fallback dataset for that source
//! - Exported from here: the [`Collector`] trait, the shared [`HttpFetcher`],
//!   and the [`collect`] / [`collect_all`] entry points used by the pipeline
//!
//! A collector never fails because of the upstream API. Each key (state or
//! commodity) is queried sequentially; a failed call counts as zero records
//! for that key. If every call fails the collector substitutes its fallback
//! dataset, tagged `data_source = fallback`, so later stages always receive a
//! well-formed file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, HttpPolicy};
use crate::error::Result;
use crate::layout::{DataLayout, RawFiles};
use crate::models::{DataSource, RawDataset, Source};
use crate::table;

mod crop;
mod drought;
mod economic;
mod weather;

pub use crop::CropCollector;
pub use drought::{calculate_dsci, DroughtCollector};
pub use economic::{EconomicCollector, BASELINE_PRICE_INDEX, NEUTRAL_SUPPLY_RISK};
pub use weather::{calculate_gdd, Climatology, WeatherCollector, CLIMATOLOGY};

// ---

/// A source of one raw dataset.
#[async_trait]
pub trait Collector: Send + Sync {
    type Record: Serialize + Send + Sync;

    fn source(&self) -> Source;

    /// Fetch the dataset for `year`. Never fails: upstream problems degrade
    /// to fewer records or to the fallback dataset.
    async fn fetch(&self, year: i32) -> RawDataset<Self::Record>;
}

/// What a collector wrote, reported to the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSummary {
    pub source: Source,
    pub year: i32,
    pub data_source: DataSource,
    pub records: usize,
    pub per_key: BTreeMap<String, usize>,
    pub file_path: PathBuf,
}

/// Output of the collection stage: one file per source.
#[derive(Debug, Clone, Serialize)]
pub struct CollectOutput {
    pub crop: CollectionSummary,
    pub weather: CollectionSummary,
    pub drought: CollectionSummary,
    pub economic: CollectionSummary,
}

impl CollectOutput {
    /// The files just written, as input to the validator and merger.
    pub fn raw_files(&self) -> RawFiles {
        RawFiles {
            crop: self.crop.file_path.clone(),
            weather: self.weather.file_path.clone(),
            drought: self.drought.file_path.clone(),
            economic: self.economic.file_path.clone(),
        }
    }
}

/// Run one collector and persist its dataset, replacing any previous file.
pub async fn collect<C: Collector>(
    collector: &C,
    year: i32,
    layout: &DataLayout,
) -> Result<CollectionSummary> {
    // ---
    let source = collector.source();
    info!("Fetching {} data for {}", source, year);

    let dataset = collector.fetch(year).await;
    let file_path = layout.raw_file(source, year);
    table::write_csv(&file_path, &dataset.records)?;

    if dataset.data_source.is_fallback() {
        warn!(
            "Saved {} FALLBACK {} records to {}",
            dataset.records.len(),
            source,
            file_path.display()
        );
    } else {
        info!(
            "Saved {} {} records to {}",
            dataset.records.len(),
            source,
            file_path.display()
        );
    }

    Ok(CollectionSummary {
        source,
        year,
        data_source: dataset.data_source,
        records: dataset.records.len(),
        per_key: dataset.per_key,
        file_path,
    })
}

/// Run all four collectors concurrently. They share no state and each
/// writes only its own file.
pub async fn collect_all(config: &Config, year: i32) -> Result<CollectOutput> {
    // ---
    let fetcher = HttpFetcher::new(&config.http)?;
    let crop = CropCollector::new(fetcher.clone(), &config.endpoints);
    let weather = WeatherCollector::new(fetcher.clone(), &config.endpoints);
    let drought = DroughtCollector::new(fetcher.clone(), &config.endpoints);
    let economic = EconomicCollector::new(fetcher, &config.endpoints);

    let layout = &config.layout;
    let (crop, weather, drought, economic) = tokio::try_join!(
        collect(&crop, year, layout),
        collect(&weather, year, layout),
        collect(&drought, year, layout),
        collect(&economic, year, layout),
    )?;

    Ok(CollectOutput {
        crop,
        weather,
        drought,
        economic,
    })
}

/// Run a single collector chosen by source.
pub async fn collect_one(config: &Config, source: Source, year: i32) -> Result<CollectionSummary> {
    // ---
    let fetcher = HttpFetcher::new(&config.http)?;
    let layout = &config.layout;
    match source {
        Source::Crop => collect(&CropCollector::new(fetcher, &config.endpoints), year, layout).await,
        Source::Weather => {
            collect(&WeatherCollector::new(fetcher, &config.endpoints), year, layout).await
        }
        Source::Drought => {
            collect(&DroughtCollector::new(fetcher, &config.endpoints), year, layout).await
        }
        Source::Economic => {
            collect(&EconomicCollector::new(fetcher, &config.endpoints), year, layout).await
        }
    }
}

// ---

/// Why a single upstream call produced no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    Status(u16),
    Transport(String),
    Decode(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Status(code) => write!(f, "HTTP {}", code),
            FetchFailure::Transport(e) => write!(f, "transport error: {}", e),
            FetchFailure::Decode(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

/// Shared HTTP client with the bounded retry policy.
///
/// Transport errors, 429 and 5xx responses are retried after a fixed delay;
/// any other non-200 status is returned immediately.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: HttpPolicy,
}

impl HttpFetcher {
    pub fn new(policy: &HttpPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .user_agent(concat!("agri-sri/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            policy: policy.clone(),
        })
    }

    /// GET `url` with `query` and decode the body as JSON.
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<Value, FetchFailure> {
        // ---
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!("GET {} (attempt {})", url, attempt);

            let failure = match self.client.get(url).query(query).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp
                            .json::<Value>()
                            .await
                            .map_err(|e| FetchFailure::Decode(e.to_string()));
                    }
                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if !retryable {
                        return Err(FetchFailure::Status(status.as_u16()));
                    }
                    FetchFailure::Status(status.as_u16())
                }
                Err(e) => FetchFailure::Transport(e.to_string()),
            };

            if attempt > self.policy.retries {
                return Err(failure);
            }
            debug!("{} for {}, retrying in {:?}", failure, url, self.policy.retry_delay);
            tokio::time::sleep(self.policy.retry_delay).await;
        }
    }

    /// Pause between sequential per-key calls to respect upstream rate limits.
    pub async fn pace(&self) {
        if !self.policy.request_delay.is_zero() {
            tokio::time::sleep(self.policy.request_delay).await;
        }
    }
}

// ---

/// Read a numeric JSON field that may be a number or a formatted string.
pub(crate) fn json_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Look up `key` in a JSON object, also trying its lower-case spelling.
pub(crate) fn field<'a>(record: &'a Value, key: &str) -> Option<&'a Value> {
    record
        .get(key)
        .or_else(|| record.get(key.to_lowercase()))
        .filter(|v| !v.is_null())
}

/// Result of a probe of the crop source for a year.
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityProbe {
    pub year: i32,
    pub available: bool,
    pub records: usize,
    pub detail: String,
}

/// Check whether the crop source already publishes yields for `year`.
///
/// Never errors on network failure; that is reported as unavailable.
pub async fn probe(config: &Config, year: i32) -> Result<AvailabilityProbe> {
    // ---
    let fetcher = HttpFetcher::new(&config.http)?;
    let collector = CropCollector::new(fetcher, &config.endpoints);
    let probe = collector.probe(year).await;
    if probe.available {
        info!("Crop data available for {}: {} records", year, probe.records);
    } else {
        warn!("Crop data not yet available for {}: {}", year, probe.detail);
    }
    Ok(probe)
}
