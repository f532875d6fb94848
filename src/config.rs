//! Configuration loader for the `agri-sri` pipeline.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the stages, and every stage
//! sees the same immutable snapshot for the lifetime of a run.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::layout::DataLayout;
use crate::scoring::ScoringConfig;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .map_err(|e| PipelineError::Config(format!("Invalid {}: {}", $var_name, e)))?
            .unwrap_or($default)
    };
}

/// Read a string environment variable, falling back to a default.
macro_rules! env_or {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

/// Read an optional secret; blank values count as absent.
macro_rules! optional_env {
    ($var_name:expr) => {
        env::var($var_name).ok().filter(|v| !v.trim().is_empty())
    };
}

pub const DEFAULT_NASS_API_URL: &str = "https://quickstats.nass.usda.gov/api/api_GET/";
pub const DEFAULT_WEATHER_API_URL: &str =
    "https://weather.visualcrossing.com/VisualCrossingWebServices/rest/services/timeline";
pub const DEFAULT_DROUGHT_API_URL: &str =
    "https://usdmdataservices.unl.edu/api/StateStatistics/GetDroughtSeverityStatisticsByAreaPercent";
pub const DEFAULT_PSD_API_URL: &str = "https://apps.fas.usda.gov/psdonline/api/psd";

/// Retry and pacing policy for collector HTTP calls.
#[derive(Debug, Clone)]
pub struct HttpPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first one.
    pub retries: u32,
    pub retry_delay: Duration,
    /// Pause between sequential per-key calls.
    pub request_delay: Duration,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 2,
            retry_delay: Duration::from_millis(1000),
            request_delay: Duration::ZERO,
        }
    }
}

/// Base URLs and credentials of the four upstream sources.
#[derive(Debug, Clone)]
pub struct SourceEndpoints {
    pub nass_url: String,
    pub weather_url: String,
    pub drought_url: String,
    pub psd_url: String,

    /// USDA NASS QuickStats key. Absent ⇒ crop fallback.
    pub usda_api_key: Option<String>,

    /// Visual Crossing key. Absent ⇒ weather fallback.
    pub weather_api_key: Option<String>,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            nass_url: DEFAULT_NASS_API_URL.to_string(),
            weather_url: DEFAULT_WEATHER_API_URL.to_string(),
            drought_url: DEFAULT_DROUGHT_API_URL.to_string(),
            psd_url: DEFAULT_PSD_API_URL.to_string(),
            usda_api_key: None,
            weather_api_key: None,
        }
    }
}

/// Strongly typed pipeline configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of a run.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Where raw, processed and result files live.
    pub layout: DataLayout,

    pub endpoints: SourceEndpoints,

    pub http: HttpPolicy,

    /// Versioned scoring methodology handed to the calculator.
    pub scoring: ScoringConfig,

    /// Path the methodology was loaded from, if not the built-in one.
    pub scoring_source: Option<PathBuf>,
}

/// Load configuration from environment variables with defaults.
///
/// Optional:
/// - `SRI_DATA_ROOT` – base directory for all stage files (default: `./data`)
/// - `SRI_RAW_ROOT`, `SRI_PROCESSED_ROOT`, `SRI_RESULTS_ROOT` – per-tier overrides
/// - `USDA_API_KEY`, `VISUAL_CROSSING_API_KEY` – source credentials
/// - `NASS_API_URL`, `WEATHER_API_URL`, `DROUGHT_API_URL`, `PSD_API_URL`
/// - `SRI_HTTP_TIMEOUT_SECS` (default: 60), `SRI_HTTP_RETRIES` (default: 2),
///   `SRI_HTTP_RETRY_DELAY_MS` (default: 1000), `SRI_REQUEST_DELAY_MS` (default: 0)
/// - `SRI_SCORING_CONFIG` – JSON scoring methodology file
///
/// Returns an error if any numeric variable is invalid or the scoring file
/// cannot be read.
pub fn load_from_env() -> Result<Config> {
    // ---
    let data_root = PathBuf::from(env_or!("SRI_DATA_ROOT", "./data"));
    let mut layout = DataLayout::under(&data_root);
    if let Some(raw) = optional_env!("SRI_RAW_ROOT") {
        layout.raw_root = PathBuf::from(raw);
    }
    if let Some(processed) = optional_env!("SRI_PROCESSED_ROOT") {
        layout.processed_root = PathBuf::from(processed);
    }
    if let Some(results) = optional_env!("SRI_RESULTS_ROOT") {
        layout.results_root = PathBuf::from(results);
    }

    let endpoints = SourceEndpoints {
        nass_url: env_or!("NASS_API_URL", DEFAULT_NASS_API_URL),
        weather_url: env_or!("WEATHER_API_URL", DEFAULT_WEATHER_API_URL),
        drought_url: env_or!("DROUGHT_API_URL", DEFAULT_DROUGHT_API_URL),
        psd_url: env_or!("PSD_API_URL", DEFAULT_PSD_API_URL),
        usda_api_key: optional_env!("USDA_API_KEY"),
        weather_api_key: optional_env!("VISUAL_CROSSING_API_KEY"),
    };

    let retries = parse_env_u64!("SRI_HTTP_RETRIES", 2);
    let http = HttpPolicy {
        timeout: Duration::from_secs(parse_env_u64!("SRI_HTTP_TIMEOUT_SECS", 60)),
        retries: u32::try_from(retries)
            .map_err(|e| PipelineError::Config(format!("Invalid SRI_HTTP_RETRIES: {}", e)))?,
        retry_delay: Duration::from_millis(parse_env_u64!("SRI_HTTP_RETRY_DELAY_MS", 1000)),
        request_delay: Duration::from_millis(parse_env_u64!("SRI_REQUEST_DELAY_MS", 0)),
    };

    let scoring_source = optional_env!("SRI_SCORING_CONFIG").map(PathBuf::from);
    let scoring = match &scoring_source {
        Some(path) => ScoringConfig::from_file(path)?,
        None => ScoringConfig::default(),
    };

    Ok(Config {
        layout,
        endpoints,
        http,
        scoring,
        scoring_source,
    })
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// API keys are reported only as present or absent.
    pub fn log_config(&self) {
        // ---
        let mask = |key: &Option<String>| match key {
            Some(_) => "****",
            None => "(unset, fallback data will be used)",
        };

        tracing::info!("Configuration loaded:");
        tracing::info!("  RAW_ROOT          : {}", self.layout.raw_root.display());
        tracing::info!("  PROCESSED_ROOT    : {}", self.layout.processed_root.display());
        tracing::info!("  RESULTS_ROOT      : {}", self.layout.results_root.display());
        tracing::info!("  NASS_API_URL      : {}", self.endpoints.nass_url);
        tracing::info!("  WEATHER_API_URL   : {}", self.endpoints.weather_url);
        tracing::info!("  DROUGHT_API_URL   : {}", self.endpoints.drought_url);
        tracing::info!("  PSD_API_URL       : {}", self.endpoints.psd_url);
        tracing::info!("  USDA_API_KEY      : {}", mask(&self.endpoints.usda_api_key));
        tracing::info!("  VISUAL_CROSSING   : {}", mask(&self.endpoints.weather_api_key));
        tracing::info!("  HTTP_TIMEOUT      : {:?}", self.http.timeout);
        tracing::info!("  HTTP_RETRIES      : {}", self.http.retries);
        tracing::info!("  HTTP_RETRY_DELAY  : {:?}", self.http.retry_delay);
        tracing::info!("  REQUEST_DELAY     : {:?}", self.http.request_delay);
        tracing::info!(
            "  SCORING_CONFIG    : v{} ({})",
            self.scoring.version,
            self.scoring_source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "built-in".to_string())
        );
    }
}
