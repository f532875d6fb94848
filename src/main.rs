//! Command-line entry point for the `agri-sri` pipeline.
//!
//! Each subcommand runs one stage (or the whole run) for a single year:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing on stderr
//! - Dispatching to the stage functions in `agri_sri::pipeline`
//! - Printing the stage summary as pretty JSON on stdout
//!
//! # Environment Variables
//! - `SRI_DATA_ROOT` (optional) – base directory for stage files (default: `./data`)
//! - `USDA_API_KEY`, `VISUAL_CROSSING_API_KEY` (optional) – source credentials
//! - `SRI_LOG_LEVEL` (optional) – log verbosity (default: `info`)
//! - `SRI_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `agri_sri::config::load_from_env` for the full list.
use std::{env, path::Path};

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use agri_sri::pipeline::{self, MergeInput, ScoreInput};
use agri_sri::{collectors, config, table, Source, SriResult};

// ---

#[derive(Parser)]
#[command(name = "agri-sri")]
#[command(about = "Annual agricultural Stock Risk Index pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Crop year to process (default: previous calendar year)
    #[arg(long, global = true)]
    year: Option<i32>,

    /// Print the top N rows of the SRI table to stderr after scoring
    #[arg(long, global = true, default_value_t = 0)]
    preview: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the crop source already has yields for the year
    Probe,
    /// Fetch raw datasets (all four concurrently unless --source is given)
    Collect {
        /// One of: crop, weather, drought, economic
        #[arg(long)]
        source: Option<Source>,
    },
    /// Validate the four raw files before merging
    Validate,
    /// Merge the raw files into the model input table
    Merge,
    /// Compute the SRI table from the merged data
    Score,
    /// Validate the SRI table; removes it on failure
    Check,
    /// Compare the SRI table with the previous year's
    Compare,
    /// Run every stage in order
    Run,
}

#[derive(Tabled, Clone)]
struct SriPreviewRow {
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Commodity")]
    commodity: String,
    #[tabled(rename = "SRI")]
    sri: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Recommendation")]
    recommendation: String,
    #[tabled(rename = "Data")]
    data_source: String,
}

impl From<&SriResult> for SriPreviewRow {
    fn from(r: &SriResult) -> Self {
        Self {
            state: r.state_name.clone(),
            commodity: r.commodity.clone(),
            sri: format!("{:.2}", r.sri),
            category: r.risk_category.to_string(),
            recommendation: r.recommendation.clone(),
            data_source: r.data_source.to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_from_env().context("Failed to load configuration")?;
    cfg.log_config();

    let year = cli.year.unwrap_or_else(|| Utc::now().year() - 1);
    let layout = &cfg.layout;
    tracing::info!("Processing crop year {}", year);

    match cli.command {
        Commands::Probe => print_json(&collectors::probe(&cfg, year).await?)?,
        Commands::Collect { source: Some(source) } => {
            let summary = collectors::collect_one(&cfg, source, year)
                .await
                .with_context(|| format!("Failed to collect {} data", source))?;
            print_json(&summary)?
        }
        Commands::Collect { source: None } => {
            let output = collectors::collect_all(&cfg, year)
                .await
                .context("Failed to collect raw datasets")?;
            print_json(&output)?
        }
        Commands::Validate => {
            let output = pipeline::validate(layout, &layout.raw_files(year), year)
                .with_context(|| format!("Raw data for {} did not pass validation", year))?;
            print_json(&output)?
        }
        Commands::Merge => {
            let input = MergeInput {
                year,
                files: layout.raw_files(year),
            };
            print_json(&pipeline::merge(layout, &input, &cfg.scoring)?)?
        }
        Commands::Score => {
            let input = ScoreInput {
                year,
                merged_file: layout.merged_file(year),
            };
            let output = pipeline::score(layout, &input, &cfg.scoring)?;
            preview_sri(&output.file_path, cli.preview)?;
            print_json(&output)?
        }
        Commands::Check => {
            let output = pipeline::check(layout, year)
                .with_context(|| format!("SRI results for {} did not pass validation", year))?;
            print_json(&output)?
        }
        Commands::Compare => print_json(&pipeline::compare(layout, year)?)?,
        Commands::Run => {
            let summary = pipeline::run(&cfg, year)
                .await
                .with_context(|| format!("Pipeline run for {} failed", year))?;
            preview_sri(&summary.score.file_path, cli.preview)?;
            print_json(&summary)?
        }
    }

    Ok(())
}

// ---

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the highest-risk rows as a markdown table on stderr.
fn preview_sri(path: &Path, rows: usize) -> Result<()> {
    // ---
    if rows == 0 {
        return Ok(());
    }
    let results: Vec<SriResult> = table::read_csv(path)?;
    let slice: Vec<SriPreviewRow> = results.iter().take(rows).map(SriPreviewRow::from).collect();
    if slice.is_empty() {
        eprintln!("(no rows)");
        return Ok(());
    }
    eprintln!("\nTop {} SRI results", slice.len());
    eprintln!("{}\n", Table::new(slice).with(Style::markdown()));
    Ok(())
}

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled, written to stderr
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `SRI_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `SRI_LOG_LEVEL` env var
///
/// Call once at startup, after `.env` is loaded and before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("SRI_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    // Determine if we should use colors
    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stderr().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to SRI_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("SRI_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("{level},reqwest=warn,hyper=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
