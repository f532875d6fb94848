//! Economic collector (USDA FAS Production, Supply and Distribution).
//!
//! One query per commodity for the U.S. balance sheet of the marketing year.
//! The supply-risk score is derived from the stocks-to-use ratio: tighter
//! stocks mean higher risk. No price feed is wired in, so every commodity
//! carries the neutral price index of 100.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::{field, json_f64, Collector, HttpFetcher};
use crate::config::SourceEndpoints;
use crate::models::{Commodity, DataSource, EconomicRecord, RawDataset, Source};

pub const BASELINE_PRICE_INDEX: f64 = 100.0;
pub const NEUTRAL_SUPPLY_RISK: f64 = 50.0;

fn psd_code(commodity: Commodity) -> &'static str {
    match commodity {
        Commodity::Corn => "0440000",
        Commodity::Soybeans => "2222000",
        Commodity::Wheat => "0410000",
    }
}

/// Balance-sheet lines read from one PSD response.
#[derive(Debug, Clone, Default, PartialEq)]
struct BalanceSheet {
    production: Option<f64>,
    total_supply: Option<f64>,
    domestic_consumption: Option<f64>,
    exports: Option<f64>,
    ending_stocks: Option<f64>,
    stocks_to_use: Option<f64>,
}

impl BalanceSheet {
    fn is_empty(&self) -> bool {
        *self == BalanceSheet::default()
    }

    fn set(&mut self, attribute: &str, value: f64) {
        let slot = match attribute {
            "production" => &mut self.production,
            "total supply" | "total_supply" => &mut self.total_supply,
            "domestic consumption" | "domestic_consumption" | "total dom. cons." => {
                &mut self.domestic_consumption
            }
            "exports" | "my exports" | "ty exports" => &mut self.exports,
            "ending stocks" | "ending_stocks" => &mut self.ending_stocks,
            "stocks to use" | "stocks-to-use" | "stocks_to_use_ratio" | "stocks to use ratio" => {
                &mut self.stocks_to_use
            }
            _ => return,
        };
        // First reported line wins (MY exports before TY exports)
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    /// Reported ratio (percent), else ending stocks over total use.
    fn stocks_to_use_ratio(&self) -> Option<f64> {
        if self.stocks_to_use.is_some() {
            return self.stocks_to_use;
        }
        let stocks = self.ending_stocks?;
        let use_total = self.domestic_consumption.unwrap_or(0.0) + self.exports.unwrap_or(0.0);
        if use_total > 0.0 {
            Some(stocks / use_total * 100.0)
        } else {
            None
        }
    }
}

/// `max(0, 100 − 2·stocks_to_use)`, neutral 50 when unknown.
pub fn supply_risk_score(stocks_to_use_ratio: Option<f64>) -> f64 {
    match stocks_to_use_ratio {
        Some(ratio) => (100.0 - ratio * 2.0).clamp(0.0, 100.0),
        None => NEUTRAL_SUPPLY_RISK,
    }
}

pub struct EconomicCollector {
    fetcher: HttpFetcher,
    base_url: String,
}

impl EconomicCollector {
    pub fn new(fetcher: HttpFetcher, endpoints: &SourceEndpoints) -> Self {
        Self {
            fetcher,
            base_url: endpoints.psd_url.clone(),
        }
    }
}

#[async_trait]
impl Collector for EconomicCollector {
    type Record = EconomicRecord;

    fn source(&self) -> Source {
        Source::Economic
    }

    async fn fetch(&self, year: i32) -> RawDataset<EconomicRecord> {
        // ---
        let mut per_key = BTreeMap::new();
        let mut records = Vec::new();

        for (i, commodity) in Commodity::ALL.iter().enumerate() {
            if i > 0 {
                self.fetcher.pace().await;
            }
            info!("  Fetching {} PSD data...", commodity);

            let query = [
                ("commodityCode", psd_code(*commodity).to_string()),
                ("countryCode", "US".to_string()),
                ("marketYear", year.to_string()),
            ];
            let (lines, sheet) = match self.fetcher.get_json(&self.base_url, &query).await {
                Ok(payload) => parse_balance_sheet(&payload),
                Err(failure) => {
                    warn!("    {}: {}", commodity, failure);
                    (0, BalanceSheet::default())
                }
            };

            per_key.insert(commodity.to_string(), lines);
            if sheet.is_empty() {
                warn!("    {}: no PSD records", commodity);
                continue;
            }
            info!("    {}: {} records", commodity, lines);
            records.push(summarize(*commodity, year, &sheet));
        }

        if records.is_empty() {
            warn!("PSD data unavailable, generating fallback economic indicators");
            return fallback_dataset(year);
        }

        RawDataset {
            source: Source::Economic,
            year,
            data_source: DataSource::Live,
            records,
            per_key,
        }
    }
}

/// Read the `psdData` lines of a response into a balance sheet.
///
/// Lines are either attribute rows (`attributeDescription` + `value`) or a
/// flat record with one key per metric. Returns the number of lines read.
fn parse_balance_sheet(payload: &Value) -> (usize, BalanceSheet) {
    // ---
    let Some(lines) = payload.get("psdData").and_then(|d| d.as_array()) else {
        return (0, BalanceSheet::default());
    };

    let mut sheet = BalanceSheet::default();
    for line in lines {
        let attribute = ["attributeDescription", "attribute_description", "attributeName"]
            .iter()
            .find_map(|k| field(line, k).and_then(|v| v.as_str()));

        match attribute {
            Some(name) => {
                if let Some(value) = field(line, "value").and_then(json_f64) {
                    sheet.set(&name.trim().to_lowercase(), value);
                }
            }
            None => {
                for key in [
                    "production",
                    "total_supply",
                    "domestic_consumption",
                    "exports",
                    "ending_stocks",
                    "stocks_to_use_ratio",
                ] {
                    if let Some(value) = field(line, key).and_then(json_f64) {
                        sheet.set(key, value);
                    }
                }
            }
        }
    }

    (lines.len(), sheet)
}

fn summarize(commodity: Commodity, year: i32, sheet: &BalanceSheet) -> EconomicRecord {
    // ---
    let stocks_to_use_ratio = sheet.stocks_to_use_ratio();
    EconomicRecord {
        commodity: commodity.as_str().to_string(),
        year,
        production: sheet.production,
        total_supply: sheet.total_supply,
        domestic_consumption: sheet.domestic_consumption,
        exports: sheet.exports,
        ending_stocks: sheet.ending_stocks,
        stocks_to_use_ratio,
        price_index: Some(BASELINE_PRICE_INDEX),
        supply_risk_score: Some(supply_risk_score(stocks_to_use_ratio)),
        data_source: DataSource::Live,
    }
}

fn fallback_dataset(year: i32) -> RawDataset<EconomicRecord> {
    // ---
    let records = Commodity::ALL
        .iter()
        .map(|commodity| EconomicRecord {
            commodity: commodity.as_str().to_string(),
            year,
            production: None,
            total_supply: None,
            domestic_consumption: None,
            exports: None,
            ending_stocks: None,
            stocks_to_use_ratio: None,
            price_index: Some(BASELINE_PRICE_INDEX),
            supply_risk_score: Some(NEUTRAL_SUPPLY_RISK),
            data_source: DataSource::Fallback,
        })
        .collect();
    let per_key = Commodity::ALL.iter().map(|c| (c.to_string(), 1)).collect();

    RawDataset {
        source: Source::Economic,
        year,
        data_source: DataSource::Fallback,
        records,
        per_key,
    }
}
