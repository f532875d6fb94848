//! Multi-source merge into the model's unit of analysis.
//!
//! The crop table is the base (state × commodity × year). Weather and drought
//! are left-joined on (state, year) and the economic projection on
//! (commodity, year), so losing an auxiliary signal never drops a yield
//! observation. Nulls left by the joins are back-filled, rows without a yield
//! are dropped, and the derived features the calculator needs are added.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::collectors::{BASELINE_PRICE_INDEX, CLIMATOLOGY, NEUTRAL_SUPPLY_RISK};
use crate::models::{
    commodity_key, state_key, CropRecord, DataSource, DroughtRecord, EconomicRecord, MergedRecord,
    WeatherRecord,
};
use crate::scoring::FeatureReference;
use crate::stats;

/// Drought score of a row with no drought record: no known drought.
pub const NO_DROUGHT_DSCI: f64 = 0.0;

/// Columns whose completeness is reported before imputation.
const KEY_COLUMNS: [&str; 6] = [
    "yield_per_acre",
    "avg_temp",
    "total_precip",
    "total_gdd",
    "avg_dsci",
    "price_index",
];

/// The four raw tables of one year.
#[derive(Debug, Clone, Copy)]
pub struct SourceTables<'a> {
    pub crop: &'a [CropRecord],
    pub weather: &'a [WeatherRecord],
    pub drought: &'a [DroughtRecord],
    pub economic: &'a [EconomicRecord],
}

/// What the merge did, for the stage summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeSummary {
    pub year: i32,
    pub input_records: BTreeMap<String, usize>,
    pub total_records: usize,
    pub states: usize,
    pub commodities: usize,
    pub dropped_missing_yield: usize,
    /// Back-filled cells per column.
    pub imputed: BTreeMap<String, usize>,
    pub fallback_records: usize,
    /// Percent non-null per key column after the joins, before imputation.
    pub completeness: BTreeMap<String, f64>,
}

/// A crop row with its joined, possibly missing, auxiliary values.
#[derive(Debug, Clone)]
struct JoinedRow {
    year: i32,
    state_name: String,
    commodity: String,
    yield_per_acre: Option<f64>,
    avg_temp: Option<f64>,
    total_precip: Option<f64>,
    total_gdd: Option<f64>,
    avg_humidity: Option<f64>,
    avg_dsci: Option<f64>,
    price_index: Option<f64>,
    supply_risk_score: Option<f64>,
    data_source: DataSource,
    imputed_fields: u32,
}

/// Index a table by its join key; the first row for a key wins.
fn index_by<T, K, F>(rows: &[T], key: F) -> HashMap<K, &T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut index = HashMap::with_capacity(rows.len());
    for row in rows {
        index.entry(key(row)).or_insert(row);
    }
    index
}

/// NaN and infinities count as missing so they take the imputation path.
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn join(tables: &SourceTables<'_>) -> Vec<JoinedRow> {
    // ---
    let weather = index_by(tables.weather, |w| (state_key(&w.state_name), w.year));
    let drought = index_by(tables.drought, |d| (state_key(&d.state_name), d.year));
    let economic = index_by(tables.economic, |e| (commodity_key(&e.commodity), e.year));

    tables
        .crop
        .iter()
        .map(|crop| {
            let state = (state_key(&crop.state_name), crop.year);
            let w = weather.get(&state);
            let d = drought.get(&state);
            let e = economic.get(&(commodity_key(&crop.commodity), crop.year));

            let mut data_source = crop.data_source;
            for source in [
                w.map(|w| w.data_source),
                d.map(|d| d.data_source),
                e.map(|e| e.data_source),
            ]
            .into_iter()
            .flatten()
            {
                data_source = data_source.combine(source);
            }

            JoinedRow {
                year: crop.year,
                state_name: crop.state_name.trim().to_string(),
                commodity: commodity_key(&crop.commodity),
                yield_per_acre: finite(crop.yield_per_acre),
                avg_temp: finite(w.and_then(|w| w.avg_temp)),
                total_precip: finite(w.and_then(|w| w.total_precip)),
                total_gdd: finite(w.and_then(|w| w.total_gdd)),
                avg_humidity: finite(w.and_then(|w| w.avg_humidity)),
                avg_dsci: finite(d.and_then(|d| d.avg_dsci)),
                price_index: finite(e.and_then(|e| e.price_index)),
                supply_risk_score: finite(e.and_then(|e| e.supply_risk_score)),
                data_source,
                imputed_fields: 0,
            }
        })
        .collect()
}

fn completeness(rows: &[JoinedRow]) -> BTreeMap<String, f64> {
    // ---
    let column = |name: &str, row: &JoinedRow| match name {
        "yield_per_acre" => row.yield_per_acre,
        "avg_temp" => row.avg_temp,
        "total_precip" => row.total_precip,
        "total_gdd" => row.total_gdd,
        "avg_dsci" => row.avg_dsci,
        _ => row.price_index,
    };

    let mut out = BTreeMap::new();
    for name in KEY_COLUMNS {
        let missing = rows.iter().filter(|r| column(name, r).is_none()).count();
        let pct = if rows.is_empty() {
            0.0
        } else {
            missing as f64 / rows.len() as f64 * 100.0
        };
        if pct > 10.0 {
            warn!("    {}: {} missing ({:.1}%)", name, missing, pct);
        } else if missing > 0 {
            info!("    {}: {} missing ({:.1}%)", name, missing, pct);
        }
        out.insert(name.to_string(), 100.0 - pct);
    }
    out
}

/// Fill one weather column: same-state mean, then table mean, then climatology.
fn impute_weather<G>(rows: &mut [JoinedRow], get: G, default: f64) -> usize
where
    G: Fn(&mut JoinedRow) -> &mut Option<f64>,
{
    // ---
    let mut by_state: HashMap<String, Vec<f64>> = HashMap::new();
    let mut all = Vec::new();
    for row in rows.iter_mut() {
        let key = state_key(&row.state_name);
        if let Some(v) = *get(row) {
            by_state.entry(key).or_default().push(v);
            all.push(v);
        }
    }
    let state_means: HashMap<String, f64> = by_state
        .into_iter()
        .map(|(k, v)| (k, stats::mean(&v)))
        .collect();
    let table_mean = if all.is_empty() {
        default
    } else {
        stats::mean(&all)
    };

    let mut filled = 0;
    for row in rows.iter_mut() {
        let key = state_key(&row.state_name);
        let slot = get(row);
        if slot.is_none() {
            *slot = Some(state_means.get(&key).copied().unwrap_or(table_mean));
            row.imputed_fields += 1;
            filled += 1;
        }
    }
    filled
}

/// Fill a column with a constant neutral value.
fn impute_constant<G>(rows: &mut [JoinedRow], get: G, value: f64) -> usize
where
    G: Fn(&mut JoinedRow) -> &mut Option<f64>,
{
    let mut filled = 0;
    for row in rows.iter_mut() {
        let slot = get(row);
        if slot.is_none() {
            *slot = Some(value);
            row.imputed_fields += 1;
            filled += 1;
        }
    }
    filled
}

fn impute(rows: &mut [JoinedRow]) -> BTreeMap<String, usize> {
    // ---
    let mut imputed = BTreeMap::new();
    imputed.insert(
        "avg_temp".to_string(),
        impute_weather(rows, |r| &mut r.avg_temp, CLIMATOLOGY.avg_temp),
    );
    imputed.insert(
        "total_precip".to_string(),
        impute_weather(rows, |r| &mut r.total_precip, CLIMATOLOGY.total_precip),
    );
    imputed.insert(
        "total_gdd".to_string(),
        impute_weather(rows, |r| &mut r.total_gdd, CLIMATOLOGY.total_gdd),
    );
    imputed.insert(
        "avg_humidity".to_string(),
        impute_weather(rows, |r| &mut r.avg_humidity, CLIMATOLOGY.avg_humidity),
    );
    imputed.insert(
        "avg_dsci".to_string(),
        impute_constant(rows, |r| &mut r.avg_dsci, NO_DROUGHT_DSCI),
    );
    imputed.insert(
        "price_index".to_string(),
        impute_constant(rows, |r| &mut r.price_index, BASELINE_PRICE_INDEX),
    );
    imputed.insert(
        "supply_risk_score".to_string(),
        impute_constant(rows, |r| &mut r.supply_risk_score, NEUTRAL_SUPPLY_RISK),
    );
    imputed
}

/// Z-score of each yield within its commodity; 0 where the spread is 0.
fn yield_zscores(rows: &[(JoinedRow, f64)]) -> Vec<f64> {
    // ---
    let mut groups: HashMap<&str, Vec<f64>> = HashMap::new();
    for (row, y) in rows {
        groups.entry(row.commodity.as_str()).or_default().push(*y);
    }
    let moments: HashMap<&str, (f64, f64)> = groups
        .iter()
        .map(|(k, v)| (*k, (stats::mean(v), stats::sample_std(v))))
        .collect();

    rows.iter()
        .map(|(row, y)| match moments.get(row.commodity.as_str()) {
            Some((mean, std)) if *std > 0.0 => (y - mean) / std,
            _ => 0.0,
        })
        .collect()
}

/// Join, impute and enrich one year's tables.
///
/// Every returned record has a yield and no missing model input. Output is
/// sorted by (state_name, commodity) and is a pure function of the input.
pub fn merge(
    year: i32,
    tables: &SourceTables<'_>,
    features: &FeatureReference,
) -> (Vec<MergedRecord>, MergeSummary) {
    // ---
    info!("Merging datasets for {}", year);
    info!("    Crop: {} records", tables.crop.len());
    info!("    Weather: {} records", tables.weather.len());
    info!("    Drought: {} records", tables.drought.len());
    info!("    Economic: {} records", tables.economic.len());

    let mut rows = join(tables);
    let completeness = completeness(&rows);
    let imputed = impute(&mut rows);
    for (column, count) in imputed.iter().filter(|(_, n)| **n > 0) {
        warn!("    Back-filled {} missing {} values", count, column);
    }

    let before = rows.len();
    let with_yield: Vec<(JoinedRow, f64)> = rows
        .into_iter()
        .filter_map(|r| r.yield_per_acre.map(|y| (r, y)))
        .collect();
    let dropped_missing_yield = before - with_yield.len();
    if dropped_missing_yield > 0 {
        warn!("    Dropped {} rows with missing yield data", dropped_missing_yield);
    }

    let zscores = yield_zscores(&with_yield);
    let mut records: Vec<MergedRecord> = with_yield
        .into_iter()
        .zip(zscores)
        .map(|((row, yield_per_acre), yield_zscore)| {
            // Imputation leaves no gaps; the defaults only satisfy the types
            let avg_temp = row.avg_temp.unwrap_or(CLIMATOLOGY.avg_temp);
            let total_precip = row.total_precip.unwrap_or(CLIMATOLOGY.total_precip);
            MergedRecord {
                year: row.year,
                state_name: row.state_name,
                commodity: row.commodity,
                yield_per_acre,
                yield_zscore,
                avg_temp,
                total_precip,
                total_gdd: row.total_gdd.unwrap_or(CLIMATOLOGY.total_gdd),
                avg_humidity: row.avg_humidity.unwrap_or(CLIMATOLOGY.avg_humidity),
                avg_dsci: row.avg_dsci.unwrap_or(NO_DROUGHT_DSCI),
                price_index: row.price_index.unwrap_or(BASELINE_PRICE_INDEX),
                supply_risk_score: row.supply_risk_score.unwrap_or(NEUTRAL_SUPPLY_RISK),
                temp_stress: (avg_temp - features.optimal_temp_f).abs(),
                precip_deficit: (features.adequate_precip_in - total_precip).max(0.0),
                data_source: row.data_source,
                imputed_fields: row.imputed_fields,
            }
        })
        .collect();

    records.sort_by(|a, b| {
        a.state_name
            .cmp(&b.state_name)
            .then_with(|| a.commodity.cmp(&b.commodity))
    });

    let input_records = [
        ("crop", tables.crop.len()),
        ("weather", tables.weather.len()),
        ("drought", tables.drought.len()),
        ("economic", tables.economic.len()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let summary = MergeSummary {
        year,
        input_records,
        total_records: records.len(),
        states: records
            .iter()
            .map(|r| state_key(&r.state_name))
            .collect::<BTreeSet<_>>()
            .len(),
        commodities: records
            .iter()
            .map(|r| r.commodity.as_str())
            .collect::<BTreeSet<_>>()
            .len(),
        dropped_missing_yield,
        imputed,
        fallback_records: records.iter().filter(|r| r.data_source.is_fallback()).count(),
        completeness,
    };

    info!(
        "Merged {} records, {} states, {} commodities",
        summary.total_records, summary.states, summary.commodities
    );
    (records, summary)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn create_test_crop(state: &str, commodity: &str, yield_per_acre: Option<f64>) -> CropRecord {
        CropRecord {
            year: 2024,
            state_name: state.to_string(),
            commodity: commodity.to_string(),
            yield_per_acre,
            data_source: DataSource::Live,
        }
    }

    fn create_test_weather(state: &str, avg_temp: Option<f64>, total_precip: f64) -> WeatherRecord {
        WeatherRecord {
            state_name: state.to_string(),
            year: 2024,
            avg_temp,
            max_temp: None,
            min_temp: None,
            total_precip: Some(total_precip),
            total_gdd: Some(3000.0),
            avg_humidity: Some(60.0),
            data_source: DataSource::Live,
        }
    }

    fn create_test_drought(state: &str, avg_dsci: f64, data_source: DataSource) -> DroughtRecord {
        DroughtRecord {
            state_name: state.to_string(),
            year: 2024,
            avg_dsci: Some(avg_dsci),
            avg_d0_pct: None,
            avg_d1_pct: None,
            avg_d2_pct: None,
            avg_d3_pct: None,
            avg_d4_pct: None,
            avg_none_pct: None,
            drought_category: "None".to_string(),
            data_source,
        }
    }

    fn create_test_economic(commodity: &str, supply_risk: f64) -> EconomicRecord {
        EconomicRecord {
            commodity: commodity.to_string(),
            year: 2024,
            production: None,
            total_supply: None,
            domestic_consumption: None,
            exports: None,
            ending_stocks: None,
            stocks_to_use_ratio: None,
            price_index: Some(100.0),
            supply_risk_score: Some(supply_risk),
            data_source: DataSource::Live,
        }
    }

    fn run(
        crop: &[CropRecord],
        weather: &[WeatherRecord],
        drought: &[DroughtRecord],
        economic: &[EconomicRecord],
    ) -> (Vec<MergedRecord>, MergeSummary) {
        let tables = SourceTables {
            crop,
            weather,
            drought,
            economic,
        };
        merge(2024, &tables, &FeatureReference::default())
    }

    #[test]
    fn test_crop_row_without_weather_is_kept_and_backfilled() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            create_test_crop("Ohio", "CORN", Some(180.0)),
        ];
        let weather = vec![create_test_weather("Iowa", Some(70.0), 18.0)];

        let (records, summary) = run(&crop, &weather, &[], &[]);

        assert_eq!(records.len(), 2);
        let ohio = records.iter().find(|r| r.state_name == "Ohio").unwrap();
        // No Ohio value anywhere, so the table-wide mean is used
        assert_eq!(ohio.avg_temp, 70.0);
        assert_eq!(ohio.total_precip, 18.0);
        assert_eq!(ohio.avg_dsci, 0.0);
        assert_eq!(ohio.price_index, 100.0);
        assert_eq!(ohio.supply_risk_score, 50.0);
        assert_eq!(ohio.imputed_fields, 7);
        assert_eq!(summary.imputed["avg_temp"], 1);
        assert_eq!(summary.completeness["avg_temp"], 50.0);
    }

    #[test]
    fn test_state_mean_preferred_over_table_mean() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            CropRecord {
                year: 2023,
                ..create_test_crop("Iowa", "CORN", Some(190.0))
            },
            create_test_crop("Kansas", "WHEAT", Some(45.0)),
        ];
        let weather = vec![
            WeatherRecord {
                year: 2023,
                ..create_test_weather("Iowa", Some(60.0), 18.0)
            },
            create_test_weather("Kansas", Some(80.0), 12.0),
        ];

        let (records, _) = run(&crop, &weather, &[], &[]);

        // Iowa 2024 has no weather row: Iowa's own mean (60), not the table's (70)
        let iowa_2024 = records
            .iter()
            .find(|r| r.state_name == "Iowa" && r.year == 2024)
            .unwrap();
        assert_eq!(iowa_2024.avg_temp, 60.0);
        assert_eq!(iowa_2024.total_precip, 18.0);
        assert_eq!(iowa_2024.temp_stress, 15.0);
    }

    #[test]
    fn test_nan_weather_value_is_imputed_from_state_mean() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            CropRecord {
                year: 2023,
                ..create_test_crop("Iowa", "CORN", Some(190.0))
            },
            create_test_crop("Kansas", "WHEAT", Some(45.0)),
        ];
        let weather = vec![
            create_test_weather("Iowa", Some(f64::NAN), 18.0),
            WeatherRecord {
                year: 2023,
                ..create_test_weather("Iowa", Some(60.0), 18.0)
            },
            create_test_weather("Kansas", Some(80.0), 12.0),
        ];

        let (records, summary) = run(&crop, &weather, &[], &[]);

        let iowa_2024 = records
            .iter()
            .find(|r| r.state_name == "Iowa" && r.year == 2024)
            .unwrap();
        assert_eq!(iowa_2024.avg_temp, 60.0);
        assert_eq!(iowa_2024.temp_stress, 15.0);
        assert_eq!(iowa_2024.imputed_fields, 4);
        assert_eq!(summary.imputed["avg_temp"], 1);
        assert!(records.iter().all(|r| r.avg_temp.is_finite()));
    }

    #[test]
    fn test_non_finite_drought_and_economic_values_are_neutralized() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            create_test_crop("Ohio", "CORN", Some(f64::NAN)),
        ];
        let weather = vec![create_test_weather("Iowa", Some(70.0), 20.0)];
        let drought = vec![create_test_drought("Iowa", f64::NAN, DataSource::Live)];
        let economic = vec![create_test_economic("CORN", f64::INFINITY)];

        let (records, summary) = run(&crop, &weather, &drought, &economic);

        assert_eq!(records.len(), 1);
        assert_eq!(summary.dropped_missing_yield, 1);
        assert_eq!(records[0].avg_dsci, 0.0);
        assert_eq!(records[0].supply_risk_score, 50.0);
        assert_eq!(records[0].price_index, 100.0);
        assert_eq!(records[0].imputed_fields, 2);
        // Imputation runs before rows without a yield are dropped
        assert_eq!(summary.imputed["avg_dsci"], 2);
    }

    #[test]
    fn test_join_is_case_insensitive() {
        // ---
        let crop = vec![create_test_crop("IOWA ", "corn", Some(200.0))];
        let weather = vec![create_test_weather("Iowa", Some(77.0), 25.0)];
        let drought = vec![create_test_drought("iowa", 12.5, DataSource::Live)];
        let economic = vec![create_test_economic("Corn", 70.0)];

        let (records, _) = run(&crop, &weather, &drought, &economic);

        assert_eq!(records[0].commodity, "CORN");
        assert_eq!(records[0].avg_temp, 77.0);
        assert_eq!(records[0].avg_dsci, 12.5);
        assert_eq!(records[0].supply_risk_score, 70.0);
        assert_eq!(records[0].imputed_fields, 0);
    }

    #[test]
    fn test_missing_yield_dropped() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            create_test_crop("Ohio", "CORN", None),
        ];
        let (records, summary) = run(&crop, &[], &[], &[]);

        assert_eq!(records.len(), 1);
        assert_eq!(summary.dropped_missing_yield, 1);
        assert_eq!(summary.completeness["yield_per_acre"], 50.0);
    }

    #[test]
    fn test_derived_features() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            create_test_crop("Ohio", "CORN", Some(180.0)),
            create_test_crop("Kansas", "WHEAT", Some(45.0)),
        ];
        let weather = vec![
            create_test_weather("Iowa", Some(70.0), 12.0),
            create_test_weather("Ohio", Some(81.0), 26.0),
            create_test_weather("Kansas", Some(75.0), 20.0),
        ];

        let (records, _) = run(&crop, &weather, &[], &[]);
        let get = |s: &str| records.iter().find(|r| r.state_name == s).unwrap();

        // mean 190, sample std √200
        let std = 200f64.sqrt();
        assert!((get("Iowa").yield_zscore - 10.0 / std).abs() < 1e-12);
        assert!((get("Ohio").yield_zscore + 10.0 / std).abs() < 1e-12);
        // Single-row commodity group has no spread
        assert_eq!(get("Kansas").yield_zscore, 0.0);

        assert_eq!(get("Iowa").temp_stress, 5.0);
        assert_eq!(get("Iowa").precip_deficit, 8.0);
        assert_eq!(get("Ohio").temp_stress, 6.0);
        assert_eq!(get("Ohio").precip_deficit, 0.0);
    }

    #[test]
    fn test_fallback_provenance_propagates() {
        // ---
        let crop = vec![
            create_test_crop("Iowa", "CORN", Some(200.0)),
            create_test_crop("Ohio", "CORN", Some(180.0)),
        ];
        let drought = vec![create_test_drought("Iowa", 0.0, DataSource::Fallback)];

        let (records, summary) = run(&crop, &[], &drought, &[]);

        assert_eq!(records[0].state_name, "Iowa");
        assert_eq!(records[0].data_source, DataSource::Fallback);
        assert_eq!(records[1].data_source, DataSource::Live);
        assert_eq!(summary.fallback_records, 1);
    }

    #[test]
    fn test_merge_is_deterministic_and_sorted() {
        // ---
        let crop = vec![
            create_test_crop("Ohio", "WHEAT", Some(70.0)),
            create_test_crop("Iowa", "SOYBEANS", Some(60.0)),
            create_test_crop("Iowa", "CORN", Some(200.0)),
        ];
        let (first, _) = run(&crop, &[], &[], &[]);
        let (second, _) = run(&crop, &[], &[], &[]);

        assert_eq!(first, second);
        let keys: Vec<_> = first
            .iter()
            .map(|r| (r.state_name.as_str(), r.commodity.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("Iowa", "CORN"), ("Iowa", "SOYBEANS"), ("Ohio", "WHEAT")]
        );
    }
}
