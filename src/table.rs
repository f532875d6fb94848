//! CSV and JSON file handoff between stages.
//!
//! Typed rows are written with `csv::Writer` from `Serialize` structs and read
//! back through `Deserialize`. The validators need to report missing columns
//! and null shares rather than fail to parse, so they read through the untyped
//! [`ColumnTable`] instead.
//!
//! All writes replace the target wholesale: content goes to a sibling
//! temporary file that is renamed into place once complete.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{PipelineError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write `rows` as CSV with a header row, replacing `path`.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_path(path);
    {
        let mut wtr = csv::Writer::from_path(&tmp)?;
        for r in rows {
            wtr.serialize(r)?;
        }
        wtr.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Write pre-rendered records under an explicit header, replacing `path`.
///
/// Used where column names depend on run parameters (year-suffixed columns).
pub fn write_csv_records(path: &Path, header: &[String], records: &[Vec<String>]) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_path(path);
    {
        let mut wtr = csv::Writer::from_path(&tmp)?;
        wtr.write_record(header)?;
        for r in records {
            wtr.write_record(r)?;
        }
        wtr.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a typed CSV file. A missing file is reported as `MissingInput`.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let mut rdr = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut rows = Vec::new();
    for result in rdr.deserialize::<T>() {
        rows.push(result?);
    }
    Ok(rows)
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let tmp = temp_path(path);
    let s = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, s)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let s = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

// ---

/// Untyped view of a CSV file: header names plus raw string cells.
#[derive(Debug, Clone, Default)]
pub struct ColumnTable {
    headers: Vec<String>,
    rows: Vec<StringRecord>,
}

/// Cell spellings treated as null.
fn is_null_cell(cell: &str) -> bool {
    matches!(cell.trim(), "" | "nan" | "NaN" | "NA" | "null" | "None")
}

/// Numeric value of one cell. Nulls, unparseable text and non-finite
/// values are all `None`; thousands separators are ignored.
pub fn parse_number(cell: &str) -> Option<f64> {
    if is_null_cell(cell) {
        return None;
    }
    cell.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Serde adapter for optional numeric cells in the raw files, so the typed
/// read agrees with [`ColumnTable::numbers`] on what counts as missing.
pub fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let cell: Option<String> = Option::deserialize(deserializer)?;
    Ok(cell.as_deref().and_then(parse_number))
}

impl ColumnTable {
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let file = fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?);
        }
        Ok(Self { headers, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index(name).is_some()
    }

    /// Names from `required` absent from the header, in the given order.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cells of a column, `None` for nulls. `None` overall if the column is absent.
    pub fn text(&self, name: &str) -> Option<Vec<Option<&str>>> {
        let idx = self.index(name)?;
        Some(
            self.rows
                .iter()
                .map(|r| r.get(idx).filter(|c| !is_null_cell(c)).map(str::trim))
                .collect(),
        )
    }

    /// Numeric cells of a column; nulls and unparseable cells become `None`.
    pub fn numbers(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let cells = self.text(name)?;
        Some(cells.into_iter().map(|c| c.and_then(parse_number)).collect())
    }

    /// Non-null numeric values of a column.
    pub fn values(&self, name: &str) -> Vec<f64> {
        self.numbers(name)
            .map(|v| v.into_iter().flatten().collect())
            .unwrap_or_default()
    }

    /// Percentage of null cells in a column (0 for an empty table).
    pub fn null_pct(&self, name: &str) -> Option<f64> {
        let cells = self.text(name)?;
        if cells.is_empty() {
            return Some(0.0);
        }
        let nulls = cells.iter().filter(|c| c.is_none()).count();
        Some(nulls as f64 / cells.len() as f64 * 100.0)
    }

    /// Share (0-100) of cells with no usable number: nulls plus cells that
    /// do not parse. `None` if the column is absent.
    pub fn missing_number_pct(&self, name: &str) -> Option<f64> {
        let cells = self.numbers(name)?;
        if cells.is_empty() {
            return Some(0.0);
        }
        let missing = cells.iter().filter(|c| c.is_none()).count();
        Some(missing as f64 / cells.len() as f64 * 100.0)
    }

    /// Number of non-null cells in a column that do not parse as a number.
    pub fn non_numeric_count(&self, name: &str) -> usize {
        match (self.text(name), self.numbers(name)) {
            (Some(text), Some(numbers)) => text
                .iter()
                .zip(&numbers)
                .filter(|(t, n)| t.is_some() && n.is_none())
                .count(),
            _ => 0,
        }
    }

    /// Number of distinct non-null values in a column.
    pub fn distinct_count(&self, name: &str) -> usize {
        self.text(name)
            .map(|cells| cells.into_iter().flatten().collect::<HashSet<_>>().len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: Option<f64>,
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct LenientRow {
        name: String,
        #[serde(default, deserialize_with = "lenient_number")]
        value: Option<f64>,
    }

    #[test]
    fn test_write_then_read_replaces_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rows.csv");

        let first = vec![
            Row { name: "a".into(), value: Some(1.5) },
            Row { name: "b".into(), value: None },
        ];
        write_csv(&path, &first).unwrap();
        write_csv(&path, &first[..1]).unwrap();

        let back: Vec<Row> = read_csv(&path).unwrap();
        assert_eq!(back, vec![Row { name: "a".into(), value: Some(1.5) }]);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_read_missing_file() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let err = read_csv::<Row>(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { .. }));
    }

    #[test]
    fn test_column_table_nulls_and_numbers() {
        // ---
        let data = "state_name,yield_per_acre\nIowa,200\nOhio,\nUtah,nan\nIowa,1,234\n";
        let table = ColumnTable::from_reader(data.as_bytes()).unwrap();

        assert_eq!(table.len(), 4);
        assert!(table.has_column("yield_per_acre"));
        assert_eq!(table.missing_columns(&["state_name", "commodity"]), vec!["commodity"]);
        assert_eq!(table.null_pct("yield_per_acre"), Some(50.0));
        assert_eq!(table.distinct_count("state_name"), 3);
        // Flexible reader keeps the extra field from the unquoted thousands separator
        assert_eq!(table.values("yield_per_acre"), vec![200.0, 1.0]);
        assert!(table.numbers("commodity").is_none());
    }

    #[test]
    fn test_lenient_read_matches_column_table() {
        // ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let data = "name,value\na,1.5\nb,NA\nc,nan\nd,\ne,abc\nf,inf\ng,None\n";
        std::fs::write(&path, data).unwrap();

        let rows: Vec<LenientRow> = read_csv(&path).unwrap();
        let typed: Vec<Option<f64>> = rows.iter().map(|r| r.value).collect();

        let table = ColumnTable::read(&path).unwrap();
        assert_eq!(typed, table.numbers("value").unwrap());
        assert_eq!(typed[0], Some(1.5));
        assert!(typed[1..].iter().all(|v| v.is_none()));
        assert_eq!(table.null_pct("value"), Some(4.0 / 7.0 * 100.0));
        assert_eq!(table.non_numeric_count("value"), 2);
        assert_eq!(table.missing_number_pct("value"), Some(6.0 / 7.0 * 100.0));
    }

    #[test]
    fn test_lenient_number_tolerates_absent_column() {
        // ---
        let data = "name\na\n";
        let mut rdr = ReaderBuilder::new().from_reader(data.as_bytes());
        let rows = rdr
            .deserialize::<LenientRow>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(rows, vec![LenientRow { name: "a".into(), value: None }]);
    }
}
