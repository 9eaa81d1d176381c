//! CSV file data adapter.
//!
//! Bars live in `<base>/<SYMBOL>.csv` with columns
//! `timestamp,open,high,low,close,volume`; timestamps are `%Y-%m-%d` or
//! `%Y-%m-%d %H:%M:%S`. Tables live in `<base>/<name>.csv` with a header of
//! asset names and an optional leading `date`/`timestamp` column.

use crate::domain::error::QuantGuardError;
use crate::domain::ohlcv::OhlcvBar;
use crate::ports::data_port::{AssetTable, DataPort};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::PathBuf;

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, name: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", name))
    }

    fn read(&self, name: &str) -> Result<String, QuantGuardError> {
        let path = self.csv_path(name);
        fs::read_to_string(&path).map_err(|e| QuantGuardError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })
    }
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, QuantGuardError> {
    let value = value.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| QuantGuardError::Data {
            reason: format!(
                "invalid timestamp {:?}, expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
                value
            ),
        })
}

fn parse_field(
    record: &csv::StringRecord,
    index: usize,
    name: &str,
    line: usize,
) -> Result<f64, QuantGuardError> {
    let raw = record.get(index).ok_or_else(|| QuantGuardError::Data {
        reason: format!("line {}: missing {} column", line, name),
    })?;
    raw.trim().parse().map_err(|e| QuantGuardError::Data {
        reason: format!("line {}: invalid {} value {:?}: {}", line, name, raw, e),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, QuantGuardError> {
        let content = self.read(symbol)?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (i, result) in rdr.records().enumerate() {
            let line = i + 2;
            let record = result.map_err(|e| QuantGuardError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;

            let ts_str = record.get(0).ok_or_else(|| QuantGuardError::Data {
                reason: format!("line {}: missing timestamp column", line),
            })?;
            let timestamp = parse_timestamp(ts_str)?;
            let date = timestamp.date();
            if start.is_some_and(|s| date < s) || end.is_some_and(|e| date > e) {
                continue;
            }

            bars.push(OhlcvBar {
                symbol: symbol.to_string(),
                timestamp,
                open: parse_field(&record, 1, "open", line)?,
                high: parse_field(&record, 2, "high", line)?,
                low: parse_field(&record, 3, "low", line)?,
                close: parse_field(&record, 4, "close", line)?,
                volume: parse_field(&record, 5, "volume", line)?,
            });
        }

        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn fetch_table(&self, name: &str) -> Result<AssetTable, QuantGuardError> {
        let content = self.read(name)?;
        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| QuantGuardError::Data {
                reason: format!("CSV header error: {}", e),
            })?
            .clone();

        let skip = match headers.get(0).map(|h| h.trim().to_lowercase()) {
            Some(h) if h == "date" || h == "timestamp" => 1,
            _ => 0,
        };
        let assets: Vec<String> = headers
            .iter()
            .skip(skip)
            .map(|h| h.trim().to_string())
            .collect();
        if assets.is_empty() {
            return Err(QuantGuardError::Data {
                reason: format!("{}.csv has no asset columns", name),
            });
        }

        let mut rows = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let line = i + 2;
            let record = result.map_err(|e| QuantGuardError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;
            let row = assets
                .iter()
                .enumerate()
                .map(|(j, asset)| parse_field(&record, j + skip, asset, line))
                .collect::<Result<Vec<f64>, _>>()?;
            rows.push(row);
        }

        Ok(AssetTable { assets, rows })
    }

    fn list_symbols(&self) -> Result<Vec<String>, QuantGuardError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| QuantGuardError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| QuantGuardError::Data {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(".csv") {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        let csv_content = "timestamp,open,high,low,close,volume\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000\n\
            2024-01-17 16:00:00,110.0,120.0,105.0,115.0,55000.5\n";
        fs::write(path.join("BTCUSDT.csv"), csv_content).unwrap();
        fs::write(
            path.join("returns.csv"),
            "date,AAA,BBB\n2024-01-01,0.01,-0.02\n2024-01-02,0.005,0.03\n",
        )
        .unwrap();
        fs::write(path.join("bad.csv"), "timestamp,open,high,low,close,volume\n2024-01-15,1,2,3,x,5\n")
            .unwrap();

        (dir, path)
    }

    #[test]
    fn fetch_bars_returns_sorted_data() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let bars = adapter.fetch_bars("BTCUSDT", None, None).unwrap();

        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].timestamp, parse_timestamp("2024-01-15").unwrap());
        assert_eq!(bars[0].symbol, "BTCUSDT");
        assert_eq!(bars[0].open, 100.0);
        assert_eq!(bars[0].high, 110.0);
        assert_eq!(bars[0].low, 90.0);
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].volume, 50000.0);
        assert_eq!(bars[2].volume, 55000.5);
    }

    #[test]
    fn fetch_bars_filters_by_date() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);

        let day = NaiveDate::from_ymd_opt(2024, 1, 17).unwrap();
        let bars = adapter.fetch_bars("BTCUSDT", Some(day), Some(day)).unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp.date(), day);
    }

    #[test]
    fn fetch_bars_errors_for_missing_file() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let result = adapter.fetch_bars("XYZ", None, None);
        assert!(matches!(result, Err(QuantGuardError::Data { .. })));
    }

    #[test]
    fn fetch_bars_reports_bad_values() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let err = adapter.fetch_bars("bad", None, None).unwrap_err();
        assert!(err.to_string().contains("close"));
    }

    #[test]
    fn fetch_table_skips_date_column() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let table = adapter.fetch_table("returns").unwrap();
        assert_eq!(table.assets, vec!["AAA", "BBB"]);
        assert_eq!(table.rows, vec![vec![0.01, -0.02], vec![0.005, 0.03]]);
    }

    #[test]
    fn timestamps_accept_both_formats() {
        let date_only = parse_timestamp("2024-03-01").unwrap();
        let with_time = parse_timestamp("2024-03-01 09:30:00").unwrap();
        assert_eq!(date_only.date(), with_time.date());
        assert!(with_time > date_only);
        assert!(parse_timestamp("03/01/2024").is_err());
    }

    #[test]
    fn list_symbols_returns_file_stems() {
        let (_dir, path) = setup_test_data();
        let adapter = CsvAdapter::new(path);
        let symbols = adapter.list_symbols().unwrap();
        assert_eq!(symbols, vec!["BTCUSDT", "bad", "returns"]);
    }
}
