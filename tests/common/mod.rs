#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use quantguard::domain::ohlcv::OhlcvBar;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::fs;
use std::io::Write;
use std::path::Path;

pub fn day(offset: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::days(offset)
}

/// Daily bars whose open/high/low bracket each close by 1%.
pub fn make_bars(symbol: &str, closes: &[f64]) -> Vec<OhlcvBar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcvBar {
            symbol: symbol.to_string(),
            timestamp: day(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000.0,
        })
        .collect()
}

/// i.i.d. normal returns from a fixed seed.
pub fn normal_returns(seed: u64, n: usize, mu: f64, sigma: f64) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let normal = Normal::new(mu, sigma).unwrap();
    (0..n).map(|_| normal.sample(&mut rng)).collect()
}

/// Prices compounded from `start` by `returns`.
pub fn prices_from_returns(start: f64, returns: &[f64]) -> Vec<f64> {
    let mut prices = Vec::with_capacity(returns.len() + 1);
    let mut price = start;
    prices.push(price);
    for r in returns {
        price *= 1.0 + r;
        prices.push(price);
    }
    prices
}

/// Rises for `leg` bars, falls for `leg` bars, repeated `cycles` times.
pub fn zigzag_closes(cycles: usize, leg: usize) -> Vec<f64> {
    let mut closes = Vec::with_capacity(cycles * leg * 2);
    let mut price = 100.0;
    for _ in 0..cycles {
        for _ in 0..leg {
            price *= 1.01;
            closes.push(price);
        }
        for _ in 0..leg {
            price *= 0.99;
            closes.push(price);
        }
    }
    closes
}

pub fn write_bars_csv(dir: &Path, symbol: &str, bars: &[OhlcvBar]) {
    let mut content = String::from("timestamp,open,high,low,close,volume\n");
    for b in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            b.timestamp.format("%Y-%m-%d"),
            b.open,
            b.high,
            b.low,
            b.close,
            b.volume
        ));
    }
    fs::write(dir.join(format!("{symbol}.csv")), content).unwrap();
}

pub fn write_table_csv(dir: &Path, name: &str, assets: &[&str], rows: &[Vec<f64>]) {
    let mut content = format!("date,{}\n", assets.join(","));
    for (i, row) in rows.iter().enumerate() {
        let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        content.push_str(&format!("{},{}\n", day(i as i64).format("%Y-%m-%d"), values.join(",")));
    }
    fs::write(dir.join(format!("{name}.csv")), content).unwrap();
}

pub fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

/// Three assets with distinct volatility, 300 seeded observations.
pub fn three_asset_rows() -> Vec<Vec<f64>> {
    let a = normal_returns(1, 300, 0.0006, 0.010);
    let b = normal_returns(2, 300, 0.0004, 0.015);
    let c = normal_returns(3, 300, 0.0002, 0.005);
    (0..300).map(|i| vec![a[i], b[i], c[i]]).collect()
}
