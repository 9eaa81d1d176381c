//! Market data port trait.

use chrono::NaiveDate;

use crate::domain::error::QuantGuardError;
use crate::domain::ohlcv::OhlcvBar;

/// A named numeric table: one column per asset, one row per period.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTable {
    pub assets: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

pub trait DataPort {
    /// Bars for `symbol` in timestamp order, limited to the inclusive date
    /// range when bounds are given.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<OhlcvBar>, QuantGuardError>;

    /// Per-asset returns or prices stored under `name`.
    fn fetch_table(&self, name: &str) -> Result<AssetTable, QuantGuardError>;

    fn list_symbols(&self) -> Result<Vec<String>, QuantGuardError>;
}
