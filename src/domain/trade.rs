//! Trade direction and closed-trade records.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;

use super::error::TradeRecordError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// A closed position. Built once through [`TradeRecord::close`], never mutated.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TradeRecord {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_time: NaiveDateTime,
    pub exit_time: NaiveDateTime,
    /// Commission and slippage paid on entry and exit.
    pub costs: f64,
    pub realized_pnl: f64,
    /// Realized P&L relative to entry notional.
    pub return_pct: f64,
}

impl TradeRecord {
    /// realized_pnl = (exit - entry) · quantity · side - costs
    pub fn close(
        side: Side,
        quantity: f64,
        entry_price: f64,
        exit_price: f64,
        entry_time: NaiveDateTime,
        exit_time: NaiveDateTime,
        costs: f64,
    ) -> Result<Self, TradeRecordError> {
        if exit_time < entry_time {
            return Err(TradeRecordError::ExitBeforeEntry);
        }
        if !(quantity > 0.0 && quantity.is_finite()) {
            return Err(TradeRecordError::InvalidQuantity(quantity));
        }
        if !(entry_price > 0.0 && entry_price.is_finite())
            || !(exit_price > 0.0 && exit_price.is_finite())
        {
            return Err(TradeRecordError::InvalidPrice);
        }

        let realized_pnl = (exit_price - entry_price) * quantity * side.sign() - costs;
        let return_pct = realized_pnl / (quantity * entry_price);

        Ok(TradeRecord {
            side,
            quantity,
            entry_price,
            exit_price,
            entry_time,
            exit_time,
            costs,
            realized_pnl,
            return_pct,
        })
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }

    pub fn duration_hours(&self) -> f64 {
        (self.exit_time - self.entry_time).num_seconds() as f64 / 3600.0
    }
}
