//! Core domain types and logic.

pub mod ohlcv;
pub mod stats;
pub mod trade;
pub mod strategy;
pub mod risk_engine;
pub mod stress;
pub mod position_sizing;
pub mod risk_limits;
pub mod governor;
pub mod optimizer;
pub mod backtest;
pub mod metrics;
pub mod walk_forward;
pub mod monte_carlo;
pub mod overfitting;
pub mod config_validation;
pub mod error;
