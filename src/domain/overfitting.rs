//! In-sample versus out-of-sample degradation.

use std::fmt;

use log::{info, warn};

use super::backtest::BacktestResult;

pub const DEFAULT_OVERFITTING_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    /// None below 10%, Mild below 30%, Moderate below 50%, Severe above.
    pub fn from_degradation(degradation: f64) -> Self {
        if degradation < 0.1 {
            Severity::None
        } else if degradation < 0.3 {
            Severity::Mild
        } else if degradation < 0.5 {
            Severity::Moderate
        } else {
            Severity::Severe
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::None => "none",
            Severity::Mild => "mild",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OverfittingReport {
    pub is_overfit: bool,
    pub severity: Severity,
    pub sharpe_degradation: f64,
    pub return_degradation: f64,
    pub train_sharpe: f64,
    pub test_sharpe: f64,
    pub train_return: f64,
    pub test_return: f64,
}

/// (train - test) / |train|, or 0 when train is 0. Positive means the
/// out-of-sample figure is worse.
pub fn degradation(train: f64, test: f64) -> f64 {
    if train == 0.0 || !train.is_finite() || !test.is_finite() {
        0.0
    } else {
        (train - test) / train.abs()
    }
}

/// Flags overfitting when the Sharpe or total-return degradation exceeds
/// `threshold`. Severity is graded on the Sharpe degradation alone.
pub fn detect_overfitting(
    train: &BacktestResult,
    test: &BacktestResult,
    threshold: f64,
) -> OverfittingReport {
    compare(
        train.metrics.sharpe_ratio,
        test.metrics.sharpe_ratio,
        train.metrics.total_return,
        test.metrics.total_return,
        threshold,
    )
}

/// [`detect_overfitting`] on raw Sharpe ratios and total returns.
pub fn compare(
    train_sharpe: f64,
    test_sharpe: f64,
    train_return: f64,
    test_return: f64,
    threshold: f64,
) -> OverfittingReport {
    let sharpe_degradation = degradation(train_sharpe, test_sharpe);
    let return_degradation = degradation(train_return, test_return);
    let is_overfit = sharpe_degradation > threshold || return_degradation > threshold;
    let severity = Severity::from_degradation(sharpe_degradation);

    if is_overfit {
        warn!("overfitting detected ({severity})");
        warn!("  sharpe degradation: {:.1}%", sharpe_degradation * 100.0);
        warn!("  return degradation: {:.1}%", return_degradation * 100.0);
    } else {
        info!("no overfitting detected");
    }

    OverfittingReport {
        is_overfit,
        severity,
        sharpe_degradation,
        return_degradation,
        train_sharpe,
        test_sharpe,
        train_return,
        test_return,
    }
}
