//! Walk-forward optimization: fit parameters on a training window, validate
//! them on the bars that follow, slide forward and repeat.
//!
//! Only the out-of-sample results are aggregated. Grid cells and windows are
//! independent and run on the rayon pool.

use chrono::NaiveDateTime;
use log::info;
use rayon::prelude::*;

use super::backtest::{validate_bars, BacktestResult, Backtester};
use super::error::QuantGuardError;
use super::ohlcv::OhlcvBar;
use super::overfitting::{detect_overfitting, OverfittingReport, DEFAULT_OVERFITTING_THRESHOLD};
use super::stats;
use super::strategy::{ParamGrid, ParameterSet, SignalStrategy};

pub const DEFAULT_TRAIN_PERIOD: usize = 252;
pub const DEFAULT_TEST_PERIOD: usize = 63;
pub const DEFAULT_STEP: usize = 21;

/// Number of windows that fit: ⌊(len - train - test) / step⌋ + 1, or 0 when a
/// single window does not fit or `step` is 0.
pub fn window_count(len: usize, train: usize, test: usize, step: usize) -> usize {
    let span = train + test;
    if step == 0 || len < span {
        0
    } else {
        (len - span) / step + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub train_start: NaiveDateTime,
    pub train_end: NaiveDateTime,
    pub test_start: NaiveDateTime,
    pub test_end: NaiveDateTime,
    pub best_parameters: ParameterSet,
    /// In-sample result of the selected parameters.
    pub train: BacktestResult,
    /// Out-of-sample result of the selected parameters.
    pub test: BacktestResult,
    pub overfitting: OverfittingReport,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardReport {
    pub windows: Vec<WalkForwardWindow>,
    pub avg_sharpe: f64,
    pub avg_return: f64,
    pub avg_drawdown: f64,
    pub total_trades: usize,
    pub num_windows: usize,
}

impl Backtester {
    /// Slides a `train`-bar window forward by `step` bars. Each window picks
    /// the grid entry with the best in-sample Sharpe (ties go to the earlier
    /// entry) and backtests it on the following `test` bars.
    pub fn walk_forward(
        &self,
        bars: &[OhlcvBar],
        strategy: &dyn SignalStrategy,
        grid: &ParamGrid,
        train: usize,
        test: usize,
        step: usize,
    ) -> Result<WalkForwardReport, QuantGuardError> {
        if train == 0 || test == 0 {
            return Err(QuantGuardError::InvalidWalkForward {
                reason: format!("train ({train}) and test ({test}) periods must be positive"),
            });
        }
        if step == 0 {
            return Err(QuantGuardError::InvalidWalkForward {
                reason: "step must be positive".into(),
            });
        }
        let candidates = grid.combinations();
        if candidates.is_empty() {
            return Err(QuantGuardError::InvalidWalkForward {
                reason: "parameter grid has no combinations".into(),
            });
        }
        if bars.len() < train + test {
            return Err(QuantGuardError::InsufficientData {
                have: bars.len(),
                need: train + test,
            });
        }
        validate_bars(bars)?;

        let count = window_count(bars.len(), train, test, step);
        info!(
            "walk-forward: {count} windows (train {train}, test {test}, step {step}), {} candidates",
            candidates.len()
        );

        let windows: Vec<WalkForwardWindow> = (0..count)
            .into_par_iter()
            .map(|index| {
                let start = index * step;
                let train_bars = &bars[start..start + train];
                let test_bars = &bars[start + train..start + train + test];
                let fitted = self.best_on(train_bars, strategy, &candidates)?.ok_or_else(|| {
                    QuantGuardError::InvalidWalkForward {
                        reason: "parameter grid has no combinations".into(),
                    }
                })?;
                let params = fitted.parameters.clone();
                let oos = self.replay(test_bars, &strategy.signals(test_bars, &params), &params)?;
                let overfitting = detect_overfitting(&fitted, &oos, DEFAULT_OVERFITTING_THRESHOLD);
                Ok(WalkForwardWindow {
                    index,
                    train_start: train_bars[0].timestamp,
                    train_end: train_bars[train - 1].timestamp,
                    test_start: test_bars[0].timestamp,
                    test_end: test_bars[test - 1].timestamp,
                    best_parameters: params,
                    train: fitted,
                    test: oos,
                    overfitting,
                })
            })
            .collect::<Result<_, QuantGuardError>>()?;

        for w in &windows {
            info!(
                "window {}: [{}] sharpe {:.2}, return {:.2}%",
                w.index + 1,
                w.best_parameters,
                w.test.metrics.sharpe_ratio,
                w.test.metrics.total_return * 100.0
            );
        }

        let sharpes: Vec<f64> = windows.iter().map(|w| w.test.metrics.sharpe_ratio).collect();
        let returns: Vec<f64> = windows.iter().map(|w| w.test.metrics.total_return).collect();
        let drawdowns: Vec<f64> = windows.iter().map(|w| w.test.metrics.max_drawdown).collect();

        let report = WalkForwardReport {
            avg_sharpe: stats::mean(&sharpes),
            avg_return: stats::mean(&returns),
            avg_drawdown: stats::mean(&drawdowns),
            total_trades: windows.iter().map(|w| w.test.num_trades()).sum(),
            num_windows: windows.len(),
            windows,
        };

        info!("walk-forward complete: {} windows", report.num_windows);
        info!("  avg sharpe: {:.2}", report.avg_sharpe);
        info!("  avg return: {:.2}%", report.avg_return * 100.0);
        info!("  avg drawdown: {:.2}%", report.avg_drawdown * 100.0);

        Ok(report)
    }

    /// Grid search on validated bars; the first of equally good candidates wins.
    fn best_on(
        &self,
        bars: &[OhlcvBar],
        strategy: &dyn SignalStrategy,
        candidates: &[ParameterSet],
    ) -> Result<Option<BacktestResult>, QuantGuardError> {
        let results: Vec<BacktestResult> = candidates
            .par_iter()
            .map(|params| self.replay(bars, &strategy.signals(bars, params), params))
            .collect::<Result<_, QuantGuardError>>()?;

        Ok(results.into_iter().reduce(|best, result| {
            if result.metrics.sharpe_ratio > best.metrics.sharpe_ratio {
                result
            } else {
                best
            }
        }))
    }
}
