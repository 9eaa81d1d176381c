//! Monte Carlo resampling of closed trades.
//!
//! Trade returns are treated as exchangeable: each simulation draws
//! `trades.len()` of them with replacement and compounds them from 1.0. The
//! spread of final returns and drawdowns shows how much the observed result
//! owes to the particular sequence of trades.

use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use super::backtest::Backtester;
use super::stats;
use super::trade::TradeRecord;

pub const DEFAULT_RESAMPLE_SIMULATIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResampleReport {
    pub n_simulations: usize,
    pub mean_return: f64,
    pub median_return: f64,
    pub std_return: f64,
    /// Percentile (1 - c) / 2 of final returns.
    pub ci_lower: f64,
    /// Percentile 1 - (1 - c) / 2 of final returns.
    pub ci_upper: f64,
    /// Share of simulations ending with a positive return.
    pub prob_profit: f64,
    pub worst_return: f64,
    /// Most negative drawdown over all simulations.
    pub worst_drawdown: f64,
    pub median_drawdown: f64,
    pub final_returns: Vec<f64>,
}

impl Backtester {
    /// `None` for an empty trade list, zero simulations or a confidence level
    /// outside (0, 1).
    ///
    /// Simulation `i` draws from stream `i` of a ChaCha generator seeded with
    /// the configured seed, so results do not depend on the thread count.
    pub fn monte_carlo_trade_resample(
        &self,
        trades: &[TradeRecord],
        n_simulations: usize,
        confidence_level: f64,
    ) -> Option<ResampleReport> {
        if trades.is_empty() {
            warn!("trade resampling needs at least one trade");
            return None;
        }
        if n_simulations == 0 {
            warn!("trade resampling needs at least one simulation");
            return None;
        }
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            warn!("confidence level must be in (0, 1), got {confidence_level}");
            return None;
        }

        let returns: Vec<f64> = trades.iter().map(|t| t.return_pct).collect();
        let seed = self
            .config()
            .seed
            .unwrap_or_else(|| rand::thread_rng().r#gen());

        let outcomes: Vec<(f64, f64)> = (0..n_simulations)
            .into_par_iter()
            .map(|sim| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(sim as u64);
                let mut equity = 1.0_f64;
                let mut path = Vec::with_capacity(returns.len() + 1);
                path.push(equity);
                for _ in 0..returns.len() {
                    let r = returns[rng.gen_range(0..returns.len())];
                    equity *= (1.0 + r).max(0.0);
                    path.push(equity);
                }
                (equity - 1.0, stats::max_drawdown(&path))
            })
            .collect();

        let final_returns: Vec<f64> = outcomes.iter().map(|(r, _)| *r).collect();
        let drawdowns: Vec<f64> = outcomes.iter().map(|(_, dd)| *dd).collect();

        let lower_pct = (1.0 - confidence_level) / 2.0 * 100.0;
        let upper_pct = 100.0 - lower_pct;
        let profitable = final_returns.iter().filter(|&&r| r > 0.0).count();

        let report = ResampleReport {
            n_simulations,
            mean_return: stats::mean(&final_returns),
            median_return: stats::median(&final_returns),
            std_return: stats::population_std(&final_returns),
            ci_lower: stats::percentile(&final_returns, lower_pct),
            ci_upper: stats::percentile(&final_returns, upper_pct),
            prob_profit: profitable as f64 / n_simulations as f64,
            worst_return: final_returns.iter().copied().fold(f64::INFINITY, f64::min),
            worst_drawdown: drawdowns.iter().copied().fold(0.0, f64::min),
            median_drawdown: stats::median(&drawdowns),
            final_returns,
        };

        info!("trade resampling: {n_simulations} simulations of {} trades", trades.len());
        info!("  mean return: {:.2}%", report.mean_return * 100.0);
        info!("  probability of profit: {:.1}%", report.prob_profit * 100.0);
        info!("  worst drawdown: {:.2}%", report.worst_drawdown * 100.0);

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::backtest::BacktestConfig;
    use crate::domain::trade::Side;
    use chrono::NaiveDate;

    fn trade_with_return(r: f64) -> TradeRecord {
        let t = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        TradeRecord::close(Side::Long, 1.0, 100.0, 100.0 * (1.0 + r), t, t, 0.0).unwrap()
    }

    fn seeded() -> Backtester {
        Backtester::new(BacktestConfig {
            seed: Some(42),
            ..BacktestConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn empty_or_degenerate_inputs_give_none() {
        let bt = seeded();
        assert!(bt.monte_carlo_trade_resample(&[], 100, 0.95).is_none());
        let trades = vec![trade_with_return(0.01)];
        assert!(bt.monte_carlo_trade_resample(&trades, 0, 0.95).is_none());
        assert!(bt.monte_carlo_trade_resample(&trades, 100, 1.0).is_none());
    }

    #[test]
    fn identical_trades_have_no_spread() {
        let trades = vec![trade_with_return(0.01); 5];
        let report = seeded().monte_carlo_trade_resample(&trades, 200, 0.95).unwrap();
        let expected = 1.01_f64.powi(5) - 1.0;
        assert!((report.mean_return - expected).abs() < 1e-12);
        assert!((report.ci_lower - expected).abs() < 1e-12);
        assert!((report.ci_upper - expected).abs() < 1e-12);
        assert!(report.std_return < 1e-12);
        assert_eq!(report.prob_profit, 1.0);
        assert_eq!(report.worst_drawdown, 0.0);
        assert_eq!(report.final_returns.len(), 200);
    }

    #[test]
    fn all_losing_trades_never_profit() {
        let trades = vec![trade_with_return(-0.02), trade_with_return(-0.05)];
        let report = seeded().monte_carlo_trade_resample(&trades, 500, 0.9).unwrap();
        assert_eq!(report.prob_profit, 0.0);
        assert!(report.worst_return < 0.0);
        assert!(report.worst_drawdown <= report.median_drawdown);
        assert!(report.worst_drawdown <= -(1.0 - 0.98_f64.powi(2)) + 1e-12);
    }

    #[test]
    fn interval_brackets_the_median() {
        let trades: Vec<TradeRecord> = [0.05, -0.03, 0.02, -0.01, 0.04, -0.06]
            .iter()
            .map(|&r| trade_with_return(r))
            .collect();
        let report = seeded().monte_carlo_trade_resample(&trades, 2_000, 0.95).unwrap();
        assert!(report.ci_lower <= report.median_return);
        assert!(report.median_return <= report.ci_upper);
        assert!(report.worst_return <= report.ci_lower);
        assert!(report.prob_profit > 0.0 && report.prob_profit < 1.0);
    }

    #[test]
    fn same_seed_same_distribution() {
        let trades: Vec<TradeRecord> = [0.05, -0.03, 0.02]
            .iter()
            .map(|&r| trade_with_return(r))
            .collect();
        let a = seeded().monte_carlo_trade_resample(&trades, 300, 0.95).unwrap();
        let b = seeded().monte_carlo_trade_resample(&trades, 300, 0.95).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn wipeout_trade_stops_at_zero() {
        let trades = vec![trade_with_return(-0.999_999)];
        let report = seeded().monte_carlo_trade_resample(&trades, 10, 0.95).unwrap();
        assert!(report.worst_return >= -1.0);
    }
}
