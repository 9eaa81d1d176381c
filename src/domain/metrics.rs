//! Backtest performance metrics: risk-adjusted return, drawdown and trade
//! statistics.

use super::ohlcv::simple_returns;
use super::stats;
use super::trade::TradeRecord;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Metrics {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Deepest decline of the equity curve, ≤ 0.
    pub max_drawdown: f64,
    /// Longest run of consecutive points below the running peak.
    pub max_drawdown_duration: usize,
    pub trades_won: usize,
    pub trades_lost: usize,
    pub trades_breakeven: usize,
    pub win_rate: f64,
    /// Σ wins / Σ |losses|; +∞ with wins and no losses, 0 with no wins.
    pub profit_factor: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    /// Hours.
    pub avg_trade_duration: f64,
}

impl Metrics {
    pub fn compute(
        equity_curve: &[f64],
        trades: &[TradeRecord],
        initial_capital: f64,
        risk_free_rate: f64,
        periods_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
        let total_return = if initial_capital > 0.0 {
            (final_equity - initial_capital) / initial_capital
        } else {
            0.0
        };

        let returns = simple_returns(equity_curve);
        let period_rf = risk_free_rate / periods_per_year;
        let (sharpe_ratio, sortino_ratio) =
            compute_risk_adjusted(&returns, period_rf, periods_per_year);

        let mut trades_won = 0usize;
        let mut trades_lost = 0usize;
        let mut trades_breakeven = 0usize;
        let mut total_wins = 0.0_f64;
        let mut total_losses = 0.0_f64;
        let mut largest_win = 0.0_f64;
        let mut largest_loss = 0.0_f64;
        let mut total_duration_hours = 0.0_f64;

        for trade in trades {
            let pnl = trade.realized_pnl;
            if pnl > 0.0 {
                trades_won += 1;
                total_wins += pnl;
                if pnl > largest_win {
                    largest_win = pnl;
                }
            } else if pnl < 0.0 {
                trades_lost += 1;
                total_losses += pnl.abs();
                if pnl.abs() > largest_loss {
                    largest_loss = pnl.abs();
                }
            } else {
                trades_breakeven += 1;
            }
            total_duration_hours += trade.duration_hours();
        }

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            trades_won as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if total_losses > 0.0 {
            total_wins / total_losses
        } else if total_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_win = if trades_won > 0 {
            total_wins / trades_won as f64
        } else {
            0.0
        };

        let avg_loss = if trades_lost > 0 {
            total_losses / trades_lost as f64
        } else {
            0.0
        };

        let avg_trade_duration = if total_trades > 0 {
            total_duration_hours / total_trades as f64
        } else {
            0.0
        };

        Metrics {
            total_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: stats::max_drawdown(equity_curve),
            max_drawdown_duration: drawdown_duration(equity_curve),
            trades_won,
            trades_lost,
            trades_breakeven,
            win_rate,
            profit_factor,
            avg_win,
            avg_loss,
            largest_win,
            largest_loss,
            avg_trade_duration,
        }
    }
}

fn drawdown_duration(equity_curve: &[f64]) -> usize {
    let mut peak = f64::NEG_INFINITY;
    let mut current = 0usize;
    let mut longest = 0usize;
    for &equity in equity_curve {
        if equity >= peak {
            peak = equity;
            current = 0;
        } else {
            current += 1;
            longest = longest.max(current);
        }
    }
    longest
}

/// (Sharpe, Sortino), annualized with `√periods_per_year`.
///
/// Sharpe divides the mean excess return by the population standard deviation
/// of returns. Sortino divides it by the standard deviation of the negative
/// returns alone, or of all returns when none are negative.
pub fn compute_risk_adjusted(returns: &[f64], period_rf: f64, periods_per_year: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }

    let excess_return = stats::mean(returns) - period_rf;
    let annualizer = periods_per_year.sqrt();

    let stddev = stats::population_std(returns);
    let sharpe = if stddev > 0.0 {
        excess_return / stddev * annualizer
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
    let downside_stddev = if downside.is_empty() {
        stddev
    } else {
        stats::population_std(&downside)
    };
    let sortino = if downside_stddev > 0.0 {
        excess_return / downside_stddev * annualizer
    } else {
        0.0
    };

    (sharpe, sortino)
}
