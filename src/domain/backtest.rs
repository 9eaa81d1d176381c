//! Bar-by-bar replay of a signal strategy.
//!
//! Each bar's signal is acted on at that bar's close. A non-flat signal with no
//! open position opens one sized at `position_fraction` of current equity; a
//! flat signal closes it. Non-flat signals while a position is open hold it,
//! including signals for the opposite side. Whatever is still open at the last
//! bar is closed at the last close, so results never carry unresolved positions.
//!
//! Walk-forward optimization, trade resampling and overfitting checks build on
//! [`Backtester::run`] in their own modules.

use chrono::NaiveDateTime;
use log::{debug, warn};

use super::error::QuantGuardError;
use super::metrics::Metrics;
use super::ohlcv::{simple_returns, OhlcvBar};
use super::risk_engine::{RiskEngineConfig, StatisticalRiskEngine, VarMethod, TRADING_DAYS_PER_YEAR};
use super::strategy::{ParameterSet, Signal, SignalStrategy};
use super::trade::{Side, TradeRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    /// Fraction of notional charged on entry and on exit.
    pub commission: f64,
    /// Fraction of notional lost to slippage on entry and on exit.
    pub slippage: f64,
    /// Share of current equity committed to a new position.
    pub position_fraction: f64,
    /// Annualized.
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    /// Seed for trade resampling; `None` draws a fresh seed per call.
    pub seed: Option<u64>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            initial_capital: 10_000.0,
            commission: 0.001,
            slippage: 0.0005,
            position_fraction: 0.95,
            risk_free_rate: 0.02,
            periods_per_year: TRADING_DAYS_PER_YEAR,
            seed: None,
        }
    }
}

impl BacktestConfig {
    /// Cost fraction applied to notional on each side of a trade.
    pub fn cost_rate(&self) -> f64 {
        self.commission + self.slippage
    }

    pub fn validate(&self) -> Result<(), QuantGuardError> {
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return Err(invalid("initial_capital", "initial_capital must be positive"));
        }
        if !(self.commission >= 0.0 && self.commission.is_finite()) {
            return Err(invalid("commission", "commission must be non-negative"));
        }
        if !(self.slippage >= 0.0 && self.slippage.is_finite()) {
            return Err(invalid("slippage", "slippage must be non-negative"));
        }
        if !(self.position_fraction > 0.0 && self.position_fraction <= 1.0) {
            return Err(invalid(
                "position_fraction",
                "position_fraction must be between 0 and 1",
            ));
        }
        if !(self.periods_per_year > 0.0 && self.periods_per_year.is_finite()) {
            return Err(invalid("periods_per_year", "periods_per_year must be positive"));
        }
        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> QuantGuardError {
    QuantGuardError::ConfigInvalid {
        section: "backtest".to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BacktestResult {
    pub parameters: ParameterSet,
    pub metrics: Metrics,
    /// Historical VaR of per-bar equity returns at 95%.
    pub var_95: f64,
    pub cvar_95: f64,
    pub trades: Vec<TradeRecord>,
    /// Initial capital followed by one mark-to-market point per bar.
    pub equity_curve: Vec<f64>,
}

impl BacktestResult {
    pub fn num_trades(&self) -> usize {
        self.trades.len()
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve.last().copied().unwrap_or(0.0)
    }
}

struct OpenPosition {
    side: Side,
    quantity: f64,
    entry_price: f64,
    entry_time: NaiveDateTime,
    entry_cost: f64,
}

impl OpenPosition {
    fn unrealized(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Result<Self, QuantGuardError> {
        config.validate()?;
        Ok(Backtester { config })
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Replays `strategy` over `bars` with `params`.
    ///
    /// Bars must have finite positive closes and non-decreasing timestamps.
    /// Missing trailing signals count as flat; extra signals are ignored.
    pub fn run(
        &self,
        bars: &[OhlcvBar],
        strategy: &dyn SignalStrategy,
        params: &ParameterSet,
    ) -> Result<BacktestResult, QuantGuardError> {
        validate_bars(bars)?;
        let signals = strategy.signals(bars, params);
        if signals.len() != bars.len() {
            debug!(
                "strategy produced {} signals for {} bars",
                signals.len(),
                bars.len()
            );
        }
        self.replay(bars, &signals, params)
    }

    /// Replay over already validated bars.
    pub(crate) fn replay(
        &self,
        bars: &[OhlcvBar],
        signals: &[Signal],
        params: &ParameterSet,
    ) -> Result<BacktestResult, QuantGuardError> {
        let cost_rate = self.config.cost_rate();
        let mut equity = self.config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len() + 1);
        equity_curve.push(equity);

        let last = bars.len().saturating_sub(1);
        for (i, bar) in bars.iter().enumerate() {
            let signal = signals.get(i).copied().unwrap_or(Signal::Flat);

            match (position.is_some(), signal.side()) {
                (false, Some(side)) => {
                    if equity > 0.0 {
                        let notional = equity * self.config.position_fraction;
                        let entry_cost = notional * cost_rate;
                        equity -= entry_cost;
                        position = Some(OpenPosition {
                            side,
                            quantity: notional / bar.close,
                            entry_price: bar.close,
                            entry_time: bar.timestamp,
                            entry_cost,
                        });
                    } else {
                        warn!("equity exhausted at {}, signal ignored", bar.timestamp);
                    }
                }
                (true, None) => {
                    if let Some(open) = position.take() {
                        equity += self.close_position(open, bar, &mut trades)?;
                    }
                }
                _ => {}
            }

            if i == last {
                if let Some(open) = position.take() {
                    debug!("closing open position at final bar {}", bar.timestamp);
                    equity += self.close_position(open, bar, &mut trades)?;
                }
            }

            let marked = equity + position.as_ref().map_or(0.0, |p| p.unrealized(bar.close));
            equity_curve.push(marked);
        }

        let metrics = Metrics::compute(
            &equity_curve,
            &trades,
            self.config.initial_capital,
            self.config.risk_free_rate,
            self.config.periods_per_year,
        );

        let engine = StatisticalRiskEngine::new(RiskEngineConfig {
            seed: Some(self.config.seed.unwrap_or(0)),
            risk_free_rate: self.config.risk_free_rate,
            periods_per_year: self.config.periods_per_year,
            ..RiskEngineConfig::default()
        });
        let returns = simple_returns(&equity_curve);
        let var_95 = engine.value_at_risk(&returns, 0.95, VarMethod::Historical);
        let cvar_95 = engine.conditional_var(&returns, 0.95, VarMethod::Historical);

        debug!(
            "backtest [{}]: {} trades, return {:.2}%, sharpe {:.2}",
            params,
            trades.len(),
            metrics.total_return * 100.0,
            metrics.sharpe_ratio
        );

        Ok(BacktestResult {
            parameters: params.clone(),
            metrics,
            var_95,
            cvar_95,
            trades,
            equity_curve,
        })
    }

    /// Closes `open` at `bar`'s close, records the trade and returns the
    /// change in realized equity (gross P&L minus exit cost). A trade that
    /// cannot be recorded fails the run, so trades and equity never diverge.
    fn close_position(
        &self,
        open: OpenPosition,
        bar: &OhlcvBar,
        trades: &mut Vec<TradeRecord>,
    ) -> Result<f64, QuantGuardError> {
        let gross = open.unrealized(bar.close);
        let exit_cost = open.quantity * bar.close * self.config.cost_rate();
        let trade = TradeRecord::close(
            open.side,
            open.quantity,
            open.entry_price,
            bar.close,
            open.entry_time,
            bar.timestamp,
            open.entry_cost + exit_cost,
        )?;
        trades.push(trade);
        Ok(gross - exit_cost)
    }
}

pub(crate) fn validate_bars(bars: &[OhlcvBar]) -> Result<(), QuantGuardError> {
    for (i, bar) in bars.iter().enumerate() {
        if !(bar.close > 0.0 && bar.close.is_finite()) {
            return Err(QuantGuardError::Data {
                reason: format!("bar {i} ({}) has invalid close {}", bar.timestamp, bar.close),
            });
        }
        if i > 0 && bar.timestamp < bars[i - 1].timestamp {
            return Err(QuantGuardError::Data {
                reason: format!("bar {i} ({}) is out of order", bar.timestamp),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    pub(crate) fn bars_from(closes: &[f64]) -> Vec<OhlcvBar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| OhlcvBar {
                symbol: "TEST".into(),
                timestamp: start + chrono::Duration::days(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    fn fixed(signals: Vec<i8>) -> impl Fn(&[OhlcvBar], &ParameterSet) -> Vec<Signal> + Sync {
        move |_: &[OhlcvBar], _: &ParameterSet| signals.iter().map(|&s| Signal::from(s)).collect()
    }

    fn frictionless() -> BacktestConfig {
        BacktestConfig {
            commission: 0.0,
            slippage: 0.0,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn config_defaults() {
        let c = BacktestConfig::default();
        assert!((c.initial_capital - 10_000.0).abs() < f64::EPSILON);
        assert!((c.commission - 0.001).abs() < f64::EPSILON);
        assert!((c.slippage - 0.0005).abs() < f64::EPSILON);
        assert!((c.position_fraction - 0.95).abs() < f64::EPSILON);
        assert!((c.cost_rate() - 0.0015).abs() < 1e-15);
        assert_eq!(c.seed, None);
    }

    #[test]
    fn no_signals_leaves_equity_flat() {
        let bars = bars_from(&[100.0, 101.0, 99.0, 102.0]);
        let result = Backtester::default()
            .run(&bars, &fixed(vec![0, 0, 0, 0]), &ParameterSet::new())
            .unwrap();
        assert_eq!(result.num_trades(), 0);
        assert_eq!(result.equity_curve, vec![10_000.0; 5]);
        assert_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert_eq!(result.var_95, 0.0);
    }

    #[test]
    fn empty_bars_give_neutral_result() {
        let result = Backtester::default()
            .run(&[], &fixed(vec![]), &ParameterSet::new())
            .unwrap();
        assert_eq!(result.equity_curve, vec![10_000.0]);
        assert_eq!(result.num_trades(), 0);
    }

    #[test]
    fn long_round_trip_without_costs() {
        let bars = bars_from(&[100.0, 110.0, 120.0, 120.0]);
        let result = Backtester::new(frictionless())
            .unwrap()
            .run(&bars, &fixed(vec![1, 1, 0, 0]), &ParameterSet::new())
            .unwrap();

        assert_eq!(result.num_trades(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.side, Side::Long);
        // 9_500 notional at 100 → 95 units, +20 each
        assert!((trade.quantity - 95.0).abs() < 1e-9);
        assert!((trade.realized_pnl - 1_900.0).abs() < 1e-9);
        assert_eq!(result.equity_curve.len(), bars.len() + 1);
        assert!((result.equity_curve[2] - 10_950.0).abs() < 1e-9);
        assert!((result.final_equity() - 11_900.0).abs() < 1e-9);
        assert!((result.metrics.total_return - 0.19).abs() < 1e-12);
        assert!((result.metrics.win_rate - 1.0).abs() < f64::EPSILON);
        assert!(result.metrics.profit_factor.is_infinite());
    }

    #[test]
    fn short_profits_from_decline() {
        let bars = bars_from(&[100.0, 90.0, 80.0]);
        let result = Backtester::new(frictionless())
            .unwrap()
            .run(&bars, &fixed(vec![-1, -1, 0]), &ParameterSet::new())
            .unwrap();
        assert_eq!(result.trades[0].side, Side::Short);
        assert!((result.trades[0].realized_pnl - 1_900.0).abs() < 1e-9);
    }

    #[test]
    fn costs_are_charged_on_entry_and_exit() {
        let bars = bars_from(&[100.0, 100.0]);
        let config = BacktestConfig::default();
        let result = Backtester::new(config.clone())
            .unwrap()
            .run(&bars, &fixed(vec![1, 0]), &ParameterSet::new())
            .unwrap();
        let notional = 10_000.0 * 0.95;
        let expected_costs = 2.0 * notional * config.cost_rate();
        let trade = &result.trades[0];
        assert!((trade.costs - expected_costs).abs() < 1e-9);
        assert!((trade.realized_pnl + expected_costs).abs() < 1e-9);
        assert!((result.final_equity() - (10_000.0 - expected_costs)).abs() < 1e-9);
        assert_eq!(result.metrics.trades_lost, 1);
    }

    #[test]
    fn open_position_is_closed_at_last_bar() {
        let bars = bars_from(&[100.0, 105.0, 110.0]);
        let result = Backtester::new(frictionless())
            .unwrap()
            .run(&bars, &fixed(vec![1, 1, 1]), &ParameterSet::new())
            .unwrap();
        assert_eq!(result.num_trades(), 1);
        let trade = &result.trades[0];
        assert_eq!(trade.exit_time, bars[2].timestamp);
        assert!((trade.exit_price - 110.0).abs() < f64::EPSILON);
        assert!((result.final_equity() - (10_000.0 + 950.0)).abs() < 1e-9);
    }

    #[test]
    fn opposite_signal_holds_open_position() {
        let bars = bars_from(&[100.0, 110.0, 120.0, 130.0]);
        let result = Backtester::new(frictionless())
            .unwrap()
            .run(&bars, &fixed(vec![1, -1, -1, 0]), &ParameterSet::new())
            .unwrap();
        assert_eq!(result.num_trades(), 1);
        assert_eq!(result.trades[0].side, Side::Long);
        assert!((result.trades[0].exit_price - 130.0).abs() < f64::EPSILON);
    }

    #[test]
    fn drawdown_reflects_mark_to_market() {
        let bars = bars_from(&[100.0, 50.0, 100.0]);
        let result = Backtester::new(frictionless())
            .unwrap()
            .run(&bars, &fixed(vec![1, 1, 0]), &ParameterSet::new())
            .unwrap();
        // 95 units lose 4_750 at the trough
        assert!((result.metrics.max_drawdown - (-0.475)).abs() < 1e-12);
        assert!(result.var_95 < 0.0);
        assert!(result.cvar_95 <= result.var_95);
    }

    #[test]
    fn identical_inputs_give_identical_results() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let bars = bars_from(&closes);
        let strategy = crate::domain::strategy::SmaCrossover { allow_short: true };
        let params = ParameterSet::new().with("fast", 3.0).with("slow", 8.0);
        let backtester = Backtester::default();
        let a = backtester.run(&bars, &strategy, &params).unwrap();
        let b = backtester.run(&bars, &strategy, &params).unwrap();
        assert_eq!(a, b);
        assert!(a.num_trades() > 0);
    }

    #[test]
    fn rejects_non_positive_close() {
        let bars = bars_from(&[100.0, 0.0, 100.0]);
        let err = Backtester::default()
            .run(&bars, &fixed(vec![0, 0, 0]), &ParameterSet::new())
            .unwrap_err();
        assert!(matches!(err, QuantGuardError::Data { .. }));
    }

    #[test]
    fn rejects_unordered_bars() {
        let mut bars = bars_from(&[100.0, 101.0, 102.0]);
        bars.swap(0, 2);
        let err = Backtester::default()
            .run(&bars, &fixed(vec![0, 0, 0]), &ParameterSet::new())
            .unwrap_err();
        assert!(matches!(err, QuantGuardError::Data { .. }));
    }

    #[test]
    fn parameters_are_recorded() {
        let bars = bars_from(&[100.0, 101.0]);
        let params = ParameterSet::new().with("fast", 5.0);
        let result = Backtester::default()
            .run(&bars, &fixed(vec![0, 0]), &params)
            .unwrap();
        assert_eq!(result.parameters, params);
    }

    #[test]
    fn unrecordable_trade_fails_the_run() {
        let mut bars = bars_from(&[100.0, 110.0]);
        bars.swap(0, 1);
        let err = Backtester::default()
            .replay(&bars, &[Signal::Long, Signal::Flat], &ParameterSet::new())
            .unwrap_err();
        assert!(matches!(
            err,
            QuantGuardError::Trade(crate::domain::error::TradeRecordError::ExitBeforeEntry)
        ));
    }

    #[test]
    fn invalid_configs_rejected() {
        let cases = [
            ("initial_capital", BacktestConfig { initial_capital: 0.0, ..BacktestConfig::default() }),
            ("commission", BacktestConfig { commission: -0.001, ..BacktestConfig::default() }),
            ("slippage", BacktestConfig { slippage: -0.5, ..BacktestConfig::default() }),
            ("position_fraction", BacktestConfig { position_fraction: 0.0, ..BacktestConfig::default() }),
            ("position_fraction", BacktestConfig { position_fraction: 1.5, ..BacktestConfig::default() }),
            ("periods_per_year", BacktestConfig { periods_per_year: 0.0, ..BacktestConfig::default() }),
        ];
        for (expected, config) in cases {
            match Backtester::new(config) {
                Err(QuantGuardError::ConfigInvalid { section, key, .. }) => {
                    assert_eq!(section, "backtest");
                    assert_eq!(key, expected);
                }
                other => panic!("expected {expected} to be rejected, got {other:?}"),
            }
        }
        assert!(Backtester::new(BacktestConfig::default()).is_ok());
    }
}
