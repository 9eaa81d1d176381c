//! Stateful risk governor: trade gating, circuit breaker and stop/target pricing.
//!
//! The governor moves between three modes:
//!
//! - `Active` → `RiskReduced` once consecutive losses reach the limit.
//! - `RiskReduced` → `Active` on the next winning trade.
//! - `Active | RiskReduced` → `Paused` when drawdown or daily loss breach their
//!   limits during [`RiskGovernor::update_state`], or on [`RiskGovernor::pause`].
//! - `Paused` → `Active` only through [`RiskGovernor::resume`].

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use log::{debug, error, info, warn};

use super::error::QuantGuardError;
use super::position_sizing::{fixed_risk_size, kelly_fraction, DEFAULT_MAX_KELLY};
use super::risk_limits::RiskLimits;
use super::trade::Side;

/// Position-size multiplier while in [`GovernorMode::RiskReduced`].
pub const RISK_REDUCTION_FACTOR: f64 = 0.5;

/// Largest position value as a fraction of balance.
pub const MAX_POSITION_VALUE_FRACTION: f64 = 0.30;

/// Drawdown above which a warning is logged before the hard limit.
pub const DRAWDOWN_WARNING_LEVEL: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GovernorMode {
    Active,
    RiskReduced,
    Paused,
}

impl fmt::Display for GovernorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernorMode::Active => f.write_str("active"),
            GovernorMode::RiskReduced => f.write_str("risk-reduced"),
            GovernorMode::Paused => f.write_str("paused"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopMethod {
    /// Stop placed `atr × multiplier` away from entry.
    Atr { atr: f64, multiplier: f64 },
    /// Stop placed a fixed fraction of entry away (0.02 = 2%).
    Percent(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizingMethod {
    /// Risk `max_risk_per_trade × confidence` of balance between entry and stop.
    Fixed,
    /// Kelly with win rate = confidence and payoff = the minimum risk/reward.
    Kelly,
    HalfKelly,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskGovernorState {
    pub current_drawdown: f64,
    pub peak_equity: f64,
    pub consecutive_losses: u32,
    /// Day's P&L as a fraction of equity.
    pub daily_pnl: f64,
    pub open_positions_count: usize,
    pub mode: GovernorMode,
    pub pause_reason: Option<String>,
    pub risk_reduction_factor: f64,
    pub trading_day: Option<NaiveDate>,
}

impl Default for RiskGovernorState {
    fn default() -> Self {
        RiskGovernorState {
            current_drawdown: 0.0,
            peak_equity: 0.0,
            consecutive_losses: 0,
            daily_pnl: 0.0,
            open_positions_count: 0,
            mode: GovernorMode::Active,
            pause_reason: None,
            risk_reduction_factor: 1.0,
            trading_day: None,
        }
    }
}

/// Outcome of [`RiskGovernor::can_trade`].
#[derive(Debug, Clone, PartialEq)]
pub struct TradeGate {
    pub allowed: bool,
    pub reason: String,
}

impl TradeGate {
    fn allow() -> Self {
        TradeGate {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    fn deny(reason: String) -> Self {
        TradeGate {
            allowed: false,
            reason,
        }
    }
}

/// Outcome of [`RiskGovernor::validate_trade_parameters`].
#[derive(Debug, Clone, PartialEq)]
pub struct TradeValidation {
    pub valid: bool,
    pub reason: String,
}

impl TradeValidation {
    fn ok() -> Self {
        TradeValidation {
            valid: true,
            reason: "OK".to_string(),
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        TradeValidation {
            valid: false,
            reason: reason.into(),
        }
    }
}

/// Point-in-time snapshot of a governor.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GovernorStatus {
    pub can_trade: bool,
    pub reason: String,
    pub state: RiskGovernorState,
    pub limits: RiskLimits,
}

#[derive(Debug, Clone)]
pub struct RiskGovernor {
    limits: RiskLimits,
    state: RiskGovernorState,
}

impl RiskGovernor {
    pub fn new(limits: RiskLimits) -> Result<Self, QuantGuardError> {
        limits.validate()?;
        info!(
            "risk governor: max risk/trade {:.1}%, max drawdown {:.1}%, max positions {}",
            limits.max_risk_per_trade * 100.0,
            limits.max_drawdown * 100.0,
            limits.max_positions
        );
        Ok(RiskGovernor {
            limits,
            state: RiskGovernorState::default(),
        })
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &RiskGovernorState {
        &self.state
    }

    pub fn mode(&self) -> GovernorMode {
        self.state.mode
    }

    /// Records the latest account figures and trips the circuit breaker if a
    /// hard limit is breached.
    pub fn update_state(
        &mut self,
        current_equity: f64,
        peak_equity: f64,
        open_positions: usize,
        daily_pnl: f64,
    ) {
        self.state.peak_equity = peak_equity;
        self.state.open_positions_count = open_positions;
        self.state.daily_pnl = daily_pnl;
        if peak_equity > 0.0 {
            self.state.current_drawdown = ((peak_equity - current_equity) / peak_equity).max(0.0);
        } else {
            self.state.current_drawdown = 0.0;
        }
        self.check_critical_limits();
    }

    fn check_critical_limits(&mut self) {
        let drawdown = self.state.current_drawdown;
        if drawdown >= self.limits.max_drawdown {
            self.trip(format!(
                "drawdown limit reached: {:.1}%",
                drawdown * 100.0
            ));
        } else if self.state.daily_pnl <= -self.limits.max_daily_loss {
            self.trip(format!(
                "daily loss limit reached: {:.1}%",
                self.state.daily_pnl * 100.0
            ));
        } else if drawdown >= DRAWDOWN_WARNING_LEVEL {
            warn!("current drawdown {:.1}%", drawdown * 100.0);
        }
    }

    fn trip(&mut self, reason: String) {
        if self.state.mode != GovernorMode::Paused {
            self.pause(&reason);
        }
    }

    /// Pure read of whether a new position may be opened.
    pub fn can_trade(&self) -> TradeGate {
        if self.state.mode == GovernorMode::Paused {
            let reason = self
                .state
                .pause_reason
                .clone()
                .unwrap_or_else(|| "trading paused".to_string());
            return TradeGate::deny(reason);
        }
        if self.state.current_drawdown >= self.limits.max_drawdown {
            return TradeGate::deny(format!(
                "maximum drawdown reached ({:.1}%)",
                self.state.current_drawdown * 100.0
            ));
        }
        if self.state.daily_pnl <= -self.limits.max_daily_loss {
            return TradeGate::deny(format!(
                "maximum daily loss reached ({:.1}%)",
                self.state.daily_pnl * 100.0
            ));
        }
        if self.state.open_positions_count >= self.limits.max_positions {
            return TradeGate::deny(format!(
                "maximum open positions ({})",
                self.state.open_positions_count
            ));
        }
        TradeGate::allow()
    }

    /// Books a closed trade. `pnl` is a fraction of equity.
    pub fn update_after_trade(&mut self, pnl: f64, was_win: bool) {
        self.state.daily_pnl += pnl;

        if was_win {
            self.state.consecutive_losses = 0;
            if self.state.mode == GovernorMode::RiskReduced {
                self.state.mode = GovernorMode::Active;
                self.state.risk_reduction_factor = 1.0;
                info!("risk reduction lifted after a winning trade");
            }
        } else {
            self.state.consecutive_losses += 1;
            if self.state.mode == GovernorMode::Active
                && self.state.consecutive_losses >= self.limits.max_consecutive_losses
            {
                self.state.mode = GovernorMode::RiskReduced;
                self.state.risk_reduction_factor = RISK_REDUCTION_FACTOR;
                warn!(
                    "{} consecutive losses, position size reduced to {:.0}%",
                    self.state.consecutive_losses,
                    RISK_REDUCTION_FACTOR * 100.0
                );
            }
        }
    }

    pub fn pause(&mut self, reason: &str) {
        self.state.mode = GovernorMode::Paused;
        self.state.pause_reason = Some(reason.to_string());
        error!("trading paused: {reason}");
    }

    /// Back to `Active` with risk reduction cleared. The consecutive-loss
    /// counter is kept.
    pub fn resume(&mut self) {
        self.state.mode = GovernorMode::Active;
        self.state.pause_reason = None;
        self.state.risk_reduction_factor = 1.0;
        info!("trading resumed");
    }

    /// Zeroes the daily P&L when `date` differs from the current trading day.
    /// Returns true when a new day started.
    pub fn begin_day(&mut self, date: NaiveDate) -> bool {
        if self.state.trading_day == Some(date) {
            return false;
        }
        self.state.trading_day = Some(date);
        self.reset_daily_stats();
        true
    }

    pub fn reset_daily_stats(&mut self) {
        self.state.daily_pnl = 0.0;
        debug!("daily stats reset");
    }

    /// Units to buy or sell, after the reduction factor and the
    /// [`MAX_POSITION_VALUE_FRACTION`] cap.
    pub fn position_size(
        &self,
        balance: f64,
        entry_price: f64,
        stop_loss_price: f64,
        confidence: f64,
        method: SizingMethod,
    ) -> f64 {
        if !(balance > 0.0) || !(entry_price > 0.0) {
            return 0.0;
        }
        if entry_price == stop_loss_price {
            warn!("stop loss distance is zero");
            return 0.0;
        }

        let factor = self.state.risk_reduction_factor;
        let size = match method {
            SizingMethod::Fixed => fixed_risk_size(
                balance,
                entry_price,
                stop_loss_price,
                self.limits.max_risk_per_trade * factor,
                confidence,
            ),
            SizingMethod::Kelly | SizingMethod::HalfKelly => {
                let kelly = kelly_fraction(
                    confidence,
                    self.limits.min_risk_reward_ratio,
                    1.0,
                    DEFAULT_MAX_KELLY,
                );
                let kelly = if method == SizingMethod::HalfKelly {
                    kelly * 0.5
                } else {
                    kelly
                };
                balance * kelly * factor / entry_price
            }
        };

        let cap = balance * MAX_POSITION_VALUE_FRACTION / entry_price;
        let size = size.min(cap);
        debug!("position size {size:.4} units ({method:?}, confidence {confidence:.2})");
        size
    }

    pub fn stop_loss(&self, entry_price: f64, side: Side, method: StopMethod) -> f64 {
        let distance = match method {
            StopMethod::Atr { atr, multiplier } => atr * multiplier,
            StopMethod::Percent(p) => entry_price * p,
        };
        let stop = entry_price - side.sign() * distance;
        debug!("stop loss {stop:.5} (distance {distance:.5})");
        stop
    }

    /// Target `rr` times the stop distance away from entry; `rr` defaults to
    /// the minimum risk/reward ratio.
    pub fn take_profit(
        &self,
        entry_price: f64,
        stop_loss_price: f64,
        side: Side,
        risk_reward_ratio: Option<f64>,
    ) -> f64 {
        let rr = risk_reward_ratio.unwrap_or(self.limits.min_risk_reward_ratio);
        let distance = (entry_price - stop_loss_price).abs() * rr;
        entry_price + side.sign() * distance
    }

    /// Trailing stop for the latest price. Only ever moves in the position's
    /// favour: a long stop never falls, a short stop never rises.
    pub fn trailing_stop(
        &self,
        current_stop: f64,
        current_price: f64,
        side: Side,
        atr: f64,
        multiplier: f64,
    ) -> f64 {
        let candidate = current_price - side.sign() * atr * multiplier;
        match side {
            Side::Long => current_stop.max(candidate),
            Side::Short => current_stop.min(candidate),
        }
    }

    pub fn validate_trade_parameters(
        &self,
        entry_price: f64,
        stop_loss_price: f64,
        take_profit_price: f64,
        side: Side,
    ) -> TradeValidation {
        if !(entry_price > 0.0) || !(stop_loss_price > 0.0) || !(take_profit_price > 0.0) {
            return TradeValidation::reject("prices must be positive");
        }

        match side {
            Side::Long => {
                if stop_loss_price >= entry_price {
                    return TradeValidation::reject("stop loss must be below entry for a long");
                }
                if take_profit_price <= entry_price {
                    return TradeValidation::reject("take profit must be above entry for a long");
                }
            }
            Side::Short => {
                if stop_loss_price <= entry_price {
                    return TradeValidation::reject("stop loss must be above entry for a short");
                }
                if take_profit_price >= entry_price {
                    return TradeValidation::reject("take profit must be below entry for a short");
                }
            }
        }

        let risk = (entry_price - stop_loss_price).abs();
        let reward = (take_profit_price - entry_price).abs();
        let ratio = reward / risk;
        if ratio < self.limits.min_risk_reward_ratio {
            return TradeValidation::reject(format!(
                "risk/reward too low ({ratio:.2} < {:.2})",
                self.limits.min_risk_reward_ratio
            ));
        }
        TradeValidation::ok()
    }

    pub fn status(&self) -> GovernorStatus {
        let gate = self.can_trade();
        GovernorStatus {
            can_trade: gate.allowed,
            reason: gate.reason,
            state: self.state.clone(),
            limits: self.limits.clone(),
        }
    }
}

/// A [`RiskGovernor`] shared between decision paths. Every call holds the
/// lock for its whole duration.
#[derive(Debug, Clone)]
pub struct SharedRiskGovernor {
    inner: Arc<Mutex<RiskGovernor>>,
}

impl SharedRiskGovernor {
    pub fn new(governor: RiskGovernor) -> Self {
        SharedRiskGovernor {
            inner: Arc::new(Mutex::new(governor)),
        }
    }

    /// Runs `f` with exclusive access to the governor.
    pub fn with<T>(&self, f: impl FnOnce(&mut RiskGovernor) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn can_trade(&self) -> TradeGate {
        self.with(|g| g.can_trade())
    }

    pub fn update_after_trade(&self, pnl: f64, was_win: bool) {
        self.with(|g| g.update_after_trade(pnl, was_win));
    }

    pub fn status(&self) -> GovernorStatus {
        self.with(|g| g.status())
    }
}
