//! Builds validated component configs from a [`ConfigPort`].
//!
//! Missing keys fall back to each component's defaults. Present keys must
//! parse and lie in range; anything else fails fast with a `Config*` error.

use crate::domain::backtest::BacktestConfig;
use crate::domain::error::QuantGuardError;
use crate::domain::optimizer::OptimizerConfig;
use crate::domain::risk_engine::RiskEngineConfig;
use crate::domain::risk_limits::RiskLimits;
use crate::domain::stress::StressScenario;
use crate::ports::config_port::ConfigPort;

const SCENARIO_PREFIX: &str = "scenario.";

/// Every section validated together, as the `validate` command reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantGuardConfig {
    pub limits: RiskLimits,
    pub engine: RiskEngineConfig,
    pub backtest: BacktestConfig,
    pub optimizer: OptimizerConfig,
    pub scenarios: Vec<StressScenario>,
}

impl Default for QuantGuardConfig {
    fn default() -> Self {
        QuantGuardConfig {
            limits: RiskLimits::default(),
            engine: RiskEngineConfig::default(),
            backtest: BacktestConfig::default(),
            optimizer: OptimizerConfig::default(),
            scenarios: StressScenario::historical(),
        }
    }
}

pub fn load_all(config: &dyn ConfigPort) -> Result<QuantGuardConfig, QuantGuardError> {
    Ok(QuantGuardConfig {
        limits: build_risk_limits(config)?,
        engine: build_engine_config(config)?,
        backtest: build_backtest_config(config)?,
        optimizer: build_optimizer_config(config)?,
        scenarios: build_scenarios(config)?,
    })
}

pub fn build_risk_limits(config: &dyn ConfigPort) -> Result<RiskLimits, QuantGuardError> {
    let d = RiskLimits::default();
    let limits = RiskLimits {
        max_risk_per_trade: read_f64(config, "risk", "max_risk_per_trade", d.max_risk_per_trade)?,
        max_drawdown: read_f64(config, "risk", "max_drawdown", d.max_drawdown)?,
        max_positions: read_count(config, "risk", "max_positions", d.max_positions as u64)? as usize,
        max_daily_loss: read_f64(config, "risk", "max_daily_loss", d.max_daily_loss)?,
        max_consecutive_losses: u32::try_from(read_count(
            config,
            "risk",
            "max_consecutive_losses",
            u64::from(d.max_consecutive_losses),
        )?)
        .map_err(|_| invalid("risk", "max_consecutive_losses", "value too large"))?,
        min_risk_reward_ratio: read_f64(
            config,
            "risk",
            "min_risk_reward_ratio",
            d.min_risk_reward_ratio,
        )?,
    };
    limits.validate()?;
    Ok(limits)
}

pub fn build_engine_config(config: &dyn ConfigPort) -> Result<RiskEngineConfig, QuantGuardError> {
    let d = RiskEngineConfig::default();
    let confidence_levels = match config.get_string("engine", "confidence_levels") {
        None => d.confidence_levels,
        Some(raw) => parse_confidence_levels(&raw)?,
    };
    let risk_free_rate = read_f64(config, "engine", "risk_free_rate", d.risk_free_rate)?;
    validate_rate("engine", risk_free_rate)?;
    let monte_carlo_samples =
        read_count(config, "engine", "monte_carlo_samples", d.monte_carlo_samples as u64)?;
    if monte_carlo_samples == 0 {
        return Err(invalid("engine", "monte_carlo_samples", "must be at least 1"));
    }

    Ok(RiskEngineConfig {
        confidence_levels,
        monte_carlo_samples: monte_carlo_samples as usize,
        seed: read_seed(config, "engine")?,
        risk_free_rate,
        ..d
    })
}

pub fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, QuantGuardError> {
    let d = BacktestConfig::default();

    let risk_free_rate = read_f64(config, "backtest", "risk_free_rate", d.risk_free_rate)?;
    validate_rate("backtest", risk_free_rate)?;

    let backtest = BacktestConfig {
        initial_capital: read_f64(config, "backtest", "initial_capital", d.initial_capital)?,
        commission: read_f64(config, "backtest", "commission", d.commission)?,
        slippage: read_f64(config, "backtest", "slippage", d.slippage)?,
        position_fraction: read_f64(config, "backtest", "position_fraction", d.position_fraction)?,
        risk_free_rate,
        seed: read_seed(config, "backtest")?,
        ..d
    };
    backtest.validate()?;
    Ok(backtest)
}

pub fn build_optimizer_config(config: &dyn ConfigPort) -> Result<OptimizerConfig, QuantGuardError> {
    let d = OptimizerConfig::default();

    let risk_free_rate = read_f64(config, "optimizer", "risk_free_rate", d.risk_free_rate)?;
    validate_rate("optimizer", risk_free_rate)?;
    let risk_aversion = read_f64(config, "optimizer", "risk_aversion", d.risk_aversion)?;
    if risk_aversion <= 0.0 {
        return Err(invalid("optimizer", "risk_aversion", "risk_aversion must be positive"));
    }
    let tau = read_f64(config, "optimizer", "tau", d.tau)?;
    if tau <= 0.0 {
        return Err(invalid("optimizer", "tau", "tau must be positive"));
    }
    let max_iterations = read_count(config, "optimizer", "max_iterations", d.max_iterations as u64)?;
    if max_iterations == 0 {
        return Err(invalid("optimizer", "max_iterations", "must be at least 1"));
    }

    Ok(OptimizerConfig {
        risk_free_rate,
        risk_aversion,
        tau,
        max_iterations: max_iterations as usize,
        ..d
    })
}

/// `[scenario.<name>]` sections sorted by name, or the historical table when
/// none are configured.
pub fn build_scenarios(config: &dyn ConfigPort) -> Result<Vec<StressScenario>, QuantGuardError> {
    let mut names: Vec<String> = config
        .sections()
        .into_iter()
        .filter(|s| s.starts_with(SCENARIO_PREFIX))
        .collect();
    if names.is_empty() {
        return Ok(StressScenario::historical());
    }
    names.sort();

    names
        .iter()
        .map(|section| {
            let name = &section[SCENARIO_PREFIX.len()..];
            if name.trim().is_empty() {
                return Err(invalid(section, "name", "scenario name must not be empty"));
            }
            let market_drop = read_f64(config, section, "market_drop", 0.0)?;
            if !(-1.0..=1.0).contains(&market_drop) {
                return Err(invalid(section, "market_drop", "market_drop must be between -1 and 1"));
            }
            let volatility_spike = read_f64(config, section, "volatility_spike", 1.0)?;
            if volatility_spike <= 0.0 {
                return Err(invalid(
                    section,
                    "volatility_spike",
                    "volatility_spike must be positive",
                ));
            }
            let duration_days = u32::try_from(read_count(config, section, "duration_days", 1)?)
                .map_err(|_| invalid(section, "duration_days", "value too large"))?;
            let description = config
                .get_string(section, "description")
                .unwrap_or_else(|| name.to_string());
            Ok(StressScenario::new(
                name,
                &description,
                market_drop,
                volatility_spike,
                duration_days,
            ))
        })
        .collect()
}

fn parse_confidence_levels(raw: &str) -> Result<Vec<f64>, QuantGuardError> {
    let mut levels = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let level: f64 = part.parse().map_err(|_| {
            invalid(
                "engine",
                "confidence_levels",
                &format!("{part:?} is not a number"),
            )
        })?;
        if !(level > 0.0 && level < 1.0) {
            return Err(invalid(
                "engine",
                "confidence_levels",
                &format!("{level} is outside (0, 1)"),
            ));
        }
        levels.push(level);
    }
    if levels.is_empty() {
        return Err(invalid("engine", "confidence_levels", "at least one level is required"));
    }
    Ok(levels)
}

fn validate_rate(section: &str, value: f64) -> Result<(), QuantGuardError> {
    if !(0.0..1.0).contains(&value) {
        return Err(invalid(section, "risk_free_rate", "risk_free_rate must be between 0 and 1"));
    }
    Ok(())
}

fn read_f64(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: f64,
) -> Result<f64, QuantGuardError> {
    Ok(config.get_f64(section, key)?.unwrap_or(default))
}

fn read_count(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: u64,
) -> Result<u64, QuantGuardError> {
    Ok(config.get_u64(section, key)?.unwrap_or(default))
}

fn read_seed(config: &dyn ConfigPort, section: &str) -> Result<Option<u64>, QuantGuardError> {
    match config.get_string(section, "seed") {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| invalid(section, "seed", &format!("{raw:?} is not a valid seed"))),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> QuantGuardError {
    QuantGuardError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
