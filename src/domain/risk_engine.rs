//! Statistical tail-risk engine: VaR, CVaR, Monte Carlo price projection and
//! stress testing over a return series.
//!
//! Every entry point is safe to call from a live trading loop: empty or
//! degenerate input is logged and answered with a neutral value (0.0 or `None`)
//! instead of an error.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal as NormalSampler};
use rayon::prelude::*;
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use super::stats;
use super::stress::{StressScenario, StressTestOutcome};

pub const MIN_MONTE_CARLO_SAMPLES: usize = 10_000;
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VarMethod {
    Historical,
    Parametric,
    MonteCarlo,
}

impl VarMethod {
    pub const ALL: [VarMethod; 3] = [
        VarMethod::Historical,
        VarMethod::Parametric,
        VarMethod::MonteCarlo,
    ];
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VarMethod::Historical => "historical",
            VarMethod::Parametric => "parametric",
            VarMethod::MonteCarlo => "monte_carlo",
        };
        f.write_str(name)
    }
}

impl FromStr for VarMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "historical" => Ok(VarMethod::Historical),
            "parametric" => Ok(VarMethod::Parametric),
            "monte_carlo" | "montecarlo" | "monte-carlo" => Ok(VarMethod::MonteCarlo),
            other => Err(format!("unknown VaR method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskEngineConfig {
    pub confidence_levels: Vec<f64>,
    /// Draws used by Monte Carlo VaR; raised to [`MIN_MONTE_CARLO_SAMPLES`].
    pub monte_carlo_samples: usize,
    /// Fixed seed for reproducible simulations; `None` draws a fresh seed per call.
    pub seed: Option<u64>,
    /// Annualized.
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for RiskEngineConfig {
    fn default() -> Self {
        RiskEngineConfig {
            confidence_levels: vec![0.95, 0.99, 0.999],
            monte_carlo_samples: MIN_MONTE_CARLO_SAMPLES,
            seed: None,
            risk_free_rate: 0.02,
            periods_per_year: TRADING_DAYS_PER_YEAR,
        }
    }
}

/// One row of a VaR report.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VarEstimate {
    pub confidence_level: f64,
    pub method: VarMethod,
    pub var: f64,
    pub cvar: f64,
}

/// Distribution summary of simulated terminal prices.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PriceProjection {
    pub current_price: f64,
    pub n_simulations: usize,
    pub n_days: usize,
    pub mean_price: f64,
    pub median_price: f64,
    pub std_price: f64,
    pub percentile_5: f64,
    pub percentile_25: f64,
    pub percentile_75: f64,
    pub percentile_95: f64,
    /// VaR of the terminal return at the requested confidence.
    pub var: f64,
    pub cvar: f64,
    /// Share of paths ending above the start; paths ending exactly at it count half.
    pub prob_profit: f64,
    pub final_prices: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RiskMetrics {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub calmar_ratio: f64,
    pub var_95: f64,
    pub cvar_95: f64,
    pub var_99: f64,
    pub cvar_99: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitBreakerDecision {
    pub should_stop: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StatisticalRiskEngine {
    config: RiskEngineConfig,
}

impl StatisticalRiskEngine {
    pub fn new(config: RiskEngineConfig) -> Self {
        StatisticalRiskEngine { config }
    }

    pub fn config(&self) -> &RiskEngineConfig {
        &self.config
    }

    fn base_seed(&self) -> u64 {
        self.config
            .seed
            .unwrap_or_else(|| rand::thread_rng().r#gen())
    }

    fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.base_seed())
    }

    fn sample_count(&self) -> usize {
        self.config.monte_carlo_samples.max(MIN_MONTE_CARLO_SAMPLES)
    }

    pub fn value_at_risk(&self, returns: &[f64], confidence_level: f64, method: VarMethod) -> f64 {
        let mut rng = self.rng();
        self.value_at_risk_with_rng(returns, confidence_level, method, &mut rng)
    }

    /// [`Self::value_at_risk`] drawing Monte Carlo samples from `rng`.
    pub fn value_at_risk_with_rng<R: Rng + ?Sized>(
        &self,
        returns: &[f64],
        confidence_level: f64,
        method: VarMethod,
        rng: &mut R,
    ) -> f64 {
        let Some(returns) = usable_returns(returns, confidence_level) else {
            return 0.0;
        };
        let tail = 1.0 - confidence_level;

        let var = match method {
            VarMethod::Historical => stats::percentile(&returns, tail * 100.0),
            VarMethod::Parametric => {
                let mu = stats::mean(&returns);
                let sigma = stats::population_std(&returns);
                if sigma == 0.0 {
                    warn!("parametric VaR undefined for zero-variance returns");
                    return 0.0;
                }
                mu + z_score(tail) * sigma
            }
            VarMethod::MonteCarlo => {
                let simulated = self.simulate_returns(&returns, rng);
                stats::percentile(&simulated, tail * 100.0)
            }
        };

        debug!(
            "VaR ({:.1}%, {}): {:.2}%",
            confidence_level * 100.0,
            method,
            var * 100.0
        );
        var
    }

    pub fn conditional_var(&self, returns: &[f64], confidence_level: f64, method: VarMethod) -> f64 {
        let mut rng = self.rng();
        self.conditional_var_with_rng(returns, confidence_level, method, &mut rng)
    }

    /// Expected shortfall. Never less severe than the VaR at the same level.
    pub fn conditional_var_with_rng<R: Rng + ?Sized>(
        &self,
        returns: &[f64],
        confidence_level: f64,
        method: VarMethod,
        rng: &mut R,
    ) -> f64 {
        let Some(returns) = usable_returns(returns, confidence_level) else {
            return 0.0;
        };
        let tail = 1.0 - confidence_level;

        let (var, cvar) = match method {
            VarMethod::Historical => {
                let var = stats::percentile(&returns, tail * 100.0);
                (var, stats::tail_mean(&returns, var).unwrap_or(var))
            }
            VarMethod::Parametric => {
                let mu = stats::mean(&returns);
                let sigma = stats::population_std(&returns);
                if sigma == 0.0 {
                    warn!("parametric CVaR undefined for zero-variance returns");
                    return 0.0;
                }
                let z = z_score(tail);
                (mu + z * sigma, mu - sigma * normal_pdf(z) / tail)
            }
            VarMethod::MonteCarlo => {
                let simulated = self.simulate_returns(&returns, rng);
                let var = stats::percentile(&simulated, tail * 100.0);
                (var, stats::tail_mean(&simulated, var).unwrap_or(var))
            }
        };

        debug!(
            "CVaR ({:.1}%, {}): {:.2}%",
            confidence_level * 100.0,
            method,
            cvar * 100.0
        );
        cvar.min(var)
    }

    /// VaR and CVaR for every configured confidence level and method.
    pub fn risk_report(&self, returns: &[f64]) -> Vec<VarEstimate> {
        let mut report = Vec::new();
        for &confidence_level in &self.config.confidence_levels {
            for method in VarMethod::ALL {
                let mut rng = self.rng();
                let var = self.value_at_risk_with_rng(returns, confidence_level, method, &mut rng);
                let mut rng = self.rng();
                let cvar =
                    self.conditional_var_with_rng(returns, confidence_level, method, &mut rng);
                report.push(VarEstimate {
                    confidence_level,
                    method,
                    var,
                    cvar: cvar.min(var),
                });
            }
        }
        report
    }

    fn simulate_returns<R: Rng + ?Sized>(&self, returns: &[f64], rng: &mut R) -> Vec<f64> {
        let mu = stats::mean(returns);
        let sigma = stats::population_std(returns);
        let n = self.sample_count();
        match NormalSampler::new(mu, sigma) {
            Ok(normal) if sigma > 0.0 => (0..n).map(|_| normal.sample(&mut *rng)).collect(),
            _ => vec![mu; n],
        }
    }

    /// Simulates `n_simulations` price paths of `n_days` i.i.d. normal daily
    /// returns fitted to `returns`, compounded multiplicatively.
    ///
    /// A daily factor `1 + r` is floored at zero, so a path that is wiped out
    /// stays at zero instead of going negative.
    pub fn monte_carlo_price_projection(
        &self,
        current_price: f64,
        returns: &[f64],
        n_simulations: usize,
        n_days: usize,
        confidence_level: f64,
    ) -> Option<PriceProjection> {
        let returns = usable_returns(returns, confidence_level)?;
        if !(current_price > 0.0 && current_price.is_finite()) {
            warn!("price projection needs a positive current price, got {current_price}");
            return None;
        }
        if n_simulations == 0 || n_days == 0 {
            warn!("price projection needs at least one path and one day");
            return None;
        }

        let mu = stats::mean(&returns);
        let sigma = stats::population_std(&returns);
        let sampler = NormalSampler::new(mu, sigma).ok().filter(|_| sigma > 0.0);
        let seed = self.base_seed();

        let final_prices: Vec<f64> = (0..n_simulations)
            .into_par_iter()
            .map(|path| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(path as u64);
                let mut price = current_price;
                for _ in 0..n_days {
                    let r = match &sampler {
                        Some(normal) => normal.sample(&mut rng),
                        None => mu,
                    };
                    price *= (1.0 + r).max(0.0);
                }
                price
            })
            .collect();

        let mut sorted = final_prices.clone();
        sorted.sort_by(f64::total_cmp);

        let terminal_returns: Vec<f64> = sorted
            .iter()
            .map(|p| (p - current_price) / current_price)
            .collect();
        let tail_pct = (1.0 - confidence_level) * 100.0;
        let var = stats::percentile_sorted(&terminal_returns, tail_pct);
        let cvar = stats::tail_mean(&terminal_returns, var).unwrap_or(var);

        let above = final_prices.iter().filter(|&&p| p > current_price).count();
        let level = final_prices.iter().filter(|&&p| p == current_price).count();
        let prob_profit = (above as f64 + 0.5 * level as f64) / n_simulations as f64;

        let projection = PriceProjection {
            current_price,
            n_simulations,
            n_days,
            mean_price: stats::mean(&final_prices),
            median_price: stats::percentile_sorted(&sorted, 50.0),
            std_price: stats::population_std(&final_prices),
            percentile_5: stats::percentile_sorted(&sorted, 5.0),
            percentile_25: stats::percentile_sorted(&sorted, 25.0),
            percentile_75: stats::percentile_sorted(&sorted, 75.0),
            percentile_95: stats::percentile_sorted(&sorted, 95.0),
            var,
            cvar,
            prob_profit,
            final_prices,
        };

        info!("Monte Carlo: {n_simulations} paths, {n_days} days");
        info!("  expected price: {:.2}", projection.mean_price);
        info!("  probability of profit: {:.1}%", prob_profit * 100.0);
        info!(
            "  VaR ({:.1}%): {:.2}%",
            confidence_level * 100.0,
            var * 100.0
        );

        Some(projection)
    }

    /// Applies each scenario's volatility multiplier and market drop to the
    /// return series.
    pub fn stress_test(&self, returns: &[f64], scenarios: &[StressScenario]) -> Vec<StressTestOutcome> {
        let returns = finite_only(returns);

        scenarios
            .iter()
            .map(|scenario| {
                let shocked: Vec<f64> = returns
                    .iter()
                    .map(|r| r * scenario.volatility_spike)
                    .collect();
                let portfolio_impact = shocked.iter().sum::<f64>() + scenario.market_drop;

                let stressed_var_95 =
                    self.value_at_risk(&shocked, 0.95, VarMethod::Historical);
                let stressed_cvar_95 =
                    self.conditional_var(&shocked, 0.95, VarMethod::Historical);

                let floored: Vec<f64> = shocked.iter().map(|r| r.max(-1.0)).collect();
                let max_drawdown = stats::max_drawdown(&stats::compound(&floored));

                info!(
                    "stress test {}: impact {:.2}%, max drawdown {:.2}%",
                    scenario.description,
                    portfolio_impact * 100.0,
                    max_drawdown * 100.0
                );

                StressTestOutcome {
                    scenario: scenario.name.clone(),
                    description: scenario.description.clone(),
                    portfolio_impact,
                    stressed_var_95,
                    stressed_cvar_95,
                    max_drawdown,
                    survives: portfolio_impact > -1.0,
                }
            })
            .collect()
    }

    pub fn portfolio_risk_metrics(&self, returns: &[f64]) -> Option<RiskMetrics> {
        let returns = finite_only(returns);
        if returns.is_empty() {
            return None;
        }
        let ppy = self.config.periods_per_year;
        let rf = self.config.risk_free_rate;

        let annual_return = stats::mean(&returns) * ppy;
        let annual_volatility = stats::population_std(&returns) * ppy.sqrt();
        let sharpe_ratio = if annual_volatility > 0.0 {
            (annual_return - rf) / annual_volatility
        } else {
            0.0
        };

        let downside: Vec<f64> = returns.iter().copied().filter(|&r| r < 0.0).collect();
        let downside_volatility = if downside.is_empty() {
            annual_volatility
        } else {
            stats::population_std(&downside) * ppy.sqrt()
        };
        let sortino_ratio = if downside_volatility > 0.0 {
            (annual_return - rf) / downside_volatility
        } else {
            0.0
        };

        let floored: Vec<f64> = returns.iter().map(|r| r.max(-1.0)).collect();
        let max_drawdown = stats::max_drawdown(&stats::compound(&floored));
        let calmar_ratio = if max_drawdown != 0.0 {
            annual_return / max_drawdown.abs()
        } else {
            0.0
        };

        Some(RiskMetrics {
            annual_return,
            annual_volatility,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            calmar_ratio,
            var_95: self.value_at_risk(&returns, 0.95, VarMethod::Historical),
            cvar_95: self.conditional_var(&returns, 0.95, VarMethod::Historical),
            var_99: self.value_at_risk(&returns, 0.99, VarMethod::Historical),
            cvar_99: self.conditional_var(&returns, 0.99, VarMethod::Historical),
            skewness: stats::skewness(&returns),
            kurtosis: stats::excess_kurtosis(&returns),
        })
    }

    /// Stateless circuit-breaker test against drawdown and daily-loss limits.
    pub fn circuit_breaker_check(
        &self,
        current_drawdown: f64,
        max_drawdown_limit: f64,
        daily_loss: f64,
        daily_loss_limit: f64,
    ) -> CircuitBreakerDecision {
        let mut reasons = Vec::new();
        if current_drawdown.abs() > max_drawdown_limit {
            reasons.push(format!(
                "drawdown {:.1}% > limit {:.1}%",
                current_drawdown.abs() * 100.0,
                max_drawdown_limit * 100.0
            ));
        }
        if daily_loss.abs() > daily_loss_limit {
            reasons.push(format!(
                "daily loss {:.1}% > limit {:.1}%",
                daily_loss.abs() * 100.0,
                daily_loss_limit * 100.0
            ));
        }
        let should_stop = !reasons.is_empty();
        if should_stop {
            warn!("circuit breaker tripped: {}", reasons.join(", "));
        }
        CircuitBreakerDecision {
            should_stop,
            reasons,
        }
    }
}

fn finite_only(returns: &[f64]) -> Cow<'_, [f64]> {
    if returns.iter().all(|r| r.is_finite()) {
        Cow::Borrowed(returns)
    } else {
        warn!("dropping non-finite returns");
        Cow::Owned(returns.iter().copied().filter(|r| r.is_finite()).collect())
    }
}

fn usable_returns(returns: &[f64], confidence_level: f64) -> Option<Cow<'_, [f64]>> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        warn!("confidence level must be in (0, 1), got {confidence_level}");
        return None;
    }
    let returns = finite_only(returns);
    if returns.is_empty() {
        debug!("empty return series, reporting zero risk");
        return None;
    }
    Some(returns)
}

fn standard_normal() -> Option<Normal> {
    Normal::new(0.0, 1.0).ok()
}

/// Inverse standard normal CDF.
pub fn z_score(p: f64) -> f64 {
    standard_normal().map_or(0.0, |n| n.inverse_cdf(p))
}

fn normal_pdf(z: f64) -> f64 {
    standard_normal().map_or(0.0, |n| n.pdf(z))
}
