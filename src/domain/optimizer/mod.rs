//! Portfolio construction over a multi-asset return matrix.
//!
//! Four weighting schemes share one [`PortfolioOptimizer`]:
//! - Markowitz mean-variance (max Sharpe, min variance, optional target return)
//! - Black-Litterman posterior returns followed by Sharpe maximization
//! - Risk parity (equal risk contributions)
//! - Hierarchical risk parity (clustering + recursive bisection)
//!
//! Every weighting is long-only and fully invested. Degenerate data never
//! errors: it falls back to equal weights with `fallback = true`.

pub mod black_litterman;
pub mod hrp;
pub mod markowitz;
pub mod risk_parity;
mod solver;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use log::{info, warn};
use nalgebra::{DMatrix, DVector};

use super::error::{OptimizationError, QuantGuardError};

pub use markowitz::MarkowitzObjective;

/// Variance below which a covariance matrix is treated as all-zero.
const DEGENERATE_VARIANCE: f64 = 1e-18;

/// T × N periodic returns with one named column per asset.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnMatrix {
    assets: Vec<String>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    pub fn new(assets: Vec<String>, data: DMatrix<f64>) -> Result<Self, QuantGuardError> {
        if data.ncols() != assets.len() {
            return Err(QuantGuardError::Data {
                reason: format!(
                    "{} asset names for {} return columns",
                    assets.len(),
                    data.ncols()
                ),
            });
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(QuantGuardError::Data {
                reason: "return matrix contains non-finite values".to_string(),
            });
        }
        Ok(ReturnMatrix { assets, data })
    }

    /// Builds from row-major observations (one `Vec` per period).
    pub fn from_rows(assets: Vec<String>, rows: &[Vec<f64>]) -> Result<Self, QuantGuardError> {
        let n = assets.len();
        if let Some(bad) = rows.iter().position(|r| r.len() != n) {
            return Err(QuantGuardError::Data {
                reason: format!("row {} has {} values, expected {n}", bad + 1, rows[bad].len()),
            });
        }
        let data = DMatrix::from_fn(rows.len(), n, |i, j| rows[i][j]);
        ReturnMatrix::new(assets, data)
    }

    /// Simple returns from a T × N price matrix (T-1 rows).
    pub fn from_prices(assets: Vec<String>, prices: &[Vec<f64>]) -> Result<Self, QuantGuardError> {
        let n = assets.len();
        let mut rows = Vec::with_capacity(prices.len().saturating_sub(1));
        for (t, pair) in prices.windows(2).enumerate() {
            if pair[0].len() != n || pair[1].len() != n {
                return Err(QuantGuardError::Data {
                    reason: format!("price row {} has the wrong width", t + 1),
                });
            }
            let mut row = Vec::with_capacity(n);
            for j in 0..n {
                let prev = pair[0][j];
                if prev <= 0.0 {
                    return Err(QuantGuardError::Data {
                        reason: format!("non-positive price for {} at row {}", assets[j], t + 1),
                    });
                }
                row.push(pair[1][j] / prev - 1.0);
            }
            rows.push(row);
        }
        ReturnMatrix::from_rows(assets, &rows)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn data(&self) -> &DMatrix<f64> {
        &self.data
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn n_observations(&self) -> usize {
        self.data.nrows()
    }

    /// Mean return per asset, scaled by `periods_per_year`.
    pub fn annualized_mean(&self, periods_per_year: f64) -> DVector<f64> {
        let t = self.n_observations();
        if t == 0 {
            return DVector::zeros(self.n_assets());
        }
        DVector::from_fn(self.n_assets(), |j, _| {
            self.data.column(j).sum() / t as f64 * periods_per_year
        })
    }

    /// Sample covariance (ddof = 1), scaled by `periods_per_year`.
    pub fn annualized_covariance(&self, periods_per_year: f64) -> DMatrix<f64> {
        let t = self.n_observations();
        let n = self.n_assets();
        if t < 2 {
            return DMatrix::zeros(n, n);
        }
        let means = self.annualized_mean(1.0);
        let centered = DMatrix::from_fn(t, n, |i, j| self.data[(i, j)] - means[j]);
        (centered.transpose() * &centered) / (t as f64 - 1.0) * periods_per_year
    }

    /// Pearson correlation. Pairs involving a zero-variance asset are 0 off
    /// the diagonal.
    pub fn correlation(&self) -> DMatrix<f64> {
        let cov = self.annualized_covariance(1.0);
        correlation_from_covariance(&cov)
    }
}

pub(crate) fn correlation_from_covariance(cov: &DMatrix<f64>) -> DMatrix<f64> {
    let n = cov.nrows();
    DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            return 1.0;
        }
        let denom = (cov[(i, i)] * cov[(j, j)]).sqrt();
        if denom > 0.0 {
            (cov[(i, j)] / denom).clamp(-1.0, 1.0)
        } else {
            0.0
        }
    })
}

/// Ordered (asset, weight) pairs in the column order of the input matrix.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PortfolioWeights(Vec<(String, f64)>);

impl PortfolioWeights {
    pub(crate) fn from_vector(assets: &[String], weights: &DVector<f64>) -> Self {
        PortfolioWeights(
            assets
                .iter()
                .cloned()
                .zip(weights.iter().copied())
                .collect(),
        )
    }

    pub fn get(&self, asset: &str) -> Option<f64> {
        self.0.iter().find(|(a, _)| a == asset).map(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(a, w)| (a.as_str(), *w))
    }

    pub fn values(&self) -> Vec<f64> {
        self.0.iter().map(|(_, w)| *w).collect()
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().map(|(_, w)| w).sum()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimizationMethod {
    MaxSharpe,
    MinVariance,
    BlackLitterman,
    RiskParity,
    HierarchicalRiskParity,
}

impl OptimizationMethod {
    pub const ALL: [OptimizationMethod; 5] = [
        OptimizationMethod::MaxSharpe,
        OptimizationMethod::MinVariance,
        OptimizationMethod::BlackLitterman,
        OptimizationMethod::RiskParity,
        OptimizationMethod::HierarchicalRiskParity,
    ];
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptimizationMethod::MaxSharpe => "max_sharpe",
            OptimizationMethod::MinVariance => "min_variance",
            OptimizationMethod::BlackLitterman => "black_litterman",
            OptimizationMethod::RiskParity => "risk_parity",
            OptimizationMethod::HierarchicalRiskParity => "hrp",
        };
        f.write_str(s)
    }
}

impl FromStr for OptimizationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "max_sharpe" => Ok(OptimizationMethod::MaxSharpe),
            "min_variance" => Ok(OptimizationMethod::MinVariance),
            "black_litterman" | "bl" => Ok(OptimizationMethod::BlackLitterman),
            "risk_parity" => Ok(OptimizationMethod::RiskParity),
            "hrp" | "hierarchical_risk_parity" => Ok(OptimizationMethod::HierarchicalRiskParity),
            other => Err(format!("unknown optimization method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OptimizationResult {
    pub weights: PortfolioWeights,
    /// Annualized.
    pub expected_return: f64,
    /// Annualized.
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub method: OptimizationMethod,
    /// Equal weights substituted for degenerate input.
    pub fallback: bool,
    /// Risk parity only: Σ (rc_i - 1/N)² at the solution.
    pub residual: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FrontierPoint {
    pub target_return: f64,
    pub volatility: f64,
    pub weights: PortfolioWeights,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerConfig {
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Black-Litterman risk aversion λ.
    pub risk_aversion: f64,
    /// Black-Litterman prior scaling τ.
    pub tau: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            risk_free_rate: 0.02,
            periods_per_year: 252.0,
            max_iterations: 5000,
            tolerance: 1e-10,
            risk_aversion: 2.5,
            tau: 0.025,
        }
    }
}

/// Annualized moments of a return matrix.
pub(crate) struct Moments {
    pub mean: DVector<f64>,
    pub cov: DMatrix<f64>,
}

impl Moments {
    fn is_degenerate(&self, n_observations: usize) -> bool {
        n_observations < 2 || self.cov.diagonal().iter().all(|v| *v <= DEGENERATE_VARIANCE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        PortfolioOptimizer { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn markowitz(
        &self,
        returns: &ReturnMatrix,
        objective: MarkowitzObjective,
        target_return: Option<f64>,
    ) -> Result<OptimizationResult, OptimizationError> {
        let moments = self.prepare(returns)?;
        let method = objective.method();
        if moments.is_degenerate(returns.n_observations()) {
            return Ok(self.equal_weight_fallback(returns, &moments, method));
        }
        let w = markowitz::solve(&moments, objective, target_return, &self.config)?;
        Ok(self.finish(returns, &moments.mean, &moments.cov, &w, method))
    }

    pub fn black_litterman(
        &self,
        returns: &ReturnMatrix,
        market_caps: &BTreeMap<String, f64>,
        views: &BTreeMap<String, f64>,
        view_confidence: f64,
    ) -> Result<OptimizationResult, OptimizationError> {
        let moments = self.prepare(returns)?;
        let method = OptimizationMethod::BlackLitterman;
        if moments.is_degenerate(returns.n_observations()) {
            return Ok(self.equal_weight_fallback(returns, &moments, method));
        }
        let market_weights = black_litterman::market_weights(returns.assets(), market_caps);
        let posterior = black_litterman::posterior_returns(
            returns.assets(),
            &moments.cov,
            &market_weights,
            views,
            view_confidence,
            &self.config,
        );
        let posterior_moments = Moments {
            mean: posterior,
            cov: moments.cov,
        };
        let w = markowitz::max_sharpe_from(&posterior_moments, &market_weights, &self.config);
        Ok(self.finish(
            returns,
            &posterior_moments.mean,
            &posterior_moments.cov,
            &w,
            method,
        ))
    }

    pub fn risk_parity(&self, returns: &ReturnMatrix) -> Result<OptimizationResult, OptimizationError> {
        let moments = self.prepare(returns)?;
        let method = OptimizationMethod::RiskParity;
        if moments.is_degenerate(returns.n_observations()) {
            return Ok(self.equal_weight_fallback(returns, &moments, method));
        }
        match risk_parity::solve(&moments.cov, &self.config) {
            Some(solution) => {
                let mut result =
                    self.finish(returns, &moments.mean, &moments.cov, &solution.weights, method);
                result.residual = Some(solution.residual);
                Ok(result)
            }
            None => Ok(self.equal_weight_fallback(returns, &moments, method)),
        }
    }

    pub fn hierarchical_risk_parity(
        &self,
        returns: &ReturnMatrix,
    ) -> Result<OptimizationResult, OptimizationError> {
        let moments = self.prepare(returns)?;
        let method = OptimizationMethod::HierarchicalRiskParity;
        if moments.is_degenerate(returns.n_observations()) {
            return Ok(self.equal_weight_fallback(returns, &moments, method));
        }
        let w = hrp::solve(&moments.cov);
        Ok(self.finish(returns, &moments.mean, &moments.cov, &w, method))
    }

    /// Minimum-variance portfolios for `n_points` evenly spaced targets between
    /// the lowest and highest annualized asset mean. Targets that fail to
    /// solve are dropped.
    pub fn efficient_frontier(
        &self,
        returns: &ReturnMatrix,
        n_points: usize,
    ) -> Result<Vec<FrontierPoint>, OptimizationError> {
        let moments = self.prepare(returns)?;
        if n_points == 0 {
            return Ok(Vec::new());
        }
        let lo = moments.mean.min();
        let hi = moments.mean.max();
        let targets: Vec<f64> = if n_points == 1 {
            vec![lo]
        } else {
            (0..n_points)
                .map(|i| lo + (hi - lo) * i as f64 / (n_points - 1) as f64)
                .collect()
        };

        let mut points = Vec::with_capacity(targets.len());
        for target in targets {
            match self.markowitz(returns, MarkowitzObjective::MinVariance, Some(target)) {
                Ok(result) if !result.fallback => points.push(FrontierPoint {
                    target_return: target,
                    volatility: result.volatility,
                    weights: result.weights,
                }),
                Ok(_) => {}
                Err(e) => warn!("frontier point at {target:.6} dropped: {e}"),
            }
        }
        info!("efficient frontier: {} of {n_points} points solved", points.len());
        Ok(points)
    }

    fn prepare(&self, returns: &ReturnMatrix) -> Result<Moments, OptimizationError> {
        if returns.n_assets() == 0 {
            return Err(OptimizationError::NoAssets);
        }
        Ok(Moments {
            mean: returns.annualized_mean(self.config.periods_per_year),
            cov: returns.annualized_covariance(self.config.periods_per_year),
        })
    }

    fn equal_weight_fallback(
        &self,
        returns: &ReturnMatrix,
        moments: &Moments,
        method: OptimizationMethod,
    ) -> OptimizationResult {
        warn!(
            "{method}: degenerate returns ({} observations, zero variance or too few rows), using equal weights",
            returns.n_observations()
        );
        let n = returns.n_assets();
        let w = DVector::from_element(n, 1.0 / n as f64);
        let mut result = self.finish(returns, &moments.mean, &moments.cov, &w, method);
        result.fallback = true;
        result
    }

    fn finish(
        &self,
        returns: &ReturnMatrix,
        mean: &DVector<f64>,
        cov: &DMatrix<f64>,
        weights: &DVector<f64>,
        method: OptimizationMethod,
    ) -> OptimizationResult {
        let weights = normalize_long_only(weights);
        let (expected_return, volatility, sharpe_ratio) =
            portfolio_stats(&weights, mean, cov, self.config.risk_free_rate);
        info!(
            "{method}: expected return {:.2}%, volatility {:.2}%, sharpe {sharpe_ratio:.2}",
            expected_return * 100.0,
            volatility * 100.0
        );
        OptimizationResult {
            weights: PortfolioWeights::from_vector(returns.assets(), &weights),
            expected_return,
            volatility,
            sharpe_ratio,
            method,
            fallback: false,
            residual: None,
        }
    }
}

/// (expected return, volatility, Sharpe). Sharpe is 0 at zero volatility.
pub(crate) fn portfolio_stats(
    w: &DVector<f64>,
    mean: &DVector<f64>,
    cov: &DMatrix<f64>,
    risk_free_rate: f64,
) -> (f64, f64, f64) {
    let ret = w.dot(mean);
    let var = (w.transpose() * cov * w)[(0, 0)];
    let vol = var.max(0.0).sqrt();
    let sharpe = if vol > 0.0 {
        (ret - risk_free_rate) / vol
    } else {
        0.0
    };
    (ret, vol, sharpe)
}

/// Clears round-off negatives and rescales to a unit sum.
fn normalize_long_only(w: &DVector<f64>) -> DVector<f64> {
    let clipped = w.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let total = clipped.sum();
    if total > 0.0 {
        clipped / total
    } else {
        DVector::from_element(w.len(), 1.0 / w.len().max(1) as f64)
    }
}
