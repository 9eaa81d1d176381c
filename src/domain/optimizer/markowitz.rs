//! Mean-variance optimization under long-only, fully invested constraints.

use std::fmt;
use std::str::FromStr;

use log::{debug, warn};
use nalgebra::DVector;

use super::solver::{project_capped_simplex, project_with_target, projected_gradient, AffineBudgetTarget};
use super::{Moments, OptimizationMethod, OptimizerConfig};
use crate::domain::error::OptimizationError;

/// Largest allowed violation of the budget or target constraint.
const CONSTRAINT_TOLERANCE: f64 = 1e-6;

/// Floor on portfolio variance inside the Sharpe objective.
const VARIANCE_FLOOR: f64 = 1e-16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkowitzObjective {
    MaxSharpe,
    MinVariance,
}

impl MarkowitzObjective {
    pub fn method(self) -> OptimizationMethod {
        match self {
            MarkowitzObjective::MaxSharpe => OptimizationMethod::MaxSharpe,
            MarkowitzObjective::MinVariance => OptimizationMethod::MinVariance,
        }
    }
}

impl fmt::Display for MarkowitzObjective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.method().fmt(f)
    }
}

impl FromStr for MarkowitzObjective {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.parse::<OptimizationMethod>()? {
            OptimizationMethod::MaxSharpe => Ok(MarkowitzObjective::MaxSharpe),
            OptimizationMethod::MinVariance => Ok(MarkowitzObjective::MinVariance),
            other => Err(format!("{other} is not a Markowitz objective")),
        }
    }
}

pub(crate) fn solve(
    moments: &Moments,
    objective: MarkowitzObjective,
    target_return: Option<f64>,
    config: &OptimizerConfig,
) -> Result<DVector<f64>, OptimizationError> {
    let n = moments.mean.len();
    let start = DVector::from_element(n, 1.0 / n as f64);

    let Some(target) = target_return else {
        let outcome = run(moments, objective, start, config, |v| {
            project_capped_simplex(v, 0.0, 1.0)
        });
        return Ok(outcome);
    };

    let min = moments.mean.min();
    let max = moments.mean.max();
    if !target.is_finite() || target < min - 1e-12 || target > max + 1e-12 {
        warn!("target return {target:.6} outside achievable range [{min:.6}, {max:.6}]");
        return Err(OptimizationError::Infeasible { target, min, max });
    }

    let x = match AffineBudgetTarget::new(&moments.mean, target) {
        Some(plane) => run(moments, objective, start, config, |v| {
            project_with_target(v, &plane)
        }),
        None => run(moments, objective, start, config, |v| {
            project_capped_simplex(v, 0.0, 1.0)
        }),
    };

    let residual = (x.dot(&moments.mean) - target)
        .abs()
        .max((x.sum() - 1.0).abs());
    if residual > CONSTRAINT_TOLERANCE {
        return Err(OptimizationError::NotConverged {
            iterations: config.max_iterations,
            residual,
        });
    }
    Ok(x)
}

/// Sharpe maximization on the capped simplex starting from `start`.
pub(crate) fn max_sharpe_from(
    moments: &Moments,
    start: &DVector<f64>,
    config: &OptimizerConfig,
) -> DVector<f64> {
    run(
        moments,
        MarkowitzObjective::MaxSharpe,
        start.clone(),
        config,
        |v| project_capped_simplex(v, 0.0, 1.0),
    )
}

fn run<P>(
    moments: &Moments,
    objective: MarkowitzObjective,
    start: DVector<f64>,
    config: &OptimizerConfig,
    project: P,
) -> DVector<f64>
where
    P: Fn(&DVector<f64>) -> DVector<f64>,
{
    let mean = &moments.mean;
    let cov = &moments.cov;
    let rf = config.risk_free_rate;

    let outcome = match objective {
        MarkowitzObjective::MinVariance => projected_gradient(
            start,
            |w| (w.transpose() * cov * w)[(0, 0)],
            |w| (cov * w) * 2.0,
            project,
            config.max_iterations,
            config.tolerance,
        ),
        MarkowitzObjective::MaxSharpe => projected_gradient(
            start,
            |w| {
                let var = (w.transpose() * cov * w)[(0, 0)].max(VARIANCE_FLOOR);
                -(w.dot(mean) - rf) / var.sqrt()
            },
            |w| {
                let sigma_w = cov * w;
                let var = w.dot(&sigma_w).max(VARIANCE_FLOOR);
                let vol = var.sqrt();
                let excess = w.dot(mean) - rf;
                -(mean / vol - sigma_w * (excess / (var * vol)))
            },
            project,
            config.max_iterations,
            config.tolerance,
        ),
    };

    if outcome.stalled {
        warn!(
            "{objective}: step size collapsed after {} iterations",
            outcome.iterations
        );
    } else if !outcome.converged {
        warn!(
            "{objective}: no convergence within {} iterations",
            outcome.iterations
        );
    } else {
        debug!("{objective}: solved in {} iterations", outcome.iterations);
    }
    outcome.x
}

#[cfg(test)]
mod tests {
    use super::super::tests::{assert_valid_weights, sample_matrix};
    use super::super::{PortfolioOptimizer, ReturnMatrix};
    use super::*;
    use approx::assert_relative_eq;

    /// Two uncorrelated assets, variance of A four times that of B.
    fn uncorrelated_pair() -> ReturnMatrix {
        let pattern = [[0.02, 0.01], [0.02, -0.01], [-0.02, 0.01], [-0.02, -0.01]];
        let rows: Vec<Vec<f64>> = (0..40).map(|i| pattern[i % 4].to_vec()).collect();
        ReturnMatrix::from_rows(vec!["A".into(), "B".into()], &rows).unwrap()
    }

    #[test]
    fn min_variance_matches_inverse_variance_for_uncorrelated_assets() {
        let result = PortfolioOptimizer::default()
            .markowitz(&uncorrelated_pair(), MarkowitzObjective::MinVariance, None)
            .unwrap();
        assert_valid_weights(&result);
        assert_relative_eq!(result.weights.get("A").unwrap(), 0.2, epsilon = 1e-6);
        assert_relative_eq!(result.weights.get("B").unwrap(), 0.8, epsilon = 1e-6);
        assert_eq!(result.method, OptimizationMethod::MinVariance);
        assert!(!result.fallback);
    }

    #[test]
    fn max_sharpe_beats_equal_weight_and_single_assets() {
        let m = sample_matrix();
        let opt = PortfolioOptimizer::default();
        let best = opt.markowitz(&m, MarkowitzObjective::MaxSharpe, None).unwrap();
        assert_valid_weights(&best);

        let moments = opt.prepare(&m).unwrap();
        let rf = opt.config().risk_free_rate;
        let equal = DVector::from_element(3, 1.0 / 3.0);
        let (_, _, equal_sharpe) = super::super::portfolio_stats(&equal, &moments.mean, &moments.cov, rf);
        assert!(best.sharpe_ratio >= equal_sharpe - 1e-9);
        for i in 0..3 {
            let mut single = DVector::zeros(3);
            single[i] = 1.0;
            let (_, _, s) = super::super::portfolio_stats(&single, &moments.mean, &moments.cov, rf);
            assert!(best.sharpe_ratio >= s - 1e-9);
        }
    }

    #[test]
    fn target_return_is_met() {
        let m = sample_matrix();
        let opt = PortfolioOptimizer::default();
        let mean = m.annualized_mean(252.0);
        let target = 0.5 * (mean.min() + mean.max());
        let result = opt
            .markowitz(&m, MarkowitzObjective::MinVariance, Some(target))
            .unwrap();
        assert_valid_weights(&result);
        assert_relative_eq!(result.expected_return, target, epsilon = 1e-6);
    }

    #[test]
    fn target_outside_asset_range_is_infeasible() {
        let m = sample_matrix();
        let mean = m.annualized_mean(252.0);
        let err = PortfolioOptimizer::default()
            .markowitz(&m, MarkowitzObjective::MinVariance, Some(mean.max() + 0.5))
            .unwrap_err();
        assert!(matches!(err, OptimizationError::Infeasible { .. }));
    }

    #[test]
    fn objective_parses() {
        assert_eq!("max-sharpe".parse(), Ok(MarkowitzObjective::MaxSharpe));
        assert_eq!("min_variance".parse(), Ok(MarkowitzObjective::MinVariance));
        assert!("hrp".parse::<MarkowitzObjective>().is_err());
    }
}
