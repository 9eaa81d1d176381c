//! Equal risk contribution weights.
//!
//! Solved through the convex reformulation
//! min ½ yᵀΣy - (1/N) Σ ln y_i over y > 0, whose minimizer normalized to a
//! unit sum has identical risk contributions. Cyclical coordinate descent
//! solves each one-dimensional subproblem in closed form.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use super::OptimizerConfig;

/// Smallest weight handed out.
pub const MIN_WEIGHT: f64 = 0.001;

pub(crate) struct RiskParitySolution {
    pub weights: DVector<f64>,
    /// Σ (rc_i - 1/N)² over relative risk contributions.
    pub residual: f64,
}

/// `None` when some asset has zero variance.
pub(crate) fn solve(cov: &DMatrix<f64>, config: &OptimizerConfig) -> Option<RiskParitySolution> {
    let n = cov.nrows();
    if cov.diagonal().iter().any(|v| !(*v > 0.0)) {
        warn!("risk parity: an asset has zero variance");
        return None;
    }

    let budget = 1.0 / n as f64;
    let mut y = DVector::from_fn(n, |i, _| 1.0 / cov[(i, i)].sqrt());
    let mut converged = false;

    for sweep in 1..=config.max_iterations {
        let mut max_change: f64 = 0.0;
        for i in 0..n {
            let s_ii = cov[(i, i)];
            let c: f64 = (0..n)
                .filter(|&j| j != i)
                .map(|j| cov[(i, j)] * y[j])
                .sum();
            let updated = (-c + (c * c + 4.0 * s_ii * budget).sqrt()) / (2.0 * s_ii);
            max_change = max_change.max((updated - y[i]).abs() / updated.max(f64::MIN_POSITIVE));
            y[i] = updated;
        }
        if max_change < config.tolerance {
            debug!("risk parity: converged after {sweep} sweeps");
            converged = true;
            break;
        }
    }
    if !converged {
        warn!(
            "risk parity: not converged after {} sweeps",
            config.max_iterations
        );
    }

    let mut w = &y / y.sum();
    if w.iter().any(|v| *v < MIN_WEIGHT) {
        w = w.map(|v| v.max(MIN_WEIGHT));
        let total = w.sum();
        w /= total;
    }

    let residual = contribution_residual(cov, &w);
    Some(RiskParitySolution {
        weights: w,
        residual,
    })
}

/// Relative risk contributions w_i (Σw)_i / wᵀΣw; they sum to 1.
pub fn risk_contributions(cov: &DMatrix<f64>, w: &DVector<f64>) -> DVector<f64> {
    let marginal = cov * w;
    let total = w.dot(&marginal);
    if total > 0.0 {
        w.component_mul(&marginal) / total
    } else {
        DVector::zeros(w.len())
    }
}

fn contribution_residual(cov: &DMatrix<f64>, w: &DVector<f64>) -> f64 {
    let target = 1.0 / w.len() as f64;
    risk_contributions(cov, w)
        .iter()
        .map(|rc| (rc - target).powi(2))
        .sum()
}
