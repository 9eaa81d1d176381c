//! Projected-gradient machinery for long-only, fully invested portfolios.

use log::debug;
use nalgebra::{DMatrix, DVector};

const BISECTION_ROUNDS: usize = 200;
const DYKSTRA_MAX_ROUNDS: usize = 5_000;
const DYKSTRA_TOLERANCE: f64 = 1e-13;
const ARMIJO_SHRINK: f64 = 0.5;
const MIN_STEP: f64 = 1e-20;

/// Euclidean projection onto {w : Σw = 1, lo ≤ w_i ≤ hi}.
///
/// Finds τ with Σ clamp(v_i - τ, lo, hi) = 1 by bisection; the sum is
/// non-increasing in τ. Requires n·lo ≤ 1 ≤ n·hi.
pub(crate) fn project_capped_simplex(v: &DVector<f64>, lo: f64, hi: f64) -> DVector<f64> {
    let sum_at = |tau: f64| v.iter().map(|x| (x - tau).clamp(lo, hi)).sum::<f64>();

    let mut low = v.min() - hi;
    let mut high = v.max() - lo;
    for _ in 0..BISECTION_ROUNDS {
        let mid = 0.5 * (low + high);
        if sum_at(mid) > 1.0 {
            low = mid;
        } else {
            high = mid;
        }
        if high - low < f64::EPSILON {
            break;
        }
    }
    let tau = 0.5 * (low + high);
    v.map(|x| (x - tau).clamp(lo, hi))
}

/// Projection onto the affine set {w : Σw = 1, μᵀw = target}.
pub(crate) struct AffineBudgetTarget {
    constraints: DMatrix<f64>,
    gram_inverse: DMatrix<f64>,
    rhs: DVector<f64>,
}

impl AffineBudgetTarget {
    /// `None` when μ is constant across assets (the two planes coincide or
    /// are parallel).
    pub(crate) fn new(mean: &DVector<f64>, target: f64) -> Option<Self> {
        let n = mean.len();
        if n == 0 || mean.max() - mean.min() < 1e-12 {
            return None;
        }
        let constraints = DMatrix::from_fn(2, n, |r, c| if r == 0 { 1.0 } else { mean[c] });
        let gram = &constraints * constraints.transpose();
        let gram_inverse = gram.try_inverse()?;
        if gram_inverse.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(AffineBudgetTarget {
            constraints,
            gram_inverse,
            rhs: DVector::from_vec(vec![1.0, target]),
        })
    }

    fn project(&self, w: &DVector<f64>) -> DVector<f64> {
        let violation = &self.constraints * w - &self.rhs;
        w - self.constraints.transpose() * (&self.gram_inverse * violation)
    }
}

/// Dykstra's alternating projection onto the affine budget/target set
/// intersected with the [0, 1] box. Converges to the nearest feasible point.
pub(crate) fn project_with_target(v: &DVector<f64>, plane: &AffineBudgetTarget) -> DVector<f64> {
    let n = v.len();
    let mut x = v.clone();
    let mut p = DVector::zeros(n);
    let mut q = DVector::zeros(n);
    for _ in 0..DYKSTRA_MAX_ROUNDS {
        let y = plane.project(&(&x + &p));
        p = &x + &p - &y;
        let x_next = (&y + &q).map(|w| w.clamp(0.0, 1.0));
        q = &y + &q - &x_next;
        let change = (&x_next - &x).norm();
        x = x_next;
        if change < DYKSTRA_TOLERANCE {
            break;
        }
    }
    x
}

pub(crate) struct SolverOutcome {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub converged: bool,
    /// Backtracking shrank the step below its floor before convergence.
    pub stalled: bool,
}

/// Minimizes `objective` over the set defined by `project` using projected
/// gradient steps with Armijo backtracking. Stops once a step moves the
/// iterate by less than `tolerance`.
pub(crate) fn projected_gradient<F, G, P>(
    x0: DVector<f64>,
    objective: F,
    gradient: G,
    project: P,
    max_iterations: usize,
    tolerance: f64,
) -> SolverOutcome
where
    F: Fn(&DVector<f64>) -> f64,
    G: Fn(&DVector<f64>) -> DVector<f64>,
    P: Fn(&DVector<f64>) -> DVector<f64>,
{
    let mut x = project(&x0);
    let mut fx = objective(&x);
    let mut step = 1.0;

    for iteration in 1..=max_iterations {
        let g = gradient(&x);
        let mut accepted = None;
        while step > MIN_STEP {
            let candidate = project(&(&x - &g * step));
            let delta = &candidate - &x;
            let f_candidate = objective(&candidate);
            let model = fx + g.dot(&delta) + delta.norm_squared() / (2.0 * step);
            if f_candidate.is_finite() && f_candidate <= model + 1e-15 * fx.abs() {
                accepted = Some((candidate, f_candidate, delta.norm()));
                break;
            }
            step *= ARMIJO_SHRINK;
        }

        let Some((candidate, f_candidate, moved)) = accepted else {
            debug!("projected gradient: step collapsed after {iteration} iterations");
            return SolverOutcome {
                x,
                iterations: iteration,
                converged: false,
                stalled: true,
            };
        };

        x = candidate;
        fx = f_candidate;
        if moved < tolerance {
            debug!("projected gradient: converged in {iteration} iterations");
            return SolverOutcome {
                x,
                iterations: iteration,
                converged: true,
                stalled: false,
            };
        }
        step *= 2.0;
    }

    SolverOutcome {
        x,
        iterations: max_iterations,
        converged: false,
        stalled: false,
    }
}
