//! Black-Litterman: market-implied equilibrium returns blended with views.

use std::collections::BTreeMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use super::OptimizerConfig;

/// Lowest confidence accepted; smaller values are raised to it.
pub const MIN_VIEW_CONFIDENCE: f64 = 1e-6;

/// Market-cap weights in asset order. Missing caps count as zero; a
/// non-positive total falls back to equal weights.
pub fn market_weights(assets: &[String], market_caps: &BTreeMap<String, f64>) -> DVector<f64> {
    let n = assets.len();
    let caps = DVector::from_fn(n, |i, _| {
        market_caps
            .get(&assets[i])
            .copied()
            .filter(|c| c.is_finite() && *c > 0.0)
            .unwrap_or(0.0)
    });
    let total = caps.sum();
    if total > 0.0 {
        caps / total
    } else {
        warn!("no usable market caps, using equal market weights");
        DVector::from_element(n, 1.0 / n.max(1) as f64)
    }
}

/// Reverse optimization: Π = λ Σ w_mkt.
pub fn implied_returns(
    cov: &DMatrix<f64>,
    market_weights: &DVector<f64>,
    risk_aversion: f64,
) -> DVector<f64> {
    cov * market_weights * risk_aversion
}

/// Posterior expected returns
/// μ = [(τΣ)⁻¹ + PᵀΩ⁻¹P]⁻¹ [(τΣ)⁻¹Π + PᵀΩ⁻¹Q] with Ω = P(τΣ)Pᵀ / confidence.
///
/// Each view is an absolute expected return for one asset. Views on assets
/// outside `assets` are skipped. Any singular matrix along the way returns
/// the prior Π.
pub fn posterior_returns(
    assets: &[String],
    cov: &DMatrix<f64>,
    market_weights: &DVector<f64>,
    views: &BTreeMap<String, f64>,
    view_confidence: f64,
    config: &OptimizerConfig,
) -> DVector<f64> {
    let n = assets.len();
    let prior = implied_returns(cov, market_weights, config.risk_aversion);

    let mut picks = Vec::new();
    for (asset, view) in views {
        match assets.iter().position(|a| a == asset) {
            Some(idx) if view.is_finite() => picks.push((idx, *view)),
            Some(_) => warn!("view on {asset} is not finite, skipped"),
            None => warn!("view on unknown asset {asset} skipped"),
        }
    }
    if picks.is_empty() {
        debug!("no usable views, posterior equals the prior");
        return prior;
    }

    let confidence = if view_confidence.is_nan() {
        1.0
    } else {
        view_confidence.clamp(MIN_VIEW_CONFIDENCE, 1.0)
    };

    let k = picks.len();
    let p = DMatrix::from_fn(k, n, |r, c| if picks[r].0 == c { 1.0 } else { 0.0 });
    let q = DVector::from_fn(k, |r, _| picks[r].1);
    let tau_sigma = cov * config.tau;
    let omega = &p * &tau_sigma * p.transpose() / confidence;

    let Some(tau_sigma_inv) = tau_sigma.clone().try_inverse() else {
        warn!("τΣ is singular, using implied equilibrium returns");
        return prior;
    };
    let Some(omega_inv) = omega.try_inverse() else {
        warn!("view uncertainty matrix is singular, using implied equilibrium returns");
        return prior;
    };

    let pt_omega_inv = p.transpose() * omega_inv;
    let precision = &tau_sigma_inv + &pt_omega_inv * &p;
    let Some(posterior_cov) = precision.try_inverse() else {
        warn!("posterior precision is singular, using implied equilibrium returns");
        return prior;
    };
    let posterior = posterior_cov * (tau_sigma_inv * &prior + pt_omega_inv * q);
    if posterior.iter().any(|v| !v.is_finite()) {
        warn!("non-finite posterior returns, using implied equilibrium returns");
        return prior;
    }
    posterior
}

#[cfg(test)]
mod tests {
    use super::super::tests::{assert_valid_weights, sample_matrix};
    use super::super::{OptimizationMethod, PortfolioOptimizer};
    use super::*;
    use approx::assert_relative_eq;

    fn names() -> Vec<String> {
        vec!["A".into(), "B".into()]
    }

    fn diag_cov() -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 0.01])
    }

    #[test]
    fn market_weights_normalize_caps() {
        let caps = BTreeMap::from([("A".to_string(), 300.0), ("B".to_string(), 100.0)]);
        let w = market_weights(&names(), &caps);
        assert_relative_eq!(w[0], 0.75);
        assert_relative_eq!(w[1], 0.25);
    }

    #[test]
    fn market_weights_without_caps_are_equal() {
        let w = market_weights(&names(), &BTreeMap::new());
        assert_relative_eq!(w[0], 0.5);
    }

    #[test]
    fn implied_returns_scale_with_risk_aversion() {
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let pi = implied_returns(&diag_cov(), &w, 2.5);
        assert_relative_eq!(pi[0], 2.5 * 0.02, epsilon = 1e-12);
        assert_relative_eq!(pi[1], 2.5 * 0.005, epsilon = 1e-12);
    }

    #[test]
    fn no_views_returns_prior() {
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let config = OptimizerConfig::default();
        let post = posterior_returns(&names(), &diag_cov(), &w, &BTreeMap::new(), 0.5, &config);
        let prior = implied_returns(&diag_cov(), &w, config.risk_aversion);
        assert_eq!(post, prior);
    }

    #[test]
    fn unknown_view_is_ignored() {
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let config = OptimizerConfig::default();
        let views = BTreeMap::from([("ZZZ".to_string(), 0.5)]);
        let post = posterior_returns(&names(), &diag_cov(), &w, &views, 0.5, &config);
        let prior = implied_returns(&diag_cov(), &w, config.risk_aversion);
        assert_eq!(post, prior);
    }

    #[test]
    fn view_pulls_posterior_toward_it_with_confidence() {
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let config = OptimizerConfig::default();
        let prior = implied_returns(&diag_cov(), &w, config.risk_aversion);
        let views = BTreeMap::from([("A".to_string(), 0.20)]);

        let low = posterior_returns(&names(), &diag_cov(), &w, &views, 0.1, &config);
        let high = posterior_returns(&names(), &diag_cov(), &w, &views, 1.0, &config);

        assert!(low[0] > prior[0] && low[0] < 0.20);
        assert!(high[0] > low[0] && high[0] < 0.20);
        // diagonal Σ: a view on A leaves B at its prior
        assert_relative_eq!(high[1], prior[1], epsilon = 1e-12);
        // single view, Ω = τΣ_AA/c: posterior = (Π + c·Q) / (1 + c)
        assert_relative_eq!(high[0], (prior[0] + 0.20) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_confidence_is_clamped() {
        let w = DVector::from_vec(vec![0.5, 0.5]);
        let config = OptimizerConfig::default();
        let views = BTreeMap::from([("A".to_string(), 0.20)]);
        let post = posterior_returns(&names(), &diag_cov(), &w, &views, 0.0, &config);
        assert!(post.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn optimizer_black_litterman_produces_valid_weights() {
        let m = sample_matrix();
        let caps = BTreeMap::from([
            ("A".to_string(), 500.0),
            ("B".to_string(), 300.0),
            ("C".to_string(), 200.0),
        ]);
        let views = BTreeMap::from([("C".to_string(), 0.30), ("X".to_string(), 1.0)]);
        let result = PortfolioOptimizer::default()
            .black_litterman(&m, &caps, &views, 0.5)
            .unwrap();
        assert_valid_weights(&result);
        assert_eq!(result.method, OptimizationMethod::BlackLitterman);
        assert!(!result.fallback);
    }
}
