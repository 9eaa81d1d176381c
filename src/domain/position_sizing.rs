//! Position sizing: Kelly criterion, volatility-adjusted sizing and
//! fixed-fractional risk sizing.

use log::debug;

/// Cap applied to the Kelly fraction unless the caller chooses another.
pub const DEFAULT_MAX_KELLY: f64 = 0.25;

/// Default cap on a single position as a fraction of capital.
pub const DEFAULT_MAX_POSITION_FRACTION: f64 = 0.10;

/// Kelly fraction f* = (p·b - q) / b with b = avg_win / avg_loss.
///
/// Returns 0 when there is no meaningful edge to size from (win rate outside
/// (0, 1), non-positive average loss or win, non-finite input). The result is
/// always clamped to [0, max_kelly].
pub fn kelly_fraction(win_rate: f64, avg_win: f64, avg_loss: f64, max_kelly: f64) -> f64 {
    if !(win_rate > 0.0 && win_rate < 1.0) {
        return 0.0;
    }
    if !(avg_loss > 0.0 && avg_loss.is_finite()) || !(avg_win > 0.0 && avg_win.is_finite()) {
        return 0.0;
    }

    let p = win_rate;
    let q = 1.0 - p;
    let b = avg_win / avg_loss;
    let kelly = (p * b - q) / b;

    let clamped = kelly.clamp(0.0, max_kelly.max(0.0));
    debug!("kelly: raw {kelly:.4}, clamped {clamped:.4} (win rate {p:.2}, b {b:.2})");
    clamped
}

/// Capital to commit: Kelly scaled by historical/current volatility, capped at
/// `max_position_fraction` of capital.
///
/// A non-positive current volatility leaves the Kelly fraction unscaled.
pub fn dynamic_size(
    capital: f64,
    current_volatility: f64,
    historical_volatility: f64,
    kelly_fraction: f64,
    max_position_fraction: f64,
) -> f64 {
    if !(capital > 0.0) {
        return 0.0;
    }
    let vol_ratio = if current_volatility > 0.0 {
        historical_volatility / current_volatility
    } else {
        1.0
    };
    let fraction = (kelly_fraction * vol_ratio).min(max_position_fraction).max(0.0);
    if !fraction.is_finite() {
        return 0.0;
    }
    debug!("dynamic size: {:.2}% of capital (vol ratio {vol_ratio:.2})", fraction * 100.0);
    capital * fraction
}

/// Units such that hitting the stop loses balance × risk_fraction × confidence.
pub fn fixed_risk_size(
    balance: f64,
    entry_price: f64,
    stop_loss_price: f64,
    risk_fraction: f64,
    confidence: f64,
) -> f64 {
    if !(balance > 0.0) || !(entry_price > 0.0) {
        return 0.0;
    }
    let stop_distance = (entry_price - stop_loss_price).abs();
    if stop_distance == 0.0 || !stop_distance.is_finite() {
        return 0.0;
    }
    let risk_amount = balance * risk_fraction * confidence;
    (risk_amount / stop_distance).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn kelly_no_edge_is_zero() {
        assert_eq!(kelly_fraction(0.5, 1.0, 1.0, DEFAULT_MAX_KELLY), 0.0);
    }

    #[test]
    fn kelly_positive_edge() {
        // p = 0.6, b = 1 → f* = 0.2
        assert_relative_eq!(kelly_fraction(0.6, 1.0, 1.0, DEFAULT_MAX_KELLY), 0.2);
    }

    #[test]
    fn kelly_is_capped() {
        assert_relative_eq!(kelly_fraction(0.9, 3.0, 1.0, DEFAULT_MAX_KELLY), 0.25);
        assert_relative_eq!(kelly_fraction(0.9, 3.0, 1.0, 0.1), 0.1);
    }

    #[test]
    fn kelly_negative_edge_clamps_to_zero() {
        assert_eq!(kelly_fraction(0.3, 1.0, 1.0, DEFAULT_MAX_KELLY), 0.0);
    }

    #[test]
    fn kelly_rejects_degenerate_inputs() {
        assert_eq!(kelly_fraction(0.0, 1.0, 1.0, 0.25), 0.0);
        assert_eq!(kelly_fraction(1.0, 1.0, 1.0, 0.25), 0.0);
        assert_eq!(kelly_fraction(0.6, 1.0, 0.0, 0.25), 0.0);
        assert_eq!(kelly_fraction(0.6, 1.0, -1.0, 0.25), 0.0);
        assert_eq!(kelly_fraction(f64::NAN, 1.0, 1.0, 0.25), 0.0);
    }

    #[test]
    fn dynamic_size_shrinks_in_high_volatility() {
        // kelly 0.08 * (0.01 / 0.02) = 0.04
        assert_relative_eq!(dynamic_size(10_000.0, 0.02, 0.01, 0.08, 0.10), 400.0);
    }

    #[test]
    fn dynamic_size_is_capped() {
        // kelly 0.08 * (0.02 / 0.01) = 0.16 → capped at 0.10
        assert_relative_eq!(dynamic_size(10_000.0, 0.01, 0.02, 0.08, 0.10), 1_000.0);
    }

    #[test]
    fn dynamic_size_zero_current_vol_uses_unit_ratio() {
        assert_relative_eq!(dynamic_size(10_000.0, 0.0, 0.02, 0.05, 0.10), 500.0);
    }

    #[test]
    fn fixed_risk_size_divides_by_stop_distance() {
        // 10_000 * 0.02 * 0.5 / 5 = 20
        assert_relative_eq!(fixed_risk_size(10_000.0, 100.0, 95.0, 0.02, 0.5), 20.0);
        assert_relative_eq!(fixed_risk_size(10_000.0, 100.0, 105.0, 0.02, 1.0), 40.0);
    }

    #[test]
    fn fixed_risk_size_zero_stop_distance() {
        assert_eq!(fixed_risk_size(10_000.0, 100.0, 100.0, 0.02, 1.0), 0.0);
    }
}
