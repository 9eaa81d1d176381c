//! Descriptive statistics shared by the risk engine, optimizer and backtester.
//!
//! Dispersion uses the population convention (divide by n) unless noted.
//! Empty input yields 0.0 everywhere.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Percentile with linear interpolation between order statistics.
///
/// `pct` is in [0, 100] and is clamped. Input need not be sorted.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, pct)
}

/// Same as [`percentile`] for input already sorted ascending.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pct = pct.clamp(0.0, 100.0);
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Mean of the values at or below `threshold`, if any.
pub fn tail_mean(values: &[f64], threshold: f64) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|&&v| v <= threshold)
        .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Deepest peak-to-trough decline of an equity curve: min((e - peak) / peak).
///
/// Always ≤ 0. Points where the running peak is not positive are ignored.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak > 0.0 {
            let dd = (value - peak) / peak;
            if dd < worst {
                worst = dd;
            }
        }
    }
    worst
}

/// Compounds returns into a growth path starting at 1.0 (the start is included).
pub fn compound(returns: &[f64]) -> Vec<f64> {
    let mut path = Vec::with_capacity(returns.len() + 1);
    let mut value = 1.0;
    path.push(value);
    for r in returns {
        value *= 1.0 + r;
        path.push(value);
    }
    path
}

/// Population skewness (biased estimator).
pub fn skewness(values: &[f64]) -> f64 {
    let sd = population_std(values);
    if sd == 0.0 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / sd).powi(3)).sum::<f64>() / values.len() as f64
}

/// Excess kurtosis (Fisher definition, biased estimator); 0 for a normal sample.
pub fn excess_kurtosis(values: &[f64]) -> f64 {
    let sd = population_std(values);
    if sd == 0.0 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| ((v - m) / sd).powi(4)).sum::<f64>() / values.len() as f64 - 3.0
}
