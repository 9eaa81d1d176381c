//! Signal strategies and their parameters.
//!
//! A strategy maps a bar series and a [`ParameterSet`] to one [`Signal`] per
//! bar. Plain closures implement [`SignalStrategy`], so callers can backtest
//! ad-hoc rules without defining a type.

use std::collections::BTreeMap;
use std::fmt;

use log::warn;

use super::ohlcv::OhlcvBar;
use super::trade::Side;

/// Desired position for a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Signal {
    Long,
    Short,
    Flat,
}

impl Signal {
    pub fn side(self) -> Option<Side> {
        match self {
            Signal::Long => Some(Side::Long),
            Signal::Short => Some(Side::Short),
            Signal::Flat => None,
        }
    }
}

impl From<i8> for Signal {
    /// Positive → long, negative → short, zero → flat.
    fn from(value: i8) -> Self {
        match value.signum() {
            1 => Signal::Long,
            -1 => Signal::Short,
            _ => Signal::Flat,
        }
    }
}

/// Named numeric strategy parameters, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ParameterSet(BTreeMap<String, f64>);

impl ParameterSet {
    pub fn new() -> Self {
        ParameterSet(BTreeMap::new())
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Candidate values per parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGrid(BTreeMap<String, Vec<f64>>);

impl ParamGrid {
    pub fn new() -> Self {
        ParamGrid(BTreeMap::new())
    }

    pub fn with(mut self, name: &str, values: Vec<f64>) -> Self {
        self.0.insert(name.to_string(), values);
        self
    }

    pub fn insert(&mut self, name: &str, values: Vec<f64>) {
        self.0.insert(name.to_string(), values);
    }

    /// Cartesian product in key order; the last key varies fastest. An empty
    /// grid yields one empty parameter set.
    pub fn combinations(&self) -> Vec<ParameterSet> {
        let mut combos = vec![ParameterSet::new()];
        for (name, values) in &self.0 {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for &value in values {
                    next.push(combo.clone().with(name, value));
                }
            }
            combos = next;
        }
        combos
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait SignalStrategy: Sync {
    /// One signal per bar; missing trailing signals are read as flat.
    fn signals(&self, bars: &[OhlcvBar], params: &ParameterSet) -> Vec<Signal>;
}

impl<F> SignalStrategy for F
where
    F: Fn(&[OhlcvBar], &ParameterSet) -> Vec<Signal> + Sync,
{
    fn signals(&self, bars: &[OhlcvBar], params: &ParameterSet) -> Vec<Signal> {
        self(bars, params)
    }
}

/// Long while the `fast` simple moving average of closes is above the `slow`
/// one; short below it when `allow_short` is set, flat otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct SmaCrossover {
    pub allow_short: bool,
}

impl SmaCrossover {
    pub const DEFAULT_FAST: f64 = 10.0;
    pub const DEFAULT_SLOW: f64 = 30.0;
}

impl SignalStrategy for SmaCrossover {
    fn signals(&self, bars: &[OhlcvBar], params: &ParameterSet) -> Vec<Signal> {
        let fast = params.get_or("fast", Self::DEFAULT_FAST).round().max(1.0) as usize;
        let slow = params.get_or("slow", Self::DEFAULT_SLOW).round().max(1.0) as usize;
        if fast >= slow {
            warn!("sma crossover: fast period {fast} is not below slow period {slow}");
            return vec![Signal::Flat; bars.len()];
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast_sma = rolling_mean(&closes, fast);
        let slow_sma = rolling_mean(&closes, slow);

        fast_sma
            .iter()
            .zip(&slow_sma)
            .map(|(f, s)| match (f, s) {
                (Some(f), Some(s)) if f > s => Signal::Long,
                (Some(f), Some(s)) if f < s && self.allow_short => Signal::Short,
                _ => Signal::Flat,
            })
            .collect()
    }
}

fn rolling_mean(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        out.push(if i + 1 >= period {
            Some(sum / period as f64)
        } else {
            None
        });
    }
    out
}
