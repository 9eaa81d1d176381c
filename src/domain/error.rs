//! Domain error types.
//!
//! Two policies coexist: configuration and limits fail fast with
//! [`QuantGuardError`], while numerical routines degrade to neutral values and
//! only report genuinely unsatisfiable requests through [`OptimizationError`].

/// Top-level error type for quantguard.
#[derive(Debug, thiserror::Error)]
pub enum QuantGuardError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("invalid risk limit {field}: {reason}")]
    InvalidLimit { field: &'static str, reason: String },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("insufficient data: have {have} rows, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("invalid walk-forward setup: {reason}")]
    InvalidWalkForward { reason: String },

    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error(transparent)]
    Trade(#[from] TradeRecordError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&QuantGuardError> for std::process::ExitCode {
    fn from(err: &QuantGuardError) -> Self {
        let code: u8 = match err {
            QuantGuardError::Io(_) => 1,
            QuantGuardError::ConfigParse { .. }
            | QuantGuardError::ConfigMissing { .. }
            | QuantGuardError::ConfigInvalid { .. }
            | QuantGuardError::InvalidLimit { .. } => 2,
            QuantGuardError::Data { .. }
            | QuantGuardError::InsufficientData { .. }
            | QuantGuardError::Trade(_) => 3,
            QuantGuardError::InvalidWalkForward { .. } => 4,
            QuantGuardError::Optimization(_) => 5,
        };
        std::process::ExitCode::from(code)
    }
}

/// Reasons a portfolio optimization cannot produce weights.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OptimizationError {
    #[error("return matrix has no assets")]
    NoAssets,

    #[error("target return {target:.6} outside achievable range [{min:.6}, {max:.6}]")]
    Infeasible { target: f64, min: f64, max: f64 },

    #[error("solver did not converge after {iterations} iterations (residual {residual:.3e})")]
    NotConverged { iterations: usize, residual: f64 },
}

/// A trade record that would violate its own invariants.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeRecordError {
    #[error("exit time precedes entry time")]
    ExitBeforeEntry,

    #[error("quantity must be positive and finite, got {0}")]
    InvalidQuantity(f64),

    #[error("prices must be positive and finite")]
    InvalidPrice,
}
