//! Configuration access port trait.

use crate::domain::error::QuantGuardError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// Section names, lowercased, in no particular order.
    fn sections(&self) -> Vec<String>;

    /// `Ok(None)` when the key is absent; a present value must be a finite number.
    fn get_f64(&self, section: &str, key: &str) -> Result<Option<f64>, QuantGuardError> {
        self.get_string(section, key)
            .map(|raw| {
                raw.trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| invalid_value(section, key, &raw, "a finite number"))
            })
            .transpose()
    }

    /// `Ok(None)` when the key is absent; a present value must be a
    /// non-negative integer.
    fn get_u64(&self, section: &str, key: &str) -> Result<Option<u64>, QuantGuardError> {
        self.get_string(section, key)
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .map_err(|_| invalid_value(section, key, &raw, "a non-negative integer"))
            })
            .transpose()
    }
}

fn invalid_value(section: &str, key: &str, raw: &str, expected: &str) -> QuantGuardError {
    QuantGuardError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: format!("{raw:?} is not {expected}"),
    }
}
