//! INI configuration adapter over `configparser`.
//!
//! Section and key names are case-insensitive. Values are returned as written;
//! typed parsing lives in [`ConfigPort`]'s provided methods so a malformed
//! value surfaces as an error instead of silently becoming a default.

use crate::domain::error::QuantGuardError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    ini: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QuantGuardError> {
        let path = path.as_ref();
        let mut ini = Ini::new();
        ini.load(path).map_err(|reason| QuantGuardError::ConfigParse {
            file: path.display().to_string(),
            reason,
        })?;
        Ok(FileConfigAdapter { ini })
    }

    pub fn from_string(content: &str) -> Result<Self, QuantGuardError> {
        let mut ini = Ini::new();
        ini.read(content.to_string())
            .map_err(|reason| QuantGuardError::ConfigParse {
                file: "<inline>".to_string(),
                reason,
            })?;
        Ok(FileConfigAdapter { ini })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.ini.get(section, key)
    }

    fn sections(&self) -> Vec<String> {
        self.ini.sections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn scenario_sections_keep_dotted_names() {
        let content = r#"
[engine]
confidence_levels = 0.95, 0.99

[scenario.flash_crash]
description = Flash Crash (May 2010)
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("engine", "confidence_levels"),
            Some("0.95, 0.99".to_string())
        );
        assert_eq!(
            adapter.get_string("scenario.flash_crash", "description"),
            Some("Flash Crash (May 2010)".to_string())
        );
        assert_eq!(adapter.get_string("engine", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn names_are_case_insensitive() {
        let adapter =
            FileConfigAdapter::from_string("[Risk]\nMax_Drawdown = 0.15\n[Scenario.Crash]\nb = 2\n")
                .unwrap();
        assert_eq!(adapter.get_f64("risk", "max_drawdown").unwrap(), Some(0.15));
        let mut sections = adapter.sections();
        sections.sort();
        assert_eq!(sections, vec!["risk", "scenario.crash"]);
    }

    #[test]
    fn numbers_parse_strictly() {
        let adapter = FileConfigAdapter::from_string(
            "[backtest]\ninitial_capital = 100000.5\nbad = lots\ninf = inf\n[risk]\nmax_positions = 5\nneg = -1\n",
        )
        .unwrap();
        assert_eq!(adapter.get_f64("backtest", "initial_capital").unwrap(), Some(100_000.5));
        assert_eq!(adapter.get_f64("backtest", "missing").unwrap(), None);
        assert_eq!(adapter.get_u64("risk", "max_positions").unwrap(), Some(5));

        for (section, key) in [("backtest", "bad"), ("backtest", "inf")] {
            match adapter.get_f64(section, key) {
                Err(QuantGuardError::ConfigInvalid { key: k, .. }) => assert_eq!(k, key),
                other => panic!("expected {key} to be rejected, got {other:?}"),
            }
        }
        assert!(matches!(
            adapter.get_u64("risk", "neg"),
            Err(QuantGuardError::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn from_file_reads_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[optimizer]\nrisk_aversion = 3.0\n").unwrap();
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_f64("optimizer", "risk_aversion").unwrap(), Some(3.0));
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(result, Err(QuantGuardError::ConfigParse { .. })));
    }
}
