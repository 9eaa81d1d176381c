//! Stress-test scenario table and outcome type.
//!
//! Scenarios are configuration, not state: [`StressScenario::historical`] is the
//! default crisis table and callers may supply their own.

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StressScenario {
    pub name: String,
    pub description: String,
    /// Instantaneous market move added to the scaled returns (e.g. -0.57).
    pub market_drop: f64,
    /// Multiplier applied to every historical return.
    pub volatility_spike: f64,
    pub duration_days: u32,
}

impl StressScenario {
    pub fn new(
        name: &str,
        description: &str,
        market_drop: f64,
        volatility_spike: f64,
        duration_days: u32,
    ) -> Self {
        StressScenario {
            name: name.to_string(),
            description: description.to_string(),
            market_drop,
            volatility_spike,
            duration_days,
        }
    }

    pub fn historical() -> Vec<StressScenario> {
        vec![
            StressScenario::new(
                "dot_com_crash_2000",
                "Dot-com Crash (2000-2002)",
                -0.49,
                3.0,
                900,
            ),
            StressScenario::new(
                "financial_crisis_2008",
                "Financial Crisis (2008)",
                -0.57,
                4.0,
                500,
            ),
            StressScenario::new(
                "flash_crash_2010",
                "Flash Crash (May 2010)",
                -0.09,
                10.0,
                1,
            ),
            StressScenario::new(
                "covid_crash_2020",
                "COVID-19 Crash (March 2020)",
                -0.34,
                5.0,
                30,
            ),
            StressScenario::new(
                "crypto_winter_2022",
                "Crypto Winter (2022)",
                -0.75,
                6.0,
                365,
            ),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StressTestOutcome {
    pub scenario: String,
    pub description: String,
    pub portfolio_impact: f64,
    pub stressed_var_95: f64,
    pub stressed_cvar_95: f64,
    pub max_drawdown: f64,
    /// True iff the portfolio impact is above -100%.
    pub survives: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_table_has_five_crises() {
        let scenarios = StressScenario::historical();
        assert_eq!(scenarios.len(), 5);
        assert!(scenarios.iter().all(|s| s.market_drop < 0.0));
        assert!(scenarios.iter().all(|s| s.volatility_spike >= 1.0));
        let gfc = scenarios
            .iter()
            .find(|s| s.name == "financial_crisis_2008")
            .unwrap();
        assert!((gfc.market_drop - (-0.57)).abs() < f64::EPSILON);
        assert_eq!(gfc.duration_days, 500);
    }
}
