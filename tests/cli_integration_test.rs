//! CLI integration tests.
//!
//! Tests cover:
//! - Argument parsing for every command
//! - Helper parsing (assignments, sizing, stop placement)
//! - Each command run against CSV/INI files on disk
//! - Exit codes for config, data and walk-forward errors

mod common;

use clap::Parser;
use common::*;
use quantguard::cli::{self, Cli, Command};
use quantguard::domain::config_validation::QuantGuardConfig;
use quantguard::domain::governor::StopMethod;
use quantguard::domain::optimizer::OptimizationMethod;
use std::path::Path;
use std::process::ExitCode;
use tempfile::TempDir;

const VALID_INI: &str = r#"
[risk]
max_risk_per_trade = 0.01
max_drawdown = 0.2

[engine]
confidence_levels = 0.95, 0.99
seed = 7

[backtest]
initial_capital = 50000
commission = 0.0005
seed = 11

[scenario.rate_shock]
description = Rate shock
market_drop = -0.12
volatility_spike = 2.5
duration_days = 20
"#;

// ExitCode has no PartialEq, so compare the Debug form.
fn assert_exit(code: ExitCode, expected: u8) {
    assert_eq!(
        format!("{:?}", code),
        format!("{:?}", ExitCode::from(expected)),
        "unexpected exit code"
    );
}

fn run(args: &[&str]) -> ExitCode {
    let mut argv = vec!["quantguard"];
    argv.extend_from_slice(args);
    cli::run(Cli::try_parse_from(argv).unwrap())
}

fn data_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    let closes = prices_from_returns(100.0, &normal_returns(21, 399, 0.0003, 0.012));
    write_bars_csv(dir.path(), "AAA", &make_bars("AAA", &closes));
    write_bars_csv(dir.path(), "WAVE", &make_bars("WAVE", &zigzag_closes(10, 20)));
    write_table_csv(dir.path(), "returns", &["A", "B", "C"], &three_asset_rows());
    dir
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

mod parsing {
    use super::*;

    #[test]
    fn optimize_parses_method_and_repeated_views() {
        let cli = Cli::try_parse_from([
            "quantguard",
            "optimize",
            "--table",
            "returns",
            "--method",
            "black-litterman",
            "--cap",
            "A=3",
            "--cap",
            "B=1",
            "--view",
            "A=0.1",
        ])
        .unwrap();
        match cli.command {
            Command::Optimize {
                method, caps, views, ..
            } => {
                assert_eq!(method, OptimizationMethod::BlackLitterman);
                assert_eq!(caps, vec!["A=3", "B=1"]);
                assert_eq!(views, vec!["A=0.1"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn walk_forward_grids_split_on_commas() {
        let cli = Cli::try_parse_from([
            "quantguard",
            "walk-forward",
            "--symbol",
            "AAA",
            "--fast",
            "3,5,8",
        ])
        .unwrap();
        match cli.command {
            Command::WalkForward {
                fast,
                slow,
                train,
                test,
                step,
                ..
            } => {
                assert_eq!(fast, vec![3.0, 5.0, 8.0]);
                assert_eq!(slow, vec![20.0, 30.0]);
                assert_eq!((train, test, step), (252, 63, 21));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let result = Cli::try_parse_from(["quantguard", "optimize", "--table", "t", "--method", "magic"]);
        assert!(result.is_err());
    }

    #[test]
    fn backtest_resample_flag_takes_optional_count() {
        let cli = Cli::try_parse_from(["quantguard", "backtest", "--symbol", "AAA", "--resample"]).unwrap();
        match cli.command {
            Command::Backtest { resample, .. } => assert_eq!(resample, Some(10_000)),
            other => panic!("unexpected command {other:?}"),
        }
    }
}

mod helpers {
    use super::*;
    use quantguard::domain::governor::SizingMethod;
    use quantguard::domain::trade::Side;

    #[test]
    fn assignments_parse_pairs() {
        let parsed = cli::parse_assignments(&["A = 1.5".to_string(), "B=-0.2".to_string()]).unwrap();
        assert_eq!(parsed.get("A"), Some(&1.5));
        assert_eq!(parsed.get("B"), Some(&-0.2));
        assert!(cli::parse_assignments(&["A:1".to_string()]).is_err());
        assert!(cli::parse_assignments(&["A=x".to_string()]).is_err());
    }

    #[test]
    fn sizing_names() {
        assert_eq!(cli::parse_sizing("fixed").unwrap(), SizingMethod::Fixed);
        assert_eq!(cli::parse_sizing("Half_Kelly").unwrap(), SizingMethod::HalfKelly);
        assert!(cli::parse_sizing("martingale").is_err());
    }

    #[test]
    fn current_drawdown_from_peak() {
        assert!((cli::current_drawdown(&[100.0, 120.0, 90.0]) - (-0.25)).abs() < 1e-12);
        assert_eq!(cli::current_drawdown(&[100.0, 110.0]), 0.0);
        assert_eq!(cli::current_drawdown(&[]), 0.0);
    }

    #[test]
    fn missing_config_path_means_defaults() {
        assert_eq!(cli::load_config(None).unwrap(), QuantGuardConfig::default());
    }

    fn plan(atr: Option<f64>, symbol: Option<&str>, dir: &Path) -> cli::PlanRequest {
        cli::PlanRequest {
            entry: 100.0,
            side: Side::Long,
            balance: 10_000.0,
            peak: 10_000.0,
            open_positions: 0,
            daily_pnl: 0.0,
            stop_pct: 0.03,
            atr,
            symbol: symbol.map(str::to_string),
            data_dir: dir.to_path_buf(),
            atr_multiplier: 2.0,
            confidence: 0.6,
            sizing: "fixed".to_string(),
        }
    }

    #[test]
    fn plan_stop_prefers_explicit_atr_then_bars() {
        let dir = data_dir();
        assert_eq!(
            cli::plan_stop(&plan(None, None, dir.path())).unwrap(),
            StopMethod::Percent(0.03)
        );
        assert_eq!(
            cli::plan_stop(&plan(Some(1.2), Some("AAA"), dir.path())).unwrap(),
            StopMethod::Atr {
                atr: 1.2,
                multiplier: 2.0
            }
        );
        match cli::plan_stop(&plan(None, Some("AAA"), dir.path())).unwrap() {
            StopMethod::Atr { atr, multiplier } => {
                assert!(atr > 0.0);
                assert_eq!(multiplier, 2.0);
            }
            other => panic!("expected ATR stop, got {other:?}"),
        }
    }
}

mod commands {
    use super::*;

    #[test]
    fn risk_project_and_stress_succeed() {
        let dir = data_dir();
        let ini = write_temp_ini(VALID_INI);
        let d = path_str(dir.path());
        let c = path_str(ini.path());

        assert_exit(run(&["risk", "-d", d, "-c", c, "--symbol", "AAA"]), 0);
        assert_exit(
            run(&["project", "-d", d, "--symbol", "AAA", "--days", "10", "--simulations", "500"]),
            0,
        );
        assert_exit(run(&["stress", "-d", d, "-c", c, "--symbol", "AAA"]), 0);
    }

    #[test]
    fn projection_with_bad_confidence_is_a_data_error() {
        let dir = data_dir();
        let d = path_str(dir.path());
        assert_exit(
            run(&["project", "-d", d, "--symbol", "AAA", "--confidence", "1.5"]),
            3,
        );
    }

    #[test]
    fn missing_symbol_is_a_data_error() {
        let dir = data_dir();
        assert_exit(run(&["risk", "-d", path_str(dir.path()), "--symbol", "ZZZ"]), 3);
    }

    #[test]
    fn date_filter_that_removes_everything_is_insufficient() {
        let dir = data_dir();
        assert_exit(
            run(&[
                "risk",
                "-d",
                path_str(dir.path()),
                "--symbol",
                "AAA",
                "--start",
                "2030-01-01",
            ]),
            3,
        );
    }

    #[test]
    fn optimize_every_method() {
        let dir = data_dir();
        let d = path_str(dir.path());
        for method in ["max-sharpe", "min-variance", "risk-parity", "hrp"] {
            assert_exit(run(&["optimize", "-d", d, "--table", "returns", "--method", method]), 0);
        }
        assert_exit(
            run(&[
                "optimize", "-d", d, "--table", "returns", "--method", "bl", "--cap", "A=3", "--cap",
                "B=2", "--cap", "C=1", "--view", "B=0.15",
            ]),
            0,
        );
        assert_exit(
            run(&["optimize", "-d", d, "--table", "returns", "--frontier", "5"]),
            0,
        );
    }

    #[test]
    fn optimize_rejects_malformed_caps() {
        let dir = data_dir();
        assert_exit(
            run(&[
                "optimize",
                "-d",
                path_str(dir.path()),
                "--table",
                "returns",
                "--method",
                "black-litterman",
                "--cap",
                "A:3",
            ]),
            3,
        );
    }

    #[test]
    fn target_return_only_with_min_variance() {
        let dir = data_dir();
        let d = path_str(dir.path());
        let target = ["--table", "returns", "--target-return", "0.1"];
        let mut args = vec!["optimize", "-d", d, "--method", "risk-parity"];
        args.extend_from_slice(&target);
        assert_exit(run(&args), 3);

        let mut args = vec!["optimize", "-d", d];
        args.extend_from_slice(&target);
        assert_exit(run(&args), 3);
    }

    #[test]
    fn backtest_with_resampling() {
        let dir = data_dir();
        let ini = write_temp_ini(VALID_INI);
        assert_exit(
            run(&[
                "backtest",
                "-d",
                path_str(dir.path()),
                "-c",
                path_str(ini.path()),
                "--symbol",
                "WAVE",
                "--fast",
                "3",
                "--slow",
                "10",
                "--resample",
                "200",
            ]),
            0,
        );
    }

    #[test]
    fn walk_forward_runs_and_reports_setup_errors() {
        let dir = data_dir();
        let d = path_str(dir.path());

        assert_exit(
            run(&[
                "walk-forward", "-d", d, "--symbol", "WAVE", "--fast", "2,4", "--slow", "8,12",
                "--train", "150", "--test", "50", "--step", "50",
            ]),
            0,
        );
        assert_exit(
            run(&["walk-forward", "-d", d, "--symbol", "WAVE", "--step", "0"]),
            4,
        );
        assert_exit(
            run(&["walk-forward", "-d", d, "--symbol", "WAVE", "--train", "500", "--test", "100"]),
            3,
        );
    }

    #[test]
    fn plan_sizes_and_blocks() {
        let dir = data_dir();
        let d = path_str(dir.path());
        assert_exit(
            run(&["plan", "--entry", "100", "--balance", "10000", "--side", "short"]),
            0,
        );
        assert_exit(
            run(&[
                "plan", "--entry", "100", "--balance", "10000", "--symbol", "AAA", "-d", d,
                "--sizing", "half-kelly",
            ]),
            0,
        );
        assert_exit(
            run(&["plan", "--entry", "100", "--balance", "8000", "--peak", "10000"]),
            0,
        );
        assert_exit(
            run(&["plan", "--entry", "100", "--balance", "10000", "--sizing", "doubling"]),
            3,
        );
    }

    #[test]
    fn validate_reports_config_errors() {
        let good = write_temp_ini(VALID_INI);
        assert_exit(run(&["validate", "-c", path_str(good.path())]), 0);

        let bad = write_temp_ini("[risk]\nmax_drawdown = 1.5\n");
        assert_exit(run(&["validate", "-c", path_str(bad.path())]), 2);

        let unparsable = write_temp_ini("[backtest]\ninitial_capital = lots\n");
        assert_exit(run(&["validate", "-c", path_str(unparsable.path())]), 2);

        assert_exit(run(&["validate", "-c", "/nonexistent/quantguard.ini"]), 2);
    }

    #[test]
    fn list_symbols_in_data_dir() {
        let dir = data_dir();
        assert_exit(run(&["list-symbols", "-d", path_str(dir.path())]), 0);
        assert_exit(run(&["list-symbols", "-d", "/nonexistent/data"]), 3);
    }
}
