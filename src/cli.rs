//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::backtest::{BacktestResult, Backtester};
use crate::domain::config_validation::{load_all, QuantGuardConfig};
use crate::domain::error::QuantGuardError;
use crate::domain::governor::{RiskGovernor, SizingMethod, StopMethod};
use crate::domain::monte_carlo::DEFAULT_RESAMPLE_SIMULATIONS;
use crate::domain::ohlcv::{average_true_range, closes, simple_returns, OhlcvBar};
use crate::domain::optimizer::{
    MarkowitzObjective, OptimizationMethod, OptimizationResult, PortfolioOptimizer, ReturnMatrix,
};
use crate::domain::risk_engine::StatisticalRiskEngine;
use crate::domain::strategy::{ParamGrid, ParameterSet, SmaCrossover};
use crate::domain::trade::Side;
use crate::domain::walk_forward::{DEFAULT_STEP, DEFAULT_TEST_PERIOD, DEFAULT_TRAIN_PERIOD};
use crate::ports::data_port::DataPort;

/// ATR lookback used when `plan` derives its stop from bars.
const DEFAULT_ATR_PERIOD: usize = 14;

#[derive(Parser, Debug)]
#[command(
    name = "quantguard",
    about = "Risk analytics, portfolio optimization and strategy backtesting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Where market data and configuration come from.
#[derive(Args, Debug, Clone)]
pub struct Source {
    /// Directory holding `<SYMBOL>.csv` files
    #[arg(short, long, default_value = ".")]
    pub data_dir: PathBuf,
    /// INI configuration; built-in defaults apply when omitted
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub start: Option<NaiveDate>,
    #[arg(long)]
    pub end: Option<NaiveDate>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// VaR/CVaR table and risk metrics for one symbol
    Risk {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        symbol: String,
    },
    /// Monte Carlo projection of a symbol's price
    Project {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = 30)]
        days: usize,
        #[arg(long, default_value_t = 10_000)]
        simulations: usize,
        #[arg(long, default_value_t = 0.95)]
        confidence: f64,
    },
    /// Replay a symbol's returns through the configured stress scenarios
    Stress {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        symbol: String,
    },
    /// Optimize weights over the assets of a returns table
    Optimize {
        #[command(flatten)]
        source: Source,
        /// Table name, read from `<data-dir>/<TABLE>.csv`
        #[arg(long)]
        table: String,
        /// max-sharpe, min-variance, black-litterman, risk-parity or hrp
        #[arg(long, default_value = "max-sharpe")]
        method: OptimizationMethod,
        /// The table holds prices rather than returns
        #[arg(long)]
        prices: bool,
        /// Annualized return the minimum-variance portfolio must reach;
        /// rejected for other methods
        #[arg(long)]
        target_return: Option<f64>,
        /// Market capitalization, repeatable
        #[arg(long = "cap", value_name = "ASSET=VALUE")]
        caps: Vec<String>,
        /// Absolute annualized return view, repeatable
        #[arg(long = "view", value_name = "ASSET=RETURN")]
        views: Vec<String>,
        #[arg(long, default_value_t = 0.5)]
        view_confidence: f64,
        /// Also trace this many efficient-frontier points
        #[arg(long, default_value_t = 0)]
        frontier: usize,
    },
    /// Backtest an SMA crossover on one symbol
    Backtest {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value_t = SmaCrossover::DEFAULT_FAST)]
        fast: f64,
        #[arg(long, default_value_t = SmaCrossover::DEFAULT_SLOW)]
        slow: f64,
        #[arg(long)]
        allow_short: bool,
        /// Resample the closed trades this many times
        #[arg(long, num_args = 0..=1, default_missing_value = "10000")]
        resample: Option<usize>,
    },
    /// Walk-forward optimization of an SMA crossover
    WalkForward {
        #[command(flatten)]
        source: Source,
        #[arg(long)]
        symbol: String,
        #[arg(long, value_delimiter = ',', default_values_t = [5.0, 10.0])]
        fast: Vec<f64>,
        #[arg(long, value_delimiter = ',', default_values_t = [20.0, 30.0])]
        slow: Vec<f64>,
        #[arg(long, default_value_t = DEFAULT_TRAIN_PERIOD)]
        train: usize,
        #[arg(long, default_value_t = DEFAULT_TEST_PERIOD)]
        test: usize,
        #[arg(long, default_value_t = DEFAULT_STEP)]
        step: usize,
        #[arg(long)]
        allow_short: bool,
    },
    /// Size and check one trade through the risk governor
    Plan {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        entry: f64,
        /// long or short
        #[arg(long, default_value = "long")]
        side: Side,
        /// Current account equity
        #[arg(long)]
        balance: f64,
        /// Equity high-water mark; defaults to the balance
        #[arg(long)]
        peak: Option<f64>,
        #[arg(long, default_value_t = 0)]
        open_positions: usize,
        /// Today's P&L as a fraction of equity
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        daily_pnl: f64,
        /// Stop distance as a fraction of entry
        #[arg(long, default_value_t = 0.02)]
        stop_pct: f64,
        /// Place the stop at ATR × multiplier instead
        #[arg(long)]
        atr: Option<f64>,
        /// Take the ATR from this symbol's bars in the data directory
        #[arg(long)]
        symbol: Option<String>,
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,
        #[arg(long, default_value_t = 2.0)]
        atr_multiplier: f64,
        #[arg(long, default_value_t = 0.6)]
        confidence: f64,
        /// fixed, kelly or half-kelly
        #[arg(long, default_value = "fixed")]
        sizing: String,
    },
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List symbols available in a data directory
    ListSymbols {
        #[arg(short, long, default_value = ".")]
        data_dir: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Risk { source, symbol } => run_risk(&source, &symbol),
        Command::Project {
            source,
            symbol,
            days,
            simulations,
            confidence,
        } => run_project(&source, &symbol, days, simulations, confidence),
        Command::Stress { source, symbol } => run_stress(&source, &symbol),
        Command::Optimize {
            source,
            table,
            method,
            prices,
            target_return,
            caps,
            views,
            view_confidence,
            frontier,
        } => run_optimize(
            &source,
            &OptimizeRequest {
                table,
                method,
                prices,
                target_return,
                caps,
                views,
                view_confidence,
                frontier,
            },
        ),
        Command::Backtest {
            source,
            symbol,
            fast,
            slow,
            allow_short,
            resample,
        } => run_backtest(&source, &symbol, fast, slow, allow_short, resample),
        Command::WalkForward {
            source,
            symbol,
            fast,
            slow,
            train,
            test,
            step,
            allow_short,
        } => run_walk_forward(
            &source,
            &symbol,
            &ParamGrid::new().with("fast", fast).with("slow", slow),
            (train, test, step),
            allow_short,
        ),
        Command::Plan {
            config,
            entry,
            side,
            balance,
            peak,
            open_positions,
            daily_pnl,
            stop_pct,
            atr,
            symbol,
            data_dir,
            atr_multiplier,
            confidence,
            sizing,
        } => run_plan(
            config.as_deref(),
            &PlanRequest {
                entry,
                side,
                balance,
                peak: peak.unwrap_or(balance),
                open_positions,
                daily_pnl,
                stop_pct,
                atr,
                symbol,
                data_dir,
                atr_multiplier,
                confidence,
                sizing,
            },
        ),
        Command::Validate { config } => run_validate(&config),
        Command::ListSymbols { data_dir } => run_list_symbols(&data_dir),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Validated configuration from `path`, or the built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<QuantGuardConfig, QuantGuardError> {
    match path {
        Some(path) => {
            eprintln!("Loading config from {}", path.display());
            let adapter = FileConfigAdapter::from_file(path)?;
            load_all(&adapter)
        }
        None => Ok(QuantGuardConfig::default()),
    }
}

/// Parses repeated `ASSET=VALUE` arguments.
pub fn parse_assignments(pairs: &[String]) -> Result<BTreeMap<String, f64>, QuantGuardError> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        let (asset, value) = pair.split_once('=').ok_or_else(|| QuantGuardError::Data {
            reason: format!("expected ASSET=VALUE, got {pair:?}"),
        })?;
        let value: f64 = value.trim().parse().map_err(|_| QuantGuardError::Data {
            reason: format!("invalid number in {pair:?}"),
        })?;
        out.insert(asset.trim().to_string(), value);
    }
    Ok(out)
}

pub fn parse_sizing(name: &str) -> Result<SizingMethod, QuantGuardError> {
    match name.trim().to_lowercase().replace('_', "-").as_str() {
        "fixed" => Ok(SizingMethod::Fixed),
        "kelly" => Ok(SizingMethod::Kelly),
        "half-kelly" => Ok(SizingMethod::HalfKelly),
        other => Err(QuantGuardError::Data {
            reason: format!("unknown sizing method: {other}"),
        }),
    }
}

fn load_bars(source: &Source, symbol: &str) -> Result<Vec<OhlcvBar>, QuantGuardError> {
    let adapter = CsvAdapter::new(source.data_dir.clone());
    let bars = adapter.fetch_bars(symbol, source.start, source.end)?;
    if bars.is_empty() {
        return Err(QuantGuardError::InsufficientData { have: 0, need: 1 });
    }
    eprintln!("Loaded {} bars for {}", bars.len(), symbol);
    Ok(bars)
}

fn load_returns(source: &Source, symbol: &str) -> Result<(Vec<OhlcvBar>, Vec<f64>), QuantGuardError> {
    let bars = load_bars(source, symbol)?;
    let returns = simple_returns(&closes(&bars));
    if returns.len() < 2 {
        return Err(QuantGuardError::InsufficientData {
            have: bars.len(),
            need: 3,
        });
    }
    Ok((bars, returns))
}

fn run_risk(source: &Source, symbol: &str) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let (bars, returns) = load_returns(source, symbol)?;
    let engine = StatisticalRiskEngine::new(config.engine.clone());

    eprintln!("\n{:<8} {:<12} {:>10} {:>10}", "Conf", "Method", "VaR", "CVaR");
    for row in engine.risk_report(&returns) {
        eprintln!(
            "{:<8} {:<12} {:>9.2}% {:>9.2}%",
            format!("{:.1}%", row.confidence_level * 100.0),
            row.method.to_string(),
            row.var * 100.0,
            row.cvar * 100.0
        );
    }

    if let Some(m) = engine.portfolio_risk_metrics(&returns) {
        eprintln!("\nRisk metrics:");
        eprintln!("  Annual return:     {:.2}%", m.annual_return * 100.0);
        eprintln!("  Annual volatility: {:.2}%", m.annual_volatility * 100.0);
        eprintln!("  Sharpe ratio:      {:.4}", m.sharpe_ratio);
        eprintln!("  Sortino ratio:     {:.4}", m.sortino_ratio);
        eprintln!("  Calmar ratio:      {:.4}", m.calmar_ratio);
        eprintln!("  Max drawdown:      {:.2}%", m.max_drawdown * 100.0);
        eprintln!("  Skewness:          {:.4}", m.skewness);
        eprintln!("  Excess kurtosis:   {:.4}", m.kurtosis);
    }

    let last_return = returns.last().copied().unwrap_or(0.0).min(0.0);
    let breaker = engine.circuit_breaker_check(
        current_drawdown(&closes(&bars)),
        config.limits.max_drawdown,
        last_return,
        config.limits.max_daily_loss,
    );
    if breaker.should_stop {
        eprintln!("\nCircuit breaker TRIPPED:");
        for reason in &breaker.reasons {
            eprintln!("  - {reason}");
        }
    } else {
        eprintln!("\nCircuit breaker: clear");
    }
    Ok(())
}

fn run_project(
    source: &Source,
    symbol: &str,
    days: usize,
    simulations: usize,
    confidence: f64,
) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let (bars, returns) = load_returns(source, symbol)?;
    let current_price = bars.last().map(|b| b.close).unwrap_or_default();
    let engine = StatisticalRiskEngine::new(config.engine);

    let projection = engine
        .monte_carlo_price_projection(current_price, &returns, simulations, days, confidence)
        .ok_or_else(|| QuantGuardError::Data {
            reason: "cannot project: need a positive price, simulations, days and a confidence in (0, 1)"
                .to_string(),
        })?;

    eprintln!("\nProjection over {days} days ({simulations} paths) from {current_price:.4}:");
    eprintln!("  Mean:    {:.4}", projection.mean_price);
    eprintln!("  Median:  {:.4}", projection.median_price);
    eprintln!("  Std:     {:.4}", projection.std_price);
    eprintln!(
        "  P5/P25/P75/P95: {:.4} / {:.4} / {:.4} / {:.4}",
        projection.percentile_5,
        projection.percentile_25,
        projection.percentile_75,
        projection.percentile_95
    );
    eprintln!(
        "  VaR {:.1}%: {:.2}%  CVaR: {:.2}%",
        confidence * 100.0,
        projection.var * 100.0,
        projection.cvar * 100.0
    );
    eprintln!("  P(profit): {:.1}%", projection.prob_profit * 100.0);
    Ok(())
}

fn run_stress(source: &Source, symbol: &str) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let (_, returns) = load_returns(source, symbol)?;
    let engine = StatisticalRiskEngine::new(config.engine);

    eprintln!(
        "\n{:<24} {:>10} {:>10} {:>10} {:>10}  Survives",
        "Scenario", "Impact", "VaR95", "CVaR95", "MaxDD"
    );
    for outcome in engine.stress_test(&returns, &config.scenarios) {
        eprintln!(
            "{:<24} {:>9.2}% {:>9.2}% {:>9.2}% {:>9.2}%  {}",
            outcome.scenario,
            outcome.portfolio_impact * 100.0,
            outcome.stressed_var_95 * 100.0,
            outcome.stressed_cvar_95 * 100.0,
            outcome.max_drawdown * 100.0,
            if outcome.survives { "yes" } else { "NO" }
        );
    }
    Ok(())
}

/// Arguments of the `optimize` command after clap.
#[derive(Debug, Clone)]
pub struct OptimizeRequest {
    pub table: String,
    pub method: OptimizationMethod,
    pub prices: bool,
    pub target_return: Option<f64>,
    pub caps: Vec<String>,
    pub views: Vec<String>,
    pub view_confidence: f64,
    pub frontier: usize,
}

/// Runs the requested optimization against a loaded returns table.
pub fn optimize(
    optimizer: &PortfolioOptimizer,
    returns: &ReturnMatrix,
    request: &OptimizeRequest,
) -> Result<OptimizationResult, QuantGuardError> {
    if request.target_return.is_some() && request.method != OptimizationMethod::MinVariance {
        return Err(QuantGuardError::Data {
            reason: format!(
                "--target-return applies to min-variance only, not {}",
                request.method
            ),
        });
    }
    let result = match request.method {
        OptimizationMethod::MaxSharpe => {
            optimizer.markowitz(returns, MarkowitzObjective::MaxSharpe, None)?
        }
        OptimizationMethod::MinVariance => {
            optimizer.markowitz(returns, MarkowitzObjective::MinVariance, request.target_return)?
        }
        OptimizationMethod::BlackLitterman => {
            let caps = parse_assignments(&request.caps)?;
            let views = parse_assignments(&request.views)?;
            optimizer.black_litterman(returns, &caps, &views, request.view_confidence)?
        }
        OptimizationMethod::RiskParity => optimizer.risk_parity(returns)?,
        OptimizationMethod::HierarchicalRiskParity => optimizer.hierarchical_risk_parity(returns)?,
    };
    Ok(result)
}

fn run_optimize(source: &Source, request: &OptimizeRequest) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let adapter = CsvAdapter::new(source.data_dir.clone());
    let table = adapter.fetch_table(&request.table)?;
    eprintln!(
        "Loaded {} rows for {} assets from {}",
        table.rows.len(),
        table.assets.len(),
        request.table
    );
    let returns = if request.prices {
        ReturnMatrix::from_prices(table.assets, &table.rows)?
    } else {
        ReturnMatrix::from_rows(table.assets, &table.rows)?
    };

    let optimizer = PortfolioOptimizer::new(config.optimizer);
    let result = optimize(&optimizer, &returns, request)?;

    eprintln!("\n{} portfolio:", result.method);
    if result.fallback {
        eprintln!("  (degenerate input, equal weights)");
    }
    for (asset, weight) in result.weights.iter() {
        eprintln!("  {:<12} {:>7.2}%", asset, weight * 100.0);
    }
    eprintln!("  Expected return: {:.2}%", result.expected_return * 100.0);
    eprintln!("  Volatility:      {:.2}%", result.volatility * 100.0);
    eprintln!("  Sharpe ratio:    {:.4}", result.sharpe_ratio);
    if let Some(residual) = result.residual {
        eprintln!("  Risk parity residual: {residual:.2e}");
    }

    if request.frontier > 0 {
        let points = optimizer.efficient_frontier(&returns, request.frontier)?;
        eprintln!("\nEfficient frontier ({} points):", points.len());
        eprintln!("  {:>10} {:>10}", "Return", "Vol");
        for p in &points {
            eprintln!(
                "  {:>9.2}% {:>9.2}%",
                p.target_return * 100.0,
                p.volatility * 100.0
            );
        }
    }
    Ok(())
}

fn print_result(result: &BacktestResult) {
    let m = &result.metrics;
    eprintln!("  Parameters:    {}", result.parameters);
    eprintln!("  Total return:  {:.2}%", m.total_return * 100.0);
    eprintln!("  Final equity:  {:.2}", result.final_equity());
    eprintln!("  Sharpe ratio:  {:.4}", m.sharpe_ratio);
    eprintln!("  Sortino ratio: {:.4}", m.sortino_ratio);
    eprintln!(
        "  Max drawdown:  {:.2}% over {} bars",
        m.max_drawdown * 100.0,
        m.max_drawdown_duration
    );
    eprintln!(
        "  Trades:        {} ({} won, {} lost, {} even)",
        result.num_trades(),
        m.trades_won,
        m.trades_lost,
        m.trades_breakeven
    );
    eprintln!("  Win rate:      {:.1}%", m.win_rate * 100.0);
    eprintln!("  Profit factor: {:.4}", m.profit_factor);
    eprintln!("  VaR/CVaR 95:   {:.2}% / {:.2}%", result.var_95 * 100.0, result.cvar_95 * 100.0);
}

fn run_backtest(
    source: &Source,
    symbol: &str,
    fast: f64,
    slow: f64,
    allow_short: bool,
    resample: Option<usize>,
) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let bars = load_bars(source, symbol)?;
    let backtester = Backtester::new(config.backtest)?;
    let params = ParameterSet::new().with("fast", fast).with("slow", slow);

    let result = backtester.run(&bars, &SmaCrossover { allow_short }, &params)?;
    eprintln!("\nBacktest of {symbol}:");
    print_result(&result);

    if let Some(n) = resample {
        let n = if n == 0 { DEFAULT_RESAMPLE_SIMULATIONS } else { n };
        match backtester.monte_carlo_trade_resample(&result.trades, n, 0.95) {
            Some(report) => {
                eprintln!("\nTrade resampling ({n} simulations):");
                eprintln!("  Mean return:   {:.2}%", report.mean_return * 100.0);
                eprintln!("  Median return: {:.2}%", report.median_return * 100.0);
                eprintln!(
                    "  95% interval:  {:.2}% .. {:.2}%",
                    report.ci_lower * 100.0,
                    report.ci_upper * 100.0
                );
                eprintln!("  P(profit):     {:.1}%", report.prob_profit * 100.0);
                eprintln!("  Worst DD:      {:.2}%", report.worst_drawdown * 100.0);
            }
            None => eprintln!("\nTrade resampling skipped: no closed trades"),
        }
    }
    Ok(())
}

fn run_walk_forward(
    source: &Source,
    symbol: &str,
    grid: &ParamGrid,
    (train, test, step): (usize, usize, usize),
    allow_short: bool,
) -> Result<(), QuantGuardError> {
    let config = load_config(source.config.as_deref())?;
    let bars = load_bars(source, symbol)?;
    let backtester = Backtester::new(config.backtest)?;

    eprintln!(
        "Walk-forward: {} combinations, train {train}, test {test}, step {step}",
        grid.len()
    );
    let report = backtester.walk_forward(&bars, &SmaCrossover { allow_short }, grid, train, test, step)?;

    eprintln!(
        "\n{:>3}  {:<10} {:<10}  {:<20} {:>9} {:>9}  Overfit",
        "#", "Test from", "Test to", "Parameters", "Return", "Sharpe"
    );
    for w in &report.windows {
        eprintln!(
            "{:>3}  {:<10} {:<10}  {:<20} {:>8.2}% {:>9.4}  {}",
            w.index,
            w.test_start.date(),
            w.test_end.date(),
            w.best_parameters.to_string(),
            w.test.metrics.total_return * 100.0,
            w.test.metrics.sharpe_ratio,
            w.overfitting.severity
        );
    }
    eprintln!("\nOut-of-sample summary ({} windows):", report.num_windows);
    eprintln!("  Avg return:   {:.2}%", report.avg_return * 100.0);
    eprintln!("  Avg Sharpe:   {:.4}", report.avg_sharpe);
    eprintln!("  Avg drawdown: {:.2}%", report.avg_drawdown * 100.0);
    eprintln!("  Total trades: {}", report.total_trades);
    Ok(())
}

/// Arguments of the `plan` command after clap.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub entry: f64,
    pub side: Side,
    pub balance: f64,
    pub peak: f64,
    pub open_positions: usize,
    pub daily_pnl: f64,
    pub stop_pct: f64,
    pub atr: Option<f64>,
    pub symbol: Option<String>,
    pub data_dir: PathBuf,
    pub atr_multiplier: f64,
    pub confidence: f64,
    pub sizing: String,
}

/// Stop placement for a plan: an explicit ATR, else the ATR of the symbol's
/// bars, else a percentage of entry.
pub fn plan_stop(request: &PlanRequest) -> Result<StopMethod, QuantGuardError> {
    let atr = match (request.atr, &request.symbol) {
        (Some(atr), _) => Some(atr),
        (None, Some(symbol)) => {
            let adapter = CsvAdapter::new(request.data_dir.clone());
            let bars = adapter.fetch_bars(symbol, None, None)?;
            let atr = average_true_range(&bars, DEFAULT_ATR_PERIOD).ok_or(
                QuantGuardError::InsufficientData {
                    have: bars.len(),
                    need: DEFAULT_ATR_PERIOD,
                },
            )?;
            eprintln!("ATR({DEFAULT_ATR_PERIOD}) of {symbol}: {atr:.5}");
            Some(atr)
        }
        (None, None) => None,
    };
    Ok(match atr {
        Some(atr) => StopMethod::Atr {
            atr,
            multiplier: request.atr_multiplier,
        },
        None => StopMethod::Percent(request.stop_pct),
    })
}

fn run_plan(config_path: Option<&Path>, request: &PlanRequest) -> Result<(), QuantGuardError> {
    let config = load_config(config_path)?;
    let sizing = parse_sizing(&request.sizing)?;
    let stop = plan_stop(request)?;
    let (entry, side, balance) = (request.entry, request.side, request.balance);

    let mut governor = RiskGovernor::new(config.limits)?;
    governor.update_state(balance, request.peak, request.open_positions, request.daily_pnl);

    let gate = governor.can_trade();
    if !gate.allowed {
        eprintln!("Trading blocked ({}): {}", governor.mode(), gate.reason);
        return Ok(());
    }

    let stop_loss = governor.stop_loss(entry, side, stop);
    let take_profit = governor.take_profit(entry, stop_loss, side, None);
    let validation = governor.validate_trade_parameters(entry, stop_loss, take_profit, side);
    let size = governor.position_size(balance, entry, stop_loss, request.confidence, sizing);
    let risk = size * (entry - stop_loss).abs();

    eprintln!("\n{side} trade at {entry:.5} (governor {}):", governor.mode());
    eprintln!("  Stop loss:   {stop_loss:.5}");
    eprintln!("  Take profit: {take_profit:.5}");
    eprintln!("  Size:        {size:.4} units ({:.2} notional)", size * entry);
    eprintln!("  Risk:        {risk:.2} ({:.2}% of balance)", risk / balance * 100.0);
    if validation.valid {
        eprintln!("  Checks:      OK");
    } else {
        eprintln!("  Checks:      REJECTED ({})", validation.reason);
    }
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<(), QuantGuardError> {
    let config = load_config(Some(config_path))?;
    let l = &config.limits;
    eprintln!("\nRisk limits:");
    eprintln!("  max_risk_per_trade     = {}", l.max_risk_per_trade);
    eprintln!("  max_drawdown           = {}", l.max_drawdown);
    eprintln!("  max_positions          = {}", l.max_positions);
    eprintln!("  max_daily_loss         = {}", l.max_daily_loss);
    eprintln!("  max_consecutive_losses = {}", l.max_consecutive_losses);
    eprintln!("  min_risk_reward_ratio  = {}", l.min_risk_reward_ratio);

    let e = &config.engine;
    eprintln!("\nRisk engine:");
    eprintln!("  confidence_levels   = {:?}", e.confidence_levels);
    eprintln!("  monte_carlo_samples = {}", e.monte_carlo_samples);
    eprintln!("  seed                = {:?}", e.seed);

    let b = &config.backtest;
    eprintln!("\nBacktest:");
    eprintln!("  initial_capital   = {}", b.initial_capital);
    eprintln!("  commission        = {}", b.commission);
    eprintln!("  slippage          = {}", b.slippage);
    eprintln!("  position_fraction = {}", b.position_fraction);

    eprintln!("\nOptimizer:");
    eprintln!("  risk_free_rate = {}", config.optimizer.risk_free_rate);

    eprintln!("\nStress scenarios ({}):", config.scenarios.len());
    for s in &config.scenarios {
        eprintln!(
            "  {:<24} drop {:>6.1}%  vol x{:<5} {} days",
            s.name,
            s.market_drop * 100.0,
            s.volatility_spike,
            s.duration_days
        );
    }

    eprintln!("\nConfiguration is valid.");
    Ok(())
}

fn run_list_symbols(data_dir: &Path) -> Result<(), QuantGuardError> {
    let adapter = CsvAdapter::new(data_dir.to_path_buf());
    let symbols = adapter.list_symbols()?;
    if symbols.is_empty() {
        eprintln!("No symbols found in {}", data_dir.display());
    } else {
        for symbol in &symbols {
            println!("{}", symbol);
        }
    }
    Ok(())
}

/// Drawdown of the latest price from its running peak, as a fraction <= 0.
pub fn current_drawdown(prices: &[f64]) -> f64 {
    match (prices.iter().copied().reduce(f64::max), prices.last()) {
        (Some(peak), Some(&last)) if peak > 0.0 => last / peak - 1.0,
        _ => 0.0,
    }
}
