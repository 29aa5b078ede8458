use anyhow::{bail, Context, Result};
use clap::Parser;
use montefolio::allocation::{allocator_for, compare_with_equal_weight, Selection, Strategy};
use montefolio::benchmark::benchmark_allocators;
use montefolio::config::{self, AllocatorConfig, DEFAULT_TARGET_NUM_STOCKS};
use montefolio::data::{load_live_prices, PriceTable};
use montefolio::quantize::quantize_shares;
use montefolio::report;
use montefolio::scoring::score_instruments;
use montefolio::simulation::simulate_annual_returns;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Montefolio: Monte Carlo return simulation and Sharpe-maximizing portfolio allocation",
    after_help = "EXAMPLES:
    # Allocate over a price history with the lattice search
    cargo run --release -- --prices closes.json --strategy knapsack

    # Synthetic universe, greedy weights, whole shares for a $50,000 budget
    cargo run --release -- --synthetic 30 --strategy greedy --budget 50000

    # Compare all three allocators
    cargo run --release -- --synthetic 60 --benchmark 5"
)]
struct Args {
    /// JSON price table: {\"dates\": [...], \"tickers\": [...], \"closes\": [[...], ...]}
    #[arg(long, conflicts_with = "synthetic")]
    prices: Option<PathBuf>,

    /// Generate a synthetic universe of this many instruments instead of reading --prices
    #[arg(long)]
    synthetic: Option<usize>,

    /// Trading days of synthetic history (default: 756)
    #[arg(long, default_value_t = 756)]
    synthetic_days: usize,

    /// Allocation strategy
    #[arg(long, value_enum, default_value_t = Strategy::Knapsack)]
    strategy: Strategy,

    /// Number of top-Sharpe instruments the greedy and knapsack strategies consider
    #[arg(long, default_value_t = DEFAULT_TARGET_NUM_STOCKS)]
    target_num_stocks: usize,

    /// Comma-separated tickers for equal weighting (default: every instrument)
    #[arg(long)]
    tickers: Option<String>,

    /// Budget to turn into whole shares
    #[arg(long)]
    budget: Option<f64>,

    /// JSON object of current prices ({\"AAPL\": 187.3, \"XYZ\": null}); defaults to the last close
    #[arg(long)]
    live_prices: Option<PathBuf>,

    /// Annual risk-free rate (overrides MONTEFOLIO_RISK_FREE_RATE)
    #[arg(long)]
    risk_free_rate: Option<f64>,

    /// Minimum weight per holding (overrides MONTEFOLIO_MIN_ALLOC)
    #[arg(long)]
    min_alloc: Option<f64>,

    /// Maximum weight per holding (overrides MONTEFOLIO_MAX_ALLOC)
    #[arg(long)]
    max_alloc: Option<f64>,

    /// Monte Carlo paths per instrument (overrides MONTEFOLIO_NUM_SIMULATIONS)
    #[arg(long)]
    simulations: Option<usize>,

    /// Trading days per simulated year (overrides MONTEFOLIO_TRADING_DAYS)
    #[arg(long)]
    trading_days: Option<usize>,

    /// RNG seed for reproducible runs (overrides MONTEFOLIO_SEED)
    #[arg(long)]
    seed: Option<u64>,

    /// Benchmark every strategy with this many runs each
    #[arg(long)]
    benchmark: Option<usize>,

    /// Print a JSON report instead of tables
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Defaults, then environment, then flags.
    fn allocator_config(&self) -> Result<AllocatorConfig> {
        let mut config = AllocatorConfig::from_env();
        if let Some(rate) = self.risk_free_rate {
            config.risk_free_rate = rate;
        }
        if let Some(min) = self.min_alloc {
            config.min_alloc = min;
        }
        if let Some(max) = self.max_alloc {
            config.max_alloc = max;
        }
        if let Some(n) = self.simulations {
            config.num_simulations = n;
        }
        if let Some(days) = self.trading_days {
            config.trading_days = days;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        config.validate().context("invalid allocator configuration")?;
        Ok(config)
    }

    fn selection(&self) -> Selection {
        match &self.tickers {
            Some(list) => Selection::Tickers(
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            None => Selection::All,
        }
    }

    fn price_table(&self, config: &AllocatorConfig) -> Result<PriceTable> {
        if let Some(path) = &self.prices {
            return PriceTable::from_json_file(path);
        }
        if let Some(count) = self.synthetic {
            if count == 0 {
                bail!("--synthetic needs at least one instrument");
            }
            let tickers: Vec<String> = (1..=count).map(|i| format!("SYN{:03}", i)).collect();
            let seed = config.seed.unwrap_or(7);
            info!(
                "Generating synthetic history: {} instruments x {} days (seed {})",
                count, self.synthetic_days, seed
            );
            return Ok(PriceTable::synthetic(&tickers, self.synthetic_days, seed));
        }
        bail!("provide --prices <file> or --synthetic <count>")
    }
}

fn run(args: &Args) -> Result<()> {
    let config = args.allocator_config()?;
    let prices = args.price_table(&config)?;
    let returns = prices.daily_returns();

    let simulation = simulate_annual_returns(&returns, &config).context("simulation failed")?;
    let scored = score_instruments(&simulation.instruments, config.risk_free_rate);

    if let Some(runs) = args.benchmark {
        let summary = benchmark_allocators(&scored, &config, args.target_num_stocks, runs);
        if args.json {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        } else {
            print!("{}", report::render_benchmark(&summary));
        }
        return Ok(());
    }

    let allocator = allocator_for(args.strategy, args.target_num_stocks, args.selection());
    let allocation = allocator.allocate(&scored, &config);
    let comparison = compare_with_equal_weight(&allocation, &scored, &config);
    info!(
        "{} allocation: {} holdings, Sharpe {:.4}",
        allocator.strategy(),
        allocation.summary.num_stocks,
        allocation.summary.portfolio_sharpe
    );

    let shares = match args.budget {
        Some(budget) => {
            let live = match &args.live_prices {
                Some(path) => load_live_prices(path)?,
                None => prices.latest_prices(),
            };
            Some(quantize_shares(&allocation.weights, &live, budget)?)
        }
        None => None,
    };

    if args.json {
        let document = json!({
            "config": config,
            "simulation": simulation,
            "scores": scored,
            "allocation": allocation,
            "equal_weight_comparison": comparison,
            "shares": shares,
        });
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print!("{}", report::render_simulation(&simulation, &scored));
        print!("{}", report::render_allocation(&allocation, comparison.as_ref()));
        if let Some(shares) = &shares {
            print!("{}", report::render_shares(shares));
        }
        println!();
        println!("⚠  Educational use only. Not financial advice.");
    }

    Ok(())
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("montefolio=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    config::init_cpu_parallelism();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
