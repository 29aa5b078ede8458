use crate::config::AllocatorConfig;
use crate::data::ReturnTable;
use crate::error::{EngineError, EngineResult};
use rand::prelude::*;
use rand_distr::Normal;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Summary of one instrument's simulated annual-return distribution.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InstrumentStats {
    pub ticker: String,
    pub mean_annual_return: f64,
    pub median_annual_return: f64,
    pub std_annual_return: f64,
    pub percentile_5: f64,
    pub percentile_95: f64,
}

/// Output of one simulation run, in the column order of the input table.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    /// Seed the run actually used, so a run can be reproduced.
    pub seed: u64,
    pub num_simulations: usize,
    pub trading_days: usize,
    pub instruments: Vec<InstrumentStats>,
}

/// Historical daily moments the simulated draws are parameterized by.
#[derive(Clone, Copy, Debug)]
struct DailyMoments {
    mean: f64,
    std: f64,
}

// ──────────────────────────────────────────────────────────────────────────────
// Core: Monte Carlo over historical daily moments
// ──────────────────────────────────────────────────────────────────────────────

/// Simulates one year of compounded returns per instrument.
///
/// For each instrument:
///   1. Estimates daily mean and sample standard deviation from history
///   2. Draws `num_simulations` paths of `trading_days` i.i.d. normal returns
///   3. Compounds each path into `prod(1 + r) - 1`
///   4. Summarizes the resulting distribution
///
/// Instruments are simulated in parallel, each from its own RNG stream
/// seeded by the run seed plus the column index, so output does not depend
/// on thread scheduling.
pub fn simulate_annual_returns(
    returns: &ReturnTable,
    config: &AllocatorConfig,
) -> EngineResult<SimulationReport> {
    if config.num_simulations == 0 || config.trading_days == 0 {
        return Err(EngineError::InvalidConfig(
            "num_simulations and trading_days must be at least 1".to_string(),
        ));
    }

    let moments = returns
        .tickers
        .iter()
        .zip(returns.columns.iter())
        .map(|(ticker, column)| daily_moments(ticker, column))
        .collect::<EngineResult<Vec<_>>>()?;

    let seed = config.seed.unwrap_or_else(rand::random);
    info!(
        "Running Monte Carlo: {} instruments, {} paths x {} days (seed {})",
        returns.num_instruments(),
        config.num_simulations,
        config.trading_days,
        seed
    );

    let instruments = returns
        .tickers
        .par_iter()
        .zip(moments.par_iter())
        .enumerate()
        .map(|(index, (ticker, moments))| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
            let mut paths = simulate_paths(
                ticker,
                *moments,
                config.num_simulations,
                config.trading_days,
                &mut rng,
            )?;
            let stats = summarize(ticker, &mut paths);
            // Compounding wide daily draws can overflow even from finite moments.
            if !stats.mean_annual_return.is_finite() || !stats.std_annual_return.is_finite() {
                return Err(EngineError::NonFiniteStatistic {
                    ticker: ticker.to_string(),
                    statistic: "simulated annual return",
                });
            }
            debug!(
                "  {}: E[r]={:.4}, σ={:.4}, P5={:.4}, P95={:.4}",
                stats.ticker,
                stats.mean_annual_return,
                stats.std_annual_return,
                stats.percentile_5,
                stats.percentile_95
            );
            Ok(stats)
        })
        .collect::<EngineResult<Vec<_>>>()?;

    Ok(SimulationReport {
        seed,
        num_simulations: config.num_simulations,
        trading_days: config.trading_days,
        instruments,
    })
}

fn daily_moments(ticker: &str, column: &[f64]) -> EngineResult<DailyMoments> {
    if column.len() < 2 {
        return Err(EngineError::InsufficientHistory {
            ticker: ticker.to_string(),
            observations: column.len(),
        });
    }

    let n = column.len() as f64;
    let mean = column.iter().sum::<f64>() / n;
    let variance = column.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();

    if !mean.is_finite() {
        return Err(EngineError::NonFiniteStatistic {
            ticker: ticker.to_string(),
            statistic: "mean daily return",
        });
    }
    if !std.is_finite() {
        return Err(EngineError::NonFiniteStatistic {
            ticker: ticker.to_string(),
            statistic: "daily return standard deviation",
        });
    }

    Ok(DailyMoments { mean, std })
}

fn simulate_paths(
    ticker: &str,
    moments: DailyMoments,
    num_simulations: usize,
    trading_days: usize,
    rng: &mut impl Rng,
) -> EngineResult<Vec<f64>> {
    let normal = Normal::new(moments.mean, moments.std).map_err(|_| EngineError::NonFiniteStatistic {
        ticker: ticker.to_string(),
        statistic: "daily return standard deviation",
    })?;

    Ok((0..num_simulations)
        .map(|_| {
            let growth = (0..trading_days).fold(1.0_f64, |acc, _| acc * (1.0 + normal.sample(rng)));
            growth - 1.0
        })
        .collect())
}

/// Mean, population standard deviation, median and 5th/95th percentiles.
/// Sorts `paths` in place.
fn summarize(ticker: &str, paths: &mut [f64]) -> InstrumentStats {
    let n = paths.len() as f64;
    let mean = paths.iter().sum::<f64>() / n;
    let std = (paths.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();

    paths.sort_by(|a, b| a.total_cmp(b));

    InstrumentStats {
        ticker: ticker.to_string(),
        mean_annual_return: mean,
        median_annual_return: percentile(paths, 50.0),
        std_annual_return: std,
        percentile_5: percentile(paths, 5.0),
        percentile_95: percentile(paths, 95.0),
    }
}

/// Linear-interpolation percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let rank = pct / 100.0 * (len - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
