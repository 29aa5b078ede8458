use crate::allocation::{allocator_for, Selection, Strategy};
use crate::config::AllocatorConfig;
use crate::scoring::ScoredInstrument;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Timing and solution quality of one allocator over repeated runs.
#[derive(Clone, Debug, Serialize)]
pub struct BenchmarkRecord {
    pub strategy: Strategy,
    pub mean_time_ms: f64,
    /// Sample standard deviation; 0 for a single run.
    pub std_time_ms: f64,
    pub portfolio_return: f64,
    pub portfolio_std: f64,
    pub portfolio_sharpe: f64,
    pub num_stocks: usize,
    pub input_size: usize,
    pub runs: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct BenchmarkSummary {
    pub records: Vec<BenchmarkRecord>,
    pub fastest: Option<Strategy>,
    pub best_return: Option<Strategy>,
    pub best_sharpe: Option<Strategy>,
}

/// Runs every strategy `runs` times (at least once) on the same scored
/// universe. Equal weighting spreads over the whole universe.
pub fn benchmark_allocators(
    scored: &[ScoredInstrument],
    config: &AllocatorConfig,
    target_num_stocks: usize,
    runs: usize,
) -> BenchmarkSummary {
    let runs = runs.max(1);
    let records: Vec<BenchmarkRecord> = Strategy::ALL
        .iter()
        .map(|strategy| {
            info!("Benchmarking {} ({} runs)...", strategy, runs);
            let allocator = allocator_for(*strategy, target_num_stocks, Selection::All);

            let mut times_ms = Vec::with_capacity(runs);
            let mut last = None;
            for _ in 0..runs {
                let start = Instant::now();
                let allocation = allocator.allocate(scored, config);
                times_ms.push(start.elapsed().as_secs_f64() * 1000.0);
                last = Some(allocation);
            }
            let summary = last.map(|a| a.summary).unwrap_or_default();
            let (mean_time_ms, std_time_ms) = mean_and_sample_std(&times_ms);

            BenchmarkRecord {
                strategy: *strategy,
                mean_time_ms,
                std_time_ms,
                portfolio_return: summary.portfolio_return,
                portfolio_std: summary.portfolio_std,
                portfolio_sharpe: summary.portfolio_sharpe,
                num_stocks: summary.num_stocks,
                input_size: scored.len(),
                runs,
            }
        })
        .collect();

    BenchmarkSummary {
        fastest: pick(&records, |r| -r.mean_time_ms),
        best_return: pick(&records, |r| r.portfolio_return),
        best_sharpe: pick(&records, |r| r.portfolio_sharpe),
        records,
    }
}

/// Strategy with the largest `key`; the earliest record wins ties.
fn pick(records: &[BenchmarkRecord], key: impl Fn(&BenchmarkRecord) -> f64) -> Option<Strategy> {
    records
        .iter()
        .fold(None::<&BenchmarkRecord>, |best, r| match best {
            Some(b) if key(b) >= key(r) => Some(b),
            _ => Some(r),
        })
        .map(|r| r.strategy)
}

fn mean_and_sample_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}
