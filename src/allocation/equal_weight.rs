use super::{Allocation, Allocator, Strategy, WeightMap};
use crate::config::AllocatorConfig;
use crate::scoring::{select_top, ScoredInstrument};
use std::collections::HashSet;
use tracing::{info, warn};

/// Which instruments share the capital equally.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Selection {
    /// Every scored instrument.
    #[default]
    All,
    /// A caller-chosen subset; unknown tickers are ignored.
    Tickers(Vec<String>),
    /// The top `n` instruments by Sharpe ratio.
    TopBySharpe(usize),
}

/// Assigns `1/N` to each selected instrument. Not bounded by `max_alloc`:
/// with few holdings each weight is still exactly `1/N`.
#[derive(Clone, Debug, Default)]
pub struct EqualWeightAllocator {
    selection: Selection,
}

impl EqualWeightAllocator {
    pub fn new(selection: Selection) -> Self {
        Self { selection }
    }

    fn selected_tickers(&self, scored: &[ScoredInstrument]) -> Vec<String> {
        match &self.selection {
            Selection::All => scored.iter().map(|s| s.ticker.clone()).collect(),
            Selection::TopBySharpe(count) => select_top(scored, *count)
                .into_iter()
                .map(|s| s.ticker.clone())
                .collect(),
            Selection::Tickers(requested) => {
                let available: HashSet<&str> = scored.iter().map(|s| s.ticker.as_str()).collect();
                let mut seen = HashSet::new();
                let mut tickers = Vec::with_capacity(requested.len());
                for ticker in requested {
                    if !available.contains(ticker.as_str()) {
                        warn!("{}: not in the scored universe, skipping", ticker);
                        continue;
                    }
                    if seen.insert(ticker.as_str()) {
                        tickers.push(ticker.clone());
                    }
                }
                tickers
            }
        }
    }
}

impl Allocator for EqualWeightAllocator {
    fn strategy(&self) -> Strategy {
        Strategy::EqualWeight
    }

    fn allocate(&self, scored: &[ScoredInstrument], config: &AllocatorConfig) -> Allocation {
        let tickers = self.selected_tickers(scored);
        if tickers.is_empty() {
            info!("Equal weight: nothing selected, returning empty allocation");
            return Allocation::empty(Strategy::EqualWeight);
        }

        Allocation::new(Strategy::EqualWeight, WeightMap::uniform(tickers), scored, config)
    }
}
