//! Weight allocators over scored instruments.
//!
//! Three interchangeable strategies share the [`Allocator`] interface; a
//! caller picks exactly one per run:
//!
//! * [`EqualWeightAllocator`]: 1/N over a chosen set
//! * [`GreedyAllocator`]: weights proportional to individual Sharpe ratios
//! * [`KnapsackAllocator`]: lattice search maximizing portfolio Sharpe ratio
//!
//! Portfolio metrics assume independent instruments: variance is
//! `Σ w_i² σ_i²` with no covariance term.

pub mod equal_weight;
pub mod greedy;
pub mod knapsack;

pub use equal_weight::{EqualWeightAllocator, Selection};
pub use greedy::GreedyAllocator;
pub use knapsack::KnapsackAllocator;

use crate::config::AllocatorConfig;
use crate::scoring::{sharpe_ratio, ScoredInstrument};
use clap::ValueEnum;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use tracing::warn;

/// Tolerance for "weights sum to one" and bound checks.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

// ──────────────────────────────────────────────────────────────────────────────
// Weight map
// ──────────────────────────────────────────────────────────────────────────────

/// Ticker -> weight, in allocation order.
///
/// Every stored weight is strictly positive and a non-empty map sums to 1.0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WeightMap {
    entries: Vec<(String, f64)>,
}

impl WeightMap {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Drops non-positive or non-finite weights and normalizes the rest.
    pub fn from_weights<I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        let kept: Vec<(String, f64)> = weights
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w > 0.0)
            .collect();
        let total: f64 = kept.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Self::empty();
        }
        Self {
            entries: kept.into_iter().map(|(t, w)| (t, w / total)).collect(),
        }
    }

    /// Exactly `1/N` for each of `tickers`.
    pub fn uniform(tickers: Vec<String>) -> Self {
        if tickers.is_empty() {
            return Self::empty();
        }
        let weight = 1.0 / tickers.len() as f64;
        Self {
            entries: tickers.into_iter().map(|t| (t, weight)).collect(),
        }
    }

    pub fn get(&self, ticker: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(t, _)| t == ticker)
            .map(|(_, w)| *w)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(t, w)| (t.as_str(), *w))
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(t, _)| t.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }

    /// Largest single weight, 0 for an empty map.
    pub fn max_weight(&self) -> f64 {
        self.entries.iter().map(|(_, w)| *w).fold(0.0, f64::max)
    }
}

impl Serialize for WeightMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (ticker, weight) in &self.entries {
            map.serialize_entry(ticker, weight)?;
        }
        map.end()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio metrics
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub portfolio_return: f64,
    pub portfolio_std: f64,
    pub portfolio_sharpe: f64,
    pub num_stocks: usize,
}

impl PortfolioSummary {
    pub fn from_weights(weights: &WeightMap, scored: &[ScoredInstrument], risk_free_rate: f64) -> Self {
        if weights.is_empty() {
            return Self::default();
        }

        let by_ticker: HashMap<&str, &ScoredInstrument> =
            scored.iter().map(|s| (s.ticker.as_str(), s)).collect();

        let mut w = Vec::with_capacity(weights.len());
        let mut means = Vec::with_capacity(weights.len());
        let mut stds = Vec::with_capacity(weights.len());
        for (ticker, weight) in weights.iter() {
            if let Some(s) = by_ticker.get(ticker) {
                w.push(weight);
                means.push(s.mean_return);
                stds.push(s.std_return);
            }
        }

        let portfolio_return = portfolio_return(&w, &means);
        let portfolio_std = portfolio_variance(&w, &stds).sqrt();
        Self {
            portfolio_return,
            portfolio_std,
            portfolio_sharpe: sharpe_ratio(portfolio_return, portfolio_std, risk_free_rate),
            num_stocks: weights.len(),
        }
    }
}

pub(crate) fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

/// Independence assumption: no cross terms.
pub(crate) fn portfolio_variance(weights: &[f64], stds: &[f64]) -> f64 {
    weights
        .iter()
        .zip(stds.iter())
        .map(|(w, s)| w * w * s * s)
        .sum()
}

/// Normalizes positive weights to sum to 1 while keeping each at or below
/// `max_alloc`, moving excess onto uncapped weights in proportion to their
/// size. Zero weights stay zero.
///
/// Returns `false` when the cap cannot hold (`count * max_alloc < 1`); the
/// positive weights are then equalized.
pub(crate) fn renormalize_capped(weights: &mut [f64], max_alloc: f64) -> bool {
    let active = weights.iter().filter(|w| **w > 0.0).count();
    if active == 0 {
        return true;
    }

    if !cap_is_feasible(weights, max_alloc) {
        warn!(
            "Cap of {:.2}% is infeasible for {} holdings; equalizing at {:.2}%",
            max_alloc * 100.0,
            active,
            100.0 / active as f64
        );
        let equal = 1.0 / active as f64;
        weights.iter_mut().filter(|w| **w > 0.0).for_each(|w| *w = equal);
        return false;
    }

    let total: f64 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= total);

    let mut capped = vec![false; weights.len()];
    loop {
        let mut newly_capped = false;
        for (w, is_capped) in weights.iter().zip(capped.iter_mut()) {
            if !*is_capped && *w > max_alloc {
                *is_capped = true;
                newly_capped = true;
            }
        }
        if !newly_capped {
            break;
        }

        let fixed = capped.iter().filter(|c| **c).count() as f64 * max_alloc;
        let free: f64 = weights
            .iter()
            .zip(capped.iter())
            .filter(|(_, c)| !**c)
            .map(|(w, _)| *w)
            .sum();
        let scale = if free > 0.0 { (1.0 - fixed) / free } else { 0.0 };

        for (w, is_capped) in weights.iter_mut().zip(capped.iter()) {
            if *is_capped {
                *w = max_alloc;
            } else {
                *w *= scale;
            }
        }
    }

    true
}

/// Whether the positive weights can sum to 1 with none above `max_alloc`.
pub(crate) fn cap_is_feasible(weights: &[f64], max_alloc: f64) -> bool {
    let active = weights.iter().filter(|w| **w > 0.0).count();
    (active as f64) * max_alloc >= 1.0 - WEIGHT_TOLERANCE
}

// ──────────────────────────────────────────────────────────────────────────────
// Strategy interface
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[value(alias = "equal")]
    EqualWeight,
    Greedy,
    Knapsack,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Greedy, Strategy::Knapsack, Strategy::EqualWeight];

    pub fn label(self) -> &'static str {
        match self {
            Strategy::EqualWeight => "Equal Weight",
            Strategy::Greedy => "Greedy",
            Strategy::Knapsack => "DP Knapsack",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one allocator call.
#[derive(Clone, Debug, Serialize)]
pub struct Allocation {
    pub strategy: Strategy,
    pub weights: WeightMap,
    pub summary: PortfolioSummary,
    /// The lattice search reached no finished portfolio and equal weighting was used instead.
    pub fallback_used: bool,
}

impl Allocation {
    pub fn empty(strategy: Strategy) -> Self {
        Self {
            strategy,
            weights: WeightMap::empty(),
            summary: PortfolioSummary::default(),
            fallback_used: false,
        }
    }

    pub(crate) fn new(
        strategy: Strategy,
        weights: WeightMap,
        scored: &[ScoredInstrument],
        config: &AllocatorConfig,
    ) -> Self {
        let summary = PortfolioSummary::from_weights(&weights, scored, config.risk_free_rate);
        Self {
            strategy,
            weights,
            summary,
            fallback_used: false,
        }
    }
}

pub trait Allocator {
    fn strategy(&self) -> Strategy;

    /// Builds a weight map over `scored`. Never fails: empty or unusable
    /// input produces an empty allocation with a zeroed summary.
    fn allocate(&self, scored: &[ScoredInstrument], config: &AllocatorConfig) -> Allocation;
}

/// The allocator for `strategy`. `target_num_stocks` bounds the ranked
/// strategies; `selection` picks the equal-weight set.
pub fn allocator_for(strategy: Strategy, target_num_stocks: usize, selection: Selection) -> Box<dyn Allocator> {
    match strategy {
        Strategy::EqualWeight => Box::new(EqualWeightAllocator::new(selection)),
        Strategy::Greedy => Box::new(GreedyAllocator::new(target_num_stocks)),
        Strategy::Knapsack => Box::new(KnapsackAllocator::new(target_num_stocks)),
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Equal-weight comparison
// ──────────────────────────────────────────────────────────────────────────────

/// An allocation's metrics next to equal weighting of the same holdings.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct EqualWeightComparison {
    pub allocation: PortfolioSummary,
    pub equal_weight: PortfolioSummary,
    pub return_diff: f64,
    pub std_diff: f64,
    pub sharpe_diff: f64,
}

/// `None` when the allocation holds nothing.
pub fn compare_with_equal_weight(
    allocation: &Allocation,
    scored: &[ScoredInstrument],
    config: &AllocatorConfig,
) -> Option<EqualWeightComparison> {
    if allocation.weights.is_empty() {
        return None;
    }

    let uniform = WeightMap::uniform(allocation.weights.tickers().map(str::to_string).collect());
    let equal_weight = PortfolioSummary::from_weights(&uniform, scored, config.risk_free_rate);
    let current = allocation.summary;

    Some(EqualWeightComparison {
        allocation: current,
        equal_weight,
        return_diff: current.portfolio_return - equal_weight.portfolio_return,
        std_diff: current.portfolio_std - equal_weight.portfolio_std,
        sharpe_diff: current.portfolio_sharpe - equal_weight.portfolio_sharpe,
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
