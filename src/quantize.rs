use crate::allocation::WeightMap;
use crate::error::{EngineError, EngineResult};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// One instrument's whole-share position.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShareHolding {
    pub ticker: String,
    pub shares: u64,
    pub price: f64,
    pub cost: f64,
    pub target_weight: f64,
    /// `cost / total_spent`
    pub actual_weight: f64,
}

/// Whole-share purchase plan for a weight map and budget.
///
/// `total_spent + cash_remaining == budget` up to float rounding.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShareAllocation {
    /// Holdings with at least one share, in weight-map order.
    pub holdings: Vec<ShareHolding>,
    pub budget: f64,
    pub total_spent: f64,
    pub cash_remaining: f64,
    /// Extra shares bought by the cash sweep.
    pub sweep_purchases: usize,
    /// Weighted tickers with no usable price.
    pub unpriced: Vec<String>,
}

impl ShareAllocation {
    pub fn shares(&self, ticker: &str) -> Option<u64> {
        self.holdings
            .iter()
            .find(|h| h.ticker == ticker)
            .map(|h| h.shares)
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }
}

/// Working row for one weighted instrument.
struct Position<'a> {
    ticker: &'a str,
    target: f64,
    price: Option<f64>,
    shares: u64,
}

// ──────────────────────────────────────────────────────────────────────────────
// Quantizer
// ──────────────────────────────────────────────────────────────────────────────

/// Turns target weights into whole shares under `budget`.
///
/// Each instrument first gets `floor(weight * budget / price)` shares. The
/// leftover cash is then swept one share at a time: among instruments whose
/// price fits in the remaining cash, the one whose allocation after the
/// purchase lands closest to its target weight is bought (the first such
/// instrument in weight-map order on ties). The sweep stops when nothing is
/// affordable. Once a single instrument is the only one in reach, its
/// remaining shares are bought in one step, so the loop runs at most once per
/// purchase made while two or more instruments are affordable.
///
/// Missing, non-finite or non-positive prices leave that instrument at zero
/// shares. Only a negative or non-finite budget is an error.
pub fn quantize_shares(
    weights: &WeightMap,
    prices: &HashMap<String, f64>,
    budget: f64,
) -> EngineResult<ShareAllocation> {
    if !budget.is_finite() || budget < 0.0 {
        return Err(EngineError::InvalidBudget(budget));
    }

    let mut positions: Vec<Position> = weights
        .iter()
        .map(|(ticker, target)| {
            let price = prices.get(ticker).copied().filter(|p| p.is_finite() && *p > 0.0);
            if price.is_none() {
                warn!("{}: no usable price, holding zero shares", ticker);
            }
            Position {
                ticker,
                target,
                price,
                shares: 0,
            }
        })
        .collect();

    // 1. Floor allocation
    let mut spent = 0.0;
    for position in positions.iter_mut() {
        let Some(price) = position.price else {
            continue;
        };
        let cash = budget - spent;
        let wanted = (position.target * budget / price).floor();
        let affordable = (cash / price).floor();
        let shares = wanted.min(affordable).max(0.0) as u64;
        position.shares = shares;
        spent += shares as f64 * price;
    }
    debug!(
        "Floor allocation spent {:.2} of {:.2}, sweeping {:.2}",
        spent,
        budget,
        budget - spent
    );

    // 2. Cash sweep
    let mut sweep_purchases = 0;
    while let Some(index) = next_sweep_purchase(&positions, spent, budget - spent) {
        let cash = budget - spent;
        let price = positions[index].price.unwrap_or_default();
        // With nothing else in reach every remaining purchase goes here.
        let lots = if affordable_count(&positions, cash) == 1 {
            ((cash / price).floor() as u64).max(1)
        } else {
            1
        };
        positions[index].shares += lots;
        spent += lots as f64 * price;
        sweep_purchases += lots as usize;
    }

    // Re-summing can land an ulp above the budget.
    let total_spent = positions
        .iter()
        .map(|p| p.shares as f64 * p.price.unwrap_or_default())
        .sum::<f64>()
        .min(budget);
    let cash_remaining = (budget - total_spent).max(0.0);

    let unpriced = positions
        .iter()
        .filter(|p| p.price.is_none())
        .map(|p| p.ticker.to_string())
        .collect();

    let holdings = positions
        .iter()
        .filter(|p| p.shares > 0)
        .filter_map(|p| {
            let price = p.price?;
            let cost = p.shares as f64 * price;
            Some(ShareHolding {
                ticker: p.ticker.to_string(),
                shares: p.shares,
                price,
                cost,
                target_weight: p.target,
                actual_weight: if total_spent > 0.0 { cost / total_spent } else { 0.0 },
            })
        })
        .collect();

    info!(
        "Quantized into whole shares: spent {:.2}, {:.2} left, {} sweep purchases",
        total_spent, cash_remaining, sweep_purchases
    );

    Ok(ShareAllocation {
        holdings,
        budget,
        total_spent,
        cash_remaining,
        sweep_purchases,
        unpriced,
    })
}

/// Index of the affordable position whose post-purchase allocation is
/// closest to its target weight.
fn next_sweep_purchase(positions: &[Position], spent: f64, cash: f64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, position) in positions.iter().enumerate() {
        let Some(price) = position.price else {
            continue;
        };
        if price > cash {
            continue;
        }
        let after = (position.shares + 1) as f64 * price / (spent + price);
        let error = (after - position.target).abs();
        if best.is_none_or(|(_, e)| error < e) {
            best = Some((index, error));
        }
    }
    best.map(|(index, _)| index)
}

fn affordable_count(positions: &[Position], cash: f64) -> usize {
    positions
        .iter()
        .filter(|p| p.price.is_some_and(|price| price <= cash))
        .count()
}
