use super::{renormalize_capped, Allocation, Allocator, Strategy, WeightMap};
use crate::config::AllocatorConfig;
use crate::scoring::{select_top, sharpe_ratio, ScoredInstrument};
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Lattice
// ──────────────────────────────────────────────────────────────────────────────

/// Best known way to spend exactly one lattice level.
#[derive(Clone, Debug)]
struct LatticeState {
    /// Portfolio Sharpe ratio of `units` normalized by the level.
    score: f64,
    /// Units given to each selected instrument, in selection order.
    units: Vec<usize>,
    /// Σ u_i · μ_i
    weighted_mean: f64,
    /// Σ u_i² · σ_i²
    weighted_variance: f64,
}

impl LatticeState {
    fn origin(slots: usize) -> Self {
        Self {
            score: f64::NEG_INFINITY,
            units: vec![0; slots],
            weighted_mean: 0.0,
            weighted_variance: 0.0,
        }
    }

    fn holds_nothing(&self) -> bool {
        self.units.iter().all(|u| *u == 0)
    }
}

/// Reachable states indexed by total units spent, `0..=steps`.
struct Lattice {
    levels: Vec<Option<LatticeState>>,
}

impl Lattice {
    fn new(steps: usize, slots: usize) -> Self {
        let mut levels = vec![None; steps + 1];
        levels[0] = Some(LatticeState::origin(slots));
        Self { levels }
    }

    fn steps(&self) -> usize {
        self.levels.len() - 1
    }

    fn reachable(&self) -> usize {
        self.levels.iter().filter(|l| l.is_some()).count()
    }

    /// Lattice after deciding instrument `slot`: either skipped (every state
    /// carries over) or given `min_units..=max_units` on top of a state of
    /// `self`. Transitions read only the previous lattice, so an instrument
    /// is placed at most once.
    fn extend(&self, slot: usize, candidate: &ScoredInstrument, min_units: usize, max_units: usize, risk_free_rate: f64) -> Self {
        let steps = self.steps();
        let mut next = Self {
            levels: self.levels.clone(),
        };
        let variance = candidate.std_return * candidate.std_return;

        for delta in min_units..=max_units.min(steps) {
            for used in 0..=(steps - delta) {
                let Some(prev) = &self.levels[used] else {
                    continue;
                };
                let level = used + delta;
                let total = level as f64;
                let d = delta as f64;

                let weighted_mean = prev.weighted_mean + d * candidate.mean_return;
                let weighted_variance = prev.weighted_variance + d * d * variance;
                let score = sharpe_ratio(weighted_mean / total, weighted_variance.sqrt() / total, risk_free_rate);

                let improves = next.levels[level]
                    .as_ref()
                    .is_none_or(|best| score > best.score);
                if improves {
                    let mut units = prev.units.clone();
                    units[slot] = delta;
                    next.levels[level] = Some(LatticeState {
                        score,
                        units,
                        weighted_mean,
                        weighted_variance,
                    });
                }
            }
        }

        next
    }

    /// Highest-scoring non-empty state within `tolerance` units of full
    /// allocation. Levels are scanned upward and only a strictly better score
    /// replaces the incumbent.
    fn best_finished(&self, tolerance: usize) -> Option<&LatticeState> {
        let steps = self.steps();
        let floor = steps.saturating_sub(tolerance);
        let mut best: Option<&LatticeState> = None;
        for state in self.levels[floor..=steps].iter().flatten() {
            if state.holds_nothing() {
                continue;
            }
            if best.is_none_or(|b| state.score > b.score) {
                best = Some(state);
            }
        }
        best
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Allocator
// ──────────────────────────────────────────────────────────────────────────────

/// Bounded knapsack over an integer allocation lattice.
///
/// Each of the top `target_num_stocks` instruments is either skipped or
/// given between `min_units` and `max_units` lattice units. The search keeps,
/// for every total number of units spent, the assignment with the highest
/// portfolio Sharpe ratio, then picks the best assignment that spends at
/// least `steps - tolerance_units` units. When none does, the selection is
/// equally weighted and [`Allocation::fallback_used`] is set.
#[derive(Clone, Debug)]
pub struct KnapsackAllocator {
    target_num_stocks: usize,
}

impl KnapsackAllocator {
    pub fn new(target_num_stocks: usize) -> Self {
        Self { target_num_stocks }
    }
}

impl Allocator for KnapsackAllocator {
    fn strategy(&self) -> Strategy {
        Strategy::Knapsack
    }

    fn allocate(&self, scored: &[ScoredInstrument], config: &AllocatorConfig) -> Allocation {
        let selected = select_top(scored, self.target_num_stocks);
        if selected.is_empty() {
            return Allocation::empty(Strategy::Knapsack);
        }

        let steps = config.discretization_steps;
        let min_units = config.min_units();
        let max_units = config.max_units();
        debug!(
            "Knapsack: {} candidates, {} steps, {}..={} units per holding",
            selected.len(),
            steps,
            min_units,
            max_units
        );

        let mut lattice = Lattice::new(steps, selected.len());
        for (slot, candidate) in selected.iter().enumerate() {
            lattice = lattice.extend(slot, candidate, min_units, max_units, config.risk_free_rate);
            debug!("  {}: {} reachable levels", candidate.ticker, lattice.reachable());
        }

        let (raw, fallback_used) = match lattice.best_finished(config.tolerance_units) {
            Some(state) => {
                info!(
                    "Knapsack: best lattice portfolio spends {} of {} units (Sharpe {:.4})",
                    state.units.iter().sum::<usize>(),
                    steps,
                    state.score
                );
                (state.units.iter().map(|u| *u as f64).collect(), false)
            }
            None => {
                warn!(
                    "Knapsack: no assignment reaches {} of {} units; falling back to equal weights",
                    steps.saturating_sub(config.tolerance_units),
                    steps
                );
                (vec![1.0; selected.len()], true)
            }
        };

        let weights = bound_weights(raw, config);
        let weights = WeightMap::from_weights(
            selected
                .iter()
                .map(|s| s.ticker.clone())
                .zip(weights),
        );

        let mut allocation = Allocation::new(Strategy::Knapsack, weights, scored, config);
        allocation.fallback_used = fallback_used;
        allocation
    }
}

/// Normalizes lattice units into weights, caps them, and drops holdings
/// that end up below `min_alloc`. If every holding would be dropped they are
/// kept as they are.
fn bound_weights(mut weights: Vec<f64>, config: &AllocatorConfig) -> Vec<f64> {
    renormalize_capped(&mut weights, config.max_alloc);

    let below_min = weights
        .iter()
        .filter(|w| **w > 0.0 && **w < config.min_alloc)
        .count();
    let held = weights.iter().filter(|w| **w > 0.0).count();
    if below_min > 0 && below_min < held {
        debug!("Knapsack: dropping {} holdings below {}", below_min, config.min_alloc);
        weights
            .iter_mut()
            .filter(|w| **w < config.min_alloc)
            .for_each(|w| *w = 0.0);
        renormalize_capped(&mut weights, config.max_alloc);
    }

    weights
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::tests::{assert_valid_weights, scored};
    use crate::allocation::GreedyAllocator;

    fn config(max_alloc: f64) -> AllocatorConfig {
        AllocatorConfig::default()
            .with_risk_free_rate(0.0)
            .with_bounds(0.005, max_alloc)
    }

    #[test]
    fn test_identical_pair_splits_evenly() {
        let scored = scored(&[("LEFT", 0.1, 0.2), ("RIGHT", 0.1, 0.2)], 0.0);
        let allocation = KnapsackAllocator::new(2).allocate(&scored, &config(0.5));

        assert!(!allocation.fallback_used);
        assert!((allocation.weights.get("LEFT").unwrap() - 0.5).abs() < 1e-12);
        assert!((allocation.weights.get("RIGHT").unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_beats_greedy_on_portfolio_sharpe() {
        // Greedy gives 0.5/0.25/0.25 for a portfolio Sharpe of 2.333; the
        // lattice optimum shifts weight from BBB to CCC.
        let scored = scored(&[("AAA", 0.2, 0.1), ("BBB", 0.2, 0.2), ("CCC", 0.1, 0.1)], 0.0);
        let config = config(0.5);

        let greedy = GreedyAllocator::new(3).allocate(&scored, &config);
        let knapsack = KnapsackAllocator::new(3).allocate(&scored, &config);

        assert_valid_weights(&knapsack.weights, 0.5);
        assert!((greedy.summary.portfolio_sharpe - 7.0 / 3.0).abs() < 1e-9);
        assert!(knapsack.summary.portfolio_sharpe > greedy.summary.portfolio_sharpe);
        assert!(knapsack.summary.portfolio_sharpe > 2.42);
        assert!((knapsack.weights.get("AAA").unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_skips_instruments_that_hurt_the_portfolio() {
        let scored = scored(&[("AAA", 0.2, 0.1), ("BBB", 0.2, 0.1), ("ZZZ", 0.0, 0.5)], 0.0);
        let allocation = KnapsackAllocator::new(3).allocate(&scored, &config(0.5));

        assert_eq!(allocation.weights.len(), 2);
        assert_eq!(allocation.weights.get("ZZZ"), None);
        assert!((allocation.weights.get("AAA").unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unreachable_lattice_falls_back_to_equal_weights() {
        // Three holdings capped at 20 units reach at most 60 of 100.
        let scored = scored(&[("AAA", 0.2, 0.1), ("BBB", 0.2, 0.2), ("CCC", 0.1, 0.1)], 0.0);
        let allocation = KnapsackAllocator::new(3).allocate(&scored, &config(0.2));

        assert!(allocation.fallback_used);
        assert_eq!(allocation.weights.len(), 3);
        for (_, w) in allocation.weights.iter() {
            assert!((w - 1.0 / 3.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_instrument_takes_everything() {
        let scored = scored(&[("SOLO", 0.15, 0.3)], 0.0);
        let allocation = KnapsackAllocator::new(5).allocate(&scored, &config(1.0));

        assert!(!allocation.fallback_used);
        assert_eq!(allocation.weights.len(), 1);
        assert!((allocation.weights.get("SOLO").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_default_bounds_hold_for_a_wide_universe() {
        let specs: Vec<(String, f64, f64)> = (0..12)
            .map(|i| (format!("T{:02}", i), 0.05 + 0.02 * i as f64, 0.15 + 0.01 * (i % 5) as f64))
            .collect();
        let specs: Vec<(&str, f64, f64)> = specs.iter().map(|(t, m, s)| (t.as_str(), *m, *s)).collect();
        let scored = scored(&specs, 0.0554);
        let config = AllocatorConfig::default();

        let allocation = KnapsackAllocator::new(10).allocate(&scored, &config);

        assert!(!allocation.fallback_used);
        assert!(allocation.weights.len() <= 10);
        assert_valid_weights(&allocation.weights, config.max_alloc);
        for (_, w) in allocation.weights.iter() {
            assert!(w >= config.min_alloc - 1e-12);
        }
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let scored = scored(
            &[("AAA", 0.18, 0.25), ("BBB", 0.12, 0.15), ("CCC", 0.30, 0.45), ("DDD", 0.09, 0.08)],
            0.0,
        );
        let config = config(0.4);
        let a = KnapsackAllocator::new(4).allocate(&scored, &config);
        let b = KnapsackAllocator::new(4).allocate(&scored, &config);
        assert_eq!(a.weights, b.weights);
    }

    #[test]
    fn test_bound_weights_drops_dust() {
        let config = AllocatorConfig::default().with_bounds(0.05, 0.6);
        let weights = bound_weights(vec![60.0, 38.0, 2.0], &config);
        assert_eq!(weights[2], 0.0);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(weights[0] <= 0.6 + 1e-12);
    }
}
