use super::{cap_is_feasible, renormalize_capped, Allocation, Allocator, Strategy, WeightMap};
use crate::config::AllocatorConfig;
use crate::scoring::{select_top, ScoredInstrument};
use tracing::{debug, info, warn};

/// Ranks by Sharpe ratio, keeps the top `target_num_stocks`, and weights
/// each positive-Sharpe instrument by its share of the total positive
/// Sharpe. Portfolios no larger than the concentration threshold are held
/// inside `[min_alloc, max_alloc]`.
#[derive(Clone, Debug)]
pub struct GreedyAllocator {
    target_num_stocks: usize,
}

impl GreedyAllocator {
    pub fn new(target_num_stocks: usize) -> Self {
        Self { target_num_stocks }
    }
}

impl Allocator for GreedyAllocator {
    fn strategy(&self) -> Strategy {
        Strategy::Greedy
    }

    fn allocate(&self, scored: &[ScoredInstrument], config: &AllocatorConfig) -> Allocation {
        let selected = select_top(scored, self.target_num_stocks);
        if selected.is_empty() {
            return Allocation::empty(Strategy::Greedy);
        }

        let positive: Vec<&ScoredInstrument> = selected
            .into_iter()
            .filter(|s| s.sharpe_ratio > 0.0)
            .collect();
        let total_sharpe: f64 = positive.iter().map(|s| s.sharpe_ratio).sum();
        if total_sharpe <= 0.0 {
            info!("Greedy: no selected instrument has a positive Sharpe ratio");
            return Allocation::empty(Strategy::Greedy);
        }

        let mut weights: Vec<f64> = positive
            .iter()
            .map(|s| s.sharpe_ratio / total_sharpe)
            .collect();

        if self.target_num_stocks <= config.concentration_threshold {
            debug!(
                "Greedy: concentrated portfolio ({} <= {}), bounding weights to [{}, {}]",
                self.target_num_stocks, config.concentration_threshold, config.min_alloc, config.max_alloc
            );
            weights
                .iter_mut()
                .for_each(|w| *w = w.clamp(config.min_alloc, config.max_alloc));
            if cap_is_feasible(&weights, config.max_alloc) {
                renormalize_capped(&mut weights, config.max_alloc);
            } else {
                // Too few holdings to stay under the cap; plain renormalization
                // keeps the clamped Sharpe proportions.
                warn!(
                    "Greedy: cap of {:.2}% is infeasible for {} holdings; renormalizing clamped weights",
                    config.max_alloc * 100.0,
                    weights.len()
                );
            }
        }

        let weights = WeightMap::from_weights(
            positive
                .iter()
                .map(|s| s.ticker.clone())
                .zip(weights),
        );
        Allocation::new(Strategy::Greedy, weights, scored, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::tests::{assert_valid_weights, scored};

    fn config() -> AllocatorConfig {
        AllocatorConfig::default().with_risk_free_rate(0.0)
    }

    #[test]
    fn test_weights_proportional_to_positive_sharpe() {
        // std 0.1 and rf 0: Sharpe = 10 * mean
        let scored = scored(
            &[
                ("AAA", 0.2, 0.1),
                ("BBB", 0.1, 0.1),
                ("NEG", -0.05, 0.1),
                ("CCC", 0.1, 0.1),
            ],
            0.0,
        );
        // Above the concentration threshold, so no bounds apply.
        let allocation = GreedyAllocator::new(20).allocate(&scored, &config());

        assert_eq!(allocation.weights.len(), 3);
        assert_eq!(allocation.weights.get("NEG"), None);
        assert!((allocation.weights.get("AAA").unwrap() - 0.5).abs() < 1e-12);
        assert!((allocation.weights.get("BBB").unwrap() - 0.25).abs() < 1e-12);
        assert!((allocation.weights.get("CCC").unwrap() - 0.25).abs() < 1e-12);

        let order: Vec<&str> = allocation.weights.tickers().collect();
        assert_eq!(order, vec!["AAA", "BBB", "CCC"]);
    }

    #[test]
    fn test_concentrated_portfolio_respects_cap() {
        let mut specs = vec![("STAR", 1.0, 0.1)];
        let names = ["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8", "A9"];
        specs.extend(names.iter().map(|n| (*n, 0.1, 0.1)));
        let scored = scored(&specs, 0.0);

        let allocation = GreedyAllocator::new(10).allocate(&scored, &config());

        assert_valid_weights(&allocation.weights, 0.20);
        assert!((allocation.weights.get("STAR").unwrap() - 0.20).abs() < 1e-9);
        assert!((allocation.weights.get("A1").unwrap() - 0.8 / 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_infeasible_cap_keeps_sharpe_order() {
        // Sharpe 7/2/1 -> 0.7/0.2/0.1, clamped to 0.2/0.2/0.1, then 0.4/0.4/0.2.
        let scored = scored(&[("AAA", 0.7, 0.1), ("BBB", 0.2, 0.1), ("CCC", 0.1, 0.1)], 0.0);
        let allocation = GreedyAllocator::new(10).allocate(&scored, &config());

        assert!((allocation.weights.get("AAA").unwrap() - 0.4).abs() < 1e-9);
        assert!((allocation.weights.get("BBB").unwrap() - 0.4).abs() < 1e-9);
        assert!((allocation.weights.get("CCC").unwrap() - 0.2).abs() < 1e-9);
        assert!((allocation.weights.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_only_top_n_are_selected() {
        let scored = scored(
            &[("AAA", 0.3, 0.1), ("BBB", 0.2, 0.1), ("CCC", 0.1, 0.1), ("DDD", 0.4, 0.1)],
            0.0,
        );
        let config = config().with_bounds(0.0, 1.0);
        let allocation = GreedyAllocator::new(2).allocate(&scored, &config);

        let order: Vec<&str> = allocation.weights.tickers().collect();
        assert_eq!(order, vec!["DDD", "AAA"]);
        assert!((allocation.weights.get("DDD").unwrap() - 4.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_positive_sharpe_is_empty() {
        let scored = scored(&[("AAA", 0.01, 0.2), ("BBB", 0.02, 0.3)], 0.05);
        let allocation = GreedyAllocator::new(10).allocate(&scored, &AllocatorConfig::default());
        assert!(allocation.weights.is_empty());
        assert_eq!(allocation.summary.num_stocks, 0);
    }

    #[test]
    fn test_zero_target_is_empty() {
        let scored = scored(&[("AAA", 0.3, 0.1)], 0.0);
        assert!(GreedyAllocator::new(0).allocate(&scored, &config()).weights.is_empty());
    }
}
