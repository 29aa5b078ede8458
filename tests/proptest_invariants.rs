//! Property-based tests for allocation and quantization invariants.

use montefolio::allocation::{
    Allocator, EqualWeightAllocator, GreedyAllocator, KnapsackAllocator, Selection, WeightMap,
    WEIGHT_TOLERANCE,
};
use montefolio::config::AllocatorConfig;
use montefolio::data::ReturnTable;
use montefolio::quantize::quantize_shares;
use montefolio::scoring::ScoredInstrument;
use montefolio::simulation::simulate_annual_returns;
use proptest::prelude::*;
use std::collections::HashMap;

/// A scored universe of up to `max` instruments with distinct tickers.
fn universe_strategy(max: usize) -> impl Strategy<Value = Vec<ScoredInstrument>> {
    prop::collection::vec((-0.2f64..0.6, 0.01f64..0.8), 0..=max).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (mean, std))| ScoredInstrument::new(format!("T{:03}", i), mean, std, 0.0554))
            .collect()
    })
}

fn max_alloc_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.1), Just(0.2), Just(0.3), Just(0.5), Just(1.0)]
}

/// A normalized weight map plus a price per ticker, some missing.
fn book_strategy() -> impl Strategy<Value = (WeightMap, HashMap<String, f64>)> {
    prop::collection::vec((0.01f64..1.0, prop::option::weighted(0.85, 1.0f64..500.0)), 1..12).prop_map(
        |rows| {
            let weights = WeightMap::from_weights(
                rows.iter()
                    .enumerate()
                    .map(|(i, (w, _))| (format!("T{:02}", i), *w)),
            );
            let prices = rows
                .iter()
                .enumerate()
                .filter_map(|(i, (_, p))| p.map(|p| (format!("T{:02}", i), p)))
                .collect();
            (weights, prices)
        },
    )
}

fn check_weights(weights: &WeightMap, cap: Option<f64>) -> Result<(), TestCaseError> {
    if weights.is_empty() {
        return Ok(());
    }
    prop_assert!(
        (weights.total() - 1.0).abs() < WEIGHT_TOLERANCE,
        "weights sum to {}",
        weights.total()
    );
    for (ticker, w) in weights.iter() {
        prop_assert!(w > 0.0, "{} has weight {}", ticker, w);
        if let Some(cap) = cap {
            prop_assert!(w <= cap + WEIGHT_TOLERANCE, "{} weight {} exceeds {}", ticker, w, cap);
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // ========================================================================
    // WEIGHT MAP INVARIANTS
    // ========================================================================

    #[test]
    fn knapsack_weights_are_bounded(
        scored in universe_strategy(14),
        target in 1usize..12,
        max_alloc in max_alloc_strategy(),
    ) {
        let config = AllocatorConfig::default().with_bounds(0.005, max_alloc);
        let allocation = KnapsackAllocator::new(target).allocate(&scored, &config);

        // An infeasible cap is equalized instead.
        let holdings = allocation.weights.len().max(1) as f64;
        let cap = if holdings * max_alloc >= 1.0 { max_alloc } else { 1.0 / holdings };
        check_weights(&allocation.weights, Some(cap))?;
        prop_assert!(allocation.weights.len() <= target);
        prop_assert_eq!(allocation.weights.is_empty(), scored.is_empty());
    }

    #[test]
    fn greedy_weights_are_normalized(
        scored in universe_strategy(30),
        target in 1usize..30,
        max_alloc in max_alloc_strategy(),
    ) {
        let config = AllocatorConfig::default().with_bounds(0.005, max_alloc);
        let allocation = GreedyAllocator::new(target).allocate(&scored, &config);

        // Too few holdings for the cap: clamped proportions are kept instead.
        let holdings = allocation.weights.len() as f64;
        let cap = (target <= config.concentration_threshold && holdings * max_alloc >= 1.0)
            .then_some(max_alloc);
        check_weights(&allocation.weights, cap)?;

        let held: Vec<(f64, f64)> = allocation
            .weights
            .iter()
            .map(|(ticker, w)| {
                let instrument = scored.iter().find(|s| s.ticker == ticker).unwrap();
                (instrument.sharpe_ratio, w)
            })
            .collect();
        for (sharpe, _) in &held {
            prop_assert!(*sharpe > 0.0);
        }
        // A higher Sharpe ratio never earns a smaller weight.
        for (sharpe_a, w_a) in &held {
            for (sharpe_b, w_b) in &held {
                if sharpe_a > sharpe_b {
                    prop_assert!(*w_a >= *w_b - WEIGHT_TOLERANCE, "{} < {}", w_a, w_b);
                }
            }
        }
    }

    #[test]
    fn equal_weights_are_exact(scored in universe_strategy(30)) {
        let allocation = EqualWeightAllocator::new(Selection::All)
            .allocate(&scored, &AllocatorConfig::default());

        prop_assert_eq!(allocation.weights.len(), scored.len());
        for (_, w) in allocation.weights.iter() {
            prop_assert_eq!(w, 1.0 / scored.len() as f64);
        }
    }

    // ========================================================================
    // QUANTIZER
    // ========================================================================

    #[test]
    fn quantizer_conserves_budget(
        (weights, prices) in book_strategy(),
        budget in 0.0f64..250_000.0,
    ) {
        let shares = quantize_shares(&weights, &prices, budget).unwrap();

        let tolerance = 1e-9 * budget.max(1.0);
        prop_assert!((shares.total_spent + shares.cash_remaining - budget).abs() <= tolerance);
        prop_assert!(shares.total_spent <= budget);
        prop_assert!(shares.cash_remaining >= 0.0);

        // The sweep stops only once nothing priced is affordable.
        let cheapest = weights
            .tickers()
            .filter_map(|t| prices.get(t))
            .fold(f64::INFINITY, |a, b| a.min(*b));
        prop_assert!(shares.cash_remaining < cheapest + tolerance);

        let recomputed: f64 = shares.holdings.iter().map(|h| h.shares as f64 * h.price).sum();
        prop_assert!((recomputed - shares.total_spent).abs() <= tolerance);
    }

    #[test]
    fn quantizer_spend_grows_with_budget(
        (weights, prices) in book_strategy(),
        budget in 0.0f64..100_000.0,
        extra in 0.0f64..10_000.0,
    ) {
        let cheapest = weights
            .tickers()
            .filter_map(|t| prices.get(t))
            .fold(f64::INFINITY, |a, b| a.min(*b));
        prop_assume!(cheapest.is_finite());

        let low = quantize_shares(&weights, &prices, budget).unwrap();
        let high = quantize_shares(&weights, &prices, budget + cheapest + extra).unwrap();
        prop_assert!(
            high.total_spent >= low.total_spent - 1e-9 * budget.max(1.0),
            "spent {} at {} but {} at {}",
            low.total_spent, budget, high.total_spent, budget + cheapest + extra
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    // ========================================================================
    // SIMULATION
    // ========================================================================

    #[test]
    fn simulated_quantiles_are_ordered(
        column in prop::collection::vec(-0.05f64..0.05, 2..60),
        seed in any::<u64>(),
    ) {
        let returns = ReturnTable::new(vec!["AAA".to_string()], vec![column]).unwrap();
        let config = AllocatorConfig::default().with_simulation(200, 20).with_seed(seed);

        let first = simulate_annual_returns(&returns, &config).unwrap();
        let second = simulate_annual_returns(&returns, &config).unwrap();
        prop_assert_eq!(&first.instruments, &second.instruments);

        let stats = &first.instruments[0];
        prop_assert!(stats.percentile_5 <= stats.median_annual_return);
        prop_assert!(stats.median_annual_return <= stats.percentile_95);
        prop_assert!(stats.std_annual_return >= 0.0);
    }
}
