//! Plain-text reports for the terminal.

use crate::allocation::{Allocation, EqualWeightComparison};
use crate::benchmark::BenchmarkSummary;
use crate::quantize::ShareAllocation;
use crate::scoring::ScoredInstrument;
use crate::simulation::SimulationReport;
use std::fmt::Write;

const WIDTH: usize = 72;

fn top(out: &mut String) {
    let _ = writeln!(out, "╔{}╗", "═".repeat(WIDTH + 2));
}

fn divider(out: &mut String) {
    let _ = writeln!(out, "╠{}╣", "═".repeat(WIDTH + 2));
}

fn bottom(out: &mut String) {
    let _ = writeln!(out, "╚{}╝", "═".repeat(WIDTH + 2));
}

fn row(out: &mut String, text: &str) {
    let _ = writeln!(out, "║ {:<width$} ║", text, width = WIDTH);
}

fn title(out: &mut String, text: &str) {
    let _ = writeln!(out, "║ {:^width$} ║", text, width = WIDTH);
}

// ──────────────────────────────────────────────────────────────────────────────
// Simulation
// ──────────────────────────────────────────────────────────────────────────────

pub fn render_simulation(report: &SimulationReport, scored: &[ScoredInstrument]) -> String {
    let mut out = String::new();
    top(&mut out);
    title(&mut out, "Monte Carlo Annual Returns");
    row(
        &mut out,
        &format!(
            "{} paths x {} trading days, seed {}",
            report.num_simulations, report.trading_days, report.seed
        ),
    );
    divider(&mut out);
    row(
        &mut out,
        &format!(
            "{:<8} {:>9} {:>9} {:>9} {:>9} {:>9} {:>8}",
            "Ticker", "Mean", "Median", "Std", "P5", "P95", "Sharpe"
        ),
    );
    divider(&mut out);
    for stats in &report.instruments {
        let sharpe = scored
            .iter()
            .find(|s| s.ticker == stats.ticker)
            .map(|s| s.sharpe_ratio)
            .unwrap_or_default();
        row(
            &mut out,
            &format!(
                "{:<8} {:>+8.2}% {:>+8.2}% {:>8.2}% {:>+8.2}% {:>+8.2}% {:>8.3}",
                stats.ticker,
                stats.mean_annual_return * 100.0,
                stats.median_annual_return * 100.0,
                stats.std_annual_return * 100.0,
                stats.percentile_5 * 100.0,
                stats.percentile_95 * 100.0,
                sharpe
            ),
        );
    }
    bottom(&mut out);
    out
}

// ──────────────────────────────────────────────────────────────────────────────
// Allocation
// ──────────────────────────────────────────────────────────────────────────────

pub fn render_allocation(allocation: &Allocation, comparison: Option<&EqualWeightComparison>) -> String {
    let mut out = String::new();
    top(&mut out);
    title(&mut out, &format!("{} Portfolio Allocation", allocation.strategy));
    divider(&mut out);

    if allocation.weights.is_empty() {
        row(&mut out, "No instruments allocated.");
        bottom(&mut out);
        return out;
    }

    let summary = &allocation.summary;
    row(&mut out, &format!("Expected Annual Return : {:>+8.2}%", summary.portfolio_return * 100.0));
    row(&mut out, &format!("Portfolio Std Dev      : {:>8.2}%", summary.portfolio_std * 100.0));
    row(&mut out, &format!("Sharpe Ratio           : {:>8.4}", summary.portfolio_sharpe));
    row(&mut out, &format!("Holdings               : {:>8}", summary.num_stocks));
    if allocation.fallback_used {
        row(&mut out, "Lattice search infeasible: equal-weight fallback used");
    }
    divider(&mut out);

    let mut sorted: Vec<(&str, f64)> = allocation.weights.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (ticker, weight) in sorted {
        row(&mut out, &format!("{:<8} {:>7.2}%", ticker, weight * 100.0));
    }

    if let Some(c) = comparison {
        divider(&mut out);
        title(&mut out, "vs Equal Weight (same holdings)");
        row(
            &mut out,
            &format!("{:<10} {:>12} {:>12} {:>12}", "", "Allocation", "Equal", "Diff"),
        );
        row(
            &mut out,
            &format!(
                "{:<10} {:>+11.2}% {:>+11.2}% {:>+11.2}%",
                "Return",
                c.allocation.portfolio_return * 100.0,
                c.equal_weight.portfolio_return * 100.0,
                c.return_diff * 100.0
            ),
        );
        row(
            &mut out,
            &format!(
                "{:<10} {:>11.2}% {:>11.2}% {:>+11.2}%",
                "Std Dev",
                c.allocation.portfolio_std * 100.0,
                c.equal_weight.portfolio_std * 100.0,
                c.std_diff * 100.0
            ),
        );
        row(
            &mut out,
            &format!(
                "{:<10} {:>12.4} {:>12.4} {:>+12.4}",
                "Sharpe", c.allocation.portfolio_sharpe, c.equal_weight.portfolio_sharpe, c.sharpe_diff
            ),
        );
    }

    bottom(&mut out);
    out
}

// ──────────────────────────────────────────────────────────────────────────────
// Whole shares
// ──────────────────────────────────────────────────────────────────────────────

pub fn render_shares(shares: &ShareAllocation) -> String {
    let mut out = String::new();
    top(&mut out);
    title(&mut out, &format!("Whole-Share Allocation (${:.2} budget)", shares.budget));
    divider(&mut out);
    row(
        &mut out,
        &format!(
            "{:<8} {:>8} {:>11} {:>13} {:>9} {:>9}",
            "Ticker", "Shares", "Price", "Cost", "Target", "Actual"
        ),
    );
    divider(&mut out);
    for h in &shares.holdings {
        row(
            &mut out,
            &format!(
                "{:<8} {:>8} {:>11.2} {:>13.2} {:>8.2}% {:>8.2}%",
                h.ticker,
                h.shares,
                h.price,
                h.cost,
                h.target_weight * 100.0,
                h.actual_weight * 100.0
            ),
        );
    }
    divider(&mut out);
    row(&mut out, &format!("Total Spent    : ${:.2}", shares.total_spent));
    row(&mut out, &format!("Cash Remaining : ${:.2}", shares.cash_remaining));
    row(&mut out, &format!("Sweep Purchases: {}", shares.sweep_purchases));
    if !shares.unpriced.is_empty() {
        row(&mut out, &format!("No price for   : {}", shares.unpriced.join(", ")));
    }
    bottom(&mut out);
    out
}

// ──────────────────────────────────────────────────────────────────────────────
// Benchmark
// ──────────────────────────────────────────────────────────────────────────────

pub fn render_benchmark(summary: &BenchmarkSummary) -> String {
    let mut out = String::new();
    top(&mut out);
    title(&mut out, "Allocator Benchmark");
    divider(&mut out);
    row(
        &mut out,
        &format!(
            "{:<13} {:>18} {:>10} {:>8} {:>8} {:>7}",
            "Algorithm", "Time (ms)", "Return", "Std", "Sharpe", "Stocks"
        ),
    );
    divider(&mut out);
    for r in &summary.records {
        row(
            &mut out,
            &format!(
                "{:<13} {:>9.3} ± {:<6.3} {:>+9.2}% {:>7.2}% {:>8.4} {:>7}",
                r.strategy.label(),
                r.mean_time_ms,
                r.std_time_ms,
                r.portfolio_return * 100.0,
                r.portfolio_std * 100.0,
                r.portfolio_sharpe,
                r.num_stocks
            ),
        );
    }
    divider(&mut out);

    let find = |strategy| summary.records.iter().find(|r| r.strategy == strategy);
    if let Some(r) = summary.fastest.and_then(find) {
        row(&mut out, &format!("Fastest     : {} ({:.3} ms)", r.strategy, r.mean_time_ms));
    }
    if let Some(r) = summary.best_return.and_then(find) {
        row(&mut out, &format!("Best Return : {} ({:+.2}%)", r.strategy, r.portfolio_return * 100.0));
    }
    if let Some(r) = summary.best_sharpe.and_then(find) {
        row(&mut out, &format!("Best Sharpe : {} ({:.4})", r.strategy, r.portfolio_sharpe));
    }
    bottom(&mut out);
    out
}
