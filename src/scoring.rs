use crate::simulation::InstrumentStats;
use serde::Serialize;
use tracing::debug;

/// Per-instrument risk-adjusted score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredInstrument {
    pub ticker: String,
    pub sharpe_ratio: f64,
    pub mean_return: f64,
    pub std_return: f64,
}

impl ScoredInstrument {
    pub fn new(ticker: impl Into<String>, mean_return: f64, std_return: f64, risk_free_rate: f64) -> Self {
        Self {
            ticker: ticker.into(),
            sharpe_ratio: sharpe_ratio(mean_return, std_return, risk_free_rate),
            mean_return,
            std_return,
        }
    }
}

/// `(mean - rf) / std`, or 0 when `std` is not positive.
///
/// A zero-volatility instrument is scored at zero rather than excluded, so
/// it never earns weight from the greedy allocator but can still be picked
/// by the lattice search when it lifts the portfolio ratio.
pub fn sharpe_ratio(mean: f64, std: f64, risk_free_rate: f64) -> f64 {
    if std > 0.0 {
        (mean - risk_free_rate) / std
    } else {
        0.0
    }
}

pub fn score_instruments(stats: &[InstrumentStats], risk_free_rate: f64) -> Vec<ScoredInstrument> {
    stats
        .iter()
        .map(|s| {
            if s.std_annual_return <= 0.0 {
                debug!("{}: zero simulated volatility, Sharpe scored as 0", s.ticker);
            }
            ScoredInstrument::new(
                s.ticker.clone(),
                s.mean_annual_return,
                s.std_annual_return,
                risk_free_rate,
            )
        })
        .collect()
}

/// Instruments by Sharpe ratio, descending. The sort is stable, so equal
/// ratios keep their input order.
pub fn rank_by_sharpe(scored: &[ScoredInstrument]) -> Vec<&ScoredInstrument> {
    let mut ranked: Vec<&ScoredInstrument> = scored.iter().collect();
    ranked.sort_by(|a, b| b.sharpe_ratio.total_cmp(&a.sharpe_ratio));
    ranked
}

/// The first `count` instruments of [`rank_by_sharpe`].
pub fn select_top(scored: &[ScoredInstrument], count: usize) -> Vec<&ScoredInstrument> {
    let mut ranked = rank_by_sharpe(scored);
    ranked.truncate(count);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sharpe_ratio_formula() {
        assert!((sharpe_ratio(0.15, 0.2, 0.05) - 0.5).abs() < 1e-12);
        assert!((sharpe_ratio(0.0, 0.1, 0.05) + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_sharpe_zero_guard() {
        assert_eq!(sharpe_ratio(0.3, 0.0, 0.05), 0.0);
        assert_eq!(sharpe_ratio(0.3, -1.0, 0.05), 0.0);
    }

    #[test]
    fn test_score_instruments_uses_given_rate() {
        let stats = vec![InstrumentStats {
            ticker: "AAA".to_string(),
            mean_annual_return: 0.25,
            median_annual_return: 0.2,
            std_annual_return: 0.4,
            percentile_5: -0.3,
            percentile_95: 0.9,
        }];
        let scored = score_instruments(&stats, 0.05);
        assert_eq!(scored.len(), 1);
        assert_eq!(scored[0].ticker, "AAA");
        assert!((scored[0].sharpe_ratio - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ranking_is_stable_on_ties() {
        let scored = vec![
            ScoredInstrument::new("LOW", 0.10, 0.2, 0.0),
            ScoredInstrument::new("TIE1", 0.20, 0.2, 0.0),
            ScoredInstrument::new("TOP", 0.60, 0.2, 0.0),
            ScoredInstrument::new("TIE2", 0.40, 0.4, 0.0),
        ];
        let ranked: Vec<&str> = rank_by_sharpe(&scored).iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(ranked, vec!["TOP", "TIE1", "TIE2", "LOW"]);

        let top: Vec<&str> = select_top(&scored, 2).iter().map(|s| s.ticker.as_str()).collect();
        assert_eq!(top, vec!["TOP", "TIE1"]);
    }
}
