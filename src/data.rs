use crate::error::{EngineError, EngineResult};
use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::prelude::*;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Closing prices for a universe of instruments, one row per trading date.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PriceTable {
    pub dates: Vec<NaiveDate>,
    pub tickers: Vec<String>,
    /// Row-major: `closes[d][i]` is the close of `tickers[i]` on `dates[d]`.
    pub closes: Vec<Vec<f64>>,
}

impl PriceTable {
    pub fn new(dates: Vec<NaiveDate>, tickers: Vec<String>, closes: Vec<Vec<f64>>) -> EngineResult<Self> {
        let table = Self { dates, tickers, closes };
        table.validate()?;
        Ok(table)
    }

    /// Checks the boundary contract: rectangular, ascending dates, finite positive closes.
    pub fn validate(&self) -> EngineResult<()> {
        if self.dates.len() != self.closes.len() {
            return Err(EngineError::MalformedTable(format!(
                "{} dates but {} price rows",
                self.dates.len(),
                self.closes.len()
            )));
        }

        let mut seen = HashSet::with_capacity(self.tickers.len());
        for ticker in &self.tickers {
            if !seen.insert(ticker.as_str()) {
                return Err(EngineError::MalformedTable(format!("duplicate ticker {}", ticker)));
            }
        }

        if let Some(pair) = self.dates.windows(2).find(|w| w[0] >= w[1]) {
            return Err(EngineError::MalformedTable(format!(
                "dates must be strictly ascending ({} then {})",
                pair[0], pair[1]
            )));
        }

        for (row, date) in self.closes.iter().zip(self.dates.iter()) {
            if row.len() != self.tickers.len() {
                return Err(EngineError::MalformedTable(format!(
                    "{}: expected {} closes, got {}",
                    date,
                    self.tickers.len(),
                    row.len()
                )));
            }
            if let Some((i, close)) = row.iter().enumerate().find(|(_, c)| !(c.is_finite() && **c > 0.0)) {
                return Err(EngineError::MalformedTable(format!(
                    "{} on {}: close {} is not a positive number",
                    self.tickers[i], date, close
                )));
            }
        }

        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading price table {}", path.display()))?;
        let table: PriceTable = serde_json::from_str(&raw)
            .with_context(|| format!("parsing price table {}", path.display()))?;
        table.validate()?;

        if let (Some(first), Some(last)) = (table.dates.first(), table.dates.last()) {
            info!(
                "Loaded {} days of closes for {} instruments ({} to {})",
                table.dates.len(),
                table.tickers.len(),
                first,
                last
            );
        }
        Ok(table)
    }

    /// Simple daily returns (`close_t / close_{t-1} - 1`); the first date has no return.
    pub fn daily_returns(&self) -> ReturnTable {
        let columns = (0..self.tickers.len())
            .map(|i| {
                self.closes
                    .windows(2)
                    .map(|w| w[1][i] / w[0][i] - 1.0)
                    .collect()
            })
            .collect();

        ReturnTable {
            tickers: self.tickers.clone(),
            columns,
        }
    }

    /// Last close per instrument, usable as a price snapshot when no live feed is given.
    pub fn latest_prices(&self) -> HashMap<String, f64> {
        match self.closes.last() {
            Some(row) => self
                .tickers
                .iter()
                .cloned()
                .zip(row.iter().copied())
                .collect(),
            None => HashMap::new(),
        }
    }

    /// Seeded random-walk closes over consecutive weekdays, for demos and tests.
    pub fn synthetic(tickers: &[String], days: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        // (drift, daily volatility, last close) per instrument
        let mut walkers: Vec<(f64, f64, f64)> = tickers
            .iter()
            .map(|_| {
                (
                    rng.gen_range(-0.0002..0.0012),
                    rng.gen_range(0.008..0.03),
                    rng.gen_range(20.0..500.0),
                )
            })
            .collect();

        let mut dates = Vec::with_capacity(days);
        let mut closes = Vec::with_capacity(days);
        let mut date = NaiveDate::from_ymd_opt(2013, 1, 2).unwrap_or_default();

        for day in 0..days {
            while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                date += Duration::days(1);
            }

            let row: Vec<f64> = walkers
                .iter_mut()
                .map(|(drift, vol, close)| {
                    if day > 0 {
                        let shock: f64 = rng.sample(StandardNormal);
                        *close *= (1.0 + *drift + *vol * shock).max(0.01);
                    }
                    *close
                })
                .collect();

            dates.push(date);
            closes.push(row);
            date += Duration::days(1);
        }

        Self {
            dates,
            tickers: tickers.to_vec(),
            closes,
        }
    }
}

/// Daily returns per instrument, column-major (`columns[i]` belongs to `tickers[i]`).
#[derive(Clone, Debug, Serialize)]
pub struct ReturnTable {
    pub tickers: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl ReturnTable {
    pub fn new(tickers: Vec<String>, columns: Vec<Vec<f64>>) -> EngineResult<Self> {
        if tickers.len() != columns.len() {
            return Err(EngineError::MalformedTable(format!(
                "{} tickers but {} return columns",
                tickers.len(),
                columns.len()
            )));
        }
        if let Some(first) = columns.first() {
            if let Some(i) = columns.iter().position(|c| c.len() != first.len()) {
                return Err(EngineError::MalformedTable(format!(
                    "{} has {} observations, expected {}",
                    tickers[i],
                    columns[i].len(),
                    first.len()
                )));
            }
        }
        for (ticker, column) in tickers.iter().zip(columns.iter()) {
            if column.iter().any(|r| !r.is_finite()) {
                return Err(EngineError::MalformedTable(format!(
                    "{} contains a non-finite return",
                    ticker
                )));
            }
        }
        Ok(Self { tickers, columns })
    }

    pub fn num_instruments(&self) -> usize {
        self.tickers.len()
    }

    pub fn num_observations(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }
}

/// Reads a `{ticker: price | null}` snapshot. Null entries are dropped, so the
/// quantizer sees them as missing rather than failing the whole call.
pub fn load_live_prices(path: &Path) -> Result<HashMap<String, f64>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading live prices {}", path.display()))?;
    let snapshot: HashMap<String, Option<f64>> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing live prices {}", path.display()))?;

    let mut prices = HashMap::with_capacity(snapshot.len());
    for (ticker, price) in snapshot {
        match price {
            Some(p) => {
                prices.insert(ticker, p);
            }
            None => warn!("{}: no live price available", ticker),
        }
    }
    Ok(prices)
}
