use crate::error::{EngineError, EngineResult};
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

// ──────────────────────────────────────────────────────────────────────────────
// Defaults
// ──────────────────────────────────────────────────────────────────────────────

/// Annual risk-free rate (AAA bond yield) used in every Sharpe calculation.
pub const RISK_FREE_RATE: f64 = 0.0554;

/// Smallest weight an included instrument may carry.
pub const MIN_ALLOCATION_PER_STOCK: f64 = 0.005;

/// Largest weight any single instrument may carry.
pub const MAX_ALLOCATION_PER_STOCK: f64 = 0.20;

/// Number of integer units the unit allocation interval is split into (1 unit = 1%).
pub const DISCRETIZATION_STEPS: usize = 100;

/// How many unit levels below full allocation still count as a finished portfolio.
pub const TOLERANCE_UNITS: usize = 10;

/// Greedy portfolios at or below this size get per-instrument weight bounds.
pub const CONCENTRATION_THRESHOLD: usize = 15;

/// Monte Carlo paths drawn per instrument.
pub const NUM_SIMULATIONS: usize = 10_000;

/// Trading days compounded into one simulated annual return.
pub const TRADING_DAYS_PER_YEAR: usize = 252;

/// Number of instruments the ranked allocators keep by default.
pub const DEFAULT_TARGET_NUM_STOCKS: usize = 10;

// ──────────────────────────────────────────────────────────────────────────────
// Allocator configuration
// ──────────────────────────────────────────────────────────────────────────────

/// Every tunable the simulator, scorer, allocators and quantizer read.
///
/// Passed explicitly into each entry point so tests can vary any constant
/// without touching shared state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AllocatorConfig {
    pub risk_free_rate: f64,
    pub min_alloc: f64,
    pub max_alloc: f64,
    pub discretization_steps: usize,
    pub tolerance_units: usize,
    pub concentration_threshold: usize,
    pub num_simulations: usize,
    pub trading_days: usize,
    /// Fixed RNG seed; `None` draws a fresh one per simulation run.
    pub seed: Option<u64>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: RISK_FREE_RATE,
            min_alloc: MIN_ALLOCATION_PER_STOCK,
            max_alloc: MAX_ALLOCATION_PER_STOCK,
            discretization_steps: DISCRETIZATION_STEPS,
            tolerance_units: TOLERANCE_UNITS,
            concentration_threshold: CONCENTRATION_THRESHOLD,
            num_simulations: NUM_SIMULATIONS,
            trading_days: TRADING_DAYS_PER_YEAR,
            seed: None,
        }
    }
}

impl AllocatorConfig {
    /// Defaults overridden by any `MONTEFOLIO_*` environment variables that parse.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            risk_free_rate: env_override("MONTEFOLIO_RISK_FREE_RATE")
                .unwrap_or(defaults.risk_free_rate),
            min_alloc: env_override("MONTEFOLIO_MIN_ALLOC").unwrap_or(defaults.min_alloc),
            max_alloc: env_override("MONTEFOLIO_MAX_ALLOC").unwrap_or(defaults.max_alloc),
            discretization_steps: env_override("MONTEFOLIO_DISCRETIZATION_STEPS")
                .unwrap_or(defaults.discretization_steps),
            tolerance_units: env_override("MONTEFOLIO_TOLERANCE_UNITS")
                .unwrap_or(defaults.tolerance_units),
            concentration_threshold: env_override("MONTEFOLIO_CONCENTRATION_THRESHOLD")
                .unwrap_or(defaults.concentration_threshold),
            num_simulations: env_override("MONTEFOLIO_NUM_SIMULATIONS")
                .unwrap_or(defaults.num_simulations),
            trading_days: env_override("MONTEFOLIO_TRADING_DAYS")
                .unwrap_or(defaults.trading_days),
            seed: env_override("MONTEFOLIO_SEED").or(defaults.seed),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_risk_free_rate(mut self, rate: f64) -> Self {
        self.risk_free_rate = rate;
        self
    }

    pub fn with_bounds(mut self, min_alloc: f64, max_alloc: f64) -> Self {
        self.min_alloc = min_alloc;
        self.max_alloc = max_alloc;
        self
    }

    pub fn with_simulation(mut self, num_simulations: usize, trading_days: usize) -> Self {
        self.num_simulations = num_simulations;
        self.trading_days = trading_days;
        self
    }

    /// Smallest per-instrument amount on the allocation lattice, never below one unit.
    pub fn min_units(&self) -> usize {
        lattice_units(self.min_alloc, self.discretization_steps).max(1)
    }

    /// Largest per-instrument amount on the allocation lattice.
    pub fn max_units(&self) -> usize {
        lattice_units(self.max_alloc, self.discretization_steps).min(self.discretization_steps)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !self.risk_free_rate.is_finite() {
            return Err(EngineError::InvalidConfig(format!(
                "risk_free_rate must be finite, got {}",
                self.risk_free_rate
            )));
        }
        if !(self.min_alloc >= 0.0 && self.min_alloc <= self.max_alloc && self.max_alloc <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "allocation bounds must satisfy 0 <= min ({}) <= max ({}) <= 1",
                self.min_alloc, self.max_alloc
            )));
        }
        if self.discretization_steps == 0 {
            return Err(EngineError::InvalidConfig(
                "discretization_steps must be at least 1".to_string(),
            ));
        }
        if self.tolerance_units > self.discretization_steps {
            return Err(EngineError::InvalidConfig(format!(
                "tolerance_units ({}) cannot exceed discretization_steps ({})",
                self.tolerance_units, self.discretization_steps
            )));
        }
        if self.max_units() < self.min_units() {
            return Err(EngineError::InvalidConfig(format!(
                "max_alloc {} is below one discretization unit of {} steps",
                self.max_alloc, self.discretization_steps
            )));
        }
        if self.num_simulations == 0 || self.trading_days == 0 {
            return Err(EngineError::InvalidConfig(
                "num_simulations and trading_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn lattice_units(fraction: f64, steps: usize) -> usize {
    // Epsilon absorbs products like 0.29 * 100 = 28.999999999999996.
    (fraction * steps as f64 + 1e-9).floor().max(0.0) as usize
}

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparsable {}={}; using default", key, trimmed);
            None
        }
    }
}

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}
