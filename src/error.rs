use thiserror::Error;

/// Failures the allocation engine reports instead of producing NaN-based results.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("{ticker}: need at least 2 daily return observations, got {observations}")]
    InsufficientHistory { ticker: String, observations: usize },

    #[error("{ticker}: historical {statistic} is not finite")]
    NonFiniteStatistic {
        ticker: String,
        statistic: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed price table: {0}")]
    MalformedTable(String),

    #[error("budget must be finite and non-negative, got {0}")]
    InvalidBudget(f64),
}

pub type EngineResult<T> = Result<T, EngineError>;
