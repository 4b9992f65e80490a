use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite number")]
    NotFinite { field: &'static str },
    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be > 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} must be between 0 and 100, got {value}")]
    RateOutOfRange { field: &'static str, value: f64 },
    #[error("duration_periods must be >= 1")]
    NoPeriods,
    #[error("duration_periods must be <= {limit}, got {periods}")]
    TooManyPeriods { periods: u32, limit: u32 },
    #[error("max_delay_months must be <= {limit}, got {max}")]
    DelayRangeTooLarge { max: u32, limit: u32 },
}

#[derive(Debug, Error)]
pub enum PenaltyTableError {
    #[error("unknown jurisdiction: {0}")]
    UnknownJurisdiction(String),
    #[error("penalty rate for {jurisdiction} must be between 0 and 100, got {rate}")]
    InvalidRate { jurisdiction: String, rate: f64 },
    #[error("failed to read penalty table: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse penalty table: {0}")]
    Parse(#[from] toml::de::Error),
}
