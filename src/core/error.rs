use thiserror::Error;

/// Configuration rejected at the boundary, before any path is generated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },

    #[error("{field} must be finite")]
    NotFinite { field: &'static str },

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: f64,
        max: f64,
        value: f64,
    },

    #[error("{field} must be > -1 (-100%), got {value}")]
    CagrTooLow { field: &'static str, value: f64 },

    #[error("{field} must be >= 100 percent of base need, got {value}")]
    CeilingBelowTarget { field: &'static str, value: f64 },

    #[error("ALLOC_STOCKS + ALLOC_CRYPTO must not exceed 1, got {total}")]
    AllocationOverflow { total: f64 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("simulation cancelled")]
    Cancelled,

    #[error("market buffer `{buffer}` has {actual} values, expected {expected}")]
    BufferLength {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },
}
