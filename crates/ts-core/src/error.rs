//! Error types for ToyStat

use thiserror::Error;

/// ToyStat error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bad run configuration (entries, trials, binning, scan grid, ...)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A fit finished without converging.
    #[error("Fit did not converge: {0}")]
    FitDidNotConverge(String),

    /// Named histogram is missing from a histogram container.
    #[error("Histogram '{name}' not found in {container}")]
    HistogramNotFound {
        /// Container the lookup was made against.
        container: String,
        /// Requested histogram name.
        name: String,
    },

    /// A statistic distribution was requested with too few samples.
    #[error("Insufficient samples: {0}")]
    InsufficientSamples(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
