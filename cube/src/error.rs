//! Errors raised while building an interference cube.
//!
//! Parameter problems are detected once, when settings are validated, and are
//! never recovered. The only recoverable kind is a damaged elevation cache,
//! which the pipeline answers by recomputing.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cube operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between settings and a finished cube.
#[derive(Debug, Error)]
pub enum Error {
    /// Tessellation resolution is not a positive power of two.
    #[error("invalid resolution {0}: nside must be a positive power of two no larger than 2^29")]
    InvalidResolution(i64),

    /// Altitude bounds or count make no sense.
    #[error("invalid altitude range: {0}")]
    InvalidAltitudeRange(String),

    /// Frequency axis bounds or step make no sense.
    #[error("invalid frequency range: {0}")]
    InvalidFrequencyRange(String),

    /// Beam pattern name is neither of the two analytic shapes.
    #[error("unknown beam pattern {0:?}, expected \"cos square\" or \"sin square\"")]
    UnknownBeamPattern(String),

    /// No transmitters left to aggregate.
    #[error("transmitter table is empty")]
    EmptyTransmitterTable,

    /// Elevation cache file exists but cannot be used.
    #[error("elevation cache {path} is unusable: {reason}")]
    CacheCorruption { path: PathBuf, reason: String },

    /// A numeric input is outside its physical domain.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A query index lies outside the cube.
    #[error("{axis} index {index} out of range (length {len})")]
    OutOfRange {
        axis: &'static str,
        index: usize,
        len: usize,
    },

    /// Configuration text could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transmitter database could not be parsed.
    #[error("transmitter database error: {0}")]
    Csv(#[from] csv::Error),

    /// Filesystem failure outside the cache recovery path.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the pipeline may recover from this error on its own.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::CacheCorruption { .. })
    }

    pub(crate) fn cache(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CacheCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
