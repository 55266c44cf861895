use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a triple collocation run.
///
/// Non-convergence is not an error: it is reported through
/// [`Outcome::converged`](crate::tripcol::Outcome::converged).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },

    #[error("malformed collocation in {source_name} at line {line}: {reason} (`{content}`)")]
    MalformedLine {
        source_name: String,
        line: usize,
        content: String,
        reason: String,
    },

    #[error("calibration scale of system {system} is zero")]
    ZeroScale { system: usize },

    /// Fewer than two collocations passed the sigma test.
    #[error(
        "insufficient number of collocations passed the sigma test: {accepted} accepted, {rejected} rejected"
    )]
    InsufficientCollocations { accepted: usize, rejected: usize },

    /// A covariance used as a denominator vanished.
    #[error("covariance C[{row}][{column}] is zero, the covariance equations cannot be solved")]
    DegenerateCovariance { row: usize, column: usize },

    #[error("covariance equations produced a non-finite {quantity}")]
    NonFinite { quantity: &'static str },

    #[error("collocation file {path:?} not found")]
    MissingInput { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}
