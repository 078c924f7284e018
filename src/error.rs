//! Error type shared by every kernel in the crate.

use thiserror::Error;

/// Configuration and contract errors raised by the kernels.
///
/// Rejected proposals are not errors: an out-of-range move is reported through a
/// `-inf` target log-probability and left to the acceptance step.
#[derive(Debug, Error)]
pub enum Error {
    /// A configured transition index does not exist in the event tensor.
    #[error("transition index {index} out of range for event tensor with {num_transitions} transitions")]
    TransitionIndexOutOfRange { index: usize, num_transitions: usize },

    /// A timepoint outside `[0, num_times)` was passed to the event algebra.
    #[error("timepoint {t} out of range for event tensor with {num_times} timepoints")]
    TimeOutOfRange { t: usize, num_times: usize },

    /// Moving the requested number of events would leave a negative count.
    #[error("cannot move {requested} events from timepoint {t}, subpopulation {subpopulation}: only {available} available")]
    InsufficientEvents {
        t: usize,
        subpopulation: usize,
        available: u64,
        requested: u64,
    },

    /// The per-subpopulation move vector does not match the tensor.
    #[error("move vector has {actual} entries but the event tensor has {expected} subpopulations")]
    MoveShapeMismatch { expected: usize, actual: usize },

    #[error("covariance matrix must be square, got {rows}x{cols}")]
    NonSquareCovariance { rows: usize, cols: usize },

    #[error("covariance matrix is not positive definite")]
    NotPositiveDefinite,

    #[error("mixture probability p_u must lie in [0, 1], got {0}")]
    InvalidMixtureProbability(f64),

    /// A parameter vector does not have the dimension of the proposal covariance.
    #[error("state has dimension {actual} but the proposal expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The log random walk only acts on strictly positive parameters.
    #[error("log random walk requires a strictly positive state, found {value} at position {position}")]
    NonPositiveState { position: usize, value: f64 },

    /// A results structure ended in a leaf before any `accepted_results` was found.
    #[error("results structure has no accepted_results at any nesting depth")]
    MissingAcceptedResults,

    #[error("expected {expected} state blocks, got {actual}")]
    BlockCountMismatch { expected: usize, actual: usize },

    /// A Gibbs block holds a different kind of state than its kernel acts on.
    #[error("state block holds {found} but its kernel expects {expected}")]
    StateKindMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
