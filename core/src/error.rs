//! Error types raised by the navigation filter.
//!
//! Only two things can go wrong inside the filter itself: a caller hands it values it cannot use, or the
//! innovation covariance of an update cannot be inverted. Both are reported before the filter state is
//! touched, so a failed call leaves the estimate exactly as it was.

use thiserror::Error;

/// Errors returned by [`crate::NavigationFilter`] operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// A control input, observation, time step, or configuration value is unusable (wrong length,
    /// NaN/infinite, or out of range).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The innovation covariance `S = H P H^T + R` is not invertible.
    #[error("innovation covariance is singular (condition number {condition_number:e})")]
    SingularMatrix {
        /// Ratio of the largest to smallest singular value of `S` (infinite when `S` is rank deficient)
        condition_number: f64,
    },
}

impl FilterError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        FilterError::InvalidInput(msg.into())
    }
}

/// Helper alias for filter results
pub type Result<T> = std::result::Result<T, FilterError>;
