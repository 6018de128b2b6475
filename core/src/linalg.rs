//! Linear algebra helpers for the fixed-size filter matrices.
//!
//! Public API:
//!     pub fn symmetrize(matrix) -> matrix
//!     pub fn all_finite(matrix) -> bool
//!     pub fn condition_number(matrix: &Matrix3<f64>) -> f64
//!     pub fn checked_inverse(matrix: &Matrix3<f64>, max_condition: f64) -> Result<Matrix3<f64>>
//!
//! Everything here works on compile-time sized nalgebra types (`SMatrix`, `Matrix3`), so the filter
//! never allocates and never has to check dimensions at runtime.

use nalgebra::{Matrix3, SMatrix};

use crate::error::{FilterError, Result};

/// Condition number above which the innovation covariance is treated as singular.
pub const MAX_CONDITION_NUMBER: f64 = 1e12;

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Simple matrix symmetrization function that reduces round-off errors associated
/// with floating point arithmetic. The trace and diagonal are unchanged.
///
/// # Arguments
/// * `m` - the matrix to symmetrize
///
/// # Returns
/// A symmetrized version of the input matrix.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    (m + m.transpose()) * 0.5
}

/// True when every element of the matrix (or vector) is finite.
#[inline]
pub fn all_finite<const R: usize, const C: usize>(m: &SMatrix<f64, R, C>) -> bool {
    m.iter().all(|value| value.is_finite())
}

/// Ratio of the largest to the smallest singular value.
///
/// Returns `f64::INFINITY` for rank-deficient matrices and `f64::NAN` when the matrix holds
/// non-finite values.
pub fn condition_number(m: &Matrix3<f64>) -> f64 {
    if !all_finite(m) {
        return f64::NAN;
    }
    let singular_values = m.singular_values();
    let largest = singular_values.max();
    let smallest = singular_values.min();
    if smallest <= 0.0 {
        f64::INFINITY
    } else {
        largest / smallest
    }
}

/// Invert a 3×3 matrix, refusing to do so when it is numerically singular.
///
/// The matrix is rejected if it contains non-finite values, if its condition number exceeds
/// `max_condition`, or if the LU inversion itself fails. In every case the error carries the
/// measured condition number so callers can log it.
pub fn checked_inverse(m: &Matrix3<f64>, max_condition: f64) -> Result<Matrix3<f64>> {
    let condition = condition_number(m);
    // NaN compares false, so it has to be rejected explicitly
    if condition.is_nan() || condition > max_condition {
        return Err(FilterError::SingularMatrix {
            condition_number: condition,
        });
    }
    m.try_inverse().ok_or(FilterError::SingularMatrix {
        condition_number: condition,
    })
}
