//! Jacobians of the process and measurement models
//!
//! The process model is affine in the state for a fixed control input, so its Jacobian depends only on the
//! time step. The measurement model is a pure selection of the position block, so its Jacobian is constant.
//!
//! # State Ordering
//!
//! ```text
//! x = [p_x, p_y, p_z, v_x, v_y, v_z, roll, pitch, yaw, p, q, r]
//! ```
//!
//! # Usage Example
//!
//! ```rust
//! use drone_ekf::linearize::{position_measurement_jacobian, state_transition_jacobian};
//!
//! let f_matrix = state_transition_jacobian(0.01);
//! let h_matrix = position_measurement_jacobian();
//!
//! // Use in EKF: P(+) = F*P(-)*F^T + Q
//! // Use in measurement update: K = P*H^T*(H*P*H^T + R)^-1
//! assert_eq!(f_matrix[(0, 3)], 0.01);
//! assert_eq!(h_matrix[(2, 2)], 1.0);
//! ```

use nalgebra::Matrix3;

use crate::{MeasurementJacobian, POSITION_INDEX, StateCovariance, VELOCITY_INDEX};

/// Compute the state transition Jacobian (F) of [`crate::forward`]
///
/// ```text
///     [ I  dt*I  0  0 ]
/// F = [ 0   I    0  0 ]
///     [ 0   0    I  0 ]
///     [ 0   0    0  I ]
/// ```
///
/// The attitude block does not depend on the angular-rate states because the gyro input, not the
/// stored rate, drives the Euler angle integration.
pub fn state_transition_jacobian(dt: f64) -> StateCovariance {
    let mut f = StateCovariance::identity();
    f.fixed_view_mut::<3, 3>(POSITION_INDEX, VELOCITY_INDEX)
        .copy_from(&(Matrix3::identity() * dt));
    f
}

/// Measurement Jacobian (H) for a direct position observation, `H = [I | 0]`
pub fn position_measurement_jacobian() -> MeasurementJacobian {
    let mut h = MeasurementJacobian::zeros();
    h.fixed_view_mut::<3, 3>(0, POSITION_INDEX)
        .copy_from(&Matrix3::identity());
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ControlInput, StateVector, forward};
    use nalgebra::Vector3;

    #[test]
    fn transition_jacobian_structure() {
        let dt = 0.25;
        let f = state_transition_jacobian(dt);
        for i in 0..12 {
            for j in 0..12 {
                let expected = if i == j {
                    1.0
                } else if i < 3 && j == i + 3 {
                    dt
                } else {
                    0.0
                };
                assert_eq!(f[(i, j)], expected, "F[({i}, {j})]");
            }
        }
    }

    #[test]
    fn transition_jacobian_matches_finite_difference() {
        // The model is affine in x, so F*dx is exactly the change in forward() for any dx
        let dt = 0.1;
        let u = ControlInput::new(Vector3::new(0.3, -0.2, 9.0), Vector3::new(0.01, 0.02, 0.03));
        let x = StateVector::from_fn(|i, _| (i as f64) * 0.1);
        let base = forward(&x, &u, dt);
        let f = state_transition_jacobian(dt);
        for j in 0..12 {
            let mut dx = StateVector::zeros();
            dx[j] = 1e-3;
            let perturbed = forward(&(x + dx), &u, dt);
            let numeric = (perturbed - base) / 1e-3;
            let analytic = f.column(j);
            for i in 0..12 {
                assert!((numeric[i] - analytic[i]).abs() < 1e-9, "column {j}, row {i}");
            }
        }
    }

    #[test]
    fn measurement_jacobian_selects_position() {
        let h = position_measurement_jacobian();
        let x = StateVector::from_fn(|i, _| i as f64 + 1.0);
        let z = h * x;
        assert_eq!(z, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(h.fixed_view::<3, 9>(0, 3).iter().filter(|v| **v != 0.0).count(), 0);
    }

    #[test]
    fn zero_dt_jacobian_is_identity() {
        assert_eq!(state_transition_jacobian(0.0), StateCovariance::identity());
    }
}
