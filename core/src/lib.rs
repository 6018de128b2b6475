//! Vision-aided drone state estimation
//!
//! This crate estimates the position, velocity, attitude, and angular rate of a drone by fusing IMU-derived
//! control inputs with intermittent position fixes from an external pose source (typically a vision system)
//! using an Extended Kalman Filter (EKF). The filter is implemented as a struct that is constructed once and
//! then driven with `predict` and `update` calls as data arrives. It does not read raw IMU output and is not a
//! driver or firmware: the IMU data is assumed to be pre-processed so that the linear acceleration is already
//! expressed in the world (navigation) frame with gravity removed.
//!
//! This crate is primarily built off of [`nalgebra`](https://crates.io/crates/nalgebra), which provides the
//! fixed-size linear algebra for the filter. All matrices have compile-time dimensions (12 states, 6 inputs,
//! 3 observations), so nothing in the predict/update recursion allocates.
//!
//! ## Crate overview
//!
//! - [kalman]: The Extended Kalman Filter and its configuration.
//! - [linearize]: Jacobians of the process and measurement models.
//! - [measurements]: The position observation type and the parser for textual pose fields.
//! - [linalg]: Fixed-size linear algebra helpers (symmetrization, conditioned inversion).
//! - [error]: The [`FilterError`](error::FilterError) taxonomy.
//! - [sim]: CSV flight logs, the predict/update driver loop, run configuration, and synthetic flights.
//!
//! ## Coordinate and state definitions
//!
//! The twelve-state vector is defined as:
//!
//! $$
//! x = [p_x, p_y, p_z, v_x, v_y, v_z, \phi, \theta, \psi, p, q, r]
//! $$
//!
//! Where:
//! - $p_x$, $p_y$, $p_z$ are the world-frame positions in meters.
//! - $v_x$, $v_y$, $v_z$ are the world-frame velocities in m/s.
//! - $\phi$, $\theta$, $\psi$ are the roll, pitch, and yaw Euler angles in radians.
//! - $p$, $q$, $r$ are the body angular rates in rad/s.
//!
//! The control input is $u = [a_x, a_y, a_z, \omega_x, \omega_y, \omega_z]$: world-frame linear acceleration
//! followed by the gyro angular rates.
//!
//! ## Process model
//!
//! $$
//! p(+) = p(-) + v(-) t \qquad v(+) = v(-) + a t \qquad e(+) = e(-) + \omega t \qquad w(+) = w(-)
//! $$
//!
//! The gyro rates are integrated straight into the Euler angles. The proper body-rate to Euler-rate
//! transformation is *not* applied, so the attitude propagation is only accurate near zero roll and pitch.
//! The stored angular-rate block is held constant between steps and is not overwritten by the gyro input.
//!
//! ## Measurement model
//!
//! The external pose source observes the position block directly, $z = h(x) = [p_x, p_y, p_z]$.

pub mod error;
pub mod kalman;
pub mod linalg;
pub mod linearize;
pub mod measurements;
pub mod sim;

use nalgebra::{SMatrix, SVector, Vector3, Vector6};

use std::fmt::{self, Debug, Display};

pub use crate::error::FilterError;
use crate::error::Result;
use crate::measurements::PositionMeasurement;

/// Number of states in the filter
pub const STATE_SIZE: usize = 12;
/// Number of control inputs (three accelerations, three angular rates)
pub const CONTROL_SIZE: usize = 6;
/// Number of observed quantities (world-frame position)
pub const MEASUREMENT_SIZE: usize = 3;

/// Offset of the position block in the state vector
pub const POSITION_INDEX: usize = 0;
/// Offset of the velocity block in the state vector
pub const VELOCITY_INDEX: usize = 3;
/// Offset of the Euler angle block in the state vector
pub const ATTITUDE_INDEX: usize = 6;
/// Offset of the body angular rate block in the state vector
pub const ANGULAR_RATE_INDEX: usize = 9;

/// Twelve element state vector `[p, v, e, w]`
pub type StateVector = SVector<f64, STATE_SIZE>;
/// 12×12 state covariance
pub type StateCovariance = SMatrix<f64, STATE_SIZE, STATE_SIZE>;
/// 3×12 measurement Jacobian
pub type MeasurementJacobian = SMatrix<f64, MEASUREMENT_SIZE, STATE_SIZE>;

/// Generic Bayesian navigation filter trait
///
/// Both operations are atomic: they either apply completely or return an error and leave the estimate
/// untouched. Calls on one instance must be sequential (enforced by `&mut self`); independent instances
/// share nothing and can be driven from separate threads.
pub trait NavigationFilter {
    /// Propagate the estimate forward by `dt` seconds using the control input.
    fn predict(&mut self, control_input: &ControlInput, dt: f64) -> Result<()>;
    /// Correct the estimate with a position observation.
    fn update(&mut self, measurement: &PositionMeasurement) -> Result<()>;
    /// Current mean state.
    fn get_estimate(&self) -> StateVector;
    /// Current state covariance.
    fn get_certainty(&self) -> StateCovariance;
}

/// Control input for one filter step.
///
/// The acceleration is already rotated into the world frame and gravity compensated. The angular rate is
/// the raw gyro output in the body frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlInput {
    /// Linear acceleration in m/s^2, world frame x, y, z axis
    pub accel: Vector3<f64>,
    /// Angular rate in rad/s, body frame x, y, z axis
    pub gyro: Vector3<f64>,
}
impl ControlInput {
    pub fn new(accel: Vector3<f64>, gyro: Vector3<f64>) -> Self {
        ControlInput { accel, gyro }
    }
    /// The input as `[a_x, a_y, a_z, ω_x, ω_y, ω_z]`
    pub fn to_vector(&self) -> Vector6<f64> {
        Vector6::new(
            self.accel[0],
            self.accel[1],
            self.accel[2],
            self.gyro[0],
            self.gyro[1],
            self.gyro[2],
        )
    }
    pub fn is_finite(&self) -> bool {
        self.accel.iter().chain(self.gyro.iter()).all(|v| v.is_finite())
    }
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput {{ accel: [{:.4}, {:.4}, {:.4}], gyro: [{:.4}, {:.4}, {:.4}] }}",
            self.accel[0], self.accel[1], self.accel[2], self.gyro[0], self.gyro[1], self.gyro[2]
        )
    }
}
impl From<Vector6<f64>> for ControlInput {
    fn from(data: Vector6<f64>) -> Self {
        ControlInput {
            accel: Vector3::new(data[0], data[1], data[2]),
            gyro: Vector3::new(data[3], data[4], data[5]),
        }
    }
}
impl TryFrom<&[f64]> for ControlInput {
    type Error = FilterError;
    /// Builds a control input from `[a_x, a_y, a_z, ω_x, ω_y, ω_z]`.
    fn try_from(slice: &[f64]) -> Result<Self> {
        if slice.len() != CONTROL_SIZE {
            return Err(FilterError::invalid(format!(
                "control input must have length {CONTROL_SIZE}, got {}",
                slice.len()
            )));
        }
        Ok(ControlInput {
            accel: Vector3::new(slice[0], slice[1], slice[2]),
            gyro: Vector3::new(slice[3], slice[4], slice[5]),
        })
    }
}
impl TryFrom<Vec<f64>> for ControlInput {
    type Error = FilterError;
    fn try_from(vec: Vec<f64>) -> Result<Self> {
        Self::try_from(vec.as_slice())
    }
}

/// Structured view of the twelve-state vector.
#[derive(Clone, Copy, Default, PartialEq)]
pub struct DroneState {
    /// World-frame position in meters
    pub position: Vector3<f64>,
    /// World-frame velocity in m/s
    pub velocity: Vector3<f64>,
    /// Roll, pitch, yaw in radians
    pub attitude: Vector3<f64>,
    /// Body angular rate in rad/s
    pub angular_rate: Vector3<f64>,
}
impl Debug for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DroneState")
            .field("position (m)", &self.position.as_slice())
            .field("velocity (m/s)", &self.velocity.as_slice())
            .field(
                "attitude (roll, pitch, yaw in deg)",
                &format_args!(
                    "[{:.2}, {:.2}, {:.2}]",
                    self.attitude[0].to_degrees(),
                    self.attitude[1].to_degrees(),
                    self.attitude[2].to_degrees()
                ),
            )
            .field("angular_rate (rad/s)", &self.angular_rate.as_slice())
            .finish()
    }
}
impl Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DroneState {{ p: [{:.3}, {:.3}, {:.3}] m, v: [{:.3}, {:.3}, {:.3}] m/s, attitude: [{:.2} deg, {:.2} deg, {:.2} deg], w: [{:.3}, {:.3}, {:.3}] rad/s }}",
            self.position[0],
            self.position[1],
            self.position[2],
            self.velocity[0],
            self.velocity[1],
            self.velocity[2],
            self.attitude[0].to_degrees(),
            self.attitude[1].to_degrees(),
            self.attitude[2].to_degrees(),
            self.angular_rate[0],
            self.angular_rate[1],
            self.angular_rate[2]
        )
    }
}
impl From<&StateVector> for DroneState {
    fn from(x: &StateVector) -> Self {
        DroneState {
            position: x.fixed_rows::<3>(POSITION_INDEX).into_owned(),
            velocity: x.fixed_rows::<3>(VELOCITY_INDEX).into_owned(),
            attitude: x.fixed_rows::<3>(ATTITUDE_INDEX).into_owned(),
            angular_rate: x.fixed_rows::<3>(ANGULAR_RATE_INDEX).into_owned(),
        }
    }
}
impl From<StateVector> for DroneState {
    fn from(x: StateVector) -> Self {
        DroneState::from(&x)
    }
}
impl From<&DroneState> for StateVector {
    fn from(state: &DroneState) -> Self {
        let mut x = StateVector::zeros();
        x.fixed_rows_mut::<3>(POSITION_INDEX)
            .copy_from(&state.position);
        x.fixed_rows_mut::<3>(VELOCITY_INDEX)
            .copy_from(&state.velocity);
        x.fixed_rows_mut::<3>(ATTITUDE_INDEX)
            .copy_from(&state.attitude);
        x.fixed_rows_mut::<3>(ANGULAR_RATE_INDEX)
            .copy_from(&state.angular_rate);
        x
    }
}
impl From<DroneState> for StateVector {
    fn from(state: DroneState) -> Self {
        StateVector::from(&state)
    }
}
impl From<DroneState> for Vec<f64> {
    /// Converts a DroneState to a Vec<f64> in `[p, v, e, w]` order, angles in radians.
    fn from(state: DroneState) -> Self {
        StateVector::from(&state).iter().copied().collect()
    }
}
impl TryFrom<&[f64]> for DroneState {
    type Error = FilterError;
    /// Attempts to create a DroneState from a slice of 12 elements assuming angles are in radians.
    fn try_from(slice: &[f64]) -> Result<Self> {
        if slice.len() != STATE_SIZE {
            return Err(FilterError::invalid(format!(
                "state must have length {STATE_SIZE}, got {}",
                slice.len()
            )));
        }
        Ok(DroneState::from(StateVector::from_column_slice(slice)))
    }
}

/// Process model: propagate the state forward by `dt` seconds.
///
/// Position integrates the velocity held *before* the step, velocity integrates the commanded
/// acceleration, and the Euler angles integrate the gyro rates directly. The angular-rate states are
/// carried through unchanged (constant angular velocity between steps).
///
/// # Arguments
/// * `state` - Current twelve-state vector.
/// * `control_input` - Acceleration (world frame) and gyro rates for this step.
/// * `dt` - Time step in seconds.
///
/// # Example
/// ```rust
/// use drone_ekf::{forward, ControlInput, StateVector};
/// use nalgebra::Vector3;
///
/// let x = StateVector::zeros();
/// let u = ControlInput::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
/// let x_next = forward(&x, &u, 1.0);
/// assert_eq!(x_next[0], 0.0); // position used the pre-step velocity
/// assert_eq!(x_next[3], 1.0);
/// ```
pub fn forward(state: &StateVector, control_input: &ControlInput, dt: f64) -> StateVector {
    let position = state.fixed_rows::<3>(POSITION_INDEX);
    let velocity = state.fixed_rows::<3>(VELOCITY_INDEX);
    let attitude = state.fixed_rows::<3>(ATTITUDE_INDEX);

    let mut next = *state;
    next.fixed_rows_mut::<3>(POSITION_INDEX)
        .copy_from(&(position + velocity * dt));
    next.fixed_rows_mut::<3>(VELOCITY_INDEX)
        .copy_from(&(velocity + control_input.accel * dt));
    // Euler-rate shortcut: gyro rates are treated as Euler angle rates
    next.fixed_rows_mut::<3>(ATTITUDE_INDEX)
        .copy_from(&(attitude + control_input.gyro * dt));
    next
}
