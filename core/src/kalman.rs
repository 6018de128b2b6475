//! Extended Kalman Filter for the twelve-state drone model
//!
//! This module contains the filter engine. It owns the running state estimate and its covariance and
//! applies the standard EKF recursion using the process model in [`crate::forward`], the measurement model
//! in [`crate::measurements`], and the Jacobians from [`crate::linearize`].
//!
//! The filter starts at the origin with zero velocity, level attitude and no rotation, with an identity
//! covariance. Process noise `Q = q I₁₂` and measurement noise `R = r I₃` are fixed at construction.

use crate::error::{FilterError, Result};
use crate::linalg::{MAX_CONDITION_NUMBER, all_finite, checked_inverse, symmetrize};
use crate::linearize::{position_measurement_jacobian, state_transition_jacobian};
use crate::measurements::PositionMeasurement;
use crate::{
    ANGULAR_RATE_INDEX, ATTITUDE_INDEX, ControlInput, DroneState, NavigationFilter, POSITION_INDEX,
    StateCovariance, StateVector, VELOCITY_INDEX, forward,
};

use std::fmt::{self, Debug, Display};

use log::trace;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Default scale of the isotropic process noise `Q = q I`
pub const DEFAULT_PROCESS_NOISE_SCALE: f64 = 0.05;
/// Default scale of the isotropic measurement noise `R = r I`
pub const DEFAULT_MEASUREMENT_NOISE_SCALE: f64 = 0.1;

/// Form of the covariance measurement update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovarianceUpdate {
    /// `P = (I - K H) P`
    #[default]
    Standard,
    /// Joseph form, `P = (I - K H) P (I - K H)^T + K R K^T`. Better conditioned when the gain is not optimal.
    Joseph,
}

/// Tunable filter parameters
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Scale of the diagonal process noise covariance Q
    #[serde(default = "default_process_noise_scale")]
    pub process_noise_scale: f64,
    /// Scale of the diagonal measurement noise covariance R
    #[serde(default = "default_measurement_noise_scale")]
    pub measurement_noise_scale: f64,
    #[serde(default)]
    pub covariance_update: CovarianceUpdate,
}
fn default_process_noise_scale() -> f64 {
    DEFAULT_PROCESS_NOISE_SCALE
}
fn default_measurement_noise_scale() -> f64 {
    DEFAULT_MEASUREMENT_NOISE_SCALE
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            process_noise_scale: DEFAULT_PROCESS_NOISE_SCALE,
            measurement_noise_scale: DEFAULT_MEASUREMENT_NOISE_SCALE,
            covariance_update: CovarianceUpdate::default(),
        }
    }
}
impl FilterConfig {
    /// Check that both noise scales are finite and non-negative.
    ///
    /// A zero scale is allowed: with `R = 0` the first update after construction is still well posed
    /// because `P` starts as the identity.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("process_noise_scale", self.process_noise_scale),
            ("measurement_noise_scale", self.measurement_noise_scale),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(FilterError::invalid(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// Extended Kalman Filter over the `[p, v, e, w]` state
///
/// # Example
///
/// ```rust
/// use drone_ekf::kalman::ExtendedKalmanFilter;
/// use drone_ekf::measurements::PositionMeasurement;
/// use drone_ekf::{ControlInput, NavigationFilter};
/// use nalgebra::Vector3;
///
/// let mut ekf = ExtendedKalmanFilter::default();
/// let u = ControlInput::new(Vector3::new(1.0, 0.0, 0.0), Vector3::zeros());
/// ekf.predict(&u, 1.0).unwrap();
/// assert_eq!(ekf.velocity()[0], 1.0);
///
/// ekf.update(&PositionMeasurement::new(1.0, 0.0, 0.0)).unwrap();
/// assert!(ekf.position()[0] > 0.0 && ekf.position()[0] < 1.0);
/// ```
#[derive(Clone)]
pub struct ExtendedKalmanFilter {
    /// State estimate vector
    mean_state: StateVector,
    /// State covariance matrix
    covariance: StateCovariance,
    /// Process noise covariance matrix Q
    process_noise: StateCovariance,
    /// Measurement noise covariance matrix R
    measurement_noise: Matrix3<f64>,
    covariance_update: CovarianceUpdate,
}

impl Debug for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EKF")
            .field("mean_state", &self.mean_state.as_slice())
            .field("covariance_diagonal", &self.covariance.diagonal().as_slice())
            .field("process_noise_diagonal", &self.process_noise.diagonal().as_slice())
            .field(
                "measurement_noise_diagonal",
                &self.measurement_noise.diagonal().as_slice(),
            )
            .field("covariance_update", &self.covariance_update)
            .finish()
    }
}

impl Display for ExtendedKalmanFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedKalmanFilter")
            .field("state", &self.drone_state())
            .field("covariance_trace", &self.covariance.trace())
            .finish()
    }
}

impl Default for ExtendedKalmanFilter {
    fn default() -> Self {
        ExtendedKalmanFilter::new(DEFAULT_PROCESS_NOISE_SCALE, DEFAULT_MEASUREMENT_NOISE_SCALE)
    }
}

impl ExtendedKalmanFilter {
    /// Create a new filter at the origin with `P = I`, `Q = q I` and `R = r I`.
    ///
    /// # Arguments
    ///
    /// * `process_noise_scale` - `q`, the process noise added to every state on each predict
    /// * `measurement_noise_scale` - `r`, the variance of each position observation axis
    ///
    /// The scales are used as given; use [`ExtendedKalmanFilter::from_config`] to have them checked.
    pub fn new(process_noise_scale: f64, measurement_noise_scale: f64) -> ExtendedKalmanFilter {
        ExtendedKalmanFilter {
            mean_state: StateVector::zeros(),
            covariance: StateCovariance::identity(),
            process_noise: StateCovariance::identity() * process_noise_scale,
            measurement_noise: Matrix3::identity() * measurement_noise_scale,
            covariance_update: CovarianceUpdate::Standard,
        }
    }

    /// Create a filter from a validated [`FilterConfig`].
    pub fn from_config(config: &FilterConfig) -> Result<ExtendedKalmanFilter> {
        config.validate()?;
        let mut ekf =
            ExtendedKalmanFilter::new(config.process_noise_scale, config.measurement_noise_scale);
        ekf.covariance_update = config.covariance_update;
        Ok(ekf)
    }

    /// Full twelve element state estimate
    pub fn state(&self) -> StateVector {
        self.mean_state
    }
    /// Structured copy of the state estimate
    pub fn drone_state(&self) -> DroneState {
        DroneState::from(&self.mean_state)
    }
    pub fn position(&self) -> Vector3<f64> {
        self.mean_state.fixed_rows::<3>(POSITION_INDEX).into_owned()
    }
    pub fn velocity(&self) -> Vector3<f64> {
        self.mean_state.fixed_rows::<3>(VELOCITY_INDEX).into_owned()
    }
    /// Roll, pitch, yaw in radians (not wrapped)
    pub fn attitude(&self) -> Vector3<f64> {
        self.mean_state.fixed_rows::<3>(ATTITUDE_INDEX).into_owned()
    }
    pub fn angular_rate(&self) -> Vector3<f64> {
        self.mean_state
            .fixed_rows::<3>(ANGULAR_RATE_INDEX)
            .into_owned()
    }
    pub fn covariance(&self) -> &StateCovariance {
        &self.covariance
    }
    pub fn process_noise(&self) -> &StateCovariance {
        &self.process_noise
    }
    pub fn measurement_noise(&self) -> &Matrix3<f64> {
        &self.measurement_noise
    }
    /// One standard deviation of the position estimate along each axis
    pub fn position_std(&self) -> Vector3<f64> {
        self.covariance
            .fixed_view::<3, 3>(POSITION_INDEX, POSITION_INDEX)
            .diagonal()
            .map(|v| v.max(0.0).sqrt())
    }
}

impl NavigationFilter for ExtendedKalmanFilter {
    /// Predict step: propagate state and covariance with the control input
    ///
    /// $$
    /// \bar{x} = f(x, u, dt) \qquad \bar{P} = F P F^T + Q
    /// $$
    ///
    /// # Errors
    ///
    /// [`FilterError::InvalidInput`] if `dt` is negative, any value is NaN/infinite, or the propagated
    /// state or covariance overflows. The estimate is not modified in that case.
    fn predict(&mut self, control_input: &ControlInput, dt: f64) -> Result<()> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(FilterError::invalid(format!(
                "dt must be finite and non-negative, got {dt}"
            )));
        }
        if !control_input.is_finite() {
            return Err(FilterError::invalid(format!(
                "control input contains non-finite values: {control_input}"
            )));
        }
        let f = state_transition_jacobian(dt);
        let mean_state = forward(&self.mean_state, control_input, dt);
        let covariance = symmetrize(&(f * self.covariance * f.transpose() + self.process_noise));
        if !all_finite(&mean_state) || !all_finite(&covariance) {
            return Err(FilterError::invalid(format!(
                "prediction over dt = {dt} overflows the state or covariance"
            )));
        }

        self.mean_state = mean_state;
        self.covariance = covariance;
        Ok(())
    }

    /// Update step: correct the estimate with a position observation
    ///
    /// $$
    /// \begin{aligned}
    /// y &= z - h(\bar{x}) \\\\
    /// S &= H P H^T + R \\\\
    /// K &= P H^T S^{-1} \\\\
    /// x &= \bar{x} + K y \\\\
    /// P &= (I - K H) P
    /// \end{aligned}
    /// $$
    ///
    /// # Errors
    ///
    /// * [`FilterError::InvalidInput`] if the observation holds NaN/infinite values or the corrected
    ///   estimate overflows.
    /// * [`FilterError::SingularMatrix`] if `S` cannot be inverted reliably.
    ///
    /// Nothing is modified when an error is returned.
    fn update(&mut self, measurement: &PositionMeasurement) -> Result<()> {
        if !measurement.is_finite() {
            return Err(FilterError::invalid(format!(
                "observation contains non-finite values: {measurement}"
            )));
        }
        let h = position_measurement_jacobian();
        let innovation =
            measurement.get_vector() - measurement.get_expected_measurement(&self.mean_state);
        let s = symmetrize(&(h * self.covariance * h.transpose() + self.measurement_noise));
        let s_inv = checked_inverse(&s, MAX_CONDITION_NUMBER)?;
        let k = self.covariance * h.transpose() * s_inv;
        trace!(
            "EKF update: innovation = [{:.4}, {:.4}, {:.4}]",
            innovation[0], innovation[1], innovation[2]
        );

        let mean_state = self.mean_state + k * innovation;
        let i_kh = StateCovariance::identity() - k * h;
        let covariance = match self.covariance_update {
            CovarianceUpdate::Standard => i_kh * self.covariance,
            CovarianceUpdate::Joseph => {
                i_kh * self.covariance * i_kh.transpose()
                    + k * self.measurement_noise * k.transpose()
            }
        };
        let covariance = symmetrize(&covariance);
        if !all_finite(&mean_state) || !all_finite(&covariance) {
            return Err(FilterError::invalid(
                "measurement update overflows the state or covariance",
            ));
        }

        self.mean_state = mean_state;
        self.covariance = covariance;
        Ok(())
    }

    fn get_estimate(&self) -> StateVector {
        self.mean_state
    }

    fn get_certainty(&self) -> StateCovariance {
        self.covariance
    }
}
