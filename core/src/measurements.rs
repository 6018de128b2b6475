//! Position observations from an external pose source.
//!
//! This module defines the measurement model used by the filter (a direct observation of the world-frame
//! position) together with the parser that turns a recorded pose field into a measurement. The parser
//! accepts the formats seen in vision logs:
//!
//! - a parenthesized tuple, `"(x, y, z, qx, qy, qz, qw)"`, where only the first three fields are used,
//! - a bare comma separated list, `"x, y, z"`,
//! - whitespace separated values, `"x y z"`.
//!
//! Parsing never reaches into the filter. A pose that cannot be parsed yields a [`PoseParseError`] and
//! the driver decides what to do with the step (see [`crate::sim::PosePolicy`]).

use std::fmt::{self, Display};
use std::str::FromStr;

use nalgebra::Vector3;
use thiserror::Error;

use crate::error::FilterError;
use crate::{MEASUREMENT_SIZE, POSITION_INDEX, StateVector};

/// Reasons a pose field could not be turned into a position measurement
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseParseError {
    #[error("pose field is empty")]
    Empty,
    #[error("pose field has {found} value(s), expected at least 3")]
    TooFewFields { found: usize },
    #[error("pose field contains an invalid number: {0:?}")]
    InvalidNumber(String),
    #[error("pose field contains a non-finite value")]
    NonFinite,
}

/// World-frame position observation (meters)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PositionMeasurement {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
impl Display for PositionMeasurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PositionMeasurement(x: {:.4}, y: {:.4}, z: {:.4})",
            self.x, self.y, self.z
        )
    }
}
impl PositionMeasurement {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        PositionMeasurement { x, y, z }
    }
    /// Get the measurement in a vector format
    pub fn get_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
    /// Measurement model `h(x)`: the position block of the state.
    pub fn get_expected_measurement(&self, state: &StateVector) -> Vector3<f64> {
        expected_position(state)
    }
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}
impl From<Vector3<f64>> for PositionMeasurement {
    fn from(v: Vector3<f64>) -> Self {
        PositionMeasurement::new(v[0], v[1], v[2])
    }
}
impl TryFrom<&[f64]> for PositionMeasurement {
    type Error = FilterError;
    fn try_from(slice: &[f64]) -> Result<Self, Self::Error> {
        if slice.len() != MEASUREMENT_SIZE {
            return Err(FilterError::invalid(format!(
                "observation must have length {MEASUREMENT_SIZE}, got {}",
                slice.len()
            )));
        }
        Ok(PositionMeasurement::new(slice[0], slice[1], slice[2]))
    }
}
impl FromStr for PositionMeasurement {
    type Err = PoseParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_pose(s)
    }
}

/// Measurement model `z = h(x)`, the first three state components.
pub fn expected_position(state: &StateVector) -> Vector3<f64> {
    state.fixed_rows::<3>(POSITION_INDEX).into_owned()
}

/// Parse a recorded pose field into a position measurement.
///
/// # Arguments
/// * `pose` - The raw text of the pose column.
///
/// # Returns
/// The first three numeric fields as a [`PositionMeasurement`]. Extra trailing fields (orientation,
/// timestamps, ...) are ignored.
///
/// # Example
/// ```rust
/// use drone_ekf::measurements::parse_pose;
///
/// let z = parse_pose("(1.0, 2.5, -0.3, 0.0, 0.0, 0.0, 1.0)").unwrap();
/// assert_eq!(z.y, 2.5);
/// assert!(parse_pose("").is_err());
/// ```
pub fn parse_pose(pose: &str) -> Result<PositionMeasurement, PoseParseError> {
    let pose = pose.trim();
    if pose.is_empty() {
        return Err(PoseParseError::Empty);
    }
    if let Some(inner) = pose.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
        let fields: Vec<&str> = inner.split(',').map(str::trim).collect();
        return parse_fields(&fields);
    }
    let stripped = pose.replace(['(', ')'], "");
    let mut fields: Vec<&str> = stripped.split(',').map(str::trim).collect();
    if fields.len() < MEASUREMENT_SIZE {
        fields = stripped.split_whitespace().collect();
    }
    parse_fields(&fields)
}

fn parse_fields(fields: &[&str]) -> Result<PositionMeasurement, PoseParseError> {
    if fields.len() < MEASUREMENT_SIZE {
        return Err(PoseParseError::TooFewFields {
            found: fields.iter().filter(|f| !f.is_empty()).count(),
        });
    }
    let mut values = [0.0; MEASUREMENT_SIZE];
    for (value, field) in values.iter_mut().zip(fields) {
        *value = field
            .parse::<f64>()
            .map_err(|_| PoseParseError::InvalidNumber(field.to_string()))?;
        if !value.is_finite() {
            return Err(PoseParseError::NonFinite);
        }
    }
    Ok(PositionMeasurement::new(values[0], values[1], values[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn parses_tuple_with_trailing_fields() {
        let z = parse_pose("(1.5, -2.0, 3.25, 0.0, 0.0, 0.0, 1.0)").unwrap();
        assert_approx_eq!(z.x, 1.5);
        assert_approx_eq!(z.y, -2.0);
        assert_approx_eq!(z.z, 3.25);
    }

    #[test]
    fn parses_padded_tuple() {
        let z = parse_pose("   ( 4 ,5,  6 )  ").unwrap();
        assert_eq!(z, PositionMeasurement::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn parses_bare_comma_list() {
        let z = parse_pose("0.1,0.2,0.3").unwrap();
        assert_eq!(z.get_vector(), Vector3::new(0.1, 0.2, 0.3));
    }

    #[test]
    fn parses_whitespace_separated() {
        let z = parse_pose("7.0 8.0 9.0 10.0").unwrap();
        assert_eq!(z, PositionMeasurement::new(7.0, 8.0, 9.0));
    }

    #[test]
    fn unbalanced_parentheses_fall_back_to_list() {
        let z = parse_pose("(1, 2, 3").unwrap();
        assert_eq!(z, PositionMeasurement::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn rejects_empty_and_short_fields() {
        assert_eq!(parse_pose("   "), Err(PoseParseError::Empty));
        assert_eq!(
            parse_pose("(1.0, 2.0)"),
            Err(PoseParseError::TooFewFields { found: 2 })
        );
        assert_eq!(
            parse_pose("1.0 2.0"),
            Err(PoseParseError::TooFewFields { found: 2 })
        );
    }

    #[test]
    fn rejects_bad_numbers() {
        assert_eq!(
            parse_pose("(1.0, abc, 3.0)"),
            Err(PoseParseError::InvalidNumber("abc".to_string()))
        );
        assert_eq!(parse_pose("(1.0, NaN, 3.0)"), Err(PoseParseError::NonFinite));
        assert_eq!(parse_pose("inf 0 0"), Err(PoseParseError::NonFinite));
    }

    #[test]
    fn from_str_and_slice() {
        let z: PositionMeasurement = "(1, 1, 1)".parse().unwrap();
        assert_eq!(z, PositionMeasurement::new(1.0, 1.0, 1.0));
        assert!(PositionMeasurement::try_from([1.0, 2.0].as_slice()).is_err());
        let z = PositionMeasurement::try_from([1.0, 2.0, 3.0].as_slice()).unwrap();
        assert_eq!(z, PositionMeasurement::from(Vector3::new(1.0, 2.0, 3.0)));
    }

    #[test]
    fn expected_measurement_is_position_block() {
        let x = StateVector::from_fn(|i, _| 10.0 + i as f64);
        let z = PositionMeasurement::default();
        assert_eq!(z.get_expected_measurement(&x), Vector3::new(10.0, 11.0, 12.0));
    }

    #[test]
    fn display() {
        let z = PositionMeasurement::new(1.0, 2.0, 3.0);
        assert_eq!(
            format!("{z}"),
            "PositionMeasurement(x: 1.0000, y: 2.0000, z: 3.0000)"
        );
    }
}
