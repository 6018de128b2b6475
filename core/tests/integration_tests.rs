//! End-to-end tests of the drone EKF through its public API.
//!
//! These tests drive the filter the way the command line driver does: a filter instance is
//! constructed with the default tuning and fed IMU inputs and position fixes, either directly or from
//! a generated flight log. They check the closed-form behavior of the mean under constant inputs, the
//! covariance bookkeeping, and that fused estimates track a known trajectory.
//!
//! The accuracy bounds on synthetic flights are regression checks, chosen with a comfortable margin
//! over the errors observed on the generated data.
use assert_approx_eq::assert_approx_eq;
use nalgebra::Vector3;

use drone_ekf::kalman::{CovarianceUpdate, ExtendedKalmanFilter, FilterConfig};
use drone_ekf::measurements::PositionMeasurement;
use drone_ekf::sim::{
    FlightRecord, NavigationResult, PosePolicy, SimulationConfig, SyntheticFlightConfig,
    generate_flight, position_rmse, run_filter,
};
use drone_ekf::{ControlInput, FilterError, NavigationFilter, StateVector};

fn constant_accel(a: f64) -> ControlInput {
    ControlInput::new(Vector3::new(a, 0.0, 0.0), Vector3::zeros())
}

#[test]
fn predict_only_matches_closed_form() {
    let a = 0.8;
    let dt = 0.05;
    let n = 40;
    let mut ekf = ExtendedKalmanFilter::default();
    for _ in 0..n {
        ekf.predict(&constant_accel(a), dt).unwrap();
    }
    let n = n as f64;
    assert_approx_eq!(ekf.velocity()[0], a * n * dt, 1e-12);
    // Position integrates the velocity held before each step
    assert_approx_eq!(ekf.position()[0], a * dt * dt * n * (n - 1.0) / 2.0, 1e-12);
    assert_eq!(ekf.position()[1], 0.0);
    assert_eq!(ekf.attitude(), Vector3::zeros());
}

#[test]
fn covariance_trace_never_decreases_during_prediction() {
    let mut ekf = ExtendedKalmanFilter::default();
    let u = ControlInput::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(0.01, 0.0, -0.02));
    let mut last = ekf.covariance().trace();
    for step in 0..100 {
        let before = *ekf.covariance();
        ekf.predict(&u, 0.02).unwrap();
        let p = ekf.covariance();
        assert!(p.trace() >= last, "trace decreased at step {step}");
        last = p.trace();
        for i in 0..12 {
            assert!(p[(i, i)] >= before[(i, i)] + 0.05 - 1e-12, "P[{i},{i}] at step {step}");
        }
    }
}

#[test]
fn single_precise_fix_pins_position() {
    let mut ekf = ExtendedKalmanFilter::new(0.05, 0.0);
    for _ in 0..5 {
        ekf.predict(&constant_accel(1.0), 0.1).unwrap();
    }
    let z = PositionMeasurement::new(3.0, -2.0, 1.5);
    ekf.update(&z).unwrap();
    assert_approx_eq!(ekf.position()[0], 3.0, 1e-9);
    assert_approx_eq!(ekf.position()[1], -2.0, 1e-9);
    assert_approx_eq!(ekf.position()[2], 1.5, 1e-9);
    assert!(ekf.position_std().norm() < 1e-6);
}

#[test]
fn updates_never_increase_uncertainty() {
    let mut ekf = ExtendedKalmanFilter::default();
    for k in 0..20 {
        ekf.predict(&constant_accel(0.5), 0.1).unwrap();
        let before = ekf.covariance().trace();
        let t = k as f64 * 0.1;
        ekf.update(&PositionMeasurement::new(t, 0.0, 0.0)).unwrap();
        assert!(ekf.covariance().trace() <= before);
    }
}

#[test]
fn independent_filters_do_not_interfere() {
    let mut a = ExtendedKalmanFilter::default();
    let b = ExtendedKalmanFilter::default();
    a.predict(&constant_accel(2.0), 1.0).unwrap();
    a.update(&PositionMeasurement::new(1.0, 1.0, 1.0)).unwrap();
    assert_eq!(b.state(), StateVector::zeros());
    assert_eq!(b.covariance().trace(), 12.0);
}

#[test]
fn noisy_flight_is_tracked() {
    let flight = generate_flight(&SyntheticFlightConfig {
        steps: 600,
        pose_noise_std: 0.05,
        accel_noise_std: 0.02,
        gyro_noise_std: 0.001,
        seed: 7,
        ..SyntheticFlightConfig::default()
    })
    .unwrap();
    let mut ekf = ExtendedKalmanFilter::default();
    let result = run_filter(&mut ekf, &flight.records, &SimulationConfig::default()).unwrap();
    assert_eq!(result.len(), flight.truth.len());
    assert_eq!(result.update_count(), 120);

    let rmse = position_rmse(&result, &flight.truth).unwrap();
    assert!(rmse < 0.3, "position RMSE {rmse}");
    let truth_end = flight.truth.last().unwrap().fixed_rows::<3>(0).into_owned();
    assert!((ekf.position() - truth_end).norm() < 0.5);
}

#[test]
fn fusion_beats_prediction_alone() {
    let config = SyntheticFlightConfig {
        steps: 400,
        accel_noise_std: 0.1,
        seed: 11,
        ..SyntheticFlightConfig::default()
    };
    let flight = generate_flight(&config).unwrap();
    let fused = run_filter(
        &mut ExtendedKalmanFilter::default(),
        &flight.records,
        &SimulationConfig::default(),
    )
    .unwrap();

    let blind_records: Vec<FlightRecord> = flight
        .records
        .iter()
        .cloned()
        .map(|r| FlightRecord { poses: None, ..r })
        .collect();
    let blind = run_filter(
        &mut ExtendedKalmanFilter::default(),
        &blind_records,
        &SimulationConfig::default(),
    )
    .unwrap();
    assert_eq!(blind.update_count(), 0);

    let fused_rmse = position_rmse(&fused, &flight.truth).unwrap();
    let blind_rmse = position_rmse(&blind, &flight.truth).unwrap();
    assert!(
        fused_rmse < blind_rmse,
        "fused {fused_rmse} vs prediction only {blind_rmse}"
    );
}

#[test]
fn joseph_form_tracks_like_standard_form() {
    let flight = generate_flight(&SyntheticFlightConfig {
        steps: 200,
        seed: 3,
        ..SyntheticFlightConfig::default()
    })
    .unwrap();
    let standard = run_filter(
        &mut ExtendedKalmanFilter::default(),
        &flight.records,
        &SimulationConfig::default(),
    )
    .unwrap();
    let joseph_config = FilterConfig {
        covariance_update: CovarianceUpdate::Joseph,
        ..FilterConfig::default()
    };
    let mut joseph_filter = ExtendedKalmanFilter::from_config(&joseph_config).unwrap();
    let joseph = run_filter(&mut joseph_filter, &flight.records, &SimulationConfig::default())
        .unwrap();
    for (s, j) in standard.records.iter().zip(&joseph.records) {
        assert_approx_eq!(s.pos_x, j.pos_x, 1e-8);
        assert_approx_eq!(s.pos_std_x, j.pos_std_x, 1e-8);
    }
}

#[test]
fn recorded_flight_round_trip_through_files() {
    let dir = std::env::temp_dir().join("drone_ekf_integration_round_trip");
    std::fs::create_dir_all(&dir).unwrap();
    let log_path = dir.join("flight.csv");
    let out_path = dir.join("flight_ekf.csv");

    let flight = generate_flight(&SyntheticFlightConfig {
        steps: 60,
        ..SyntheticFlightConfig::default()
    })
    .unwrap();
    FlightRecord::to_csv(&flight.records, &log_path).unwrap();
    let records = FlightRecord::from_csv(&log_path).unwrap();
    assert_eq!(records, flight.records);

    let mut ekf = ExtendedKalmanFilter::default();
    let result = run_filter(&mut ekf, &records, &SimulationConfig::default()).unwrap();
    result.to_csv(&out_path).unwrap();
    let read = NavigationResult::from_csv(&out_path, "flight").unwrap();
    assert_eq!(read.len(), 60);
    assert_eq!(read.update_count(), result.update_count());
    let last = read.final_state().unwrap();
    for (a, b) in last.iter().zip(ekf.state().iter()) {
        assert_approx_eq!(a, b, 1e-9);
    }
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn malformed_poses_follow_policy() {
    let mut records = generate_flight(&SyntheticFlightConfig {
        steps: 30,
        ..SyntheticFlightConfig::default()
    })
    .unwrap()
    .records;
    records[10].poses = Some("(1.0, 2.0)".to_string());
    records[12].poses = Some("   ".to_string());

    let skip = run_filter(
        &mut ExtendedKalmanFilter::default(),
        &records,
        &SimulationConfig::default(),
    )
    .unwrap();
    // rows 0, 5, 15, 20 and 25 keep valid poses
    assert_eq!(skip.update_count(), 5);
    assert!(!skip.records[10].updated);

    let zero_fill = SimulationConfig {
        pose_policy: PosePolicy::ZeroFill,
        ..SimulationConfig::default()
    };
    let filled = run_filter(&mut ExtendedKalmanFilter::default(), &records, &zero_fill).unwrap();
    assert_eq!(filled.update_count(), records.len());
}

#[test]
fn invalid_steps_are_rejected_without_side_effects() {
    let mut ekf = ExtendedKalmanFilter::default();
    ekf.predict(&constant_accel(1.0), 0.5).unwrap();
    let snapshot = ekf.clone();

    assert!(matches!(
        ekf.predict(&constant_accel(1.0), -0.1),
        Err(FilterError::InvalidInput(_))
    ));
    assert!(matches!(
        ekf.predict(&constant_accel(f64::INFINITY), 0.1),
        Err(FilterError::InvalidInput(_))
    ));
    assert!(matches!(
        ekf.update(&PositionMeasurement::new(f64::NAN, 0.0, 0.0)),
        Err(FilterError::InvalidInput(_))
    ));
    assert_eq!(ekf.state(), snapshot.state());
    assert_eq!(ekf.covariance(), snapshot.covariance());
}
