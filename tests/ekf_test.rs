//! # Tests for the Two-State Extended Kalman Filter
//!
//! Exercises the predict/correct cycle, the correction identity between
//! gain, innovation and state, the output clamp, and the covariance shape
//! invariants.

use libsoc::observer::ekf::Ekf;

const KAPPA: f64 = 5.41013122814307e-5;

/// Prediction integrates charge and relaxes the polarization voltage
#[test]
fn test_prediction_model() {
    let mut ekf = Ekf::new(0.8, [1e-9, 1.0], 1.0);

    ekf.predict(2.0, 0.3, 0.02, KAPPA);
    assert_eq!(ekf.soc(), 0.8 - KAPPA * 2.0);
    // vrc was zero, so only the input term contributes.
    assert_eq!(ekf.polarization_voltage(), 0.02 * 0.7 * 2.0);

    ekf.predict(0.0, 0.3, 0.02, KAPPA);
    assert_eq!(ekf.polarization_voltage(), 0.3 * (0.02 * 0.7 * 2.0));
}

/// The corrected state equals prediction plus gain times innovation
#[test]
fn test_correction_identity() {
    let mut ekf = Ekf::new(0.5, [1e-9, 1.0], 1.0);
    ekf.predict(0.0, 0.5, 0.01, KAPPA);
    let soc_predicted = ekf.soc();

    assert!(ekf.correct(3.62, 0.0, 3.7, 1.4, 0.005));

    let expected = soc_predicted + ekf.gain()[0] * ekf.innovation();
    assert_eq!(ekf.soc().to_bits(), expected.to_bits());
}

/// A voltage above the prediction pulls the estimate up, below pulls down
#[test]
fn test_innovation_direction() {
    let mut high = Ekf::new(0.5, [1e-9, 1.0], 1.0);
    high.predict(0.0, 0.5, 0.01, KAPPA);
    high.correct(3.75, 0.0, 3.7, 1.4, 0.005);
    assert!(high.soc() > 0.5);

    let mut low = Ekf::new(0.5, [1e-9, 1.0], 1.0);
    low.predict(0.0, 0.5, 0.01, KAPPA);
    low.correct(3.65, 0.0, 3.7, 1.4, 0.005);
    assert!(low.soc() < 0.5);
}

/// The covariance stays symmetric with floored diagonals over a long run
#[test]
fn test_covariance_shape_over_long_run() {
    let mut ekf = Ekf::new(1.0, [1e-9, 1.0], 1.0);

    for k in 0..5000 {
        let current = 1.0 + 0.5 * ((k % 13) as f64 - 6.0) / 6.0;
        ekf.predict(current, 0.0016, 0.0013, KAPPA);
        let v = 3.6 - 0.0001 * (k % 7) as f64;
        ekf.correct(v, current, 3.62, 1.4, 0.003);

        let p = ekf.covariance();
        assert_eq!(p[0][1], p[1][0], "covariance should stay symmetric");
        assert!(p[0][0] >= 1e-6 && p[1][1] >= 1e-6);
        assert!(ekf.soc() >= 0.0 && ekf.soc() <= 1.0);
    }
}

/// The clamp holds the state of charge inside [0, 1]
#[test]
fn test_output_clamp() {
    let mut ekf = Ekf::new(1.0, [1e-9, 1.0], 1.0);
    // A voltage far above the model prediction would push SoC past 1.
    ekf.predict(0.0, 0.5, 0.01, KAPPA);
    ekf.correct(5.0, 0.0, 3.7, 1.4, 0.005);
    assert_eq!(ekf.soc(), 1.0);
    assert!(ekf.soc_saturated());

    let mut ekf = Ekf::new(0.0, [1e-9, 1.0], 1.0);
    ekf.predict(0.0, 0.5, 0.01, KAPPA);
    ekf.correct(1.0, 0.0, 3.1, 1.8, 0.005);
    assert_eq!(ekf.soc(), 0.0);
    assert!(ekf.soc_saturated());
}

/// Reset restores the initial state and identity covariance
#[test]
fn test_reset() {
    let mut ekf = Ekf::new(0.9, [1e-9, 1.0], 1.0);
    for _ in 0..20 {
        ekf.predict(1.0, 0.0016, 0.0013, KAPPA);
        ekf.correct(3.5, 1.0, 3.9, 1.4, 0.003);
    }
    assert_ne!(ekf.soc(), 0.9);

    ekf.reset();
    assert_eq!(ekf.soc(), 0.9);
    assert_eq!(ekf.polarization_voltage(), 0.0);
    assert_eq!(*ekf.covariance(), [[1.0, 0.0], [0.0, 1.0]]);
}
