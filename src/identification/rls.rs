//! # Recursive Least Squares Identifier
//!
//! Identifies the three coefficients of the discretized equivalent-circuit
//! voltage relation from a regressor built out of delayed terminal
//! measurements. The estimate feeds the observer twice per step: the
//! saturated coefficient view supplies the ohmic and RC-branch resistances,
//! and the reparameterization below turns the identified autoregressive
//! coefficient into the discrete pole of the polarization state.
//!
//! ## Update Law
//!
//! With regressor `phi`, target `y`, and forgetting factor `lambda`:
//!
//! ```text
//! d     = phi' * P * phi + lambda          (skip the step if |d| < 1e-12)
//! k     = P * phi / d
//! e     = y - phi' * theta
//! theta = theta + k * e
//! P     = (P - k * phi' * P) / lambda      (then symmetrize, floor diagonal)
//! ```
//!
//! The internal `theta` is never clamped; downstream consumers read the
//! clamped view through [`Rls::saturated_parameters`]. Keeping the raw
//! estimate avoids biasing the regression while a component sits on a
//! bound.
//!
//! ## Usage Example
//!
//! ```rust
//! use libsoc::identification::rls::Rls;
//!
//! let mut rls = Rls::new(0.9999, 1.0, [0.0016, 0.0063, 0.0013]);
//! rls.update(&[0.02, 1.0, 0.98], 0.035);
//! let (coeffs, clamped) = rls.saturated_parameters();
//! assert!(!clamped);
//! assert!(coeffs[1] > 0.0063);
//! let circuit = rls.circuit_parameters(1.0);
//! assert!(circuit.alpha > 0.0 && circuit.alpha < 1.0);
//! ```

use crate::math::matrix::{
    Matrix3, Vector3, dot3, mat3_mul, mat3_scale, mat3_sub, mat3_symmetrize, mat3_vec,
};
use crate::math::saturation::{floor_at, saturate};

/// Denominators below this magnitude abort the update for the step.
const BREAKDOWN_THRESHOLD: f64 = 1e-12;

/// Floor applied to the covariance diagonal after every update.
const COVARIANCE_FLOOR: f64 = 1e-6;

/// Componentwise saturation bounds on the identified coefficients.
///
/// The first coefficient is the autoregressive term of the fast dynamics;
/// its upper bound keeps the reconstructed pole well inside the unit
/// circle. The remaining two are impedance terms.
const PARAMETER_BOUNDS: [(f64, f64); 3] = [(1e-6, 0.1), (1e-6, 0.5), (1e-6, 0.5)];

/// Circuit quantities reconstructed from the identified coefficients.
///
/// `alpha` is the discrete-time pole of the RC branch, `r0` the series
/// ohmic resistance, and `r1` the DC resistance of the RC branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitParameters {
    pub alpha: f64,
    pub r0: f64,
    pub r1: f64,
}

/// Third-order recursive least squares identifier with forgetting.
#[derive(Debug, Clone)]
pub struct Rls {
    theta: Vector3,
    covariance: Matrix3,
    forgetting_factor: f64,
    inflation: f64,
    innovation: f64,
    skipped_updates: u32,
    seed: Vector3,
    initial_covariance: f64,
}

impl Rls {
    /// Creates an identifier with covariance `initial_covariance * I` and
    /// the given coefficient seed.
    pub fn new(forgetting_factor: f64, initial_covariance: f64, seed: Vector3) -> Self {
        let mut rls = Rls {
            theta: seed,
            covariance: [[0.0; 3]; 3],
            forgetting_factor,
            inflation: 1.0 / forgetting_factor,
            innovation: 0.0,
            skipped_updates: 0,
            seed,
            initial_covariance,
        };
        rls.reset();
        rls
    }

    /// Restores the seed coefficients and the initial covariance.
    pub fn reset(&mut self) {
        self.theta = self.seed;
        self.covariance = [[0.0; 3]; 3];
        for i in 0..3 {
            self.covariance[i][i] = self.initial_covariance;
        }
        self.innovation = 0.0;
        self.skipped_updates = 0;
    }

    /// Runs one update against regressor `phi` and target `y`.
    ///
    /// Returns `false` when the gain denominator is too small to divide by;
    /// the coefficients and covariance are then left untouched for the step.
    pub fn update(&mut self, phi: &Vector3, y: f64) -> bool {
        let p_phi = mat3_vec(&self.covariance, phi);
        let denominator = dot3(phi, &p_phi) + self.forgetting_factor;
        if libm::fabs(denominator) < BREAKDOWN_THRESHOLD {
            self.skipped_updates += 1;
            return false;
        }

        let gain = [
            p_phi[0] / denominator,
            p_phi[1] / denominator,
            p_phi[2] / denominator,
        ];
        self.innovation = y - dot3(phi, &self.theta);
        for i in 0..3 {
            self.theta[i] += gain[i] * self.innovation;
        }

        // P <- (P - k phi' P) / lambda
        let mut gain_outer = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                gain_outer[i][j] = gain[i] * phi[j];
            }
        }
        let shrink = mat3_mul(&gain_outer, &self.covariance);
        let updated = mat3_scale(&mat3_sub(&self.covariance, &shrink), self.inflation);
        self.covariance = mat3_symmetrize(&updated);
        for i in 0..3 {
            self.covariance[i][i] = floor_at(self.covariance[i][i], COVARIANCE_FLOOR);
        }
        true
    }

    /// Raw (unsaturated) coefficient estimate.
    pub fn parameters(&self) -> Vector3 {
        self.theta
    }

    /// Clamped coefficient view and whether any bound was hit.
    ///
    /// This is the view every downstream computation reads; the raw
    /// estimate is retained internally.
    pub fn saturated_parameters(&self) -> (Vector3, bool) {
        let mut out = [0.0; 3];
        let mut any_hit = false;
        for i in 0..3 {
            let (lo, hi) = PARAMETER_BOUNDS[i];
            let (value, hit) = saturate(self.theta[i], lo, hi);
            out[i] = value;
            any_hit = any_hit || hit;
        }
        (out, any_hit)
    }

    /// Reconstructs the circuit quantities from the saturated coefficients.
    ///
    /// The discrete pole comes from inverting the continuous RC time
    /// constant implied by the identified autoregressive coefficient:
    ///
    /// ```text
    /// m     = s0*s1 + s2
    /// r1    = m / (1 - s0)
    /// alpha = exp(-1 / r1 / (-(1 - s0) / (m * ln(s0))))
    /// ```
    ///
    /// A pole outside (0, 1) is not viable for the observer; in that case
    /// `fallback_alpha` (the previous step's pole) is returned instead.
    pub fn circuit_parameters(&self, fallback_alpha: f64) -> CircuitParameters {
        let (s, _) = self.saturated_parameters();
        let m = s[0] * s[1] + s[2];
        let r1 = m / (1.0 - s[0]);
        let pole = libm::exp(-1.0 / r1 / (-(1.0 - s[0]) / (m * libm::log(s[0]))));
        let alpha = if pole.is_finite() && pole > 0.0 && pole < 1.0 {
            pole
        } else {
            fallback_alpha
        };
        CircuitParameters {
            alpha,
            r0: s[1],
            r1,
        }
    }

    /// Covariance of the coefficient estimate.
    pub fn covariance(&self) -> &Matrix3 {
        &self.covariance
    }

    /// Most recent regression residual.
    pub fn innovation(&self) -> f64 {
        self.innovation
    }

    /// Number of updates skipped due to a degenerate denominator.
    pub fn skipped_updates(&self) -> u32 {
        self.skipped_updates
    }
}
