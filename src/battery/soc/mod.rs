//! # State of Charge (SoC) Estimation using a Joint RLS/EKF Filter
//!
//! This module implements a battery State of Charge estimator that couples
//! online model identification to an Extended Kalman Filter. A third-order
//! Recursive Least Squares identifier tracks the coefficients of the cell's
//! equivalent circuit (series resistance R0 plus one R1-C1 branch) from the
//! measured terminal voltage and current; the identified coefficients drive
//! the linearization of a two-state EKF over (SoC, polarization voltage).
//!
//! ## Battery Model
//!
//! The cell is modeled as:
//! - Open Circuit Voltage (OCV) as a tabulated function of SoC
//! - Series ohmic resistance R0
//! - One RC branch (R1-C1) representing transient polarization
//!
//! The OCV curve and its slope dOCV/dSoC come from two breakpoint tables
//! supplied in a cell parameter file; the circuit resistances and the
//! discrete pole of the RC branch are identified online, so no resistance
//! or capacitance tables are needed.
//!
//! ## Data Flow per Sample
//!
//! ```text
//! (I, V) --> regressor build --> RLS update --> (R0, R1, alpha)
//!                                                     |
//!             OCV(SoC), dOCV/dSoC(SoC)                v
//!                     |                 EKF predict / EKF correct
//!                     +---------------------------+
//!                                                 v
//!                                       updated (SoC, Vrc) --> SoC out
//! ```
//!
//! Each call to [`SocEstimator::step`] consumes one (current, voltage) pair
//! sampled at the configured fixed period and emits one SoC value in
//! [0, 1]. The step is synchronous, allocation-free, and strictly
//! sequential: the k-th output depends only on state latched at the end of
//! step k-1.
//!
//! ## Usage Example
//!
//! ```rust
//! use libsoc::battery::soc::{Config, SocEstimator};
//!
//! let mut estimator = SocEstimator::new(Config::default()).unwrap();
//!
//! // In your acquisition loop, once per sample period
//! let current = 1.0;  // A, positive for discharge
//! let voltage = 3.7;  // V at the terminals
//!
//! let output = estimator.step(current, voltage);
//! assert!(output.soc >= 0.0 && output.soc <= 1.0);
//! ```
//!
//! ## Adding New Cell Types
//!
//! To add support for a new cell:
//! 1. Create a TOML file in `src/battery/soc/params/` with the cell's
//!    characterization data
//! 2. Add a match case in `CellParameters::load_cell_type()`
//! 3. The TOML file should contain:
//!    - `[battery_info]` - cell metadata
//!    - `[estimator]` - sampling, capacity, and filter tuning constants
//!    - `[ocv]` - SoC breakpoints, OCV values, and OCV slope values

use crate::identification::rls::Rls;
use crate::lookup::{BreakpointTable, TableError};
use crate::math::matrix::dot3;
use crate::observer::ekf::Ekf;

use serde::{Deserialize, Serialize};

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

/// Configuration failures surfaced by [`SocEstimator::new`].
///
/// These are the only errors the estimator ever surfaces; numerical
/// trouble during stepping is recovered locally by skipping the offending
/// filter update for that sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A breakpoint table failed to build.
    Table(TableError),
    /// The OCV values are not strictly increasing over the SoC grid.
    NonMonotonicOcv,
    /// The OCV slope table contains a negative value.
    NegativeSlope,
    /// Sampling period is not a positive finite number.
    InvalidSamplingTime,
    /// Cell capacity is not a positive finite number.
    InvalidCapacity,
    /// Forgetting factor is outside (0, 1].
    InvalidForgettingFactor,
    /// A noise covariance is negative or non-finite.
    InvalidNoise,
    /// Initial RLS covariance scale is not a positive finite number.
    InvalidCovariance,
    /// Initial state of charge is outside [0, 1].
    InvalidInitialSoc,
    /// A cell parameter file failed to parse.
    ParameterFile,
    /// No embedded parameter file matches the requested cell type.
    UnknownCellType,
}

impl From<TableError> for ConfigError {
    fn from(e: TableError) -> Self {
        ConfigError::Table(e)
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConfigError::Table(e) => write!(f, "invalid breakpoint table: {}", e),
            ConfigError::NonMonotonicOcv => write!(f, "OCV values must be strictly increasing"),
            ConfigError::NegativeSlope => write!(f, "OCV slope values must be non-negative"),
            ConfigError::InvalidSamplingTime => write!(f, "sampling time must be positive"),
            ConfigError::InvalidCapacity => write!(f, "cell capacity must be positive"),
            ConfigError::InvalidForgettingFactor => {
                write!(f, "forgetting factor must lie in (0, 1]")
            }
            ConfigError::InvalidNoise => write!(f, "noise covariances must be non-negative"),
            ConfigError::InvalidCovariance => {
                write!(f, "initial covariance scale must be positive")
            }
            ConfigError::InvalidInitialSoc => {
                write!(f, "initial state of charge must lie in [0, 1]")
            }
            ConfigError::ParameterFile => write!(f, "failed to parse cell parameter file"),
            ConfigError::UnknownCellType => write!(f, "cell type not found"),
        }
    }
}

/// Cell metadata carried by a parameter file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatteryInfo {
    pub manufacturer: String,
    pub chemistry: String,
    pub form_factor: String,
    pub nominal_voltage: f64,  // V
    pub nominal_capacity: f64, // mAh
}

/// Sampling, capacity, and filter tuning constants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstimatorTuning {
    /// Sample period Ts in seconds.
    pub sampling_time: f64,
    /// Cell capacity Cn in ampere-hours.
    pub capacity_ah: f64,
    /// RLS forgetting factor, close to 1 for long memory.
    pub forgetting_factor: f64,
    /// EKF process noise diagonal (SoC, polarization voltage).
    pub process_noise: [f64; 2],
    /// EKF measurement noise variance.
    pub measurement_noise: f64,
    /// State of charge at the first sample.
    pub initial_soc: f64,
    /// Seed for the identified circuit coefficients.
    pub initial_parameters: [f64; 3],
    /// Scale of the identity seeding the RLS covariance.
    pub initial_rls_covariance: f64,
}

/// OCV characterization sampled over the SoC domain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcvCurve {
    pub soc: Vec<f64>,
    pub voltage: Vec<f64>,
    pub slope: Vec<f64>,
}

/// Complete cell parameter set loaded from TOML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CellParameters {
    pub battery_info: BatteryInfo,
    pub estimator: EstimatorTuning,
    pub ocv: OcvCurve,
}

impl CellParameters {
    /// Loads cell parameters from a TOML string.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|_| ConfigError::ParameterFile)
    }

    /// Loads the stock cell parameter set.
    pub fn load_default() -> Self {
        const DEFAULT_TOML: &str = include_str!("params/NMC_21700_3.6V_5000mAh.toml");
        Self::from_toml_str(DEFAULT_TOML).expect("stock cell parameters should be valid")
    }

    /// Loads a specific cell type by filename (without .toml extension).
    pub fn load_cell_type(filename: &str) -> Result<Self, ConfigError> {
        match filename {
            "NMC_21700_3.6V_5000mAh" => {
                const TOML_DATA: &str = include_str!("params/NMC_21700_3.6V_5000mAh.toml");
                Self::from_toml_str(TOML_DATA)
            }
            _ => Err(ConfigError::UnknownCellType),
        }
    }
}

/// Everything [`SocEstimator::new`] needs: tuning constants plus the two
/// breakpoint tables, passed by value.
#[derive(Debug, Clone)]
pub struct Config {
    pub sampling_time: f64,
    pub capacity_ah: f64,
    pub forgetting_factor: f64,
    pub process_noise: [f64; 2],
    pub measurement_noise: f64,
    pub initial_soc: f64,
    pub initial_parameters: [f64; 3],
    pub initial_rls_covariance: f64,
    pub ocv_soc: Vec<f64>,
    pub ocv_voltage: Vec<f64>,
    pub ocv_slope: Vec<f64>,
}

impl From<CellParameters> for Config {
    fn from(cell: CellParameters) -> Self {
        Config {
            sampling_time: cell.estimator.sampling_time,
            capacity_ah: cell.estimator.capacity_ah,
            forgetting_factor: cell.estimator.forgetting_factor,
            process_noise: cell.estimator.process_noise,
            measurement_noise: cell.estimator.measurement_noise,
            initial_soc: cell.estimator.initial_soc,
            initial_parameters: cell.estimator.initial_parameters,
            initial_rls_covariance: cell.estimator.initial_rls_covariance,
            ocv_soc: cell.ocv.soc,
            ocv_voltage: cell.ocv.voltage,
            ocv_slope: cell.ocv.slope,
        }
    }
}

impl Default for Config {
    /// Configuration for the stock NMC 21700 cell: 1 s sampling, 5.1344 Ah
    /// capacity, forgetting factor 0.9999, process noise diag(1e-9, 1),
    /// measurement noise 1, full initial charge.
    fn default() -> Self {
        CellParameters::load_default().into()
    }
}

impl Config {
    /// Builds a configuration from an embedded cell parameter file.
    pub fn with_cell_type(filename: &str) -> Result<Self, ConfigError> {
        CellParameters::load_cell_type(filename).map(Config::from)
    }
}

/// Result of one estimator step.
///
/// The saturation flags are informational: a clamped output or parameter
/// is expected behavior at the edges of the operating range, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    /// State of charge after correction and clamping, in [0, 1].
    pub soc: f64,
    /// Whether the SoC hit a bound this step.
    pub soc_saturated: bool,
    /// Whether any identified coefficient sat on its bound this step.
    pub parameters_saturated: bool,
}

/// Joint RLS/EKF state-of-charge estimator.
///
/// One value owns all estimator state; there are no globals. Construction
/// seeds everything from the configuration exactly once, each
/// [`step`](SocEstimator::step) advances the filter by one sample, and
/// [`reset`](SocEstimator::reset) returns to the seeded state.
#[derive(Debug, Clone)]
pub struct SocEstimator {
    rls: Rls,
    ekf: Ekf,
    ocv_table: BreakpointTable,
    slope_table: BreakpointTable,
    /// SoC decrement per ampere over one sample, Ts / (3600 * Cn).
    coulomb_gain: f64,
    /// Discrete pole of the RC branch from the last viable
    /// reparameterization.
    alpha: f64,
    previous_voltage: f64,
    previous_current: f64,
    /// OCV of the SoC at entry to the previous step; the first regressor
    /// component is this tap minus the previous voltage.
    ocv_tap: f64,
    /// Previous step's one-step voltage prediction, the next RLS target.
    prediction_tap: f64,
    sample_count: u64,
}

impl SocEstimator {
    /// Validates the configuration, builds the lookup tables, and seeds the
    /// filter state.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        if !(config.sampling_time.is_finite() && config.sampling_time > 0.0) {
            return Err(ConfigError::InvalidSamplingTime);
        }
        if !(config.capacity_ah.is_finite() && config.capacity_ah > 0.0) {
            return Err(ConfigError::InvalidCapacity);
        }
        if !(config.forgetting_factor > 0.0 && config.forgetting_factor <= 1.0) {
            return Err(ConfigError::InvalidForgettingFactor);
        }
        for q in config.process_noise {
            if !(q.is_finite() && q >= 0.0) {
                return Err(ConfigError::InvalidNoise);
            }
        }
        if !(config.measurement_noise.is_finite() && config.measurement_noise >= 0.0) {
            return Err(ConfigError::InvalidNoise);
        }
        if !(config.initial_rls_covariance.is_finite() && config.initial_rls_covariance > 0.0) {
            return Err(ConfigError::InvalidCovariance);
        }
        if !(config.initial_soc >= 0.0 && config.initial_soc <= 1.0) {
            return Err(ConfigError::InvalidInitialSoc);
        }

        let ocv_table = BreakpointTable::new(&config.ocv_soc, &config.ocv_voltage)?;
        let slope_table = BreakpointTable::new(&config.ocv_soc, &config.ocv_slope)?;
        for i in 1..config.ocv_voltage.len() {
            if config.ocv_voltage[i] <= config.ocv_voltage[i - 1] {
                return Err(ConfigError::NonMonotonicOcv);
            }
        }
        for &slope in &config.ocv_slope {
            if slope < 0.0 {
                return Err(ConfigError::NegativeSlope);
            }
        }

        let coulomb_gain = config.sampling_time / (3600.0 * config.capacity_ah);
        Ok(SocEstimator {
            rls: Rls::new(
                config.forgetting_factor,
                config.initial_rls_covariance,
                config.initial_parameters,
            ),
            ekf: Ekf::new(
                config.initial_soc,
                config.process_noise,
                config.measurement_noise,
            ),
            ocv_table,
            slope_table,
            coulomb_gain,
            alpha: 1.0,
            previous_voltage: 0.0,
            previous_current: 0.0,
            ocv_tap: 0.0,
            prediction_tap: 0.0,
            sample_count: 0,
        })
    }

    /// Advances the estimator by one sample.
    ///
    /// `current` is the terminal current in amperes (positive for
    /// discharge), `voltage` the terminal voltage in volts. Returns the
    /// corrected, clamped state of charge along with the saturation flags.
    pub fn step(&mut self, current: f64, voltage: f64) -> StepOutput {
        // Regressor over the latched one-step delays. The first component
        // pairs the previous sample's open-circuit voltage with the
        // previous measured voltage.
        let phi = [
            self.ocv_tap - self.previous_voltage,
            current,
            self.previous_current,
        ];
        let target = self.prediction_tap;
        self.rls.update(&phi, target);

        let circuit = self.rls.circuit_parameters(self.alpha);
        self.alpha = circuit.alpha;
        let (_, parameters_saturated) = self.rls.saturated_parameters();

        // Linearize around the state of charge at entry to the step.
        let soc_entry = self.ekf.soc();
        let ocv = self.ocv_table.interp(soc_entry);
        let slope = self.slope_table.interp(soc_entry);

        self.ekf
            .predict(current, circuit.alpha, circuit.r1, self.coulomb_gain);
        self.ekf.correct(voltage, current, ocv, slope, circuit.r0);

        // End-of-step latch: everything the next step's regressor and
        // target need, frozen now.
        self.prediction_tap = dot3(&phi, &self.rls.parameters());
        self.ocv_tap = ocv;
        self.previous_voltage = voltage;
        self.previous_current = current;
        self.sample_count += 1;

        StepOutput {
            soc: self.ekf.soc(),
            soc_saturated: self.ekf.soc_saturated(),
            parameters_saturated,
        }
    }

    /// Returns the estimator to its seeded state without rebuilding the
    /// lookup tables.
    pub fn reset(&mut self) {
        self.rls.reset();
        self.ekf.reset();
        self.alpha = 1.0;
        self.previous_voltage = 0.0;
        self.previous_current = 0.0;
        self.ocv_tap = 0.0;
        self.prediction_tap = 0.0;
        self.sample_count = 0;
    }

    /// Current state-of-charge estimate.
    pub fn soc(&self) -> f64 {
        self.ekf.soc()
    }

    /// Voltage across the RC branch of the circuit model.
    pub fn polarization_voltage(&self) -> f64 {
        self.ekf.polarization_voltage()
    }

    /// Raw identified circuit coefficients.
    pub fn parameters(&self) -> [f64; 3] {
        self.rls.parameters()
    }

    /// Clamped coefficient view used by the observer.
    pub fn saturated_parameters(&self) -> [f64; 3] {
        self.rls.saturated_parameters().0
    }

    /// Discrete pole of the RC branch in use.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Most recent voltage innovation of the observer.
    pub fn voltage_innovation(&self) -> f64 {
        self.ekf.innovation()
    }

    /// Most recent Kalman gain of the observer.
    pub fn kalman_gain(&self) -> [f64; 2] {
        self.ekf.gain()
    }

    /// Standard deviation of the state-of-charge estimate.
    pub fn soc_uncertainty(&self) -> f64 {
        libm::sqrt(self.ekf.covariance()[0][0])
    }

    /// Number of samples processed since construction or the last reset.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}
