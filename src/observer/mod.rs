//! # State Observation
//!
//! Model-based observation of the battery's internal state from terminal
//! measurements.
//!
//! - [`ekf`] - two-state extended Kalman filter over (state of charge,
//!   polarization voltage), with the measurement model linearized through
//!   the OCV slope supplied per step by the caller.

pub mod ekf;
