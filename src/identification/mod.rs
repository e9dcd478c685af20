//! # Online Model Identification
//!
//! Recursive identification of the battery's equivalent-circuit model from
//! terminal measurements, running one update per sample.
//!
//! - [`rls`] - third-order recursive least squares with a forgetting
//!   factor, parameter saturation, and the reparameterization from the
//!   identified discrete-time coefficients to the circuit quantities
//!   (ohmic resistance, RC branch resistance, discrete pole) consumed by
//!   the state observer.

pub mod rls;
