//! # Fixed-Size Numerical Kernels
//!
//! Small dense linear-algebra and clamping primitives shared by the
//! identification and observer stages. Everything operates on fixed-size
//! `f64` arrays by value, with a fixed left-to-right evaluation order so
//! results are reproducible bit-for-bit across runs and platforms.
//!
//! - [`matrix`] - 2x2 and 3x3 dense operations plus 3-vector helpers
//! - [`saturation`] - scalar clamping with bound-hit reporting

pub mod matrix;
pub mod saturation;
