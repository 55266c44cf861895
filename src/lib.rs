#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// #![warn(clippy::cargo)]

use std::str::FromStr;

use ndarray::NdFloat;

pub mod calibration;
pub mod collocation;
pub mod config;
pub mod error;
pub mod math;
pub mod moments;
pub mod report;
pub mod solver;
pub mod synthetic;
pub mod threshold;
pub mod tripcol;

pub use error::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Number of collocated measurement systems.
pub const SYSTEMS: usize = 3;

/// Floating point types the engine can run on.
pub trait Value: NdFloat + FromStr {}

impl<E: NdFloat + FromStr> Value for E {}
