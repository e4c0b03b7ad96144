//! # ts-core
//!
//! Core types, traits, and error handling for ToyStat.
//!
//! This crate provides:
//! - Common error types
//! - Gaussian model parameters and fit results shared by every stage
//! - The sampler capability consumed by the toy generator

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::GaussianSampler;
pub use types::{FitMode, FitResult, GaussianParameters, ParameterErrors, N_GAUSSIAN_PARAMS};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
