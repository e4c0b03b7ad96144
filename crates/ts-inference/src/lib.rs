//! # ts-inference
//!
//! Statistical core of ToyStat.
//!
//! This crate provides:
//! - closed-form chi-square and `-2 ln L` statistics over binned data
//! - an L-BFGS Gaussian fitter behind the [`Fitter`] trait
//! - the parallel toy experiment runner
//! - 1-D profile scans and the empirical consistency test
//!
//! ## Architecture
//!
//! The runner, scanner and consistency workflow only see the [`Fitter`] trait,
//! so tests can drive them with deterministic stub fitters.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Empirical p-value of an observed statistic against toys.
pub mod consistency;
/// `Fitter` trait and the L-BFGS Gaussian fitter.
pub mod fitter;
/// Bounded L-BFGS minimization of the Gaussian statistic.
pub mod optimizer;
/// One-dimensional profile scans.
pub mod profile;
/// Chi-square and Poisson likelihood statistics.
pub mod statistic;
/// Aggregate summaries of per-trial series.
pub mod summary;
/// Toy experiment runner.
pub mod toybased;
/// Seeded Gaussian sampling for toys.
pub mod toys;

pub use consistency::{consistency_test_against_fit, ConsistencyResult, FitConsistency};
pub use fitter::{Fitter, GaussianFitter};
pub use optimizer::{
    GaussianMinimizer, GaussianObjective, Minimum, OptimizerConfig, ParameterBounds,
};
pub use profile::{profile_contour, scan, ContourAnalysis, ProfileScan, ScanGrid, ScanParameter, ScanPoint};
pub use statistic::{chi_square, neg_log_likelihood, Statistic};
pub use summary::SeriesSummary;
pub use toybased::{
    statistic_ensemble, EnsembleSummary, GeneratorConfig, ModeEnsemble, ToyConfig,
    ToyExperimentRunner, ToyRunResult, ToyTrialRecord,
};
pub use toys::{SeededGaussianSampler, SeedPolicy};
