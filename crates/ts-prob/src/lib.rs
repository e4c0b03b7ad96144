//! Probability building blocks for ToyStat.
//!
//! - the Gaussian bin-shape with its analytic parameter derivatives
//! - chi-square goodness-of-fit probabilities

pub mod chisq;
pub mod gaussian;
