//! Aggregate summaries of per-trial series.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Mean and population standard deviation of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesSummary {
    /// Number of values summarized.
    pub n: usize,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation (divides by `n`).
    pub std: f64,
}

impl SeriesSummary {
    /// Summarize `values`; `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        Some(Self {
            n: values.len(),
            mean: Statistics::mean(values.iter()),
            std: Statistics::population_std_dev(values.iter()),
        })
    }
}
