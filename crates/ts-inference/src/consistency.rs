//! Empirical consistency test of an observed statistic against toy statistics.
//!
//! `p = #{toy >= observed} / #toys`. Ties count as "at least as extreme", which keeps
//! the test conservative at the boundary. No distributional assumption is made.

use crate::fitter::Fitter;
use crate::statistic::{neg_log_likelihood, Statistic};
use crate::summary::SeriesSummary;
use crate::toybased::statistic_ensemble;
use crate::toys::SeedPolicy;
use serde::{Deserialize, Serialize};
use ts_core::{Error, FitMode, FitResult, Result};
use ts_hist::Histogram;

/// Conventional significance level for [`ConsistencyResult::is_consistent`].
pub const DEFAULT_ALPHA: f64 = 0.05;

/// Outcome of [`test`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyResult {
    /// Statistic of the observed data.
    pub observed_statistic: f64,
    /// Toy statistics, in the order given.
    pub toy_statistics: Vec<f64>,
    /// Number of toys with a statistic `>=` the observed one.
    pub n_greater_or_equal: usize,
    /// Upper-tail empirical p-value in `[0, 1]`.
    pub p_value: f64,
    /// Mean / spread of the toy statistics.
    pub toy_summary: SeriesSummary,
}

impl ConsistencyResult {
    /// `true` when the observation is not rejected at level `alpha` (`p > alpha`).
    pub fn is_consistent(&self, alpha: f64) -> bool {
        self.p_value > alpha
    }
}

/// Compare `observed_statistic` with `toy_statistics`.
///
/// Fails with `InsufficientSamples` for an empty toy set.
pub fn test(observed_statistic: f64, toy_statistics: Vec<f64>) -> Result<ConsistencyResult> {
    let toy_summary = SeriesSummary::from_values(&toy_statistics).ok_or_else(|| {
        Error::InsufficientSamples("consistency test needs at least one toy statistic".to_string())
    })?;
    let n_greater_or_equal = toy_statistics.iter().filter(|&&t| t >= observed_statistic).count();
    let p_value = n_greater_or_equal as f64 / toy_statistics.len() as f64;
    Ok(ConsistencyResult {
        observed_statistic,
        toy_statistics,
        n_greater_or_equal,
        p_value,
        toy_summary,
    })
}

/// Likelihood fit of a parent histogram and its consistency with toys drawn from that fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConsistency {
    /// Likelihood fit of the parent histogram.
    pub fit: FitResult,
    /// Base seed the toys were generated with.
    pub base_seed: u64,
    /// Observed `-2 ln L` against the toy ensemble.
    pub result: ConsistencyResult,
}

/// Fit `parent` by likelihood and test its `-2 ln L` against `n_trials` toys.
///
/// Each toy has the parent's binning and total entry count and is drawn from the
/// best-fit Gaussian; its statistic is evaluated at the best-fit parameters.
/// `seed == 0` draws the base seed from system entropy.
pub fn consistency_test_against_fit<F: Fitter + ?Sized>(
    fitter: &F,
    parent: &Histogram,
    n_trials: usize,
    seed: u64,
) -> Result<FitConsistency> {
    let fit = fitter.fit(parent, FitMode::Likelihood, false)?.require_converged()?;
    let observed = neg_log_likelihood(parent, &fit.params);
    let entries = usize::try_from(parent.entries()).map_err(|_| {
        Error::InvalidConfiguration(format!("entry count {} does not fit in memory", parent.entries()))
    })?;
    let base_seed = SeedPolicy::from_seed(seed).resolve();

    log::info!(
        "Consistency of '{}': -2lnL = {:.4}, {} toys of {} entries (base seed {})",
        parent.name(),
        observed,
        n_trials,
        entries,
        base_seed
    );
    let toys = statistic_ensemble(
        &fit.params,
        &parent.binning(),
        entries,
        n_trials,
        Statistic::NegLogLikelihood,
        base_seed,
    )?;
    let result = test(observed, toys)?;
    log::info!(
        "p-value {:.4} ({} of {} toys >= observed)",
        result.p_value,
        result.n_greater_or_equal,
        result.toy_statistics.len()
    );
    Ok(FitConsistency { fit, base_seed, result })
}
