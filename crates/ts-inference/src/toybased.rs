//! Toy experiment runner.
//!
//! Each trial resets a histogram buffer, fills it with `entries` fresh Gaussian samples,
//! refits it once per configured [`FitMode`] and records the fit diagnostics.
//!
//! Notes:
//! - Trials run in parallel; each rayon worker owns one histogram buffer (`map_init`).
//! - Randomness is deterministic via per-trial seeding (`seed + trial`), independent of threading.
//! - Non-converged fits and fitter errors are dropped, counted per mode, never retried.

use crate::fitter::Fitter;
use crate::statistic::Statistic;
use crate::summary::SeriesSummary;
use crate::toys::{fill_gaussian, trial_seed, SeededGaussianSampler, SeedPolicy};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use ts_core::{Error, FitMode, FitResult, GaussianParameters, Result};
use ts_hist::Binning;

/// Trials between two progress messages.
const PROGRESS_EVERY: usize = 100;

/// Gaussian the toy samples are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Mean of the generating Gaussian.
    pub mean: f64,
    /// Width of the generating Gaussian.
    pub sigma: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { mean: 50.0, sigma: 10.0 }
    }
}

/// Configuration of a toy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyConfig {
    /// Samples per trial.
    pub entries: usize,
    /// Number of trials to run.
    pub n_trials: usize,
    /// Generating distribution.
    pub generator: GeneratorConfig,
    /// Histogram binning of every trial.
    pub binning: Binning,
    /// Base seed; `0` draws one from system entropy.
    pub seed: u64,
    /// Fit modes applied to each trial, in order.
    pub modes: Vec<FitMode>,
}

impl Default for ToyConfig {
    fn default() -> Self {
        Self {
            entries: 1000,
            n_trials: 1000,
            generator: GeneratorConfig::default(),
            binning: Binning::default(),
            seed: 0,
            modes: vec![FitMode::LeastSquares],
        }
    }
}

impl ToyConfig {
    /// The same configuration fitting every trial in both modes.
    pub fn comparison(self) -> Self {
        Self { modes: vec![FitMode::LeastSquares, FitMode::Likelihood], ..self }
    }

    /// Reject configurations no trial could run with.
    pub fn validate(&self) -> Result<()> {
        if self.entries < 1 {
            return Err(Error::InvalidConfiguration("entries must be >= 1".to_string()));
        }
        if self.n_trials < 1 {
            return Err(Error::InvalidConfiguration("n_trials must be >= 1".to_string()));
        }
        self.binning.validate()?;
        let g = &self.generator;
        if !g.mean.is_finite() {
            return Err(Error::InvalidConfiguration(format!(
                "generator mean must be finite, got {}",
                g.mean
            )));
        }
        if !(g.sigma.is_finite() && g.sigma > 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "generator sigma must be finite and > 0, got {}",
                g.sigma
            )));
        }
        if self.modes.is_empty() {
            return Err(Error::InvalidConfiguration("at least one fit mode is required".to_string()));
        }
        for (i, mode) in self.modes.iter().enumerate() {
            if self.modes[..i].contains(mode) {
                return Err(Error::InvalidConfiguration(format!("fit mode {mode} listed twice")));
            }
        }
        Ok(())
    }
}

/// Diagnostics of one converged fit of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToyTrialRecord {
    /// Trial index in `0..n_trials`.
    pub trial: usize,
    /// Mode of the fit.
    pub mode: FitMode,
    /// Chi-square at the minimum (least squares).
    pub chi2: Option<f64>,
    /// Degrees of freedom.
    pub ndf: usize,
    /// `chi2 / ndf`, 0 when `ndf == 0` (least squares).
    pub reduced_chi2: Option<f64>,
    /// Fit probability (least squares).
    pub probability: Option<f64>,
    /// Fitted amplitude.
    pub fitted_amplitude: f64,
    /// Fitted mean.
    pub fitted_mean: f64,
    /// Uncertainty on the fitted mean.
    pub mean_error: f64,
    /// Fitted sigma.
    pub fitted_sigma: f64,
    /// Uncertainty on the fitted sigma.
    pub sigma_error: f64,
    /// `-2 ln L` at the minimum (likelihood).
    pub nll: Option<f64>,
}

impl ToyTrialRecord {
    fn from_fit(trial: usize, fit: &FitResult) -> Self {
        Self {
            trial,
            mode: fit.mode,
            chi2: fit.chi2,
            ndf: fit.ndf,
            reduced_chi2: fit.reduced_chi2(),
            probability: fit.probability,
            fitted_amplitude: fit.params.amplitude,
            fitted_mean: fit.params.mean,
            mean_error: fit.param_errors.mean_error,
            fitted_sigma: fit.params.sigma,
            sigma_error: fit.param_errors.sigma_error,
            nll: fit.nll,
        }
    }
}

/// Summaries of the per-trial series of one mode. Fields are `None` when the
/// series is empty (no surviving records, or a statistic the mode does not report).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSummary {
    /// Reduced chi-square.
    pub reduced_chi2: Option<SeriesSummary>,
    /// Fit probability.
    pub probability: Option<SeriesSummary>,
    /// Fitted mean.
    pub fitted_mean: Option<SeriesSummary>,
    /// Uncertainty on the fitted mean.
    pub mean_error: Option<SeriesSummary>,
    /// Fitted sigma.
    pub fitted_sigma: Option<SeriesSummary>,
    /// `-2 ln L` at the minimum.
    pub nll: Option<SeriesSummary>,
}

/// Surviving records of one fit mode, in trial order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeEnsemble {
    /// Fit mode.
    pub mode: FitMode,
    /// One record per converged fit, ordered by trial index.
    pub records: Vec<ToyTrialRecord>,
    /// Trials whose fit returned `converged == false`.
    pub n_nonconverged: usize,
    /// Trials whose fitter returned an error.
    pub n_error: usize,
}

impl ModeEnsemble {
    fn new(mode: FitMode) -> Self {
        Self { mode, records: Vec::new(), n_nonconverged: 0, n_error: 0 }
    }

    /// Number of surviving records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when no fit of this mode survived.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Reduced chi-square per surviving record (least squares only).
    pub fn reduced_chi2_values(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.reduced_chi2).collect()
    }

    /// Fit probability per surviving record (least squares only).
    pub fn probability_values(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.probability).collect()
    }

    /// Fitted mean per surviving record.
    pub fn fitted_mean_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.fitted_mean).collect()
    }

    /// Mean uncertainty per surviving record.
    pub fn mean_error_values(&self) -> Vec<f64> {
        self.records.iter().map(|r| r.mean_error).collect()
    }

    /// `-2 ln L` per surviving record (likelihood only).
    pub fn nll_values(&self) -> Vec<f64> {
        self.records.iter().filter_map(|r| r.nll).collect()
    }

    /// Per-series summaries over the surviving records.
    pub fn summary(&self) -> EnsembleSummary {
        let sigmas: Vec<f64> = self.records.iter().map(|r| r.fitted_sigma).collect();
        EnsembleSummary {
            reduced_chi2: SeriesSummary::from_values(&self.reduced_chi2_values()),
            probability: SeriesSummary::from_values(&self.probability_values()),
            fitted_mean: SeriesSummary::from_values(&self.fitted_mean_values()),
            mean_error: SeriesSummary::from_values(&self.mean_error_values()),
            fitted_sigma: SeriesSummary::from_values(&sigmas),
            nll: SeriesSummary::from_values(&self.nll_values()),
        }
    }
}

/// Output of [`ToyExperimentRunner::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToyRunResult {
    /// Configuration the run used.
    pub config: ToyConfig,
    /// Resolved base seed; replays the run when used as `config.seed`.
    pub base_seed: u64,
    /// Trials requested.
    pub n_trials_requested: usize,
    /// Trials that ran (fewer than requested only after cancellation).
    pub n_trials_completed: usize,
    /// One ensemble per configured mode, in configuration order.
    pub ensembles: Vec<ModeEnsemble>,
}

impl ToyRunResult {
    /// Ensemble of `mode`, if it was configured.
    pub fn ensemble(&self, mode: FitMode) -> Option<&ModeEnsemble> {
        self.ensembles.iter().find(|e| e.mode == mode)
    }

    /// Per-series summaries of `mode`, if it was configured.
    pub fn summary(&self, mode: FitMode) -> Option<EnsembleSummary> {
        self.ensemble(mode).map(ModeEnsemble::summary)
    }

    /// Expected spread of the fitted mean, `sigma / sqrt(entries)`.
    pub fn theoretical_mean_error(&self) -> f64 {
        self.config.generator.sigma / (self.config.entries as f64).sqrt()
    }
}

enum TrialOutcome {
    Record(ToyTrialRecord),
    NonConverged,
    Error,
}

/// Runs pseudo-experiments against a [`Fitter`].
pub struct ToyExperimentRunner<'a, F: Fitter + ?Sized> {
    fitter: &'a F,
    config: ToyConfig,
}

impl<'a, F: Fitter + ?Sized> ToyExperimentRunner<'a, F> {
    /// Create a runner; fails with `InvalidConfiguration` for an unusable `config`.
    pub fn new(fitter: &'a F, config: ToyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { fitter, config })
    }

    /// Configuration of this runner.
    pub fn config(&self) -> &ToyConfig {
        &self.config
    }

    /// Run every trial.
    pub fn run(&self) -> Result<ToyRunResult> {
        self.run_until(&AtomicBool::new(false))
    }

    /// Run trials until done or until `cancel` is set.
    ///
    /// Trials not yet started when `cancel` becomes `true` are skipped; completed
    /// trials are kept and reported.
    pub fn run_until(&self, cancel: &AtomicBool) -> Result<ToyRunResult> {
        let cfg = &self.config;
        let base_seed = SeedPolicy::from_seed(cfg.seed).resolve();
        let prototype = cfg.binning.histogram("toy")?;
        let n_trials = cfg.n_trials;
        let fitter = self.fitter;

        log::info!(
            "Running {} toy trials of {} entries (modes: {:?}, base seed {})",
            n_trials,
            cfg.entries,
            cfg.modes,
            base_seed
        );

        let outcomes: Vec<Option<Vec<TrialOutcome>>> = (0..n_trials)
            .into_par_iter()
            .with_min_len(16)
            .map_init(
                || prototype.clone(),
                |histogram, trial| {
                    if cancel.load(Ordering::Relaxed) {
                        return None;
                    }
                    if trial % PROGRESS_EVERY == 0 {
                        log::debug!("toy trial {}/{}", trial, n_trials);
                    }
                    let mut sampler = SeededGaussianSampler::from_seed(trial_seed(base_seed, trial));
                    fill_gaussian(
                        histogram,
                        &mut sampler,
                        cfg.generator.mean,
                        cfg.generator.sigma,
                        cfg.entries,
                    );
                    let per_mode: Vec<TrialOutcome> = cfg
                        .modes
                        .iter()
                        .map(|&mode| match fitter.fit(histogram, mode, true) {
                            Ok(fit) if fit.converged => {
                                TrialOutcome::Record(ToyTrialRecord::from_fit(trial, &fit))
                            }
                            Ok(_) => TrialOutcome::NonConverged,
                            Err(e) => {
                                log::debug!("toy trial {} ({} fit) failed: {}", trial, mode, e);
                                TrialOutcome::Error
                            }
                        })
                        .collect();
                    Some(per_mode)
                },
            )
            .collect();

        let mut ensembles: Vec<ModeEnsemble> =
            cfg.modes.iter().map(|&mode| ModeEnsemble::new(mode)).collect();
        let mut n_trials_completed = 0;
        for per_mode in outcomes.into_iter().flatten() {
            n_trials_completed += 1;
            for (ensemble, outcome) in ensembles.iter_mut().zip(per_mode) {
                match outcome {
                    TrialOutcome::Record(r) => ensemble.records.push(r),
                    TrialOutcome::NonConverged => ensemble.n_nonconverged += 1,
                    TrialOutcome::Error => ensemble.n_error += 1,
                }
            }
        }

        for e in &ensembles {
            log::info!(
                "{} fits: {}/{} converged ({} not converged, {} errors)",
                e.mode,
                e.records.len(),
                n_trials_completed,
                e.n_nonconverged,
                e.n_error
            );
        }
        if n_trials_completed < n_trials {
            log::warn!("Toy run cancelled after {}/{} trials", n_trials_completed, n_trials);
        }

        Ok(ToyRunResult {
            config: cfg.clone(),
            base_seed,
            n_trials_requested: n_trials,
            n_trials_completed,
            ensembles,
        })
    }
}

/// Pseudo-experiments without refitting.
///
/// Each trial fills `binning` with `entries` samples of the Gaussian(`params.mean`,
/// `params.sigma`) and evaluates `statistic` against `params`. Trial `j` uses stream
/// seed `base_seed + j`; values are returned in trial order.
pub fn statistic_ensemble(
    params: &GaussianParameters,
    binning: &Binning,
    entries: usize,
    n_trials: usize,
    statistic: Statistic,
    base_seed: u64,
) -> Result<Vec<f64>> {
    if entries < 1 {
        return Err(Error::InvalidConfiguration("entries must be >= 1".to_string()));
    }
    if n_trials < 1 {
        return Err(Error::InvalidConfiguration("n_trials must be >= 1".to_string()));
    }
    params.validate()?;
    let prototype = binning.histogram("toy")?;

    let values = (0..n_trials)
        .into_par_iter()
        .with_min_len(16)
        .map_init(
            || prototype.clone(),
            |histogram, trial| {
                let mut sampler = SeededGaussianSampler::from_seed(trial_seed(base_seed, trial));
                fill_gaussian(histogram, &mut sampler, params.mean, params.sigma, entries);
                statistic.eval(histogram, params)
            },
        )
        .collect();
    Ok(values)
}
