//! Binned Gaussian fits.
//!
//! [`Fitter`] is the capability the toy runner, profile scanner and consistency
//! workflow consume. [`GaussianFitter`] is the concrete implementation: it minimizes
//! the chi-square or `-2 ln L` statistic with L-BFGS and derives uncertainties from
//! the Hessian at the minimum.

use crate::optimizer::{
    GaussianMinimizer, GaussianObjective, Minimum, OptimizerConfig, ParameterBounds,
};
use crate::statistic::{chi_square_bins, Statistic};
use nalgebra::DMatrix;
use std::f64::consts::PI;
use ts_core::{
    FitMode, FitResult, GaussianParameters, ParameterErrors, Result, N_GAUSSIAN_PARAMS,
};
use ts_hist::Histogram;

/// Fits the Gaussian model to a histogram.
///
/// Implementations return `Ok` with `converged == false` when the fit ran but failed;
/// `Err` is reserved for failures of the fitting machinery itself.
pub trait Fitter: Send + Sync {
    /// Fit `histogram` by minimizing the statistic of `mode`.
    ///
    /// `quiet` suppresses per-fit summaries at `info` level.
    fn fit(&self, histogram: &Histogram, mode: FitMode, quiet: bool) -> Result<FitResult>;
}

impl<F: Fitter + ?Sized> Fitter for &F {
    fn fit(&self, histogram: &Histogram, mode: FitMode, quiet: bool) -> Result<FitResult> {
        (**self).fit(histogram, mode, quiet)
    }
}

/// Why a minimization from one start point was not accepted.
#[derive(Debug)]
struct Rejected {
    message: String,
    n_iter: u64,
}

/// L-BFGS fitter of the three-parameter Gaussian.
///
/// The first attempt starts from the histogram moments. When it fails, ends on a
/// lower bound, or ends above the statistic it started from, the fit is restarted
/// from the minimum of the other statistic and then from the tallest-bin amplitude.
#[derive(Debug, Clone, Default)]
pub struct GaussianFitter {
    config: OptimizerConfig,
}

impl GaussianFitter {
    /// Create a fitter with the default optimizer configuration.
    pub fn new() -> Self {
        Self { config: OptimizerConfig::default() }
    }

    /// Create a fitter with a custom optimizer configuration.
    pub fn with_config(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Access the optimizer configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Start point from the histogram moments, `None` for a histogram without content.
    ///
    /// Mean and sigma are the count-weighted mean and RMS of the bin centers, with
    /// sigma floored at half a bin width. The amplitude is the peak height of a
    /// Gaussian with that sigma holding the whole integral.
    pub fn initial_guess(histogram: &Histogram) -> Option<GaussianParameters> {
        let total = histogram.integral();
        if !(total > 0.0) {
            return None;
        }
        let mut sum_x = 0.0;
        for i in 0..histogram.n_bins() {
            sum_x += histogram.bin_content(i) * histogram.bin_center(i);
        }
        let mean = sum_x / total;
        let mut sum_dx2 = 0.0;
        for i in 0..histogram.n_bins() {
            let dx = histogram.bin_center(i) - mean;
            sum_dx2 += histogram.bin_content(i) * dx * dx;
        }
        let sigma = (sum_dx2 / total).sqrt().max(0.5 * histogram.bin_width());
        let amplitude = total * histogram.bin_width() / (sigma * (2.0 * PI).sqrt());
        Some(GaussianParameters::new(amplitude, mean, sigma))
    }

    /// Box bounds `[amplitude, mean, sigma]` used for `histogram`.
    pub fn bounds(histogram: &Histogram) -> ParameterBounds {
        let max_count = max_bin_content(histogram).max(1.0);
        let span = histogram.x_max() - histogram.x_min();
        [
            (1e-9 * max_count, 100.0 * max_count),
            (histogram.x_min() - span, histogram.x_max() + span),
            (1e-3 * histogram.bin_width(), 10.0 * span),
        ]
    }

    /// Minimize from `start` and accept the result only if it is a usable fit.
    fn attempt(
        &self,
        objective: GaussianObjective<'_>,
        start: &GaussianParameters,
        bounds: &ParameterBounds,
    ) -> std::result::Result<Minimum, Rejected> {
        let min = GaussianMinimizer::new(self.config.clone())
            .minimize(objective, start, bounds)
            .map_err(|e| Rejected { message: e.to_string(), n_iter: 0 })?;
        let reject = |message: String| Rejected { message, n_iter: min.n_iter };

        if !min.converged {
            return Err(reject(min.message.clone()));
        }
        if let Err(e) = min.params.validate() {
            return Err(reject(e.to_string()));
        }
        if let Some((name, value)) = min.pinned_at_lower_bound(bounds) {
            return Err(reject(format!("{name} pinned at its lower bound ({value:.3e})")));
        }
        let f_start = objective.value(start);
        if min.fval > f_start + 1e-9 * f_start.abs().max(1.0) {
            return Err(reject(format!(
                "{} rose from {f_start:.4} to {:.4}",
                objective.statistic(),
                min.fval
            )));
        }
        Ok(min)
    }

    /// Start points tried after the moment start is rejected.
    fn restart_points(
        &self,
        histogram: &Histogram,
        mode: FitMode,
        start: &GaussianParameters,
        bounds: &ParameterBounds,
    ) -> Vec<GaussianParameters> {
        let mut points = Vec::with_capacity(2);
        let other = match mode {
            FitMode::LeastSquares => Some(Statistic::NegLogLikelihood),
            FitMode::Likelihood if chi_square_bins(histogram) >= N_GAUSSIAN_PARAMS => {
                Some(Statistic::ChiSquare)
            }
            FitMode::Likelihood => None,
        };
        if let Some(statistic) = other {
            if let Ok(min) = self.attempt(GaussianObjective::new(histogram, statistic), start, bounds) {
                points.push(min.params);
            }
        }
        points.push(GaussianParameters::new(max_bin_content(histogram), start.mean, start.sigma));
        points
    }

    /// Finite-difference Hessian of the objective from its analytic gradient.
    ///
    /// H_{ij} ≈ (g_i(x + ε·e_j) − g_i(x)) / ε, then symmetrised.
    fn compute_hessian(
        &self,
        objective: &GaussianObjective<'_>,
        best: &GaussianParameters,
    ) -> DMatrix<f64> {
        let n = N_GAUSSIAN_PARAMS;
        let x = best.to_array();
        let grad_center = objective.gradient(best);

        let mut hessian = DMatrix::zeros(n, n);
        for j in 0..n {
            let eps = 1e-4 * x[j].abs().max(1.0);
            let mut shifted = x;
            shifted[j] += eps;
            let [a, m, s] = shifted;
            let grad_plus = objective.gradient(&GaussianParameters::new(a, m, s));

            for i in 0..n {
                hessian[(i, j)] = (grad_plus[i] - grad_center[i]) / eps;
            }
        }

        let ht = hessian.transpose();
        (&hessian + &ht) * 0.5
    }

    /// Invert the Hessian via damped Cholesky.
    ///
    /// Returns `None` if no positive-definite inverse with positive variances exists.
    fn invert_hessian(&self, hessian: &DMatrix<f64>) -> Option<DMatrix<f64>> {
        let n = hessian.nrows();
        let identity = DMatrix::identity(n, n);
        let diag_scale = (0..n).map(|i| hessian[(i, i)].abs()).fold(0.0_f64, f64::max).max(1.0);

        let mut h_damped = hessian.clone();
        let mut damping = 0.0_f64;
        let max_attempts = 10;

        for attempt in 0..max_attempts {
            if let Some(chol) = nalgebra::linalg::Cholesky::new(h_damped.clone()) {
                return Some(chol.solve(&identity));
            }
            if attempt + 1 == max_attempts {
                break;
            }
            let next_damping = if damping == 0.0 { diag_scale * 1e-9 } else { damping * 10.0 };
            let add = next_damping - damping;
            for i in 0..n {
                h_damped[(i, i)] += add;
            }
            damping = next_damping;
        }

        let inv = h_damped.lu().try_inverse()?;
        if (0..n).all(|i| inv[(i, i)].is_finite() && inv[(i, i)] > 0.0) {
            Some(inv)
        } else {
            None
        }
    }

    /// Uncertainties from the Hessian diagonal alone (fallback).
    fn diagonal_uncertainties(&self, hessian: &DMatrix<f64>) -> Vec<f64> {
        (0..hessian.nrows()).map(|i| (2.0 / hessian[(i, i)].abs().max(1e-12)).sqrt()).collect()
    }
}

fn max_bin_content(histogram: &Histogram) -> f64 {
    histogram.bin_contents().iter().copied().fold(0.0_f64, f64::max)
}

impl Fitter for GaussianFitter {
    fn fit(&self, histogram: &Histogram, mode: FitMode, quiet: bool) -> Result<FitResult> {
        let level = if quiet { log::Level::Debug } else { log::Level::Info };

        let Some(start) = Self::initial_guess(histogram) else {
            return Ok(FitResult::not_converged(mode, "histogram has no content"));
        };
        let n_nonempty = histogram.n_nonempty_bins();
        if mode == FitMode::LeastSquares && chi_square_bins(histogram) < N_GAUSSIAN_PARAMS {
            return Ok(FitResult::not_converged(
                mode,
                format!(
                    "{} non-empty bins, need at least {} for a least-squares fit",
                    n_nonempty, N_GAUSSIAN_PARAMS
                ),
            ));
        }

        let objective = GaussianObjective::new(histogram, Statistic::for_mode(mode));
        let bounds = Self::bounds(histogram);
        let min = match self.attempt(objective, &start, &bounds) {
            Ok(min) => min,
            Err(first) => {
                log::debug!("{} fit of '{}' restarting: {}", mode, histogram.name(), first.message);
                let restarted = self
                    .restart_points(histogram, mode, &start, &bounds)
                    .iter()
                    .find_map(|point| self.attempt(objective, point, &bounds).ok());
                match restarted {
                    Some(min) => min,
                    None => {
                        log::log!(
                            level,
                            "{} fit of '{}' did not converge: {}",
                            mode,
                            histogram.name(),
                            first.message
                        );
                        let mut fr = FitResult::not_converged(mode, first.message);
                        fr.n_iter = first.n_iter;
                        return Ok(fr);
                    }
                }
            }
        };

        // Both statistics are -2 ln L up to a constant, so cov = (H / 2)^-1.
        let hessian = self.compute_hessian(&objective, &min.params);
        let (errors, covariance) = match self.invert_hessian(&hessian) {
            Some(inv) => {
                let cov = inv * 2.0;
                let errors: Vec<f64> = (0..N_GAUSSIAN_PARAMS).map(|i| cov[(i, i)].sqrt()).collect();
                // Symmetric, so column-major iteration equals row-major layout.
                (errors, Some(cov.iter().copied().collect::<Vec<f64>>()))
            }
            None => {
                log::warn!("Hessian inversion failed, using diagonal approximation");
                (self.diagonal_uncertainties(&hessian), None)
            }
        };
        if errors.iter().any(|e| !(e.is_finite() && *e > 0.0)) {
            let mut fr = FitResult::not_converged(mode, "parameter uncertainties are undefined");
            fr.n_iter = min.n_iter;
            return Ok(fr);
        }

        let ndf = n_nonempty.saturating_sub(N_GAUSSIAN_PARAMS);
        let (chi2, probability, nll) = match mode {
            FitMode::LeastSquares => {
                (Some(min.fval), Some(ts_prob::chisq::prob(min.fval, ndf)), None)
            }
            FitMode::Likelihood => (None, None, Some(min.fval)),
        };

        let param_errors = ParameterErrors::from_slice(&errors)?;
        log::log!(
            level,
            "{} fit of '{}': {} (mean ± {:.4}, sigma ± {:.4}), statistic={:.4}, ndf={}, \
             {} iterations, {} statistic and {} gradient evaluations",
            mode,
            histogram.name(),
            min.params,
            param_errors.mean_error,
            param_errors.sigma_error,
            min.fval,
            ndf,
            min.n_iter,
            min.n_fev,
            min.n_gev
        );
        Ok(FitResult {
            mode,
            params: min.params,
            param_errors,
            chi2,
            ndf,
            probability,
            nll,
            covariance,
            converged: true,
            n_iter: min.n_iter,
            message: min.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Noise-free Gaussian counts rounded to integers.
    fn smooth_histogram(amplitude: f64, mean: f64, sigma: f64) -> Histogram {
        let truth = GaussianParameters::new(amplitude, mean, sigma);
        let counts = (0..100).map(|i| truth.eval(i as f64 + 0.5).round()).collect();
        Histogram::from_counts("smooth", 0.0, 100.0, counts).unwrap()
    }

    #[test]
    fn test_initial_guess_from_moments() {
        let h = Histogram::from_counts("h", 0.0, 4.0, vec![0.0, 2.0, 2.0, 0.0]).unwrap();
        let p = GaussianFitter::initial_guess(&h).unwrap();
        assert_relative_eq!(p.mean, 2.0);
        assert_relative_eq!(p.sigma, 0.5);
        assert_relative_eq!(p.amplitude, 4.0 / (0.5 * (2.0 * PI).sqrt()), max_relative = 1e-12);

        let single = Histogram::from_counts("s", 0.0, 10.0, vec![0.0, 5.0, 0.0, 0.0, 0.0]).unwrap();
        let p = GaussianFitter::initial_guess(&single).unwrap();
        assert_relative_eq!(p.sigma, 1.0);
        assert_relative_eq!(p.amplitude, 10.0 / (2.0 * PI).sqrt(), max_relative = 1e-12);

        let empty = Histogram::new("e", 10, 0.0, 1.0).unwrap();
        assert!(GaussianFitter::initial_guess(&empty).is_none());
    }

    #[test]
    fn test_restart_points_cover_other_statistic_and_tallest_bin() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let fitter = GaussianFitter::new();
        let start = GaussianFitter::initial_guess(&h).unwrap();
        let bounds = GaussianFitter::bounds(&h);

        let points = fitter.restart_points(&h, FitMode::LeastSquares, &start, &bounds);
        assert_eq!(points.len(), 2);
        assert!((points[0].mean - 50.0).abs() < 0.2, "{}", points[0]);
        assert_relative_eq!(points[1].amplitude, 40.0);
        assert_relative_eq!(points[1].mean, start.mean);

        let two = Histogram::from_counts("two", 0.0, 5.0, vec![0.0, 3.0, 4.0, 0.0, 0.0]).unwrap();
        let start = GaussianFitter::initial_guess(&two).unwrap();
        let bounds = GaussianFitter::bounds(&two);
        let points = fitter.restart_points(&two, FitMode::Likelihood, &start, &bounds);
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].amplitude, 4.0);
    }

    #[test]
    fn test_attempt_accepts_descent_from_nearby_start() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let bounds = GaussianFitter::bounds(&h);
        let objective = GaussianObjective::new(&h, Statistic::ChiSquare);
        let start = GaussianParameters::new(35.0, 48.0, 9.0);
        let min = GaussianFitter::new().attempt(objective, &start, &bounds).unwrap();
        assert!(min.fval <= objective.value(&start));
        assert!(min.pinned_at_lower_bound(&bounds).is_none());
    }

    #[test]
    fn test_least_squares_recovers_smooth_peak() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let fit = GaussianFitter::new().fit(&h, FitMode::LeastSquares, true).unwrap();

        assert!(fit.converged, "{}", fit.message);
        assert!((fit.params.mean - 50.0).abs() < 0.2, "mean = {}", fit.params.mean);
        assert!((fit.params.sigma - 10.0).abs() < 0.2, "sigma = {}", fit.params.sigma);
        assert!((fit.params.amplitude - 40.0).abs() < 1.0);
        assert_eq!(fit.ndf, h.n_nonempty_bins() - 3);
        let p = fit.probability.unwrap();
        assert!((0.0..=1.0).contains(&p));
        assert!(fit.chi2.unwrap() >= 0.0);
        assert!(fit.nll.is_none());
        assert!(fit.param_errors.mean_error > 0.0 && fit.param_errors.mean_error < 1.0);
    }

    #[test]
    fn test_likelihood_recovers_smooth_peak() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let fit = GaussianFitter::new().fit(&h, FitMode::Likelihood, true).unwrap();

        assert!(fit.converged, "{}", fit.message);
        assert!((fit.params.mean - 50.0).abs() < 0.2);
        assert!((fit.params.sigma - 10.0).abs() < 0.2);
        assert!(fit.nll.is_some());
        assert!(fit.chi2.is_none() && fit.probability.is_none());
        assert!(fit.reduced_chi2().is_none());
    }

    #[test]
    fn test_covariance_is_symmetric_with_matching_errors() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let fit = GaussianFitter::new().fit(&h, FitMode::LeastSquares, true).unwrap();
        let cov = fit.covariance.as_ref().expect("covariance");
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(cov[i * 3 + j], cov[j * 3 + i], max_relative = 1e-6);
            }
        }
        assert_relative_eq!(cov[4].sqrt(), fit.param_errors.mean_error, max_relative = 1e-12);
        assert_relative_eq!(fit.correlation(1, 1).unwrap(), 1.0, max_relative = 1e-9);
    }

    #[test]
    fn test_empty_histogram_does_not_converge() {
        let h = Histogram::new("empty", 100, 0.0, 100.0).unwrap();
        for mode in [FitMode::LeastSquares, FitMode::Likelihood] {
            let fit = GaussianFitter::new().fit(&h, mode, true).unwrap();
            assert!(!fit.converged);
            assert!(fit.require_converged().is_err());
        }
    }

    #[test]
    fn test_least_squares_needs_three_filled_bins() {
        let h = Histogram::from_counts("two", 0.0, 5.0, vec![0.0, 3.0, 4.0, 0.0, 0.0]).unwrap();
        let fit = GaussianFitter::new().fit(&h, FitMode::LeastSquares, true).unwrap();
        assert!(!fit.converged);
        assert!(fit.message.contains("non-empty bins"));
    }

    #[test]
    fn test_bounds_keep_amplitude_and_sigma_positive() {
        let h = smooth_histogram(40.0, 50.0, 10.0);
        let b = GaussianFitter::bounds(&h);
        assert!(b[0].0 > 0.0 && b[2].0 > 0.0);
        assert!(b[1].0 < 0.0 && b[1].1 > 100.0);
    }
}
