//! Common data types for ToyStat

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of free parameters of the Gaussian model (amplitude, mean, sigma).
pub const N_GAUSSIAN_PARAMS: usize = 3;

/// Parameters of the binned Gaussian model
/// `amplitude * exp(-0.5 * ((x - mean) / sigma)^2)`.
///
/// Parameter order everywhere a flat slice is used: `[amplitude, mean, sigma]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianParameters {
    /// Peak height in counts per bin.
    pub amplitude: f64,
    /// Location of the peak.
    pub mean: f64,
    /// Width of the peak.
    pub sigma: f64,
}

impl GaussianParameters {
    /// Create a parameter set without validation.
    ///
    /// Scans and toy generators routinely evaluate parameter points that a fit
    /// would never return, so construction does not enforce positivity.
    /// Use [`GaussianParameters::validate`] where the fit invariants matter.
    pub const fn new(amplitude: f64, mean: f64, sigma: f64) -> Self {
        Self { amplitude, mean, sigma }
    }

    /// Build from a `[amplitude, mean, sigma]` slice.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [amplitude, mean, sigma] => Ok(Self::new(*amplitude, *mean, *sigma)),
            _ => Err(Error::Validation(format!(
                "Gaussian parameters need {} values, got {}",
                N_GAUSSIAN_PARAMS,
                values.len()
            ))),
        }
    }

    /// Flat `[amplitude, mean, sigma]` representation.
    pub fn to_array(&self) -> [f64; N_GAUSSIAN_PARAMS] {
        [self.amplitude, self.mean, self.sigma]
    }

    /// Check the invariants of a fitted parameter set: finite, `amplitude > 0`, `sigma > 0`.
    pub fn validate(&self) -> Result<()> {
        if !(self.amplitude.is_finite() && self.mean.is_finite() && self.sigma.is_finite()) {
            return Err(Error::Validation(format!("non-finite Gaussian parameters: {self}")));
        }
        if self.amplitude <= 0.0 {
            return Err(Error::Validation(format!(
                "amplitude must be > 0, got {}",
                self.amplitude
            )));
        }
        if self.sigma <= 0.0 {
            return Err(Error::Validation(format!("sigma must be > 0, got {}", self.sigma)));
        }
        Ok(())
    }

    /// Evaluate the model at `x`.
    #[inline]
    pub fn eval(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.sigma;
        self.amplitude * (-0.5 * z * z).exp()
    }

    /// Copy with a different mean.
    pub fn with_mean(self, mean: f64) -> Self {
        Self { mean, ..self }
    }

    /// Copy with a different sigma.
    pub fn with_sigma(self, sigma: f64) -> Self {
        Self { sigma, ..self }
    }
}

impl fmt::Display for GaussianParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Gaussian(amplitude={:.4}, mean={:.4}, sigma={:.4})",
            self.amplitude, self.mean, self.sigma
        )
    }
}

/// One-sigma uncertainties of the fitted Gaussian parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterErrors {
    /// Uncertainty on the amplitude.
    pub amplitude_error: f64,
    /// Uncertainty on the mean.
    pub mean_error: f64,
    /// Uncertainty on sigma.
    pub sigma_error: f64,
}

impl ParameterErrors {
    /// Build from a `[amplitude, mean, sigma]` slice of uncertainties.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [amplitude_error, mean_error, sigma_error] => Ok(Self {
                amplitude_error: *amplitude_error,
                mean_error: *mean_error,
                sigma_error: *sigma_error,
            }),
            _ => Err(Error::Validation(format!(
                "parameter errors need {} values, got {}",
                N_GAUSSIAN_PARAMS,
                values.len()
            ))),
        }
    }

    /// All-NaN placeholder used by non-converged fits.
    pub const fn undefined() -> Self {
        Self { amplitude_error: f64::NAN, mean_error: f64::NAN, sigma_error: f64::NAN }
    }

    /// Flat `[amplitude, mean, sigma]` representation.
    pub fn to_array(&self) -> [f64; N_GAUSSIAN_PARAMS] {
        [self.amplitude_error, self.mean_error, self.sigma_error]
    }
}

/// Loss used by a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Neyman chi-square with count-based bin errors.
    LeastSquares,
    /// Binned Poisson likelihood.
    Likelihood,
}

impl FitMode {
    /// Stable lowercase name (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::LeastSquares => "least_squares",
            FitMode::Likelihood => "likelihood",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fit result containing parameter estimates, uncertainties, and loss diagnostics.
///
/// When `converged` is false the numeric fields carry no meaning; callers must check
/// `converged` (or use [`FitResult::require_converged`]) before reading any statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Loss that was minimized.
    pub mode: FitMode,

    /// Best-fit parameters.
    pub params: GaussianParameters,

    /// Parameter uncertainties (sqrt of covariance diagonal).
    pub param_errors: ParameterErrors,

    /// Chi-square at the minimum (least-squares mode only).
    pub chi2: Option<f64>,

    /// Degrees of freedom: bins used minus free parameters.
    pub ndf: usize,

    /// Upper-tail chi-square probability of `chi2` for `ndf` (least-squares mode only).
    pub probability: Option<f64>,

    /// `-2 ln L` at the minimum (likelihood mode only).
    pub nll: Option<f64>,

    /// Covariance matrix (row-major, 3×3). `None` if Hessian inversion failed.
    pub covariance: Option<Vec<f64>>,

    /// Convergence status
    pub converged: bool,

    /// Number of optimizer iterations
    pub n_iter: u64,

    /// Termination message from the optimizer (or the reason a fit was not attempted).
    pub message: String,
}

impl FitResult {
    /// A result for a fit that did not converge or could not be attempted.
    pub fn not_converged(mode: FitMode, message: impl Into<String>) -> Self {
        Self {
            mode,
            params: GaussianParameters::new(f64::NAN, f64::NAN, f64::NAN),
            param_errors: ParameterErrors::undefined(),
            chi2: None,
            ndf: 0,
            probability: None,
            nll: None,
            covariance: None,
            converged: false,
            n_iter: 0,
            message: message.into(),
        }
    }

    /// Return `self` if converged, [`Error::FitDidNotConverge`] otherwise.
    pub fn require_converged(self) -> Result<Self> {
        if self.converged {
            Ok(self)
        } else {
            Err(Error::FitDidNotConverge(format!("{} fit: {}", self.mode, self.message)))
        }
    }

    /// `chi2 / ndf`, or 0 when `ndf == 0`. `None` outside least-squares mode.
    pub fn reduced_chi2(&self) -> Option<f64> {
        let chi2 = self.chi2?;
        Some(if self.ndf > 0 { chi2 / self.ndf as f64 } else { 0.0 })
    }

    /// Get correlation matrix element (i, j). Returns `None` if covariance is unavailable.
    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = N_GAUSSIAN_PARAMS;
        if i >= n || j >= n {
            return None;
        }
        let errors = self.param_errors.to_array();
        let sigma_i = errors[i];
        let sigma_j = errors[j];
        if sigma_i <= 0.0 || sigma_j <= 0.0 {
            return None;
        }
        Some(cov[i * n + j] / (sigma_i * sigma_j))
    }

    /// Full 3×3 correlation matrix, rows ordered `[amplitude, mean, sigma]`.
    pub fn correlation_matrix(&self) -> Option<Vec<Vec<f64>>> {
        (0..N_GAUSSIAN_PARAMS)
            .map(|i| (0..N_GAUSSIAN_PARAMS).map(|j| self.correlation(i, j)).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn converged_fit() -> FitResult {
        FitResult {
            mode: FitMode::LeastSquares,
            params: GaussianParameters::new(40.0, 50.0, 10.0),
            param_errors: ParameterErrors { amplitude_error: 1.5, mean_error: 0.3, sigma_error: 0.2 },
            chi2: Some(55.0),
            ndf: 50,
            probability: Some(0.29),
            nll: None,
            covariance: Some(vec![2.25, 0.0, 0.09, 0.0, 0.09, 0.0, 0.09, 0.0, 0.04]),
            converged: true,
            n_iter: 12,
            message: "Solver converged".to_string(),
        }
    }

    #[test]
    fn test_eval_peak_and_one_sigma() {
        let p = GaussianParameters::new(10.0, 50.0, 5.0);
        assert_relative_eq!(p.eval(50.0), 10.0);
        assert_relative_eq!(p.eval(55.0), 10.0 * (-0.5f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(p.eval(45.0), p.eval(55.0), epsilon = 1e-12);
    }

    #[test]
    fn test_validate() {
        assert!(GaussianParameters::new(1.0, 0.0, 1.0).validate().is_ok());
        assert!(GaussianParameters::new(0.0, 0.0, 1.0).validate().is_err());
        assert!(GaussianParameters::new(1.0, 0.0, -1.0).validate().is_err());
        assert!(GaussianParameters::new(1.0, f64::NAN, 1.0).validate().is_err());
    }

    #[test]
    fn test_from_slice_roundtrip_and_length_check() {
        let p = GaussianParameters::from_slice(&[3.0, 1.0, 2.0]).unwrap();
        assert_eq!(p.to_array(), [3.0, 1.0, 2.0]);
        assert!(GaussianParameters::from_slice(&[1.0, 2.0]).is_err());
        assert!(ParameterErrors::from_slice(&[1.0, 2.0, 3.0, 4.0]).is_err());
    }

    #[test]
    fn test_reduced_chi2() {
        let fit = converged_fit();
        assert_relative_eq!(fit.reduced_chi2().unwrap(), 1.1);

        let zero_ndf = FitResult { ndf: 0, ..converged_fit() };
        assert_eq!(zero_ndf.reduced_chi2(), Some(0.0));

        let likelihood = FitResult { chi2: None, ..converged_fit() };
        assert_eq!(likelihood.reduced_chi2(), None);
    }

    #[test]
    fn test_require_converged() {
        assert!(converged_fit().require_converged().is_ok());
        let failed = FitResult::not_converged(FitMode::Likelihood, "empty histogram");
        match failed.require_converged() {
            Err(Error::FitDidNotConverge(msg)) => assert!(msg.contains("empty histogram")),
            other => panic!("expected FitDidNotConverge, got {other:?}"),
        }
    }

    #[test]
    fn test_correlation() {
        let fit = converged_fit();
        assert_relative_eq!(fit.correlation(0, 0).unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(fit.correlation(0, 2).unwrap(), 0.09 / (1.5 * 0.2), epsilon = 1e-12);
        assert!(fit.correlation(3, 0).is_none());

        let m = fit.correlation_matrix().unwrap();
        assert_eq!(m.len(), 3);
        assert_relative_eq!(m[2][0], m[0][2], epsilon = 1e-12);
        assert_relative_eq!(m[1][1], 1.0, epsilon = 1e-12);
        assert!(FitResult::not_converged(FitMode::Likelihood, "x").correlation_matrix().is_none());
    }

    #[test]
    fn test_fit_mode_serde_names() {
        assert_eq!(serde_json::to_string(&FitMode::LeastSquares).unwrap(), "\"least_squares\"");
        let m: FitMode = serde_json::from_str("\"likelihood\"").unwrap();
        assert_eq!(m, FitMode::Likelihood);
    }
}
