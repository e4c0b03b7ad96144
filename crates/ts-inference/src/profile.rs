//! One-dimensional profile scans around a best fit.
//!
//! All parameters but one are held at their best-fit values while the remaining one
//! sweeps a linear grid; the statistic is evaluated once per grid point. The grid
//! minimum is reported next to the fitter's continuous estimate and is not
//! expected to coincide with it.
//!
//! Offsets of `+1` and `+4` above the minimum mark approximate 68% / 95% intervals
//! for a single parameter (see [`ProfileScan::interval`]).

use crate::fitter::Fitter;
use crate::statistic::Statistic;
use serde::{Deserialize, Serialize};
use ts_core::{Error, FitMode, FitResult, GaussianParameters, Result};
use ts_hist::Histogram;

/// Default grid half-width in units of the parameter uncertainty.
pub const DEFAULT_N_SIGMAS: f64 = 5.0;

/// Default number of grid points.
pub const DEFAULT_SCAN_POINTS: usize = 100;

/// Parameter swept by a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanParameter {
    /// Gaussian mean.
    Mean,
    /// Gaussian width.
    Sigma,
}

impl ScanParameter {
    /// Value of this parameter in `params`.
    pub fn value(&self, params: &GaussianParameters) -> f64 {
        match self {
            ScanParameter::Mean => params.mean,
            ScanParameter::Sigma => params.sigma,
        }
    }

    /// Copy of `params` with this parameter replaced by `value`.
    pub fn set(&self, params: &GaussianParameters, value: f64) -> GaussianParameters {
        match self {
            ScanParameter::Mean => params.with_mean(value),
            ScanParameter::Sigma => params.with_sigma(value),
        }
    }

    /// Whether `value` is a legal value of this parameter; sigma must stay positive.
    pub fn admits(&self, value: f64) -> bool {
        match self {
            ScanParameter::Mean => true,
            ScanParameter::Sigma => value > 0.0,
        }
    }

    /// Fitted uncertainty of this parameter.
    pub fn error(&self, fit: &FitResult) -> f64 {
        match self {
            ScanParameter::Mean => fit.param_errors.mean_error,
            ScanParameter::Sigma => fit.param_errors.sigma_error,
        }
    }
}

/// `n_points` values spaced evenly over `[center - half_width, center + half_width]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanGrid {
    /// Grid midpoint.
    pub center: f64,
    /// Distance from the midpoint to either end.
    pub half_width: f64,
    /// Number of points, both endpoints included.
    pub n_points: usize,
}

impl ScanGrid {
    /// Validated grid.
    pub fn new(center: f64, half_width: f64, n_points: usize) -> Result<Self> {
        if n_points < 1 {
            return Err(Error::InvalidConfiguration("scan needs at least one point".to_string()));
        }
        if !center.is_finite() {
            return Err(Error::InvalidConfiguration(format!("scan center must be finite, got {center}")));
        }
        if !(half_width.is_finite() && half_width >= 0.0) {
            return Err(Error::InvalidConfiguration(format!(
                "scan half-width must be finite and >= 0, got {half_width}"
            )));
        }
        Ok(Self { center, half_width, n_points })
    }

    /// Grid centred on the best-fit value of `parameter`, `n_sigmas` uncertainties wide.
    pub fn around_fit(
        fit: &FitResult,
        parameter: ScanParameter,
        n_sigmas: f64,
        n_points: usize,
    ) -> Result<Self> {
        if !fit.converged {
            return Err(Error::FitDidNotConverge(format!(
                "cannot scan around a non-converged {} fit: {}",
                fit.mode, fit.message
            )));
        }
        Self::new(parameter.value(&fit.params), n_sigmas * parameter.error(fit), n_points)
    }

    /// Grid values in increasing order. Endpoints are exact; a single point sits at the center.
    pub fn values(&self) -> Vec<f64> {
        if self.n_points == 1 {
            return vec![self.center];
        }
        let lo = self.center - self.half_width;
        let hi = self.center + self.half_width;
        let step = (hi - lo) / (self.n_points - 1) as f64;
        (0..self.n_points)
            .map(|i| if i + 1 == self.n_points { hi } else { lo + i as f64 * step })
            .collect()
    }
}

/// One evaluated grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// Value of the scanned parameter.
    pub parameter_value: f64,
    /// Statistic at that value.
    pub statistic_value: f64,
}

/// Result of a profile scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileScan {
    /// Scanned parameter.
    pub parameter: ScanParameter,
    /// Evaluated statistic.
    pub statistic: Statistic,
    /// Value of the scanned parameter in the fixed parameter set.
    pub best_fit_value: f64,
    /// Grid points by increasing parameter value.
    pub points: Vec<ScanPoint>,
    /// Grid point with the smallest statistic.
    pub minimum: ScanPoint,
}

impl ProfileScan {
    /// Parameter range where the scanned curve stays below `minimum + delta`.
    ///
    /// Crossings are linearly interpolated between neighbouring grid points.
    /// `None` if the curve does not rise above the threshold on both sides of the
    /// minimum within the grid.
    pub fn interval(&self, delta: f64) -> Option<(f64, f64)> {
        let threshold = self.minimum.statistic_value + delta;
        let i_min = self.points.iter().position(|p| *p == self.minimum)?;

        let crossing = |inside: &ScanPoint, outside: &ScanPoint| {
            let dy = outside.statistic_value - inside.statistic_value;
            let t = if dy > 0.0 { (threshold - inside.statistic_value) / dy } else { 0.0 };
            inside.parameter_value + t * (outside.parameter_value - inside.parameter_value)
        };

        let lower = (0..i_min)
            .rev()
            .find(|&i| self.points[i].statistic_value >= threshold)
            .map(|i| crossing(&self.points[i + 1], &self.points[i]))?;
        let upper = (i_min + 1..self.points.len())
            .find(|&i| self.points[i].statistic_value >= threshold)
            .map(|i| crossing(&self.points[i - 1], &self.points[i]))?;
        Some((lower, upper))
    }
}

/// Sweep `parameter` over `grid` with every other parameter fixed at `fixed_params`.
pub fn scan(
    histogram: &Histogram,
    fixed_params: &GaussianParameters,
    parameter: ScanParameter,
    grid: &ScanGrid,
    statistic: Statistic,
) -> Result<ProfileScan> {
    let points: Vec<ScanPoint> = grid
        .values()
        .into_iter()
        .map(|value| {
            // The model depends on sigma only through sigma^2; non-positive widths stay undefined.
            let statistic_value = if parameter.admits(value) {
                statistic.eval(histogram, &parameter.set(fixed_params, value))
            } else {
                f64::NAN
            };
            ScanPoint { parameter_value: value, statistic_value }
        })
        .collect();

    let mut minimum: Option<ScanPoint> = None;
    for p in &points {
        if p.statistic_value.is_nan() {
            continue;
        }
        if minimum.map_or(true, |m| p.statistic_value < m.statistic_value) {
            minimum = Some(*p);
        }
    }
    let minimum = minimum.ok_or_else(|| {
        Error::Computation(format!("{statistic} is undefined at every {parameter:?} grid point"))
    })?;

    log::debug!(
        "{:?} scan of '{}': grid minimum {} = {:.6} at {:.6}",
        parameter,
        histogram.name(),
        statistic,
        minimum.statistic_value,
        minimum.parameter_value
    );

    Ok(ProfileScan {
        parameter,
        statistic,
        best_fit_value: parameter.value(fixed_params),
        points,
        minimum,
    })
}

/// Fit, statistic at the best fit, and mean scan of one histogram.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContourAnalysis {
    /// Converged fit the scan is built around.
    pub fit: FitResult,
    /// Statistic matching the fit mode, evaluated at the best fit.
    pub statistic_at_best_fit: f64,
    /// Scan of the mean.
    pub scan: ProfileScan,
}

/// Fit `histogram` in `mode` and scan the mean `n_sigmas` mean-errors either side
/// of the best fit over `n_points` points.
pub fn profile_contour<F: Fitter + ?Sized>(
    fitter: &F,
    histogram: &Histogram,
    mode: FitMode,
    n_sigmas: f64,
    n_points: usize,
) -> Result<ContourAnalysis> {
    let fit = fitter.fit(histogram, mode, false)?.require_converged()?;
    let statistic = Statistic::for_mode(mode);
    let statistic_at_best_fit = statistic.eval(histogram, &fit.params);
    let grid = ScanGrid::around_fit(&fit, ScanParameter::Mean, n_sigmas, n_points)?;
    let scan = scan(histogram, &fit.params, ScanParameter::Mean, &grid, statistic)?;
    Ok(ContourAnalysis { fit, statistic_at_best_fit, scan })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitter::GaussianFitter;
    use approx::assert_relative_eq;

    fn smooth_histogram() -> Histogram {
        let truth = GaussianParameters::new(40.0, 50.0, 10.0);
        let counts = (0..100).map(|i| truth.eval(i as f64 + 0.5).round()).collect();
        Histogram::from_counts("smooth", 0.0, 100.0, counts).unwrap()
    }

    fn parabola_scan(values: &[f64]) -> ProfileScan {
        let points: Vec<ScanPoint> = values
            .iter()
            .map(|&x| ScanPoint { parameter_value: x, statistic_value: (x - 2.0).powi(2) })
            .collect();
        let minimum = points[values.iter().position(|&x| x == 2.0).unwrap()];
        ProfileScan {
            parameter: ScanParameter::Mean,
            statistic: Statistic::ChiSquare,
            best_fit_value: 2.0,
            points,
            minimum,
        }
    }

    #[test]
    fn test_grid_values() {
        let grid = ScanGrid::new(10.0, 2.0, 5).unwrap();
        assert_eq!(grid.values(), vec![8.0, 9.0, 10.0, 11.0, 12.0]);

        let grid = ScanGrid::new(0.3, 0.7, 7).unwrap();
        let v = grid.values();
        assert_eq!(v.len(), 7);
        assert_eq!(v[0], 0.3 - 0.7);
        assert_eq!(v[6], 0.3 + 0.7);
        assert!(v.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_grid_validation() {
        assert!(matches!(ScanGrid::new(0.0, 1.0, 0), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(ScanGrid::new(0.0, -1.0, 5), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(ScanGrid::new(f64::NAN, 1.0, 5), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_single_point_scan() {
        let h = smooth_histogram();
        let params = GaussianParameters::new(40.0, 50.0, 10.0);
        let grid = ScanGrid::new(49.0, 3.0, 1).unwrap();
        let s = scan(&h, &params, ScanParameter::Mean, &grid, Statistic::ChiSquare).unwrap();

        assert_eq!(s.points.len(), 1);
        assert_eq!(s.points[0].parameter_value, 49.0);
        assert_eq!(s.minimum, s.points[0]);
        assert_eq!(s.best_fit_value, 50.0);
    }

    #[test]
    fn test_scan_holds_other_parameters_fixed() {
        let h = smooth_histogram();
        let params = GaussianParameters::new(40.0, 50.0, 10.0);
        let grid = ScanGrid::new(10.0, 2.0, 9).unwrap();
        let s = scan(&h, &params, ScanParameter::Sigma, &grid, Statistic::NegLogLikelihood)
            .unwrap();
        for p in &s.points {
            let expected = Statistic::NegLogLikelihood
                .eval(&h, &GaussianParameters::new(40.0, 50.0, p.parameter_value));
            assert_eq!(p.statistic_value, expected);
        }
        assert_relative_eq!(s.minimum.parameter_value, 10.0, epsilon = 0.5);
    }

    #[test]
    fn test_interval_on_parabola() {
        let values: Vec<f64> = (0..=40).map(|i| -3.0 + 0.25 * i as f64).collect();
        let s = parabola_scan(&values);
        let (lo, hi) = s.interval(1.0).unwrap();
        assert_relative_eq!(lo, 1.0, epsilon = 1e-12);
        assert_relative_eq!(hi, 3.0, epsilon = 1e-12);
        let (lo, hi) = s.interval(4.0).unwrap();
        assert_relative_eq!(lo, 0.0, epsilon = 1e-12);
        assert_relative_eq!(hi, 4.0, epsilon = 1e-12);
        // Threshold above the grid edges: no crossing.
        assert!(s.interval(100.0).is_none());
    }

    #[test]
    fn test_interval_interpolates_between_points() {
        let s = parabola_scan(&[0.0, 2.0, 4.0]);
        // Chord from (2, 0) to (4, 4) reaches 1 at x = 2.5.
        let (lo, hi) = s.interval(1.0).unwrap();
        assert_relative_eq!(lo, 1.5);
        assert_relative_eq!(hi, 2.5);
    }

    #[test]
    fn test_nan_never_wins_minimum() {
        // sigma = 0 is outside the model.
        let h = Histogram::from_counts("h", 0.0, 3.0, vec![1.0, 4.0, 1.0]).unwrap();
        let params = GaussianParameters::new(4.0, 1.5, 1.0);
        let grid = ScanGrid::new(0.5, 0.5, 3).unwrap();
        let s = scan(&h, &params, ScanParameter::Sigma, &grid, Statistic::ChiSquare).unwrap();
        assert!(s.points[0].statistic_value.is_nan());
        assert!(!s.minimum.statistic_value.is_nan());

        let all_nan = ScanGrid::new(0.0, 0.0, 2).unwrap();
        let err = scan(&h, &params, ScanParameter::Sigma, &all_nan, Statistic::ChiSquare);
        assert!(matches!(err, Err(Error::Computation(_))));
    }

    #[test]
    fn test_sigma_scan_ignores_mirrored_widths() {
        let h = smooth_histogram();
        let params = GaussianParameters::new(40.0, 50.0, 10.0);
        let grid = ScanGrid::new(10.0, 20.0, 5).unwrap();
        let s = scan(&h, &params, ScanParameter::Sigma, &grid, Statistic::ChiSquare).unwrap();

        let xs: Vec<f64> = s.points.iter().map(|p| p.parameter_value).collect();
        assert_eq!(xs, vec![-10.0, 0.0, 10.0, 20.0, 30.0]);
        assert!(s.points[0].statistic_value.is_nan());
        assert!(s.points[1].statistic_value.is_nan());
        assert_eq!(s.minimum.parameter_value, 10.0);
        assert!(ScanParameter::Mean.admits(-10.0));
        assert!(!ScanParameter::Sigma.admits(0.0));
    }

    #[test]
    fn test_profile_contour_least_squares() {
        let h = smooth_histogram();
        let analysis = profile_contour(
            &GaussianFitter::new(),
            &h,
            FitMode::LeastSquares,
            DEFAULT_N_SIGMAS,
            DEFAULT_SCAN_POINTS,
        )
        .unwrap();

        assert_eq!(analysis.scan.points.len(), DEFAULT_SCAN_POINTS);
        assert_relative_eq!(
            analysis.statistic_at_best_fit,
            analysis.fit.chi2.unwrap(),
            max_relative = 1e-9
        );
        let step = 2.0 * DEFAULT_N_SIGMAS * analysis.fit.param_errors.mean_error
            / (DEFAULT_SCAN_POINTS - 1) as f64;
        assert!((analysis.scan.minimum.parameter_value - analysis.fit.params.mean).abs() <= step);
        assert!(analysis.scan.minimum.statistic_value >= analysis.statistic_at_best_fit - 1e-3);

        let (lo, hi) = analysis.scan.interval(1.0).unwrap();
        assert!(lo < analysis.fit.params.mean && analysis.fit.params.mean < hi);
    }

    #[test]
    fn test_profile_contour_requires_convergence() {
        let empty = Histogram::new("empty", 100, 0.0, 100.0).unwrap();
        let err = profile_contour(&GaussianFitter::new(), &empty, FitMode::Likelihood, 5.0, 10)
            .unwrap_err();
        assert!(matches!(err, Error::FitDidNotConverge(_)));
    }
}
