//! Closed-form goodness-of-fit statistics over binned data.
//!
//! Both statistics are on the chi-square scale so they can be compared directly:
//!
//! - [`chi_square`]: Neyman chi-square with `sqrt(count)` bin errors. Bins with a zero
//!   count have zero error and are left out entirely.
//! - [`neg_log_likelihood`]: `-2 ln L` of independent Poisson bins, without the
//!   parameter-independent `ln(n!)` term. Bins whose expectation is `<= 0` are skipped.
//!
//! Sums run in bin order, so identical inputs give bit-identical outputs.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_core::{FitMode, GaussianParameters, N_GAUSSIAN_PARAMS};
use ts_hist::Histogram;
use ts_prob::gaussian::shape_with_gradient;

/// Statistic evaluated for a histogram against fixed model parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    /// See [`chi_square`].
    ChiSquare,
    /// See [`neg_log_likelihood`].
    NegLogLikelihood,
}

impl Statistic {
    /// Statistic minimized by a fit in `mode`.
    pub fn for_mode(mode: FitMode) -> Self {
        match mode {
            FitMode::LeastSquares => Statistic::ChiSquare,
            FitMode::Likelihood => Statistic::NegLogLikelihood,
        }
    }

    /// Evaluate for `histogram` at `params`.
    pub fn eval(&self, histogram: &Histogram, params: &GaussianParameters) -> f64 {
        match self {
            Statistic::ChiSquare => chi_square(histogram, params),
            Statistic::NegLogLikelihood => neg_log_likelihood(histogram, params),
        }
    }

    /// Value and gradient w.r.t. `[amplitude, mean, sigma]`.
    pub fn eval_with_gradient(
        &self,
        histogram: &Histogram,
        params: &GaussianParameters,
    ) -> (f64, [f64; N_GAUSSIAN_PARAMS]) {
        match self {
            Statistic::ChiSquare => chi_square_with_gradient(histogram, params),
            Statistic::NegLogLikelihood => neg_log_likelihood_with_gradient(histogram, params),
        }
    }

    /// Stable lowercase name (matches the serde representation).
    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::ChiSquare => "chi_square",
            Statistic::NegLogLikelihood => "neg_log_likelihood",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chi-square of `histogram` against the Gaussian at `params`.
///
/// Sums `((count_i - expected_i) / error_i)^2` over bins with `error_i > 0`.
/// An all-empty histogram yields 0.
pub fn chi_square(histogram: &Histogram, params: &GaussianParameters) -> f64 {
    let mut chi2 = 0.0;
    for i in 0..histogram.n_bins() {
        let err = histogram.bin_error(i);
        if err > 0.0 {
            let expected = params.eval(histogram.bin_center(i));
            let pull = (histogram.bin_content(i) - expected) / err;
            chi2 += pull * pull;
        }
    }
    chi2
}

/// `-2 ln L` of `histogram` for Poisson bins with Gaussian expectations at `params`.
///
/// Per bin with expectation `nu > 0`: `2 * (nu - n ln nu)` when `n > 0`, `2 * nu`
/// when `n == 0`. Returns 0 when no bin has a positive expectation.
pub fn neg_log_likelihood(histogram: &Histogram, params: &GaussianParameters) -> f64 {
    let mut nll = 0.0;
    for i in 0..histogram.n_bins() {
        let nu = params.eval(histogram.bin_center(i));
        if nu <= 0.0 {
            continue;
        }
        let n = histogram.bin_content(i);
        if n > 0.0 {
            nll += 2.0 * (nu - n * nu.ln());
        } else {
            nll += 2.0 * nu;
        }
    }
    nll
}

/// Number of bins that enter [`chi_square`] (non-zero error).
pub fn chi_square_bins(histogram: &Histogram) -> usize {
    (0..histogram.n_bins()).filter(|&i| histogram.bin_error(i) > 0.0).count()
}

fn chi_square_with_gradient(
    histogram: &Histogram,
    params: &GaussianParameters,
) -> (f64, [f64; N_GAUSSIAN_PARAMS]) {
    let mut chi2 = 0.0;
    let mut grad = [0.0; N_GAUSSIAN_PARAMS];
    for i in 0..histogram.n_bins() {
        let err = histogram.bin_error(i);
        if err <= 0.0 {
            continue;
        }
        let (expected, d_expected) = shape_with_gradient(histogram.bin_center(i), params);
        let resid = histogram.bin_content(i) - expected;
        chi2 += (resid / err) * (resid / err);
        let w = -2.0 * resid / (err * err);
        for k in 0..N_GAUSSIAN_PARAMS {
            grad[k] += w * d_expected[k];
        }
    }
    (chi2, grad)
}

fn neg_log_likelihood_with_gradient(
    histogram: &Histogram,
    params: &GaussianParameters,
) -> (f64, [f64; N_GAUSSIAN_PARAMS]) {
    let mut nll = 0.0;
    let mut grad = [0.0; N_GAUSSIAN_PARAMS];
    for i in 0..histogram.n_bins() {
        let (nu, d_nu) = shape_with_gradient(histogram.bin_center(i), params);
        if nu <= 0.0 {
            continue;
        }
        let n = histogram.bin_content(i);
        let w = if n > 0.0 {
            nll += 2.0 * (nu - n * nu.ln());
            2.0 * (1.0 - n / nu)
        } else {
            nll += 2.0 * nu;
            2.0
        };
        for k in 0..N_GAUSSIAN_PARAMS {
            grad[k] += w * d_nu[k];
        }
    }
    (nll, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn three_bin_histogram() -> Histogram {
        // Bin centers 0.5, 1.5, 2.5 with counts 4, 9, 0.
        Histogram::from_counts("h", 0.0, 3.0, vec![4.0, 9.0, 0.0]).unwrap()
    }

    #[test]
    fn test_chi_square_by_hand() {
        let h = three_bin_histogram();
        let p = GaussianParameters::new(8.0, 1.5, 1.0);
        let e0 = p.eval(0.5);
        let e1 = p.eval(1.5);
        // Third bin is empty and must not contribute.
        let expected = ((4.0 - e0) / 2.0).powi(2) + ((9.0 - e1) / 3.0).powi(2);
        assert_relative_eq!(chi_square(&h, &p), expected, epsilon = 1e-12);
        assert_eq!(chi_square_bins(&h), 2);
    }

    #[test]
    fn test_neg_log_likelihood_by_hand() {
        let h = three_bin_histogram();
        let p = GaussianParameters::new(8.0, 1.5, 1.0);
        let (e0, e1, e2) = (p.eval(0.5), p.eval(1.5), p.eval(2.5));
        let expected = 2.0 * (e0 - 4.0 * e0.ln()) + 2.0 * (e1 - 9.0 * e1.ln()) + 2.0 * e2;
        assert_relative_eq!(neg_log_likelihood(&h, &p), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_histogram_chi_square_is_zero() {
        let h = Histogram::new("empty", 100, 0.0, 100.0).unwrap();
        let p = GaussianParameters::new(40.0, 50.0, 10.0);
        assert_eq!(chi_square(&h, &p), 0.0);
    }

    #[test]
    fn test_nll_zero_when_no_positive_expectation() {
        let h = three_bin_histogram();
        assert_eq!(neg_log_likelihood(&h, &GaussianParameters::new(0.0, 1.5, 1.0)), 0.0);
        assert_eq!(neg_log_likelihood(&h, &GaussianParameters::new(-5.0, 1.5, 1.0)), 0.0);
    }

    #[test]
    fn test_nll_skips_underflowed_expectation() {
        // Peak far away: expectations underflow to exactly zero in every bin.
        let h = three_bin_histogram();
        let p = GaussianParameters::new(10.0, 1.0e6, 1.0);
        assert_eq!(neg_log_likelihood(&h, &p), 0.0);
    }

    #[test]
    fn test_statistic_dispatch() {
        let h = three_bin_histogram();
        let p = GaussianParameters::new(8.0, 1.5, 1.0);
        assert_eq!(Statistic::for_mode(FitMode::LeastSquares), Statistic::ChiSquare);
        assert_eq!(Statistic::ChiSquare.eval(&h, &p), chi_square(&h, &p));
        assert_eq!(Statistic::NegLogLikelihood.eval(&h, &p), neg_log_likelihood(&h, &p));
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let h = Histogram::from_counts("h", 0.0, 6.0, vec![1.0, 5.0, 12.0, 10.0, 3.0, 0.0]).unwrap();
        let p = GaussianParameters::new(11.0, 2.7, 1.3);
        for stat in [Statistic::ChiSquare, Statistic::NegLogLikelihood] {
            let (value, grad) = stat.eval_with_gradient(&h, &p);
            assert_relative_eq!(value, stat.eval(&h, &p), epsilon = 1e-12);
            for k in 0..N_GAUSSIAN_PARAMS {
                let step = 1e-6;
                let mut up = p.to_array();
                let mut dn = p.to_array();
                up[k] += step;
                dn[k] -= step;
                let fd = (stat.eval(&h, &GaussianParameters::from_slice(&up).unwrap())
                    - stat.eval(&h, &GaussianParameters::from_slice(&dn).unwrap()))
                    / (2.0 * step);
                assert_relative_eq!(grad[k], fd, epsilon = 1e-4, max_relative = 1e-5);
            }
        }
    }

    proptest! {
        #[test]
        fn statistics_are_deterministic_and_chi2_non_negative(
            counts in proptest::collection::vec(0u32..50, 1..40),
            amplitude in 0.1f64..100.0,
            mean in -10.0f64..60.0,
            sigma in 0.5f64..30.0,
        ) {
            let counts: Vec<f64> = counts.into_iter().map(f64::from).collect();
            let h = Histogram::from_counts("p", 0.0, 50.0, counts).unwrap();
            let p = GaussianParameters::new(amplitude, mean, sigma);

            let c1 = chi_square(&h, &p);
            let c2 = chi_square(&h, &p);
            prop_assert_eq!(c1.to_bits(), c2.to_bits());
            prop_assert!(c1 >= 0.0);

            let n1 = neg_log_likelihood(&h, &p);
            let n2 = neg_log_likelihood(&h, &p);
            prop_assert_eq!(n1.to_bits(), n2.to_bits());
        }
    }
}
