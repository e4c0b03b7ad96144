//! Chi-square goodness-of-fit probability.

use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Upper-tail probability `P(X >= chi2)` for `X ~ chi2(ndf)`.
///
/// Returns 0 for `ndf == 0` or a negative / non-finite `chi2`, matching the usual
/// convention that an undetermined fit has no goodness-of-fit probability.
pub fn prob(chi2: f64, ndf: usize) -> f64 {
    if ndf == 0 || !chi2.is_finite() || chi2 < 0.0 {
        return 0.0;
    }
    match ChiSquared::new(ndf as f64) {
        Ok(dist) => dist.sf(chi2).clamp(0.0, 1.0),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        // chi2(2) survival is exp(-x/2).
        assert_relative_eq!(prob(2.0, 2), (-1.0f64).exp(), epsilon = 1e-12);
        assert_relative_eq!(prob(0.0, 5), 1.0, epsilon = 1e-12);
        // 95% quantile of chi2(1) is 3.841.
        assert_relative_eq!(prob(3.841_458_820_694_124, 1), 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(prob(10.0, 0), 0.0);
        assert_eq!(prob(f64::NAN, 3), 0.0);
        assert_eq!(prob(-1.0, 3), 0.0);
    }

    proptest! {
        #[test]
        fn prob_in_unit_interval_and_decreasing(chi2 in 0.0f64..500.0, ndf in 1usize..200) {
            let p = prob(chi2, ndf);
            prop_assert!((0.0..=1.0).contains(&p));
            prop_assert!(prob(chi2 + 1.0, ndf) <= p + 1e-12);
        }
    }
}
