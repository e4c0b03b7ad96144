//! Core traits for ToyStat
//!
//! The toy engine only needs the ability to draw Gaussian samples; the concrete
//! generator lives in `ts-inference` so this crate stays free of RNG dependencies.

/// Source of Gaussian-distributed samples.
///
/// Each call draws one independent sample. Implementations own their stream state,
/// so concurrent trials must each hold their own sampler.
pub trait GaussianSampler {
    /// Draw one sample from `N(mean, sigma)`.
    fn sample_gaussian(&mut self, mean: f64, sigma: f64) -> f64;
}

impl<S: GaussianSampler + ?Sized> GaussianSampler for &mut S {
    fn sample_gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        (**self).sample_gaussian(mean, sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cycles through a fixed list of standard-normal deviates.
    struct FixedDeviates {
        z: Vec<f64>,
        i: usize,
    }

    impl GaussianSampler for FixedDeviates {
        fn sample_gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
            let z = self.z[self.i % self.z.len()];
            self.i += 1;
            mean + sigma * z
        }
    }

    #[test]
    fn test_sampler_through_mut_ref() {
        let mut s = FixedDeviates { z: vec![0.0, 1.0, -2.0], i: 0 };
        let r = &mut s;
        fn draw(mut s: impl GaussianSampler) -> f64 {
            s.sample_gaussian(50.0, 10.0)
        }
        assert_eq!(draw(&mut *r), 50.0);
        assert_eq!(draw(&mut *r), 60.0);
        assert_eq!(draw(&mut *r), 30.0);
    }
}
