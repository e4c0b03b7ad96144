//! Gaussian sample generation for pseudo-experiments.
//!
//! Randomness is deterministic per trial: trial `j` of a run with base seed `s`
//! draws from its own stream seeded with `s + j` (wrapping), independent of threading.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use ts_core::GaussianSampler;
use ts_hist::Histogram;

/// Gaussian sampler over a seeded `StdRng` stream.
#[derive(Debug, Clone)]
pub struct SeededGaussianSampler {
    rng: StdRng,
}

impl SeededGaussianSampler {
    /// Deterministic stream for `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    /// Stream seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }
}

impl GaussianSampler for SeededGaussianSampler {
    fn sample_gaussian(&mut self, mean: f64, sigma: f64) -> f64 {
        let z: f64 = StandardNormal.sample(&mut self.rng);
        mean + sigma * z
    }
}

/// How the base seed of a run is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedPolicy {
    /// Reproducible run from this base seed.
    Fixed(u64),
    /// Base seed drawn from system entropy.
    Entropy,
}

impl SeedPolicy {
    /// Map a user-facing seed to a policy; `0` means entropy.
    pub fn from_seed(seed: u64) -> Self {
        if seed == 0 {
            SeedPolicy::Entropy
        } else {
            SeedPolicy::Fixed(seed)
        }
    }

    /// Concrete base seed. Entropy-derived seeds are never 0, so a resolved seed
    /// always replays through [`SeedPolicy::from_seed`].
    pub fn resolve(&self) -> u64 {
        match *self {
            SeedPolicy::Fixed(seed) => seed,
            SeedPolicy::Entropy => rand::random::<u64>().max(1),
        }
    }
}

/// Stream seed of trial `trial` in a run with base seed `base`.
#[inline]
pub fn trial_seed(base: u64, trial: usize) -> u64 {
    base.wrapping_add(trial as u64)
}

/// Reset `histogram` and fill it with `n` samples of a Gaussian(`mean`, `sigma`).
pub fn fill_gaussian<S: GaussianSampler>(
    histogram: &mut Histogram,
    sampler: &mut S,
    mean: f64,
    sigma: f64,
    n: usize,
) {
    histogram.reset();
    for _ in 0..n {
        histogram.fill(sampler.sample_gaussian(mean, sigma));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_reproducible() {
        let mut a = SeededGaussianSampler::from_seed(42);
        let mut b = SeededGaussianSampler::from_seed(42);
        for _ in 0..10 {
            assert_eq!(a.sample_gaussian(50.0, 10.0), b.sample_gaussian(50.0, 10.0));
        }
        let mut c = SeededGaussianSampler::from_seed(43);
        assert_ne!(
            SeededGaussianSampler::from_seed(42).sample_gaussian(0.0, 1.0),
            c.sample_gaussian(0.0, 1.0)
        );
        assert!(SeededGaussianSampler::from_entropy().sample_gaussian(0.0, 1.0).is_finite());
    }

    #[test]
    fn test_sampler_moments() {
        let mut s = SeededGaussianSampler::from_seed(7);
        let n = 20_000;
        let xs: Vec<f64> = (0..n).map(|_| s.sample_gaussian(50.0, 10.0)).collect();
        let mean = xs.iter().sum::<f64>() / n as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 50.0).abs() < 0.5, "mean = {mean}");
        assert!((var.sqrt() - 10.0).abs() < 0.5, "std = {}", var.sqrt());
    }

    #[test]
    fn test_seed_policy() {
        assert_eq!(SeedPolicy::from_seed(0), SeedPolicy::Entropy);
        assert_eq!(SeedPolicy::from_seed(9), SeedPolicy::Fixed(9));
        assert_eq!(SeedPolicy::Fixed(9).resolve(), 9);
        assert_ne!(SeedPolicy::Entropy.resolve(), 0);
        assert_eq!(trial_seed(u64::MAX, 1), 0);
        assert_eq!(trial_seed(10, 5), 15);
    }

    #[test]
    fn test_fill_gaussian_resets_first() {
        let mut h = Histogram::new("h", 100, 0.0, 100.0).unwrap();
        let mut s = SeededGaussianSampler::from_seed(1);
        fill_gaussian(&mut h, &mut s, 50.0, 10.0, 500);
        assert_eq!(h.entries(), 500);
        fill_gaussian(&mut h, &mut s, 50.0, 10.0, 200);
        assert_eq!(h.entries(), 200);
        let total = h.integral() + h.underflow() + h.overflow();
        assert_eq!(total, 200.0);
    }
}
