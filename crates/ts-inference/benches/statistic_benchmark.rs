//! Benchmarks for statistic evaluation and a single Gaussian fit.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ts_core::{FitMode, GaussianParameters};
use ts_hist::Histogram;
use ts_inference::toys::fill_gaussian;
use ts_inference::{chi_square, neg_log_likelihood, Fitter, GaussianFitter, SeededGaussianSampler};

fn sampled_histogram() -> Histogram {
    let mut h = Histogram::new("bench", 100, 0.0, 100.0).unwrap();
    let mut sampler = SeededGaussianSampler::from_seed(42);
    fill_gaussian(&mut h, &mut sampler, 50.0, 10.0, 1000);
    h
}

fn bench_statistics(c: &mut Criterion) {
    let h = sampled_histogram();
    let params = GaussianParameters::new(40.0, 50.0, 10.0);

    c.bench_function("chi_square_100_bins", |b| {
        b.iter(|| chi_square(black_box(&h), black_box(&params)))
    });
    c.bench_function("neg_log_likelihood_100_bins", |b| {
        b.iter(|| neg_log_likelihood(black_box(&h), black_box(&params)))
    });
}

fn bench_fit(c: &mut Criterion) {
    let h = sampled_histogram();
    let fitter = GaussianFitter::new();
    let mut group = c.benchmark_group("gaussian_fit");
    for mode in [FitMode::LeastSquares, FitMode::Likelihood] {
        group.bench_function(mode.as_str(), |b| {
            b.iter(|| fitter.fit(black_box(&h), mode, true).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_statistics, bench_fit);
criterion_main!(benches);
