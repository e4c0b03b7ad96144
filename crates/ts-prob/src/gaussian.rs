//! Gaussian bin shape `A * exp(-0.5 * ((x - mu) / sigma)^2)` and its derivatives.

use ts_core::GaussianParameters;

/// Shape value and partial derivatives w.r.t. `[amplitude, mean, sigma]` at `x`.
///
/// With `z = (x - mu) / sigma` and `f = A exp(-z^2 / 2)`:
/// `df/dA = f / A`, `df/dmu = f z / sigma`, `df/dsigma = f z^2 / sigma`.
#[inline]
pub fn shape_with_gradient(x: f64, p: &GaussianParameters) -> (f64, [f64; 3]) {
    let z = (x - p.mean) / p.sigma;
    let g = (-0.5 * z * z).exp();
    let f = p.amplitude * g;
    (f, [g, f * z / p.sigma, f * z * z / p.sigma])
}
