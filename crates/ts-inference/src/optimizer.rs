//! Bounded L-BFGS minimization of the binned Gaussian statistic.
//!
//! argmin drives the iterations over a plain `[amplitude, mean, sigma]` vector.
//! Every trial point is projected onto [`ParameterBounds`] before the statistic is
//! evaluated, and gradient components that push further out of an active bound
//! are dropped.

use crate::statistic::Statistic;
use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use ts_core::{Error, GaussianParameters, Result, N_GAUSSIAN_PARAMS};
use ts_hist::Histogram;

/// `(lower, upper)` per parameter, ordered `[amplitude, mean, sigma]`.
pub type ParameterBounds = [(f64, f64); N_GAUSSIAN_PARAMS];

/// Configuration for the L-BFGS minimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Maximum number of iterations
    pub max_iter: u64,
    /// Convergence tolerance for gradient norm
    pub tol: f64,
    /// Number of corrections to approximate inverse Hessian
    pub m: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

/// Statistic of one histogram as a function of the Gaussian parameters.
#[derive(Debug, Clone, Copy)]
pub struct GaussianObjective<'a> {
    histogram: &'a Histogram,
    statistic: Statistic,
}

impl<'a> GaussianObjective<'a> {
    /// Objective minimized when fitting `histogram` with `statistic`.
    pub fn new(histogram: &'a Histogram, statistic: Statistic) -> Self {
        Self { histogram, statistic }
    }

    /// Statistic being minimized.
    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// Statistic at `params`.
    pub fn value(&self, params: &GaussianParameters) -> f64 {
        self.statistic.eval(self.histogram, params)
    }

    /// Analytic gradient at `params`.
    pub fn gradient(&self, params: &GaussianParameters) -> [f64; N_GAUSSIAN_PARAMS] {
        self.statistic.eval_with_gradient(self.histogram, params).1
    }
}

/// Best point found by [`GaussianMinimizer::minimize`].
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best parameters, inside the bounds.
    pub params: GaussianParameters,
    /// Statistic at `params`.
    pub fval: f64,
    /// Number of L-BFGS iterations.
    pub n_iter: u64,
    /// Number of statistic evaluations.
    pub n_fev: usize,
    /// Number of gradient evaluations.
    pub n_gev: usize,
    /// Whether argmin reported convergence.
    pub converged: bool,
    /// argmin termination status.
    pub message: String,
}

impl Minimum {
    /// Name and value of the first of amplitude or sigma sitting on its lower bound.
    pub fn pinned_at_lower_bound(&self, bounds: &ParameterBounds) -> Option<(&'static str, f64)> {
        [("amplitude", self.params.amplitude, bounds[0].0), ("sigma", self.params.sigma, bounds[2].0)]
            .into_iter()
            .find(|&(_, value, lower)| value <= lower * (1.0 + 1e-9))
            .map(|(name, value, _)| (name, value))
    }
}

fn project(x: &[f64], bounds: &ParameterBounds) -> Result<GaussianParameters> {
    let p = GaussianParameters::from_slice(x)?;
    let [(a_lo, a_hi), (m_lo, m_hi), (s_lo, s_hi)] = *bounds;
    Ok(GaussianParameters::new(
        p.amplitude.clamp(a_lo, a_hi),
        p.mean.clamp(m_lo, m_hi),
        p.sigma.clamp(s_lo, s_hi),
    ))
}

/// argmin view of a [`GaussianObjective`] restricted to a box.
struct BoundedProblem<'a> {
    objective: GaussianObjective<'a>,
    bounds: &'a ParameterBounds,
    n_fev: &'a AtomicUsize,
    n_gev: &'a AtomicUsize,
}

impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.n_fev.fetch_add(1, Ordering::Relaxed);
        let p = project(x, self.bounds).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        Ok(self.objective.value(&p))
    }
}

impl Gradient for BoundedProblem<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, x: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.n_gev.fetch_add(1, Ordering::Relaxed);
        let p = project(x, self.bounds).map_err(|e| argmin::core::Error::msg(e.to_string()))?;
        let mut g = self.objective.gradient(&p);

        const EPS: f64 = 1e-12;
        for ((gi, x), &(lo, hi)) in g.iter_mut().zip(p.to_array()).zip(self.bounds.iter()) {
            if (x <= lo + EPS && *gi > 0.0) || (x >= hi - EPS && *gi < 0.0) {
                *gi = 0.0;
            }
        }
        Ok(g.to_vec())
    }
}

/// L-BFGS with a More-Thuente line search over box-bounded Gaussian parameters.
#[derive(Debug, Clone, Default)]
pub struct GaussianMinimizer {
    config: OptimizerConfig,
}

impl GaussianMinimizer {
    /// Create a minimizer with the given configuration
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize `objective` from `start`, keeping every parameter inside `bounds`.
    ///
    /// A start outside the box is projected onto it first. Line-search failures
    /// surface as [`Error::Computation`].
    pub fn minimize(
        &self,
        objective: GaussianObjective<'_>,
        start: &GaussianParameters,
        bounds: &ParameterBounds,
    ) -> Result<Minimum> {
        let n_fev = AtomicUsize::new(0);
        let n_gev = AtomicUsize::new(0);
        let problem = BoundedProblem { objective, bounds, n_fev: &n_fev, n_gev: &n_gev };
        let init = project(&start.to_array(), bounds)?.to_array().to_vec();

        // argmin's default cost tolerance (~EPS) is far below the resolution of a
        // chi-square over a few hundred counts; tie it to the gradient tolerance instead.
        let tol_cost =
            if self.config.tol == 0.0 { 0.0 } else { (0.1 * self.config.tol).max(1e-12) };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.m)
            .with_tolerance_grad(self.config.tol)
            .map_err(|e| Error::Validation(format!("invalid gradient tolerance: {e}")))?
            .with_tolerance_cost(tol_cost)
            .map_err(|e| Error::Validation(format!("invalid cost tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| {
                Error::Computation(format!("{} minimization failed: {e}", objective.statistic()))
            })?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| Error::Computation("minimizer returned no parameters".to_string()))?;
        let termination = state.get_termination_status();
        let converged = matches!(
            termination,
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(Minimum {
            params: project(best, bounds)?,
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: n_fev.load(Ordering::Relaxed),
            n_gev: n_gev.load(Ordering::Relaxed),
            converged,
            message: termination.to_string(),
        })
    }
}
