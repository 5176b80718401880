//! The per-step maximum a posteriori correction of the smoother and the
//! solvers for it.
//!
//! Over `(x, eps)` the smoother minimizes
//!
//! `−log N(x; m_SE, C_SE) − log N(fx(x); m_ASE, C_ASE) − log N(eps; 0, C_pen)`
//!
//! starting from `(m_SE, 0)`.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason,
                   TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;

use nd::{Array, ArrayView, Axis, Ix1, Ix2};

use std::cell::RefCell;
use std::fmt;

use na_core::StateSpaceModel;

use crate::error::{Error, Result, check_shape};
use crate::stats::Gaussian;
use crate::utils::Cholesky;

pub struct MapProblem<'a, M>
  where M: ?Sized,
{
  model: &'a M,
  prior: Gaussian,
  anchor: Gaussian,
  penalty: &'a Gaussian,
}

impl<'a, M> MapProblem<'a, M>
  where M: StateSpaceModel + ?Sized,
{
  /// `prior` is the Gaussian fit of the candidate ensemble, `anchor` that of
  /// the already smoothed ensemble one step later.
  pub fn new(model: &'a M, prior: Gaussian, anchor: Gaussian,
             penalty: &'a Gaussian) -> Result<MapProblem<'a, M>> {
    check_shape("MAP prior", model.state_dim(), prior.dim())?;
    check_shape("MAP anchor", model.state_dim(), anchor.dim())?;

    Ok(MapProblem {
      model,
      prior,
      anchor,
      penalty,
    })
  }

  pub fn model(&self) -> &M { self.model }
  pub fn prior(&self) -> &Gaussian { &self.prior }
  pub fn anchor(&self) -> &Gaussian { &self.anchor }
  pub fn penalty(&self) -> &Gaussian { self.penalty }

  pub fn state_dim(&self) -> usize { self.prior.dim() }
  pub fn penalty_dim(&self) -> usize { self.penalty.dim() }
  /// Length of the `(x, eps)` optimization vector.
  pub fn dim(&self) -> usize { self.state_dim() + self.penalty_dim() }

  /// `(m_SE, 0)`
  pub fn initial_point(&self) -> Array<f64, Ix1> {
    let mut p = Array::zeros(self.dim());
    p.slice_mut(nd::s![..self.state_dim()])
      .assign(&self.prior.mean());
    p
  }

  pub fn split<'p>(&self, point: ArrayView<'p, f64, Ix1>)
    -> (ArrayView<'p, f64, Ix1>, ArrayView<'p, f64, Ix1>)
  {
    point.split_at(Axis(0), self.state_dim())
  }

  /// Negative log posterior at `point = (x, eps)`.
  pub fn cost(&self, point: ArrayView<f64, Ix1>) -> Result<f64> {
    check_shape("MAP point", self.dim(), point.len())?;
    let (x, eps) = self.split(point);

    let mut fx = Array::zeros(self.state_dim());
    self.model.transition(x, fx.view_mut())?;

    let l0 = self.prior.log_density_at(x)?;
    let l1 = self.anchor.log_density_at(fx.view())?;
    let l2 = self.penalty.log_density_at(eps)?;

    Ok(-l0 - l1 - l2)
  }

  fn solution(&self, point: Array<f64, Ix1>, iterations: u64,
              converged: bool, message: String) -> Result<MapSolution> {
    let cost = self.cost(point.view())?;
    let (x, eps) = self.split(point.view());
    Ok(MapSolution {
      state: x.to_owned(),
      penalty: eps.to_owned(),
      cost,
      iterations,
      converged,
      message,
    })
  }
}

#[derive(Clone, Debug)]
pub struct MapSolution {
  /// `x*`
  pub state: Array<f64, Ix1>,
  pub penalty: Array<f64, Ix1>,
  pub cost: f64,
  pub iterations: u64,
  pub converged: bool,
  pub message: String,
}

impl fmt::Display for MapSolution {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "MapSolution(cost={:.6}, iterations={}, converged={})",
           self.cost, self.iterations, self.converged)
  }
}

/// Solves one local MAP problem. A non-converged solution is still a
/// solution: the caller decides whether to accept it.
pub trait LocalMapSolver: Send + Sync {
  fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
    where M: StateSpaceModel + ?Sized;
}

impl<'a, S> LocalMapSolver for &'a S
  where S: LocalMapSolver + ?Sized,
{
  fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
    where M: StateSpaceModel + ?Sized,
  {
    (**self).solve(problem)
  }
}

/// Keeps the candidate ensemble as is, which reduces the smoother to the
/// plain ensemble RTS recursion.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnsembleMeanSolver;

impl LocalMapSolver for EnsembleMeanSolver {
  fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
    where M: StateSpaceModel + ?Sized,
  {
    problem.solution(problem.initial_point(), 0, true,
                     "ensemble mean".to_string())
  }
}

/// Exact minimizer for a linear transition `fx(x) = A x`:
///
/// `x* = (C_SE⁻¹ + Aᵗ C_ASE⁻¹ A)⁻¹ (C_SE⁻¹ m_SE + Aᵗ C_ASE⁻¹ m_ASE)`, `eps* = 0`.
///
/// `A` must be the model's transition; nothing checks that.
#[derive(Clone, Debug)]
pub struct ClosedFormSolver {
  transition: Array<f64, Ix2>,
}

impl ClosedFormSolver {
  pub fn new(transition: Array<f64, Ix2>) -> ClosedFormSolver {
    ClosedFormSolver { transition, }
  }
}

impl LocalMapSolver for ClosedFormSolver {
  fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
    where M: StateSpaceModel + ?Sized,
  {
    let n = problem.state_dim();
    let a = &self.transition;
    check_shape("closed form transition rows", n, a.nrows())?;
    check_shape("closed form transition columns", n, a.ncols())?;

    let prior = problem.prior().cholesky();
    let anchor = problem.anchor().cholesky();

    let anchor_a = anchor.solve_multi(a.view())?;
    let lhs = prior.inverse()? + a.t().dot(&anchor_a);
    let rhs = prior.solve(problem.prior().mean())? +
      a.t().dot(&anchor.solve(problem.anchor().mean())?);

    let x = Cholesky::factor(lhs.view(), "MAP normal equations")?
      .solve(rhs.view())?;

    let mut point = Array::zeros(problem.dim());
    point.slice_mut(nd::s![..n]).assign(&x);
    problem.solution(point, 0, true, "closed form".to_string())
  }
}

/// Configuration for `LbfgsbSolver`.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
  pub max_iter: u64,
  /// Gradient norm tolerance; the cost tolerance is derived from it.
  pub tol: f64,
  /// Number of corrections kept for the inverse Hessian approximation.
  pub m: usize,
}

impl Default for OptimizerConfig {
  fn default() -> OptimizerConfig {
    OptimizerConfig { max_iter: 1000, tol: 1e-6, m: 10 }
  }
}

/// L-BFGS with a More-Thuente line search. Optional box constraints are
/// applied by clamping and a projected gradient.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbSolver {
  config: OptimizerConfig,
  bounds: Option<Vec<(f64, f64)>>,
}

impl LbfgsbSolver {
  pub fn new(config: OptimizerConfig) -> LbfgsbSolver {
    LbfgsbSolver {
      config,
      bounds: None,
    }
  }

  /// One `(lower, upper)` pair per entry of the `(x, eps)` vector.
  pub fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> LbfgsbSolver {
    self.bounds = Some(bounds);
    self
  }

  pub fn config(&self) -> &OptimizerConfig { &self.config }
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
  params.iter()
    .zip(bounds.iter())
    .map(|(&v, &(lo, hi))| v.max(lo).min(hi))
    .collect()
}

struct Best {
  cost: f64,
  params: Vec<f64>,
  gradients: u64,
}

struct ArgminProblem<'p, 'a, M>
  where M: ?Sized,
{
  problem: &'p MapProblem<'a, M>,
  bounds: &'p [(f64, f64)],
  /// Lowest cost seen, kept outside the executor.
  best: &'p RefCell<Best>,
}

impl<'p, 'a, M> ArgminProblem<'p, 'a, M>
  where M: StateSpaceModel + ?Sized,
{
  fn eval(&self, params: &[f64]) -> Result<f64> {
    self.problem.cost(ArrayView::from(params))
  }

  /// Central differences.
  fn numerical_gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
    let h0 = ::std::f64::EPSILON.cbrt();
    let mut grad = vec![0.0; params.len()];
    let mut probe = params.to_vec();

    for i in 0..params.len() {
      let h = h0 * params[i].abs().max(1.0);

      probe[i] = params[i] + h;
      let f_plus = self.eval(&probe)?;
      probe[i] = params[i] - h;
      let f_minus = self.eval(&probe)?;
      probe[i] = params[i];

      grad[i] = (f_plus - f_minus) / (2.0 * h);
    }

    Ok(grad)
  }

  fn projected_gradient(&self, clamped: &[f64]) -> Result<Vec<f64>> {
    const EPS: f64 = 1e-12;

    let mut g = self.numerical_gradient(clamped)?;
    for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds.iter()).enumerate() {
      if x <= lo + EPS && g[i] > 0.0 {
        g[i] = 0.0;
      }
      if x >= hi - EPS && g[i] < 0.0 {
        g[i] = 0.0;
      }
    }
    Ok(g)
  }
}

impl<'p, 'a, M> CostFunction for ArgminProblem<'p, 'a, M>
  where M: StateSpaceModel + ?Sized,
{
  type Param = Vec<f64>;
  type Output = f64;

  fn cost(&self, params: &Self::Param) -> ::std::result::Result<f64, argmin::core::Error> {
    let clamped = clamp_params(params, self.bounds);
    let cost = self.eval(&clamped)
      .map_err(|e| argmin::core::Error::msg(e.to_string()))?;

    let mut best = self.best.borrow_mut();
    if cost < best.cost {
      best.cost = cost;
      best.params = clamped;
    }

    Ok(cost)
  }
}

impl<'p, 'a, M> Gradient for ArgminProblem<'p, 'a, M>
  where M: StateSpaceModel + ?Sized,
{
  type Param = Vec<f64>;
  type Gradient = Vec<f64>;

  fn gradient(&self, params: &Self::Param)
    -> ::std::result::Result<Vec<f64>, argmin::core::Error>
  {
    self.best.borrow_mut().gradients += 1;
    let clamped = clamp_params(params, self.bounds);
    self.projected_gradient(&clamped)
      .map_err(|e| argmin::core::Error::msg(e.to_string()))
  }
}

impl LocalMapSolver for LbfgsbSolver {
  fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
    where M: StateSpaceModel + ?Sized,
  {
    let dim = problem.dim();
    let unbounded;
    let bounds: &[(f64, f64)] = match self.bounds {
      Some(ref b) => {
        check_shape("optimizer bounds", dim, b.len())?;
        b
      },
      None => {
        unbounded = vec![(::std::f64::NEG_INFINITY, ::std::f64::INFINITY); dim];
        &unbounded
      },
    };

    let init = clamp_params(&problem.initial_point().to_vec(), bounds);
    let best = RefCell::new(Best {
      cost: ::std::f64::INFINITY,
      params: init.clone(),
      gradients: 0,
    });
    let objective = ArgminProblem {
      problem,
      bounds,
      best: &best,
    };

    // The line search cannot start from a stationary point.
    let g0 = objective.projected_gradient(&init)?;
    let g0_norm = g0.iter().map(|v| v * v).sum::<f64>().sqrt();
    if g0_norm <= self.config.tol {
      return problem.solution(Array::from(init), 0, true,
                              "initial point is stationary".to_string());
    }

    let tol_cost = if self.config.tol == 0.0 {
      0.0
    } else {
      (0.1 * self.config.tol).max(1e-12)
    };
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, self.config.m)
      .with_tolerance_grad(self.config.tol)
      .map_err(|e| Error::Optimizer(format!("invalid gradient tolerance: {}", e)))?
      .with_tolerance_cost(tol_cost)
      .map_err(|e| Error::Optimizer(format!("invalid cost tolerance: {}", e)))?;

    let max_iter = self.config.max_iter;
    let result = Executor::new(objective, solver)
      .configure(|state| state.param(init).max_iters(max_iter))
      .run();

    match result {
      Ok(res) => {
        let state = res.state();
        let best = state
          .get_best_param()
          .ok_or_else(|| Error::Optimizer("no best parameters found".to_string()))?;
        let best = clamp_params(best, bounds);

        let termination = state.get_termination_status();
        let converged = match *termination {
          TerminationStatus::Terminated(TerminationReason::SolverConverged) |
          TerminationStatus::Terminated(TerminationReason::TargetCostReached) => true,
          _ => false,
        };

        problem.solution(Array::from(best), state.get_iter(), converged,
                         termination.to_string())
      },
      Err(e) => {
        // usually a failed line search close to the optimum
        let best = best.borrow();
        problem.solution(Array::from(best.params.clone()), best.gradients,
                         false, e.to_string())
      },
    }
  }
}
