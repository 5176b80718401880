//! Model and operator traits shared by the filtering crates.

extern crate ndarray as nd;
extern crate thiserror;

use nd::prelude::*;
use nd::linalg::general_mat_vec_mul;
use nd::Data;

use std::sync::atomic::{AtomicU64, Ordering};

pub use error::{Result, Error, check_dim};

pub mod error;

/// A map from `operator_input_dim()`-space into `operator_output_dim()`-space.
/// Results are written into a caller owned buffer.
pub trait Operator: Send + Sync {
  fn operator_input_dim(&self) -> usize;
  fn operator_output_dim(&self) -> usize;
  fn eval_at(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()>;
}

/// Dense matrices are linear operators.
impl<D> Operator for ArrayBase<D, Ix2>
  where D: Data<Elem = f64> + Send + Sync,
{
  fn operator_input_dim(&self) -> usize { self.ncols() }
  fn operator_output_dim(&self) -> usize { self.nrows() }
  fn eval_at(&self, x: ArrayView<f64, Ix1>,
             mut out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    check_dim("operator input", self.ncols(), x.len())?;
    check_dim("operator output", self.nrows(), out.len())?;

    general_mat_vec_mul(1.0, self, &x, 0.0, &mut out);

    Ok(())
  }
}

/// Wraps a closure as an `Operator`. The closure must fill all of `out`.
#[derive(Clone)]
pub struct FnOperator<F> {
  input_dim: usize,
  output_dim: usize,
  f: F,
}
impl<F> FnOperator<F>
  where F: for<'r, 's> Fn(ArrayView<'r, f64, Ix1>, ArrayViewMut<'s, f64, Ix1>) + Send + Sync,
{
  pub fn new(input_dim: usize, output_dim: usize, f: F) -> FnOperator<F> {
    FnOperator {
      input_dim,
      output_dim,
      f,
    }
  }
}
impl<F> Operator for FnOperator<F>
  where F: for<'r, 's> Fn(ArrayView<'r, f64, Ix1>, ArrayViewMut<'s, f64, Ix1>) + Send + Sync,
{
  fn operator_input_dim(&self) -> usize { self.input_dim }
  fn operator_output_dim(&self) -> usize { self.output_dim }
  fn eval_at(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    check_dim("operator input", self.input_dim, x.len())?;
    check_dim("operator output", self.output_dim, out.len())?;
    (self.f)(x, out);
    Ok(())
  }
}

/// A discrete-time state space model. Both maps are deterministic; callers
/// are responsible for perturbing the inputs/outputs with noise.
pub trait StateSpaceModel: Send + Sync {
  fn state_dim(&self) -> usize;
  fn observation_dim(&self) -> usize;

  /// `fx`
  fn transition(&self, x: ArrayView<f64, Ix1>,
                out: ArrayViewMut<f64, Ix1>) -> Result<()>;
  /// `hx`
  fn observe(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()>;
}

impl<'a, M> StateSpaceModel for &'a M
  where M: StateSpaceModel + ?Sized,
{
  fn state_dim(&self) -> usize { (**self).state_dim() }
  fn observation_dim(&self) -> usize { (**self).observation_dim() }
  fn transition(&self, x: ArrayView<f64, Ix1>,
                out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    (**self).transition(x, out)
  }
  fn observe(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    (**self).observe(x, out)
  }
}

/// A model made of a transition operator and an observation operator.
#[derive(Clone, Debug)]
pub struct OperatorModel<F, H> {
  pub transition: F,
  pub observation: H,
}
impl<F, H> OperatorModel<F, H>
  where F: Operator,
        H: Operator,
{
  pub fn new(transition: F, observation: H) -> Result<OperatorModel<F, H>> {
    let n = transition.operator_input_dim();
    check_dim("transition output", n, transition.operator_output_dim())?;
    check_dim("observation input", n, observation.operator_input_dim())?;

    Ok(OperatorModel {
      transition,
      observation,
    })
  }
}
impl<F, H> StateSpaceModel for OperatorModel<F, H>
  where F: Operator,
        H: Operator,
{
  fn state_dim(&self) -> usize { self.transition.operator_input_dim() }
  fn observation_dim(&self) -> usize { self.observation.operator_output_dim() }
  fn transition(&self, x: ArrayView<f64, Ix1>,
                out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    self.transition.eval_at(x, out)
  }
  fn observe(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    self.observation.eval_at(x, out)
  }
}

pub type LinearModel = OperatorModel<Array<f64, Ix2>, Array<f64, Ix2>>;
pub type FnModel<F1, F2> = OperatorModel<FnOperator<F1>, FnOperator<F2>>;

/// `fx(x) = A x`, `hx(x) = H x`.
pub fn linear_model(a: Array<f64, Ix2>, h: Array<f64, Ix2>) -> Result<LinearModel> {
  OperatorModel::new(a, h)
}

pub fn fn_model<F1, F2>(dim_x: usize, dim_z: usize,
                        fx: F1, hx: F2) -> FnModel<F1, F2>
  where F1: for<'r, 's> Fn(ArrayView<'r, f64, Ix1>, ArrayViewMut<'s, f64, Ix1>) + Send + Sync,
        F2: for<'r, 's> Fn(ArrayView<'r, f64, Ix1>, ArrayViewMut<'s, f64, Ix1>) + Send + Sync,
{
  OperatorModel {
    transition: FnOperator::new(dim_x, dim_x, fx),
    observation: FnOperator::new(dim_x, dim_z, hx),
  }
}

/// Counts model evaluations. Safe to share across the worker threads of a
/// single step.
#[derive(Debug)]
pub struct ModelStats<M> {
  pub model: M,
  calls: AtomicU64,
}
impl<M> From<M> for ModelStats<M> {
  fn from(v: M) -> ModelStats<M> {
    ModelStats {
      model: v,
      calls: AtomicU64::new(0),
    }
  }
}
impl<M> ModelStats<M> {
  pub fn calls(&self) -> u64 { self.calls.load(Ordering::Relaxed) }
}
impl<M> StateSpaceModel for ModelStats<M>
  where M: StateSpaceModel,
{
  fn state_dim(&self) -> usize { self.model.state_dim() }
  fn observation_dim(&self) -> usize { self.model.observation_dim() }
  fn transition(&self, x: ArrayView<f64, Ix1>,
                out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    self.calls.fetch_add(1, Ordering::Relaxed);
    self.model.transition(x, out)
  }
  fn observe(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    self.calls.fetch_add(1, Ordering::Relaxed);
    self.model.observe(x, out)
  }
}
