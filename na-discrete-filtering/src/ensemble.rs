//! Common stuffs for ensembles: summaries, anomalies, the per-member model
//! sweep and the retained history the smoother consumes.

use nd::{Array, ArrayView, ArrayViewMut, Axis, Ix1, Ix2, Ix3};
use nd::parallel::prelude::*;

use na_core::{self, StateSpaceModel};

use crate::error::{Result, check_shape};

/// `I − (1/N)·11ᵗ`. Right-multiplying an ensemble by this subtracts the
/// column mean from every column.
pub fn deviation_operator(n: usize) -> Array<f64, Ix2> {
  let inv = 1.0 / n as f64;
  Array::from_shape_fn((n, n), |(i, j)| {
    if i == j { 1.0 - inv } else { -inv }
  })
}

/// Column mean of a `dim × N` ensemble.
pub fn ensemble_mean(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix1> {
  let n = ensemble.ncols() as f64;
  ensemble.sum_axis(Axis(1)) / n
}

/// `X · (I − 11ᵗ/N)`, computed by subtracting the mean directly.
pub fn anomalies(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  let mean = ensemble_mean(ensemble);
  &ensemble - &mean.insert_axis(Axis(1))
}

/// Sample covariance of the columns (`N − 1` normalisation).
pub fn ensemble_covariance(ensemble: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  let x_bar = anomalies(ensemble);
  anomaly_covariance(x_bar.view())
}

pub fn anomaly_covariance(x_bar: ArrayView<f64, Ix2>) -> Array<f64, Ix2> {
  let n = x_bar.ncols() as f64;
  x_bar.dot(&x_bar.t()) / (n - 1.0)
}

/// `out[:, i] = fx(ensembles[:, i] + forcing[:, i])`. Members are
/// independent, so this is run across the rayon pool.
pub fn ensemble_predict<M>(model: &M,
                           ensembles: ArrayView<f64, Ix2>,
                           forcing: ArrayView<f64, Ix2>,
                           mut out: ArrayViewMut<f64, Ix2>)
                           -> Result<()>
  where M: StateSpaceModel + ?Sized,
{
  check_shape("predict forcing", ensembles.ncols(), forcing.ncols())?;
  check_shape("predict output", ensembles.ncols(), out.ncols())?;
  check_shape("predict state", model.state_dim(), ensembles.nrows())?;
  check_shape("predict forcing rows", ensembles.nrows(), forcing.nrows())?;
  check_shape("predict output rows", model.state_dim(), out.nrows())?;

  ensembles.axis_iter(Axis(1))
    .into_par_iter()
    .zip(forcing.axis_iter(Axis(1)).into_par_iter())
    .zip(out.axis_iter_mut(Axis(1)).into_par_iter())
    .try_for_each(|((member, forcing), out)| -> na_core::Result<()> {
      let perturbed = &member + &forcing;
      model.transition(perturbed.view(), out)
    })?;

  Ok(())
}

/// `out[:, i] = hx(ensembles[:, i]) + forcing[:, i]`.
pub fn ensemble_observe<M>(model: &M,
                           ensembles: ArrayView<f64, Ix2>,
                           forcing: ArrayView<f64, Ix2>,
                           mut out: ArrayViewMut<f64, Ix2>)
                           -> Result<()>
  where M: StateSpaceModel + ?Sized,
{
  check_shape("observe forcing", ensembles.ncols(), forcing.ncols())?;
  check_shape("observe output", ensembles.ncols(), out.ncols())?;
  check_shape("observe state", model.state_dim(), ensembles.nrows())?;
  check_shape("observation", model.observation_dim(), out.nrows())?;
  check_shape("observe forcing rows", model.observation_dim(), forcing.nrows())?;

  ensembles.axis_iter(Axis(1))
    .into_par_iter()
    .zip(forcing.axis_iter(Axis(1)).into_par_iter())
    .zip(out.axis_iter_mut(Axis(1)).into_par_iter())
    .try_for_each(|((member, forcing), mut out)| -> na_core::Result<()> {
      model.observe(member, out.view_mut())?;
      out += &forcing;
      Ok(())
    })?;

  Ok(())
}

/// Per-step ensembles retained by a filter run. Indexed by time step; every
/// slice is `dim_x × N`.
#[derive(Debug, Clone)]
pub struct History {
  priors: Array<f64, Ix3>,
  prior_anomalies: Array<f64, Ix3>,
  posteriors: Array<f64, Ix3>,
  posterior_anomalies: Array<f64, Ix3>,
}

impl History {
  pub fn new(steps: usize, n: usize, ensemble_count: usize) -> History {
    let dim = (steps, n, ensemble_count);
    History {
      priors: Array::zeros(dim),
      prior_anomalies: Array::zeros(dim),
      posteriors: Array::zeros(dim),
      posterior_anomalies: Array::zeros(dim),
    }
  }

  pub fn len(&self) -> usize { self.priors.dim().0 }
  pub fn is_empty(&self) -> bool { self.len() == 0 }
  pub fn state_dim(&self) -> usize { self.priors.dim().1 }
  pub fn ensemble_count(&self) -> usize { self.priors.dim().2 }

  pub fn store(&mut self, step: usize,
               prior: ArrayView<f64, Ix2>,
               prior_anomalies: ArrayView<f64, Ix2>,
               posterior: ArrayView<f64, Ix2>) {
    self.priors.index_axis_mut(Axis(0), step).assign(&prior);
    self.prior_anomalies.index_axis_mut(Axis(0), step).assign(&prior_anomalies);
    self.posteriors.index_axis_mut(Axis(0), step).assign(&posterior);
    self.posterior_anomalies.index_axis_mut(Axis(0), step).assign(&anomalies(posterior));
  }

  /// Forecast ensemble, after propagation and before the update.
  pub fn prior(&self, step: usize) -> ArrayView<f64, Ix2> {
    self.priors.index_axis(Axis(0), step)
  }
  pub fn prior_anomalies(&self, step: usize) -> ArrayView<f64, Ix2> {
    self.prior_anomalies.index_axis(Axis(0), step)
  }
  pub fn posterior(&self, step: usize) -> ArrayView<f64, Ix2> {
    self.posteriors.index_axis(Axis(0), step)
  }
  pub fn posterior_anomalies(&self, step: usize) -> ArrayView<f64, Ix2> {
    self.posterior_anomalies.index_axis(Axis(0), step)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::{arr1, arr2};
  use na_core::{linear_model, fn_model, ModelStats};
  use crate::error::Error;

  #[test]
  fn deviation_operator_matches_anomalies() {
    let x = arr2(&[
      [1.0, 2.0, 6.0],
      [-1.0, 0.0, 4.0],
    ]);
    let d = deviation_operator(3);
    let a = x.dot(&d);
    let b = anomalies(x.view());
    for (l, r) in a.iter().zip(b.iter()) {
      assert_abs_diff_eq!(*l, *r, epsilon = 1e-14);
    }
    assert_eq!(ensemble_mean(x.view()), arr1(&[3.0, 1.0]));
    // columns of the anomalies sum to zero
    for v in b.sum_axis(Axis(1)).iter() {
      assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-14);
    }
  }

  #[test]
  fn covariance_is_unbiased() {
    let x = arr2(&[
      [1.0, 2.0, 3.0, 4.0],
    ]);
    let c = ensemble_covariance(x.view());
    // var([1,2,3,4]) with N - 1 = 5/3
    assert_relative_eq!(c[[0, 0]], 5.0 / 3.0, epsilon = 1e-14);
  }

  #[test]
  fn predict_and_observe() {
    let m = linear_model(arr2(&[[2.0, 0.0], [0.0, 1.0]]),
                         arr2(&[[1.0, 1.0]]))
      .unwrap();
    let stats = ModelStats::from(&m);

    let x = arr2(&[
      [1.0, 2.0, 3.0],
      [0.0, 1.0, 0.0],
    ]);
    let eps = arr2(&[
      [0.5, 0.0, 0.0],
      [0.0, 0.0, -1.0],
    ]);
    let mut prior = Array::zeros((2, 3));
    ensemble_predict(&stats, x.view(), eps.view(), prior.view_mut())
      .unwrap();
    assert_eq!(prior, arr2(&[
      [3.0, 4.0, 6.0],
      [0.0, 1.0, -1.0],
    ]));

    let mu = arr2(&[[0.0, 1.0, 0.0]]);
    let mut y = Array::zeros((1, 3));
    ensemble_observe(&stats, prior.view(), mu.view(), y.view_mut())
      .unwrap();
    assert_eq!(y, arr2(&[[3.0, 6.0, 5.0]]));
    assert_eq!(stats.calls(), 6);
  }

  #[test]
  fn predict_shape_mismatch() {
    let m = fn_model(2, 1,
                     |x, mut out| out.assign(&x),
                     |x, mut out| out[0] = x[0]);
    let x = Array::zeros((3, 4));
    let eps = Array::zeros((3, 4));
    let mut out = Array::zeros((3, 4));
    assert!(ensemble_predict(&m, x.view(), eps.view(), out.view_mut()).is_err());
  }

  #[test]
  fn forcing_and_output_rows_are_checked() {
    let m = fn_model(2, 1,
                     |x, mut out| out.assign(&x),
                     |x, mut out| out[0] = x[0]);
    let x = Array::zeros((2, 4));

    let wide = Array::zeros((3, 4));
    let mut out = Array::zeros((2, 4));
    match ensemble_predict(&m, x.view(), wide.view(), out.view_mut()) {
      Err(Error::ShapeMismatch { expected: 2, got: 3, .. }) => {},
      r => panic!("unexpected result: {:?}", r),
    }

    let eps = Array::zeros((2, 4));
    let mut tall = Array::zeros((3, 4));
    match ensemble_predict(&m, x.view(), eps.view(), tall.view_mut()) {
      Err(Error::ShapeMismatch { expected: 2, got: 3, .. }) => {},
      r => panic!("unexpected result: {:?}", r),
    }

    let mut y = Array::zeros((1, 4));
    match ensemble_observe(&m, x.view(), wide.view(), y.view_mut()) {
      Err(Error::ShapeMismatch { expected: 1, got: 3, .. }) => {},
      r => panic!("unexpected result: {:?}", r),
    }
    let mut y = Array::zeros((2, 4));
    let mu = Array::zeros((1, 4));
    match ensemble_observe(&m, x.view(), mu.view(), y.view_mut()) {
      Err(Error::ShapeMismatch { expected: 1, got: 2, .. }) => {},
      r => panic!("unexpected result: {:?}", r),
    }
  }

  /// Declares a two dimensional state but fills only one entry.
  struct Truncating;
  impl StateSpaceModel for Truncating {
    fn state_dim(&self) -> usize { 2 }
    fn observation_dim(&self) -> usize { 1 }
    fn transition(&self, x: ArrayView<f64, Ix1>,
                  out: ArrayViewMut<f64, Ix1>) -> na_core::Result<()> {
      na_core::check_dim("truncated transition", x.len() - 1, out.len())
    }
    fn observe(&self, x: ArrayView<f64, Ix1>,
               mut out: ArrayViewMut<f64, Ix1>) -> na_core::Result<()> {
      out[0] = x[0];
      Ok(())
    }
  }

  #[test]
  fn model_dimension_error_is_shape_mismatch() {
    let x = Array::zeros((2, 3));
    let eps = Array::zeros((2, 3));
    let mut out = Array::zeros((2, 3));
    match ensemble_predict(&Truncating, x.view(), eps.view(), out.view_mut()) {
      Err(Error::ShapeMismatch { what: "truncated transition", expected: 1, got: 2 }) => {},
      r => panic!("unexpected result: {:?}", r),
    }
  }

  #[test]
  fn history_store() {
    let mut h = History::new(2, 1, 2);
    let prior = arr2(&[[1.0, 3.0]]);
    let posterior = arr2(&[[0.0, 4.0]]);
    h.store(1, prior.view(), anomalies(prior.view()).view(), posterior.view());
    assert_eq!(h.len(), 2);
    assert_eq!(h.prior(1), prior);
    assert_eq!(h.prior_anomalies(1), arr2(&[[-1.0, 1.0]]));
    assert_eq!(h.posterior_anomalies(1), arr2(&[[-2.0, 2.0]]));
    assert_eq!(h.posterior(0), arr2(&[[0.0, 0.0]]));
  }
}
