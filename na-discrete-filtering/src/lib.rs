//! Ensemble filtering and smoothing of discrete-time state space models.

extern crate ndarray as nd;
extern crate ndarray_rand as nd_rand;
extern crate nalgebra as na;
extern crate na_core;
extern crate rand;
extern crate rand_distr;
extern crate rayon;
extern crate argmin;
extern crate argmin_math;
extern crate thiserror;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate approx;

use nd::{Array, ArrayView, Axis, Ix1, Ix2, Ix3};
use rand::Rng;

pub use error::{Error, Result};

pub mod error;
pub mod ensemble;
pub mod forcing;
pub mod kalman;
pub mod smoother;
pub mod stats;
pub mod utils;

/// Per-run mutable state of an algorithm. A fresh one is allocated for every
/// run and dropped at its end.
pub trait Workspace<I>: Sized {
  fn alloc<R>(init: I, rand: &mut R) -> Result<Self>
    where R: Rng + ?Sized;
}

/// Per-step Gaussian summaries of a trajectory: `T × n` means and
/// `T × n × n` covariances.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSteps {
  pub means: Array<f64, Ix2>,
  pub covariances: Array<f64, Ix3>,
}
impl StateSteps {
  pub fn new(steps: usize, n: usize) -> StateSteps {
    StateSteps {
      means: Array::zeros((steps, n)),
      covariances: Array::zeros((steps, n, n)),
    }
  }

  pub fn len(&self) -> usize { self.means.nrows() }
  pub fn is_empty(&self) -> bool { self.len() == 0 }
  pub fn state_dim(&self) -> usize { self.means.ncols() }

  pub fn store_state(&mut self, step: usize,
                     mean: ArrayView<f64, Ix1>,
                     covariance: ArrayView<f64, Ix2>) {
    self.means
      .index_axis_mut(Axis(0), step)
      .assign(&mean);
    self.covariances
      .index_axis_mut(Axis(0), step)
      .assign(&covariance);
  }

  pub fn mean(&self, step: usize) -> ArrayView<f64, Ix1> {
    self.means.index_axis(Axis(0), step)
  }
  pub fn covariance(&self, step: usize) -> ArrayView<f64, Ix2> {
    self.covariances.index_axis(Axis(0), step)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::{arr1, arr2};

  #[test]
  fn state_steps_store() {
    let mut s = StateSteps::new(3, 2);
    assert_eq!(s.len(), 3);
    assert_eq!(s.state_dim(), 2);

    let m = arr1(&[1.0, 2.0]);
    let c = arr2(&[
      [1.0, 0.5],
      [0.5, 2.0],
    ]);
    s.store_state(1, m.view(), c.view());
    assert_eq!(s.mean(1), m);
    assert_eq!(s.covariance(1), c);
    assert_eq!(s.mean(0), arr1(&[0.0, 0.0]));
  }
}
