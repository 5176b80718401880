
extern crate ndarray as nd;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate rand;
extern crate pbr;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate approx;

use nd::{ArrayView, Ix2};

pub use na_df::StateSteps;

pub mod data;
pub mod progress;

pub trait ModelTruth {
  /// `T × n`; row `t` is the state observed at step `t`.
  fn truth(&self) -> ArrayView<f64, Ix2>;
  /// `T × m`
  fn observations(&self) -> ArrayView<f64, Ix2>;
}

/// Root mean squared error over every entry of two equally shaped
/// trajectories.
pub fn rmse(estimate: ArrayView<f64, Ix2>, truth: ArrayView<f64, Ix2>) -> f64 {
  assert_eq!(estimate.dim(), truth.dim(), "trajectory shapes differ");
  if estimate.is_empty() {
    return 0.0;
  }

  let sq = estimate.iter()
    .zip(truth.iter())
    .map(|(e, t)| (e - t) * (e - t))
    .sum::<f64>();
  (sq / estimate.len() as f64).sqrt()
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::arr2;

  #[test]
  fn rmse_of_constant_offset() {
    let a = arr2(&[
      [1.0, 2.0],
      [3.0, 4.0],
    ]);
    let b = &a + 0.5;
    assert_relative_eq!(rmse(a.view(), b.view()), 0.5, epsilon = 1e-14);
    assert_eq!(rmse(a.view(), a.view()), 0.0);
  }

  #[test]
  #[should_panic]
  fn rmse_shape_mismatch() {
    let a = arr2(&[[1.0, 2.0]]);
    let b = arr2(&[[1.0], [2.0]]);
    rmse(a.view(), b.view());
  }
}
