
extern crate ndarray as nd;
extern crate na_core;

#[cfg(test)]
#[macro_use]
extern crate approx;

use nd::prelude::*;

use na_core::{Result, StateSpaceModel, check_dim};

/// Lorenz-63, advanced over one observation interval `dt` with `substeps`
/// classical Runge-Kutta steps. Observations are linear.
#[derive(Debug, Clone)]
pub struct L63Model {
  pub rho: f64,
  pub sigma: f64,
  pub beta: f64,
  pub dt: f64,
  pub substeps: usize,
  pub observation: Array<f64, Ix2>,
}

impl L63Model {
  pub fn with_observation(observation: Array<f64, Ix2>) -> L63Model {
    L63Model {
      observation,
      ..Default::default()
    }
  }

  pub fn derivative(&self, y: ArrayView<f64, Ix1>, mut yp: ArrayViewMut<f64, Ix1>) {
    debug_assert!(y.len() == 3);
    debug_assert!(yp.len() == 3);

    yp[0] = self.sigma * (y[1] - y[0]);
    yp[1] = y[0] * (self.rho - y[2]) - y[1];
    yp[2] = y[0] * y[1] - self.beta * y[2];
  }

  fn rk4_step(&self, h: f64, mut y: ArrayViewMut<f64, Ix1>) {
    let mut k1 = Array::zeros(3);
    let mut k2 = Array::zeros(3);
    let mut k3 = Array::zeros(3);
    let mut k4 = Array::zeros(3);

    self.derivative(y.view(), k1.view_mut());
    let t = &y + &(&k1 * (h / 2.0));
    self.derivative(t.view(), k2.view_mut());
    let t = &y + &(&k2 * (h / 2.0));
    self.derivative(t.view(), k3.view_mut());
    let t = &y + &(&k3 * h);
    self.derivative(t.view(), k4.view_mut());

    y.scaled_add(h / 6.0, &k1);
    y.scaled_add(h / 3.0, &k2);
    y.scaled_add(h / 3.0, &k3);
    y.scaled_add(h / 6.0, &k4);
  }
}

impl Default for L63Model {
  fn default() -> Self {
    L63Model {
      rho: 28.0,
      sigma: 10.0,
      beta: 8.0 / 3.0,
      dt: 0.01,
      substeps: 2,
      observation: Array::eye(3),
    }
  }
}

impl StateSpaceModel for L63Model {
  fn state_dim(&self) -> usize { 3 }
  fn observation_dim(&self) -> usize { self.observation.nrows() }

  fn transition(&self, x: ArrayView<f64, Ix1>,
                mut out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    check_dim("L63 state", 3, x.len())?;
    check_dim("L63 state output", 3, out.len())?;

    let h = self.dt / self.substeps.max(1) as f64;
    out.assign(&x);
    for _ in 0..self.substeps.max(1) {
      self.rk4_step(h, out.view_mut());
    }
    Ok(())
  }

  fn observe(&self, x: ArrayView<f64, Ix1>,
             out: ArrayViewMut<f64, Ix1>) -> Result<()> {
    use na_core::Operator;
    self.observation.eval_at(x, out)
  }
}
