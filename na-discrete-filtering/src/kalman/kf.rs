
//! You probably don't want to use unmodified Kalman filters for nonlinear
//! models. This one exists to check the ensemble filters against on linear
//! problems. Process noise enters before the transition, as in the ensemble
//! filters, so the predicted covariance is `A (P + Q) Aᵗ`.

use nd::{ArrayView, Ix2};

use na_core::LinearModel;

use crate::StateSteps;
use crate::error::{Result, check_shape};
use crate::stats::Gaussian;

use super::Init;

#[derive(Clone, Debug)]
pub struct KalmanOutput {
  pub states: StateSteps,
  pub log_likelihood: f64,
}

#[derive(Clone, Debug)]
pub struct LinearKalman {
  model: LinearModel,
  init: Init,
}

impl LinearKalman {
  /// `init.ensemble_count` is ignored.
  pub fn new(model: LinearModel, init: Init) -> Result<LinearKalman> {
    init.validate_shapes(&model)?;
    Ok(LinearKalman { model, init, })
  }

  pub fn batch_filter(&self, observations: ArrayView<f64, Ix2>) -> Result<KalmanOutput> {
    let a = &self.model.transition;
    let h = &self.model.observation;
    check_shape("observations", h.nrows(), observations.ncols())?;

    let mut states = StateSteps::new(observations.nrows(), a.nrows());
    let mut ll = 0.0;

    let mut m = self.init.initial_mean.clone();
    let mut p = self.init.initial_covariance.clone();

    for (step, z) in observations.outer_iter().enumerate() {
      let m_p = a.dot(&m);
      let p_p = a.dot(&(&p + &self.init.process_covariance)).dot(&a.t());

      let s = h.dot(&p_p).dot(&h.t()) + &self.init.observation_covariance;
      let predicted = Gaussian::new(h.dot(&m_p), s.view(), "innovation covariance")?;

      // K = P_p Hᵗ S⁻¹; solve for Kᵗ = S⁻¹ H P_p
      let hp = h.dot(&p_p);
      let k = predicted.cholesky()
        .solve_multi(hp.view())?
        .reversed_axes();

      let innovation = &z - &predicted.mean();
      m = &m_p + &k.dot(&innovation);
      p = &p_p - &k.dot(&hp);

      ll += predicted.log_density_at(z)?;
      states.store_state(step, m.view(), p.view());
    }

    Ok(KalmanOutput {
      states,
      log_likelihood: ll,
    })
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::stats::log_density;
  use na_core::linear_model;
  use nd::{arr1, arr2};

  #[test]
  fn scalar_single_step() {
    let model = linear_model(arr2(&[[0.9]]), arr2(&[[1.0]])).unwrap();
    let init = Init::for_model(&model, 0)
      .with_initial_covariance(arr2(&[[0.1]]))
      .with_process_covariance(arr2(&[[0.1]]))
      .with_observation_covariance(arr2(&[[0.1]]));
    let kf = LinearKalman::new(model, init).unwrap();

    let out = kf.batch_filter(arr2(&[[1.0]]).view()).unwrap();

    // P_p = 0.81 * 0.2, S = P_p + 0.1
    let p_p = 0.81 * 0.2;
    let s = p_p + 0.1;
    let k = p_p / s;
    assert_relative_eq!(out.states.means[[0, 0]], k, epsilon = 1e-12);
    assert_relative_eq!(out.states.covariances[[0, 0, 0]], (1.0 - k) * p_p,
                        epsilon = 1e-12);

    let expected = log_density(arr1(&[1.0]).view(),
                               arr1(&[0.0]).view(),
                               arr2(&[[s]]).view())
      .unwrap();
    assert_relative_eq!(out.log_likelihood, expected, epsilon = 1e-12);
  }

  #[test]
  fn shape_checks() {
    let model = linear_model(nd::Array::eye(2), arr2(&[[1.0, 0.0]])).unwrap();
    let kf = LinearKalman::new(model.clone(), Init::for_model(&model, 0))
      .unwrap();
    assert!(kf.batch_filter(arr2(&[[1.0, 2.0]]).view()).is_err());

    let bad = Init::for_model(&model, 0)
      .with_process_covariance(nd::Array::eye(3));
    assert!(LinearKalman::new(model, bad).is_err());
  }
}
