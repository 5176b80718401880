
use nd::{Array, ArrayView, Axis, Ix1, Ix2};
use nd::parallel::prelude::*;
use rand::Rng;

use na_core::StateSpaceModel;
use na_df::Result;
use na_df::stats::MultivariateNormal;

use crate::ModelTruth;

/// A simulated twin experiment.
#[derive(Clone, Debug)]
pub struct Data {
  pub truth: Array<f64, Ix2>,
  pub observations: Array<f64, Ix2>,
}
impl ModelTruth for Data {
  fn truth(&self) -> ArrayView<f64, Ix2> { self.truth.view() }
  fn observations(&self) -> ArrayView<f64, Ix2> { self.observations.view() }
}

/// Runs `model` from `initial` for `steps` steps with the same noise
/// convention as the filters (`x_{t+1} = fx(x_t + eps)`, `z_t = hx(x_t) + mu`).
/// The initial state itself is not part of the truth.
pub fn generate_model_truth_and_observation<M, R>(model: &M,
                                                  steps: usize,
                                                  initial: ArrayView<f64, Ix1>,
                                                  process_noise: &MultivariateNormal,
                                                  observation_noise: &MultivariateNormal,
                                                  rand: &mut R)
                                                  -> Result<Data>
  where M: StateSpaceModel + ?Sized,
        R: Rng + ?Sized,
{
  let n = model.state_dim();
  let m = model.observation_dim();
  assert_eq!(initial.len(), n, "initial state dimension");
  assert_eq!(process_noise.dim(), n, "process noise dimension");
  assert_eq!(observation_noise.dim(), m, "observation noise dimension");

  let eps = process_noise.sample_columns(steps, rand);
  let mu = observation_noise.sample_columns(steps, rand);

  let mut truth = Array::zeros((steps, n));
  let mut x = initial.to_owned();
  for (t, mut dest) in truth.axis_iter_mut(Axis(0)).enumerate() {
    let perturbed = &x + &eps.column(t);
    model.transition(perturbed.view(), dest.view_mut())?;
    x.assign(&dest);
  }

  let mut observations = Array::zeros((steps, m));
  {
    let obs_iter = observations.axis_iter_mut(Axis(0)).into_par_iter();
    truth
      .axis_iter(Axis(0))
      .into_par_iter()
      .zip(obs_iter)
      .zip(mu.axis_iter(Axis(1)).into_par_iter())
      .try_for_each(|((truth, mut obs), mu)| -> na_core::Result<()> {
        model.observe(truth, obs.view_mut())?;
        obs += &mu;
        Ok(())
      })?;
  }

  debug!("generated {} steps of truth and observations", steps);

  Ok(Data {
    truth,
    observations,
  })
}

#[cfg(test)]
mod test {
  use super::*;
  use na_core::linear_model;
  use nd::{arr1, arr2};
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  #[test]
  fn noiseless_linear_truth() {
    let model = linear_model(arr2(&[[0.5]]), arr2(&[[2.0]])).unwrap();
    let zero = MultivariateNormal::zero_mean(arr2(&[[0.0]]).view()).unwrap();

    let data = generate_model_truth_and_observation(&model, 3,
                                                    arr1(&[8.0]).view(),
                                                    &zero, &zero,
                                                    &mut StdRng::seed_from_u64(0))
      .unwrap();
    assert_eq!(data.truth(), arr2(&[[4.0], [2.0], [1.0]]));
    assert_eq!(data.observations(), arr2(&[[8.0], [4.0], [2.0]]));
  }

  #[test]
  fn observation_noise_spread() {
    let model = linear_model(arr2(&[[1.0]]), arr2(&[[1.0]])).unwrap();
    let zero = MultivariateNormal::zero_mean(arr2(&[[0.0]]).view()).unwrap();
    let noise = MultivariateNormal::zero_mean(arr2(&[[0.25]]).view()).unwrap();

    let data = generate_model_truth_and_observation(&model, 4000,
                                                    arr1(&[1.0]).view(),
                                                    &zero, &noise,
                                                    &mut StdRng::seed_from_u64(21))
      .unwrap();
    assert!(data.truth.iter().all(|&v| v == 1.0));
    let var = data.observations
      .mapv(|v| (v - 1.0) * (v - 1.0))
      .mean()
      .unwrap();
    assert_abs_diff_eq!(var, 0.25, epsilon = 0.03);
  }
}
