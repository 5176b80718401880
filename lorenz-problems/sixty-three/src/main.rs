
extern crate ndarray as nd;
extern crate na_core;
extern crate na_discrete_filtering as na_df;
extern crate sixty_three;
extern crate util;
extern crate rand;
extern crate env_logger;
#[macro_use]
extern crate log;

use nd::{Array, Ix2, arr1, arr2};
use rand::SeedableRng;
use rand::rngs::StdRng;

use na_df::kalman::{EnsembleTransformFilter, Init, RunOptions};
use na_df::smoother::{EnsembleSmoother, LbfgsbSolver, SmootherConfig};
use na_df::stats::MultivariateNormal;

use sixty_three::L63Model;
use util::{ModelTruth, rmse};
use util::data::generate_model_truth_and_observation;
use util::progress::ReportingIterator;

const STEPS: usize = 200;
const RNG_SEED: u64 = 1;
const ENSEMBLE_SIZES: &'static [usize] = &[10, 25, 50, 100];

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  let mut rand = StdRng::seed_from_u64(RNG_SEED);

  let model = L63Model::with_observation(arr2(&[
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
  ]));
  let q = Array::<f64, Ix2>::eye(3) * 0.01;
  let r = Array::<f64, Ix2>::eye(2) * 0.25;
  let x0 = arr1(&[1.0, 1.0, 1.0]);

  let data = generate_model_truth_and_observation(&model, STEPS, x0.view(),
                                                  &MultivariateNormal::zero_mean(q.view())?,
                                                  &MultivariateNormal::zero_mean(r.view())?,
                                                  &mut rand)?;
  info!("generated {} observations", STEPS);

  println!("{:>8} {:>12} {:>12} {:>14} {:>10}",
           "members", "filter rmse", "smooth rmse", "log-lik", "calls");

  for &n in ReportingIterator::new(ENSEMBLE_SIZES.iter(), "ensemble sizes") {
    let init = Init::for_model(&model, n)
      .with_initial_mean(x0.clone())
      .with_initial_covariance(Array::eye(3) * 10.0)
      .with_process_covariance(q.clone())
      .with_observation_covariance(r.clone());

    let filter = EnsembleTransformFilter::new(&model, init.clone())?;
    let out = filter.run(data.observations(), RunOptions::all(), &mut rand)?;

    let smoother = EnsembleSmoother::new(&model, &init,
                                         LbfgsbSolver::default(),
                                         SmootherConfig::default())?;
    let smoothed = smoother.smooth(&out)?;

    println!("{:>8} {:>12.4} {:>12.4} {:>14.3} {:>10}",
             n,
             rmse(out.states.means.view(), data.truth()),
             rmse(smoothed.means.view(), data.truth()),
             out.log_likelihood,
             out.model_calls);
  }

  Ok(())
}
