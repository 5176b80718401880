//! Ensemble Transform Filter. Each step propagates a perturbed ensemble
//! through the model, perturbs the model observations, and moves every
//! member along the ensemble estimate of the Kalman gain:
//!
//! `X_new = X_prior + X̄·Ȳᵗ·(Ȳ·Ȳᵗ)⁻¹·(z·1ᵗ − Y)`
//!
//! where `X̄` and `Ȳ` are the anomalies of the prior ensemble and of its
//! perturbed observations.

use nd::{Array, ArrayView, ArrayViewMut, Axis, Ix1, Ix2};
use nd::linalg::general_mat_mul;

use rand::Rng;

use std::time::Instant;

use na_core::{ModelStats, StateSpaceModel};

use crate::{StateSteps, Workspace};
use crate::ensemble::{History, anomalies, ensemble_covariance, ensemble_mean,
                      ensemble_observe, ensemble_predict};
use crate::error::{Result, check_shape};
use crate::forcing::{Forcing, ResampleForcing};
use crate::stats::{Gaussian, MultivariateNormal};

use super::{Init, RunOptions};

/// Everything a run produces.
#[derive(Clone, Debug)]
pub struct FilterOutput {
  pub states: StateSteps,
  /// Zero unless `RunOptions::calc_ll` was set.
  pub log_likelihood: f64,
  /// Present iff `RunOptions::store` was set.
  pub history: Option<History>,
  /// Number of `fx` and `hx` evaluations.
  pub model_calls: u64,
}

#[derive(Debug)]
pub struct OwnedWorkspace {
  /// X
  ensembles: Array<f64, Ix2>,
  /// X_prior
  ensemble_predict: Array<f64, Ix2>,
  /// X̄
  centered_ensemble: Array<f64, Ix2>,
  /// Y
  observation_predict: Array<f64, Ix2>,
  /// Ȳ
  centered_observation: Array<f64, Ix2>,

  process_forcing: Array<f64, Ix2>,
  observation_forcing: Array<f64, Ix2>,
}
impl<'a> Workspace<&'a Init> for OwnedWorkspace {
  fn alloc<R>(init: &'a Init, rand: &mut R) -> Result<OwnedWorkspace>
    where R: Rng + ?Sized,
  {
    let n = init.state_dim();
    let m = init.observation_dim();
    let ec = init.ensemble_count;

    let initial = MultivariateNormal::new(init.initial_mean.clone(),
                                          init.initial_covariance.view())?;
    let ensembles = initial.sample_columns(ec, rand);

    Ok(OwnedWorkspace {
      ensembles,
      ensemble_predict: Array::zeros((n, ec)),
      centered_ensemble: Array::zeros((n, ec)),
      observation_predict: Array::zeros((m, ec)),
      centered_observation: Array::zeros((m, ec)),

      process_forcing: Array::zeros((n, ec)),
      observation_forcing: Array::zeros((m, ec)),
    })
  }
}
impl ResampleForcing for OwnedWorkspace {
  type Disc = Forcing;
  fn forcing_view_mut(&mut self, disc: Forcing) -> ArrayViewMut<f64, Ix2> {
    match disc {
      Forcing::Process => self.process_forcing.view_mut(),
      Forcing::Observation => self.observation_forcing.view_mut(),
    }
  }
}

pub struct EnsembleTransformFilter<M> {
  model: M,
  init: Init,
  process_noise: MultivariateNormal,
  observation_noise: MultivariateNormal,
}

impl<M> EnsembleTransformFilter<M>
  where M: StateSpaceModel,
{
  pub fn new(model: M, init: Init) -> Result<EnsembleTransformFilter<M>> {
    init.validate(&model)?;

    if init.ensemble_count <= model.state_dim() {
      warn!("ensemble size {} does not exceed the state dimension {}; \
             ensemble covariances will be rank deficient",
            init.ensemble_count, model.state_dim());
    }

    let process_noise = MultivariateNormal::zero_mean(init.process_covariance.view())?;
    let observation_noise =
      MultivariateNormal::zero_mean(init.observation_covariance.view())?;

    Ok(EnsembleTransformFilter {
      model,
      init,
      process_noise,
      observation_noise,
    })
  }

  pub fn model(&self) -> &M { &self.model }
  pub fn init(&self) -> &Init { &self.init }
  pub fn ensemble_count(&self) -> usize { self.init.ensemble_count }

  /// Filters `observations` (one row per time step). All randomness is
  /// drawn from `rand`, so a seeded generator makes runs reproducible.
  pub fn run<R>(&self, observations: ArrayView<f64, Ix2>,
                options: RunOptions,
                rand: &mut R)
                -> Result<FilterOutput>
    where R: Rng + ?Sized,
  {
    check_shape("observations", self.model.observation_dim(),
                observations.ncols())?;

    let steps = observations.nrows();
    let n = self.model.state_dim();
    let ec = self.ensemble_count();

    let mut states = StateSteps::new(steps, n);
    let mut history = if options.store {
      Some(History::new(steps, n, ec))
    } else {
      None
    };
    let model = ModelStats::from(&self.model);

    if steps == 0 {
      return Ok(FilterOutput {
        states,
        log_likelihood: 0.0,
        history,
        model_calls: 0,
      });
    }

    let start = Instant::now();
    let mut ws = OwnedWorkspace::alloc(&self.init, rand)?;
    let mut ll = 0.0;

    for (step, z) in observations.outer_iter().enumerate() {
      let step_ll = self.next_step(z, &mut ws, &model, options.calc_ll, rand)?;

      let mean = ensemble_mean(ws.ensembles.view());
      let covariance = ensemble_covariance(ws.ensembles.view());
      states.store_state(step, mean.view(), covariance.view());

      if let Some(ll_term) = step_ll {
        ll += ll_term;
        trace!("step {}: log-likelihood term {}", step, ll_term);
      }
      debug!("step {}: posterior mean {}", step, mean);

      if let Some(ref mut h) = history {
        h.store(step,
                ws.ensemble_predict.view(),
                ws.centered_ensemble.view(),
                ws.ensembles.view());
      }
    }

    info!("ensemble transform filter: {} steps with {} members in {:?}, \
           log-likelihood {}",
          steps, ec, start.elapsed(), ll);

    Ok(FilterOutput {
      states,
      log_likelihood: ll,
      history,
      model_calls: model.calls(),
    })
  }

  fn next_step<R>(&self,
                  z: ArrayView<f64, Ix1>,
                  ws: &mut OwnedWorkspace,
                  model: &ModelStats<&M>,
                  calc_ll: bool,
                  rand: &mut R)
                  -> Result<Option<f64>>
    where R: Rng + ?Sized,
  {
    // predict
    ws.resample_forcing(Forcing::Process, &self.process_noise, rand)?;
    ensemble_predict(model,
                     ws.ensembles.view(),
                     ws.process_forcing.view(),
                     ws.ensemble_predict.view_mut())?;

    ws.resample_forcing(Forcing::Observation, &self.observation_noise, rand)?;
    ensemble_observe(model,
                     ws.ensemble_predict.view(),
                     ws.observation_forcing.view(),
                     ws.observation_predict.view_mut())?;

    ws.centered_ensemble.assign(&anomalies(ws.ensemble_predict.view()));
    ws.centered_observation.assign(&anomalies(ws.observation_predict.view()));

    // analyze
    let gaussian = {
      let y_bar = ws.centered_observation.view();
      let c_yy = y_bar.dot(&y_bar.t()) / (self.ensemble_count() as f64 - 1.0);
      Gaussian::new(ensemble_mean(ws.observation_predict.view()),
                    c_yy.view(),
                    "innovation covariance")?
    };

    // (Ȳ Ȳᵗ)⁻¹ = C_yy⁻¹ / (N - 1)
    let mut innovation = -&ws.observation_predict;
    innovation += &z.insert_axis(Axis(1));
    let weights = gaussian.cholesky()
      .solve_multi(innovation.view())? / (self.ensemble_count() as f64 - 1.0);
    let cross = ws.centered_ensemble.dot(&ws.centered_observation.t());

    ws.ensembles.assign(&ws.ensemble_predict);
    general_mat_mul(1.0, &cross, &weights, 1.0, &mut ws.ensembles);

    if calc_ll {
      Ok(Some(gaussian.log_density_at(z)?))
    } else {
      Ok(None)
    }
  }
}
