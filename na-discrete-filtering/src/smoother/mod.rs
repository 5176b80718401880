//! Backward ensemble smoother with a MAP correction.
//!
//! Starting from the last posterior ensemble, each earlier ensemble is moved
//! by the ensemble RTS gain towards the smoothed ensemble after it, and the
//! result is then recentered on the solution of a local MAP problem (see
//! `map`).

use nd::{Array, Axis, Ix2};

use std::time::Instant;

use na_core::StateSpaceModel;

use crate::StateSteps;
use crate::ensemble::{History, ensemble_covariance, ensemble_mean};
use crate::error::{Error, Result, check_shape};
use crate::kalman::{FilterOutput, Init};
use crate::stats::Gaussian;
use crate::utils::pseudo_inverse;

pub use self::map::{ClosedFormSolver, EnsembleMeanSolver, LbfgsbSolver,
                    LocalMapSolver, MapProblem, MapSolution, OptimizerConfig};

pub mod map;

/// The covariance of the `eps` term of the MAP objective.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyCovariance {
  /// `R`; `eps` has the observation dimension.
  Observation,
  /// `Q`; `eps` has the state dimension.
  Process,
}
impl Default for PenaltyCovariance {
  fn default() -> PenaltyCovariance { PenaltyCovariance::Observation }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SmootherConfig {
  pub penalty: PenaltyCovariance,
  /// Fail instead of accepting the best iterate of a non-converged local
  /// optimization.
  pub strict_convergence: bool,
}

/// Backward smoother over the history of an `EnsembleTransformFilter` run.
///
/// The transform update leaves posterior anomalies of rank at most
/// `N − 1 − dim_z`, and every step factors the covariances of the candidate
/// and smoothed ensembles. Smoothing therefore needs
/// `N > dim_x + dim_z`; smaller ensembles fail with `SingularCovariance`.
pub struct EnsembleSmoother<M, S> {
  model: M,
  solver: S,
  config: SmootherConfig,
  penalty: Gaussian,
}

impl<M, S> EnsembleSmoother<M, S>
  where M: StateSpaceModel,
        S: LocalMapSolver,
{
  /// `init` supplies the penalty covariance; it should be the one the
  /// filter ran with.
  pub fn new(model: M, init: &Init, solver: S,
             config: SmootherConfig) -> Result<EnsembleSmoother<M, S>> {
    init.validate_shapes(&model)?;

    let penalty = match config.penalty {
      PenaltyCovariance::Observation => &init.observation_covariance,
      PenaltyCovariance::Process => &init.process_covariance,
    };
    let penalty = Gaussian::zero_mean(penalty.view(), "penalty covariance")?;

    Ok(EnsembleSmoother {
      model,
      solver,
      config,
      penalty,
    })
  }

  pub fn model(&self) -> &M { &self.model }
  pub fn solver(&self) -> &S { &self.solver }
  pub fn config(&self) -> &SmootherConfig { &self.config }

  /// Smoothed copy of `output.states`.
  pub fn smooth(&self, output: &FilterOutput) -> Result<StateSteps> {
    let mut states = output.states.clone();
    self.smooth_in_place(output.history.as_ref(), &mut states)?;
    Ok(states)
  }

  /// Overwrites every step but the last of `states`. `history` must come
  /// from the same run as `states`.
  pub fn smooth_in_place(&self, history: Option<&History>,
                         states: &mut StateSteps) -> Result<()> {
    let history = history.ok_or(Error::HistoryUnavailable)?;
    if history.len() != states.len() {
      return Err(Error::HistoryUnavailable);
    }
    check_shape("smoothed states", self.model.state_dim(), states.state_dim())?;
    check_shape("history states", self.model.state_dim(), history.state_dim())?;

    let steps = states.len();
    if steps < 2 {
      return Ok(());
    }

    let dims = self.model.state_dim() + self.model.observation_dim();
    if history.ensemble_count() <= dims {
      warn!("ensemble size {} does not exceed dim_x + dim_z = {}; \
             smoothed ensemble covariances will be singular",
            history.ensemble_count(), dims);
    }

    let start = Instant::now();
    let mut nonconverged = 0usize;

    let mut ase = history.posterior(steps - 1).to_owned();
    for i in (0..steps - 1).rev() {
      let se = self.candidate(history, i, &ase)?;
      let se_mean = ensemble_mean(se.view());

      let prior = Gaussian::new(se_mean.clone(),
                                ensemble_covariance(se.view()).view(),
                                "candidate ensemble covariance")?;
      let anchor = Gaussian::new(ensemble_mean(ase.view()),
                                 ensemble_covariance(ase.view()).view(),
                                 "smoothed ensemble covariance")?;
      let problem = MapProblem::new(&self.model, prior, anchor, &self.penalty)?;
      let solution = self.solver.solve(&problem)?;

      if !solution.converged {
        if self.config.strict_convergence {
          return Err(Error::OptimizationNonconvergence {
            step: i,
            reason: solution.message,
          });
        }
        warn!("smoother step {}: local MAP optimization did not converge ({}); \
               using the best iterate", i, solution.message);
        nonconverged += 1;
      }
      debug!("smoother step {}: {}", i, solution);

      let shift = &solution.state - &se_mean;
      ase = se + &shift.insert_axis(Axis(1));

      states.store_state(i,
                         ensemble_mean(ase.view()).view(),
                         ensemble_covariance(ase.view()).view());
    }

    info!("ensemble smoother: {} steps in {:?}, {} without convergence",
          steps, start.elapsed(), nonconverged);

    Ok(())
  }

  /// `SE = X_i + J (ASE − X_prior_{i+1})` with the ensemble RTS gain
  /// `J = X̄_i X̄_prior_{i+1}ᵗ pinv(X̄_prior_{i+1} X̄_prior_{i+1}ᵗ)`.
  fn candidate(&self, history: &History, i: usize,
               ase: &Array<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    let x_bar = history.posterior_anomalies(i);
    let prior_bar = history.prior_anomalies(i + 1);

    let gram = prior_bar.dot(&prior_bar.t());
    let gain = x_bar.dot(&prior_bar.t())
      .dot(&pseudo_inverse(gram.view())?);

    let mut se = history.posterior(i).to_owned();
    se += &gain.dot(&(ase - &history.prior(i + 1)));
    Ok(se)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::kalman::{EnsembleTransformFilter, RunOptions};
  use na_core::linear_model;
  use nd::arr2;
  use rand::SeedableRng;
  use rand::rngs::StdRng;

  fn scalar_setup(n: usize) -> (na_core::LinearModel, Init) {
    let model = linear_model(arr2(&[[0.9]]), arr2(&[[1.0]])).unwrap();
    let init = Init::for_model(&model, n)
      .with_initial_covariance(arr2(&[[0.1]]))
      .with_process_covariance(arr2(&[[0.1]]))
      .with_observation_covariance(arr2(&[[0.1]]));
    (model, init)
  }

  #[test]
  fn requires_history() {
    let (model, init) = scalar_setup(20);
    let f = EnsembleTransformFilter::new(&model, init.clone()).unwrap();
    let z = arr2(&[[1.0], [0.5]]);
    let out = f.run(z.view(), RunOptions::default(), &mut StdRng::seed_from_u64(2))
      .unwrap();

    let s = EnsembleSmoother::new(&model, &init, EnsembleMeanSolver,
                                  SmootherConfig::default())
      .unwrap();
    match s.smooth(&out) {
      Err(Error::HistoryUnavailable) => {},
      r => panic!("unexpected: {:?}", r),
    }

    // a history from a different run length
    let longer = f.run(arr2(&[[1.0], [0.5], [0.1]]).view(), RunOptions::all(),
                       &mut StdRng::seed_from_u64(2))
      .unwrap();
    let mut states = out.states.clone();
    match s.smooth_in_place(longer.history.as_ref(), &mut states) {
      Err(Error::HistoryUnavailable) => {},
      r => panic!("unexpected: {:?}", r),
    }
  }

  #[test]
  fn last_step_untouched() {
    let (model, init) = scalar_setup(50);
    let f = EnsembleTransformFilter::new(&model, init.clone()).unwrap();
    let z = arr2(&[[1.0], [0.5], [-0.2]]);
    let out = f.run(z.view(), RunOptions::all(), &mut StdRng::seed_from_u64(4))
      .unwrap();

    let s = EnsembleSmoother::new(&model, &init, LbfgsbSolver::default(),
                                  SmootherConfig::default())
      .unwrap();
    let smoothed = s.smooth(&out).unwrap();
    assert_eq!(smoothed.mean(2), out.states.mean(2));
    assert_eq!(smoothed.covariance(2), out.states.covariance(2));
    assert!(smoothed.mean(0) != out.states.mean(0));
  }

  #[test]
  fn process_penalty_dimension() {
    let model = linear_model(Array::eye(2), arr2(&[[1.0, 0.0]])).unwrap();
    let init = Init::for_model(&model, 30);
    let s = EnsembleSmoother::new(&model, &init, EnsembleMeanSolver,
                                  SmootherConfig {
                                    penalty: PenaltyCovariance::Process,
                                    strict_convergence: false,
                                  })
      .unwrap();
    assert_eq!(s.penalty.dim(), 2);

    let s = EnsembleSmoother::new(&model, &init, EnsembleMeanSolver,
                                  SmootherConfig::default())
      .unwrap();
    assert_eq!(s.penalty.dim(), 1);
  }

  #[test]
  fn strict_convergence() {
    struct NeverConverges;
    impl LocalMapSolver for NeverConverges {
      fn solve<M>(&self, problem: &MapProblem<M>) -> Result<MapSolution>
        where M: StateSpaceModel + ?Sized,
      {
        let mut s = EnsembleMeanSolver.solve(problem)?;
        s.converged = false;
        s.message = "gave up".to_string();
        Ok(s)
      }
    }

    let (model, init) = scalar_setup(20);
    let f = EnsembleTransformFilter::new(&model, init.clone()).unwrap();
    let z = arr2(&[[1.0], [0.5], [0.0]]);
    let out = f.run(z.view(), RunOptions::all(), &mut StdRng::seed_from_u64(8))
      .unwrap();

    let lenient = EnsembleSmoother::new(&model, &init, NeverConverges,
                                        SmootherConfig::default())
      .unwrap();
    let plain = EnsembleSmoother::new(&model, &init, EnsembleMeanSolver,
                                      SmootherConfig::default())
      .unwrap();
    assert_eq!(lenient.smooth(&out).unwrap(), plain.smooth(&out).unwrap());

    let strict = EnsembleSmoother::new(&model, &init, NeverConverges,
                                       SmootherConfig {
                                         strict_convergence: true,
                                         ..SmootherConfig::default()
                                       })
      .unwrap();
    match strict.smooth(&out) {
      Err(Error::OptimizationNonconvergence { step: 1, .. }) => {},
      r => panic!("unexpected: {:?}", r),
    }
  }
}
