
use nd::{Array, Ix1, Ix2};

use na_core::StateSpaceModel;

use crate::error::{Error, Result, check_shape};

pub mod etf;
pub mod kf;

pub use self::etf::{EnsembleTransformFilter, FilterOutput};
pub use self::kf::{LinearKalman, KalmanOutput};

/// Filter initialization. Defaults are a zero initial mean and identity
/// covariances.
#[derive(Clone, Debug)]
pub struct Init {
  pub ensemble_count: usize,
  pub initial_mean: Array<f64, Ix1>,
  /// `P`
  pub initial_covariance: Array<f64, Ix2>,
  /// `Q`
  pub process_covariance: Array<f64, Ix2>,
  /// `R`
  pub observation_covariance: Array<f64, Ix2>,
}

impl Init {
  pub fn new(ensemble_count: usize, dim_x: usize, dim_z: usize) -> Init {
    Init {
      ensemble_count,
      initial_mean: Array::zeros(dim_x),
      initial_covariance: Array::eye(dim_x),
      process_covariance: Array::eye(dim_x),
      observation_covariance: Array::eye(dim_z),
    }
  }
  pub fn for_model<M>(model: &M, ensemble_count: usize) -> Init
    where M: StateSpaceModel + ?Sized,
  {
    Init::new(ensemble_count, model.state_dim(), model.observation_dim())
  }

  pub fn with_initial_mean(mut self, x: Array<f64, Ix1>) -> Init {
    self.initial_mean = x;
    self
  }
  pub fn with_initial_covariance(mut self, p: Array<f64, Ix2>) -> Init {
    self.initial_covariance = p;
    self
  }
  pub fn with_process_covariance(mut self, q: Array<f64, Ix2>) -> Init {
    self.process_covariance = q;
    self
  }
  pub fn with_observation_covariance(mut self, r: Array<f64, Ix2>) -> Init {
    self.observation_covariance = r;
    self
  }

  pub fn state_dim(&self) -> usize { self.initial_mean.len() }
  pub fn observation_dim(&self) -> usize { self.observation_covariance.nrows() }

  /// Checks the ensemble size and every shape against `model`.
  pub fn validate<M>(&self, model: &M) -> Result<()>
    where M: StateSpaceModel + ?Sized,
  {
    if self.ensemble_count < 2 {
      return Err(Error::InvalidEnsembleSize(self.ensemble_count));
    }
    self.validate_shapes(model)
  }

  /// Like `validate`, without the ensemble size.
  pub fn validate_shapes<M>(&self, model: &M) -> Result<()>
    where M: StateSpaceModel + ?Sized,
  {
    let n = model.state_dim();
    let m = model.observation_dim();
    check_shape("initial mean", n, self.initial_mean.len())?;
    check_square("initial covariance", n, &self.initial_covariance)?;
    check_square("process covariance", n, &self.process_covariance)?;
    check_square("observation covariance", m, &self.observation_covariance)?;

    Ok(())
  }
}

fn check_square(what: &'static str, n: usize, a: &Array<f64, Ix2>) -> Result<()> {
  check_shape(what, n, a.nrows())?;
  check_shape(what, n, a.ncols())
}

/// What a filter run keeps besides the per-step means and covariances.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunOptions {
  /// Retain the ensembles of every step, which the smoother needs.
  pub store: bool,
  /// Accumulate the log-likelihood of the observations.
  pub calc_ll: bool,
}
impl RunOptions {
  pub fn all() -> RunOptions {
    RunOptions {
      store: true,
      calc_ll: true,
    }
  }
}
