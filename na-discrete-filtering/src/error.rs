use na_core;
use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("shape mismatch in {what}: expected {expected}, got {got}")]
  ShapeMismatch {
    what: &'static str,
    expected: usize,
    got: usize,
  },
  #[error("ensemble size must be at least 2, got {0}")]
  InvalidEnsembleSize(usize),
  #[error("{0} is singular or too ill-conditioned to invert")]
  SingularCovariance(&'static str),
  #[error("no retained ensemble history covers the requested trajectory")]
  HistoryUnavailable,
  #[error("MAP optimization did not converge at step {step}: {reason}")]
  OptimizationNonconvergence {
    step: usize,
    reason: String,
  },
  #[error("optimizer failure: {0}")]
  Optimizer(String),
  /// Failures raised by the model itself. Dimension mismatches reported by
  /// a model become `ShapeMismatch` instead.
  #[error(transparent)]
  Model(na_core::Error),
}

impl From<na_core::Error> for Error {
  fn from(e: na_core::Error) -> Error {
    match e {
      na_core::Error::DimensionMismatch { what, expected, got, } => {
        Error::ShapeMismatch { what, expected, got, }
      },
      e => Error::Model(e),
    }
  }
}

pub(crate) fn check_shape(what: &'static str, expected: usize, got: usize) -> Result<()> {
  if expected != got {
    Err(Error::ShapeMismatch { what, expected, got, })
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn model_dimension_errors_are_shape_mismatches() {
    let e = Error::from(na_core::Error::DimensionMismatch {
      what: "transition output",
      expected: 3,
      got: 2,
    });
    match e {
      Error::ShapeMismatch { what: "transition output", expected: 3, got: 2 } => {},
      e => panic!("unexpected: {:?}", e),
    }

    match Error::from(na_core::Error::Evaluation("nan".into())) {
      Error::Model(na_core::Error::Evaluation(_)) => {},
      e => panic!("unexpected: {:?}", e),
    }
  }
}
