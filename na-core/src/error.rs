use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{what}: expected dimension {expected}, got {got}")]
  DimensionMismatch {
    what: &'static str,
    expected: usize,
    got: usize,
  },
  #[error("model evaluation failed: {0}")]
  Evaluation(String),
}

pub fn check_dim(what: &'static str, expected: usize, got: usize) -> Result<()> {
  if expected != got {
    Err(Error::DimensionMismatch { what, expected, got, })
  } else {
    Ok(())
  }
}
