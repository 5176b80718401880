
use nd::{ArrayViewMut, Ix2};

use rand::Rng;

use crate::error::Result;
use crate::stats::MultivariateNormal;

/// Which noise buffer of a workspace to refill.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Forcing {
  /// `eps ~ N(0, Q)`, added to the state before the transition.
  Process,
  /// `mu ~ N(0, R)`, added to the model observations.
  Observation,
}

pub trait ResampleForcing {
  type Disc;
  fn forcing_view_mut(&mut self,
                      disc: Self::Disc) -> ArrayViewMut<f64, Ix2>;

  /// Refill every column of the selected buffer with a fresh draw.
  fn resample_forcing<R>(&mut self,
                         disc: Self::Disc,
                         sampler: &MultivariateNormal,
                         rand: &mut R) -> Result<()>
    where R: Rng + ?Sized,
  {
    let r = self.forcing_view_mut(disc);
    sampler.sample_into(r, rand)
  }
}
