//! Multivariate Gaussian log-density and sampling.

use nd::{Array, ArrayView, ArrayViewMut, Axis, Ix1, Ix2};
use nd::linalg::general_mat_mul;
use nd_rand::RandomExt;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::error::{Result, check_shape};
use crate::utils::{Cholesky, to_dmatrix};

const LN_2PI: f64 = 1.8378770664093453;

/// A Gaussian with a factorized covariance, for repeated density
/// evaluations against the same distribution.
#[derive(Debug, Clone)]
pub struct Gaussian {
  mean: Array<f64, Ix1>,
  chol: Cholesky,
}

impl Gaussian {
  pub fn new(mean: Array<f64, Ix1>, covariance: ArrayView<f64, Ix2>,
             what: &'static str) -> Result<Gaussian> {
    check_shape(what, mean.len(), covariance.nrows())?;
    let chol = Cholesky::factor(covariance, what)?;
    Ok(Gaussian { mean, chol, })
  }

  pub fn zero_mean(covariance: ArrayView<f64, Ix2>,
                   what: &'static str) -> Result<Gaussian> {
    Gaussian::new(Array::zeros(covariance.nrows()), covariance, what)
  }

  pub fn dim(&self) -> usize { self.mean.len() }
  pub fn mean(&self) -> ArrayView<f64, Ix1> { self.mean.view() }
  pub fn cholesky(&self) -> &Cholesky { &self.chol }

  pub fn log_density_at(&self, x: ArrayView<f64, Ix1>) -> Result<f64> {
    check_shape("log-density point", self.dim(), x.len())?;

    let d = &x - &self.mean;
    let w = self.chol.whiten(d.view());
    let maha = w.dot(&w);

    Ok(-0.5 * (self.dim() as f64 * LN_2PI + self.chol.log_det() + maha))
  }
}

/// `log N(x; mean, cov)`
pub fn log_density(x: ArrayView<f64, Ix1>,
                   mean: ArrayView<f64, Ix1>,
                   cov: ArrayView<f64, Ix2>) -> Result<f64> {
  Gaussian::new(mean.to_owned(), cov, "density covariance")?
    .log_density_at(x)
}

/// Sampler for `N(mean, cov)` with a positive semi-definite `cov`. The
/// covariance is factored as `V √Λ` from its symmetric eigendecomposition,
/// so singular covariances (e.g. a zero process noise) are fine.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
  mean: Array<f64, Ix1>,
  factor: Array<f64, Ix2>,
}

impl MultivariateNormal {
  pub fn new(mean: Array<f64, Ix1>, cov: ArrayView<f64, Ix2>) -> Result<MultivariateNormal> {
    let n = mean.len();
    check_shape("sampler covariance rows", n, cov.nrows())?;
    check_shape("sampler covariance columns", n, cov.ncols())?;

    let eig = to_dmatrix(cov).symmetric_eigen();
    let factor = Array::from_shape_fn((n, n), |(i, j)| {
      eig.eigenvectors[(i, j)] * eig.eigenvalues[j].max(0.0).sqrt()
    });

    Ok(MultivariateNormal { mean, factor, })
  }

  pub fn zero_mean(cov: ArrayView<f64, Ix2>) -> Result<MultivariateNormal> {
    MultivariateNormal::new(Array::zeros(cov.nrows()), cov)
  }

  pub fn dim(&self) -> usize { self.mean.len() }
  pub fn mean(&self) -> ArrayView<f64, Ix1> { self.mean.view() }

  /// Fills every column of `out` with an independent draw.
  pub fn sample_into<R>(&self, out: ArrayViewMut<f64, Ix2>, rand: &mut R) -> Result<()>
    where R: Rng + ?Sized,
  {
    check_shape("sample rows", self.dim(), out.nrows())?;
    self.fill(out, rand);
    Ok(())
  }

  /// `dim × n` matrix of independent draws, one per column.
  pub fn sample_columns<R>(&self, n: usize, rand: &mut R) -> Array<f64, Ix2>
    where R: Rng + ?Sized,
  {
    let mut out = Array::zeros((self.dim(), n));
    self.fill(out.view_mut(), rand);
    out
  }

  fn fill<R>(&self, mut out: ArrayViewMut<f64, Ix2>, rand: &mut R)
    where R: Rng + ?Sized,
  {
    let z: Array<f64, Ix2> = Array::random_using(out.dim(), StandardNormal, rand);
    general_mat_mul(1.0, &self.factor, &z, 0.0, &mut out);
    out += &self.mean.view().insert_axis(Axis(1));
  }
}

impl Distribution<Array<f64, Ix1>> for MultivariateNormal {
  fn sample<R: Rng + ?Sized>(&self, rand: &mut R) -> Array<f64, Ix1> {
    let z: Array<f64, Ix1> = Array::random_using(self.dim(), StandardNormal, rand);
    self.factor.dot(&z) + &self.mean
  }
}
