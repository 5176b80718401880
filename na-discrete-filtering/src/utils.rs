use na::DMatrix;
use na::linalg::SVD;
use nd::{Array, ArrayView, Ix1, Ix2, s};

use crate::error::{Error, Result, check_shape};

/// Upper triangular factor `R` of a symmetric positive definite matrix,
/// `A = RᵗR`.
///
/// Not `na::Cholesky`: that one only rejects non-positive pivots, while
/// rank deficient ensemble covariances show up as pivots that are merely
/// tiny relative to the diagonal.
#[derive(Debug, Clone)]
pub struct Cholesky {
  upper: Array<f64, Ix2>,
}

impl Cholesky {
  /// Fails with `SingularCovariance(what)` if a pivot is not clearly
  /// positive relative to the scale of `a`.
  pub fn factor(a: ArrayView<f64, Ix2>, what: &'static str) -> Result<Cholesky> {
    let m = a.nrows();
    check_shape(what, m, a.ncols())?;

    let scale = a.diag()
      .iter()
      .fold(0.0f64, |acc, v| acc.max(v.abs()));
    let tol = m as f64 * ::std::f64::EPSILON * scale;

    let mut r = a.to_owned();
    for k in 0..m {
      let pivot = r[[k, k]];
      if !(pivot > tol) {
        return Err(Error::SingularCovariance(what));
      }

      for j in k + 1..m {
        let factor = r[[k, j]] / pivot;
        for l in j..m {
          r[[j, l]] -= r[[k, l]] * factor;
        }
      }

      let t = pivot.sqrt().recip();
      r.row_mut(k)
        .slice_mut(s![k..])
        .mapv_inplace(|v| v * t);
    }

    for k in 0..m {
      r.row_mut(k)
        .slice_mut(s![..k])
        .fill(0.0);
    }

    Ok(Cholesky { upper: r })
  }

  pub fn dim(&self) -> usize { self.upper.nrows() }
  pub fn upper(&self) -> ArrayView<f64, Ix2> { self.upper.view() }

  pub fn log_det(&self) -> f64 {
    2.0 * self.upper.diag().iter().map(|v| v.ln()).sum::<f64>()
  }

  /// `R⁻ᵗ b`; `|R⁻ᵗ b|²` is the Mahalanobis form `bᵗ A⁻¹ b`.
  pub fn whiten(&self, b: ArrayView<f64, Ix1>) -> Array<f64, Ix1> {
    let r = &self.upper;
    let m = self.dim();
    let mut y = b.to_owned();
    for k in 0..m {
      let mut v = y[k];
      for i in 0..k {
        v -= r[[i, k]] * y[i];
      }
      y[k] = v / r[[k, k]];
    }
    y
  }

  /// `A⁻¹ b`
  pub fn solve(&self, b: ArrayView<f64, Ix1>) -> Result<Array<f64, Ix1>> {
    check_shape("cholesky solve", self.dim(), b.len())?;

    let r = &self.upper;
    let m = self.dim();
    let mut x = self.whiten(b);
    for k in (0..m).rev() {
      let mut v = x[k];
      for i in k + 1..m {
        v -= r[[k, i]] * x[i];
      }
      x[k] = v / r[[k, k]];
    }
    Ok(x)
  }

  /// `A⁻¹ B`, column by column.
  pub fn solve_multi(&self, b: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>> {
    check_shape("cholesky solve", self.dim(), b.nrows())?;

    let mut out = Array::zeros(b.dim());
    for (j, col) in b.columns().into_iter().enumerate() {
      out.column_mut(j).assign(&self.solve(col)?);
    }
    Ok(out)
  }

  pub fn inverse(&self) -> Result<Array<f64, Ix2>> {
    let eye = Array::eye(self.dim());
    self.solve_multi(eye.view())
  }
}

pub fn to_dmatrix(a: ArrayView<f64, Ix2>) -> DMatrix<f64> {
  DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array<f64, Ix2> {
  Array::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Relative cutoff for singular values in `pseudo_inverse`.
pub const PINV_RCOND: f64 = 1e-15;

/// Moore–Penrose pseudo-inverse via SVD. Singular values at or below
/// `PINV_RCOND * σ_max` are treated as zero.
pub fn pseudo_inverse(a: ArrayView<f64, Ix2>) -> Result<Array<f64, Ix2>> {
  let svd = SVD::new(to_dmatrix(a), true, true);
  let sigma_max = svd.singular_values
    .iter()
    .fold(0.0f64, |acc, &v| acc.max(v));
  let pinv = svd.pseudo_inverse(PINV_RCOND * sigma_max)
    .map_err(|_| Error::SingularCovariance("pseudo-inverse operand"))?;
  Ok(from_dmatrix(&pinv))
}

pub fn is_symmetric(a: ArrayView<f64, Ix2>, tol: f64) -> bool {
  a.nrows() == a.ncols() &&
    a.indexed_iter()
    .all(|((i, j), &v)| (v - a[[j, i]]).abs() <= tol)
}

#[cfg(test)]
mod test {
  use super::*;
  use nd::{arr1, arr2};

  #[test]
  fn cholesky_llstar() {
    let a = arr2(&[
      [4.0, 12.0, -16.0],
      [12.0, 37.0, -43.0],
      [-16.0, -43.0, 98.0],
    ]);

    let l = Cholesky::factor(a.view(), "test")
      .expect("cholesky factorization failed");

    let expected = arr2(&[
      [2.0, 6.0, -8.0],
      [0.0, 1.0, 5.0],
      [0.0, 0.0, 3.0],
    ]);
    assert_eq!(l.upper(), expected);
    assert_relative_eq!(l.log_det(), (36.0f64).ln(), epsilon = 1e-12);
  }

  #[test]
  fn cholesky_solve() {
    let a = arr2(&[
      [4.0, 2.0],
      [2.0, 3.0],
    ]);
    let b = arr1(&[1.0, 2.0]);
    let x = Cholesky::factor(a.view(), "test")
      .unwrap()
      .solve(b.view())
      .unwrap();
    let back = a.dot(&x);
    assert_relative_eq!(back[0], 1.0, epsilon = 1e-12);
    assert_relative_eq!(back[1], 2.0, epsilon = 1e-12);

    let inv = Cholesky::factor(a.view(), "test").unwrap().inverse().unwrap();
    let eye = a.dot(&inv);
    for ((i, j), &v) in eye.indexed_iter() {
      let expected = if i == j { 1.0 } else { 0.0 };
      assert_abs_diff_eq!(v, expected, epsilon = 1e-12);
    }
  }

  #[test]
  fn cholesky_singular() {
    let a = arr2(&[
      [1.0, 1.0],
      [1.0, 1.0],
    ]);
    match Cholesky::factor(a.view(), "rank one") {
      Err(Error::SingularCovariance("rank one")) => {},
      r => panic!("unexpected: {:?}", r),
    }

    let z = Array::<f64, _>::zeros((2, 2));
    assert!(Cholesky::factor(z.view(), "zero").is_err());

    let indefinite = arr2(&[
      [1.0, 0.0],
      [0.0, -1.0],
    ]);
    assert!(Cholesky::factor(indefinite.view(), "indefinite").is_err());
  }

  #[test]
  fn pinv_rank_deficient() {
    // rank one: v vᵗ with v = (1, 2)
    let a = arr2(&[
      [1.0, 2.0],
      [2.0, 4.0],
    ]);
    let p = pseudo_inverse(a.view()).unwrap();
    // pinv(v vᵗ) = v vᵗ / |v|⁴
    for ((i, j), &v) in p.indexed_iter() {
      assert_abs_diff_eq!(v, a[[i, j]] / 25.0, epsilon = 1e-12);
    }
    let apa = a.dot(&p).dot(&a);
    for ((i, j), &v) in apa.indexed_iter() {
      assert_abs_diff_eq!(v, a[[i, j]], epsilon = 1e-10);
    }
  }

  #[test]
  fn pinv_full_rank_is_inverse() {
    let a = arr2(&[
      [2.0, 1.0],
      [1.0, 3.0],
    ]);
    let p = pseudo_inverse(a.view()).unwrap();
    let eye = a.dot(&p);
    assert_abs_diff_eq!(eye[[0, 0]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(eye[[0, 1]], 0.0, epsilon = 1e-12);
    assert_abs_diff_eq!(eye[[1, 1]], 1.0, epsilon = 1e-12);
  }
}
