use eyre::{eyre, Result, WrapErr};
use linfa_linalg::svd::SVD;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_stats::QuantileExt;

/// Relative cut-off below which singular values are treated as zero
const RCOND: f64 = 1e-15;

/// Moore-Penrose pseudoinverse computed from the singular value decomposition
///
/// Singular values smaller than `1e-15` times the largest one are discarded.
pub fn pinv(a: &Array2<f64>) -> Result<Array2<f64>> {
    let (u, s, vt) = a
        .svd(true, true)
        .wrap_err("Singular value decomposition failed")?;
    let u = u.ok_or_else(|| eyre!("SVD did not return the left singular vectors"))?;
    let vt = vt.ok_or_else(|| eyre!("SVD did not return the right singular vectors"))?;

    let cutoff = RCOND * *s.max().wrap_err("Matrix has no singular values")?;
    let s_inv = s.mapv(|si| if si > cutoff { 1.0 / si } else { 0.0 });

    // V * diag(1/s) * U^T
    let v_scaled = vt.t().to_owned() * &s_inv;
    Ok(v_scaled.dot(&u.t()))
}

/// Design matrix with columns `x^degree, ..., x^1` and, if `intercept`, a column of ones
pub fn vandermonde(x: ArrayView1<f64>, degree: usize, intercept: bool) -> Array2<f64> {
    let ncols = if intercept { degree + 1 } else { degree };
    Array2::from_shape_fn((x.len(), ncols), |(i, j)| x[i].powi((degree - j) as i32))
}

/// Least-squares polynomial fit of `y` against `x`, highest degree first
pub fn polyfit(x: ArrayView1<f64>, y: ArrayView1<f64>, degree: usize) -> Result<Array1<f64>> {
    ols(x, y, degree, true)
}

/// Ordinary least squares of `y` on the polynomial terms of `x`, solved through the pseudoinverse
///
/// With `intercept == false` the fit is forced through the origin, and the
/// returned vector has `degree` entries instead of `degree + 1`.
pub fn ols(
    x: ArrayView1<f64>,
    y: ArrayView1<f64>,
    degree: usize,
    intercept: bool,
) -> Result<Array1<f64>> {
    if x.len() != y.len() {
        return Err(eyre!(
            "Cannot fit {} x values against {} y values",
            x.len(),
            y.len()
        ));
    }
    let design = vandermonde(x, degree, intercept);
    Ok(pinv(&design)?.dot(&y))
}

/// Evaluates the polynomial `pp` (highest degree first) at `x` with Horner's scheme
#[inline]
pub fn polyval(pp: ArrayView1<f64>, x: f64) -> f64 {
    pp.iter().fold(0.0, |acc, &p| acc * x + p)
}

/// Evaluates the derivative of the polynomial `pp` at `x`
#[inline]
pub fn polyder(pp: ArrayView1<f64>, x: f64) -> f64 {
    let degree = pp.len().saturating_sub(1);
    pp.iter()
        .take(degree)
        .enumerate()
        .fold(0.0, |acc, (k, &p)| acc * x + p * (degree - k) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(a: &Array1<f64>, b: &Array1<f64>, tol: f64) {
        assert_eq!(a.len(), b.len());
        for (ai, bi) in a.iter().zip(b.iter()) {
            assert!((ai - bi).abs() < tol, "{} != {}", a, b);
        }
    }

    #[test]
    fn test_pinv_of_invertible_matrix() {
        let a = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = pinv(&a).unwrap();
        let identity = a.dot(&inv);
        assert!((identity[[0, 0]] - 1.0).abs() < 1e-10);
        assert!((identity[[1, 1]] - 1.0).abs() < 1e-10);
        assert!(identity[[0, 1]].abs() < 1e-10);
        assert!(identity[[1, 0]].abs() < 1e-10);
    }

    #[test]
    fn test_pinv_rank_deficient() {
        // Two identical columns: A * pinv(A) * A == A still holds
        let a = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let p = pinv(&a).unwrap();
        assert_eq!(p.dim(), (2, 3));
        let back = a.dot(&p).dot(&a);
        for (x, y) in back.iter().zip(a.iter()) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn test_polyfit_exact_line() {
        let x = array![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = x.mapv(|v| 0.75 * v - 0.2);
        let pp = polyfit(x.view(), y.view(), 1).unwrap();
        assert_close(&pp, &array![0.75, -0.2], 1e-10);
    }

    #[test]
    fn test_polyfit_quadratic() {
        let x = array![-2.0, -1.0, 0.0, 1.0, 2.0, 3.0];
        let y = x.mapv(|v| 2.0 * v * v - v + 0.5);
        let pp = polyfit(x.view(), y.view(), 2).unwrap();
        assert_close(&pp, &array![2.0, -1.0, 0.5], 1e-9);
    }

    #[test]
    fn test_ols_through_origin() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![2.0, 4.0, 6.0];
        let pp = ols(x.view(), y.view(), 1, false).unwrap();
        assert_close(&pp, &array![2.0], 1e-10);
    }

    #[test]
    fn test_ols_length_mismatch() {
        let x = array![1.0, 2.0, 3.0];
        let y = array![2.0, 4.0];
        assert!(ols(x.view(), y.view(), 1, true).is_err());
    }

    #[test]
    fn test_vandermonde() {
        let x = array![2.0, 3.0];
        let v = vandermonde(x.view(), 2, true);
        assert_eq!(v, array![[4.0, 2.0, 1.0], [9.0, 3.0, 1.0]]);
        let v = vandermonde(x.view(), 2, false);
        assert_eq!(v, array![[4.0, 2.0], [9.0, 3.0]]);
    }

    #[test]
    fn test_polyval_and_polyder() {
        let pp = array![3.0, -2.0, 1.0];
        assert_eq!(polyval(pp.view(), 2.0), 9.0);
        assert_eq!(polyder(pp.view(), 2.0), 10.0);
        let line = array![0.5, 1.0];
        assert_eq!(polyval(line.view(), 4.0), 3.0);
        assert_eq!(polyder(line.view(), 4.0), 0.5);
        let constant = array![7.0];
        assert_eq!(polyder(constant.view(), 1.0), 0.0);
    }
}
