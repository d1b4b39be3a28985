//! Least squares solvers.
//!
//! The linear regressors repeatedly solve small problems of the form:
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2  (+ α ||β||^2 for ridge)
//! ```
//!
//! Implementation choices:
//! - Weighted problems scale rows by `sqrt(w_i)` and reuse the ordinary solver.
//! - Ordinary least squares uses SVD so tall and rank-deficient design matrices
//!   (e.g. a constant `holiday` column) still produce a minimum-norm solution.
//! - Ridge solves the regularised normal equations with Cholesky and falls back
//!   to SVD when the system is not positive definite.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Weighted least squares via row scaling.
pub fn solve_weighted_least_squares(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    w: &[f64],
) -> Option<DVector<f64>> {
    if w.len() != x.nrows() || w.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return None;
    }
    let mut xw = x.clone();
    let mut yw = y.clone();
    for (i, &wi) in w.iter().enumerate() {
        let sw = wi.sqrt();
        xw.row_mut(i).scale_mut(sw);
        yw[i] *= sw;
    }
    solve_least_squares(&xw, &yw)
}

/// Ridge regression without intercept: `(X^T X + α I) β = X^T y`.
///
/// Callers center `X` and `y` first so the intercept stays unpenalised.
pub fn solve_ridge(x: &DMatrix<f64>, y: &DVector<f64>, alpha: f64) -> Option<DVector<f64>> {
    if !(alpha.is_finite() && alpha >= 0.0) {
        return None;
    }
    let xt = x.transpose();
    let mut gram = &xt * x;
    for i in 0..gram.nrows() {
        gram[(i, i)] += alpha;
    }
    let rhs = &xt * y;

    if let Some(chol) = gram.clone().cholesky() {
        let beta = chol.solve(&rhs);
        if beta.iter().all(|v| v.is_finite()) {
            return Some(beta);
        }
    }
    solve_least_squares(&gram, &rhs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn least_squares_handles_constant_column() {
        // Second column duplicates the intercept; SVD still returns a finite fit.
        let x = DMatrix::from_row_slice(3, 3, &[1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[1.0, 3.0, 5.0]);
        let beta = solve_least_squares(&x, &y).unwrap();
        let fit = &x * &beta;
        for i in 0..3 {
            assert!((fit[i] - y[i]).abs() < 1e-8);
        }
    }

    #[test]
    fn zero_weight_rows_are_ignored() {
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 100.0]);
        let beta = solve_weighted_least_squares(&x, &y, &[1.0, 1.0, 0.0]).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-8);
        assert!((beta[1] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn ridge_shrinks_towards_zero() {
        let x = DMatrix::from_row_slice(4, 1, &[-1.5, -0.5, 0.5, 1.5]);
        let y = DVector::from_row_slice(&[-3.0, -1.0, 1.0, 3.0]);
        let ols = solve_ridge(&x, &y, 0.0).unwrap();
        let ridge = solve_ridge(&x, &y, 5.0).unwrap();
        assert!((ols[0] - 2.0).abs() < 1e-10);
        assert!(ridge[0].abs() < ols[0].abs());
        assert!(ridge[0] > 0.0);
    }
}
