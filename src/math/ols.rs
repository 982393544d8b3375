//! Least squares solver.
//!
//! The extraction pipeline repeatedly solves small linear regression problems:
//! the amplitude/phase of one or a few sinusoids at fixed frequencies is linear
//! in the `sin`/`cos` quadrature coefficients, so a tiny OLS solve gives the
//! exact best fit without any iteration.
//!
//! Implementation choices:
//! - SVD solve, robust for tall design matrices (many samples, 2-10 columns).
//! - Progressively looser tolerances: quadrature columns become nearly
//!   collinear for frequencies close to the spectral resolution, and a looser
//!   tolerance still produces a usable fit there.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
