//! Constraint sets of the admixture model and the least-squares solves that feed them.

use crate::error::AdmixError;
use crate::faer_ndarray::{FaerCholesky, FaerLinalgError};
use faer::Side;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayViewMut1, Axis};
use std::cmp::Ordering;

const RIDGE_INITIAL: f64 = 1e-10;
const RIDGE_GROWTH: f64 = 100.0;
const RIDGE_ATTEMPTS: usize = 6;

/// Clamps every entry to [0, 1].
pub fn clip_unit_interval(matrix: &mut Array2<f64>) {
    matrix.par_mapv_inplace(|v| v.clamp(0.0, 1.0));
}

/// Euclidean projection of a vector onto the probability simplex.
pub fn project_simplex(mut v: ArrayViewMut1<'_, f64>) {
    if v.is_empty() {
        return;
    }
    let mut sorted: Vec<f64> = v.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

    let mut cumulative = 0.0;
    let mut theta = 0.0;
    for (j, &u_j) in sorted.iter().enumerate() {
        cumulative += u_j;
        let candidate = (cumulative - 1.0) / (j as f64 + 1.0);
        if u_j - candidate > 0.0 {
            theta = candidate;
        }
    }
    v.mapv_inplace(|x| (x - theta).max(0.0));
}

/// Projects every column of `matrix` onto the probability simplex.
pub fn project_columns_to_simplex(matrix: &mut Array2<f64>) {
    matrix
        .axis_iter_mut(Axis(1))
        .into_par_iter()
        .for_each(project_simplex);
}

/// Root mean squared difference of two equally shaped matrices.
pub fn rmse(lhs: &Array2<f64>, rhs: &Array2<f64>) -> f64 {
    debug_assert_eq!(lhs.dim(), rhs.dim());
    if lhs.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = lhs
        .iter()
        .zip(rhs.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    (sum_sq / lhs.len() as f64).sqrt()
}

fn try_cholesky_solve(gram: &Array2<f64>, rhs: &Array2<f64>) -> Result<Array2<f64>, FaerLinalgError> {
    let factor = gram.cholesky(Side::Lower)?;
    Ok(factor.solve_mat(rhs))
}

/// Solves `gram · Z = rhs` for a symmetric positive semidefinite `gram`.
///
/// A failed or non-finite Cholesky solve is retried with a ridge of
/// 1e-10 · mean(diag(gram)) on the diagonal, growing a hundredfold per attempt.
pub fn solve_normal_equations(
    gram: &Array2<f64>,
    rhs: &Array2<f64>,
) -> Result<Array2<f64>, AdmixError> {
    let mut last_error = match try_cholesky_solve(gram, rhs) {
        Ok(solution) if solution.iter().all(|v| v.is_finite()) => return Ok(solution),
        Ok(_) => None,
        Err(err) => Some(err),
    };

    let k = gram.nrows().max(1);
    let mean_diag = gram.diag().sum() / k as f64;
    let scale = if mean_diag.is_finite() && mean_diag > 0.0 {
        mean_diag
    } else {
        1.0
    };

    let mut ridge = RIDGE_INITIAL * scale;
    for attempt in 1..=RIDGE_ATTEMPTS {
        let mut regularized = gram.clone();
        regularized.diag_mut().mapv_inplace(|v| v + ridge);
        match try_cholesky_solve(&regularized, rhs) {
            Ok(solution) if solution.iter().all(|v| v.is_finite()) => {
                log::warn!(
                    "Normal equations are near-singular; solved with ridge {ridge:.3e} after {attempt} attempt(s)"
                );
                return Ok(solution);
            }
            Ok(_) => {}
            Err(err) => last_error = Some(err),
        }
        ridge *= RIDGE_GROWTH;
    }

    match last_error {
        Some(err) => Err(AdmixError::Linalg(err)),
        None => Err(AdmixError::InvalidOptions(
            "normal equations produced non-finite solutions even with regularization".to_string(),
        )),
    }
}
