use crate::error::AdmixError;
use crate::types::{OrderMethod, Rowspace};
use ndarray::{Array2, ArrayView1, Axis};
use std::cmp::Ordering;

/// Eigen-R² of one population's admixture proportions against the rowspace.
///
/// Each eigenvector contributes the R² of a simple regression (with intercept)
/// of `y` on it, weighted by its eigenvalue. Negative eigenvalues get zero weight;
/// if every weight vanishes the eigenvectors are weighted equally.
pub fn eigen_r2(y: ArrayView1<'_, f64>, rowspace: &Rowspace) -> f64 {
    let n = y.len();
    if n < 2 {
        return 0.0;
    }
    let y_mean = y.mean().unwrap_or(0.0);
    let y_ss: f64 = y.iter().map(|v| (v - y_mean) * (v - y_mean)).sum();
    if y_ss <= 0.0 {
        return 0.0;
    }

    let weights: Vec<f64> = rowspace.values.iter().map(|&v| v.max(0.0)).collect();
    let total: f64 = weights.iter().sum();
    let weights: Vec<f64> = if total > 0.0 {
        weights.iter().map(|w| w / total).collect()
    } else {
        vec![1.0 / weights.len().max(1) as f64; weights.len()]
    };

    rowspace
        .vectors
        .axis_iter(Axis(1))
        .zip(weights)
        .map(|(v, weight)| {
            let v_mean = v.mean().unwrap_or(0.0);
            let mut cross = 0.0;
            let mut v_ss = 0.0;
            for (&yi, &vi) in y.iter().zip(v.iter()) {
                cross += (yi - y_mean) * (vi - v_mean);
                v_ss += (vi - v_mean) * (vi - v_mean);
            }
            if v_ss <= 0.0 {
                0.0
            } else {
                weight * cross * cross / (v_ss * y_ss)
            }
        })
        .sum()
}

fn descending_order(scores: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    // Stable sort keeps the original index order among ties.
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    order
}

/// Permutation of the populations by the chosen criterion, most informative first.
pub fn population_order(q: &Array2<f64>, rowspace: &Rowspace, method: OrderMethod) -> Vec<usize> {
    let scores: Vec<f64> = match method {
        OrderMethod::AveAdmixture => q
            .axis_iter(Axis(0))
            .map(|row| row.mean().unwrap_or(0.0))
            .collect(),
        OrderMethod::VarExplained => q
            .axis_iter(Axis(0))
            .map(|row| eigen_r2(row, rowspace))
            .collect(),
    };
    log::debug!("Population scores for {method:?} ordering: {scores:?}");
    descending_order(&scores)
}

/// Applies `order` to the rows of Q and the matching columns of P.
pub fn apply_order(
    p: &Array2<f64>,
    q: &Array2<f64>,
    order: &[usize],
) -> Result<(Array2<f64>, Array2<f64>), AdmixError> {
    let d = q.nrows();
    if p.ncols() != d || order.len() != d {
        return Err(AdmixError::DimensionMismatch(format!(
            "cannot reorder {} populations of P and {} of Q with a permutation of length {}",
            p.ncols(),
            d,
            order.len()
        )));
    }
    let mut seen = vec![false; d];
    for &idx in order {
        if idx >= d || seen[idx] {
            return Err(AdmixError::DimensionMismatch(format!(
                "{order:?} is not a permutation of 0..{d}"
            )));
        }
        seen[idx] = true;
    }
    Ok((p.select(Axis(1), order), q.select(Axis(0), order)))
}
