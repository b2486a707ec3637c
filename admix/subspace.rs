use crate::correction::{CorrectedGram, corrected_gram};
use crate::error::AdmixError;
use crate::faer_ndarray::{FaerEigh, SortedEigenpairs, partial_top_eigh};
use crate::types::{Rowspace, SvdMethod};
use ndarray::{Array2, ArrayView2, Axis};

/// Below this size the partial solver has no advantage over a dense decomposition.
const DENSE_EIGEN_FALLBACK_THRESHOLD: usize = 64;

/// Estimates the d-dimensional latent subspace spanned by the rows of Q.
///
/// # Arguments
/// * `x`: m×n genotype matrix with entries in {0, 1, 2}.
/// * `d`: number of leading eigenpairs to return, `1 <= d <= n`.
/// * `method`: exact full decomposition or truncated partial solve.
pub fn estimate_subspace(
    x: ArrayView2<'_, f64>,
    d: usize,
    method: SvdMethod,
) -> Result<Rowspace, AdmixError> {
    let corrected = corrected_gram(x)?;
    rowspace_from_gram(&corrected, d, method)
}

/// Leading eigenpairs of an already corrected Gram matrix.
pub(crate) fn rowspace_from_gram(
    corrected: &CorrectedGram,
    d: usize,
    method: SvdMethod,
) -> Result<Rowspace, AdmixError> {
    let n = corrected.n_individuals();
    if d == 0 || d > n {
        return Err(AdmixError::DimensionMismatch(format!(
            "subspace dimension must lie in 1..={n}, got {d}"
        )));
    }

    let pairs = match method {
        SvdMethod::Exact => corrected.gram.top_eigh(d)?,
        SvdMethod::Truncated => truncated_eigenpairs(corrected, d)?,
    };

    let mut vectors = pairs.vectors;
    normalize_signs(&mut vectors);
    log::info!(
        "Rowspace of dimension {} computed ({:?}); leading eigenvalue {:.4}",
        d,
        method,
        pairs.values[0]
    );

    Ok(Rowspace {
        vectors,
        values: pairs.values,
    })
}

fn truncated_eigenpairs(
    corrected: &CorrectedGram,
    d: usize,
) -> Result<SortedEigenpairs, AdmixError> {
    let n = corrected.n_individuals();
    // The Krylov basis grows to 2·d vectors and must stay strictly smaller than n.
    if n <= DENSE_EIGEN_FALLBACK_THRESHOLD || d + 8 >= n || 2 * d >= n {
        return Ok(corrected.gram.top_eigh(d)?);
    }

    // G + diag(δ) = XᵗX/m is PSD, so G + max(δ)·I is as well and its largest
    // magnitude eigenvalues are the largest algebraic ones of G.
    let shift = corrected.max_correction();
    let mut shifted = corrected.gram.clone();
    shifted.diag_mut().mapv_inplace(|value| value + shift);

    match partial_top_eigh(&shifted, d) {
        Ok(mut pairs) => {
            pairs.values.mapv_inplace(|value| value - shift);
            Ok(pairs)
        }
        Err(err) => {
            log::warn!("Truncated eigensolver failed ({err}); falling back to a dense decomposition");
            Ok(corrected.gram.top_eigh(d)?)
        }
    }
}

/// Flips each eigenvector so its entry of largest magnitude is positive.
fn normalize_signs(vectors: &mut Array2<f64>) {
    for mut column in vectors.axis_iter_mut(Axis(1)) {
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }
}
