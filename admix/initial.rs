use crate::constraints::{clip_unit_interval, project_columns_to_simplex, solve_normal_equations};
use crate::correction::{CorrectedGram, corrected_gram};
use crate::error::AdmixError;
use crate::subspace::rowspace_from_gram;
use crate::types::{InitialFactors, Rowspace, SvdMethod};
use ndarray::{Array2, ArrayView2, Axis};

/// Residual norms below this are treated as exhausted directions during anchor search.
const ANCHOR_RESIDUAL_EPSILON: f64 = 1e-12;

/// Direct allele-frequency estimate F = ½·X·V·Vᵗ clipped to [0, 1].
///
/// `F` doubles as the target that the refiner factorises, and its rowspace is
/// returned alongside so the caller does not need a second decomposition.
pub fn estimate_initial_factors(
    x: ArrayView2<'_, f64>,
    d: usize,
    method: SvdMethod,
) -> Result<InitialFactors, AdmixError> {
    let corrected = corrected_gram(x)?;
    initial_factors_from_gram(x, &corrected, d, method)
}

pub(crate) fn initial_factors_from_gram(
    x: ArrayView2<'_, f64>,
    corrected: &CorrectedGram,
    d: usize,
    method: SvdMethod,
) -> Result<InitialFactors, AdmixError> {
    let rowspace = rowspace_from_gram(corrected, d, method)?;
    let f = project_frequencies(x, &rowspace);
    Ok(InitialFactors { f, rowspace })
}

fn project_frequencies(x: ArrayView2<'_, f64>, rowspace: &Rowspace) -> Array2<f64> {
    let v = &rowspace.vectors;
    // (X·V)·Vᵗ keeps the intermediate at m×d instead of forming the n×n projector.
    let mut f = x.dot(v).dot(&v.t());
    f.mapv_inplace(|value| 0.5 * value);
    clip_unit_interval(&mut f);
    f
}

/// Picks d anchor individuals by successive projection on the rows of V.
///
/// Each step takes the individual with the largest residual norm and removes
/// its direction from every residual. Once the residuals are exhausted the
/// lowest-index unused individual is taken instead.
pub(crate) fn select_anchors(vectors: &Array2<f64>) -> Vec<usize> {
    let (n, d) = vectors.dim();
    let mut residual = vectors.to_owned();
    let mut anchors: Vec<usize> = Vec::with_capacity(d);

    for _ in 0..d.min(n) {
        let mut best: Option<(usize, f64)> = None;
        for (idx, row) in residual.axis_iter(Axis(0)).enumerate() {
            if anchors.contains(&idx) {
                continue;
            }
            let norm_sq = row.dot(&row);
            if best.is_none_or(|(_, best_norm)| norm_sq > best_norm) {
                best = Some((idx, norm_sq));
            }
        }

        let Some((chosen, norm_sq)) = best else {
            break;
        };

        if norm_sq.sqrt() <= ANCHOR_RESIDUAL_EPSILON {
            log::warn!(
                "Rowspace exhausted after {} anchors; filling with the first unused individual",
                anchors.len()
            );
            if let Some(fallback) = (0..n).find(|idx| !anchors.contains(idx)) {
                anchors.push(fallback);
            }
            continue;
        }

        let direction = residual.row(chosen).mapv(|v| v / norm_sq.sqrt());
        for mut row in residual.axis_iter_mut(Axis(0)) {
            let coefficient = row.dot(&direction);
            row.scaled_add(-coefficient, &direction);
        }
        anchors.push(chosen);
    }

    anchors
}

/// Deterministic starting pair for the refiner.
///
/// P₀ holds the columns of `f` at the anchor individuals; Q₀ is the least-squares
/// fit of `f` on P₀ with every column projected onto the simplex.
pub fn seed_factors(
    f: &Array2<f64>,
    rowspace: &Rowspace,
) -> Result<(Array2<f64>, Array2<f64>), AdmixError> {
    if f.ncols() != rowspace.vectors.nrows() {
        return Err(AdmixError::DimensionMismatch(format!(
            "F has {} individuals but the rowspace has {}",
            f.ncols(),
            rowspace.vectors.nrows()
        )));
    }

    let anchors = select_anchors(&rowspace.vectors);
    log::debug!("Seeding populations from anchor individuals {anchors:?}");

    let p0 = f.select(Axis(1), &anchors);
    let gram = p0.t().dot(&p0);
    let rhs = p0.t().dot(f);
    let mut q0 = solve_normal_equations(&gram, &rhs)?;
    project_columns_to_simplex(&mut q0);
    Ok((p0, q0))
}
