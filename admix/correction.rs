//! Heteroskedasticity correction of the genotype second-moment matrix.
//!
//! Binomial sampling inflates the diagonal of (1/m)XᵗX by the expected genotype
//! variance of each individual. Removing that term leaves a matrix whose leading
//! eigenspace tracks the row space of the admixture proportions.

use crate::error::AdmixError;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView2, Axis};

/// Ploidy used by the variance correction. Only diploid data is supported.
pub const PLOIDY: f64 = 2.0;

/// Unbiased per-entry estimate of the binomial genotype variance.
#[inline]
pub fn variance_proxy(genotype: f64) -> f64 {
    (PLOIDY * genotype - genotype * genotype) / (PLOIDY - 1.0)
}

/// Corrected Gram matrix G = (1/m)XᵗX − D with the diagonal of D kept alongside.
#[derive(Debug, Clone)]
pub struct CorrectedGram {
    pub gram: Array2<f64>,
    pub correction: Array1<f64>,
    pub n_markers: usize,
}

impl CorrectedGram {
    pub fn n_individuals(&self) -> usize {
        self.gram.nrows()
    }

    /// Largest diagonal correction. G shifted by this amount is positive semidefinite.
    pub fn max_correction(&self) -> f64 {
        self.correction.iter().copied().fold(0.0_f64, f64::max)
    }
}

/// Rejects empty matrices and non-finite genotype entries.
pub(crate) fn validate_genotypes(x: ArrayView2<'_, f64>) -> Result<(), AdmixError> {
    let (m, n) = x.dim();
    if m == 0 || n == 0 {
        return Err(AdmixError::DimensionMismatch(format!(
            "genotype matrix must be non-empty, got {m} markers x {n} individuals"
        )));
    }
    if let Some(((marker, individual), &value)) =
        x.indexed_iter().find(|(_, value)| !value.is_finite())
    {
        return Err(AdmixError::InvalidGenotype {
            marker,
            individual,
            value,
        });
    }
    Ok(())
}

fn correction_terms(x: ArrayView2<'_, f64>) -> Array1<f64> {
    let m = x.nrows() as f64;
    let deltas: Vec<f64> = x
        .axis_iter(Axis(1))
        .into_par_iter()
        .map(|column| column.iter().map(|&g| variance_proxy(g)).sum::<f64>() / m)
        .collect();
    Array1::from(deltas)
}

/// Diagonal of the correction matrix D: δ_i is the mean variance proxy of individual i.
pub fn correction_diagonal(x: ArrayView2<'_, f64>) -> Result<Array1<f64>, AdmixError> {
    validate_genotypes(x)?;
    Ok(correction_terms(x))
}

/// Builds G = (1/m)XᵗX − diag(δ), symmetrised to remove rounding asymmetry.
pub fn corrected_gram(x: ArrayView2<'_, f64>) -> Result<CorrectedGram, AdmixError> {
    validate_genotypes(x)?;
    let m = x.nrows();
    let correction = correction_terms(x);

    let mut gram = x.t().dot(&x);
    gram.mapv_inplace(|v| v / m as f64);
    let n = gram.nrows();
    for col in 0..n {
        gram[(col, col)] -= correction[col];
        for row in 0..col {
            let avg = 0.5 * (gram[(row, col)] + gram[(col, row)]);
            gram[(row, col)] = avg;
            gram[(col, row)] = avg;
        }
    }

    let corrected = CorrectedGram {
        gram,
        correction,
        n_markers: m,
    };
    log::debug!(
        "Corrected Gram matrix built for {} individuals over {} markers (max correction {:.4})",
        n,
        m,
        corrected.max_correction()
    );
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn variance_proxy_matches_binomial_counts() {
        assert_eq!(variance_proxy(0.0), 0.0);
        assert_eq!(variance_proxy(1.0), 1.0);
        assert_eq!(variance_proxy(2.0), 0.0);
    }

    #[test]
    fn correction_is_column_mean_of_variance_proxy() {
        let x = array![[0.0, 1.0, 2.0], [1.0, 1.0, 0.0], [2.0, 1.0, 1.0], [1.0, 0.0, 0.0]];
        let delta = correction_diagonal(x.view()).unwrap();
        assert_eq!(delta.len(), 3);
        assert!((delta[0] - 0.5).abs() < 1e-15);
        assert!((delta[1] - 0.75).abs() < 1e-15);
        assert!((delta[2] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn correction_is_non_negative_on_unit_interval_range() {
        let x = Array2::from_shape_fn((17, 9), |(i, j)| ((i * 7 + j * 3) % 21) as f64 / 10.0);
        let delta = correction_diagonal(x.view()).unwrap();
        assert!(delta.iter().all(|&d| d >= 0.0));
    }

    #[test]
    fn gram_is_symmetric_and_corrected_on_diagonal() {
        let x = array![[0.0, 1.0, 2.0], [1.0, 1.0, 0.0], [2.0, 1.0, 1.0], [1.0, 0.0, 0.0]];
        let corrected = corrected_gram(x.view()).unwrap();
        let raw = x.t().dot(&x) / 4.0;
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(corrected.gram[(i, j)], corrected.gram[(j, i)]);
                let expected = if i == j {
                    raw[(i, j)] - corrected.correction[i]
                } else {
                    raw[(i, j)]
                };
                assert!((corrected.gram[(i, j)] - expected).abs() < 1e-14);
            }
        }
        assert_eq!(corrected.n_markers, 4);
        assert_eq!(corrected.n_individuals(), 3);
        assert!((corrected.max_correction() - 0.75).abs() < 1e-15);
    }

    #[test]
    fn empty_matrix_is_a_dimension_mismatch() {
        let x = Array2::<f64>::zeros((0, 4));
        assert!(matches!(
            correction_diagonal(x.view()),
            Err(AdmixError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn non_finite_genotype_is_reported_with_position() {
        let x = array![[0.0, 1.0], [f64::NAN, 2.0]];
        match corrected_gram(x.view()) {
            Err(AdmixError::InvalidGenotype {
                marker, individual, ..
            }) => {
                assert_eq!((marker, individual), (1, 0));
            }
            other => panic!("expected InvalidGenotype, got {other:?}"),
        }
    }
}
