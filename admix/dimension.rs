//! Admixture rank estimation by plateau detection on the corrected spectrum.
//!
//! Eigenvalues of G that carry population structure grow linearly with n while the
//! noise eigenvalues stay bounded. Sweeping a threshold a·m^(-1/3) over a ∈ [1, n]
//! and counting the eigenvalues above it therefore produces a long run of equal
//! counts at the true rank. The first run that is long enough wins.

use crate::correction::{CorrectedGram, corrected_gram};
use crate::error::AdmixError;
use crate::faer_ndarray::FaerEigh;
use crate::types::{Diagnostic, DimensionEstimate};
use faer::Side;
use ndarray::ArrayView2;

/// Number of threshold grid points.
pub const DIMENSION_GRID_POINTS: usize = 1000;
/// A plateau must span at least `ceil(DIMENSION_GRID_POINTS / 30)` grid points.
pub const PLATEAU_LENGTH: usize = DIMENSION_GRID_POINTS.div_ceil(30);
/// Smallest admixture rank the refiner supports.
pub const MIN_ADMIXTURE_RANK: usize = 2;

/// Estimates the admixture rank d of a genotype matrix.
///
/// The returned `d_hat` is always at least 2. A missing plateau or a raw estimate
/// below 2 is reported through the estimate's diagnostics, never as an error.
pub fn compute_dimension(x: ArrayView2<'_, f64>) -> Result<DimensionEstimate, AdmixError> {
    let corrected = corrected_gram(x)?;
    dimension_from_gram(&corrected)
}

pub(crate) fn dimension_from_gram(
    corrected: &CorrectedGram,
) -> Result<DimensionEstimate, AdmixError> {
    let n = corrected.n_individuals();
    if n < MIN_ADMIXTURE_RANK {
        return Err(AdmixError::DimensionMismatch(format!(
            "at least {MIN_ADMIXTURE_RANK} individuals are needed to estimate an admixture rank, got {n}"
        )));
    }

    let (values, _) = corrected.gram.eigh(Side::Lower)?;
    let spectrum = values.to_vec();
    let estimate = dimension_from_spectrum(&spectrum, n, corrected.n_markers);
    log::info!(
        "Estimated admixture rank d = {} (raw plateau value {})",
        estimate.d_hat,
        estimate.raw_estimate
    );
    Ok(estimate)
}

/// Runs the plateau search on a given spectrum of an n×n corrected Gram matrix
/// built from `n_markers` markers.
pub fn dimension_from_spectrum(
    eigenvalues: &[f64],
    n_individuals: usize,
    n_markers: usize,
) -> DimensionEstimate {
    let scale = (n_markers.max(1) as f64).powf(-1.0 / 3.0);
    let upper = n_individuals.max(1) as f64;
    let step = (upper - 1.0) / (DIMENSION_GRID_POINTS - 1) as f64;

    let count_above = |threshold: f64| eigenvalues.iter().filter(|&&v| v > threshold).count();

    let mut diagnostics = Vec::new();
    let mut previous: Option<usize> = None;
    let mut run_length = 0usize;
    let mut plateau = None;
    let mut last = 0usize;

    for k in 0..DIMENSION_GRID_POINTS {
        let a_k = 1.0 + step * k as f64;
        let candidate = count_above(a_k * scale);
        run_length = if previous == Some(candidate) {
            run_length + 1
        } else {
            1
        };
        previous = Some(candidate);
        last = candidate;
        if run_length >= PLATEAU_LENGTH {
            plateau = Some(candidate);
            break;
        }
    }

    let raw_estimate = match plateau {
        Some(value) => value,
        None => {
            let diagnostic = Diagnostic::UnreliableEstimate {
                last_candidate: last,
            };
            log::warn!("{diagnostic}");
            diagnostics.push(diagnostic);
            last
        }
    };

    let d_hat = if raw_estimate < MIN_ADMIXTURE_RANK {
        let diagnostic = Diagnostic::MinimumDimensionEnforced { raw_estimate };
        log::warn!("{diagnostic}");
        diagnostics.push(diagnostic);
        MIN_ADMIXTURE_RANK
    } else {
        raw_estimate
    };

    DimensionEstimate {
        d_hat,
        raw_estimate,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulate::simulate_admixture;
    use ndarray::Array2;

    #[test]
    fn plateau_length_is_ceiling_of_grid_over_thirty() {
        assert_eq!(PLATEAU_LENGTH, 34);
    }

    #[test]
    fn separated_spectrum_yields_its_rank() {
        // With m = 1 the thresholds run from 1 to n; three eigenvalues sit far above.
        let spectrum = [500.0, 400.0, 300.0, 0.5, 0.2, -0.1];
        let estimate = dimension_from_spectrum(&spectrum, 1000, 1);
        assert_eq!(estimate.d_hat, 3);
        assert_eq!(estimate.raw_estimate, 3);
        assert!(estimate.diagnostics.is_empty());
    }

    #[test]
    fn rank_one_spectrum_is_raised_to_two() {
        let spectrum = [800.0, 0.3, 0.1, 0.0];
        let estimate = dimension_from_spectrum(&spectrum, 1000, 1);
        assert_eq!(estimate.raw_estimate, 1);
        assert_eq!(estimate.d_hat, 2);
        assert_eq!(
            estimate.diagnostics,
            vec![Diagnostic::MinimumDimensionEnforced { raw_estimate: 1 }]
        );
    }

    #[test]
    fn missing_plateau_returns_last_candidate_with_warning() {
        // One eigenvalue per grid step keeps every run at length one.
        let n = 1000;
        let spectrum: Vec<f64> = (0..DIMENSION_GRID_POINTS)
            .map(|k| 1.0 + (n as f64 - 1.0) * k as f64 / (DIMENSION_GRID_POINTS - 1) as f64 + 0.5)
            .collect();
        let estimate = dimension_from_spectrum(&spectrum, n, 1);
        assert_eq!(estimate.raw_estimate, 1);
        assert_eq!(estimate.d_hat, 2);
        assert_eq!(
            estimate.diagnostics,
            vec![
                Diagnostic::UnreliableEstimate { last_candidate: 1 },
                Diagnostic::MinimumDimensionEnforced { raw_estimate: 1 },
            ]
        );
    }

    #[test]
    fn simulated_three_population_data_is_detected() {
        let hits = (0..5u64)
            .filter(|&seed| {
                let sim = simulate_admixture(500, 200, 3, 0.5, 2024 + seed).unwrap();
                compute_dimension(sim.genotypes.view()).unwrap().d_hat == 3
            })
            .count();
        assert!(hits >= 3, "rank 3 recovered for only {hits} of 5 seeds");
    }

    #[test]
    fn estimate_is_never_below_two() {
        let sim = simulate_admixture(200, 60, 1, 1.0, 8).unwrap();
        let estimate = compute_dimension(sim.genotypes.view()).unwrap();
        assert!(estimate.d_hat >= 2);
    }

    #[test]
    fn single_individual_is_rejected() {
        let x = Array2::from_elem((10, 1), 1.0);
        assert!(matches!(
            compute_dimension(x.view()),
            Err(AdmixError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn estimate_uses_the_full_corrected_spectrum() {
        let sim = simulate_admixture(400, 120, 3, 0.3, 12).unwrap();
        let corrected = corrected_gram(sim.genotypes.view()).unwrap();
        let (values, _) = corrected.gram.eigh(Side::Lower).unwrap();
        assert_eq!(values.len(), 120);

        let from_gram = dimension_from_gram(&corrected).unwrap();
        let from_spectrum = dimension_from_spectrum(&values.to_vec(), 120, 400);
        assert_eq!(from_gram, from_spectrum);
        assert!(from_gram.raw_estimate >= 2);
        assert!(
            !from_gram
                .diagnostics
                .iter()
                .any(|d| matches!(d, Diagnostic::UnreliableEstimate { .. }))
        );
    }
}
