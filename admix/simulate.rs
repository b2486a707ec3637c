//! Synthetic genotypes drawn from the binomial admixture model.

use crate::correction::PLOIDY;
use crate::error::AdmixError;
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Dirichlet, Distribution};

const FREQUENCY_BOUNDS: (f64, f64) = (0.05, 0.95);

/// A simulated data set together with the parameters that generated it.
#[derive(Debug, Clone)]
pub struct SimulatedAdmixture {
    /// m×n genotype counts in {0, 1, 2}.
    pub genotypes: Array2<f64>,
    /// m×d true ancestral allele frequencies.
    pub frequencies: Array2<f64>,
    /// d×n true admixture proportions.
    pub proportions: Array2<f64>,
}

/// Draws X ~ Binomial(2, P·Q) with P ~ Uniform(0.05, 0.95) and the columns of Q
/// from a symmetric Dirichlet(α).
///
/// With `d = 1` every individual belongs to the single population. The draw is a
/// pure function of `seed`.
pub fn simulate_admixture(
    n_markers: usize,
    n_individuals: usize,
    d: usize,
    alpha: f64,
    seed: u64,
) -> Result<SimulatedAdmixture, AdmixError> {
    if n_markers == 0 || n_individuals == 0 || d == 0 {
        return Err(AdmixError::DimensionMismatch(format!(
            "simulation needs positive sizes, got {n_markers} markers, {n_individuals} individuals, d = {d}"
        )));
    }
    if !(alpha.is_finite() && alpha > 0.0) {
        return Err(AdmixError::InvalidOptions(format!(
            "Dirichlet concentration must be positive, got {alpha}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let (lo, hi) = FREQUENCY_BOUNDS;
    let frequencies = Array2::from_shape_fn((n_markers, d), |_| rng.gen_range(lo..hi));

    let mut proportions = Array2::<f64>::ones((d, n_individuals));
    if d > 1 {
        let dirichlet = Dirichlet::new(&vec![alpha; d])
            .map_err(|err| AdmixError::InvalidOptions(format!("Dirichlet: {err}")))?;
        for mut column in proportions.columns_mut() {
            let draw: Vec<f64> = dirichlet.sample(&mut rng);
            for (slot, value) in column.iter_mut().zip(draw) {
                *slot = value;
            }
        }
    }

    let expected = frequencies.dot(&proportions);
    let mut genotypes = Array2::<f64>::zeros((n_markers, n_individuals));
    for ((row, col), slot) in genotypes.indexed_iter_mut() {
        let p = expected[(row, col)].clamp(0.0, 1.0);
        let binomial = Binomial::new(PLOIDY as u64, p)
            .map_err(|err| AdmixError::InvalidOptions(format!("Binomial: {err}")))?;
        *slot = binomial.sample(&mut rng) as f64;
    }

    Ok(SimulatedAdmixture {
        genotypes,
        frequencies,
        proportions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_respects_model_constraints() {
        let sim = simulate_admixture(50, 20, 3, 0.5, 1).unwrap();
        assert_eq!(sim.genotypes.dim(), (50, 20));
        assert_eq!(sim.frequencies.dim(), (50, 3));
        assert_eq!(sim.proportions.dim(), (3, 20));
        assert!(sim.genotypes.iter().all(|&g| g == 0.0 || g == 1.0 || g == 2.0));
        assert!(sim.frequencies.iter().all(|&p| (0.05..0.95).contains(&p)));
        for column in sim.proportions.columns() {
            assert!((column.sum() - 1.0).abs() < 1e-12);
            assert!(column.iter().all(|&q| q >= 0.0));
        }
    }

    #[test]
    fn simulation_is_reproducible_for_a_seed() {
        let first = simulate_admixture(30, 10, 2, 1.0, 99).unwrap();
        let second = simulate_admixture(30, 10, 2, 1.0, 99).unwrap();
        assert_eq!(first.genotypes, second.genotypes);
        assert_eq!(first.proportions, second.proportions);
    }

    #[test]
    fn single_population_has_unit_proportions() {
        let sim = simulate_admixture(10, 5, 1, 1.0, 4).unwrap();
        assert!(sim.proportions.iter().all(|&q| q == 1.0));
    }

    #[test]
    fn invalid_concentration_is_rejected() {
        assert!(matches!(
            simulate_admixture(10, 5, 2, 0.0, 4),
            Err(AdmixError::InvalidOptions(_))
        ));
    }
}
