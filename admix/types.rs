use crate::error::AdmixError;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DEFAULT_TOLERANCE: f64 = 1e-5;
pub const DEFAULT_MAX_ITERS: usize = 1000;

/// How the leading eigenpairs of the corrected Gram matrix are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SvdMethod {
    /// Full self-adjoint eigendecomposition, then the top-d pairs.
    #[default]
    Exact,
    /// Partial Krylov-Schur solve for the top-d pairs only.
    Truncated,
}

/// Criterion used to order the estimated populations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderMethod {
    /// Descending mean admixture proportion across individuals.
    #[default]
    AveAdmixture,
    /// Descending eigen-R² of each population's proportions against the rowspace.
    VarExplained,
}

/// Leading eigenpairs of the corrected Gram matrix.
///
/// `vectors` is n×d with orthonormal columns, `values` has length d, and both are
/// sorted by non-increasing eigenvalue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rowspace {
    pub vectors: Array2<f64>,
    pub values: Array1<f64>,
}

impl Rowspace {
    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// The RMSE between successive Q iterates fell below the tolerance.
    Converged,
    /// The iteration cap was reached first; the last iterate is returned.
    MaxIterReached,
}

/// Advisory conditions that never abort a computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No plateau was found on the threshold grid; the last candidate was used.
    UnreliableEstimate { last_candidate: usize },
    /// The raw dimension estimate was below 2 and was raised to 2.
    MinimumDimensionEnforced { raw_estimate: usize },
    /// The refiner stopped at the iteration cap.
    NonConvergence { iterations: usize, last_rmse: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnreliableEstimate { last_candidate } => write!(
                f,
                "no plateau found in the dimension grid; using the last candidate d = {last_candidate}, which may be unreliable"
            ),
            Self::MinimumDimensionEnforced { raw_estimate } => write!(
                f,
                "estimated dimension {raw_estimate} is below the minimum admixture rank; using d = 2"
            ),
            Self::NonConvergence {
                iterations,
                last_rmse,
            } => write!(
                f,
                "refinement did not converge within {iterations} iterations (last Q RMSE {last_rmse:.3e})"
            ),
        }
    }
}

/// Output of the plateau search over the corrected spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionEstimate {
    /// Admixture rank to use; always at least 2.
    pub d_hat: usize,
    /// The plateau value (or last candidate) before the minimum was enforced.
    pub raw_estimate: usize,
    pub diagnostics: Vec<Diagnostic>,
}

/// One-shot allele-frequency estimate together with the rowspace it was projected on.
#[derive(Debug, Clone)]
pub struct InitialFactors {
    /// m×n individual-specific allele frequencies, entries in [0, 1].
    pub f: Array2<f64>,
    pub rowspace: Rowspace,
}

/// Options for [`crate::run_alstructure`].
///
/// Deserialisation fills missing fields with their defaults, so a TOML file only
/// needs to name the options it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlsOptions {
    /// Admixture rank; estimated from the data when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d_hat: Option<usize>,
    pub svd_method: SvdMethod,
    pub tol: f64,
    pub max_iters: usize,
    pub order_method: OrderMethod,
    /// m×d starting allele frequencies; must be given together with `q_init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p_init: Option<Array2<f64>>,
    /// d×n starting admixture proportions; must be given together with `p_init`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub q_init: Option<Array2<f64>>,
}

impl Default for AlsOptions {
    fn default() -> Self {
        Self {
            d_hat: None,
            svd_method: SvdMethod::default(),
            tol: DEFAULT_TOLERANCE,
            max_iters: DEFAULT_MAX_ITERS,
            order_method: OrderMethod::default(),
            p_init: None,
            q_init: None,
        }
    }
}

impl AlsOptions {
    pub fn with_dimension(mut self, d_hat: usize) -> Self {
        self.d_hat = Some(d_hat);
        self
    }

    pub fn with_initial_factors(mut self, p_init: Array2<f64>, q_init: Array2<f64>) -> Self {
        self.p_init = Some(p_init);
        self.q_init = Some(q_init);
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, AdmixError> {
        Ok(toml::from_str(source)?)
    }

    pub fn to_toml_string(&self) -> Result<String, AdmixError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads options from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AdmixError> {
        let toml_string = fs::read_to_string(path)?;
        Self::from_toml_str(&toml_string)
    }
}

/// The complete result of an admixture fit.
///
/// Scalar fields come first so the structure serialises cleanly to TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmixtureFit {
    pub d_hat: usize,
    pub status: FitStatus,
    pub iterations: usize,
    /// RMSE between the last two Q iterates.
    pub final_rmse: f64,
    /// RMSE between F and P·Q at termination.
    pub reconstruction_rmse: f64,
    /// `order[k]` is the pre-ordering index of the population reported at position k.
    pub order: Vec<usize>,
    /// m×d ancestral allele frequencies, entries in [0, 1].
    pub p_hat: Array2<f64>,
    /// d×n admixture proportions; every column lies on the probability simplex.
    pub q_hat: Array2<f64>,
    pub rowspace: Rowspace,
    pub diagnostics: Vec<Diagnostic>,
}

impl AdmixtureFit {
    pub fn converged(&self) -> bool {
        self.status == FitStatus::Converged
    }

    /// Saves the fit in a human-readable TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AdmixError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AdmixError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn options_fill_defaults_from_partial_toml() {
        let options = AlsOptions::from_toml_str(
            r#"
            d_hat = 4
            svd_method = "truncated"
            order_method = "var_explained"
            "#,
        )
        .unwrap();
        assert_eq!(options.d_hat, Some(4));
        assert_eq!(options.svd_method, SvdMethod::Truncated);
        assert_eq!(options.order_method, OrderMethod::VarExplained);
        assert_eq!(options.tol, DEFAULT_TOLERANCE);
        assert_eq!(options.max_iters, DEFAULT_MAX_ITERS);
        assert!(options.p_init.is_none());
        assert!(options.q_init.is_none());
    }

    #[test]
    fn options_reject_unknown_selector() {
        let result = AlsOptions::from_toml_str(r#"svd_method = "randomized""#);
        assert!(matches!(result, Err(AdmixError::TomlParse(_))));
    }

    #[test]
    fn options_round_trip_through_toml() {
        let options = AlsOptions {
            tol: 1e-7,
            max_iters: 25,
            ..AlsOptions::default()
        }
        .with_dimension(3);
        let text = options.to_toml_string().unwrap();
        let parsed = AlsOptions::from_toml_str(&text).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn seeds_are_carried_by_options() {
        let options = AlsOptions::default()
            .with_initial_factors(array![[0.5, 0.5]], array![[1.0], [0.0]]);
        assert_eq!(options.p_init.as_ref().map(|p| p.dim()), Some((1, 2)));
        assert_eq!(options.q_init.as_ref().map(|q| q.dim()), Some((2, 1)));
    }

    #[test]
    fn diagnostics_render_readable_messages() {
        let message = Diagnostic::MinimumDimensionEnforced { raw_estimate: 1 }.to_string();
        assert!(message.contains("using d = 2"));
        let message = Diagnostic::NonConvergence {
            iterations: 10,
            last_rmse: 0.5,
        }
        .to_string();
        assert!(message.contains("10 iterations"));
    }
}
