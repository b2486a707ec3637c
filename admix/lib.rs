#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
pub mod constraints;
pub mod correction;
pub mod dimension;
pub mod error;
pub mod faer_ndarray;
pub mod initial;
pub mod ordering;
pub mod progress;
pub mod refine;
pub mod simulate;
pub mod subspace;
pub mod types;

pub use dimension::compute_dimension;
pub use error::AdmixError;
pub use initial::estimate_initial_factors;
pub use progress::{IterationReport, NoopRefineObserver, PipelineStage, RefineObserver};
pub use refine::{run_alstructure, run_alstructure_with_observer};
pub use simulate::{SimulatedAdmixture, simulate_admixture};
pub use subspace::estimate_subspace;
pub use types::{
    AdmixtureFit, AlsOptions, Diagnostic, DimensionEstimate, FitStatus, InitialFactors,
    OrderMethod, Rowspace, SvdMethod,
};
