use crate::types::FitStatus;
use std::fmt;

/// Stages reported while running the full pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    DimensionEstimation,
    Subspace,
    Refinement,
    Ordering,
}

impl PipelineStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::DimensionEstimation => "admixture rank estimation",
            Self::Subspace => "latent subspace estimation",
            Self::Refinement => "alternating least squares refinement",
            Self::Ordering => "population ordering",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Per-iteration summary handed to observers after the new (P, Q) pair is in place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationReport {
    pub iteration: usize,
    /// RMSE between this iteration's Q and the previous one.
    pub q_rmse: f64,
    /// RMSE between F and P·Q.
    pub reconstruction_rmse: f64,
}

/// Observer for reporting progress while fitting an admixture model.
pub trait RefineObserver {
    fn on_stage_start(&mut self, stage: PipelineStage) {
        let _ = stage;
    }
    fn on_iteration(&mut self, report: &IterationReport) {
        let _ = report;
    }
    fn on_finish(&mut self, status: FitStatus, iterations: usize) {
        let _ = (status, iterations);
    }
}

#[derive(Default)]
pub struct NoopRefineObserver;

impl RefineObserver for NoopRefineObserver {}
