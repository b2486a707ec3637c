// admix/refine.rs

//! # Alternating Least Squares Refinement
//!
//! Factorises the projected allele-frequency matrix F ≈ P·Q under the admixture
//! constraints. Each iteration:
//!
//! 1.  **P step:** solves the least-squares problem for P with Q fixed and clips
//!     every entry to [0, 1].
//! 2.  **Q step:** solves for Q with the updated P fixed and projects every column
//!     onto the probability simplex.
//!
//! The loop stops once the RMSE between successive Q iterates drops below the
//! tolerance, or at the iteration cap, in which case the last iterate is returned
//! with status [`FitStatus::MaxIterReached`].

use crate::constraints::{
    clip_unit_interval, project_columns_to_simplex, rmse, solve_normal_equations,
};
use crate::correction::{corrected_gram, validate_genotypes};
use crate::dimension::{MIN_ADMIXTURE_RANK, dimension_from_gram};
use crate::error::AdmixError;
use crate::initial::{initial_factors_from_gram, seed_factors};
use crate::ordering::{apply_order, population_order};
use crate::progress::{IterationReport, NoopRefineObserver, PipelineStage, RefineObserver};
use crate::types::{AdmixtureFit, AlsOptions, Diagnostic, FitStatus};
use ndarray::{Array2, ArrayView2};

/// Spread below which a marker's projected frequency counts as constant.
const CONSTANT_FREQUENCY_EPSILON: f64 = 1e-12;

/// The current (P, Q) pair. A new pair is built in full before it replaces the old one.
struct AlsState {
    p: Array2<f64>,
    q: Array2<f64>,
}

struct RefineOutcome {
    state: AlsState,
    status: FitStatus,
    iterations: usize,
    final_rmse: f64,
    reconstruction_rmse: f64,
}

/// Fits the admixture model to a genotype matrix.
///
/// # Arguments
/// * `x`: m×n genotype matrix with entries in {0, 1, 2}.
/// * `options`: rank, solver selectors, convergence settings and optional seeds.
///
/// # Returns
/// The ordered estimates together with the rowspace, the termination status and
/// any advisory diagnostics. Configuration and shape errors are returned before
/// any numeric work is done.
pub fn run_alstructure(
    x: ArrayView2<'_, f64>,
    options: &AlsOptions,
) -> Result<AdmixtureFit, AdmixError> {
    run_alstructure_with_observer(x, options, &mut NoopRefineObserver)
}

/// [`run_alstructure`] with a progress observer.
pub fn run_alstructure_with_observer<O: RefineObserver>(
    x: ArrayView2<'_, f64>,
    options: &AlsOptions,
    observer: &mut O,
) -> Result<AdmixtureFit, AdmixError> {
    // --- 1. Validate configuration and shapes ---
    let seeds = validate_options(options)?;
    validate_genotypes(x)?;
    let (m, n) = x.dim();
    if n < MIN_ADMIXTURE_RANK {
        return Err(AdmixError::DimensionMismatch(format!(
            "at least {MIN_ADMIXTURE_RANK} individuals are required, got {n}"
        )));
    }
    if let Some(d) = options.d_hat {
        if d > n {
            return Err(AdmixError::DimensionMismatch(format!(
                "admixture rank {d} exceeds the number of individuals {n}"
            )));
        }
    }
    let seed_width = match seeds {
        Some((p_init, q_init)) => Some(validate_seeds(p_init, q_init, m, n, options.d_hat)?),
        None => None,
    };

    log::info!(
        "Starting ALStructure fit on {} markers x {} individuals ({:?} subspace, tol {:.1e}, max {} iterations)",
        m,
        n,
        options.svd_method,
        options.tol,
        options.max_iters
    );

    // --- 2. Resolve the admixture rank ---
    let corrected = corrected_gram(x)?;
    let mut diagnostics = Vec::new();
    let d = match (options.d_hat, seed_width) {
        (Some(d), _) => d,
        (None, Some(width)) => width,
        (None, None) => {
            observer.on_stage_start(PipelineStage::DimensionEstimation);
            let estimate = dimension_from_gram(&corrected)?;
            diagnostics.extend(estimate.diagnostics);
            estimate.d_hat
        }
    };

    // --- 3. Rowspace, F and the starting pair ---
    observer.on_stage_start(PipelineStage::Subspace);
    let initial = initial_factors_from_gram(x, &corrected, d, options.svd_method)?;
    let start = match seeds {
        Some((p_init, q_init)) => {
            let mut p = p_init.to_owned();
            let mut q = q_init.to_owned();
            clip_unit_interval(&mut p);
            project_columns_to_simplex(&mut q);
            AlsState { p, q }
        }
        None => {
            let (p, q) = seed_factors(&initial.f, &initial.rowspace)?;
            AlsState { p, q }
        }
    };

    // --- 4. Alternate until convergence or the iteration cap ---
    observer.on_stage_start(PipelineStage::Refinement);
    let outcome = refine(&initial.f, start, options.tol, options.max_iters, observer)?;
    if outcome.status == FitStatus::MaxIterReached {
        let diagnostic = Diagnostic::NonConvergence {
            iterations: outcome.iterations,
            last_rmse: outcome.final_rmse,
        };
        log::warn!("{diagnostic}");
        diagnostics.push(diagnostic);
    }

    // --- 5. Order the populations ---
    observer.on_stage_start(PipelineStage::Ordering);
    let order = population_order(&outcome.state.q, &initial.rowspace, options.order_method);
    let (p_hat, q_hat) = apply_order(&outcome.state.p, &outcome.state.q, &order)?;

    observer.on_finish(outcome.status, outcome.iterations);
    log::info!(
        "ALStructure finished with d = {}: {:?} after {} iterations (Q RMSE {:.3e}, reconstruction RMSE {:.4})",
        d,
        outcome.status,
        outcome.iterations,
        outcome.final_rmse,
        outcome.reconstruction_rmse
    );

    Ok(AdmixtureFit {
        d_hat: d,
        status: outcome.status,
        iterations: outcome.iterations,
        final_rmse: outcome.final_rmse,
        reconstruction_rmse: outcome.reconstruction_rmse,
        order,
        p_hat,
        q_hat,
        rowspace: initial.rowspace,
        diagnostics,
    })
}

type SeedPair<'a> = (&'a Array2<f64>, &'a Array2<f64>);

fn validate_options(options: &AlsOptions) -> Result<Option<SeedPair<'_>>, AdmixError> {
    let seeds = match (&options.p_init, &options.q_init) {
        (Some(p_init), Some(q_init)) => Some((p_init, q_init)),
        (None, None) => None,
        (Some(_), None) => {
            return Err(AdmixError::InvalidDimensionConfig(
                "p_init was supplied without q_init; seeds must be given as a pair".to_string(),
            ));
        }
        (None, Some(_)) => {
            return Err(AdmixError::InvalidDimensionConfig(
                "q_init was supplied without p_init; seeds must be given as a pair".to_string(),
            ));
        }
    };

    if let Some(d) = options.d_hat {
        if d < MIN_ADMIXTURE_RANK {
            return Err(AdmixError::InvalidDimensionConfig(format!(
                "d_hat must be at least {MIN_ADMIXTURE_RANK}, got {d}"
            )));
        }
    }
    if !(options.tol.is_finite() && options.tol > 0.0) {
        return Err(AdmixError::InvalidOptions(format!(
            "tol must be a positive finite number, got {}",
            options.tol
        )));
    }
    if options.max_iters == 0 {
        return Err(AdmixError::InvalidOptions(
            "max_iters must be at least 1".to_string(),
        ));
    }
    Ok(seeds)
}

fn validate_seeds(
    p_init: &Array2<f64>,
    q_init: &Array2<f64>,
    m: usize,
    n: usize,
    d_hat: Option<usize>,
) -> Result<usize, AdmixError> {
    let width = p_init.ncols();
    if p_init.nrows() != m || q_init.nrows() != width || q_init.ncols() != n {
        return Err(AdmixError::DimensionMismatch(format!(
            "p_init is {}x{} and q_init is {}x{}, expected {m}xd and dx{n}",
            p_init.nrows(),
            p_init.ncols(),
            q_init.nrows(),
            q_init.ncols()
        )));
    }
    if width < MIN_ADMIXTURE_RANK {
        return Err(AdmixError::InvalidDimensionConfig(format!(
            "seeds describe {width} population(s); at least {MIN_ADMIXTURE_RANK} are required"
        )));
    }
    if width > n {
        return Err(AdmixError::DimensionMismatch(format!(
            "seeds describe {width} populations but there are only {n} individuals"
        )));
    }
    if let Some(d) = d_hat {
        if d != width {
            return Err(AdmixError::DimensionMismatch(format!(
                "d_hat = {d} does not match the {width} populations of the seeds"
            )));
        }
    }
    if p_init.iter().chain(q_init.iter()).any(|v| !v.is_finite()) {
        return Err(AdmixError::InvalidOptions(
            "p_init and q_init must contain only finite values".to_string(),
        ));
    }
    Ok(width)
}

fn als_step(f: &Array2<f64>, state: &AlsState) -> Result<AlsState, AdmixError> {
    // (QQᵗ)·Pᵗ = Q·Fᵗ
    let qqt = state.q.dot(&state.q.t());
    let rhs = state.q.dot(&f.t());
    let mut p = solve_normal_equations(&qqt, &rhs)?
        .reversed_axes()
        .as_standard_layout()
        .into_owned();
    clip_unit_interval(&mut p);

    // (PᵗP)·Q = Pᵗ·F
    let ptp = p.t().dot(&p);
    let rhs = p.t().dot(f);
    let mut q = solve_normal_equations(&ptp, &rhs)?;
    project_columns_to_simplex(&mut q);

    Ok(AlsState { p, q })
}

fn reconstruction_rmse(f: &Array2<f64>, state: &AlsState) -> f64 {
    rmse(f, &state.p.dot(&state.q))
}

/// True when every marker of F takes the same value for all individuals.
fn lacks_individual_variation(f: &Array2<f64>) -> bool {
    f.rows().into_iter().all(|row| {
        let (lo, hi) = row
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        hi - lo <= CONSTANT_FREQUENCY_EPSILON
    })
}

fn refine<O: RefineObserver>(
    f: &Array2<f64>,
    start: AlsState,
    tol: f64,
    max_iters: usize,
    observer: &mut O,
) -> Result<RefineOutcome, AdmixError> {
    if lacks_individual_variation(f) {
        log::warn!(
            "Projected frequencies are identical across individuals; proportions are not identifiable, keeping the starting factors"
        );
        let reconstruction_rmse = reconstruction_rmse(f, &start);
        return Ok(RefineOutcome {
            state: start,
            status: FitStatus::Converged,
            iterations: 0,
            final_rmse: 0.0,
            reconstruction_rmse,
        });
    }

    let mut state = start;
    let mut iterations = 0usize;

    loop {
        let next = als_step(f, &state)?;
        let q_rmse = rmse(&next.q, &state.q);
        state = next;
        iterations += 1;

        let report = IterationReport {
            iteration: iterations,
            q_rmse,
            reconstruction_rmse: reconstruction_rmse(f, &state),
        };
        log::debug!(
            "ALS iteration {}: Q RMSE {:.3e}, reconstruction RMSE {:.5}",
            report.iteration,
            report.q_rmse,
            report.reconstruction_rmse
        );
        observer.on_iteration(&report);

        let status = if q_rmse < tol {
            Some(FitStatus::Converged)
        } else if iterations >= max_iters {
            Some(FitStatus::MaxIterReached)
        } else {
            None
        };

        if let Some(status) = status {
            return Ok(RefineOutcome {
                state,
                status,
                iterations,
                final_rmse: q_rmse,
                reconstruction_rmse: report.reconstruction_rmse,
            });
        }
    }
}
