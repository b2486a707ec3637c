//! Thin bridge between `ndarray` arrays and the `faer` dense linear algebra kernels.
//!
//! The estimation code works on `ndarray` views throughout; every decomposition is
//! delegated to faer through the traits in this module.

use dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::col::Col;
use faer::diag::DiagRef;
use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Solve};
use faer::matrix_free::LinOp;
use faer::matrix_free::eigen::{PartialEigenParams, partial_eigen_scratch, partial_self_adjoint_eigen};
use faer::prelude::ReborrowMut;
use faer::{Accum, Mat, MatMut, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("Partial eigensolver converged on {converged} of {requested} eigenpairs")]
    PartialEigenNoConvergence { converged: usize, requested: usize },
    #[error("Partial eigensolver needs 2·k < n, got k = {requested} for n = {n}")]
    PartialEigenTooWide { requested: usize, n: usize },
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    Array1::from_shape_fn(mat.nrows(), |i| mat[(i, 0)])
}

enum FaerStorage<'a> {
    Borrowed(MatRef<'a, f64>),
    Owned(Mat<f64>),
}

impl<'a> FaerStorage<'a> {
    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        match self {
            FaerStorage::Borrowed(view) => *view,
            FaerStorage::Owned(mat) => mat.as_ref(),
        }
    }
}

/// Zero-copy faer view of an `ndarray` matrix when the memory layout allows it,
/// an owned copy otherwise.
pub struct FaerArrayView<'a> {
    storage: FaerStorage<'a>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let storage = if let Some(slice) = array.as_slice_memory_order() {
            if array.is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_row_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else if array.t().is_standard_layout() {
                FaerStorage::Borrowed(MatRef::from_column_major_slice(
                    slice,
                    array.nrows(),
                    array.ncols(),
                ))
            } else {
                let (rows, cols) = array.dim();
                FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
            }
        } else {
            let (rows, cols) = array.dim();
            FaerStorage::Owned(Mat::from_fn(rows, cols, |i, j| array[(i, j)]))
        };
        Self { storage }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        self.storage.as_ref()
    }
}

/// Eigenpairs sorted by non-increasing eigenvalue; `vectors` holds one pair per column.
#[derive(Debug, Clone)]
pub struct SortedEigenpairs {
    pub values: Array1<f64>,
    pub vectors: Array2<f64>,
}

pub trait FaerEigh {
    /// Full self-adjoint eigendecomposition in faer's native (ascending) order.
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;

    /// The `k` largest eigenpairs from a full decomposition, descending.
    fn top_eigh(&self, k: usize) -> Result<SortedEigenpairs, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }

    fn top_eigh(&self, k: usize) -> Result<SortedEigenpairs, FaerLinalgError> {
        let (values, vectors) = self.eigh(Side::Lower)?;
        let values = values.to_vec();
        Ok(select_descending(
            &values,
            |row, idx| vectors[(row, idx)],
            self.nrows(),
            k,
        ))
    }
}

/// Sorts eigenvalues in descending order and gathers the leading `k` columns.
fn select_descending<F>(values: &[f64], column_entry: F, n: usize, k: usize) -> SortedEigenpairs
where
    F: Fn(usize, usize) -> f64,
{
    let mut ordering: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    ordering.sort_by(|lhs, rhs| rhs.1.partial_cmp(&lhs.1).unwrap_or(Ordering::Equal));

    let keep = k.min(ordering.len());
    let mut out_values = Array1::zeros(keep);
    let mut out_vectors = Array2::zeros((n, keep));
    for (out_idx, &(src_idx, value)) in ordering.iter().take(keep).enumerate() {
        out_values[out_idx] = value;
        for row in 0..n {
            out_vectors[(row, out_idx)] = column_entry(row, src_idx);
        }
    }
    SortedEigenpairs {
        values: out_values,
        vectors: out_vectors,
    }
}

#[derive(Debug)]
struct DenseSymmetricOp<'a> {
    matrix: MatRef<'a, f64>,
}

impl<'a> LinOp<f64> for DenseSymmetricOp<'a> {
    fn apply_scratch(&self, rhs_ncols: usize, par: Par) -> StackReq {
        let _ = (rhs_ncols, par);
        StackReq::empty()
    }

    fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    fn apply(&self, mut out: MatMut<'_, f64>, rhs: MatRef<'_, f64>, par: Par, stack: &mut MemStack) {
        let _ = stack;
        matmul(out.rb_mut(), Accum::Replace, self.matrix, rhs, 1.0, par);
    }

    fn conj_apply(&self, out: MatMut<'_, f64>, rhs: MatRef<'_, f64>, par: Par, stack: &mut MemStack) {
        self.apply(out, rhs, par, stack);
    }
}

fn partial_solver_params(n: usize, target: usize) -> PartialEigenParams {
    let mut params = PartialEigenParams::default();
    let max_available = n.saturating_sub(1);
    params.min_dim = target.max(32).min(max_available);
    params.max_dim = (2 * target).max(64).min(max_available);
    if params.max_dim < params.min_dim {
        params.max_dim = params.min_dim;
    }
    params.max_restarts = 2048;
    params
}

/// Leading `k` eigenpairs of a symmetric positive semidefinite matrix computed with
/// faer's Krylov-Schur partial eigensolver.
///
/// The solver targets eigenvalues of largest magnitude, so the caller must shift
/// indefinite matrices before calling. Returns
/// [`FaerLinalgError::PartialEigenTooWide`] unless 2·k < n, and
/// [`FaerLinalgError::PartialEigenNoConvergence`] when fewer than `k` pairs converge.
pub fn partial_top_eigh(matrix: &Array2<f64>, k: usize) -> Result<SortedEigenpairs, FaerLinalgError> {
    let n = matrix.nrows();
    if n == 0 || k == 0 {
        return Ok(SortedEigenpairs {
            values: Array1::zeros(0),
            vectors: Array2::zeros((n, 0)),
        });
    }
    // faer widens the Krylov basis to at least 2·k and requires it to stay below n.
    if 2 * k >= n {
        return Err(FaerLinalgError::PartialEigenTooWide { requested: k, n });
    }

    let faer_view = FaerArrayView::new(matrix);
    let op = DenseSymmetricOp {
        matrix: faer_view.as_ref(),
    };
    let par = get_global_parallelism();
    let params = partial_solver_params(n, k);

    let normalization = (n as f64).sqrt();
    let v0 = Col::from_fn(n, |_| 1.0 / normalization);
    let mut eigvecs = Mat::<f64>::zeros(n, k);
    let mut eigvals = vec![0.0_f64; k];

    // Restarts may grow the Krylov subspace to `max_dim`, so the scratch buffer is
    // sized for the worst case rather than for `k`.
    let scratch = partial_eigen_scratch(&op, params.max_dim, par, params);
    let mut mem = MemBuffer::new(scratch);
    let info = {
        let mut stack = MemStack::new(&mut mem);
        partial_self_adjoint_eigen(
            eigvecs.as_mut(),
            &mut eigvals,
            &op,
            v0.as_ref(),
            f64::EPSILON * 128.0,
            par,
            &mut stack,
            params,
        )
    };

    if info.n_converged_eigen < k {
        return Err(FaerLinalgError::PartialEigenNoConvergence {
            converged: info.n_converged_eigen,
            requested: k,
        });
    }

    Ok(select_descending(&eigvals, |row, idx| eigvecs[(row, idx)], n, k))
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let rhs_view = FaerArrayView::new(rhs);
        let sol = self.factor.solve(rhs_view.as_ref());
        mat_to_array(sol.as_ref())
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_psd(n: usize, rank: usize, rng: &mut StdRng) -> Array2<f64> {
        let mut mat = Array2::zeros((rank, n));
        for i in 0..rank {
            for j in 0..n {
                mat[(i, j)] = rng.gen_range(-1.0..1.0);
            }
        }
        mat.t().dot(&mat)
    }

    #[test]
    fn top_eigh_sorts_descending() {
        let matrix = array![[2.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, -1.0]];
        let pairs = matrix.top_eigh(3).unwrap();
        assert_eq!(pairs.values.len(), 3);
        assert!((pairs.values[0] - 5.0).abs() < 1e-12);
        assert!((pairs.values[1] - 2.0).abs() < 1e-12);
        assert!((pairs.values[2] + 1.0).abs() < 1e-12);
        assert!((pairs.vectors[(1, 0)].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn partial_matches_full_eigenpairs() {
        let mut rng = StdRng::seed_from_u64(42);
        let matrix = random_psd(120, 40, &mut rng);

        let partial = partial_top_eigh(&matrix, 5).unwrap();
        let full = matrix.top_eigh(5).unwrap();

        for idx in 0..5 {
            let scale = full.values[0].abs().max(1.0);
            assert!(
                (partial.values[idx] - full.values[idx]).abs() <= 1e-8 * scale,
                "eigenvalue mismatch at {}: {} vs {}",
                idx,
                partial.values[idx],
                full.values[idx]
            );
            let alignment = partial.vectors.column(idx).dot(&full.vectors.column(idx));
            assert!(alignment.abs() > 1.0 - 1e-6);
        }
    }

    #[test]
    fn partial_rejects_half_rank_requests() {
        let mut rng = StdRng::seed_from_u64(7);
        let matrix = random_psd(100, 60, &mut rng);
        assert!(matches!(
            partial_top_eigh(&matrix, 50),
            Err(FaerLinalgError::PartialEigenTooWide { requested: 50, n: 100 })
        ));
    }

    #[test]
    fn cholesky_solves_spd_system() {
        let gram = array![[4.0, 1.0], [1.0, 3.0]];
        let rhs = array![[1.0, 0.0], [2.0, 1.0]];
        let factor = gram.cholesky(Side::Lower).unwrap();
        let solution = factor.solve_mat(&rhs);
        let reconstructed = gram.dot(&solution);
        for (lhs, rhs) in reconstructed.iter().zip(rhs.iter()) {
            assert!((lhs - rhs).abs() < 1e-12);
        }
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let gram = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(gram.cholesky(Side::Lower).is_err());
    }
}
