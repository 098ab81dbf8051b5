//! Sparse Cholesky backend (real symmetric positive definite systems).
//!
//! Symbolic analysis and numeric factorization come from
//! `nalgebra_sparse::factorization`. The symbolic plan is kept between calls,
//! so [`refactor`](SparseSolver::refactor) only redoes the numeric phase.
//!
//! The matrix must store both triangles. A symmetric CSR pattern is also a
//! valid CSC pattern of the same matrix, so the row layout is handed to the
//! factorization without conversion.

use std::time::Instant;

use nalgebra::{DMatrix, RealField};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::factorization::{CholeskyError, CscCholesky, CscSymbolicCholesky};

use super::config::{Ordering, SolverConfig};
use super::traits::{HandleState, SolverError, SolverState, SolverStatistics, SparseSolver};
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::Scalar;

/// Fill-reducing permutation applied before factorization.
struct Reordering {
    /// `perm[new] = old`
    perm: Vec<usize>,
    /// Source position in the caller's value array for each permuted entry.
    gather: Vec<usize>,
}

pub struct SparseCholesky<T: Scalar + RealField> {
    handle: HandleState,
    ordering: Ordering,
    reordering: Option<Reordering>,
    chol: Option<CscCholesky<T>>,
    size: usize,
}

impl<T: Scalar + RealField> SparseCholesky<T> {
    pub const NAME: &'static str = "sparse-cholesky";

    pub fn new(flag: MatrixTypeFlag) -> Self {
        Self {
            handle: HandleState::new(Self::NAME, flag),
            ordering: Ordering::default(),
            reordering: None,
            chol: None,
            size: 0,
        }
    }

    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn supports(flag: MatrixTypeFlag) -> bool {
        flag.is_spd() && flag.is_real()
    }

    pub fn create(flag: MatrixTypeFlag) -> Box<dyn SparseSolver<T>> {
        Box::new(Self::new(flag))
    }

    fn permuted_values(&self, matrix: &SparseMatrix<T>) -> Vec<T> {
        match &self.reordering {
            Some(r) => r.gather.iter().map(|&p| matrix.values()[p]).collect(),
            None => matrix.values().to_vec(),
        }
    }

    fn factor_inner(&mut self, matrix: &SparseMatrix<T>) -> Result<CscCholesky<T>, SolverError> {
        let n = matrix.nrows();
        if matrix.ncols() != n {
            return Err(SolverError::Unsupported(format!(
                "Cholesky needs a square matrix, got {}x{}",
                n,
                matrix.ncols()
            )));
        }
        let topology = matrix.topology();
        if topology.transpose(n).0 != **topology {
            return Err(SolverError::Unsupported(
                "Cholesky needs a structurally symmetric pattern with both triangles stored".into(),
            ));
        }

        let (offsets, indices) = match self.ordering {
            Ordering::Natural => {
                self.reordering = None;
                (topology.offsets().to_vec(), topology.indices().to_vec())
            }
            Ordering::ReverseCuthillMcKee => {
                let perm = topology.reverse_cuthill_mckee();
                let (permuted, gather) = topology.permuted(&perm, &perm);
                let parts = (permuted.offsets().to_vec(), permuted.indices().to_vec());
                self.reordering = Some(Reordering { perm, gather });
                parts
            }
        };

        let pattern = SparsityPattern::try_from_offsets_and_indices(n, n, offsets, indices)
            .map_err(|e| SolverError::Factorization(e.to_string()))?;
        let symbolic = CscSymbolicCholesky::factor(pattern);
        let values = self.permuted_values(matrix);
        CscCholesky::factor_numerical(symbolic, &values).map_err(cholesky_error)
    }

    fn factor_memory(chol: &CscCholesky<T>) -> usize {
        chol.l().nnz() * (std::mem::size_of::<T>() + std::mem::size_of::<usize>())
    }
}

fn cholesky_error(err: CholeskyError) -> SolverError {
    match err {
        CholeskyError::NotPositiveDefinite => {
            SolverError::NotPositiveDefinite("non-positive pivot in numeric Cholesky".into())
        }
        other => SolverError::Factorization(format!("{other:?}")),
    }
}

impl<T: Scalar + RealField> SparseSolver<T> for SparseCholesky<T> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn matrix_type(&self) -> MatrixTypeFlag {
        self.handle.flag
    }

    fn state(&self) -> SolverState {
        self.handle.state
    }

    fn statistics(&self) -> &SolverStatistics {
        &self.handle.stats
    }

    fn message(&self) -> &str {
        &self.handle.message
    }

    fn configure(&mut self, config: &SolverConfig) {
        self.handle.configure(config);
        if let Some(ordering) = config.ordering() {
            self.ordering = ordering;
        }
    }

    fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        let started = Instant::now();
        self.chol = None;
        match self.factor_inner(matrix) {
            Ok(chol) => {
                let memory = Self::factor_memory(&chol);
                log::debug!(
                    "{}: n = {}, nnz(A) = {}, nnz(L) = {}, ordering = {}",
                    Self::NAME,
                    matrix.nrows(),
                    matrix.nonzero(),
                    chol.l().nnz(),
                    self.ordering.name()
                );
                self.size = matrix.nrows();
                self.chol = Some(chol);
                self.handle.factored(started, SolverState::Factored, memory);
                Ok(())
            }
            Err(err) => {
                self.reordering = None;
                Err(self.handle.failed(started, err))
            }
        }
    }

    fn refactor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        self.handle.require_factored("refactor")?;
        let started = Instant::now();
        let values = self.permuted_values(matrix);
        let Some(chol) = self.chol.as_mut() else {
            return Err(SolverError::NotFactored);
        };
        match chol.refactor(&values) {
            Ok(()) => {
                let memory = Self::factor_memory(chol);
                self.handle.factored(started, SolverState::Refactored, memory);
                Ok(())
            }
            Err(err) => {
                self.chol = None;
                self.reordering = None;
                Err(self.handle.failed(started, cholesky_error(err)))
            }
        }
    }

    fn solve_multi(&mut self, rhs: &DMatrix<T>) -> Result<DMatrix<T>, SolverError> {
        self.handle.require_factored("solve")?;
        let chol = self.chol.as_ref().ok_or(SolverError::NotFactored)?;
        HandleState::check_dimension(self.size, rhs.nrows())?;
        let started = Instant::now();

        let x = match &self.reordering {
            None => chol.solve(rhs),
            Some(r) => {
                let y = chol.solve(&rhs.select_rows(r.perm.iter()));
                let mut x = DMatrix::zeros(rhs.nrows(), rhs.ncols());
                for (new, &old) in r.perm.iter().enumerate() {
                    x.row_mut(old).copy_from(&y.row(new));
                }
                x
            }
        };

        self.handle.solved(started);
        Ok(x)
    }

    /// Symmetric matrices are their own transpose.
    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        self.handle.transposed = enable;
        Ok(())
    }

    /// Squared ratio of the extreme diagonal entries of `L`.
    ///
    /// Lower-bound style estimate, not a norm-based condition number.
    fn condest(&self) -> f64 {
        let Some(chol) = &self.chol else {
            return 0.0;
        };
        let l = chol.l();
        let mut lo = f64::INFINITY;
        let mut hi = 0.0f64;
        for j in 0..l.ncols() {
            let col = l.col(j);
            if let Some(pos) = col.row_indices().iter().position(|&i| i == j) {
                let d = col.values()[pos].modulus_f64();
                lo = lo.min(d);
                hi = hi.max(d);
            }
        }
        if lo > 0.0 && lo.is_finite() {
            (hi / lo).powi(2)
        } else {
            0.0
        }
    }

    fn release(&mut self) {
        self.chol = None;
        self.reordering = None;
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    /// 1D Laplacian with Dirichlet ends, SPD.
    fn laplacian(n: usize) -> SparseMatrix<f64> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push((i, i, 2.0));
            if i > 0 {
                triplets.push((i, i - 1, -1.0));
                triplets.push((i - 1, i, -1.0));
            }
        }
        SparseMatrix::from_triplets(n, n, &triplets)
    }

    #[test]
    fn solves_two_by_two_spd() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]);
        let mut solver = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD);
        solver.factor(&a).unwrap();
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let x = solver.solve(&b).unwrap();
        // exact solution [1/11, 7/11]
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-14);
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-14);
        assert!(solver.condest() >= 1.0);
    }

    #[test]
    fn rcm_ordering_gives_same_solution() {
        let a = laplacian(40);
        let b = DVector::from_fn(40, |i, _| (i as f64).sin());
        let mut natural = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD);
        let mut rcm = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD)
            .with_ordering(Ordering::ReverseCuthillMcKee);
        natural.factor(&a).unwrap();
        rcm.factor(&a).unwrap();
        let x1 = natural.solve(&b).unwrap();
        let x2 = rcm.solve(&b).unwrap();
        assert!((&x1 - &x2).norm() < 1e-10);
        assert!((a.mul_vec(&x2) - &b).norm() < 1e-10);
    }

    #[test]
    fn refactor_reuses_symbolic_plan() {
        let mut a = laplacian(10);
        let mut solver = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD)
            .with_ordering(Ordering::ReverseCuthillMcKee);
        solver.factor(&a).unwrap();
        a.add_diagonal(1.0);
        solver.refactor(&a).unwrap();
        assert_eq!(solver.state(), SolverState::Refactored);
        let b = DVector::from_element(10, 1.0);
        let x = solver.solve(&b).unwrap();
        assert!((a.mul_vec(&x) - &b).norm() < 1e-12);
        assert_eq!(solver.statistics().factor_count, 2);
    }

    #[test]
    fn indefinite_matrix_is_rejected() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 1.0)]);
        let mut solver = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD);
        let err = solver.factor(&a).unwrap_err();
        assert!(matches!(err, SolverError::NotPositiveDefinite(_)));
        assert_eq!(solver.state(), SolverState::Unconfigured);
        assert!(!solver.message().is_empty());
    }

    #[test]
    fn one_sided_pattern_is_rejected() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 2.0), (1, 0, 1.0), (1, 1, 2.0)]);
        let mut solver = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD);
        assert!(matches!(solver.factor(&a), Err(SolverError::Unsupported(_))));
    }

    #[test]
    fn config_selects_ordering() {
        let mut solver = SparseCholesky::<f64>::new(MatrixTypeFlag::REAL_SPD);
        solver.configure(&SolverConfig::new().with(crate::backend::config::ORDERING, "rcm"));
        assert_eq!(solver.ordering, Ordering::ReverseCuthillMcKee);
    }
}
