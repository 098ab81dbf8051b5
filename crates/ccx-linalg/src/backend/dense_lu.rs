//! Dense LU backend using nalgebra.
//!
//! Densifies the sparse matrix and runs partial-pivoting LU. Works for every
//! element kind and any square matrix, so the factory keeps it as the
//! fallback behind the sparse and iterative backends. Memory is `O(n²)`;
//! intended for small systems and as a reference in tests.

use std::time::Instant;

use nalgebra::{DMatrix, Dyn, LU};

use super::config::SolverConfig;
use super::traits::{HandleState, SolverError, SolverState, SolverStatistics, SparseSolver};
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::Scalar;

pub struct DenseLu<T: Scalar> {
    handle: HandleState,
    lu: Option<LU<T, Dyn, Dyn>>,
    size: usize,
}

impl<T: Scalar> DenseLu<T> {
    pub const NAME: &'static str = "dense-lu";

    pub fn new(flag: MatrixTypeFlag) -> Self {
        Self {
            handle: HandleState::new(Self::NAME, flag),
            lu: None,
            size: 0,
        }
    }

    pub fn supports(flag: MatrixTypeFlag) -> bool {
        flag.is_unknown() || (flag.is_square() && super::domain_matches::<T>(flag))
    }

    pub fn create(flag: MatrixTypeFlag) -> Box<dyn SparseSolver<T>> {
        Box::new(Self::new(flag))
    }

    fn solve_transposed(lu: &LU<T, Dyn, Dyn>, rhs: &DMatrix<T>) -> Option<DMatrix<T>> {
        // PA = LU, so Aᵀ = Uᵀ Lᵀ P
        let mut x = rhs.clone();
        if !lu.u().tr_solve_upper_triangular_mut(&mut x) {
            return None;
        }
        if !lu.l().tr_solve_lower_triangular_mut(&mut x) {
            return None;
        }
        lu.p().inv_permute_rows(&mut x);
        Some(x)
    }
}

impl<T: Scalar> SparseSolver<T> for DenseLu<T> {
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
    }

    fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        let started = Instant::now();
        self.lu = None;
        let n = matrix.nrows();
        if matrix.ncols() != n {
            let err = SolverError::Unsupported(format!(
                "LU needs a square matrix, got {}x{}",
                n,
                matrix.ncols()
            ));
            return Err(self.handle.failed(started, err));
        }

        let lu = matrix.to_dense().lu();
        if !lu.is_invertible() {
            let err = SolverError::Singular(format!("zero pivot in {n}x{n} LU factorization"));
            return Err(self.handle.failed(started, err));
        }
        self.lu = Some(lu);
        self.size = n;
        log::debug!("{}: factored {n}x{n} dense matrix", Self::NAME);
        self.handle
            .factored(started, SolverState::Factored, n * n * std::mem::size_of::<T>());
        Ok(())
    }

    fn solve_multi(&mut self, rhs: &DMatrix<T>) -> Result<DMatrix<T>, SolverError> {
        self.handle.require_factored("solve")?;
        let lu = self.lu.as_ref().ok_or(SolverError::NotFactored)?;
        HandleState::check_dimension(self.size, rhs.nrows())?;
        let started = Instant::now();

        let x = if self.handle.transposed {
            Self::solve_transposed(lu, rhs)
        } else {
            lu.solve(rhs)
        }
        .ok_or_else(|| SolverError::Singular("triangular solve hit a zero pivot".into()))?;

        self.handle.solved(started);
        Ok(x)
    }

    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        self.handle.transposed = enable;
        Ok(())
    }

    fn release(&mut self) {
        self.lu = None;
        self.handle.release();
    }
}
