//! Solver trait and the bookkeeping shared by every backend.
//!
//! A handle moves through `Unconfigured → Factored → (Refactored | Solved)*`
//! and back to `Unconfigured` on [`release`](SparseSolver::release) or on a
//! failed factorization. Calling `solve` or `refactor` on a handle that was
//! never factored is a programming error: debug builds panic, release builds
//! report [`SolverError::NotFactored`].

use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

use crate::backend::config::SolverConfig;
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::{ElementKind, Scalar};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("factorization failed: {0}")]
    Factorization(String),

    #[error("matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("matrix is singular: {0}")]
    Singular(String),

    #[error("no convergence after {iterations} iterations: {reason}")]
    NotConverged { reason: String, iterations: usize },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("no backend supports a {matrix_type} matrix with {precision} values")]
    NoBackend {
        matrix_type: MatrixTypeFlag,
        precision: ElementKind,
    },

    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("solver has no factorization")]
    NotFactored,

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Lifecycle position of a solver handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SolverState {
    #[default]
    Unconfigured,
    Factored,
    Refactored,
    Solved,
}

impl SolverState {
    pub fn has_factorization(self) -> bool {
        !matches!(self, SolverState::Unconfigured)
    }
}

/// Call counters and timings. Reset only when a handle is constructed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SolverStatistics {
    pub factor_count: u64,
    pub solve_count: u64,
    pub factor_time: Duration,
    pub solve_time: Duration,
    /// Largest backend-private storage footprint seen, in bytes.
    pub peak_memory: usize,
}

impl SolverStatistics {
    pub fn record_factor(&mut self, elapsed: Duration) {
        self.factor_count += 1;
        self.factor_time += elapsed;
    }

    pub fn record_solve(&mut self, elapsed: Duration) {
        self.solve_count += 1;
        self.solve_time += elapsed;
    }

    pub fn observe_memory(&mut self, bytes: usize) {
        self.peak_memory = self.peak_memory.max(bytes);
    }
}

/// Sparse linear solver handle.
///
/// One implementation per backend, handed out as `Box<dyn SparseSolver<T>>`
/// by the [`SolverFactory`](crate::backend::SolverFactory).
pub trait SparseSolver<T: Scalar>: Send {
    /// Backend name as registered with the factory.
    fn name(&self) -> &str;

    /// Descriptor the handle was created for.
    fn matrix_type(&self) -> MatrixTypeFlag;

    fn state(&self) -> SolverState;

    fn statistics(&self) -> &SolverStatistics;

    /// Last backend diagnostic, verbatim. Empty when there is nothing to say.
    fn message(&self) -> &str;

    /// Apply backend settings. Keys the backend does not use are ignored.
    fn configure(&mut self, _config: &SolverConfig) {}

    /// Full symbolic and numeric factorization.
    ///
    /// On failure the handle is back in `Unconfigured` with no partial state.
    fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError>;

    /// Numeric-only factorization for a matrix with the pattern last passed
    /// to [`factor`](Self::factor).
    ///
    /// Passing a matrix with a different sparsity pattern is outside the
    /// contract and the result is unspecified. Backends without a cheaper
    /// numeric path run a full factorization.
    ///
    /// Requires a prior successful `factor`; debug builds panic otherwise.
    fn refactor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        debug_assert!(
            self.state().has_factorization(),
            "refactor called on a solver without factorization"
        );
        if !self.state().has_factorization() {
            return Err(SolverError::NotFactored);
        }
        self.factor(matrix)
    }

    /// Solve for every column of `rhs` at once.
    fn solve_multi(&mut self, rhs: &DMatrix<T>) -> Result<DMatrix<T>, SolverError>;

    /// Single right-hand side, as a one-column [`solve_multi`](Self::solve_multi).
    fn solve(&mut self, rhs: &DVector<T>) -> Result<DVector<T>, SolverError> {
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        let x = self.solve_multi(&b)?;
        Ok(DVector::from_column_slice(x.as_slice()))
    }

    /// [`refactor`](Self::refactor) followed by [`solve`](Self::solve).
    fn resolve(
        &mut self,
        matrix: &SparseMatrix<T>,
        rhs: &DVector<T>,
    ) -> Result<DVector<T>, SolverError> {
        self.refactor(matrix)?;
        self.solve(rhs)
    }

    /// Make subsequent solves target `Aᵀx = b`. The request stays in effect
    /// until switched off.
    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        if enable {
            Err(SolverError::Unsupported(format!(
                "{} cannot solve with the transposed matrix",
                self.name()
            )))
        } else {
            Ok(())
        }
    }

    /// Condition number estimate; `0.0` when the backend cannot estimate one.
    fn condest(&self) -> f64 {
        0.0
    }

    /// Drop the factorization. Calling it again has no effect.
    fn release(&mut self);
}

/// Lifecycle bookkeeping embedded in each backend.
#[derive(Debug, Default)]
pub(crate) struct HandleState {
    pub backend: &'static str,
    pub flag: MatrixTypeFlag,
    pub state: SolverState,
    pub stats: SolverStatistics,
    pub message: String,
    pub transposed: bool,
    pub verbosity: u32,
}

impl HandleState {
    pub fn new(backend: &'static str, flag: MatrixTypeFlag) -> Self {
        Self {
            backend,
            flag,
            ..Self::default()
        }
    }

    /// Settings every backend honours.
    pub fn configure(&mut self, config: &SolverConfig) {
        if let Some(v) = config.verbosity() {
            self.verbosity = v;
        }
    }

    fn timing_level(&self) -> log::Level {
        if self.verbosity > 0 {
            log::Level::Info
        } else {
            log::Level::Debug
        }
    }

    /// Guard for calls that need a factorization.
    pub fn require_factored(&self, operation: &str) -> Result<(), SolverError> {
        debug_assert!(
            self.state.has_factorization(),
            "{operation} called on a solver without factorization"
        );
        if self.state.has_factorization() {
            Ok(())
        } else {
            Err(SolverError::NotFactored)
        }
    }

    pub fn check_dimension(expected: usize, found: usize) -> Result<(), SolverError> {
        debug_assert_eq!(expected, found, "dimension mismatch");
        if expected == found {
            Ok(())
        } else {
            Err(SolverError::DimensionMismatch { expected, found })
        }
    }

    /// Record a successful (re)factorization.
    pub fn factored(&mut self, started: Instant, state: SolverState, memory: usize) {
        let elapsed = started.elapsed();
        log::log!(
            self.timing_level(),
            "{}: {} in {:.3?}",
            self.backend,
            if state == SolverState::Refactored { "refactor" } else { "factor" },
            elapsed
        );
        self.stats.record_factor(elapsed);
        self.stats.observe_memory(memory);
        self.state = state;
        self.message.clear();
    }

    /// Record a failed factorization and return the error for propagation.
    pub fn failed(&mut self, started: Instant, err: SolverError) -> SolverError {
        self.stats.record_factor(started.elapsed());
        self.state = SolverState::Unconfigured;
        self.message = err.to_string();
        log::warn!("{}: {}", self.backend, self.message);
        err
    }

    pub fn solved(&mut self, started: Instant) {
        let elapsed = started.elapsed();
        log::log!(self.timing_level(), "{}: solve in {:.3?}", self.backend, elapsed);
        self.stats.record_solve(elapsed);
        self.state = SolverState::Solved;
    }

    pub fn release(&mut self) {
        self.state = SolverState::Unconfigured;
        self.transposed = false;
    }
}
