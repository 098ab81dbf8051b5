//! Solver backend abstraction layer.
//!
//! Callers factor and solve through [`SparseSolver`] without knowing which
//! algorithm runs underneath. Concrete backends are compiled in through
//! cargo features and registered with the [`SolverFactory`] in order of
//! preference.
//!
//! # Backends
//!
//! - **sparse-cholesky** (`--features cholesky`): nalgebra-sparse Cholesky
//!   with a reusable symbolic analysis. Real SPD systems.
//! - **conjugate-gradient** (`--features iterative`): Jacobi-preconditioned
//!   CG. Real SPD systems, no factorization.
//! - **dense-lu** (`--features dense-lu`): dense partial-pivoting LU. Any
//!   square system and every element kind.
//! - **lsqr** (`--features iterative`): least-squares Krylov solver for
//!   real systems of any shape.
//!
//! # Architecture
//!
//! ```text
//! Assembly (SparseMatrix<T>, right-hand sides)
//!         │
//!         ▼
//! SolverFactory<T>  ── MatrixTypeFlag ──▶ first matching BackendEntry
//!         │
//!         ▼
//! Box<dyn SparseSolver<T>>  (optionally ConvertingSolver<I, S>)
//!    ┌────────┬─────────┴──┬──────────┐
//!    ▼        ▼            ▼          ▼
//! Cholesky    CG        Dense LU     LSQR
//! ```

pub mod config;
pub mod converting;
pub mod factory;
pub mod traits;

#[cfg(feature = "cholesky")]
pub mod cholesky;
#[cfg(feature = "dense-lu")]
pub mod dense_lu;
#[cfg(feature = "iterative")]
pub mod iterative;

pub use config::{Ordering, PreconditionerKind, SolverConfig};
pub use converting::ConvertingSolver;
pub use factory::{BackendEntry, BackendScalar, SolverFactory, create_converting, default_solver};
pub use traits::{SolverError, SolverState, SolverStatistics, SparseSolver};

#[cfg(feature = "cholesky")]
pub use cholesky::SparseCholesky;
#[cfg(feature = "dense-lu")]
pub use dense_lu::DenseLu;
#[cfg(feature = "iterative")]
pub use iterative::{ConjugateGradient, LsqrSolver};

use crate::flags::MatrixTypeFlag;
use crate::scalar::Scalar;

/// Whether `flag`'s value domain agrees with the element type `T`.
#[allow(dead_code)]
pub(crate) fn domain_matches<T: Scalar>(flag: MatrixTypeFlag) -> bool {
    flag.is_unknown()
        || if T::PARTS == 2 {
            flag.is_complex()
        } else {
            flag.is_real()
        }
}
