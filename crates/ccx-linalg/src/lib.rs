//! Sparse linear algebra for the CalculiX Rust migration.
//!
//! Row-compressed value storage over a shared sparsity pattern, parallel
//! multiply and assembly kernels, matrix interchange formats, and a solver
//! layer that picks a compiled-in factorization or Krylov backend from a
//! packed matrix type descriptor.

pub(crate) mod atomic;
pub mod backend;
pub mod csr;
pub mod flags;
pub mod io;
pub mod scalar;
pub mod topology;

pub use backend::{
    BackendEntry, BackendScalar, ConvertingSolver, SolverConfig, SolverError, SolverFactory,
    SolverState, SolverStatistics, SparseSolver, create_converting, default_solver,
};
pub use csr::SparseMatrix;
pub use flags::{Definiteness, MatrixTypeFlag, Shape, Symmetry, ValueDomain};
pub use io::InterchangeError;
pub use scalar::{Cast, ElementKind, Scalar};
pub use topology::{PatternError, SparseTopology};
