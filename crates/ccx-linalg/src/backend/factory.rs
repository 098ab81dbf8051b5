//! Backend selection.
//!
//! Each element type carries an ordered registry of the backends compiled
//! into this build. [`SolverFactory::create`] walks it top to bottom and
//! hands out the first backend whose predicate accepts the matrix type, so a
//! specialised backend listed early (sparse Cholesky for SPD systems) wins
//! over the general fallbacks behind it.

use std::fmt;

use num_complex::Complex;

use super::config::SolverConfig;
use super::converting::ConvertingSolver;
use super::traits::{SolverError, SparseSolver};
use crate::flags::MatrixTypeFlag;
use crate::scalar::{Cast, Scalar};

#[cfg(feature = "cholesky")]
use super::cholesky::SparseCholesky;
#[cfg(feature = "dense-lu")]
use super::dense_lu::DenseLu;
#[cfg(feature = "iterative")]
use super::iterative::{ConjugateGradient, LsqrSolver};

/// One registered backend: a predicate on the matrix type and a constructor.
pub struct BackendEntry<T: Scalar> {
    pub name: &'static str,
    pub supports: fn(MatrixTypeFlag) -> bool,
    pub create: fn(MatrixTypeFlag) -> Box<dyn SparseSolver<T>>,
}

impl<T: Scalar> BackendEntry<T> {
    pub const fn new(
        name: &'static str,
        supports: fn(MatrixTypeFlag) -> bool,
        create: fn(MatrixTypeFlag) -> Box<dyn SparseSolver<T>>,
    ) -> Self {
        Self {
            name,
            supports,
            create,
        }
    }
}

impl<T: Scalar> Clone for BackendEntry<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Scalar> Copy for BackendEntry<T> {}

impl<T: Scalar> fmt::Debug for BackendEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEntry").field("name", &self.name).finish()
    }
}

/// Element types with a compiled-in backend registry.
pub trait BackendScalar: Scalar {
    /// Backends in order of preference.
    fn backends() -> Vec<BackendEntry<Self>>;
}

macro_rules! real_backends {
    ($($t:ty),*) => {
        $(
            impl BackendScalar for $t {
                #[allow(unused_mut)]
                fn backends() -> Vec<BackendEntry<Self>> {
                    let mut entries = Vec::new();
                    #[cfg(feature = "cholesky")]
                    entries.push(BackendEntry::new(
                        SparseCholesky::<$t>::NAME,
                        SparseCholesky::<$t>::supports,
                        SparseCholesky::<$t>::create,
                    ));
                    #[cfg(feature = "iterative")]
                    entries.push(BackendEntry::new(
                        ConjugateGradient::<$t>::NAME,
                        ConjugateGradient::<$t>::supports,
                        ConjugateGradient::<$t>::create,
                    ));
                    #[cfg(feature = "dense-lu")]
                    entries.push(BackendEntry::new(
                        DenseLu::<$t>::NAME,
                        DenseLu::<$t>::supports,
                        DenseLu::<$t>::create,
                    ));
                    #[cfg(feature = "iterative")]
                    entries.push(BackendEntry::new(
                        LsqrSolver::<$t>::NAME,
                        LsqrSolver::<$t>::supports,
                        LsqrSolver::<$t>::create,
                    ));
                    entries
                }
            }
        )*
    };
}

macro_rules! complex_backends {
    ($($t:ty),*) => {
        $(
            impl BackendScalar for $t {
                #[allow(unused_mut)]
                fn backends() -> Vec<BackendEntry<Self>> {
                    let mut entries = Vec::new();
                    #[cfg(feature = "dense-lu")]
                    entries.push(BackendEntry::new(
                        DenseLu::<$t>::NAME,
                        DenseLu::<$t>::supports,
                        DenseLu::<$t>::create,
                    ));
                    entries
                }
            }
        )*
    };
}

real_backends!(f32, f64);
complex_backends!(Complex<f32>, Complex<f64>);

/// Ordered backend registry for element type `T`.
pub struct SolverFactory<T: Scalar> {
    entries: Vec<BackendEntry<T>>,
}

impl<T: BackendScalar> SolverFactory<T> {
    /// Registry with every backend compiled into this build.
    pub fn new() -> Self {
        Self {
            entries: T::backends(),
        }
    }
}

impl<T: BackendScalar> Default for SolverFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SolverFactory<T> {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_entries(entries: Vec<BackendEntry<T>>) -> Self {
        Self { entries }
    }

    /// Append a backend with the lowest preference.
    pub fn register(&mut self, entry: BackendEntry<T>) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[BackendEntry<T>] {
        &self.entries
    }

    /// Names of the registered backends, most preferred first.
    pub fn available(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    /// First registered backend accepting `flag`.
    pub fn create(&self, flag: MatrixTypeFlag) -> Result<Box<dyn SparseSolver<T>>, SolverError> {
        let entry = self
            .entries
            .iter()
            .find(|e| (e.supports)(flag))
            .ok_or(SolverError::NoBackend {
                matrix_type: flag,
                precision: T::KIND,
            })?;
        log::debug!("selected {} for {} matrix with {} values", entry.name, flag, T::KIND);
        Ok((entry.create)(flag))
    }

    /// A specific backend by name.
    pub fn create_named(
        &self,
        name: &str,
        flag: MatrixTypeFlag,
    ) -> Result<Box<dyn SparseSolver<T>>, SolverError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| SolverError::UnknownBackend(name.to_string()))?;
        if !(entry.supports)(flag) {
            return Err(SolverError::Unsupported(format!(
                "{name} does not handle {flag} matrices"
            )));
        }
        Ok((entry.create)(flag))
    }

    /// [`create`](Self::create) followed by [`configure`](SparseSolver::configure).
    pub fn create_configured(
        &self,
        flag: MatrixTypeFlag,
        config: &SolverConfig,
    ) -> Result<Box<dyn SparseSolver<T>>, SolverError> {
        let mut solver = self.create(flag)?;
        solver.configure(config);
        Ok(solver)
    }
}

/// Preferred compiled-in backend for `flag`.
pub fn default_solver<T: BackendScalar>(
    flag: MatrixTypeFlag,
) -> Result<Box<dyn SparseSolver<T>>, SolverError> {
    SolverFactory::<T>::new().create(flag)
}

/// Solver taking `I` values, running a backend selected for `S`.
///
/// `create_converting::<f32, f64>(flag)` gives a single-precision interface
/// over a double-precision factorization.
pub fn create_converting<I, S>(
    flag: MatrixTypeFlag,
) -> Result<Box<dyn SparseSolver<I>>, SolverError>
where
    I: Scalar + Cast<S>,
    S: BackendScalar + Cast<I>,
{
    let inner = SolverFactory::<S>::new().create(flag)?;
    Ok(Box::new(ConvertingSolver::<I, S>::new(inner)))
}
