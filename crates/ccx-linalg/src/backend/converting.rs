//! Precision adaptor: exposes a backend running in `S` as a solver in `I`.
//!
//! Matrices and right-hand sides are converted `I → S` on the way in and
//! solutions `S → I` on the way out. The adaptor keeps its own converted
//! copy of the last factored matrix, rebuilt on every `factor`/`refactor`.

use std::marker::PhantomData;

use nalgebra::DMatrix;

use super::config::SolverConfig;
use super::traits::{SolverError, SolverState, SolverStatistics, SparseSolver};
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::{Cast, Scalar};

pub struct ConvertingSolver<I: Scalar, S: Scalar> {
    inner: Box<dyn SparseSolver<S>>,
    matrix: Option<SparseMatrix<S>>,
    _outer: PhantomData<fn() -> I>,
}

impl<I, S> ConvertingSolver<I, S>
where
    I: Scalar + Cast<S>,
    S: Scalar + Cast<I>,
{
    pub fn new(inner: Box<dyn SparseSolver<S>>) -> Self {
        Self {
            inner,
            matrix: None,
            _outer: PhantomData,
        }
    }

    pub fn inner(&self) -> &dyn SparseSolver<S> {
        self.inner.as_ref()
    }

    /// Converted copy handed to the inner solver by the last (re)factor.
    pub fn converted_matrix(&self) -> Option<&SparseMatrix<S>> {
        self.matrix.as_ref()
    }

    pub fn into_inner(self) -> Box<dyn SparseSolver<S>> {
        self.inner
    }
}

impl<I, S> SparseSolver<I> for ConvertingSolver<I, S>
where
    I: Scalar + Cast<S>,
    S: Scalar + Cast<I>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn matrix_type(&self) -> MatrixTypeFlag {
        self.inner.matrix_type()
    }

    fn state(&self) -> SolverState {
        self.inner.state()
    }

    fn statistics(&self) -> &SolverStatistics {
        self.inner.statistics()
    }

    fn message(&self) -> &str {
        self.inner.message()
    }

    fn configure(&mut self, config: &SolverConfig) {
        self.inner.configure(config);
    }

    fn factor(&mut self, matrix: &SparseMatrix<I>) -> Result<(), SolverError> {
        log::trace!("converting {} -> {} for factor", I::KIND, S::KIND);
        let converted = self.matrix.insert(matrix.cast::<S>());
        let result = self.inner.factor(converted);
        if result.is_err() {
            self.matrix = None;
        }
        result
    }

    fn refactor(&mut self, matrix: &SparseMatrix<I>) -> Result<(), SolverError> {
        let converted = self.matrix.insert(matrix.cast::<S>());
        let result = self.inner.refactor(converted);
        if result.is_err() {
            self.matrix = None;
        }
        result
    }

    fn solve_multi(&mut self, rhs: &DMatrix<I>) -> Result<DMatrix<I>, SolverError> {
        let b = rhs.map(|v| Cast::<S>::cast(v));
        let x = self.inner.solve_multi(&b)?;
        Ok(x.map(|v| Cast::<I>::cast(v)))
    }

    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        self.inner.transposed(enable)
    }

    fn condest(&self) -> f64 {
        self.inner.condest()
    }

    fn release(&mut self) {
        self.matrix = None;
        self.inner.release();
    }
}

#[cfg(all(test, feature = "dense-lu"))]
mod tests {
    use super::*;
    use crate::backend::dense_lu::DenseLu;
    use nalgebra::DVector;
    use num_complex::Complex;

    #[test]
    fn solves_in_inner_precision() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 4.0f32), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)]);
        let inner = DenseLu::<f64>::create(MatrixTypeFlag::REAL_SPD);
        let mut solver = ConvertingSolver::<f32, f64>::new(inner);
        solver.factor(&a).unwrap();
        assert_eq!(solver.converted_matrix().unwrap().values(), &[4.0f64, 1.0, 1.0, 3.0]);

        let x = solver.solve(&DVector::from_vec(vec![1.0f32, 2.0])).unwrap();
        assert!((x[0] - 1.0 / 11.0).abs() <= f32::EPSILON);
        assert!((x[1] - 7.0 / 11.0).abs() <= f32::EPSILON);
        assert_eq!(solver.statistics().factor_count, 1);
        assert_eq!(solver.statistics().solve_count, 1);
        assert_eq!(solver.name(), DenseLu::<f64>::NAME);
    }

    #[test]
    fn failure_drops_converted_copy() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0f32), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 1.0)]);
        let mut solver = ConvertingSolver::<f32, f64>::new(DenseLu::<f64>::create(MatrixTypeFlag::UNKNOWN));
        assert!(matches!(solver.factor(&a), Err(SolverError::Singular(_))));
        assert!(solver.converted_matrix().is_none());
        assert_eq!(solver.state(), SolverState::Unconfigured);
        assert!(!solver.message().is_empty());
    }

    #[test]
    fn complex_precision_and_release() {
        let one = Complex::new(1.0f32, 0.0);
        let i = Complex::new(0.0f32, 1.0);
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, one * 2.0), (1, 1, i)]);
        let inner = DenseLu::<Complex<f64>>::create(MatrixTypeFlag::COMPLEX_UNSYMMETRIC);
        let mut solver = ConvertingSolver::<Complex<f32>, Complex<f64>>::new(inner);
        solver.factor(&a).unwrap();
        let x = solver.solve(&DVector::from_vec(vec![one * 2.0, one])).unwrap();
        assert!((x[0] - one).norm() < 1e-6);
        assert!((x[1] + i).norm() < 1e-6);

        solver.release();
        assert!(solver.converted_matrix().is_none());
        assert_eq!(solver.state(), SolverState::Unconfigured);
        assert_eq!(solver.statistics().factor_count, 1);
    }
}
