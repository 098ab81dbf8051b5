//! Matrix-free Krylov solvers.
//!
//! The algorithms only see a [`LinearOperator`]: forward and transposed
//! products, never matrix entries. Right preconditioning substitutes
//! `x = M z` and runs the same algorithm on `A M`, which again exposes
//! both products through [`Preconditioned`].

pub mod cg;
pub mod lsqr;

pub use cg::{CgParams, CgResult, ConjugateGradient, conjugate_gradient};
pub use lsqr::{LsqrParams, LsqrResult, LsqrSolver, LsqrTermination, lsqr};

use crate::csr::SparseMatrix;
use crate::scalar::Scalar;

/// Operator exposing `y = A x` and `y = Aᵀ x`.
pub trait LinearOperator<T>: Sync {
    fn nrows(&self) -> usize;

    fn ncols(&self) -> usize;

    /// `y = A x`, overwriting `y`.
    fn apply(&self, x: &[T], y: &mut [T]);

    /// `y = Aᵀ x`, overwriting `y`.
    fn apply_transposed(&self, x: &[T], y: &mut [T]);
}

impl<T: Scalar, const N: usize> LinearOperator<T> for SparseMatrix<T, N> {
    fn nrows(&self) -> usize {
        SparseMatrix::nrows(self)
    }

    fn ncols(&self) -> usize {
        SparseMatrix::ncols(self)
    }

    fn apply(&self, x: &[T], y: &mut [T]) {
        self.multiply(x, T::zero(), y);
    }

    fn apply_transposed(&self, x: &[T], y: &mut [T]) {
        y.fill(T::zero());
        self.multiply_transposed(T::one(), x, y);
    }
}

/// Operator with forward and transposed products exchanged.
pub struct Transposed<'a, A: ?Sized>(pub &'a A);

impl<T, A: LinearOperator<T> + ?Sized> LinearOperator<T> for Transposed<'_, A> {
    fn nrows(&self) -> usize {
        self.0.ncols()
    }

    fn ncols(&self) -> usize {
        self.0.nrows()
    }

    fn apply(&self, x: &[T], y: &mut [T]) {
        self.0.apply_transposed(x, y);
    }

    fn apply_transposed(&self, x: &[T], y: &mut [T]) {
        self.0.apply(x, y);
    }
}

/// Right preconditioner `M`: the solver works in variables `z` with `x = M z`.
pub trait RightPreconditioner<T>: Sync {
    /// `x = M z`
    fn apply(&self, z: &[T], x: &mut [T]);

    /// `z = Mᵀ x`
    fn apply_transposed(&self, x: &[T], z: &mut [T]);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: Copy> RightPreconditioner<T> for Identity {
    fn apply(&self, z: &[T], x: &mut [T]) {
        x.copy_from_slice(z);
    }

    fn apply_transposed(&self, x: &[T], z: &mut [T]) {
        z.copy_from_slice(x);
    }
}

/// Diagonal preconditioner `M = diag(scale)`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalScaling<T> {
    scale: Vec<T>,
}

impl<T: Scalar> DiagonalScaling<T> {
    pub fn new(scale: Vec<T>) -> Self {
        Self { scale }
    }

    /// `1 / ‖A e_j‖₂` per column; empty columns get 1.
    pub fn column_scaling<const N: usize>(matrix: &SparseMatrix<T, N>) -> Self {
        let mut sums = vec![0.0f64; matrix.ncols()];
        let topology = matrix.topology();
        for (p, &j) in topology.indices().iter().enumerate() {
            for v in &matrix.values()[N * p..N * p + N] {
                sums[j] += v.modulus_f64().powi(2);
            }
        }
        Self::from_magnitudes(sums.into_iter().map(f64::sqrt))
    }

    /// `1 / |a_jj|` for every column `j`; columns without a usable diagonal
    /// get 1, including those past `min(nrows, ncols)` on a wide matrix.
    pub fn jacobi(matrix: &SparseMatrix<T>) -> Self {
        let diagonal = matrix.diagonal();
        Self::from_magnitudes(
            (0..matrix.ncols()).map(|j| diagonal.get(j).map_or(0.0, |d| d.modulus_f64())),
        )
    }

    fn from_magnitudes(magnitudes: impl Iterator<Item = f64>) -> Self {
        let scale = magnitudes
            .map(|m| {
                if m > 0.0 && m.is_finite() {
                    T::from_real_f64(m.recip())
                } else {
                    T::one()
                }
            })
            .collect();
        Self { scale }
    }

    pub fn scale(&self) -> &[T] {
        &self.scale
    }
}

impl<T: Scalar> RightPreconditioner<T> for DiagonalScaling<T> {
    fn apply(&self, z: &[T], x: &mut [T]) {
        debug_assert_eq!(self.scale.len(), z.len(), "scaling length differs from operator width");
        for ((xi, &zi), &s) in x.iter_mut().zip(z).zip(&self.scale) {
            *xi = zi * s;
        }
    }

    fn apply_transposed(&self, x: &[T], z: &mut [T]) {
        RightPreconditioner::apply(self, x, z);
    }
}

/// The operator `A M`.
pub struct Preconditioned<'a, A: ?Sized, P: ?Sized> {
    pub op: &'a A,
    pub precond: &'a P,
}

impl<T, A, P> LinearOperator<T> for Preconditioned<'_, A, P>
where
    T: Scalar,
    A: LinearOperator<T> + ?Sized,
    P: RightPreconditioner<T> + ?Sized,
{
    fn nrows(&self) -> usize {
        self.op.nrows()
    }

    fn ncols(&self) -> usize {
        self.op.ncols()
    }

    fn apply(&self, z: &[T], y: &mut [T]) {
        let mut x = vec![T::zero(); self.op.ncols()];
        self.precond.apply(z, &mut x);
        self.op.apply(&x, y);
    }

    fn apply_transposed(&self, u: &[T], z: &mut [T]) {
        let mut v = vec![T::zero(); self.op.ncols()];
        self.op.apply_transposed(u, &mut v);
        self.precond.apply_transposed(&v, z);
    }
}

// Dense vector kernels shared by the Krylov loops. Real scalars only, the
// recurrences run in f64.

pub(crate) fn norm<T: Scalar>(v: &[T]) -> f64 {
    v.iter()
        .map(|x| {
            let l = x.to_lanes();
            l[0] * l[0] + l[1] * l[1]
        })
        .sum::<f64>()
        .sqrt()
}

pub(crate) fn dot<T: Scalar>(a: &[T], b: &[T]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x.to_lanes()[0] * y.to_lanes()[0]).sum()
}

pub(crate) fn scale<T: Scalar>(v: &mut [T], s: f64) {
    let s = T::from_real_f64(s);
    for x in v {
        *x *= s;
    }
}

/// `y += a x`
pub(crate) fn axpy<T: Scalar>(y: &mut [T], a: f64, x: &[T]) {
    let a = T::from_real_f64(a);
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rectangular() -> SparseMatrix<f64> {
        // [[1,2],[0,3],[4,0]]
        SparseMatrix::from_triplets(3, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 1, 3.0), (2, 0, 4.0)])
    }

    #[test]
    fn operator_products() {
        let a = rectangular();
        let mut y = vec![f64::NAN; 3];
        LinearOperator::apply(&a, &[1.0, 1.0], &mut y);
        assert_eq!(y, vec![3.0, 3.0, 4.0]);
        let mut z = vec![f64::NAN; 2];
        LinearOperator::apply_transposed(&a, &[1.0, 1.0, 1.0], &mut z);
        assert_eq!(z, vec![5.0, 5.0]);
    }

    #[test]
    fn transposed_adaptor_swaps_shape() {
        let a = rectangular();
        let t = Transposed(&a);
        assert_eq!(LinearOperator::<f64>::nrows(&t), 2);
        assert_eq!(LinearOperator::<f64>::ncols(&t), 3);
        let mut y = vec![0.0; 2];
        t.apply(&[1.0, 1.0, 1.0], &mut y);
        assert_eq!(y, vec![5.0, 5.0]);
    }

    #[test]
    fn column_scaling_normalizes_columns() {
        let a = rectangular();
        let m = DiagonalScaling::column_scaling(&a);
        assert!((m.scale()[0] - 1.0 / 17f64.sqrt()).abs() < 1e-15);
        assert!((m.scale()[1] - 1.0 / 13f64.sqrt()).abs() < 1e-15);

        let op = Preconditioned { op: &a, precond: &m };
        let mut y = vec![0.0; 3];
        op.apply(&[17f64.sqrt(), 0.0], &mut y);
        assert!((y[0] - 1.0).abs() < 1e-14);
        assert!((y[2] - 4.0).abs() < 1e-14);
    }

    #[test]
    fn jacobi_skips_missing_diagonal() {
        let a = SparseMatrix::from_triplets(2, 2, &[(0, 0, -4.0), (1, 0, 1.0)]);
        let m = DiagonalScaling::jacobi(&a);
        assert_eq!(m.scale(), &[0.25, 1.0]);
    }

    #[test]
    fn jacobi_covers_every_column_of_a_wide_matrix() {
        let a = SparseMatrix::from_triplets(2, 3, &[(0, 0, 2.0), (1, 2, 1.0)]);
        let m = DiagonalScaling::jacobi(&a);
        assert_eq!(m.scale(), &[0.5, 1.0, 1.0]);

        let op = Preconditioned { op: &a, precond: &m };
        let mut y = vec![0.0; 2];
        op.apply(&[2.0, 0.0, 1.0], &mut y);
        assert_eq!(y, vec![2.0, 1.0]);
    }

    #[test]
    fn vector_kernels() {
        let mut y = vec![1.0f32, 2.0];
        axpy(&mut y, 2.0, &[1.0, -1.0]);
        assert_eq!(y, vec![3.0, 0.0]);
        scale(&mut y, 0.5);
        assert_eq!(y, vec![1.5, 0.0]);
        assert_eq!(norm(&[3.0f64, 4.0]), 5.0);
        assert_eq!(dot(&[1.0f64, 2.0], &[3.0, 4.0]), 11.0);
    }
}
