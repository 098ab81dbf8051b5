//! Preconditioned conjugate gradient for symmetric positive definite systems.

use std::time::Instant;

use nalgebra::{DMatrix, RealField};

use super::{DiagonalScaling, Identity, LinearOperator, RightPreconditioner, axpy, dot, norm, scale};
use crate::backend::config::{PreconditionerKind, SolverConfig};
use crate::backend::traits::{
    HandleState, SolverError, SolverState, SolverStatistics, SparseSolver,
};
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::Scalar;

/// Algorithm parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgParams {
    /// Stop when `‖r‖ ≤ abs_tolerance`.
    pub abs_tolerance: f64,
    /// Stop when `‖r‖ ≤ rel_tolerance ‖b‖`.
    pub rel_tolerance: f64,
    /// `0` means `2 n`.
    pub max_iterations: usize,
}

impl Default for CgParams {
    fn default() -> Self {
        Self {
            abs_tolerance: 0.0,
            rel_tolerance: 1e-10,
            max_iterations: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CgResult<T> {
    pub x: Vec<T>,
    pub iterations: usize,
    pub abs_residual: f64,
    pub rel_residual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CgError {
    /// `pᵀ A p ≤ 0` for some search direction.
    NonPositiveDefiniteOperator { iteration: usize },
    /// `rᵀ M r ≤ 0` for some residual.
    NonPositiveDefinitePreconditioner { iteration: usize },
    NoConvergence {
        iterations: usize,
        abs_residual: f64,
        rel_residual: f64,
    },
}

/// Solve `A x = b` from `x = 0`; `precond` applies `M⁻¹ ≈ A⁻¹`.
pub fn conjugate_gradient<T, A, P>(
    op: &A,
    precond: &P,
    b: &[T],
    params: &CgParams,
) -> Result<CgResult<T>, CgError>
where
    T: Scalar + RealField,
    A: LinearOperator<T> + ?Sized,
    P: RightPreconditioner<T> + ?Sized,
{
    let n = op.nrows();
    debug_assert_eq!(op.ncols(), n, "conjugate gradient needs a square operator");
    debug_assert_eq!(b.len(), n, "conjugate gradient: right-hand side has wrong length");
    let max_iterations = if params.max_iterations > 0 {
        params.max_iterations
    } else {
        (2 * n).max(1)
    };

    let bnorm = norm(b);
    let mut x = vec![T::zero(); n];
    if bnorm == 0.0 {
        return Ok(CgResult {
            x,
            iterations: 0,
            abs_residual: 0.0,
            rel_residual: 0.0,
        });
    }
    let threshold = params.abs_tolerance.max(params.rel_tolerance * bnorm);

    let mut r = b.to_vec();
    let mut z = vec![T::zero(); n];
    let mut ap = vec![T::zero(); n];
    precond.apply(&r, &mut z);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    if rz <= 0.0 {
        return Err(CgError::NonPositiveDefinitePreconditioner { iteration: 0 });
    }
    let mut rnorm = bnorm;

    for iteration in 1..=max_iterations {
        op.apply(&p, &mut ap);
        let pap = dot(&p, &ap);
        if pap <= 0.0 {
            return Err(CgError::NonPositiveDefiniteOperator { iteration });
        }
        let alpha = rz / pap;
        axpy(&mut x, alpha, &p);
        axpy(&mut r, -alpha, &ap);
        rnorm = norm(&r);
        if rnorm <= threshold {
            return Ok(CgResult {
                x,
                iterations: iteration,
                abs_residual: rnorm,
                rel_residual: rnorm / bnorm,
            });
        }

        precond.apply(&r, &mut z);
        let rz_next = dot(&r, &z);
        if rz_next <= 0.0 {
            return Err(CgError::NonPositiveDefinitePreconditioner { iteration });
        }
        let beta = rz_next / rz;
        rz = rz_next;
        scale(&mut p, beta);
        axpy(&mut p, 1.0, &z);
    }

    Err(CgError::NoConvergence {
        iterations: max_iterations,
        abs_residual: rnorm,
        rel_residual: rnorm / bnorm,
    })
}

/// Jacobi-preconditioned CG behind the solver trait.
pub struct ConjugateGradient<T: Scalar + RealField> {
    handle: HandleState,
    params: CgParams,
    preconditioner: PreconditionerKind,
    matrix: Option<SparseMatrix<T>>,
    jacobi: Option<DiagonalScaling<T>>,
}

impl<T: Scalar + RealField> ConjugateGradient<T> {
    pub const NAME: &'static str = "conjugate-gradient";

    pub fn new(flag: MatrixTypeFlag) -> Self {
        Self {
            handle: HandleState::new(Self::NAME, flag),
            params: CgParams::default(),
            preconditioner: PreconditionerKind::Jacobi,
            matrix: None,
            jacobi: None,
        }
    }

    pub fn with_params(mut self, params: CgParams) -> Self {
        self.params = params;
        self
    }

    pub fn supports(flag: MatrixTypeFlag) -> bool {
        flag.is_spd() && flag.is_real()
    }

    pub fn create(flag: MatrixTypeFlag) -> Box<dyn SparseSolver<T>> {
        Box::new(Self::new(flag))
    }
}

impl<T: Scalar + RealField> SparseSolver<T> for ConjugateGradient<T> {
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
        if let Some(v) = config.tolerance() {
            self.params.rel_tolerance = v;
        }
        if let Some(v) = config.max_iterations() {
            self.params.max_iterations = v;
        }
        match config.preconditioner() {
            // column scaling would break symmetry
            Some(PreconditionerKind::ColumnScaling) | Some(PreconditionerKind::None) => {
                self.preconditioner = PreconditionerKind::None;
            }
            Some(PreconditionerKind::Jacobi) => self.preconditioner = PreconditionerKind::Jacobi,
            None => {}
        }
    }

    fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        let started = Instant::now();
        if matrix.nrows() != matrix.ncols() {
            let err = SolverError::Unsupported(format!(
                "conjugate gradient needs a square matrix, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            ));
            self.matrix = None;
            return Err(self.handle.failed(started, err));
        }
        if let Some(d) = matrix.diagonal().iter().position(|d| d.to_lanes()[0] <= 0.0) {
            let err = SolverError::NotPositiveDefinite(format!("diagonal entry {d} is not positive"));
            self.matrix = None;
            return Err(self.handle.failed(started, err));
        }
        self.jacobi = match self.preconditioner {
            PreconditionerKind::Jacobi => Some(DiagonalScaling::jacobi(matrix)),
            _ => None,
        };
        self.matrix = Some(matrix.clone());
        self.handle
            .factored(started, SolverState::Factored, matrix.memory_bytes());
        Ok(())
    }

    fn solve_multi(&mut self, rhs: &DMatrix<T>) -> Result<DMatrix<T>, SolverError> {
        self.handle.require_factored("solve")?;
        let matrix = self.matrix.as_ref().ok_or(SolverError::NotFactored)?;
        HandleState::check_dimension(matrix.nrows(), rhs.nrows())?;
        let started = Instant::now();

        let mut x = DMatrix::zeros(rhs.nrows(), rhs.ncols());
        let mut iterations = 0;
        for (k, column) in rhs.column_iter().enumerate() {
            let b: Vec<T> = column.iter().copied().collect();
            let outcome = match &self.jacobi {
                Some(m) => conjugate_gradient(matrix, m, &b, &self.params),
                None => conjugate_gradient(matrix, &Identity, &b, &self.params),
            };
            match outcome {
                Ok(result) => {
                    iterations += result.iterations;
                    x.column_mut(k).copy_from_slice(&result.x);
                }
                Err(e) => {
                    let err = match e {
                        CgError::NoConvergence {
                            iterations,
                            rel_residual,
                            ..
                        } => SolverError::NotConverged {
                            reason: format!("relative residual {rel_residual:.3e}"),
                            iterations,
                        },
                        CgError::NonPositiveDefiniteOperator { iteration } => {
                            SolverError::NotPositiveDefinite(format!(
                                "pᵀAp ≤ 0 at iteration {iteration}"
                            ))
                        }
                        CgError::NonPositiveDefinitePreconditioner { iteration } => {
                            SolverError::NotPositiveDefinite(format!(
                                "preconditioner lost definiteness at iteration {iteration}"
                            ))
                        }
                    };
                    self.handle.message = format!("column {k}: {err}");
                    self.handle.stats.record_solve(started.elapsed());
                    log::warn!("{}: {}", Self::NAME, self.handle.message);
                    return Err(err);
                }
            }
        }

        self.handle.message = format!("converged in {iterations} iterations");
        self.handle.solved(started);
        Ok(x)
    }

    /// Symmetric matrices are their own transpose.
    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        self.handle.transposed = enable;
        Ok(())
    }

    fn release(&mut self) {
        self.matrix = None;
        self.jacobi = None;
        self.handle.release();
    }
}
