//! LSQR: least squares by Golub-Kahan bidiagonalization.
//!
//! Solves `min ‖A x - b‖² + damp² ‖x‖²` for any shape of `A`. Each iteration
//! costs one forward and one transposed product. Running estimates of
//! `‖A‖`, `cond(A)`, `‖x‖` and the residual norms drive the stopping tests.
//!
//! An optional trust-region radius bounds `‖x‖`. When an update would leave
//! the ball, the step between the previous and the new iterate is cut where
//! it crosses the sphere, so the returned iterate lies on the radius.
//!
//! Reference: C. C. Paige and M. A. Saunders, "LSQR: An algorithm for sparse
//! linear equations and sparse least squares", ACM TOMS 8(1), 1982.

use std::time::Instant;

use nalgebra::{DMatrix, RealField};
use serde::{Deserialize, Serialize};

use super::{
    DiagonalScaling, Identity, LinearOperator, Preconditioned, RightPreconditioner, Transposed,
    axpy, dot, norm, scale,
};
use crate::backend::config::{PreconditionerKind, SolverConfig};
use crate::backend::traits::{
    HandleState, SolverError, SolverState, SolverStatistics, SparseSolver,
};
use crate::csr::SparseMatrix;
use crate::flags::MatrixTypeFlag;
use crate::scalar::Scalar;

/// Algorithm parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LsqrParams {
    /// Relative error in `A`; also the normal-equation residual tolerance.
    pub atol: f64,
    /// Relative error in `b`.
    pub btol: f64,
    /// Stop once the condition estimate exceeds this; `0` disables the test.
    pub conlim: f64,
    pub max_iterations: usize,
    pub damp: f64,
    /// Bound on `‖x‖`; `None` for an unbounded solve.
    pub radius: Option<f64>,
}

impl Default for LsqrParams {
    fn default() -> Self {
        Self {
            atol: 1e-8,
            btol: 1e-8,
            conlim: 1e8,
            max_iterations: 0,
            damp: 0.0,
            radius: None,
        }
    }
}

impl LsqrParams {
    /// Iteration cap for an `m x n` problem; an explicit cap of 0 means `4 n`.
    pub fn iteration_limit(&self, ncols: usize) -> usize {
        if self.max_iterations > 0 {
            self.max_iterations
        } else {
            (4 * ncols).max(1)
        }
    }
}

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LsqrTermination {
    /// `b = 0`, so `x = 0` is exact.
    TrivialSolution,
    /// `‖b - A x‖` is within the `atol`/`btol` tolerance (or machine precision).
    ResidualTolerance,
    /// `‖Aᵀ r‖` is small: `x` solves the least squares problem.
    SolutionTolerance,
    /// The condition estimate exceeded `conlim` (or machine precision).
    ConditionLimit,
    IterationLimit,
    /// The iterate reached the trust-region radius.
    TrustRegion,
}

impl LsqrTermination {
    /// Whether the returned iterate is a usable answer.
    pub fn is_success(self) -> bool {
        !matches!(self, LsqrTermination::ConditionLimit | LsqrTermination::IterationLimit)
    }

    pub fn describe(self) -> &'static str {
        match self {
            LsqrTermination::TrivialSolution => "b is zero, x = 0 is exact",
            LsqrTermination::ResidualTolerance => "residual tolerance reached",
            LsqrTermination::SolutionTolerance => "least-squares solution tolerance reached",
            LsqrTermination::ConditionLimit => "condition number limit exceeded",
            LsqrTermination::IterationLimit => "iteration limit reached",
            LsqrTermination::TrustRegion => "solution norm reached the trust-region radius",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LsqrResult<T> {
    pub x: Vec<T>,
    pub termination: LsqrTermination,
    pub iterations: usize,
    /// `‖b - A x‖`
    pub residual_norm: f64,
    /// `‖Aᵀ (b - A x) - damp² x‖`
    pub normal_residual_norm: f64,
    pub anorm: f64,
    pub acond: f64,
    pub xnorm: f64,
}

/// Smallest positive `τ` with `‖x + τ d‖ = radius`.
fn boundary_step(xx: f64, xd: f64, dd: f64, radius: f64) -> Option<f64> {
    if dd <= 0.0 {
        return None;
    }
    // dd τ² + 2 xd τ + (xx - r²) = 0
    let c = xx - radius * radius;
    let disc = xd * xd - dd * c;
    if disc < 0.0 {
        return None;
    }
    let sq = disc.sqrt();
    // stable pair of roots
    let q = -(xd + xd.signum() * sq);
    let (r1, r2) = if q != 0.0 { (q / dd, c / q) } else { (sq / dd, -sq / dd) };
    let (lo, hi) = if r1 <= r2 { (r1, r2) } else { (r2, r1) };
    if lo > 0.0 {
        Some(lo)
    } else if hi > 0.0 {
        Some(hi)
    } else {
        None
    }
}

/// Run LSQR on `op` with right-hand side `b`, starting from `x = 0`.
pub fn lsqr<T, A>(op: &A, b: &[T], params: &LsqrParams) -> LsqrResult<T>
where
    T: Scalar + RealField,
    A: LinearOperator<T> + ?Sized,
{
    let m = op.nrows();
    let n = op.ncols();
    debug_assert_eq!(b.len(), m, "lsqr: right-hand side has wrong length");
    let itnlim = params.iteration_limit(n);
    let ctol = if params.conlim > 0.0 { params.conlim.recip() } else { 0.0 };
    let damp = params.damp;
    let dampsq = damp * damp;
    let eps = f64::EPSILON;

    let mut x = vec![T::zero(); n];
    let mut u = b.to_vec();
    let mut v = vec![T::zero(); n];
    let mut tmp_m = vec![T::zero(); m];
    let mut tmp_n = vec![T::zero(); n];

    let mut beta = norm(&u);
    if beta > 0.0 {
        scale(&mut u, beta.recip());
        op.apply_transposed(&u, &mut v);
    }
    let mut alpha = norm(&v);
    if alpha > 0.0 {
        scale(&mut v, alpha.recip());
    }
    let mut w = v.clone();

    let bnorm = beta;
    let mut result = LsqrResult {
        x: Vec::new(),
        termination: LsqrTermination::TrivialSolution,
        iterations: 0,
        residual_norm: beta,
        normal_residual_norm: alpha * beta,
        anorm: 0.0,
        acond: 0.0,
        xnorm: 0.0,
    };
    if alpha * beta == 0.0 {
        // b = 0, or b orthogonal to range(A) so x = 0 already minimizes
        if beta > 0.0 {
            result.termination = LsqrTermination::SolutionTolerance;
        }
        result.x = x;
        return result;
    }

    let mut rhobar = alpha;
    let mut phibar = beta;
    let mut anorm = 0.0f64;
    let mut acond = 0.0f64;
    let mut ddnorm = 0.0f64;
    let mut res2 = 0.0f64;
    let mut xnorm = 0.0f64;
    let mut xxnorm = 0.0f64;
    let mut z = 0.0f64;
    let mut cs2 = -1.0f64;
    let mut sn2 = 0.0f64;
    let mut rnorm = beta;
    let mut arnorm = alpha * beta;
    let mut termination = LsqrTermination::IterationLimit;
    let mut itn = 0;

    while itn < itnlim {
        itn += 1;

        // bidiagonalization: beta u = A v - alpha u, alpha v = Aᵀ u - beta v
        op.apply(&v, &mut tmp_m);
        scale(&mut u, -alpha);
        axpy(&mut u, 1.0, &tmp_m);
        beta = norm(&u);
        if beta > 0.0 {
            scale(&mut u, beta.recip());
            anorm = (anorm * anorm + alpha * alpha + beta * beta + dampsq).sqrt();
            op.apply_transposed(&u, &mut tmp_n);
            scale(&mut v, -beta);
            axpy(&mut v, 1.0, &tmp_n);
            alpha = norm(&v);
            if alpha > 0.0 {
                scale(&mut v, alpha.recip());
            }
        }

        // eliminate the damping parameter
        let (rhobar1, psi) = if damp > 0.0 {
            let rhobar1 = rhobar.hypot(damp);
            let cs1 = rhobar / rhobar1;
            let sn1 = damp / rhobar1;
            let psi = sn1 * phibar;
            phibar *= cs1;
            (rhobar1, psi)
        } else {
            (rhobar, 0.0)
        };

        // eliminate the subdiagonal of the bidiagonal matrix
        let rho = rhobar1.hypot(beta);
        let cs = rhobar1 / rho;
        let sn = beta / rho;
        let theta = sn * alpha;
        rhobar = -cs * alpha;
        let phi = cs * phibar;
        phibar *= sn;
        let tau = sn * phi;

        // update x and w
        let t1 = phi / rho;
        let t2 = -theta / rho;
        ddnorm += (norm(&w) / rho).powi(2);
        let x_prev = params.radius.map(|_| x.clone());
        axpy(&mut x, t1, &w);
        scale(&mut w, t2);
        axpy(&mut w, 1.0, &v);

        // estimate ‖x‖ via a plane rotation on the right
        let delta = sn2 * rho;
        let gambar = -cs2 * rho;
        let rhs = phi - delta * z;
        let zbar = rhs / gambar;
        xnorm = (xxnorm + zbar * zbar).sqrt();
        let gamma = gambar.hypot(theta);
        cs2 = gambar / gamma;
        sn2 = theta / gamma;
        z = rhs / gamma;
        xxnorm += z * z;

        acond = anorm * ddnorm.sqrt();
        let res1 = phibar * phibar;
        res2 += psi * psi;
        rnorm = (res1 + res2).sqrt();
        arnorm = alpha * tau.abs();

        if let (Some(radius), Some(prev)) = (params.radius, x_prev) {
            let actual = norm(&x);
            if actual > radius {
                let d: Vec<T> = x.iter().zip(&prev).map(|(&a, &b)| a - b).collect();
                let step = boundary_step(dot(&prev, &prev), dot(&prev, &d), dot(&d, &d), radius);
                x = prev;
                if let Some(step) = step {
                    axpy(&mut x, step.min(1.0), &d);
                }
                xnorm = norm(&x);
                termination = LsqrTermination::TrustRegion;
                break;
            }
        }

        // stopping tests
        let test1 = rnorm / bnorm;
        let test2 = arnorm / (anorm * rnorm + eps);
        let test3 = 1.0 / (acond + eps);
        let t1 = test1 / (1.0 + anorm * xnorm / bnorm);
        let rtol = params.btol + params.atol * anorm * xnorm / bnorm;

        let mut stop = None;
        if 1.0 + test3 <= 1.0 || test3 <= ctol {
            stop = Some(LsqrTermination::ConditionLimit);
        }
        if 1.0 + test2 <= 1.0 || test2 <= params.atol {
            stop = Some(LsqrTermination::SolutionTolerance);
        }
        if 1.0 + t1 <= 1.0 || test1 <= rtol {
            stop = Some(LsqrTermination::ResidualTolerance);
        }
        if let Some(reason) = stop {
            termination = reason;
            break;
        }
    }

    log::trace!(
        "lsqr: {:?} after {itn} iterations, |r| = {rnorm:.3e}, |A'r| = {arnorm:.3e}, cond = {acond:.3e}",
        termination
    );

    result.x = x;
    result.termination = termination;
    result.iterations = itn;
    result.residual_norm = (rnorm * rnorm - dampsq * xxnorm).abs().sqrt();
    result.normal_residual_norm = arnorm;
    result.anorm = anorm;
    result.acond = acond;
    result.xnorm = xnorm;
    result
}

/// LSQR behind the solver trait.
///
/// `factor` keeps a private copy of the matrix (pruned with `DropTolerance`
/// when configured) and builds the right preconditioner; no factorization
/// exists. Columns of a multi-column right-hand side are solved one by one.
pub struct LsqrSolver<T: Scalar + RealField> {
    handle: HandleState,
    params: LsqrParams,
    preconditioner: PreconditionerKind,
    drop_tolerance: Option<f64>,
    matrix: Option<SparseMatrix<T>>,
    scaling: Option<DiagonalScaling<T>>,
    last: Option<LsqrResult<T>>,
}

impl<T: Scalar + RealField> LsqrSolver<T> {
    pub const NAME: &'static str = "lsqr";

    pub fn new(flag: MatrixTypeFlag) -> Self {
        Self {
            handle: HandleState::new(Self::NAME, flag),
            params: LsqrParams::default(),
            preconditioner: PreconditionerKind::default(),
            drop_tolerance: None,
            matrix: None,
            scaling: None,
            last: None,
        }
    }

    pub fn with_params(mut self, params: LsqrParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_preconditioner(mut self, kind: PreconditionerKind) -> Self {
        self.preconditioner = kind;
        self
    }

    pub fn supports(flag: MatrixTypeFlag) -> bool {
        flag.is_unknown() || flag.is_real()
    }

    pub fn create(flag: MatrixTypeFlag) -> Box<dyn SparseSolver<T>> {
        Box::new(Self::new(flag))
    }

    pub fn params(&self) -> &LsqrParams {
        &self.params
    }

    /// Diagnostics of the most recent column solve.
    pub fn last_result(&self) -> Option<&LsqrResult<T>> {
        self.last.as_ref()
    }

    /// Preconditioner for the operator currently being solved with, `A` or `Aᵀ`.
    ///
    /// A trust-region radius bounds the returned `x`, so with a radius set
    /// the solve runs in the original variables.
    fn rebuild_scaling(&mut self) {
        let Some(matrix) = &self.matrix else {
            self.scaling = None;
            return;
        };
        if self.params.radius.is_some() {
            self.scaling = None;
            return;
        }
        self.scaling = match self.preconditioner {
            PreconditionerKind::None => None,
            PreconditionerKind::ColumnScaling if self.handle.transposed => {
                Some(DiagonalScaling::column_scaling(&matrix.transpose()))
            }
            PreconditionerKind::ColumnScaling => Some(DiagonalScaling::column_scaling(matrix)),
            PreconditionerKind::Jacobi if self.handle.transposed => {
                Some(DiagonalScaling::jacobi(&matrix.transpose()))
            }
            PreconditionerKind::Jacobi => Some(DiagonalScaling::jacobi(matrix)),
        };
    }

    fn solve_column(&self, matrix: &SparseMatrix<T>, b: &[T]) -> LsqrResult<T> {
        let transposed = self.handle.transposed;
        let run = |op: &dyn LinearOperator<T>| -> LsqrResult<T> {
            match &self.scaling {
                None => {
                    let pre = Preconditioned { op, precond: &Identity };
                    lsqr(&pre, b, &self.params)
                }
                Some(scaling) => {
                    let pre = Preconditioned { op, precond: scaling };
                    let mut result = lsqr(&pre, b, &self.params);
                    let mut x = vec![T::zero(); result.x.len()];
                    scaling.apply(&result.x, &mut x);
                    result.x = x;
                    result
                }
            }
        };
        if transposed {
            run(&Transposed(matrix))
        } else {
            run(matrix)
        }
    }
}

impl<T: Scalar + RealField> SparseSolver<T> for LsqrSolver<T> {
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
            self.params.atol = v;
            self.params.btol = v;
        }
        if let Some(v) = config.max_iterations() {
            self.params.max_iterations = v;
        }
        if let Some(v) = config.condition_limit() {
            self.params.conlim = v;
        }
        if let Some(v) = config.damping() {
            self.params.damp = v;
        }
        if let Some(v) = config.radius() {
            self.params.radius = (v > 0.0).then_some(v);
        }
        if let Some(kind) = config.preconditioner() {
            self.preconditioner = kind;
        }
        if let Some(v) = config.drop_tolerance() {
            self.drop_tolerance = Some(v);
        }
        self.rebuild_scaling();
    }

    fn factor(&mut self, matrix: &SparseMatrix<T>) -> Result<(), SolverError> {
        let started = Instant::now();
        let mut copy = matrix.clone();
        if let Some(tol) = self.drop_tolerance {
            let dropped = copy.drop_tiny(tol);
            log::debug!("{}: dropped {dropped} entries below {tol:e}", Self::NAME);
        }
        let memory = copy.memory_bytes();
        self.matrix = Some(copy);
        self.rebuild_scaling();
        self.handle.factored(started, SolverState::Factored, memory);
        Ok(())
    }

    fn solve_multi(&mut self, rhs: &DMatrix<T>) -> Result<DMatrix<T>, SolverError> {
        self.handle.require_factored("solve")?;
        let matrix = self.matrix.as_ref().ok_or(SolverError::NotFactored)?;
        let (rows, cols) = if self.handle.transposed {
            (matrix.ncols(), matrix.nrows())
        } else {
            (matrix.nrows(), matrix.ncols())
        };
        HandleState::check_dimension(rows, rhs.nrows())?;
        let started = Instant::now();

        let mut x = DMatrix::zeros(cols, rhs.ncols());
        let mut last = None;
        for (k, column) in rhs.column_iter().enumerate() {
            let b: Vec<T> = column.iter().copied().collect();
            let result = self.solve_column(matrix, &b);
            x.column_mut(k).copy_from_slice(&result.x);
            let failed = !result.termination.is_success();
            let termination = result.termination;
            let iterations = result.iterations;
            last = Some(result);
            if failed {
                self.last = last;
                let err = SolverError::NotConverged {
                    reason: termination.describe().to_string(),
                    iterations,
                };
                self.handle.message = format!("column {k}: {err}");
                self.handle.stats.record_solve(started.elapsed());
                log::warn!("{}: {}", Self::NAME, self.handle.message);
                return Err(err);
            }
        }
        if let Some(result) = &last {
            self.handle.message = format!(
                "{} after {} iterations",
                result.termination.describe(),
                result.iterations
            );
        }
        self.last = last;
        self.handle.solved(started);
        Ok(x)
    }

    fn transposed(&mut self, enable: bool) -> Result<(), SolverError> {
        if self.handle.transposed != enable {
            self.handle.transposed = enable;
            self.rebuild_scaling();
        }
        Ok(())
    }

    fn condest(&self) -> f64 {
        self.last.as_ref().map_or(0.0, |r| r.acond)
    }

    fn release(&mut self) {
        self.matrix = None;
        self.scaling = None;
        self.last = None;
        self.handle.release();
    }
}
