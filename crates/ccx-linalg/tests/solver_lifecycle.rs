//! Lifecycle of solver handles handed out by the factory.
#![cfg(all(feature = "cholesky", feature = "dense-lu", feature = "iterative"))]

use std::panic::{self, AssertUnwindSafe};

use ccx_linalg::backend::SolverConfig;
use ccx_linalg::{
    MatrixTypeFlag, SolverError, SolverFactory, SolverState, SolverStatistics, SparseMatrix,
    SparseSolver, create_converting, default_solver,
};
use nalgebra::{DMatrix, DVector};

fn spd_2x2() -> SparseMatrix<f64> {
    SparseMatrix::from_triplets(2, 2, &[(0, 0, 4.0), (0, 1, 1.0), (1, 0, 1.0), (1, 1, 3.0)])
}

fn relative_residual(a: &SparseMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>) -> f64 {
    (a.mul_vec(x) - b).norm() / b.norm()
}

fn laplacian_2d(n: usize) -> SparseMatrix<f64> {
    let idx = |i: usize, j: usize| i * n + j;
    let mut triplets = Vec::new();
    for i in 0..n {
        for j in 0..n {
            triplets.push((idx(i, j), idx(i, j), 4.0));
            if i > 0 {
                triplets.push((idx(i, j), idx(i - 1, j), -1.0));
            }
            if i + 1 < n {
                triplets.push((idx(i, j), idx(i + 1, j), -1.0));
            }
            if j > 0 {
                triplets.push((idx(i, j), idx(i, j - 1), -1.0));
            }
            if j + 1 < n {
                triplets.push((idx(i, j), idx(i, j + 1), -1.0));
            }
        }
    }
    SparseMatrix::from_triplets(n * n, n * n, &triplets)
}

#[test]
fn spd_system_through_every_real_backend() {
    let a = spd_2x2();
    let b = DVector::from_vec(vec![1.0, 2.0]);
    let factory = SolverFactory::<f64>::new();
    for name in factory.available() {
        let mut solver = factory.create_named(name, MatrixTypeFlag::REAL_SPD).unwrap();
        solver.factor(&a).unwrap();
        let x = solver.solve(&b).unwrap();
        assert!(
            relative_residual(&a, &x, &b) < 1e-10,
            "{name}: residual {}",
            relative_residual(&a, &x, &b)
        );
        assert!((x[0] - 1.0 / 11.0).abs() < 1e-9, "{name}");
        assert!((x[1] - 7.0 / 11.0).abs() < 1e-9, "{name}");
    }
}

#[test]
fn repeated_solves_are_identical() {
    let a = laplacian_2d(6);
    let b = DVector::from_fn(36, |i, _| (i % 5) as f64 - 2.0);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    solver.factor(&a).unwrap();
    let first = solver.solve(&b).unwrap();
    let second = solver.solve(&b).unwrap();
    assert_eq!(first, second);
    assert!(relative_residual(&a, &first, &b) < 1e-10);
    assert_eq!(solver.state(), SolverState::Solved);
}

#[test]
fn resolve_after_value_change() {
    let a = laplacian_2d(5);
    let b = DVector::from_element(25, 1.0);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    solver.factor(&a).unwrap();
    let x = solver.solve(&b).unwrap();

    let mut doubled = a.clone();
    doubled.scale(2.0);
    let y = solver.resolve(&doubled, &b).unwrap();
    assert!((x - y * 2.0).norm() < 1e-12);
    assert_eq!(solver.statistics().factor_count, 2);
    assert_eq!(solver.statistics().solve_count, 2);
}

#[test]
fn multiple_right_hand_sides() {
    let a = laplacian_2d(4);
    let b = DMatrix::from_fn(16, 3, |i, j| ((i + 2 * j) % 7) as f64);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    solver.factor(&a).unwrap();
    let x = solver.solve_multi(&b).unwrap();
    assert!((a.to_dense() * &x - &b).norm() < 1e-10 * b.norm());
    assert_eq!(solver.statistics().solve_count, 1);
}

#[test]
fn statistics_survive_release() {
    let a = spd_2x2();
    let b = DVector::from_vec(vec![1.0, 2.0]);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    assert_eq!(solver.statistics().factor_count, 0);
    assert_eq!(solver.statistics().solve_count, 0);

    let mut previous = SolverStatistics::default();
    for _ in 0..3 {
        solver.factor(&a).unwrap();
        solver.solve(&b).unwrap();
        let stats = solver.statistics().clone();
        assert!(stats.factor_count > previous.factor_count);
        assert!(stats.solve_count > previous.solve_count);
        assert!(stats.factor_time >= previous.factor_time);
        previous = stats;
    }

    solver.release();
    solver.release();
    assert_eq!(solver.state(), SolverState::Unconfigured);
    assert_eq!(solver.statistics().factor_count, 3);
    assert_eq!(solver.statistics().solve_count, 3);
}

#[test]
fn failed_factor_reports_backend_message() {
    let indefinite = SparseMatrix::from_triplets(2, 2, &[(0, 0, 1.0), (0, 1, 2.0), (1, 0, 2.0), (1, 1, 1.0)]);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    let err = solver.factor(&indefinite).unwrap_err();
    assert!(matches!(err, SolverError::NotPositiveDefinite(_)), "{err}");
    assert_eq!(solver.state(), SolverState::Unconfigured);
    assert_eq!(solver.message(), err.to_string());

    solver.factor(&spd_2x2()).unwrap();
    assert!(solver.message().is_empty());
    assert_eq!(solver.state(), SolverState::Factored);
}

#[test]
fn single_precision_over_double_backend() {
    let a64 = spd_2x2();
    let a32 = a64.cast::<f32>();
    let mut direct = default_solver::<f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    direct.factor(&a64).unwrap();
    let x64 = direct.solve(&DVector::from_vec(vec![1.0, 2.0])).unwrap();

    let mut solver = create_converting::<f32, f64>(MatrixTypeFlag::REAL_SPD).unwrap();
    solver.factor(&a32).unwrap();
    let x32 = solver.solve(&DVector::from_vec(vec![1.0f32, 2.0])).unwrap();
    for (s, d) in x32.iter().zip(x64.iter()) {
        assert!(((*s as f64) - d).abs() <= f32::EPSILON as f64);
    }
    assert_eq!(solver.statistics().factor_count, 1);
    assert_eq!(solver.statistics().solve_count, 1);
}

#[test]
fn configured_iterative_backend() {
    let a = laplacian_2d(8);
    let b = DVector::from_element(64, 1.0);
    let config = SolverConfig::new()
        .with("Tolerance", 1e-12)
        .with("MaxIterations", 200)
        .with("SomethingElse", "ignored");
    let mut solver = SolverFactory::<f64>::new()
        .create_named("conjugate-gradient", MatrixTypeFlag::REAL_SPD)
        .unwrap();
    solver.configure(&config);
    solver.factor(&a).unwrap();
    let x = solver.solve(&b).unwrap();
    assert!(relative_residual(&a, &x, &b) < 1e-11);
}

#[test]
fn rectangular_system_goes_to_least_squares() {
    // consistent 4x2 system with solution [1, -1]
    let a = SparseMatrix::from_triplets(
        4,
        2,
        &[(0, 0, 1.0), (1, 1, 2.0), (2, 0, 1.0), (2, 1, 1.0), (3, 0, 3.0), (3, 1, -1.0)],
    );
    let b = DVector::from_vec(vec![1.0, -2.0, 0.0, 4.0]);
    let mut solver = default_solver::<f64>(MatrixTypeFlag::REAL_RECTANGULAR).unwrap();
    assert_eq!(solver.name(), "lsqr");
    solver.factor(&a).unwrap();
    let x = solver.solve(&b).unwrap();
    assert!((x[0] - 1.0).abs() < 1e-6);
    assert!((x[1] + 1.0).abs() < 1e-6);
}

/// Backend implementing only the required methods.
struct Minimal {
    stats: SolverStatistics,
    state: SolverState,
}

impl SparseSolver<f64> for Minimal {
    fn name(&self) -> &str {
        "minimal"
    }

    fn matrix_type(&self) -> MatrixTypeFlag {
        MatrixTypeFlag::UNKNOWN
    }

    fn state(&self) -> SolverState {
        self.state
    }

    fn statistics(&self) -> &SolverStatistics {
        &self.stats
    }

    fn message(&self) -> &str {
        ""
    }

    fn factor(&mut self, _matrix: &SparseMatrix<f64>) -> Result<(), SolverError> {
        self.stats.factor_count += 1;
        self.state = SolverState::Factored;
        Ok(())
    }

    fn solve_multi(&mut self, rhs: &DMatrix<f64>) -> Result<DMatrix<f64>, SolverError> {
        self.stats.solve_count += 1;
        Ok(rhs.clone())
    }

    fn release(&mut self) {
        self.state = SolverState::Unconfigured;
    }
}

#[test]
fn default_trait_methods() {
    let mut solver = Minimal {
        stats: SolverStatistics::default(),
        state: SolverState::Unconfigured,
    };
    assert!(matches!(solver.transposed(true), Err(SolverError::Unsupported(_))));
    assert!(solver.transposed(false).is_ok());
    assert_eq!(solver.condest(), 0.0);

    let a = spd_2x2();
    let b = DVector::from_vec(vec![3.0, 4.0]);
    solver.factor(&a).unwrap();
    // refactor falls back to a full factor, solve to a one-column solve_multi
    let x = solver.resolve(&a, &b).unwrap();
    assert_eq!(x, b);
    assert_eq!(solver.stats.factor_count, 2);
    assert_eq!(solver.stats.solve_count, 1);
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "without factorization"))]
fn default_refactor_requires_a_factorization() {
    let mut solver = Minimal {
        stats: SolverStatistics::default(),
        state: SolverState::Unconfigured,
    };
    let err = solver.refactor(&spd_2x2()).unwrap_err();
    assert!(matches!(err, SolverError::NotFactored));
    assert_eq!(solver.stats.factor_count, 0);
}

#[test]
fn refactor_before_factor_on_every_backend() {
    let a = spd_2x2();
    let factory = SolverFactory::<f64>::new();
    for name in factory.available() {
        let mut solver = factory.create_named(name, MatrixTypeFlag::REAL_SPD).unwrap();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| solver.refactor(&a)));
        match outcome {
            Err(_) => assert!(cfg!(debug_assertions), "{name} panicked in a release build"),
            Ok(result) => {
                assert!(!cfg!(debug_assertions), "{name} accepted refactor silently");
                assert!(matches!(result, Err(SolverError::NotFactored)), "{name}");
            }
        }
    }
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "without factorization"))]
fn converting_refactor_before_factor() {
    let mut solver = create_converting::<f32, f64>(MatrixTypeFlag::REAL_UNSYMMETRIC).unwrap();
    let result = solver.refactor(&spd_2x2().cast::<f32>());
    assert!(matches!(result, Err(SolverError::NotFactored)));
}

#[test]
fn refactor_with_new_pattern_is_documented_as_out_of_contract() {
    let source = include_str!("../src/backend/traits.rs");
    let start = source.find("fn refactor").unwrap();
    let docs = &source[..start];
    let docs = &docs[docs.rfind("fn factor").unwrap()..];
    assert!(docs.contains("different sparsity pattern"));
    assert!(docs.contains("outside the"));
}

#[test]
fn selection_without_backends_fails() {
    let factory = SolverFactory::<f64>::empty();
    let err = factory.create(MatrixTypeFlag::REAL_SPD).err().unwrap();
    assert!(matches!(err, SolverError::NoBackend { .. }));
    assert!(err.to_string().contains("f64"), "{err}");
}

#[test]
fn spd_flag_yields_symmetric_definite_handle() {
    let solver = default_solver::<f32>(MatrixTypeFlag::REAL_SPD).unwrap();
    assert!(solver.matrix_type().is_symmetric());
    assert!(solver.matrix_type().is_definite());
    assert!(solver.matrix_type().is_square());
}
