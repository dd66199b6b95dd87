use std::ops::{Add, AddAssign};

use derive_more::{Display, Error};
use enum_dispatch::enum_dispatch;
use faer::sparse::SparseColMatRef;
use faer::{MatMut, MatRef};
use problemo::Problem;

use crate::linalg::cholesky::SimplicialSparseLdlt;
use crate::linalg::dense::{DenseFullPivLu, DensePartialPivLu};
use crate::linalg::lu::SimplicialSparseLu;
use crate::{E, I};

#[derive(Debug, Display, Error, PartialEq)]
pub enum LinearSolverError {
    #[display("Symbolic factorization error")]
    SymbolicFactorization,

    #[display("Numeric factorization error")]
    NumericFactorization,

    #[display("Eigenvalue computation error")]
    Eigendecomposition,

    #[display("Uninitialized error")]
    Uninitialized,

    #[display("Memory reservation failed")]
    MemoryReservation,

    #[display("Memory allocation failed")]
    MemoryAllocation,
}

/// Inertia of a symmetric matrix: the number of positive, zero, and negative
/// eigenvalues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Inertia {
    pub positive: usize,
    pub zero: usize,
    pub negative: usize,
}

impl Inertia {
    pub const ZERO: Inertia = Inertia {
        positive: 0,
        zero: 0,
        negative: 0,
    };

    pub fn new(positive: usize, zero: usize, negative: usize) -> Self {
        Self {
            positive,
            zero,
            negative,
        }
    }
}

impl Add for Inertia {
    type Output = Inertia;

    fn add(self, rhs: Inertia) -> Inertia {
        Inertia {
            positive: self.positive + rhs.positive,
            zero: self.zero + rhs.zero,
            negative: self.negative + rhs.negative,
        }
    }
}

impl AddAssign for Inertia {
    fn add_assign(&mut self, rhs: Inertia) {
        *self = *self + rhs;
    }
}

/// Scalar precision a solver backend accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    F32,
    F64,
}

/// Options forwarded to each subproblem solver instance.
///
/// The regularization pair follows the usual LDLT convention: pivots smaller
/// in magnitude than `regularization_epsilon` are replaced by
/// `±regularization_delta`. `improve` multiplies both by `improve_factor`
/// until `max_regularization` is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseSolverOptions {
    pub regularization_epsilon: E,
    pub regularization_delta: E,
    pub improve_factor: E,
    pub max_regularization: E,
}

impl Default for SparseSolverOptions {
    fn default() -> Self {
        Self {
            regularization_epsilon: 0.0,
            regularization_delta: 0.0,
            improve_factor: 100.0,
            max_regularization: 1e-2,
        }
    }
}

/// Options forwarded to the dense Schur solver.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseSolverOptions {
    /// Probe the factorization with a trial solve and report failure if the
    /// result is non-finite.
    pub probe_singularity: bool,
}

impl Default for DenseSolverOptions {
    fn default() -> Self {
        Self {
            probe_singularity: true,
        }
    }
}

/// Capability interface expected of a sparse direct solver bound to one
/// subproblem block.
///
/// Implementors must be constructed through [`SparseSolverKind::build`] and
/// follow the analyze-then-factorize discipline; `factorize` may be called
/// repeatedly with new values over the same non-zero pattern.
#[enum_dispatch]
pub trait SparseSolver {
    /// Performs symbolic analysis of the given sparse matrix and prepares for
    /// factorization.
    fn analyze(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem>;

    /// Performs numeric factorization of the matrix after symbolic analysis.
    /// Fails if the matrix is singular.
    fn factorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem>;

    /// Solves the factorized system in place for the given right-hand side.
    fn solve_in_place(&mut self, rhs: &mut MatMut<'_, E>) -> Result<(), Problem>;

    /// Inertia of the factorized matrix, if this backend can report it.
    fn inertia(&self) -> Option<Inertia>;

    /// Whether this backend is able to report inertia at all.
    fn is_inertia(&self) -> bool;

    /// Asks the backend to improve the quality of subsequent factorizations,
    /// typically by growing its pivot regularization. Returns `false` once
    /// nothing is left to try.
    fn improve(&mut self) -> bool;

    /// Whether independent instances may run concurrently from multiple
    /// threads.
    fn is_thread_safe(&self) -> bool;

    /// Whether the backend accepts the given scalar precision.
    fn accepts(&self, dtype: DType) -> bool;
}

/// Capability interface expected of the dense solver bound to the Schur
/// complement.
#[enum_dispatch]
pub trait DenseSolver {
    /// Factorizes the dense matrix. Fails if the matrix is singular.
    fn factorize(&mut self, mat: MatRef<'_, E>) -> Result<(), Problem>;

    /// Solves the factorized system in place for the given right-hand side.
    fn solve_in_place(&mut self, rhs: &mut MatMut<'_, E>) -> Result<(), Problem>;

    /// Inertia of the factorized matrix, if this backend can report it.
    fn inertia(&self) -> Option<Inertia>;

    /// Whether this backend is able to report inertia at all.
    fn is_inertia(&self) -> bool;

    /// Whether the backend accepts the given scalar precision.
    fn accepts(&self, dtype: DType) -> bool;
}

/// Registry of subproblem solver backends. Dispatch is resolved once at
/// construction; afterwards every call goes straight to the chosen variant.
#[enum_dispatch(SparseSolver)]
pub enum SparseSolvers {
    SimplicialSparseLdlt,
    SimplicialSparseLu,
}

/// Registry of dense Schur solver backends.
#[enum_dispatch(DenseSolver)]
pub enum DenseSolvers {
    DensePartialPivLu,
    DenseFullPivLu,
}

/// Factory tag selecting the subproblem solver backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SparseSolverKind {
    /// Simplicial LDLT with AMD ordering; reports inertia.
    #[default]
    SimplicialLdlt,
    /// Simplicial LU with COLAMD ordering; no inertia capability.
    SimplicialLu,
}

impl SparseSolverKind {
    pub fn build(self, options: &SparseSolverOptions) -> SparseSolvers {
        match self {
            SparseSolverKind::SimplicialLdlt => SimplicialSparseLdlt::new(options).into(),
            SparseSolverKind::SimplicialLu => SimplicialSparseLu::new(options).into(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SparseSolverKind::SimplicialLdlt => "simplicial LDLT",
            SparseSolverKind::SimplicialLu => "simplicial LU",
        }
    }
}

/// Factory tag selecting the dense Schur solver backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DenseSolverKind {
    /// LU with partial pivoting.
    #[default]
    PartialPivLu,
    /// LU with full pivoting.
    FullPivLu,
}

impl DenseSolverKind {
    pub fn build(self, options: &DenseSolverOptions) -> DenseSolvers {
        match self {
            DenseSolverKind::PartialPivLu => DensePartialPivLu::new(options).into(),
            DenseSolverKind::FullPivLu => DenseFullPivLu::new(options).into(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DenseSolverKind::PartialPivLu => "partial-pivoting LU",
            DenseSolverKind::FullPivLu => "full-pivoting LU",
        }
    }
}
