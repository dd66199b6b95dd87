//! # Dense Solvers for the Schur Complement
//!
//! The assembled Schur complement is dense, small relative to the subproblem
//! blocks, and symmetric indefinite. Both backends here factorize it with LU
//! (partial pivoting by default, full pivoting when robustness matters more
//! than speed) and keep the matrix around so its inertia can be reported by a
//! symmetric eigenvalue sign count.

use faer::linalg::solvers::{FullPivLu, PartialPivLu};
use faer::prelude::Solve;
use faer::{Mat, MatMut, MatRef};
use problemo::Problem;

use crate::linalg::solver::{
    DType, DenseSolver, DenseSolverOptions, Inertia, LinearSolverError,
};
use crate::E;

/// Dense LU solver with partial pivoting. The default Schur backend.
pub struct DensePartialPivLu {
    mat: Mat<E>,
    lu: Option<PartialPivLu<E>>,
    options: DenseSolverOptions,
}

impl DensePartialPivLu {
    pub fn new(options: &DenseSolverOptions) -> Self {
        Self {
            mat: Mat::zeros(0, 0),
            lu: None,
            options: options.clone(),
        }
    }
}

impl DenseSolver for DensePartialPivLu {
    fn factorize(&mut self, mat: MatRef<'_, E>) -> Result<(), Problem> {
        self.mat = mat.to_owned();
        let lu = self.mat.partial_piv_lu();
        if self.options.probe_singularity && mat.nrows() > 0 {
            // An exactly singular factor surfaces as non-finite entries in a
            // trial solve.
            let ones = Mat::from_fn(mat.nrows(), 1, |_, _| 1.0);
            let sol = lu.solve(ones.as_ref());
            if (0..mat.nrows()).any(|i| !sol[(i, 0)].is_finite()) {
                return Err(LinearSolverError::NumericFactorization.into());
            }
        }
        self.lu = Some(lu);
        Ok(())
    }

    fn solve_in_place(&mut self, rhs: &mut MatMut<'_, E>) -> Result<(), Problem> {
        let lu = self.lu.as_ref().ok_or(LinearSolverError::Uninitialized)?;

        // The factorization solves out of place; copy the result back to keep
        // the in-place contract.
        let solution = lu.solve(rhs.as_ref());
        rhs.copy_from(&solution);
        Ok(())
    }

    fn inertia(&self) -> Option<Inertia> {
        if self.lu.is_none() {
            return None;
        }
        symmetric_inertia(self.mat.as_ref()).ok()
    }

    fn is_inertia(&self) -> bool {
        true
    }

    fn accepts(&self, dtype: DType) -> bool {
        dtype == DType::F64
    }
}

/// Dense LU solver with full pivoting.
pub struct DenseFullPivLu {
    mat: Mat<E>,
    lu: Option<FullPivLu<E>>,
    options: DenseSolverOptions,
}

impl DenseFullPivLu {
    pub fn new(options: &DenseSolverOptions) -> Self {
        Self {
            mat: Mat::zeros(0, 0),
            lu: None,
            options: options.clone(),
        }
    }
}

impl DenseSolver for DenseFullPivLu {
    fn factorize(&mut self, mat: MatRef<'_, E>) -> Result<(), Problem> {
        self.mat = mat.to_owned();
        let lu = self.mat.full_piv_lu();
        if self.options.probe_singularity && mat.nrows() > 0 {
            let ones = Mat::from_fn(mat.nrows(), 1, |_, _| 1.0);
            let sol = lu.solve(ones.as_ref());
            if (0..mat.nrows()).any(|i| !sol[(i, 0)].is_finite()) {
                return Err(LinearSolverError::NumericFactorization.into());
            }
        }
        self.lu = Some(lu);
        Ok(())
    }

    fn solve_in_place(&mut self, rhs: &mut MatMut<'_, E>) -> Result<(), Problem> {
        let lu = self.lu.as_ref().ok_or(LinearSolverError::Uninitialized)?;

        let solution = lu.solve(rhs.as_ref());
        rhs.copy_from(&solution);
        Ok(())
    }

    fn inertia(&self) -> Option<Inertia> {
        if self.lu.is_none() {
            return None;
        }
        symmetric_inertia(self.mat.as_ref()).ok()
    }

    fn is_inertia(&self) -> bool {
        true
    }

    fn accepts(&self, dtype: DType) -> bool {
        dtype == DType::F64
    }
}

/// Inertia of a symmetric matrix by eigenvalue sign count.
pub(crate) fn symmetric_inertia(mat: MatRef<'_, E>) -> Result<Inertia, Problem> {
    let n = mat.nrows();
    if n == 0 {
        return Ok(Inertia::ZERO);
    }
    let eigenvalues: Vec<E> = mat
        .self_adjoint_eigenvalues(faer::Side::Lower)
        .map_err(|_| LinearSolverError::Eigendecomposition)?;

    let scale = eigenvalues.iter().fold(0.0f64, |acc, &v| acc.max(v.abs()));
    let tol = scale * (n as E) * f64::EPSILON;

    let mut inertia = Inertia::ZERO;
    for &v in &eigenvalues {
        if v > tol {
            inertia.positive += 1;
        } else if v < -tol {
            inertia.negative += 1;
        } else {
            inertia.zero += 1;
        }
    }
    Ok(inertia)
}
