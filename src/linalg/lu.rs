//! # Simplicial LU for Sparse Subproblem Blocks
//!
//! An alternative subproblem backend based on sparse LU factorization with a
//! COLAMD fill-reducing column ordering. LU handles blocks the unpivoted LDLT
//! struggles with, but carries no inertia information; configuring it makes
//! the Schur solver report inertia as unavailable.

use faer::dyn_stack::{MemBuffer, MemStack};
use faer::perm::Perm;
use faer::prelude::ReborrowMut;
use faer::sparse::linalg::colamd;
use faer::sparse::linalg::lu::simplicial::{self, SimplicialLu};
use faer::sparse::{SparseColMatRef, SymbolicSparseColMat};
use faer::MatMut;
use problemo::{Problem, ProblemResult};

use crate::linalg::solver::{
    DType, Inertia, LinearSolverError, SparseSolver, SparseSolverOptions,
};
use crate::{E, I};

/// Sparse LU solver using the simplicial factorization method.
///
/// The subproblem blocks arrive in symmetric lower-triangular storage, so
/// `analyze` first mirrors them into full storage; `factorize` scatters
/// fresh values into the mirror before factorizing.
pub struct SimplicialSparseLu {
    /// Numeric LU factorization (set by `factorize`).
    lu: Option<SimplicialLu<I, E>>,
    /// Row permutation from pivoting (set by `factorize`).
    row_perm: Option<Perm<I>>,
    /// Column permutation for fill reduction (set by `analyze`).
    col_perm: Option<Perm<I>>,
    /// Full-storage mirror of the symmetric input (set by `analyze`).
    mirror: Option<Mirror>,
}

impl SimplicialSparseLu {
    pub fn new(_options: &SparseSolverOptions) -> Self {
        Self {
            lu: None,
            row_perm: None,
            col_perm: None,
            mirror: None,
        }
    }
}

impl SparseSolver for SimplicialSparseLu {
    /// Mirrors the symmetric input into full storage and computes the
    /// fill-reducing column permutation.
    fn analyze(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem> {
        let mirror = Mirror::new(mat)?;
        let ncols = mirror.symbolic.ncols();
        let nnz = mirror.values.len();

        let (col_perm_fwd, col_perm_inv) = {
            let mut perm = Vec::new();
            let mut perm_inv = Vec::new();
            perm.try_reserve_exact(ncols)
                .via(LinearSolverError::MemoryReservation)?;
            perm_inv
                .try_reserve_exact(ncols)
                .via(LinearSolverError::MemoryReservation)?;
            perm.resize(ncols, 0usize);
            perm_inv.resize(ncols, 0usize);

            let mut mem = MemBuffer::try_new(colamd::order_scratch::<I>(ncols, ncols, nnz))
                .via(LinearSolverError::MemoryAllocation)?;

            colamd::order(
                &mut perm,
                &mut perm_inv,
                mirror.symbolic.as_ref(),
                colamd::Control::default(),
                MemStack::new(&mut mem),
            )
            .via(LinearSolverError::SymbolicFactorization)?;

            (perm, perm_inv)
        };

        self.col_perm = Some(unsafe {
            Perm::new_unchecked(
                col_perm_fwd.into_boxed_slice(),
                col_perm_inv.into_boxed_slice(),
            )
        });
        self.mirror = Some(mirror);
        self.lu = None;

        Ok(())
    }

    /// Performs numeric LU factorization of the matrix after symbolic
    /// analysis.
    fn factorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem> {
        let col_perm = self
            .col_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let mirror = self
            .mirror
            .as_mut()
            .ok_or(LinearSolverError::Uninitialized)?;
        mirror.refresh(mat.val());

        let nrows = mirror.symbolic.nrows();
        let ncols = mirror.symbolic.ncols();

        let mut row_perm = Vec::new();
        let mut row_perm_inv = Vec::new();
        row_perm
            .try_reserve_exact(nrows)
            .via(LinearSolverError::MemoryReservation)?;
        row_perm_inv
            .try_reserve_exact(nrows)
            .via(LinearSolverError::MemoryReservation)?;
        row_perm.resize(nrows, 0usize);
        row_perm_inv.resize(nrows, 0usize);

        let mut lu = SimplicialLu::new();

        let mut mem = MemBuffer::try_new(
            simplicial::factorize_simplicial_numeric_lu_scratch::<I, E>(nrows, ncols),
        )
        .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        simplicial::factorize_simplicial_numeric_lu::<I, E>(
            &mut row_perm,
            &mut row_perm_inv,
            &mut lu,
            mirror.mat(),
            col_perm.as_ref(),
            stack,
        )
        .via(LinearSolverError::NumericFactorization)?;

        self.row_perm = Some(unsafe {
            Perm::new_unchecked(row_perm.into_boxed_slice(), row_perm_inv.into_boxed_slice())
        });
        self.lu = Some(lu);

        Ok(())
    }

    /// Solves the factorized system in place for the given right-hand side.
    fn solve_in_place(&mut self, sol: &mut MatMut<'_, E>) -> Result<(), Problem> {
        let lu = self.lu.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        let row_perm = self
            .row_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let col_perm = self
            .col_perm
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;

        let nrows = lu.nrows();
        let nrhs = sol.ncols();

        let mut mem = MemBuffer::try_new(simplicial::solve_in_place_scratch::<I, E>(
            nrows,
            nrhs,
            faer::Par::Seq,
        ))
        .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        lu.solve_in_place_with_conj(
            row_perm.as_ref(),
            col_perm.as_ref(),
            faer::Conj::No,
            sol.rb_mut(),
            faer::Par::Seq,
            stack,
        );

        Ok(())
    }

    fn inertia(&self) -> Option<Inertia> {
        None
    }

    fn is_inertia(&self) -> bool {
        false
    }

    fn improve(&mut self) -> bool {
        // LU pivots for itself; there is no knob left to turn.
        false
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn accepts(&self, dtype: DType) -> bool {
        dtype == DType::F64
    }
}

/// Full-storage expansion of a symmetric lower-triangular matrix, with the
/// scatter map needed to push fresh lower-triangle values into both
/// triangles.
struct Mirror {
    symbolic: SymbolicSparseColMat<I>,
    values: Vec<E>,
    /// Per parent position: the mirror position of the entry, and of its
    /// transpose for off-diagonal entries.
    scatter: Vec<(I, Option<I>)>,
}

impl Mirror {
    fn new(mat: SparseColMatRef<'_, I, E>) -> Result<Self, Problem> {
        let n = mat.ncols();
        let nnz = mat.compute_nnz();

        let mut counts = vec![0usize; n];
        for j in 0..n {
            for p in mat.col_ptr()[j]..mat.col_ptr()[j + 1] {
                let i = mat.row_idx()[p];
                counts[j] += 1;
                if i != j {
                    counts[i] += 1;
                }
            }
        }
        let mut col_ptrs = vec![0usize; n + 1];
        for j in 0..n {
            col_ptrs[j + 1] = col_ptrs[j] + counts[j];
        }
        let full_nnz = col_ptrs[n];

        let mut row_indices = vec![0usize; full_nnz];
        let mut scatter = Vec::new();
        scatter
            .try_reserve_exact(nnz)
            .via(LinearSolverError::MemoryReservation)?;

        // Walking parent columns in order fills every mirror column with
        // ascending row indices: transposed entries (rows below the
        // diagonal of earlier columns) land first, direct entries after.
        let mut cursor = col_ptrs[..n].to_vec();
        for j in 0..n {
            for p in mat.col_ptr()[j]..mat.col_ptr()[j + 1] {
                let i = mat.row_idx()[p];
                let direct = cursor[j];
                cursor[j] += 1;
                row_indices[direct] = i;
                let transposed = if i != j {
                    let t = cursor[i];
                    cursor[i] += 1;
                    row_indices[t] = j;
                    Some(t)
                } else {
                    None
                };
                scatter.push((direct, transposed));
            }
        }

        let symbolic = unsafe {
            SymbolicSparseColMat::new_unchecked(n, n, col_ptrs, None, row_indices)
        };
        Ok(Self {
            symbolic,
            values: vec![0.0; full_nnz],
            scatter,
        })
    }

    fn refresh(&mut self, parent_val: &[E]) {
        for (p, &(direct, transposed)) in self.scatter.iter().enumerate() {
            self.values[direct] = parent_val[p];
            if let Some(t) = transposed {
                self.values[t] = parent_val[p];
            }
        }
    }

    fn mat(&self) -> SparseColMatRef<'_, I, E> {
        SparseColMatRef::new(self.symbolic.as_ref(), &self.values)
    }
}
