//! Per-partition subproblem workers.
//!
//! A worker owns one partition's diagonal block `K_k`, the coupling block
//! `B_k` into the border columns, a scratch vector of length `|V_k|`, and a
//! sparse direct solver bound to `K_k`. All its operations work on the
//! scratch vector, so a worker can run its solves concurrently with every
//! other worker.

use faer::sparse::SparseColMatRef;
use faer::MatMut;

use crate::linalg::solver::{
    Inertia, SparseSolver, SparseSolverKind, SparseSolverOptions, SparseSolvers,
};
use crate::schur::view::{RectangularView, SymmetricView};
use crate::schur::SchurError;
use crate::{E, I};

pub struct SubproblemWorker {
    /// Row/column indices of this partition in the parent matrix, ascending.
    rows: Vec<I>,
    kk: SymmetricView,
    bk: RectangularView,
    solver: SparseSolvers,
    work: Vec<E>,
}

impl SubproblemWorker {
    pub(crate) fn new(
        parent: SparseColMatRef<'_, I, E>,
        rows: Vec<I>,
        border: &[I],
        taken: &mut [bool],
        kind: SparseSolverKind,
        options: &SparseSolverOptions,
    ) -> Result<Self, SchurError> {
        let kk = SymmetricView::extract(parent, &rows, taken)?;
        let bk = RectangularView::extract(parent, &rows, border, taken)?;
        let mut solver = kind.build(options);
        if !rows.is_empty() {
            solver
                .analyze(kk.mat())
                .map_err(|_| SchurError::BlockSingular)?;
        }
        let work = vec![0.0; rows.len()];
        Ok(Self {
            rows,
            kk,
            bk,
            solver,
            work,
        })
    }

    pub fn dim(&self) -> usize {
        self.rows.len()
    }

    /// Parent positions stored by the diagonal and coupling views.
    pub(crate) fn stored(&self) -> usize {
        self.kk.stored() + self.bk.stored()
    }

    /// Bulk-copies fresh values into `K_k` and `B_k`.
    pub fn refresh(&mut self, parent_val: &[E]) {
        self.kk.refresh(parent_val);
        self.bk.refresh(parent_val);
    }

    pub fn factorize_block(&mut self) -> Result<(), SchurError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        self.solver
            .factorize(self.kk.mat())
            .map_err(|_| SchurError::BlockSingular)
    }

    /// For each assigned Schur column `j`, applies
    /// `S[:, j] -= B_kᵀ K_k⁻¹ B_k[:, j]`.
    ///
    /// The caller hands over ownership of the column slices, which is what
    /// keeps concurrent workers off each other's columns.
    pub fn update_schur(&mut self, columns: Vec<(usize, &mut [E])>) -> Result<(), SchurError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        let b = self.bk.mat();
        for (j, s_col) in columns {
            let range = b.col_ptr()[j]..b.col_ptr()[j + 1];
            if range.is_empty() {
                continue;
            }
            self.work.fill(0.0);
            for p in range {
                self.work[b.row_idx()[p]] = b.val()[p];
            }
            solve_work(&mut self.solver, &mut self.work)?;
            for &c in self.bk.nz_cols() {
                let mut acc = 0.0;
                for p in b.col_ptr()[c]..b.col_ptr()[c + 1] {
                    acc += b.val()[p] * self.work[b.row_idx()[p]];
                }
                s_col[c] -= acc;
            }
        }
        Ok(())
    }

    /// `w_k ← K_k⁻¹ x[V_k]`.
    pub fn forward(&mut self, x: &[E]) -> Result<(), SchurError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        for (l, &g) in self.rows.iter().enumerate() {
            self.work[l] = x[g];
        }
        solve_work(&mut self.solver, &mut self.work)
    }

    /// `w_0 ← w_0 − B_kᵀ w_k`. Runs sequentially across workers; `w_0` is
    /// shared.
    pub fn contrib(&self, w0: &mut [E]) {
        let b = self.bk.mat();
        for &c in self.bk.nz_cols() {
            let mut acc = 0.0;
            for p in b.col_ptr()[c]..b.col_ptr()[c + 1] {
                acc += b.val()[p] * self.work[b.row_idx()[p]];
            }
            w0[c] -= acc;
        }
    }

    /// `w_k ← K_k⁻¹ (x[V_k] + B_k w_0)`.
    pub fn back(&mut self, x: &[E], w0: &[E]) -> Result<(), SchurError> {
        if self.rows.is_empty() {
            return Ok(());
        }
        for (l, &g) in self.rows.iter().enumerate() {
            self.work[l] = x[g];
        }
        let b = self.bk.mat();
        for &c in self.bk.nz_cols() {
            let v = w0[c];
            for p in b.col_ptr()[c]..b.col_ptr()[c + 1] {
                self.work[b.row_idx()[p]] += b.val()[p] * v;
            }
        }
        solve_work(&mut self.solver, &mut self.work)
    }

    /// Writes the solved scratch back into `x[V_k]`.
    pub fn scatter(&self, x: &mut [E]) {
        for (l, &g) in self.rows.iter().enumerate() {
            x[g] = self.work[l];
        }
    }

    pub fn inertia(&self) -> Option<Inertia> {
        if self.rows.is_empty() {
            return Some(Inertia::ZERO);
        }
        self.solver.inertia()
    }

    pub fn is_inertia(&self) -> bool {
        self.rows.is_empty() || self.solver.is_inertia()
    }

    pub fn improve(&mut self) -> bool {
        self.rows.is_empty() || self.solver.improve()
    }

    pub fn is_thread_safe(&self) -> bool {
        self.solver.is_thread_safe()
    }
}

fn solve_work(solver: &mut SparseSolvers, work: &mut [E]) -> Result<(), SchurError> {
    let n = work.len();
    let mut rhs = MatMut::from_column_major_slice_mut(work, n, 1);
    solver
        .solve_in_place(&mut rhs)
        .map_err(|_| SchurError::BlockSingular)
}
