//! # Simplicial LDLT for Symmetric Sparse Subproblem Blocks
//!
//! The default subproblem backend: a sparse LDLT factorization using the
//! simplicial method from the Faer library, with an AMD fill-reducing
//! ordering. Because the factorization is `L D Lᵀ` with a diagonal `D`, the
//! inertia of the block is available for free from the signs of `D`, which is
//! what the Schur solver sums per Haynsworth when the outer interior-point
//! loop asks for it.
use faer::dyn_stack::{MemBuffer, MemStack, StackReq};
use faer::linalg::cholesky::ldlt::factor::LdltRegularization;
use faer::perm::{Perm, PermRef};
use faer::prelude::{Reborrow, ReborrowMut};
use faer::sparse::linalg::amd;
use faer::sparse::linalg::cholesky::simplicial::{self, SymbolicSimplicialCholesky};
use faer::sparse::{SparseColMat, SparseColMatRef, SymbolicSparseColMat};
use faer::MatMut;
use problemo::{Problem, ProblemResult};

use crate::linalg::solver::{
    DType, Inertia, LinearSolverError, SparseSolver, SparseSolverOptions,
};
use crate::{E, I};

/// Sparse LDLT solver using the simplicial factorization method.
///
/// Symbolic analysis, the fill-reducing permutation, and the column counts of
/// the factor are computed once by `analyze`; `factorize` refreshes the
/// numeric factor in place for each new set of values over the same pattern.
#[allow(non_snake_case)]
pub struct SimplicialSparseLdlt {
    /// Symbolic analysis data for the factorization (set by `analyze`).
    symbolic: Option<SymbolicSimplicialCholesky<I>>,
    /// Numeric factorization values (set by `factorize`).
    L_values: Vec<E>,
    /// Fill-reducing permutation (set by `analyze`).
    perm: Option<Perm<I>>,
    /// Entry count per column of the factor; the first entry of each column
    /// is the corresponding diagonal of `D`.
    col_counts: Vec<usize>,
    /// Current (epsilon, delta) pivot regularization, grown by `improve`.
    regularization: (E, E),
    options: SparseSolverOptions,
    factorized: bool,
}

impl SimplicialSparseLdlt {
    /// First regularization magnitude tried when `improve` is called on an
    /// unregularized solver.
    const FIRST_REGULARIZATION: E = 1e-12;

    pub fn new(options: &SparseSolverOptions) -> Self {
        Self {
            symbolic: None,
            L_values: Vec::new(),
            perm: None,
            col_counts: Vec::new(),
            regularization: (
                options.regularization_epsilon,
                options.regularization_delta,
            ),
            options: options.clone(),
            factorized: false,
        }
    }
}

impl SparseSolver for SimplicialSparseLdlt {
    /// Performs symbolic analysis of the input matrix, computes the
    /// fill-reducing permutation, and prepares internal state for
    /// factorization.
    fn analyze(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem> {
        let nnz = mat.compute_nnz();
        let dim = mat.ncols();
        let mat_symbolic = mat.symbolic();

        // Fill reducing permutation
        let (perm_fwd, perm_inv) = {
            let mut perm = Vec::new();
            let mut perm_inv = Vec::new();
            perm.try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            perm_inv
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            perm.resize(dim, 0usize);
            perm_inv.resize(dim, 0usize);

            let mut mem = MemBuffer::try_new(amd::order_scratch::<I>(dim, nnz))
                .via(LinearSolverError::MemoryAllocation)?;
            amd::order(
                &mut perm,
                &mut perm_inv,
                mat_symbolic,
                amd::Control::default(),
                MemStack::new(&mut mem),
            )
            .via(LinearSolverError::SymbolicFactorization)?;

            (perm, perm_inv)
        };

        self.perm = Some(unsafe {
            Perm::new_unchecked(perm_fwd.into_boxed_slice(), perm_inv.into_boxed_slice())
        });

        let mat_upper = permuted_upper(mat, self.perm.as_ref().unwrap().as_ref())?;

        // symbolic analysis
        self.symbolic = Some({
            let mut mem = MemBuffer::try_new(StackReq::any_of(&[
                simplicial::prefactorize_symbolic_cholesky_scratch::<I>(dim, nnz),
                simplicial::factorize_simplicial_symbolic_cholesky_scratch::<I>(dim),
            ]))
            .via(LinearSolverError::MemoryAllocation)?;
            let stack = MemStack::new(&mut mem);

            let mut etree = Vec::new();
            let mut col_counts = Vec::new();
            etree
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            etree.resize(dim, 0isize);
            col_counts
                .try_reserve_exact(dim)
                .via(LinearSolverError::MemoryReservation)?;
            col_counts.resize(dim, 0usize);

            simplicial::prefactorize_symbolic_cholesky(
                &mut etree,
                &mut col_counts,
                mat_upper.symbolic(),
                stack,
            );
            let symbolic = simplicial::factorize_simplicial_symbolic_cholesky(
                mat_upper.symbolic(),
                // SAFETY: `etree` was filled correctly by
                // `simplicial::prefactorize_symbolic_cholesky`.
                unsafe { simplicial::EliminationTreeRef::from_inner(&etree) },
                &col_counts,
                stack,
            )
            .via(LinearSolverError::SymbolicFactorization)?;

            self.col_counts = col_counts;
            symbolic
        });

        self.factorized = false;
        Ok(())
    }

    /// Performs numeric factorization of the matrix after symbolic analysis.
    fn factorize(&mut self, mat: SparseColMatRef<'_, I, E>) -> Result<(), Problem> {
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let dim = mat.ncols();

        self.factorized = false;
        self.L_values = Vec::new();
        self.L_values
            .try_reserve_exact(symbolic.len_val())
            .via(LinearSolverError::MemoryReservation)?;
        self.L_values.resize(symbolic.len_val(), 0.0f64);

        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        let mat_upper = permuted_upper(mat, perm.as_ref())?;

        // numerical factorization
        let mut mem =
            MemBuffer::try_new(simplicial::factorize_simplicial_numeric_ldlt_scratch::<I, E>(dim))
                .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        let (epsilon, delta) = self.regularization;
        simplicial::factorize_simplicial_numeric_ldlt::<I, E>(
            &mut self.L_values,
            mat_upper.rb(),
            LdltRegularization {
                dynamic_regularization_delta: delta,
                dynamic_regularization_epsilon: epsilon,
                ..LdltRegularization::default()
            },
            symbolic,
            stack,
        )
        .via(LinearSolverError::NumericFactorization)?;

        // A pivot the factorization kernel let through as exactly zero or
        // non-finite still means a singular block.
        let mut ptr = 0;
        for &len in &self.col_counts {
            let d = self.L_values[ptr];
            if d == 0.0 || !d.is_finite() {
                return Err(LinearSolverError::NumericFactorization.into());
            }
            ptr += len;
        }

        self.factorized = true;
        Ok(())
    }

    /// Solves the factorized system in place for the given right-hand side.
    fn solve_in_place(&mut self, sol: &mut MatMut<'_, E>) -> Result<(), Problem> {
        if !self.factorized {
            return Err(LinearSolverError::Uninitialized.into());
        }
        let symbolic = self
            .symbolic
            .as_ref()
            .ok_or(LinearSolverError::Uninitialized)?;
        let perm = self.perm.as_ref().ok_or(LinearSolverError::Uninitialized)?;
        let ldlt = simplicial::SimplicialLdltRef::<'_, I, E>::new(symbolic, &self.L_values);

        let dim = symbolic.ncols();

        let mut mem = MemBuffer::try_new(StackReq::all_of(&[
            faer::perm::permute_rows_in_place_scratch::<I, E>(dim, 1),
            symbolic.solve_in_place_scratch::<E>(dim),
        ]))
        .via(LinearSolverError::MemoryAllocation)?;
        let stack = MemStack::new(&mut mem);

        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref(), stack);
        ldlt.solve_in_place_with_conj(faer::Conj::No, sol.rb_mut(), faer::Par::Seq, stack);
        faer::perm::permute_rows_in_place(sol.rb_mut(), perm.as_ref().inverse(), stack);

        Ok(())
    }

    /// Inertia from the signs of the diagonal factor `D`. The factor stores
    /// each column's diagonal entry first, so the column counts from the
    /// symbolic analysis locate every pivot.
    fn inertia(&self) -> Option<Inertia> {
        if !self.factorized {
            return None;
        }
        let mut inertia = Inertia::ZERO;
        let mut ptr = 0;
        for &len in &self.col_counts {
            let d = self.L_values[ptr];
            if d > 0.0 {
                inertia.positive += 1;
            } else if d < 0.0 {
                inertia.negative += 1;
            } else {
                inertia.zero += 1;
            }
            ptr += len;
        }
        Some(inertia)
    }

    fn is_inertia(&self) -> bool {
        true
    }

    /// Grows the pivot regularization. The next `factorize` picks the new
    /// values up; returns `false` once the cap is reached.
    fn improve(&mut self) -> bool {
        let (epsilon, delta) = if self.regularization.1 == 0.0 {
            (Self::FIRST_REGULARIZATION, Self::FIRST_REGULARIZATION)
        } else {
            (
                self.regularization.0 * self.options.improve_factor,
                self.regularization.1 * self.options.improve_factor,
            )
        };
        if delta > self.options.max_regularization {
            return false;
        }
        self.regularization = (epsilon, delta);
        true
    }

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn accepts(&self, dtype: DType) -> bool {
        dtype == DType::F64
    }
}

/// Extracts the permuted upper triangle of a symmetric lower-storage matrix,
/// which is the layout the simplicial factorization kernels consume.
fn permuted_upper(
    mat: SparseColMatRef<'_, I, E>,
    perm: PermRef<'_, I>,
) -> Result<SparseColMat<I, E>, Problem> {
    let dim = mat.ncols();
    let nnz = mat.compute_nnz();

    let mut mat_col_ptrs = Vec::new();
    let mut mat_row_indices = Vec::new();
    let mut mat_values = Vec::new();

    mat_col_ptrs
        .try_reserve_exact(dim + 1)
        .via(LinearSolverError::MemoryReservation)?;
    mat_col_ptrs.resize(dim + 1, 0usize);
    mat_row_indices
        .try_reserve_exact(nnz)
        .via(LinearSolverError::MemoryReservation)?;
    mat_row_indices.resize(nnz, 0usize);
    mat_values
        .try_reserve_exact(nnz)
        .via(LinearSolverError::MemoryReservation)?;
    mat_values.resize(nnz, 0.0f64);

    let mut mem = MemBuffer::try_new(faer::sparse::utils::permute_self_adjoint_scratch::<I>(dim))
        .via(LinearSolverError::MemoryAllocation)?;
    faer::sparse::utils::permute_self_adjoint_to_unsorted(
        &mut mat_values,
        &mut mat_col_ptrs,
        &mut mat_row_indices,
        mat.rb(),
        perm.rb(),
        faer::Side::Lower,
        faer::Side::Upper,
        MemStack::new(&mut mem),
    );

    Ok(SparseColMat::<I, E>::new(
        unsafe {
            SymbolicSparseColMat::new_unchecked(dim, dim, mat_col_ptrs, None, mat_row_indices)
        },
        mat_values,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::rand::rngs::StdRng;
    use faer::rand::SeedableRng;
    use faer::stats::prelude::{CwiseMatDistribution, StandardNormal};
    use faer::stats::DistributionExt;
    use faer::sparse::Triplet;
    use faer::Mat;

    fn lower_tridiagonal(n: usize, diag: E, off: E) -> SparseColMat<I, E> {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(Triplet::new(i, i, diag));
            if i + 1 < n {
                triplets.push(Triplet::new(i + 1, i, off));
            }
        }
        SparseColMat::try_new_from_triplets(n, n, &triplets).unwrap()
    }

    fn dense_symmetric(mat: &SparseColMat<I, E>) -> Mat<E> {
        let n = mat.ncols();
        let mut out = Mat::zeros(n, n);
        for j in 0..n {
            for p in mat.col_ptr()[j]..mat.col_ptr()[j + 1] {
                let i = mat.row_idx()[p];
                out[(i, j)] = mat.val()[p];
                out[(j, i)] = mat.val()[p];
            }
        }
        out
    }

    #[test]
    fn test_solve_random_rhs() {
        let n = 12;
        let mat = lower_tridiagonal(n, 4.0, -1.0);
        let dense = dense_symmetric(&mat);

        let mut solver = SimplicialSparseLdlt::new(&SparseSolverOptions::default());
        solver.analyze(mat.as_ref()).unwrap();
        solver.factorize(mat.as_ref()).unwrap();

        let rng = &mut StdRng::seed_from_u64(0);
        for _ in 0..10 {
            let col = CwiseMatDistribution {
                nrows: n,
                ncols: 1,
                dist: StandardNormal,
            }
            .rand(rng);

            let mut result: Mat<E> = col.clone();
            solver.solve_in_place(&mut result.as_mut()).unwrap();

            assert!((&col - &dense * &result).norm_l2() < 1e-10);
        }
    }

    #[test]
    fn test_inertia_indefinite() {
        // [[2, 1, 0], [1, -3, 1], [0, 1, 4]] has signature (2, 0, 1).
        let triplets = vec![
            Triplet::new(0, 0, 2.0),
            Triplet::new(1, 0, 1.0),
            Triplet::new(1, 1, -3.0),
            Triplet::new(2, 1, 1.0),
            Triplet::new(2, 2, 4.0),
        ];
        let mat = SparseColMat::try_new_from_triplets(3, 3, &triplets).unwrap();

        let mut solver = SimplicialSparseLdlt::new(&SparseSolverOptions::default());
        solver.analyze(mat.as_ref()).unwrap();
        assert_eq!(solver.inertia(), None);
        solver.factorize(mat.as_ref()).unwrap();
        assert_eq!(solver.inertia(), Some(Inertia::new(2, 0, 1)));
        assert!(solver.is_inertia());
        assert!(solver.accepts(DType::F64));
        assert!(!solver.accepts(DType::F32));
    }

    #[test]
    fn test_singular_block_rejected() {
        // Rank-one 2x2 block.
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(1, 0, 1.0),
            Triplet::new(1, 1, 1.0),
        ];
        let mat = SparseColMat::try_new_from_triplets(2, 2, &triplets).unwrap();

        let mut solver = SimplicialSparseLdlt::new(&SparseSolverOptions::default());
        solver.analyze(mat.as_ref()).unwrap();
        assert!(solver.factorize(mat.as_ref()).is_err());
        assert_eq!(solver.inertia(), None);
    }

    #[test]
    fn test_improve_caps_out() {
        let mut solver = SimplicialSparseLdlt::new(&SparseSolverOptions::default());
        let mut rounds = 0;
        while solver.improve() {
            rounds += 1;
            assert!(rounds < 64);
        }
        assert!(rounds >= 1);
        assert!(solver.regularization.1 <= solver.options.max_regularization);
    }
}
