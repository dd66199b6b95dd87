//! # Parallel Schur-Complement Solver
//!
//! Solves symmetric indefinite KKT systems `K x = b` whose rows and columns
//! have been partitioned into a bordered block-diagonal form: independent
//! diagonal blocks `K_1 … K_K`, coupling blocks `B_k` into the border, and a
//! border block `K_0`. A factorization pass factorizes every `K_k` in
//! parallel, assembles the dense Schur complement
//! `S = K_0 − Σ B_kᵀ K_k⁻¹ B_k` using color rounds that keep concurrent
//! writers on disjoint columns, and factorizes `S`. A solve is the usual
//! bordered forward/back substitution.
//!
//! The non-zero pattern of `K` is fixed for the lifetime of a solver; only
//! the values change between factorizations.

pub mod coloring;
pub mod options;
pub mod view;
pub mod worker;

use std::time::Instant;

use derive_more::{Display, Error};
use faer::sparse::SparseColMat;
use faer::{MatMut, MatRef};
use log::{debug, warn};
use rayon::prelude::*;

use crate::linalg::solver::{DenseSolver, DenseSolvers, Inertia};
use crate::schur::coloring::ColoringSchedule;
use crate::schur::options::SchurOptions;
use crate::schur::view::SymmetricView;
use crate::schur::worker::SubproblemWorker;
use crate::{E, I};

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum SchurError {
    #[display("partition vector is missing, empty, or couples independent partitions")]
    InvalidPartition,

    #[display("a subproblem block is singular")]
    BlockSingular,

    #[display("the dense Schur complement is singular")]
    SchurSingular,

    #[display("inertia requested but a configured solver does not provide it")]
    InertiaUnavailable,

    #[display("iterative refinement did not improve the residual")]
    RefinementStalled,

    #[display("right-hand side length does not match the matrix dimension")]
    DimensionMismatch,

    #[display("solve requested before a successful factorization")]
    Uninitialized,

    #[display("unrecognized option '{name}'")]
    UnknownOption { name: String },

    #[display("invalid value for option '{name}'")]
    InvalidOptionValue { name: String },

    #[display("blocks may only be nested one level below the root")]
    NestedBlock,

    #[display("an edge may only reference nodes of its own block")]
    EdgeOutsideBlock,
}

/// Matrix format a KKT solver consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixFormat {
    Csc,
    Dense,
}

/// The interface the outer interior-point solver drives.
pub trait KktSolver {
    /// Input format expected by `factorize` and `solve`.
    fn input_type(&self) -> MatrixFormat;

    /// Factorizes a fresh set of values over the fixed non-zero pattern.
    fn factorize(&mut self, mat: &SparseColMat<I, E>) -> Result<(), SchurError>;

    /// Solves in place against the most recent factorization.
    fn solve(&mut self, mat: &SparseColMat<I, E>, rhs: &mut [E]) -> Result<(), SchurError>;

    /// Whether `inertia` is available with the configured backends.
    fn is_inertia(&self) -> bool;

    /// Inertia of the factorized matrix.
    fn inertia(&self) -> Result<Inertia, SchurError>;

    /// Iterative-refinement hook; `false` once nothing is left to try.
    fn improve(&mut self) -> bool;

    /// Human-readable description of the configured solver.
    fn introduce(&self) -> String;
}

/// Schur-complement solver over a partitioned symmetric KKT matrix.
///
/// Workers and views are created once at construction, after the partition
/// and the non-zero pattern are known; every `factorize` call refreshes the
/// values in place.
pub struct SchurSolver {
    options: SchurOptions,
    dim: usize,
    nnz: usize,
    num_parts: usize,
    /// Border indices `V_0`, ascending.
    border: Vec<I>,
    k0: SymmetricView,
    workers: Vec<SubproblemWorker>,
    schedule: ColoringSchedule,
    /// Dense Schur complement, column-major `|V_0| × |V_0|`.
    s: Vec<E>,
    /// Border scratch vector.
    w0: Vec<E>,
    dense: DenseSolvers,
    factorized: bool,
    /// Worker loops run serially when a configured backend is not
    /// thread-safe.
    serial: bool,
}

impl SchurSolver {
    pub fn new(mat: &SparseColMat<I, E>, options: SchurOptions) -> Result<Self, SchurError> {
        let dim = mat.ncols();
        if mat.nrows() != dim {
            return Err(SchurError::DimensionMismatch);
        }
        if options.partition.is_empty() || options.partition.len() != dim {
            return Err(SchurError::InvalidPartition);
        }
        let num_parts = options.partition.iter().copied().max().unwrap_or(0);
        if num_parts == 0 {
            return Err(SchurError::InvalidPartition);
        }

        let mut sets: Vec<Vec<I>> = vec![Vec::new(); num_parts + 1];
        for (i, &p) in options.partition.iter().enumerate() {
            sets[p].push(i);
        }
        let border = std::mem::take(&mut sets[0]);

        let nnz = mat.compute_nnz();
        let mut taken = vec![false; nnz];
        let k0 = SymmetricView::extract(mat.as_ref(), &border, &mut taken)?;
        let mut workers = Vec::with_capacity(num_parts);
        for set in sets.into_iter().skip(1) {
            workers.push(SubproblemWorker::new(
                mat.as_ref(),
                set,
                &border,
                &mut taken,
                options.subproblem_solver,
                &options.subproblem_solver_options,
            )?);
        }
        // Any position left over belongs to a non-zero coupling two
        // independent partitions, which the factorization cannot represent.
        if taken.iter().any(|&t| !t) {
            return Err(SchurError::InvalidPartition);
        }

        let n0 = border.len();
        let serial = workers.iter().any(|w| !w.is_thread_safe());
        let schedule = ColoringSchedule::new(n0, num_parts);
        let dense = options.dense_solver.build(&options.dense_solver_options);

        Ok(Self {
            options,
            dim,
            nnz,
            num_parts,
            border,
            k0,
            workers,
            schedule,
            s: vec![0.0; n0 * n0],
            w0: vec![0.0; n0],
            dense,
            factorized: false,
            serial,
        })
    }

    fn logs(&self, level: log::Level) -> bool {
        level <= self.options.print_level
    }

    /// Refreshes all views from `mat`, factorizes the diagonal blocks in
    /// parallel, assembles the dense Schur complement in color rounds, and
    /// factorizes it.
    pub fn factorize(&mut self, mat: &SparseColMat<I, E>) -> Result<(), SchurError> {
        if mat.ncols() != self.dim || mat.nrows() != self.dim || mat.compute_nnz() != self.nnz {
            return Err(SchurError::DimensionMismatch);
        }
        self.factorized = false;
        let start = Instant::now();
        let vals = mat.val();
        let n0 = self.border.len();

        // Border block: refresh, then spread the symmetrized lower triangle
        // into S.
        self.k0.refresh(vals);
        self.s.fill(0.0);
        {
            let k0 = self.k0.mat();
            for c in 0..n0 {
                for p in k0.col_ptr()[c]..k0.col_ptr()[c + 1] {
                    let r = k0.row_idx()[p];
                    let v = k0.val()[p];
                    self.s[c * n0 + r] = v;
                    if r != c {
                        self.s[r * n0 + c] = v;
                    }
                }
            }
        }

        // Refresh and factorize every diagonal block.
        run_workers(self.serial, &mut self.workers, |w| {
            w.refresh(vals);
            w.factorize_block()
        })?;

        // Schur assembly. The outer loop over color rounds is sequential;
        // within a round each worker owns the column slices of one color, so
        // the workers never write the same column concurrently.
        if n0 > 0 {
            let schedule = &self.schedule;
            let num_parts = self.num_parts;
            for round in 0..schedule.num_rounds() {
                let mut buckets: Vec<Option<Vec<(usize, &mut [E])>>> =
                    (0..num_parts).map(|_| Some(Vec::new())).collect();
                for (j, col) in self.s.chunks_exact_mut(n0).enumerate() {
                    buckets[schedule.color_of(j)]
                        .as_mut()
                        .unwrap()
                        .push((j, col));
                }
                let jobs: Vec<(&mut SubproblemWorker, Vec<(usize, &mut [E])>)> = self
                    .workers
                    .iter_mut()
                    .enumerate()
                    .map(|(k, w)| {
                        let color = schedule.worker_color(round, k);
                        (w, buckets[color].take().unwrap())
                    })
                    .collect();
                let results: Vec<Result<(), SchurError>> = if self.serial {
                    jobs.into_iter()
                        .map(|(w, cols)| w.update_schur(cols))
                        .collect()
                } else {
                    jobs.into_par_iter()
                        .map(|(w, cols)| w.update_schur(cols))
                        .collect()
                };
                results.into_iter().collect::<Result<(), _>>()?;
            }

            let s_ref = MatRef::from_column_major_slice(&self.s, n0, n0);
            self.dense
                .factorize(s_ref)
                .map_err(|_| SchurError::SchurSingular)?;
        }

        self.factorized = true;
        if self.logs(log::Level::Debug) {
            debug!(
                "factorized {} blocks and a {}-row Schur complement in {:.2?}",
                self.num_parts,
                n0,
                start.elapsed()
            );
        }
        Ok(())
    }

    /// Bordered forward/back substitution against the current factorization.
    pub fn solve_in_place(&mut self, x: &mut [E]) -> Result<(), SchurError> {
        if x.len() != self.dim {
            return Err(SchurError::DimensionMismatch);
        }
        if !self.factorized {
            return Err(SchurError::Uninitialized);
        }
        let n0 = self.border.len();

        // Save the border right-hand side.
        for (l, &g) in self.border.iter().enumerate() {
            self.w0[l] = x[g];
        }

        // Forward solves per partition.
        {
            let xs: &[E] = x;
            run_workers(self.serial, &mut self.workers, |w| w.forward(xs))?;
        }

        // Border accumulation stays sequential; the target vector is shared
        // and its cost is dominated by the forward solves.
        for w in &self.workers {
            w.contrib(&mut self.w0);
        }

        // Dense Schur solve, then write the border solution back.
        if n0 > 0 {
            let mut rhs = MatMut::from_column_major_slice_mut(&mut self.w0, n0, 1);
            self.dense
                .solve_in_place(&mut rhs)
                .map_err(|_| SchurError::SchurSingular)?;
            for (l, &g) in self.border.iter().enumerate() {
                x[g] = self.w0[l];
            }
        }

        // Back substitution per partition, then disjoint scatters.
        {
            let xs: &[E] = x;
            let w0: &[E] = &self.w0;
            run_workers(self.serial, &mut self.workers, |w| w.back(xs, w0))?;
        }
        for w in &self.workers {
            w.scatter(x);
        }
        Ok(())
    }

    /// Inertia by Haynsworth additivity: the block inertias plus the inertia
    /// of the Schur complement.
    pub fn inertia(&self) -> Result<Inertia, SchurError> {
        if !self.factorized {
            return Err(SchurError::Uninitialized);
        }
        let mut total = if self.border.is_empty() {
            Inertia::ZERO
        } else {
            self.dense
                .inertia()
                .ok_or(SchurError::InertiaUnavailable)?
        };
        for w in &self.workers {
            total += w.inertia().ok_or(SchurError::InertiaUnavailable)?;
        }
        Ok(total)
    }

    pub fn is_inertia(&self) -> bool {
        (self.border.is_empty() || self.dense.is_inertia())
            && self.workers.iter().all(|w| w.is_inertia())
    }

    /// Delegates the refinement hook to every subproblem solver; the next
    /// `factorize` picks up whatever they adjusted. Sequential across
    /// workers.
    pub fn refine(&mut self) -> bool {
        let mut improved = true;
        for w in &mut self.workers {
            improved &= w.improve();
        }
        if !improved && self.logs(log::Level::Warn) {
            warn!("{}", SchurError::RefinementStalled);
        }
        improved
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    pub fn border_dim(&self) -> usize {
        self.border.len()
    }

    /// Total parent positions claimed across `K_0`, every `K_k`, and every
    /// `B_k`.
    pub(crate) fn stored_total(&self) -> usize {
        self.k0.stored() + self.workers.iter().map(|w| w.stored()).sum::<usize>()
    }
}

impl KktSolver for SchurSolver {
    fn input_type(&self) -> MatrixFormat {
        MatrixFormat::Csc
    }

    fn factorize(&mut self, mat: &SparseColMat<I, E>) -> Result<(), SchurError> {
        SchurSolver::factorize(self, mat)
    }

    fn solve(&mut self, mat: &SparseColMat<I, E>, rhs: &mut [E]) -> Result<(), SchurError> {
        if mat.ncols() != self.dim {
            return Err(SchurError::DimensionMismatch);
        }
        self.solve_in_place(rhs)
    }

    fn is_inertia(&self) -> bool {
        SchurSolver::is_inertia(self)
    }

    fn inertia(&self) -> Result<Inertia, SchurError> {
        SchurSolver::inertia(self)
    }

    fn improve(&mut self) -> bool {
        self.refine()
    }

    fn introduce(&self) -> String {
        format!(
            "Schur-complement solver: {} partitions, border dimension {}, subproblem solver: {}, dense solver: {}",
            self.num_parts,
            self.border.len(),
            self.options.subproblem_solver.name(),
            self.options.dense_solver.name()
        )
    }
}

/// Runs one closure per worker, in parallel unless a backend demanded the
/// serial fallback. Every worker runs to completion; the first failing
/// partition's error is surfaced after the region joins.
fn run_workers<F>(
    serial: bool,
    workers: &mut [SubproblemWorker],
    f: F,
) -> Result<(), SchurError>
where
    F: Fn(&mut SubproblemWorker) -> Result<(), SchurError> + Send + Sync,
{
    let results: Vec<Result<(), SchurError>> = if serial {
        workers.iter_mut().map(|w| f(w)).collect()
    } else {
        workers.par_iter_mut().map(|w| f(w)).collect()
    };
    results.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::sparse::Triplet;

    fn two_by_two(coupling: E) -> SparseColMat<I, E> {
        let triplets = vec![
            Triplet::new(0, 0, 1.0),
            Triplet::new(1, 0, coupling),
            Triplet::new(1, 1, 1.0),
        ];
        SparseColMat::try_new_from_triplets(2, 2, &triplets).unwrap()
    }

    fn diag_two() -> SparseColMat<I, E> {
        let triplets = vec![Triplet::new(0, 0, 1.0), Triplet::new(1, 1, 1.0)];
        SparseColMat::try_new_from_triplets(2, 2, &triplets).unwrap()
    }

    #[test]
    fn test_partition_must_cover_matrix() {
        let mat = two_by_two(0.5);
        assert_eq!(
            SchurSolver::new(&mat, SchurOptions::new(vec![])).err(),
            Some(SchurError::InvalidPartition)
        );
        assert_eq!(
            SchurSolver::new(&mat, SchurOptions::new(vec![1])).err(),
            Some(SchurError::InvalidPartition)
        );
        assert_eq!(
            SchurSolver::new(&mat, SchurOptions::new(vec![0, 0])).err(),
            Some(SchurError::InvalidPartition)
        );
    }

    #[test]
    fn test_cross_partition_coupling_rejected() {
        // A non-zero between partitions 1 and 2 never lands in any view.
        let mat = two_by_two(0.5);
        assert_eq!(
            SchurSolver::new(&mat, SchurOptions::new(vec![1, 2])).err(),
            Some(SchurError::InvalidPartition)
        );
        // The same pattern is fine once one side is on the border.
        assert!(SchurSolver::new(&mat, SchurOptions::new(vec![1, 0])).is_ok());
    }

    #[test]
    fn test_solve_requires_factorization() {
        let mat = diag_two();
        let mut solver = SchurSolver::new(&mat, SchurOptions::new(vec![1, 2])).unwrap();
        let mut rhs = vec![1.0, 1.0];
        assert_eq!(
            solver.solve_in_place(&mut rhs).err(),
            Some(SchurError::Uninitialized)
        );

        solver.factorize(&mat).unwrap();
        let mut short = vec![1.0];
        assert_eq!(
            solver.solve_in_place(&mut short).err(),
            Some(SchurError::DimensionMismatch)
        );
    }

    #[test]
    fn test_introduce_names_backends() {
        let mat = two_by_two(0.5);
        let solver = SchurSolver::new(&mat, SchurOptions::new(vec![1, 0])).unwrap();
        let intro = solver.introduce();
        assert!(intro.contains("1 partitions"));
        assert!(intro.contains("simplicial LDLT"));
    }
}
