//! Sub-matrix views over a shared symmetric CSC matrix.
//!
//! A view carries its own CSC skeleton over a subset of rows and columns plus
//! the list of positions in the parent's value array it gathers from. The
//! skeleton and value storage are kept side by side and lent out as a
//! `SparseColMatRef` on demand; `refresh` is a bulk gather of fresh values
//! before each factorization.
//!
//! Extraction consumes positions out of a shared `taken` mask, so extracting
//! the border block, every diagonal block, and every coupling block carves
//! the parent into disjoint pieces. A position claimed twice, or left
//! unclaimed at the end, means the partition vector couples two independent
//! partitions.

use faer::sparse::{SparseColMatRef, SymbolicSparseColMat};

use crate::schur::SchurError;
use crate::{E, I};

/// Symmetric lower-triangular view on an ascending index set.
pub struct SymmetricView {
    symbolic: SymbolicSparseColMat<I>,
    values: Vec<E>,
    src: Vec<I>,
}

impl SymmetricView {
    /// Extracts the view for `K[set, set]`, claiming every consumed parent
    /// position in `taken`.
    pub fn extract(
        parent: SparseColMatRef<'_, I, E>,
        set: &[I],
        taken: &mut [bool],
    ) -> Result<Self, SchurError> {
        let n = set.len();
        let mut local = vec![usize::MAX; parent.nrows()];
        for (l, &g) in set.iter().enumerate() {
            local[g] = l;
        }

        let mut col_ptrs = Vec::with_capacity(n + 1);
        let mut row_indices = Vec::new();
        let mut src = Vec::new();

        col_ptrs.push(0);
        for (c, &gj) in set.iter().enumerate() {
            for p in parent.col_ptr()[gj]..parent.col_ptr()[gj + 1] {
                let r = local[parent.row_idx()[p]];
                if r == usize::MAX {
                    continue;
                }
                // Lower storage and an ascending set keep the view lower.
                debug_assert!(r >= c);
                if taken[p] {
                    return Err(SchurError::InvalidPartition);
                }
                taken[p] = true;
                row_indices.push(r);
                src.push(p);
            }
            col_ptrs.push(row_indices.len());
        }

        let values = vec![0.0; src.len()];
        let symbolic =
            unsafe { SymbolicSparseColMat::new_unchecked(n, n, col_ptrs, None, row_indices) };
        Ok(Self {
            symbolic,
            values,
            src,
        })
    }

    /// Gathers fresh values from the parent's value array.
    pub fn refresh(&mut self, parent_val: &[E]) {
        for (t, &p) in self.src.iter().enumerate() {
            self.values[t] = parent_val[p];
        }
    }

    pub fn mat(&self) -> SparseColMatRef<'_, I, E> {
        SparseColMatRef::new(self.symbolic.as_ref(), &self.values)
    }

    pub fn dim(&self) -> usize {
        self.symbolic.ncols()
    }

    /// Number of parent positions this view gathers from.
    pub fn stored(&self) -> usize {
        self.src.len()
    }
}

/// Rectangular view on a row set and a column set.
///
/// The parent stores the lower triangle only, so an entry `K[r, c]` with
/// `r` in the row set and `c` in the column set may live either in parent
/// column `c` or, transposed, in parent column `r`; extraction walks both.
pub struct RectangularView {
    symbolic: SymbolicSparseColMat<I>,
    values: Vec<E>,
    src: Vec<I>,
    nz_cols: Vec<I>,
}

impl RectangularView {
    pub fn extract(
        parent: SparseColMatRef<'_, I, E>,
        rows: &[I],
        cols: &[I],
        taken: &mut [bool],
    ) -> Result<Self, SchurError> {
        let dim = parent.nrows();
        let mut local_row = vec![usize::MAX; dim];
        let mut local_col = vec![usize::MAX; dim];
        for (l, &g) in rows.iter().enumerate() {
            local_row[g] = l;
        }
        for (l, &g) in cols.iter().enumerate() {
            local_col[g] = l;
        }

        // (local col, local row, parent position)
        let mut entries: Vec<(I, I, I)> = Vec::new();
        for &gj in cols {
            for p in parent.col_ptr()[gj]..parent.col_ptr()[gj + 1] {
                let r = local_row[parent.row_idx()[p]];
                if r == usize::MAX {
                    continue;
                }
                if taken[p] {
                    return Err(SchurError::InvalidPartition);
                }
                taken[p] = true;
                entries.push((local_col[gj], r, p));
            }
        }
        for &gj in rows {
            for p in parent.col_ptr()[gj]..parent.col_ptr()[gj + 1] {
                let c = local_col[parent.row_idx()[p]];
                if c == usize::MAX {
                    continue;
                }
                if taken[p] {
                    return Err(SchurError::InvalidPartition);
                }
                taken[p] = true;
                entries.push((c, local_row[gj], p));
            }
        }
        entries.sort_unstable();

        let mut col_ptrs = Vec::with_capacity(cols.len() + 1);
        let mut nz_cols = Vec::new();
        col_ptrs.push(0);
        let mut idx = 0;
        for c in 0..cols.len() {
            while idx < entries.len() && entries[idx].0 == c {
                idx += 1;
            }
            if idx > *col_ptrs.last().unwrap() {
                nz_cols.push(c);
            }
            col_ptrs.push(idx);
        }

        let row_indices: Vec<I> = entries.iter().map(|&(_, r, _)| r).collect();
        let src: Vec<I> = entries.iter().map(|&(_, _, p)| p).collect();
        let values = vec![0.0; src.len()];
        let symbolic = unsafe {
            SymbolicSparseColMat::new_unchecked(rows.len(), cols.len(), col_ptrs, None, row_indices)
        };
        Ok(Self {
            symbolic,
            values,
            src,
            nz_cols,
        })
    }

    pub fn refresh(&mut self, parent_val: &[E]) {
        for (t, &p) in self.src.iter().enumerate() {
            self.values[t] = parent_val[p];
        }
    }

    pub fn mat(&self) -> SparseColMatRef<'_, I, E> {
        SparseColMatRef::new(self.symbolic.as_ref(), &self.values)
    }

    /// Columns whose sub-column holds at least one non-zero, ascending.
    pub fn nz_cols(&self) -> &[I] {
        &self.nz_cols
    }

    pub fn stored(&self) -> usize {
        self.src.len()
    }
}
