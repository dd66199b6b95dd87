//! Deterministic coloring of Schur columns.
//!
//! Columns are dealt round-robin into as many color classes as there are
//! workers. A factorization pass runs one round per color; in round `q`
//! worker `k` handles color `(q + k) mod K`, so across all rounds every
//! worker touches every column exactly once, while within a round the
//! workers write disjoint column sets.

/// Round-robin assignment of `n_cols` Schur columns to `num_parts` colors.
pub struct ColoringSchedule {
    n_cols: usize,
    num_parts: usize,
}

impl ColoringSchedule {
    pub fn new(n_cols: usize, num_parts: usize) -> Self {
        assert!(num_parts > 0);
        Self { n_cols, num_parts }
    }

    pub fn num_rounds(&self) -> usize {
        self.num_parts
    }

    /// Color class of a Schur column.
    pub fn color_of(&self, col: usize) -> usize {
        col % self.num_parts
    }

    /// Color handled by `worker` during `round`.
    pub fn worker_color(&self, round: usize, worker: usize) -> usize {
        (round + worker) % self.num_parts
    }

    /// Columns belonging to a color class, ascending.
    pub fn columns(&self, color: usize) -> impl Iterator<Item = usize> + '_ {
        (color..self.n_cols).step_by(self.num_parts)
    }
}
