pub type E = f64;
pub type I = usize;

pub mod graph;
pub mod linalg;
pub mod nlp;
pub mod schur;

#[cfg(test)]
pub mod tests;

pub use graph::partition::derive_partition;
pub use graph::{BlockId, EdgeId, NodeId, ProblemGraph};
pub use linalg::solver::{DenseSolverKind, Inertia, SparseSolverKind};
pub use nlp::NlpAdapter;
pub use schur::options::SchurOptions;
pub use schur::{KktSolver, SchurError, SchurSolver};
