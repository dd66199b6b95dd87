//! Configuration for the Schur solver.
//!
//! Options form an explicit struct; the string-keyed [`SchurOptions::set`]
//! entry point recognizes exactly the fields below and rejects anything else
//! at configuration time rather than ignoring it.

use log::LevelFilter;

use crate::linalg::solver::{
    DenseSolverKind, DenseSolverOptions, SparseSolverKind, SparseSolverOptions,
};
use crate::schur::SchurError;
use crate::{E, I};

/// A value accepted by [`SchurOptions::set`].
#[derive(Debug, Clone)]
pub enum OptionValue {
    Float(E),
    Str(String),
    IndexVec(Vec<I>),
    SparseOptions(SparseSolverOptions),
    DenseOptions(DenseSolverOptions),
}

#[derive(Debug, Clone)]
pub struct SchurOptions {
    /// Partition id per KKT row/column; 0 is the coupling partition. Required.
    pub partition: Vec<I>,
    /// Backend for the per-partition diagonal blocks.
    pub subproblem_solver: SparseSolverKind,
    /// Forwarded to each subproblem solver instance.
    pub subproblem_solver_options: SparseSolverOptions,
    /// Backend for the dense Schur complement.
    pub dense_solver: DenseSolverKind,
    /// Forwarded to the dense solver.
    pub dense_solver_options: DenseSolverOptions,
    /// Minimum level of the solver's own log output; `Error` silences all
    /// but errors.
    pub print_level: LevelFilter,
    /// Soft wall-clock budget in seconds. Carried for the outer solver; this
    /// core does not interrupt itself.
    pub max_cpu_time: E,
}

impl Default for SchurOptions {
    fn default() -> Self {
        Self {
            partition: Vec::new(),
            subproblem_solver: SparseSolverKind::default(),
            subproblem_solver_options: SparseSolverOptions::default(),
            dense_solver: DenseSolverKind::default(),
            dense_solver_options: DenseSolverOptions::default(),
            print_level: LevelFilter::Warn,
            max_cpu_time: E::INFINITY,
        }
    }
}

impl SchurOptions {
    pub fn new(partition: Vec<I>) -> Self {
        Self {
            partition,
            ..Self::default()
        }
    }

    /// Sets a recognized option by name. Unknown names and mistyped values
    /// are errors, never silent no-ops.
    pub fn set(&mut self, name: &str, value: OptionValue) -> Result<(), SchurError> {
        let invalid = || SchurError::InvalidOptionValue {
            name: name.to_string(),
        };
        match name {
            "partition" => match value {
                OptionValue::IndexVec(v) => self.partition = v,
                _ => return Err(invalid()),
            },
            "subproblem_solver" => match value {
                OptionValue::Str(s) => {
                    self.subproblem_solver = match s.as_str() {
                        "simplicial_ldlt" => SparseSolverKind::SimplicialLdlt,
                        "simplicial_lu" => SparseSolverKind::SimplicialLu,
                        _ => return Err(invalid()),
                    }
                }
                _ => return Err(invalid()),
            },
            "subproblem_solver_options" => match value {
                OptionValue::SparseOptions(o) => self.subproblem_solver_options = o,
                _ => return Err(invalid()),
            },
            "dense_solver" => match value {
                OptionValue::Str(s) => {
                    self.dense_solver = match s.as_str() {
                        "partial_piv_lu" => DenseSolverKind::PartialPivLu,
                        "full_piv_lu" => DenseSolverKind::FullPivLu,
                        _ => return Err(invalid()),
                    }
                }
                _ => return Err(invalid()),
            },
            "dense_solver_options" => match value {
                OptionValue::DenseOptions(o) => self.dense_solver_options = o,
                _ => return Err(invalid()),
            },
            "print_level" => match value {
                OptionValue::Str(s) => {
                    self.print_level = match s.as_str() {
                        "off" => LevelFilter::Off,
                        "error" => LevelFilter::Error,
                        "warn" => LevelFilter::Warn,
                        "info" => LevelFilter::Info,
                        "debug" => LevelFilter::Debug,
                        "trace" => LevelFilter::Trace,
                        _ => return Err(invalid()),
                    }
                }
                _ => return Err(invalid()),
            },
            "max_cpu_time" => match value {
                OptionValue::Float(t) if t >= 0.0 => self.max_cpu_time = t,
                _ => return Err(invalid()),
            },
            _ => {
                return Err(SchurError::UnknownOption {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}
