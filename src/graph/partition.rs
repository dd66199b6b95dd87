//! Partition derivation from the problem graph.
//!
//! Produces the integer partition vector over the `[columns ; slacks ; rows]`
//! KKT layout. Partition 0 is the coupling border; ids `1 … K` are the
//! independent subproblems.
//!
//! One-level graphs (no sub-blocks) make each node a partition; linking
//! edges are promoted to the border together with the columns they
//! reference. Two-level graphs make each sub-block a partition and put
//! everything attached to the root on the border. Either way a constraint
//! row can only ever span one non-border partition, which is exactly the
//! invariant the Schur factorization needs.

use crate::graph::{KktLayout, ProblemGraph};
use crate::schur::SchurError;
use crate::I;

pub fn derive_partition(graph: &ProblemGraph, layout: &KktLayout) -> Result<Vec<I>, SchurError> {
    if graph.num_nodes() == 0 {
        return Err(SchurError::InvalidPartition);
    }
    let mut partition = vec![0usize; layout.dim()];

    if graph.root().sub_blocks.is_empty() {
        one_level(graph, layout, &mut partition);
    } else {
        two_level(graph, layout, &mut partition);
    }

    // Slacks inherit the partition of their constraint row.
    for (s, &row) in layout.slack_rows.iter().enumerate() {
        partition[layout.slack_index(s)] = partition[layout.row_index(row)];
    }

    Ok(partition)
}

/// Every node is a partition. Self-edges follow their node; linking edges
/// move to the border along with the columns they couple.
fn one_level(graph: &ProblemGraph, layout: &KktLayout, partition: &mut [I]) {
    let mut node_part = vec![0usize; graph.num_nodes()];
    for (k, &node) in graph.root().nodes.iter().enumerate() {
        node_part[node.0] = k + 1;
        let base = layout.node_cols[node.0];
        let n_var = graph.node(node).n_var;
        for col in base..base + n_var {
            partition[col] = k + 1;
        }
    }

    for (id, edge) in graph.edges() {
        let nodes = edge.nodes();
        let base = layout.edge_rows[id.0];
        if let [node] = nodes[..] {
            for r in 0..edge.n_cons() {
                partition[layout.row_index(base + r)] = node_part[node.0];
            }
        } else {
            // Linking edge: rows and every referenced column join the border.
            for r in 0..edge.n_cons() {
                partition[layout.row_index(base + r)] = 0;
            }
            for &(node, var) in &edge.vars {
                partition[layout.node_cols[node.0] + var] = 0;
            }
        }
    }
}

/// Every sub-block is a partition; root variables, root edges, and the
/// columns root edges reference stay on the border.
fn two_level(graph: &ProblemGraph, layout: &KktLayout, partition: &mut [I]) {
    for (k, &block) in graph.root().sub_blocks.iter().enumerate() {
        let part = k + 1;
        for &node in &graph.block(block).nodes {
            let base = layout.node_cols[node.0];
            for col in base..base + graph.node(node).n_var {
                partition[col] = part;
            }
        }
        for &edge in &graph.block(block).edges {
            let base = layout.edge_rows[edge.0];
            for r in 0..graph.edge(edge).n_cons() {
                partition[layout.row_index(base + r)] = part;
            }
        }
    }

    // Root nodes already sit at 0; root edges pull their referenced columns
    // down to the border as well.
    for &edge in &graph.root().edges {
        let e = graph.edge(edge);
        let base = layout.edge_rows[edge.0];
        for r in 0..e.n_cons() {
            partition[layout.row_index(base + r)] = 0;
        }
        for &(node, var) in &e.vars {
            partition[layout.node_cols[node.0] + var] = 0;
        }
    }
}
