//! # Problem-Graph to Solver Bridge
//!
//! Walks the problem graph once to enumerate the Jacobian and Hessian
//! coordinate structures and the `[columns ; slacks ; rows]` layout, then
//! forwards numerical evaluations to the per-edge models every iteration.
//! Also produces the starting point and bound vectors in the solver's
//! conventions.

use faer::Col;

use crate::graph::{Edge, KktLayout, ProblemGraph};
use crate::linalg::vector_ops::{cwise_clamp, cwise_negative_part, cwise_positive_part};
use crate::{E, I};

pub struct NlpAdapter<'a> {
    graph: &'a ProblemGraph,
    layout: KktLayout,
    /// Global Jacobian coordinates, one entry per structural non-zero.
    jac_structure: Vec<(I, I)>,
    /// Global lower-triangle Hessian coordinates.
    hess_structure: Vec<(I, I)>,
    /// Per edge, offset and length into the Jacobian value array.
    jac_spans: Vec<(usize, usize)>,
    /// Per edge, offset and length into the Hessian value array.
    hess_spans: Vec<(usize, usize)>,
}

impl<'a> NlpAdapter<'a> {
    pub fn new(graph: &'a ProblemGraph) -> Self {
        let layout = graph.layout();

        let mut jac_structure = Vec::new();
        let mut hess_structure = Vec::new();
        let mut jac_spans = Vec::with_capacity(graph.num_edges());
        let mut hess_spans = Vec::with_capacity(graph.num_edges());

        for (id, edge) in graph.edges() {
            let cols: Vec<I> = edge
                .vars
                .iter()
                .map(|&(node, var)| layout.node_cols[node.0] + var)
                .collect();
            let row_base = layout.edge_rows[id.0];

            let offset = jac_structure.len();
            for (r, slot) in edge.model.jacobian_structure() {
                jac_structure.push((row_base + r, cols[slot]));
            }
            jac_spans.push((offset, jac_structure.len() - offset));

            let offset = hess_structure.len();
            for (a, b) in edge.model.hessian_structure() {
                let (ga, gb) = (cols[a], cols[b]);
                // Keep the global entry in the lower triangle.
                if ga >= gb {
                    hess_structure.push((ga, gb));
                } else {
                    hess_structure.push((gb, ga));
                }
            }
            hess_spans.push((offset, hess_structure.len() - offset));
        }

        Self {
            graph,
            layout,
            jac_structure,
            hess_structure,
            jac_spans,
            hess_spans,
        }
    }

    pub fn layout(&self) -> &KktLayout {
        &self.layout
    }

    pub fn n_var(&self) -> usize {
        self.layout.n_cols
    }

    pub fn n_cons(&self) -> usize {
        self.layout.n_rows
    }

    /// Starting primal point: the user start where given, otherwise zero
    /// clamped into the variable bounds.
    pub fn primal_start(&self) -> Col<E> {
        let (lower, upper) = self.variable_bounds();
        let mut x = Col::<E>::zeros(self.n_var());
        for (id, node) in self.graph.nodes() {
            if let Some(start) = &node.start {
                let base = self.layout.node_cols[id.0];
                for (v, &s) in start.iter().enumerate() {
                    x[base + v] = s;
                }
            }
        }
        cwise_clamp(x.as_ref(), lower.as_ref(), upper.as_ref())
    }

    /// Starting constraint multipliers: the user start where given,
    /// otherwise zero. Equality rows are sign-flipped into the solver's
    /// convention.
    pub fn dual_start(&self) -> Col<E> {
        let mut y = Col::<E>::zeros(self.n_cons());
        for (id, edge) in self.graph.edges() {
            let base = self.layout.edge_rows[id.0];
            if let Some(start) = &edge.dual_start {
                let flip = equality_flip(edge);
                for (r, &s) in start.iter().enumerate() {
                    y[base + r] = flip[r] * s;
                }
            }
        }
        y
    }

    /// Starting bound multipliers, split from the nodes' reduced-cost
    /// starts: the positive part belongs to the lower bound, the flipped
    /// negative part to the upper.
    pub fn bound_dual_start(&self) -> (Col<E>, Col<E>) {
        let mut rc = Col::<E>::zeros(self.n_var());
        for (id, node) in self.graph.nodes() {
            if let Some(start) = &node.reduced_cost_start {
                let base = self.layout.node_cols[id.0];
                for (v, &s) in start.iter().enumerate() {
                    rc[base + v] = s;
                }
            }
        }
        (
            cwise_positive_part(rc.as_ref()),
            cwise_negative_part(rc.as_ref()),
        )
    }

    pub fn variable_bounds(&self) -> (Col<E>, Col<E>) {
        let mut lower = Col::<E>::zeros(self.n_var());
        let mut upper = Col::<E>::zeros(self.n_var());
        for (id, node) in self.graph.nodes() {
            let base = self.layout.node_cols[id.0];
            for v in 0..node.n_var {
                lower[base + v] = node.lower[v];
                upper[base + v] = node.upper[v];
            }
        }
        (lower, upper)
    }

    pub fn constraint_bounds(&self) -> (Col<E>, Col<E>) {
        let mut lower = Col::<E>::zeros(self.n_cons());
        let mut upper = Col::<E>::zeros(self.n_cons());
        for (id, edge) in self.graph.edges() {
            let base = self.layout.edge_rows[id.0];
            for r in 0..edge.n_cons() {
                lower[base + r] = edge.lower[r];
                upper[base + r] = edge.upper[r];
            }
        }
        (lower, upper)
    }

    pub fn objective(&self, x: &Col<E>) -> E {
        let mut total = 0.0;
        for (id, edge) in self.graph.edges() {
            let local = self.gather(id.0, x);
            total += edge.model.objective(&local);
        }
        total
    }

    pub fn gradient(&self, x: &Col<E>) -> Col<E> {
        let mut grad = Col::<E>::zeros(self.n_var());
        for (id, edge) in self.graph.edges() {
            let local = self.gather(id.0, x);
            let mut local_grad = vec![0.0; edge.vars.len()];
            edge.model.gradient(&local, &mut local_grad);
            for (slot, &(node, var)) in edge.vars.iter().enumerate() {
                grad[self.layout.node_cols[node.0] + var] += local_grad[slot];
            }
        }
        grad
    }

    pub fn constraints(&self, x: &Col<E>) -> Col<E> {
        let mut g = Col::<E>::zeros(self.n_cons());
        for (id, edge) in self.graph.edges() {
            let local = self.gather(id.0, x);
            let base = self.layout.edge_rows[id.0];
            let mut rows = vec![0.0; edge.n_cons()];
            edge.model.constraints(&local, &mut rows);
            for (r, &v) in rows.iter().enumerate() {
                g[base + r] = v;
            }
        }
        g
    }

    /// Global Jacobian coordinates, enumerated once at construction.
    pub fn jacobian_structure(&self) -> &[(I, I)] {
        &self.jac_structure
    }

    /// Jacobian values in the order of `jacobian_structure`.
    pub fn jacobian_values(&self, x: &Col<E>, vals: &mut [E]) {
        debug_assert_eq!(vals.len(), self.jac_structure.len());
        for (id, edge) in self.graph.edges() {
            let local = self.gather(id.0, x);
            let (offset, len) = self.jac_spans[id.0];
            edge.model
                .jacobian_values(&local, &mut vals[offset..offset + len]);
        }
    }

    /// Global lower-triangle Hessian coordinates, enumerated once.
    pub fn hessian_structure(&self) -> &[(I, I)] {
        &self.hess_structure
    }

    /// Hessian values in the order of `hessian_structure`, scaled by
    /// `obj_factor` for the objective part and weighted by the row
    /// multipliers for the constraint part.
    pub fn hessian_values(&self, x: &Col<E>, y: &Col<E>, obj_factor: E, vals: &mut [E]) {
        debug_assert_eq!(vals.len(), self.hess_structure.len());
        for (id, edge) in self.graph.edges() {
            let local = self.gather(id.0, x);
            let base = self.layout.edge_rows[id.0];
            let local_y: Vec<E> = (0..edge.n_cons()).map(|r| y[base + r]).collect();
            let (offset, len) = self.hess_spans[id.0];
            edge.model.hessian_values(
                &local,
                &local_y,
                obj_factor,
                &mut vals[offset..offset + len],
            );
        }
    }

    fn gather(&self, edge: usize, x: &Col<E>) -> Vec<E> {
        self.graph
            .edge(crate::graph::EdgeId(edge))
            .vars
            .iter()
            .map(|&(node, var)| x[self.layout.node_cols[node.0] + var])
            .collect()
    }
}

/// Per-row sign applied to a user dual start: equality rows are flipped to
/// the solver's convention, inequality rows pass through.
fn equality_flip(edge: &Edge) -> Vec<E> {
    (0..edge.n_cons())
        .map(|r| if edge.is_equality(r) { -1.0 } else { 1.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::LinearEdge;

    fn graph() -> ProblemGraph {
        let mut graph = ProblemGraph::new();
        let a = graph.add_node(ProblemGraph::ROOT, vec![1.0, -2.0], vec![3.0, -1.0]);
        let b = graph.add_node(ProblemGraph::ROOT, vec![-1.0], vec![1.0]);
        graph.set_start(a, vec![2.0, -5.0]);

        // Equality row over a, inequality row coupling a and b.
        graph
            .add_edge(
                ProblemGraph::ROOT,
                vec![(a, 0), (a, 1)],
                Box::new(LinearEdge::new(vec![vec![(0, 1.0), (1, 2.0)]])),
                vec![1.0],
                vec![1.0],
            )
            .unwrap();
        let linking = graph
            .add_edge(
                ProblemGraph::ROOT,
                vec![(a, 1), (b, 0)],
                Box::new(LinearEdge::new(vec![vec![(0, 1.0), (1, -1.0)]])),
                vec![0.0],
                vec![2.0],
            )
            .unwrap();
        graph.set_dual_start(linking, vec![0.5]);
        graph.set_dual_start(crate::graph::EdgeId(0), vec![1.0]);
        graph
    }

    #[test]
    fn test_primal_start_clamps_into_bounds() {
        let graph = graph();
        let adapter = NlpAdapter::new(&graph);
        let x = adapter.primal_start();
        // User start (2, −5) clamps to (2, −2); b has no start, 0 clamps to 0.
        assert_eq!(x[0], 2.0);
        assert_eq!(x[1], -2.0);
        assert_eq!(x[2], 0.0);
    }

    #[test]
    fn test_dual_start_flips_equalities() {
        let graph = graph();
        let adapter = NlpAdapter::new(&graph);
        let y = adapter.dual_start();
        assert_eq!(y[0], -1.0);
        assert_eq!(y[1], 0.5);
    }

    #[test]
    fn test_structures_enumerated_globally() {
        let graph = graph();
        let adapter = NlpAdapter::new(&graph);
        assert_eq!(
            adapter.jacobian_structure(),
            &[(0, 0), (0, 1), (1, 1), (1, 2)]
        );

        let x = adapter.primal_start();
        let mut vals = vec![0.0; adapter.jacobian_structure().len()];
        adapter.jacobian_values(&x, &mut vals);
        assert_eq!(vals, vec![1.0, 2.0, 1.0, -1.0]);

        // g(x) at the clamped start.
        let g = adapter.constraints(&x);
        assert_eq!(g[0], 2.0 + 2.0 * -2.0);
        assert_eq!(g[1], -2.0 - 0.0);
    }

    /// `f = ½(x₀² + x₁²)`, one constraint `x₀ x₁`.
    struct BilinearEdge;

    impl crate::graph::EdgeModel for BilinearEdge {
        fn n_cons(&self) -> usize {
            1
        }

        fn objective(&self, x: &[E]) -> E {
            0.5 * (x[0] * x[0] + x[1] * x[1])
        }

        fn gradient(&self, x: &[E], grad: &mut [E]) {
            grad[0] += x[0];
            grad[1] += x[1];
        }

        fn constraints(&self, x: &[E], g: &mut [E]) {
            g[0] = x[0] * x[1];
        }

        fn jacobian_structure(&self) -> Vec<(I, I)> {
            vec![(0, 0), (0, 1)]
        }

        fn jacobian_values(&self, x: &[E], vals: &mut [E]) {
            vals[0] = x[1];
            vals[1] = x[0];
        }

        fn hessian_structure(&self) -> Vec<(I, I)> {
            vec![(0, 0), (1, 1), (1, 0)]
        }

        fn hessian_values(&self, _x: &[E], y: &[E], obj_factor: E, vals: &mut [E]) {
            vals[0] = obj_factor;
            vals[1] = obj_factor;
            vals[2] = y[0];
        }
    }

    #[test]
    fn test_nonlinear_edge_dispatch() {
        let mut graph = ProblemGraph::new();
        let node = graph.add_node(ProblemGraph::ROOT, vec![-10.0; 2], vec![10.0; 2]);
        graph.set_start(node, vec![3.0, 2.0]);
        graph
            .add_edge(
                ProblemGraph::ROOT,
                vec![(node, 0), (node, 1)],
                Box::new(BilinearEdge),
                vec![6.0],
                vec![6.0],
            )
            .unwrap();

        let adapter = NlpAdapter::new(&graph);
        let x = adapter.primal_start();
        assert_eq!(adapter.objective(&x), 6.5);

        let grad = adapter.gradient(&x);
        assert_eq!(grad[0], 3.0);
        assert_eq!(grad[1], 2.0);

        assert_eq!(adapter.constraints(&x)[0], 6.0);

        assert_eq!(adapter.hessian_structure(), &[(0, 0), (1, 1), (1, 0)]);
        let y = adapter.dual_start();
        let mut hess = vec![0.0; 3];
        adapter.hessian_values(&x, &y, 1.0, &mut hess);
        assert_eq!(hess, vec![1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_bound_dual_split() {
        let mut graph = ProblemGraph::new();
        let a = graph.add_node(ProblemGraph::ROOT, vec![0.0; 2], vec![1.0; 2]);
        graph.set_reduced_cost_start(a, vec![0.75, -0.25]);
        let adapter = NlpAdapter::new(&graph);
        let (z_l, z_u) = adapter.bound_dual_start();
        assert_eq!(z_l[0], 0.75);
        assert_eq!(z_u[0], 0.0);
        assert_eq!(z_l[1], 0.0);
        assert_eq!(z_u[1], 0.25);
    }
}
