//! End-to-end scenarios over the full Schur solver.

use faer::sparse::{SparseColMat, Triplet};

use crate::graph::{LinearEdge, ProblemGraph};
use crate::linalg::solver::Inertia;
use crate::schur::options::SchurOptions;
use crate::schur::{KktSolver, MatrixFormat, SchurError, SchurSolver};
use crate::tests::fixtures::{random_partitioned, random_rhs, relative_residual};
use crate::{derive_partition, E, I};

/// Two decoupled diagonal partitions and an empty border: the solve reduces
/// to independent block solves.
#[test]
fn test_diagonal_blocks_without_border() {
    let triplets = vec![
        Triplet::new(0, 0, 2.0),
        Triplet::new(1, 1, 3.0),
        Triplet::new(2, 2, 2.0),
        Triplet::new(3, 3, 3.0),
    ];
    let mat = SparseColMat::try_new_from_triplets(4, 4, &triplets).unwrap();

    let mut solver = SchurSolver::new(&mat, SchurOptions::new(vec![1, 1, 2, 2])).unwrap();
    assert_eq!(solver.border_dim(), 0);
    solver.factorize(&mat).unwrap();

    let mut x = vec![1.0; 4];
    solver.solve_in_place(&mut x).unwrap();

    let expected = [0.5, 1.0 / 3.0, 0.5, 1.0 / 3.0];
    for (got, want) in x.iter().zip(expected) {
        assert!((got - want).abs() < 1e-14);
    }
}

fn bordered_3x3(diag: [E; 3]) -> SparseColMat<I, E> {
    let triplets = vec![
        Triplet::new(0, 0, diag[0]),
        Triplet::new(2, 0, 1.0),
        Triplet::new(1, 1, diag[1]),
        Triplet::new(2, 1, 1.0),
        Triplet::new(2, 2, diag[2]),
    ];
    SparseColMat::try_new_from_triplets(3, 3, &triplets).unwrap()
}

/// Single border row between two 1x1 partitions.
#[test]
fn test_single_border_row() {
    let mat = bordered_3x3([2.0, 2.0, 2.0]);
    let mut solver = SchurSolver::new(&mat, SchurOptions::new(vec![1, 2, 0])).unwrap();
    assert_eq!(solver.border_dim(), 1);
    solver.factorize(&mat).unwrap();

    let mut x = vec![1.0, 1.0, 1.0];
    solver.solve_in_place(&mut x).unwrap();

    assert!((x[0] - 0.5).abs() < 1e-14);
    assert!((x[1] - 0.5).abs() < 1e-14);
    assert!(x[2].abs() < 1e-14);
}

/// Indefinite variant of the bordered system; the inertia must match the
/// dense reference.
#[test]
fn test_indefinite_inertia() {
    let mat = bordered_3x3([2.0, 2.0, -4.0]);
    let mut solver = SchurSolver::new(&mat, SchurOptions::new(vec![1, 2, 0])).unwrap();
    solver.factorize(&mat).unwrap();

    assert!(solver.is_inertia());
    assert_eq!(solver.inertia(), Ok(Inertia::new(2, 0, 1)));

    let dense = crate::tests::fixtures::dense_from_lower(&mat);
    let reference = crate::linalg::dense::symmetric_inertia(dense.as_ref()).unwrap();
    assert_eq!(solver.inertia(), Ok(reference));
}

/// Four partitions coupled by one root linking edge that references two
/// columns of each: exactly those eight columns land on the border.
#[test]
fn test_linking_edge_partition_derivation() {
    let mut graph = ProblemGraph::new();
    let nodes: Vec<_> = (0..4)
        .map(|_| graph.add_node(ProblemGraph::ROOT, vec![0.0; 3], vec![1.0; 3]))
        .collect();
    for &node in &nodes {
        graph
            .add_edge(
                ProblemGraph::ROOT,
                vec![(node, 0), (node, 1), (node, 2)],
                Box::new(LinearEdge::new(vec![vec![(0, 1.0), (1, 1.0), (2, 1.0)]])),
                vec![1.0],
                vec![1.0],
            )
            .unwrap();
    }
    let linking_vars: Vec<_> = nodes.iter().flat_map(|&n| [(n, 0), (n, 1)]).collect();
    let coeffs: Vec<(usize, E)> = (0..8).map(|s| (s, 1.0)).collect();
    graph
        .add_edge(
            ProblemGraph::ROOT,
            linking_vars,
            Box::new(LinearEdge::new(vec![coeffs])),
            vec![0.0],
            vec![0.0],
        )
        .unwrap();

    let layout = graph.layout();
    let partition = derive_partition(&graph, &layout).unwrap();

    for (k, &node) in nodes.iter().enumerate() {
        let base = layout.node_cols[node.0];
        // The two referenced columns are promoted to the border.
        assert_eq!(partition[base], 0);
        assert_eq!(partition[base + 1], 0);
        // The third stays with its node's partition.
        assert_eq!(partition[base + 2], k + 1);
        // The self-edge row follows the node.
        assert_eq!(partition[layout.row_index(k)], k + 1);
    }
    // The linking row itself is on the border.
    assert_eq!(partition[layout.row_index(4)], 0);
}

/// A singular block fails the factorization with the block error, and the
/// solver recovers once the values are fixed.
#[test]
fn test_singular_block_reported_and_recoverable() {
    let triplets = |d: E| {
        vec![
            Triplet::new(0, 0, 2.0),
            Triplet::new(1, 0, -1.0),
            Triplet::new(1, 1, 2.0),
            Triplet::new(2, 2, 1.0),
            Triplet::new(3, 2, 1.0),
            Triplet::new(3, 3, d),
            Triplet::new(4, 0, 0.5),
            Triplet::new(4, 2, 0.5),
            Triplet::new(4, 4, 3.0),
        ]
    };
    // Second block is [[1, 1], [1, 1]]: rank one.
    let singular = SparseColMat::try_new_from_triplets(5, 5, &triplets(1.0)).unwrap();
    let options = SchurOptions::new(vec![1, 1, 2, 2, 0]);
    let mut solver = SchurSolver::new(&singular, options).unwrap();

    assert_eq!(solver.factorize(&singular), Err(SchurError::BlockSingular));
    let mut rhs = vec![1.0; 5];
    assert_eq!(
        solver.solve_in_place(&mut rhs),
        Err(SchurError::Uninitialized)
    );

    // Same pattern, nonsingular values.
    let fixed = SparseColMat::try_new_from_triplets(5, 5, &triplets(2.0)).unwrap();
    solver.factorize(&fixed).unwrap();
    let b = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let mut x = b.clone();
    solver.solve_in_place(&mut x).unwrap();
    assert!(relative_residual(&fixed, &x, &b) < 1e-12);
}

/// The optimizer-facing interface drives the solver as a trait object.
#[test]
fn test_optimizer_facing_interface() {
    let (mat, partition) = random_partitioned(3, 10, 4, 13);
    let mut solver = SchurSolver::new(&mat, SchurOptions::new(partition)).unwrap();
    let solver: &mut dyn KktSolver = &mut solver;

    assert_eq!(solver.input_type(), MatrixFormat::Csc);
    solver.factorize(&mat).unwrap();

    let b = random_rhs(mat.ncols(), 14);
    let mut x = b.clone();
    solver.solve(&mat, &mut x).unwrap();
    assert!(relative_residual(&mat, &x, &b) < 1e-8);

    assert!(solver.is_inertia());
    let inertia = solver.inertia().unwrap();
    assert_eq!(
        inertia.positive + inertia.zero + inertia.negative,
        mat.ncols()
    );

    assert!(solver.improve());
    assert!(solver.introduce().contains("Schur-complement"));
}

/// The same system solved under differently sized thread pools gives the
/// same answer.
#[test]
fn test_thread_count_invariance() {
    let (mat, partition) = random_partitioned(4, 40, 8, 7);
    let b = random_rhs(mat.ncols(), 11);

    let mut results: Vec<Vec<E>> = Vec::new();
    for num_threads in [1, 2, 8] {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .unwrap();
        let x = pool.install(|| {
            let mut solver =
                SchurSolver::new(&mat, SchurOptions::new(partition.clone())).unwrap();
            solver.factorize(&mat).unwrap();
            let mut x = b.clone();
            solver.solve_in_place(&mut x).unwrap();
            x
        });
        assert!(relative_residual(&mat, &x, &b) < 1e-8);
        results.push(x);
    }

    for x in &results[1..] {
        let max_diff = x
            .iter()
            .zip(&results[0])
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, E::max);
        assert!(max_diff < 1e-12);
    }
}
