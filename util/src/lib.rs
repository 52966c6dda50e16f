use nalgebra::{DMatrix, Matrix2};

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Connectivity of a chain of two-node elements `[i, i + 1]`.
pub fn line_connectivity(num_elements: usize) -> Vec<Vec<usize>> {
    (0..num_elements).map(|i| vec![i, i + 1]).collect()
}

/// Connectivity of a structured grid of four-node quadrilaterals over
/// `(cells_x + 1) * (cells_y + 1)` nodes, numbered row by row.
pub fn quad_grid_connectivity(cells_x: usize, cells_y: usize) -> Vec<Vec<usize>> {
    let stride = cells_x + 1;
    let mut connectivity = Vec::with_capacity(cells_x * cells_y);
    for j in 0..cells_y {
        for i in 0..cells_x {
            let v0 = j * stride + i;
            connectivity.push(vec![v0, v0 + 1, v0 + stride + 1, v0 + stride]);
        }
    }
    connectivity
}

/// Stiffness matrix of a single spring with the given stiffness.
pub fn spring_matrix(stiffness: f64) -> Matrix2<f64> {
    Matrix2::new(stiffness, -stiffness, -stiffness, stiffness)
}

/// The dense matrix obtained by assembling unit springs along a line of `num_nodes` nodes.
pub fn dense_spring_chain(num_nodes: usize) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(num_nodes, num_nodes);
    for i in 0..num_nodes.saturating_sub(1) {
        let block = spring_matrix(1.0);
        for a in 0..2 {
            for b in 0..2 {
                matrix[(i + a, i + b)] += block[(a, b)];
            }
        }
    }
    matrix
}

/// Prefix sum of `counts`, starting from `x0`. Yields one more item than `counts`.
pub fn prefix_sum(counts: impl IntoIterator<Item = usize>, x0: usize) -> impl Iterator<Item = usize> {
    std::iter::once(x0).chain(counts.into_iter().scan(x0, |sum, x| {
        *sum += x;
        Some(*sum)
    }))
}
