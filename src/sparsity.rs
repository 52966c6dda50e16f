//! Prediction of the nonzero structure of a stiffness matrix from mesh connectivity.
//!
//! For every owned row, the columns that may receive a contribution are the equations of all
//! column-space nodes of all elements incident to the row's node. Columns are classified as
//! *diagonal* when owned by the same member of the process group as the row, and
//! *off-diagonal* otherwise, which is the split distributed sparse matrix libraries use for
//! preallocation.
use crate::error::AssemblyError;
use crate::partition::Partition;
use crate::space::FunctionSpace;
use eyre::WrapErr;
use itertools::Itertools;
use log::debug;
use nalgebra::Scalar;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::ops::Range;

/// Nonzero structure of the rows owned by one member of a process group.
///
/// Both patterns have one row per owned row and use global column indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonZeroStructure {
    rank: usize,
    row_partition: Partition,
    column_partition: Partition,
    diagonal: SparsityPattern,
    off_diagonal: SparsityPattern,
}

impl NonZeroStructure {
    /// The member of the process group owning the described rows.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn row_partition(&self) -> &Partition {
        &self.row_partition
    }

    pub fn column_partition(&self) -> &Partition {
        &self.column_partition
    }

    /// The global rows owned by this member.
    pub fn row_range(&self) -> Range<usize> {
        self.row_partition.range(self.rank)
    }

    /// The global columns owned by this member.
    pub fn column_range(&self) -> Range<usize> {
        self.column_partition.range(self.rank)
    }

    pub fn local_row_count(&self) -> usize {
        self.row_partition.local_len(self.rank)
    }

    pub fn local_column_count(&self) -> usize {
        self.column_partition.local_len(self.rank)
    }

    pub fn num_global_rows(&self) -> usize {
        self.row_partition.total()
    }

    pub fn num_global_columns(&self) -> usize {
        self.column_partition.total()
    }

    pub fn diagonal_pattern(&self) -> &SparsityPattern {
        &self.diagonal
    }

    pub fn off_diagonal_pattern(&self) -> &SparsityPattern {
        &self.off_diagonal
    }

    /// Number of diagonal nonzeros for each owned row.
    pub fn diagonal_counts(&self) -> Vec<usize> {
        lane_counts(&self.diagonal)
    }

    /// Number of off-diagonal nonzeros for each owned row.
    pub fn off_diagonal_counts(&self) -> Vec<usize> {
        lane_counts(&self.off_diagonal)
    }

    pub fn diagonal_nonzero_count(&self) -> usize {
        self.diagonal.nnz()
    }

    pub fn off_diagonal_nonzero_count(&self) -> usize {
        self.off_diagonal.nnz()
    }

    pub fn nonzero_count(&self) -> usize {
        self.diagonal.nnz() + self.off_diagonal.nnz()
    }

    /// Sorted global columns of the owned row with the given local index.
    pub fn row_columns(&self, local_row: usize) -> Vec<usize> {
        let diagonal = self.diagonal.lane(local_row);
        let off_diagonal = self.off_diagonal.lane(local_row);
        let mut columns = Vec::with_capacity(diagonal.len() + off_diagonal.len());
        columns.extend_from_slice(diagonal);
        columns.extend_from_slice(off_diagonal);
        columns.sort_unstable();
        columns
    }

    /// The union of the diagonal and off-diagonal patterns.
    pub fn combined_pattern(&self) -> SparsityPattern {
        let mut offsets = Vec::with_capacity(self.local_row_count() + 1);
        let mut indices = Vec::with_capacity(self.nonzero_count());
        offsets.push(0);
        for local_row in 0..self.local_row_count() {
            indices.extend(self.row_columns(local_row));
            offsets.push(indices.len());
        }
        SparsityPattern::try_from_offsets_and_indices(
            self.local_row_count(),
            self.num_global_columns(),
            offsets,
            indices,
        )
        .expect("Union of two valid patterns with disjoint columns is valid")
    }
}

fn lane_counts(pattern: &SparsityPattern) -> Vec<usize> {
    pattern
        .major_offsets()
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect()
}

/// Checks that a row and a column function space can be combined into one matrix.
///
/// Both spaces must be defined over the same elements and distributed over process groups of
/// the same size.
pub fn validate_spaces<T: Scalar>(
    row_space: &dyn FunctionSpace<T>,
    col_space: &dyn FunctionSpace<T>,
) -> Result<(), AssemblyError> {
    let row_elements = row_space.topology().num_elements();
    let col_elements = col_space.topology().num_elements();
    if row_elements != col_elements {
        return Err(AssemblyError::IncompatibleSpaces {
            reason: format!(
                "row space has {} elements but column space has {}",
                row_elements, col_elements
            ),
        });
    }

    let row_members = row_space.partition().num_members();
    let col_members = col_space.partition().num_members();
    if row_members != col_members {
        return Err(AssemblyError::IncompatibleSpaces {
            reason: format!(
                "row space is distributed over {} members but column space over {}",
                row_members, col_members
            ),
        });
    }

    if row_space.partition().total() != row_space.num_equations()
        || col_space.partition().total() != col_space.num_equations()
    {
        return Err(AssemblyError::IncompatibleSpaces {
            reason: "equation partition does not cover the equations of its space".to_string(),
        });
    }

    for element in 0..row_elements {
        let row_nodes = row_space.topology().element_node_count(element);
        let col_nodes = col_space.topology().element_node_count(element);
        if (row_nodes == 0) != (col_nodes == 0) {
            return Err(AssemblyError::IncompatibleSpaces {
                reason: format!(
                    "element {} has {} row nodes but {} column nodes",
                    element, row_nodes, col_nodes
                ),
            });
        }
    }

    Ok(())
}

/// Whether two spaces produce a square matrix with matching row and column ownership.
pub fn is_square<T: Scalar>(row_space: &dyn FunctionSpace<T>, col_space: &dyn FunctionSpace<T>) -> bool {
    row_space.num_equations() == col_space.num_equations() && row_space.partition() == col_space.partition()
}

/// Computes the nonzero structure of the rows owned by `rank`.
///
/// Rows without any incident element are an [`AssemblyError::EmptyRow`] unless
/// `allow_empty_rows` is set. In square systems such rows still store their diagonal entry,
/// so that boundary corrections can act on them.
pub fn compute_nonzero_structure<T: Scalar>(
    row_space: &(dyn FunctionSpace<T> + Sync),
    col_space: &(dyn FunctionSpace<T> + Sync),
    rank: usize,
    allow_empty_rows: bool,
) -> eyre::Result<NonZeroStructure> {
    validate_spaces(row_space, col_space)?;

    let row_range = row_space.partition().range(rank);
    let column_range = col_space.partition().range(rank);
    let row_topology = row_space.topology();
    let row_dofs = row_space.dofs_per_node();

    // Find the nodes carrying owned rows
    let mut row_node_dofs = Vec::new();
    for node in 0..row_topology.num_nodes() {
        for dof in 0..row_dofs {
            let eq = row_space.equation_number(node, dof);
            if row_range.contains(&eq) {
                row_node_dofs.push((node, eq));
            }
        }
    }

    // All owned rows of one node share their columns, so compute columns per node
    let row_nodes: Vec<usize> = row_node_dofs.iter().map(|&(node, _)| node).dedup().collect();
    let node_columns: Vec<(usize, Vec<usize>)> = row_nodes
        .par_iter()
        .with_min_len(64)
        .map(|&node| (node, node_column_equations(row_space, col_space, node)))
        .collect();

    let mut columns_of_row: Vec<Option<&[usize]>> = vec![None; row_range.len()];
    {
        let mut node_iter = node_columns.iter().peekable();
        for &(node, eq) in &row_node_dofs {
            while node_iter.peek().map_or(false, |(n, _)| *n != node) {
                node_iter.next();
            }
            let (_, columns) = node_iter
                .peek()
                .expect("Every row node has computed columns");
            columns_of_row[eq - row_range.start] = Some(columns.as_slice());
        }
    }

    let square = is_square(row_space, col_space);
    let total_entries: usize = columns_of_row
        .iter()
        .map(|columns| columns.map_or(1, |c| c.len()))
        .sum();

    let mut diag_offsets = try_vec_with_capacity(row_range.len() + 1, "diagonal nonzero offsets")?;
    let mut diag_indices = try_vec_with_capacity(total_entries, "diagonal nonzero indices")?;
    let mut off_offsets = try_vec_with_capacity(row_range.len() + 1, "off-diagonal nonzero offsets")?;
    let mut off_indices = try_vec_with_capacity(total_entries, "off-diagonal nonzero indices")?;
    diag_offsets.push(0);
    off_offsets.push(0);

    for (local_row, columns) in columns_of_row.iter().enumerate() {
        let row = row_range.start + local_row;
        match columns {
            Some(columns) if !columns.is_empty() => {
                for &col in *columns {
                    if column_range.contains(&col) {
                        diag_indices.push(col);
                    } else {
                        off_indices.push(col);
                    }
                }
            }
            _ => {
                if !allow_empty_rows {
                    return Err(AssemblyError::EmptyRow { row }.into());
                }
                if square {
                    diag_indices.push(row);
                }
            }
        }
        diag_offsets.push(diag_indices.len());
        off_offsets.push(off_indices.len());
    }

    let num_global_columns = col_space.num_equations();
    let local_rows = row_range.len();
    let diagonal =
        SparsityPattern::try_from_offsets_and_indices(local_rows, num_global_columns, diag_offsets, diag_indices)
            .wrap_err("diagonal nonzero pattern is malformed")?;
    let off_diagonal =
        SparsityPattern::try_from_offsets_and_indices(local_rows, num_global_columns, off_offsets, off_indices)
            .wrap_err("off-diagonal nonzero pattern is malformed")?;

    debug!(
        "Member {} owns rows {:?}: {} diagonal and {} off-diagonal nonzeros",
        rank,
        row_range,
        diagonal.nnz(),
        off_diagonal.nnz()
    );

    Ok(NonZeroStructure {
        rank,
        row_partition: row_space.partition().clone(),
        column_partition: col_space.partition().clone(),
        diagonal,
        off_diagonal,
    })
}

/// Sorted, unique column equations coupled to the given row-space node.
fn node_column_equations<T: Scalar>(
    row_space: &dyn FunctionSpace<T>,
    col_space: &dyn FunctionSpace<T>,
    row_node: usize,
) -> Vec<usize> {
    let col_topology = col_space.topology();
    let mut col_nodes = Vec::new();
    let mut element_nodes = Vec::new();
    for &element in row_space.topology().node_elements(row_node) {
        let count = col_topology.element_node_count(element);
        element_nodes.resize(count, 0);
        col_topology.populate_element_nodes(&mut element_nodes, element);
        col_nodes.extend_from_slice(&element_nodes);
    }
    // A node is reached through every element incident to the row node
    col_nodes.sort_unstable();
    col_nodes.dedup();

    let col_dofs = col_space.dofs_per_node();
    let mut equations = Vec::with_capacity(col_dofs * col_nodes.len());
    for node in col_nodes {
        for dof in 0..col_dofs {
            equations.push(col_space.equation_number(node, dof));
        }
    }
    // Custom numberings need not be monotone in the node index
    equations.sort_unstable();
    equations.dedup();
    equations
}

fn try_vec_with_capacity(capacity: usize, what: &str) -> Result<Vec<usize>, AssemblyError> {
    let mut v = Vec::new();
    v.try_reserve_exact(capacity)
        .map_err(|_| AssemblyError::Allocation { what: what.to_string() })?;
    Ok(v)
}

/// Computes the full (global) pattern of a matrix by visiting every element.
///
/// This is the element-wise counterpart of [`compute_nonzero_structure`]: it collects every
/// (row, column) pair of every element equation map. Rows without elements are left empty.
/// It is mostly useful for checking distributed structures against a serial reference.
pub fn compute_element_pattern<T: Scalar>(
    row_space: &dyn FunctionSpace<T>,
    col_space: &dyn FunctionSpace<T>,
) -> SparsityPattern {
    // Collecting into a BTreeSet stores each entry exactly once, and yields them sorted
    let mut matrix_entries = BTreeSet::new();
    let mut row_equations = Vec::new();
    let mut col_equations = Vec::new();
    for element in 0..row_space.topology().num_elements() {
        row_space.populate_element_equations(&mut row_equations, element);
        col_space.populate_element_equations(&mut col_equations, element);
        for &i in &row_equations {
            for &j in &col_equations {
                matrix_entries.insert((i, j));
            }
        }
    }

    let num_rows = row_space.num_equations();
    let mut offsets = Vec::with_capacity(num_rows + 1);
    let mut column_indices = Vec::with_capacity(matrix_entries.len());

    offsets.push(0);
    for (i, j) in matrix_entries {
        while i + 1 > offsets.len() {
            // Reaching a new row. A loop is needed to handle consecutive empty rows
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < num_rows + 1 {
        offsets.push(column_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(num_rows, col_space.num_equations(), offsets, column_indices)
        .expect("Entries collected from a sorted set form a valid pattern")
}
