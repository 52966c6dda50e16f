use crate::partition::Partition;
use crate::space::{FunctionSpace, Topology};
use nalgebra::Scalar;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// A function space with a fixed number of dofs at every node of a mesh.
///
/// By default, dof `d` of node `n` has equation number `dofs_per_node * n + d` and all
/// equations are owned by a single member. Both can be overridden, e.g. to share a
/// numbering produced by a mesh partitioner.
#[derive(Clone)]
pub struct NodalFunctionSpace<T: Scalar> {
    topology: Arc<dyn Topology + Send + Sync>,
    dofs_per_node: usize,
    equation_numbers: Option<Vec<usize>>,
    partition: Partition,
    constraints: FxHashMap<usize, T>,
}

impl<T: Scalar> std::fmt::Debug for NodalFunctionSpace<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodalFunctionSpace")
            .field("num_nodes", &self.topology.num_nodes())
            .field("num_elements", &self.topology.num_elements())
            .field("dofs_per_node", &self.dofs_per_node)
            .field("partition", &self.partition)
            .field("num_constraints", &self.constraints.len())
            .finish()
    }
}

impl<T: Scalar> NodalFunctionSpace<T> {
    pub fn new(topology: Arc<dyn Topology + Send + Sync>, dofs_per_node: usize) -> Self {
        assert!(dofs_per_node > 0, "A function space needs at least one dof per node");
        let num_equations = dofs_per_node * topology.num_nodes();
        Self {
            topology,
            dofs_per_node,
            equation_numbers: None,
            partition: Partition::serial(num_equations),
            constraints: FxHashMap::default(),
        }
    }

    /// Distributes ownership of equations among the members of a process group.
    pub fn with_partition(mut self, partition: Partition) -> Self {
        assert_eq!(
            partition.total(),
            self.num_equations(),
            "Partition must cover all equations of the function space"
        );
        self.partition = partition;
        self
    }

    /// Replaces the default numbering.
    ///
    /// `numbers[dofs_per_node * n + d]` is the equation number of dof `d` of node `n`. The
    /// numbers must be a permutation of `0 .. num_equations`, and must be set before any
    /// constraint.
    pub fn with_equation_numbers(mut self, numbers: Vec<usize>) -> Self {
        assert_eq!(numbers.len(), self.num_equations(), "One equation number per dof is required");
        assert!(self.constraints.is_empty(), "Equation numbers must be set before constraints");
        let mut seen = vec![false; numbers.len()];
        for &eq in &numbers {
            assert!(
                eq < seen.len() && !seen[eq],
                "Equation numbers must be a permutation, found {} twice or out of bounds",
                eq
            );
            seen[eq] = true;
        }
        self.equation_numbers = Some(numbers);
        self
    }

    /// Prescribes `value` for dof `dof` of node `node`.
    pub fn with_constraint(mut self, node: usize, dof: usize, value: T) -> Self {
        let eq = self.equation_number(node, dof);
        self.constraints.insert(eq, value);
        self
    }

    pub fn constrained_equation_count(&self) -> usize {
        self.constraints.len()
    }
}

impl<T: Scalar> FunctionSpace<T> for NodalFunctionSpace<T> {
    fn topology(&self) -> &dyn Topology {
        self.topology.as_ref()
    }

    fn dofs_per_node(&self) -> usize {
        self.dofs_per_node
    }

    fn equation_number(&self, node_index: usize, dof: usize) -> usize {
        assert!(dof < self.dofs_per_node, "Dof {} out of bounds", dof);
        let slot = self.dofs_per_node * node_index + dof;
        match &self.equation_numbers {
            Some(numbers) => numbers[slot],
            None => slot,
        }
    }

    fn num_equations(&self) -> usize {
        self.dofs_per_node * self.topology.num_nodes()
    }

    fn partition(&self) -> &Partition {
        &self.partition
    }

    fn constraint(&self, equation: usize) -> Option<T> {
        self.constraints.get(&equation).cloned()
    }
}
