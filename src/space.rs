//! Mesh topology and function spaces consumed by the assembly.
//!
//! The traits in this module describe what assembly needs from a mesh and from the function
//! spaces defined on it. [`ElementMesh`] and [`NodalFunctionSpace`] are straightforward
//! implementations for meshes whose every node carries the same number of dofs.
use crate::partition::Partition;
use nalgebra::Scalar;

mod mesh;
mod nodal;

pub use mesh::*;
pub use nodal::*;

/// Element/node incidence of a mesh.
pub trait Topology {
    fn num_elements(&self) -> usize;

    fn num_nodes(&self) -> usize;

    fn element_node_count(&self, element_index: usize) -> usize;

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize);

    /// The elements incident to the given node.
    fn node_elements(&self, node_index: usize) -> &[usize];

    /// The member of the process group that evaluates the given element.
    fn element_owner(&self, element_index: usize) -> usize;
}

/// A function space mapping the nodes of a mesh to global equation numbers.
pub trait FunctionSpace<T: Scalar> {
    fn topology(&self) -> &dyn Topology;

    fn dofs_per_node(&self) -> usize;

    /// The global equation number of the given dof of the given node.
    fn equation_number(&self, node_index: usize, dof: usize) -> usize;

    /// The total number of equations across all members of the process group.
    fn num_equations(&self) -> usize;

    /// Ownership of equation numbers.
    fn partition(&self) -> &Partition;

    /// The prescribed value of a constrained equation, or `None` if it is free.
    fn constraint(&self, equation: usize) -> Option<T>;

    /// Writes the local-to-global equation map of an element into `output`.
    ///
    /// Equations are interleaved per node: `[n0 d0, n0 d1, ..., n1 d0, ...]`.
    fn populate_element_equations(&self, output: &mut Vec<usize>, element_index: usize) {
        let topology = self.topology();
        let node_count = topology.element_node_count(element_index);
        let dofs = self.dofs_per_node();
        let mut nodes = vec![0; node_count];
        topology.populate_element_nodes(&mut nodes, element_index);

        output.clear();
        for node in nodes {
            for dof in 0..dofs {
                output.push(self.equation_number(node, dof));
            }
        }
    }

    /// The number of equations in the element's equation map.
    fn element_equation_count(&self, element_index: usize) -> usize {
        self.dofs_per_node() * self.topology().element_node_count(element_index)
    }
}
