use crate::partition::Partition;
use crate::space::Topology;
use fenris_nested_vec::NestedVec;

/// Where elements are evaluated in a process group.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ElementOwnership {
    Partitioned(Partition),
    Explicit(Vec<usize>),
}

/// Index-based element connectivity with precomputed node-to-element incidence.
///
/// Every member of a process group holds the full connectivity, so that incidence queries
/// for owned rows also see elements evaluated by other members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementMesh {
    num_nodes: usize,
    element_nodes: NestedVec<usize>,
    node_elements: NestedVec<usize>,
    ownership: ElementOwnership,
}

impl ElementMesh {
    /// Construct a mesh from element connectivity, with all elements owned by a single member.
    ///
    /// Panics if a connectivity refers to a node index `>= num_nodes`.
    pub fn from_connectivity(num_nodes: usize, connectivity: &[Vec<usize>]) -> Self {
        let mut element_nodes = NestedVec::new();
        for nodes in connectivity {
            element_nodes.push(nodes);
        }
        let node_elements = compute_node_elements(num_nodes, &element_nodes);
        Self {
            num_nodes,
            ownership: ElementOwnership::Partitioned(Partition::serial(element_nodes.len())),
            element_nodes,
            node_elements,
        }
    }

    /// Distributes element evaluation in contiguous blocks of element indices.
    pub fn with_element_partition(mut self, partition: Partition) -> Self {
        assert_eq!(
            partition.total(),
            self.element_nodes.len(),
            "Element partition must cover all elements"
        );
        self.ownership = ElementOwnership::Partitioned(partition);
        self
    }

    /// Assigns an explicit owner to every element.
    pub fn with_element_owners(mut self, owners: Vec<usize>) -> Self {
        assert_eq!(owners.len(), self.element_nodes.len(), "One owner per element is required");
        self.ownership = ElementOwnership::Explicit(owners);
        self
    }

    pub fn connectivity(&self) -> &NestedVec<usize> {
        &self.element_nodes
    }
}

fn compute_node_elements(num_nodes: usize, element_nodes: &NestedVec<usize>) -> NestedVec<usize> {
    let mut incidence = vec![Vec::new(); num_nodes];
    for (element_index, nodes) in element_nodes.iter().enumerate() {
        for &node in nodes {
            assert!(node < num_nodes, "Element {} refers to node {} out of bounds", element_index, node);
            let elements: &mut Vec<usize> = &mut incidence[node];
            // An element may list a node more than once
            if elements.last() != Some(&element_index) {
                elements.push(element_index);
            }
        }
    }
    NestedVec::from(incidence)
}

impl Topology for ElementMesh {
    fn num_elements(&self) -> usize {
        self.element_nodes.len()
    }

    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn element_node_count(&self, element_index: usize) -> usize {
        self.element_nodes
            .get(element_index)
            .expect("Element index out of bounds")
            .len()
    }

    fn populate_element_nodes(&self, output: &mut [usize], element_index: usize) {
        output.copy_from_slice(
            self.element_nodes
                .get(element_index)
                .expect("Element index out of bounds"),
        );
    }

    fn node_elements(&self, node_index: usize) -> &[usize] {
        self.node_elements
            .get(node_index)
            .expect("Node index out of bounds")
    }

    fn element_owner(&self, element_index: usize) -> usize {
        match &self.ownership {
            ElementOwnership::Partitioned(partition) => partition.owner(element_index),
            ElementOwnership::Explicit(owners) => owners[element_index],
        }
    }
}
