use crate::backend::DistributedVector;
use crate::comm::ProcessGroup;
use crate::partition::Partition;
use nalgebra::{DVector, RealField, Scalar};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StashOp {
    Add,
    Set,
}

/// A distributed vector storing its owned entries in a `DVector`.
///
/// Writes to entries owned by other members are stashed in order and applied by their owner
/// during [`finalize`](DistributedVector::finalize), in the rank order of the senders.
#[derive(Debug, Clone)]
pub struct StashedVector<T: Scalar, G> {
    group: G,
    partition: Partition,
    local: DVector<T>,
    stash: Vec<(usize, T, StashOp)>,
}

impl<T: RealField, G: ProcessGroup> StashedVector<T, G> {
    pub fn zeros(group: G, partition: Partition) -> Self {
        assert_eq!(
            partition.num_members(),
            group.size(),
            "Partition must have one range per member of the group"
        );
        let local = DVector::zeros(partition.local_len(group.rank()));
        Self {
            group,
            partition,
            local,
            stash: Vec::new(),
        }
    }

    /// The owned entries, indexed from the start of the owned range.
    pub fn local_values(&self) -> &DVector<T> {
        &self.local
    }

    pub fn local_values_mut(&mut self) -> &mut DVector<T> {
        &mut self.local
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Collective: the full vector, assembled from the entries of all members.
    pub fn gather(&self) -> DVector<T> {
        let start = self.range().start;
        let entries: Vec<(usize, T)> = self
            .local
            .iter()
            .enumerate()
            .map(|(i, v)| (start + i, v.clone()))
            .collect();
        let incoming = self.group.exchange(vec![entries; self.group.size()]);
        let mut full = DVector::zeros(self.partition.total());
        for (i, v) in incoming.into_iter().flatten() {
            full[i] = v;
        }
        full
    }

    fn apply(&mut self, index: usize, value: T, op: StashOp) {
        let start = self.range().start;
        let entry = &mut self.local[index - start];
        match op {
            StashOp::Add => *entry += value,
            StashOp::Set => *entry = value,
        }
    }

    fn write(&mut self, index: usize, value: T, op: StashOp) {
        if self.range().contains(&index) {
            self.apply(index, value, op);
        } else {
            assert!(index < self.partition.total(), "Index {} out of bounds", index);
            self.stash.push((index, value, op));
        }
    }
}

impl<T: RealField, G: ProcessGroup> DistributedVector<T> for StashedVector<T, G> {
    fn range(&self) -> Range<usize> {
        self.partition.range(self.group.rank())
    }

    fn add_value(&mut self, index: usize, value: T) {
        self.write(index, value, StashOp::Add);
    }

    fn set_value(&mut self, index: usize, value: T) {
        self.write(index, value, StashOp::Set);
    }

    fn finalize(&mut self) -> eyre::Result<()> {
        let mut outgoing = vec![Vec::new(); self.group.size()];
        for (index, value, op) in self.stash.drain(..) {
            outgoing[self.partition.owner(index)].push((index, value, op));
        }
        let incoming = self.group.exchange(outgoing);
        for (index, value, op) in incoming.into_iter().flatten() {
            self.apply(index, value, op);
        }
        Ok(())
    }

    fn get(&self, index: usize) -> Option<T> {
        let range = self.range();
        range
            .contains(&index)
            .then(|| self.local[index - range.start].clone())
    }
}
