use crate::error::AssemblyError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Ownership of a contiguous index space (equations, elements) split among the members of a
/// process group.
///
/// Member `r` owns the half-open range `offsets[r] .. offsets[r + 1]`, so every index is owned
/// by exactly one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    offsets: Vec<usize>,
}

impl Partition {
    /// A partition where a single member owns all `n` indices.
    pub fn serial(n: usize) -> Self {
        Self { offsets: vec![0, n] }
    }

    /// Splits `n` indices into `size` contiguous blocks of near-equal length.
    ///
    /// The first `n % size` members receive one index more than the rest.
    pub fn uniform(n: usize, size: usize) -> Self {
        assert!(size > 0, "A partition needs at least one member");
        let base = n / size;
        let remainder = n % size;
        let mut offsets = Vec::with_capacity(size + 1);
        offsets.push(0);
        for rank in 0..size {
            let len = base + usize::from(rank < remainder);
            offsets.push(offsets[rank] + len);
        }
        Self { offsets }
    }

    pub fn try_from_offsets(offsets: Vec<usize>) -> Result<Self, AssemblyError> {
        if offsets.len() < 2 {
            return Err(AssemblyError::InvalidPartition {
                reason: "a partition needs at least two offsets".to_string(),
            });
        }
        if offsets[0] != 0 {
            return Err(AssemblyError::InvalidPartition {
                reason: format!("first offset must be zero, got {}", offsets[0]),
            });
        }
        if let Some(w) = offsets.windows(2).find(|w| w[0] > w[1]) {
            return Err(AssemblyError::InvalidPartition {
                reason: format!("offsets must be non-decreasing, found {} followed by {}", w[0], w[1]),
            });
        }
        Ok(Self { offsets })
    }

    pub fn num_members(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of indices in the partitioned space.
    pub fn total(&self) -> usize {
        self.offsets[self.offsets.len() - 1]
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        self.offsets[rank]..self.offsets[rank + 1]
    }

    pub fn local_len(&self, rank: usize) -> usize {
        self.offsets[rank + 1] - self.offsets[rank]
    }

    pub fn is_owned_by(&self, index: usize, rank: usize) -> bool {
        self.range(rank).contains(&index)
    }

    /// Returns the member owning `index`.
    ///
    /// Panics if `index` is out of bounds.
    pub fn owner(&self, index: usize) -> usize {
        assert!(index < self.total(), "Index {} out of bounds for partition of {}", index, self.total());
        // Empty ranges share their offset with the next member, so take the last member
        // whose range starts at or before the index
        self.offsets.partition_point(|&offset| offset <= index) - 1
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }
}
