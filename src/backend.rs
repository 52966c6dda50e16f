//! The distributed linear algebra storage that assembly writes into.
//!
//! [`DistributedMatrix`] and [`DistributedVector`] describe the small set of primitives needed
//! by assembly and boundary correction. Off-process contributions are buffered until the
//! collective `finalize`, which every member of the process group must call.
//!
//! [`CsrBackend`] and [`StashedVector`] implement these primitives on top of `nalgebra-sparse`
//! and `nalgebra`, with off-process entries routed through a [`ProcessGroup`](crate::comm::ProcessGroup).
use crate::sparsity::NonZeroStructure;
use nalgebra::{DMatrixView, Scalar};
use std::ops::Range;

mod csr;
mod vector;

pub use csr::*;
pub use vector::*;

/// A distributed sparse matrix, of which this member owns a contiguous block of rows.
pub trait DistributedMatrix<T: Scalar> {
    /// Allocates storage for exactly the given nonzero structure, discarding previous values.
    fn preallocate(&mut self, structure: &NonZeroStructure) -> eyre::Result<()>;

    /// The global rows owned by this member.
    fn row_range(&self) -> Range<usize>;

    fn num_global_columns(&self) -> usize;

    /// Sets all stored values to zero, keeping the structure.
    fn zero_entries(&mut self);

    /// Adds `values[(i, j)]` to the global entry `(rows[i], cols[j])`.
    ///
    /// Entries in rows owned by other members are buffered until [`finalize`](Self::finalize).
    /// Adding to an entry outside of the preallocated structure is an error.
    fn add_values(&mut self, rows: &[usize], cols: &[usize], values: DMatrixView<T>) -> eyre::Result<()>;

    /// Collective: delivers buffered entries to their owners.
    ///
    /// If any member fails, every member returns an error.
    fn finalize(&mut self) -> eyre::Result<()>;

    /// Zeros the given owned rows, optionally setting their diagonal entry.
    fn zero_rows(&mut self, rows: &[usize], diagonal: Option<T>) -> eyre::Result<()>;

    /// Sets the diagonal entry of the given owned rows.
    fn set_diagonal(&mut self, rows: &[usize], value: T) -> eyre::Result<()>;

    /// Visits the stored entries of an owned row as `(global column, value)`.
    fn for_each_row_entry_mut(&mut self, row: usize, f: &mut dyn FnMut(usize, &mut T));

    /// The stored value at an owned `(row, col)`, or `None` if it is not stored here.
    fn get(&self, row: usize, col: usize) -> Option<T>;
}

/// A distributed vector, of which this member owns a contiguous block of entries.
pub trait DistributedVector<T: Scalar> {
    fn range(&self) -> Range<usize>;

    /// Adds `value` to the global entry `index`, buffering it if owned by another member.
    fn add_value(&mut self, index: usize, value: T);

    /// Overwrites the global entry `index`, buffering it if owned by another member.
    fn set_value(&mut self, index: usize, value: T);

    /// Collective: delivers buffered entries to their owners.
    fn finalize(&mut self) -> eyre::Result<()>;

    /// The value of an owned entry.
    fn get(&self, index: usize) -> Option<T>;
}
