use crate::backend::DistributedMatrix;
use crate::comm::ProcessGroup;
use crate::error::AssemblyError;
use crate::partition::Partition;
use crate::sparsity::NonZeroStructure;
use eyre::eyre;
use log::trace;
use nalgebra::{DMatrix, DMatrixView, RealField, Scalar};
use nalgebra_sparse::CsrMatrix;
use std::ops::Range;

/// A distributed matrix storing its owned rows as a CSR matrix with global column indices.
///
/// Entries for rows owned by other members are stashed and delivered during
/// [`finalize`](DistributedMatrix::finalize). The structure is fixed at preallocation: adding
/// to an entry outside of it is reported as [`AssemblyError::PatternMiss`] instead of
/// silently growing the matrix.
#[derive(Debug, Clone)]
pub struct CsrBackend<T: Scalar, G> {
    group: G,
    rows: Option<Partition>,
    local: Option<CsrMatrix<T>>,
    stash: Vec<(usize, usize, T)>,
}

impl<T: Scalar, G: ProcessGroup> CsrBackend<T, G> {
    /// An unallocated matrix belonging to the given process group.
    pub fn new(group: G) -> Self {
        Self {
            group,
            rows: None,
            local: None,
            stash: Vec::new(),
        }
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn is_allocated(&self) -> bool {
        self.local.is_some()
    }

    /// The block of owned rows, with global column indices.
    pub fn local_csr(&self) -> Option<&CsrMatrix<T>> {
        self.local.as_ref()
    }

    /// Number of entries waiting to be delivered to other members.
    pub fn stashed_count(&self) -> usize {
        self.stash.len()
    }

    fn local_row_offset(&self) -> usize {
        self.rows
            .as_ref()
            .map(|rows| rows.range(self.group.rank()).start)
            .unwrap_or(0)
    }

    fn allocated(&self) -> eyre::Result<&CsrMatrix<T>> {
        self.local
            .as_ref()
            .ok_or_else(|| eyre!("matrix storage has not been preallocated"))
    }

    fn allocated_mut(&mut self) -> eyre::Result<&mut CsrMatrix<T>> {
        self.local
            .as_mut()
            .ok_or_else(|| eyre!("matrix storage has not been preallocated"))
    }
}

impl<T: RealField, G: ProcessGroup> CsrBackend<T, G> {
    /// The owned rows as a dense (local rows x global columns) matrix.
    pub fn to_dense_rows(&self) -> DMatrix<T> {
        match &self.local {
            Some(csr) => DMatrix::from(csr),
            None => DMatrix::zeros(0, 0),
        }
    }

    /// Collective: the full matrix, assembled from the rows of all members.
    pub fn gather_dense(&self) -> DMatrix<T> {
        let (nrows, ncols) = match (&self.rows, &self.local) {
            (Some(rows), Some(csr)) => (rows.total(), csr.ncols()),
            _ => (0, 0),
        };
        let offset = self.local_row_offset();
        let triplets: Vec<(usize, usize, T)> = self
            .local
            .iter()
            .flat_map(|csr| csr.triplet_iter())
            .map(|(i, j, v)| (offset + i, j, v.clone()))
            .collect();
        let outgoing = vec![triplets; self.group.size()];
        let incoming = self.group.exchange(outgoing);

        let mut dense = DMatrix::zeros(nrows, ncols);
        for (i, j, v) in incoming.into_iter().flatten() {
            dense[(i, j)] = v;
        }
        dense
    }

    fn add_owned(&mut self, row: usize, col: usize, value: T) -> Result<(), AssemblyError> {
        let offset = self.local_row_offset();
        let csr = self
            .local
            .as_mut()
            .expect("Owned rows exist only after preallocation");
        let mut csr_row = csr.row_mut(row - offset);
        let (cols, values) = csr_row.cols_and_values_mut();
        match cols.binary_search(&col) {
            Ok(idx) => {
                values[idx] += value;
                Ok(())
            }
            Err(_) => Err(AssemblyError::PatternMiss { row, col }),
        }
    }
}

impl<T: RealField, G: ProcessGroup> DistributedMatrix<T> for CsrBackend<T, G> {
    fn preallocate(&mut self, structure: &NonZeroStructure) -> eyre::Result<()> {
        assert_eq!(
            structure.rank(),
            self.group.rank(),
            "Structure must describe the rows of this member"
        );
        let pattern = structure.combined_pattern();
        let nnz = pattern.nnz();
        let mut values = Vec::new();
        values
            .try_reserve_exact(nnz)
            .map_err(|_| AssemblyError::Allocation {
                what: format!("values for {} nonzeros", nnz),
            })?;
        values.resize(nnz, T::zero());
        let csr = CsrMatrix::try_from_pattern_and_values(pattern, values)
            .map_err(|err| eyre!("values do not match the nonzero structure: {}", err))?;

        self.rows = Some(structure.row_partition().clone());
        self.local = Some(csr);
        self.stash.clear();
        Ok(())
    }

    fn row_range(&self) -> Range<usize> {
        match &self.rows {
            Some(rows) => rows.range(self.group.rank()),
            None => 0..0,
        }
    }

    fn num_global_columns(&self) -> usize {
        self.local.as_ref().map(|csr| csr.ncols()).unwrap_or(0)
    }

    fn zero_entries(&mut self) {
        if let Some(csr) = &mut self.local {
            csr.values_mut().iter_mut().for_each(|v| *v = T::zero());
        }
        self.stash.clear();
    }

    fn add_values(&mut self, rows: &[usize], cols: &[usize], values: DMatrixView<T>) -> eyre::Result<()> {
        assert_eq!(values.shape(), (rows.len(), cols.len()), "Block shape must match index maps");
        self.allocated()?;
        let owned = self.row_range();
        for (i, &row) in rows.iter().enumerate() {
            if owned.contains(&row) {
                for (j, &col) in cols.iter().enumerate() {
                    self.add_owned(row, col, values[(i, j)].clone())?;
                }
            } else {
                for (j, &col) in cols.iter().enumerate() {
                    self.stash.push((row, col, values[(i, j)].clone()));
                }
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> eyre::Result<()> {
        let size = self.group.size();
        let mut outgoing = vec![Vec::new(); size];
        if let Some(rows) = &self.rows {
            for (row, col, value) in self.stash.drain(..) {
                outgoing[rows.owner(row)].push((row, col, value));
            }
        }
        trace!(
            "Member {} delivering {} stashed entries",
            self.group.rank(),
            outgoing.iter().map(Vec::len).sum::<usize>()
        );
        let incoming = self.group.exchange(outgoing);

        let mut local_result = Ok(());
        if self.local.is_some() {
            for (row, col, value) in incoming.into_iter().flatten() {
                if let Err(err) = self.add_owned(row, col, value) {
                    local_result = Err(err);
                    break;
                }
            }
        }

        let any_failed = self.group.any(local_result.is_err());
        local_result?;
        if any_failed {
            return Err(AssemblyError::RemoteFailure.into());
        }
        Ok(())
    }

    fn zero_rows(&mut self, rows: &[usize], diagonal: Option<T>) -> eyre::Result<()> {
        let offset = self.local_row_offset();
        let owned = self.row_range();
        let csr = self.allocated_mut()?;
        for &row in rows {
            assert!(owned.contains(&row), "Row {} is not owned by this member", row);
            let mut csr_row = csr.row_mut(row - offset);
            let (cols, values) = csr_row.cols_and_values_mut();
            let mut found_diagonal = false;
            for (&col, value) in cols.iter().zip(values.iter_mut()) {
                match &diagonal {
                    Some(d) if col == row => {
                        *value = d.clone();
                        found_diagonal = true;
                    }
                    _ => *value = T::zero(),
                }
            }
            if diagonal.is_some() && !found_diagonal {
                return Err(AssemblyError::DiagonalNotInPattern { row }.into());
            }
        }
        Ok(())
    }

    fn set_diagonal(&mut self, rows: &[usize], value: T) -> eyre::Result<()> {
        let offset = self.local_row_offset();
        let owned = self.row_range();
        let csr = self.allocated_mut()?;
        for &row in rows {
            assert!(owned.contains(&row), "Row {} is not owned by this member", row);
            let mut csr_row = csr.row_mut(row - offset);
            let (cols, values) = csr_row.cols_and_values_mut();
            let idx = cols
                .binary_search(&row)
                .map_err(|_| AssemblyError::DiagonalNotInPattern { row })?;
            values[idx] = value.clone();
        }
        Ok(())
    }

    fn for_each_row_entry_mut(&mut self, row: usize, f: &mut dyn FnMut(usize, &mut T)) {
        let offset = self.local_row_offset();
        assert!(self.row_range().contains(&row), "Row {} is not owned by this member", row);
        if let Some(csr) = &mut self.local {
            let mut csr_row = csr.row_mut(row - offset);
            let (cols, values) = csr_row.cols_and_values_mut();
            for (&col, value) in cols.iter().zip(values.iter_mut()) {
                f(col, value);
            }
        }
    }

    fn get(&self, row: usize, col: usize) -> Option<T> {
        if !self.row_range().contains(&row) {
            return None;
        }
        let csr = self.local.as_ref()?;
        let csr_row = csr.get_row(row - self.local_row_offset())?;
        csr_row
            .col_indices()
            .binary_search(&col)
            .ok()
            .map(|idx| csr_row.values()[idx].clone())
    }
}
