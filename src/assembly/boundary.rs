//! Correction of an assembled matrix for constrained (Dirichlet) degrees of freedom.
//!
//! Correction runs once all element contributions have been delivered to their owners, since a
//! row is only complete after every incident element has been scattered. Only owned rows are
//! modified; contributions to vectors are delivered with a collective finalize.
use crate::backend::{DistributedMatrix, DistributedVector};
use crate::error::AssemblyError;
use crate::space::FunctionSpace;
use log::debug;
use nalgebra::{RealField, Scalar};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// How constrained rows and columns are treated after assembly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoundaryCorrection<T> {
    /// Constrained rows are cleared, including their diagonal.
    ZeroRows,
    /// Constrained rows become identity rows and the prescribed value is written to the
    /// right-hand side.
    ValueSubstitution,
    /// Symmetric elimination.
    ///
    /// Constrained columns are cleared and their coupling to the prescribed values is moved to
    /// the right-hand side (`rhs[i] -= a_ij g_j`). Constrained rows are cleared and their coupling
    /// is moved to the transpose right-hand side (`trans_rhs[j] -= a_ij g_i`).
    TransposeCorrection,
    /// Only the diagonal entry of constrained rows is set to the given value.
    DiagonalSet(T),
}

impl<T> BoundaryCorrection<T> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZeroRows => "zero-rows",
            Self::ValueSubstitution => "value-substitution",
            Self::TransposeCorrection => "transpose-correction",
            Self::DiagonalSet(_) => "diagonal-set",
        }
    }

    fn requires_rhs(&self) -> bool {
        matches!(self, Self::ValueSubstitution | Self::TransposeCorrection)
    }

    fn requires_transpose_rhs(&self) -> bool {
        matches!(self, Self::TransposeCorrection)
    }

    /// Checks that the vectors this mode writes to are present.
    pub fn check_vectors(&self, has_rhs: bool, has_transpose_rhs: bool) -> Result<(), AssemblyError> {
        let missing = |vector| AssemblyError::MissingVector {
            mode: self.name(),
            vector,
        };
        if self.requires_rhs() && !has_rhs {
            return Err(missing("right-hand side"));
        }
        if self.requires_transpose_rhs() && !has_transpose_rhs {
            return Err(missing("transpose right-hand side"));
        }
        Ok(())
    }
}

/// Vectors receiving boundary correction values.
pub struct CorrectionVectors<'a, T: Scalar> {
    /// Right-hand side, distributed like the rows of the matrix.
    pub rhs: Option<&'a mut dyn DistributedVector<T>>,
    /// Transpose right-hand side, distributed like the columns of the matrix.
    pub transpose_rhs: Option<&'a mut dyn DistributedVector<T>>,
}

impl<'a, T: Scalar> Default for CorrectionVectors<'a, T> {
    fn default() -> Self {
        Self {
            rhs: None,
            transpose_rhs: None,
        }
    }
}

/// The vector entries produced by a boundary correction.
///
/// The matrix is only corrected once, but the contributions can be written again into fresh
/// vectors with [`write_into`](Self::write_into), which is how a linear matrix is reused
/// across solves.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryContributions<T> {
    constrained_rows: usize,
    rhs_values: Vec<(usize, T)>,
    rhs_corrections: Vec<(usize, T)>,
    transpose_rhs_corrections: Vec<(usize, T)>,
}

impl<T> Default for BoundaryContributions<T> {
    fn default() -> Self {
        Self {
            constrained_rows: 0,
            rhs_values: Vec::new(),
            rhs_corrections: Vec::new(),
            transpose_rhs_corrections: Vec::new(),
        }
    }
}

impl<T: RealField> BoundaryContributions<T> {
    /// Number of constrained rows owned by this member.
    pub fn constrained_rows(&self) -> usize {
        self.constrained_rows
    }

    /// Prescribed values overwriting right-hand side entries.
    pub fn rhs_values(&self) -> &[(usize, T)] {
        &self.rhs_values
    }

    /// Values added to right-hand side entries.
    pub fn rhs_corrections(&self) -> &[(usize, T)] {
        &self.rhs_corrections
    }

    /// Values added to transpose right-hand side entries.
    pub fn transpose_rhs_corrections(&self) -> &[(usize, T)] {
        &self.transpose_rhs_corrections
    }

    /// Collective: writes the contributions into the vectors required by `mode` and finalizes
    /// them.
    pub fn write_into(&self, mode: &BoundaryCorrection<T>, vectors: CorrectionVectors<T>) -> eyre::Result<()> {
        let CorrectionVectors { rhs, transpose_rhs } = vectors;
        mode.check_vectors(rhs.is_some(), transpose_rhs.is_some())?;
        if mode.requires_rhs() {
            if let Some(rhs) = rhs {
                for (row, value) in &self.rhs_values {
                    rhs.set_value(*row, value.clone());
                }
                for (row, value) in &self.rhs_corrections {
                    rhs.add_value(*row, value.clone());
                }
                rhs.finalize()?;
            }
        }
        if mode.requires_transpose_rhs() {
            if let Some(transpose_rhs) = transpose_rhs {
                for (col, value) in &self.transpose_rhs_corrections {
                    transpose_rhs.add_value(*col, value.clone());
                }
                transpose_rhs.finalize()?;
            }
        }
        Ok(())
    }
}

/// Applies a boundary correction to the owned rows of `matrix` and writes the resulting values
/// into `vectors`.
///
/// This is a collective operation when any vector is involved. Missing vectors are reported
/// before anything is modified.
pub fn apply_boundary_correction<T, M>(
    matrix: &mut M,
    row_space: &dyn FunctionSpace<T>,
    col_space: &dyn FunctionSpace<T>,
    mode: &BoundaryCorrection<T>,
    vectors: CorrectionVectors<T>,
) -> eyre::Result<BoundaryContributions<T>>
where
    T: RealField,
    M: ?Sized + DistributedMatrix<T>,
{
    mode.check_vectors(vectors.rhs.is_some(), vectors.transpose_rhs.is_some())?;

    let constrained: Vec<(usize, T)> = matrix
        .row_range()
        .filter_map(|row| row_space.constraint(row).map(|value| (row, value)))
        .collect();
    let rows: Vec<usize> = constrained.iter().map(|&(row, _)| row).collect();
    debug!(
        "Applying {} correction to {} constrained rows",
        mode.name(),
        constrained.len()
    );

    let mut contributions = BoundaryContributions {
        constrained_rows: constrained.len(),
        ..BoundaryContributions::default()
    };
    let local = match mode {
        BoundaryCorrection::ZeroRows => matrix.zero_rows(&rows, None),
        BoundaryCorrection::ValueSubstitution => {
            let local = matrix.zero_rows(&rows, Some(T::one()));
            if local.is_ok() {
                contributions.rhs_values = constrained;
            }
            local
        }
        BoundaryCorrection::TransposeCorrection => {
            eliminate_symmetric(matrix, row_space, col_space, &constrained, &mut contributions);
            Ok(())
        }
        BoundaryCorrection::DiagonalSet(value) => matrix.set_diagonal(&rows, value.clone()),
    };
    // Vector finalization is collective, so it happens even if the local part failed
    contributions.write_into(mode, vectors)?;
    local?;
    Ok(contributions)
}

fn eliminate_symmetric<T, M>(
    matrix: &mut M,
    row_space: &dyn FunctionSpace<T>,
    col_space: &dyn FunctionSpace<T>,
    constrained_rows: &[(usize, T)],
    contributions: &mut BoundaryContributions<T>,
) where
    T: RealField,
    M: ?Sized + DistributedMatrix<T>,
{
    // Column constraints are looked up for every stored entry, so cache them
    let mut column_constraints: FxHashMap<usize, Option<T>> = FxHashMap::default();
    let mut column_constraint = |col: usize| -> Option<T> {
        column_constraints
            .entry(col)
            .or_insert_with(|| col_space.constraint(col))
            .clone()
    };

    for row in matrix.row_range() {
        if row_space.constraint(row).is_some() {
            continue;
        }
        let mut correction = T::zero();
        matrix.for_each_row_entry_mut(row, &mut |col, value| {
            if let Some(prescribed) = column_constraint(col) {
                correction -= value.clone() * prescribed;
                *value = T::zero();
            }
        });
        if correction != T::zero() {
            contributions.rhs_corrections.push((row, correction));
        }
    }

    for (row, prescribed) in constrained_rows {
        matrix.for_each_row_entry_mut(*row, &mut |col, value| {
            if column_constraint(col).is_none() && *value != T::zero() {
                contributions
                    .transpose_rhs_corrections
                    .push((col, -(value.clone() * prescribed.clone())));
            }
            *value = T::zero();
        });
    }
}
