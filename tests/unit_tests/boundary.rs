use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use stiffness::assembly::boundary::{apply_boundary_correction, BoundaryCorrection, CorrectionVectors};
use stiffness::backend::{CsrBackend, DistributedMatrix, StashedVector};
use stiffness::comm::SerialGroup;
use stiffness::error::AssemblyError;
use stiffness::partition::Partition;
use stiffness::space::NodalFunctionSpace;

use crate::{assemble_serial, line_space, spring_term};

fn assembled_chain(space: &NodalFunctionSpace<f64>) -> CsrBackend<f64, SerialGroup> {
    assemble_serial(space.clone(), vec![spring_term()]).into_matrix()
}

fn zero_vector(n: usize) -> StashedVector<f64, SerialGroup> {
    StashedVector::zeros(SerialGroup, Partition::serial(n))
}

#[test]
fn zero_rows_clears_constrained_rows() {
    let space = line_space(2).with_constraint(0, 0, 2.0);
    let mut matrix = assembled_chain(&space);
    let constrained = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::ZeroRows,
        CorrectionVectors::default(),
    )
    .unwrap();

    assert_eq!(constrained.constrained_rows(), 1);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
         0.0,  0.0,  0.0,
        -1.0,  2.0, -1.0,
         0.0, -1.0,  1.0,
    ]);
    assert_matrix_eq!(matrix.to_dense_rows(), expected, comp = float);
}

#[test]
fn value_substitution_gives_identity_row_and_prescribed_rhs() {
    let space = line_space(2).with_constraint(0, 0, 0.0);
    let mut matrix = assembled_chain(&space);
    let mut rhs = zero_vector(3);
    apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::ValueSubstitution,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: None,
        },
    )
    .unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
         1.0,  0.0,  0.0,
        -1.0,  2.0, -1.0,
         0.0, -1.0,  1.0,
    ]);
    assert_matrix_eq!(matrix.to_dense_rows(), expected, comp = float);
    assert_eq!(rhs.local_values(), &DVector::from_column_slice(&[0.0, 0.0, 0.0]));
}

#[test]
fn value_substitution_overwrites_rhs_with_prescribed_value() {
    let space = line_space(2).with_constraint(2, 0, 2.5);
    let mut matrix = assembled_chain(&space);
    let mut rhs = zero_vector(3);
    rhs.local_values_mut().fill(7.0);
    apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::ValueSubstitution,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: None,
        },
    )
    .unwrap();

    assert_eq!(matrix.get(2, 1), Some(0.0));
    assert_eq!(matrix.get(2, 2), Some(1.0));
    assert_eq!(rhs.local_values(), &DVector::from_column_slice(&[7.0, 7.0, 2.5]));
}

#[test]
fn diagonal_set_only_touches_the_diagonal() {
    let space = line_space(2).with_constraint(0, 0, 1.0).with_constraint(2, 0, 1.0);
    let mut matrix = assembled_chain(&space);
    let constrained = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::DiagonalSet(5.0),
        CorrectionVectors::default(),
    )
    .unwrap();

    assert_eq!(constrained.constrained_rows(), 2);
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
         5.0, -1.0,  0.0,
        -1.0,  2.0, -1.0,
         0.0, -1.0,  5.0,
    ]);
    assert_matrix_eq!(matrix.to_dense_rows(), expected, comp = float);
}

#[test]
fn transpose_correction_eliminates_symmetrically() {
    let space = line_space(2).with_constraint(0, 0, 2.0);
    let mut matrix = assembled_chain(&space);
    let mut rhs = zero_vector(3);
    let mut transpose_rhs = zero_vector(3);
    apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::TransposeCorrection,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: Some(&mut transpose_rhs),
        },
    )
    .unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        0.0,  0.0,  0.0,
        0.0,  2.0, -1.0,
        0.0, -1.0,  1.0,
    ]);
    assert_matrix_eq!(matrix.to_dense_rows(), expected, comp = float);
    // rhs[1] -= a_10 g_0 and trans_rhs[1] -= a_01 g_0
    assert_eq!(rhs.local_values(), &DVector::from_column_slice(&[0.0, 2.0, 0.0]));
    assert_eq!(transpose_rhs.local_values(), &DVector::from_column_slice(&[0.0, 2.0, 0.0]));
}

#[test]
fn transpose_correction_skips_couplings_between_constrained_dofs() {
    let space = line_space(2).with_constraint(0, 0, 1.0).with_constraint(1, 0, 3.0);
    let mut matrix = assembled_chain(&space);
    let mut rhs = zero_vector(3);
    let mut transpose_rhs = zero_vector(3);
    apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::TransposeCorrection,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: Some(&mut transpose_rhs),
        },
    )
    .unwrap();

    // Only the free row 2 keeps its coupling to itself
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        0.0, 0.0, 0.0,
        0.0, 0.0, 0.0,
        0.0, 0.0, 1.0,
    ]);
    assert_matrix_eq!(matrix.to_dense_rows(), expected, comp = float);
    assert_eq!(rhs.local_values(), &DVector::from_column_slice(&[0.0, 0.0, 3.0]));
    assert_eq!(transpose_rhs.local_values(), &DVector::from_column_slice(&[0.0, 0.0, 3.0]));
}

#[test]
fn modes_requiring_vectors_report_missing_vectors() {
    let space = line_space(2).with_constraint(0, 0, 1.0);
    let mut matrix = assembled_chain(&space);

    let err = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::ValueSubstitution,
        CorrectionVectors::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<AssemblyError>(),
        Some(&AssemblyError::MissingVector {
            mode: "value-substitution",
            vector: "right-hand side",
        })
    );

    let mut rhs = zero_vector(3);
    let err = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::TransposeCorrection,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: None,
        },
    )
    .unwrap_err();
    assert_eq!(
        err.downcast_ref::<AssemblyError>(),
        Some(&AssemblyError::MissingVector {
            mode: "transpose-correction",
            vector: "transpose right-hand side",
        })
    );

    // Nothing was modified
    assert_eq!(matrix.get(0, 0), Some(1.0));
}

#[test]
fn recorded_contributions_can_be_written_into_fresh_vectors() {
    let space = line_space(2).with_constraint(0, 0, 2.0);
    let mut matrix = assembled_chain(&space);
    let mut rhs = zero_vector(3);
    let mut transpose_rhs = zero_vector(3);
    let contributions = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::TransposeCorrection,
        CorrectionVectors {
            rhs: Some(&mut rhs),
            transpose_rhs: Some(&mut transpose_rhs),
        },
    )
    .unwrap();
    assert_eq!(contributions.rhs_corrections(), &[(1, 2.0)]);
    assert_eq!(contributions.transpose_rhs_corrections(), &[(1, 2.0)]);

    let mut fresh_rhs = zero_vector(3);
    let mut fresh_transpose_rhs = zero_vector(3);
    contributions
        .write_into(
            &BoundaryCorrection::TransposeCorrection,
            CorrectionVectors {
                rhs: Some(&mut fresh_rhs),
                transpose_rhs: Some(&mut fresh_transpose_rhs),
            },
        )
        .unwrap();
    assert_eq!(fresh_rhs.local_values(), rhs.local_values());
    assert_eq!(fresh_transpose_rhs.local_values(), transpose_rhs.local_values());
}

#[test]
fn diagonal_set_records_no_vector_contributions() {
    let space = line_space(2).with_constraint(0, 0, 4.0);
    let mut matrix = assembled_chain(&space);
    matrix.zero_entries();
    let contributions = apply_boundary_correction::<f64, _>(
        &mut matrix,
        &space,
        &space,
        &BoundaryCorrection::DiagonalSet(3.0),
        CorrectionVectors::default(),
    )
    .unwrap();
    assert_eq!(contributions.constrained_rows(), 1);
    assert!(contributions.rhs_values().is_empty());
    assert!(contributions.rhs_corrections().is_empty());
    assert_eq!(matrix.get(0, 0), Some(3.0));
}

#[test]
fn correction_modes_have_names() {
    assert_eq!(BoundaryCorrection::<f64>::ZeroRows.name(), "zero-rows");
    assert_eq!(BoundaryCorrection::DiagonalSet(1.0).name(), "diagonal-set");
}
