//! Distributed assembly of sparse stiffness matrices for finite element simulations.
//!
//! Given a row and a column [function space](space::FunctionSpace) over a mesh, a
//! [`StiffnessMatrix`](stiffness::StiffnessMatrix) predicts the nonzero structure of the
//! global system matrix from mesh connectivity, allocates a distributed matrix with exactly
//! that structure, and fills it by summing the contributions of pluggable
//! [terms](assembly::term::StiffnessTerm) over the elements. Constrained degrees of freedom are
//! then corrected with one of several [boundary corrections](assembly::boundary::BoundaryCorrection),
//! and registered callbacks may modify the finished matrix.
//!
//! Rows are owned by members of a [process group](comm::ProcessGroup), each of which
//! assembles the elements it owns. Contributions to rows of other members are delivered by
//! collective operations.
pub mod assembly;
pub mod backend;
pub mod comm;
pub mod config;
pub mod error;
pub mod partition;
pub mod space;
pub mod sparsity;
pub mod stiffness;

pub extern crate eyre;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
