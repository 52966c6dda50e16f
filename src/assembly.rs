//! Element-wise assembly of stiffness matrices.
//!
//! - [`term`]: the pluggable per-element contributions and their registry.
//! - [`element`]: evaluation of element blocks and their scatter into a distributed matrix.
//! - [`boundary`]: correction of constrained rows and columns after assembly.
//! - [`callback`]: hooks run on the finished matrix.
pub mod boundary;
pub mod callback;
pub mod element;
pub mod term;
