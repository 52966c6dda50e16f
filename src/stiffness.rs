//! The stiffness matrix of a finite element system.
//!
//! A [`StiffnessMatrix`] owns everything needed to produce the global system matrix from a pair
//! of function spaces: the predicted nonzero structure, the registered terms, the modify
//! callbacks and the distributed matrix itself. One instance lives on every member of the
//! process group, and [`build`](StiffnessMatrix::build), [`assemble`](StiffnessMatrix::assemble)
//! and [`refresh`](StiffnessMatrix::refresh) are collective.
use crate::assembly::boundary::{apply_boundary_correction, BoundaryContributions, BoundaryCorrection, CorrectionVectors};
use crate::assembly::callback::{CallbackId, ModifyCallback, ModifyCallbacks};
use crate::assembly::element::{ElementAssembler, ElementLoop};
use crate::assembly::term::{StiffnessTerm, TermRegistry};
use crate::backend::{CsrBackend, DistributedMatrix, DistributedVector};
use crate::comm::ProcessGroup;
use crate::config::StiffnessMatrixConfig;
use crate::error::AssemblyError;
use crate::sparsity::{compute_nonzero_structure, NonZeroStructure};
use crate::space::FunctionSpace;
use eyre::WrapErr;
use log::{debug, info};
use nalgebra::{DVector, RealField, Scalar};
use std::fmt;
use std::sync::Arc;

/// A function space shared between matrices and the code that sets up constraints.
pub type SharedSpace<T> = Arc<dyn FunctionSpace<T> + Send + Sync>;

/// What a call to [`StiffnessMatrix::assemble`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// The matrix was assembled from its terms.
    Assembled,
    /// The matrix is linear and had already been assembled with the same boundary handling, so
    /// it was left untouched. Boundary values were still written into the supplied vectors.
    Reused,
}

/// Per-call inputs of [`StiffnessMatrix::assemble`].
pub struct AssemblyInputs<'a, T: Scalar> {
    /// The current solution, indexed by column equation. Required for nonlinear matrices.
    pub solution: Option<&'a DVector<T>>,
    /// Right-hand side receiving boundary correction values.
    pub rhs: Option<&'a mut dyn DistributedVector<T>>,
    /// Transpose right-hand side, used by [`BoundaryCorrection::TransposeCorrection`].
    pub transpose_rhs: Option<&'a mut dyn DistributedVector<T>>,
}

impl<'a, T: Scalar> Default for AssemblyInputs<'a, T> {
    fn default() -> Self {
        Self {
            solution: None,
            rhs: None,
            transpose_rhs: None,
        }
    }
}

impl<'a, T: Scalar> AssemblyInputs<'a, T> {
    pub fn with_solution(self, solution: &'a DVector<T>) -> Self {
        Self {
            solution: Some(solution),
            ..self
        }
    }

    pub fn with_rhs(self, rhs: &'a mut dyn DistributedVector<T>) -> Self {
        Self { rhs: Some(rhs), ..self }
    }

    pub fn with_transpose_rhs(self, transpose_rhs: &'a mut dyn DistributedVector<T>) -> Self {
        Self {
            transpose_rhs: Some(transpose_rhs),
            ..self
        }
    }
}

/// The boundary handling of the last successful assembly.
struct CachedAssembly<T> {
    remove_bcs: bool,
    contributions: BoundaryContributions<T>,
}

/// A distributed stiffness matrix together with its assembly machinery.
///
/// The matrix is bound to its row and column spaces at construction. [`build`](Self::build)
/// computes the nonzero structure and allocates the matrix with exactly that structure, after
/// which [`assemble`](Self::assemble) fills it from the registered terms. Differing row and
/// column spaces give a rectangular matrix.
pub struct StiffnessMatrix<T, G, M = CsrBackend<T, G>>
where
    T: RealField,
    G: ProcessGroup,
    M: DistributedMatrix<T>,
{
    config: StiffnessMatrixConfig,
    row_space: SharedSpace<T>,
    col_space: SharedSpace<T>,
    group: G,
    matrix: M,
    structure: Option<NonZeroStructure>,
    terms: TermRegistry<T>,
    callbacks: ModifyCallbacks<M>,
    assembler: ElementAssembler<T>,
    boundary_correction: BoundaryCorrection<T>,
    cached: Option<CachedAssembly<T>>,
    topology_changed: bool,
}

impl<T, G> StiffnessMatrix<T, G>
where
    T: RealField,
    G: ProcessGroup + Clone,
{
    /// Creates an unbuilt matrix stored in a [`CsrBackend`] on the given group.
    pub fn new(
        config: StiffnessMatrixConfig,
        row_space: SharedSpace<T>,
        col_space: SharedSpace<T>,
        group: G,
    ) -> Self {
        let matrix = CsrBackend::new(group.clone());
        Self::with_backend(config, row_space, col_space, group, matrix)
    }
}

impl<T, G, M> StiffnessMatrix<T, G, M>
where
    T: RealField,
    G: ProcessGroup,
    M: DistributedMatrix<T>,
{
    pub fn with_backend(
        config: StiffnessMatrixConfig,
        row_space: SharedSpace<T>,
        col_space: SharedSpace<T>,
        group: G,
        matrix: M,
    ) -> Self {
        Self {
            config,
            row_space,
            col_space,
            group,
            matrix,
            structure: None,
            terms: TermRegistry::new(),
            callbacks: ModifyCallbacks::default(),
            assembler: ElementAssembler::default(),
            boundary_correction: BoundaryCorrection::ValueSubstitution,
            cached: None,
            topology_changed: false,
        }
    }

    /// Sets the correction applied when assembling with boundary condition removal.
    pub fn with_boundary_correction(self, boundary_correction: BoundaryCorrection<T>) -> Self {
        Self {
            boundary_correction,
            ..self
        }
    }

    pub fn set_boundary_correction(&mut self, boundary_correction: BoundaryCorrection<T>) {
        self.boundary_correction = boundary_correction;
        self.cached = None;
    }

    pub fn config(&self) -> &StiffnessMatrixConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn row_space(&self) -> &SharedSpace<T> {
        &self.row_space
    }

    pub fn col_space(&self) -> &SharedSpace<T> {
        &self.col_space
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn matrix(&self) -> &M {
        &self.matrix
    }

    /// Direct access to the distributed matrix.
    ///
    /// Entries added here to rows of other members are only delivered by a subsequent
    /// [`refresh`](Self::refresh) or assembly.
    pub fn matrix_mut(&mut self) -> &mut M {
        &mut self.matrix
    }

    pub fn into_matrix(self) -> M {
        self.matrix
    }

    pub fn terms(&self) -> &TermRegistry<T> {
        &self.terms
    }

    pub fn callbacks(&self) -> &ModifyCallbacks<M> {
        &self.callbacks
    }

    pub fn is_nonlinear(&self) -> bool {
        self.config.is_nonlinear
    }

    pub fn is_built(&self) -> bool {
        self.structure.is_some() && !self.topology_changed
    }

    pub fn is_assembled(&self) -> bool {
        self.cached.is_some()
    }

    pub fn boundary_correction(&self) -> &BoundaryCorrection<T> {
        &self.boundary_correction
    }

    /// Appends a term. All terms of a matrix are summed into each element block.
    pub fn add_term(&mut self, term: impl StiffnessTerm<T> + 'static) {
        self.terms.push(term);
        self.cached = None;
    }

    pub fn add_boxed_term(&mut self, term: Box<dyn StiffnessTerm<T>>) {
        self.terms.push_boxed(term);
        self.cached = None;
    }

    /// Registers a closure run on the matrix at the end of every assembly.
    ///
    /// A linear matrix assembled before the registration is recomputed by the next assembly, so
    /// that the new callback sees freshly assembled values.
    pub fn register_modify_callback<F>(&mut self, name: impl Into<String>, callback: F) -> CallbackId
    where
        F: FnMut(&mut M) -> eyre::Result<()> + Send + 'static,
    {
        self.cached = None;
        self.callbacks.register(name, callback)
    }

    pub fn register_boxed_modify_callback(
        &mut self,
        name: impl Into<String>,
        callback: impl ModifyCallback<M> + 'static,
    ) -> CallbackId {
        self.cached = None;
        self.callbacks.register_callback(name, callback)
    }

    /// Makes every subsequent assembly recompute the matrix from the current solution.
    pub fn set_nonlinear(&mut self) {
        self.config.is_nonlinear = true;
    }

    /// Forces the next assembly of a linear matrix to recompute its entries.
    pub fn mark_stale(&mut self) {
        self.cached = None;
    }

    /// Forces the next assembly to recompute the nonzero structure and reallocate the matrix.
    pub fn mark_topology_changed(&mut self) {
        self.topology_changed = true;
        self.cached = None;
    }

    pub fn nonzero_structure(&self) -> Option<&NonZeroStructure> {
        self.structure.as_ref()
    }

    fn structure_stat(&self, stat: impl FnOnce(&NonZeroStructure) -> usize) -> usize {
        self.structure.as_ref().map(stat).unwrap_or(0)
    }

    /// Number of stored entries in the rows owned by this member.
    pub fn nonzero_count(&self) -> usize {
        self.structure_stat(NonZeroStructure::nonzero_count)
    }

    pub fn diagonal_nonzero_count(&self) -> usize {
        self.structure_stat(NonZeroStructure::diagonal_nonzero_count)
    }

    pub fn off_diagonal_nonzero_count(&self) -> usize {
        self.structure_stat(NonZeroStructure::off_diagonal_nonzero_count)
    }

    pub fn local_row_count(&self) -> usize {
        self.row_space.partition().local_len(self.group.rank())
    }

    pub fn local_column_count(&self) -> usize {
        self.col_space.partition().local_len(self.group.rank())
    }

    pub fn num_global_rows(&self) -> usize {
        self.row_space.num_equations()
    }

    pub fn num_global_columns(&self) -> usize {
        self.col_space.num_equations()
    }

    fn check_group(&self) -> Result<(), AssemblyError> {
        let members = self.row_space.partition().num_members();
        if members != self.group.size() {
            return Err(AssemblyError::InvalidPartition {
                reason: format!(
                    "equations are partitioned over {} members, but the process group has {}",
                    members,
                    self.group.size()
                ),
            });
        }
        let topology = self.row_space.topology();
        let size = self.group.size();
        if let Some((element, owner)) = (0..topology.num_elements())
            .map(|element| (element, topology.element_owner(element)))
            .find(|&(_, owner)| owner >= size)
        {
            return Err(AssemblyError::InvalidPartition {
                reason: format!(
                    "element {} is owned by member {}, but the process group has {} members",
                    element, owner, size
                ),
            });
        }
        Ok(())
    }

    /// Collective: computes the nonzero structure and allocates the matrix with it.
    ///
    /// Configuration errors found on any member fail the build on every member before any
    /// storage is allocated.
    pub fn build(&mut self) -> eyre::Result<()> {
        let local = self.check_group().map_err(eyre::Report::from).and_then(|_| {
            compute_nonzero_structure(
                &*self.row_space,
                &*self.col_space,
                self.group.rank(),
                self.config.allow_zero_element_contributions,
            )
        });

        let any_failed = self.group.any(local.is_err());
        let structure = local.wrap_err_with(|| format!("failed to build stiffness matrix '{}'", self.name()))?;
        if any_failed {
            return Err(AssemblyError::RemoteFailure.into());
        }

        self.matrix.preallocate(&structure)?;
        info!(
            "Built stiffness matrix '{}': {} x {} global, {} local rows, {} local nonzeros",
            self.name(),
            structure.num_global_rows(),
            structure.num_global_columns(),
            structure.local_row_count(),
            structure.nonzero_count()
        );
        self.structure = Some(structure);
        self.topology_changed = false;
        self.cached = None;
        Ok(())
    }

    /// Collective: delivers entries stashed for other members, keeping the structure and values.
    pub fn refresh(&mut self) -> eyre::Result<()> {
        if self.structure.is_none() {
            return Err(AssemblyError::NotBuilt.into());
        }
        self.matrix.finalize()
    }

    fn check_inputs(&self, remove_bcs: bool, inputs: &AssemblyInputs<T>) -> Result<(), AssemblyError> {
        if self.structure.is_none() {
            return Err(AssemblyError::NotBuilt);
        }
        if self.terms.is_empty() && !self.config.allow_zero_element_contributions {
            return Err(AssemblyError::NoTerms);
        }
        if self.config.is_nonlinear && inputs.solution.is_none() {
            return Err(AssemblyError::MissingSolutionState);
        }
        if remove_bcs {
            self.boundary_correction
                .check_vectors(inputs.rhs.is_some(), inputs.transpose_rhs.is_some())?;
        }
        Ok(())
    }

    /// Collective: assembles the matrix from its terms.
    ///
    /// The steps are: element loop over the elements owned by this member, delivery of
    /// off-process contributions, boundary correction of constrained rows if `remove_bcs` is
    /// set, and finally the modify callbacks in registration order. Invalid inputs on any member
    /// fail the assembly on every member before the matrix is touched.
    ///
    /// A linear matrix that has already been assembled with the same `remove_bcs` is left
    /// untouched and [`AssemblyOutcome::Reused`] is returned. With `remove_bcs`, the boundary
    /// values of that assembly are written into the supplied vectors again. A pending topology
    /// change on any member triggers a rebuild.
    pub fn assemble(&mut self, remove_bcs: bool, inputs: AssemblyInputs<T>) -> eyre::Result<AssemblyOutcome> {
        if self.group.any(self.topology_changed) {
            debug!("Topology of '{}' changed, rebuilding before assembly", self.name());
            self.build()?;
        }
        let local = self
            .check_inputs(remove_bcs, &inputs)
            .wrap_err_with(|| format!("cannot assemble stiffness matrix '{}'", self.name()));
        let any_failed = self.group.any(local.is_err());
        local?;
        if any_failed {
            return Err(AssemblyError::RemoteFailure.into());
        }

        if !self.config.is_nonlinear {
            if let Some(cached) = self.cached.as_ref().filter(|cached| cached.remove_bcs == remove_bcs) {
                debug!("Reusing assembled linear matrix '{}'", self.config.name);
                if remove_bcs {
                    let vectors = CorrectionVectors {
                        rhs: inputs.rhs,
                        transpose_rhs: inputs.transpose_rhs,
                    };
                    cached
                        .contributions
                        .write_into(&self.boundary_correction, vectors)
                        .wrap_err_with(|| format!("boundary values of '{}' could not be written", self.config.name))?;
                }
                return Ok(AssemblyOutcome::Reused);
            }
        }
        self.cached = None;

        let rank = self.group.rank();
        let topology = self.row_space.topology();
        let elements: Vec<usize> = (0..topology.num_elements())
            .filter(|&element| topology.element_owner(element) == rank)
            .collect();
        debug!(
            "Assembling '{}' over {} owned elements with {} terms",
            self.name(),
            elements.len(),
            self.terms.len()
        );

        self.matrix.zero_entries();
        let element_loop = ElementLoop {
            row_space: &*self.row_space,
            col_space: &*self.col_space,
            terms: &self.terms,
            solution: inputs.solution,
        };
        let local = self.assembler.assemble_into(
            &mut self.matrix,
            &element_loop,
            &elements,
            self.config.parallel_element_loop,
            self.config.print_element_blocks,
        );
        // Every member must agree on failure before the collective finalize
        if self.group.any(local.is_err()) {
            local.wrap_err_with(|| format!("element assembly of '{}' failed", self.config.name))?;
            return Err(AssemblyError::RemoteFailure.into());
        }
        self.matrix.finalize()?;

        let local = self.correct_and_modify(remove_bcs, inputs);
        let any_failed = self.group.any(local.is_err());
        let contributions = local?;
        if any_failed {
            return Err(AssemblyError::RemoteFailure.into());
        }

        self.cached = Some(CachedAssembly {
            remove_bcs,
            contributions,
        });
        Ok(AssemblyOutcome::Assembled)
    }

    fn correct_and_modify(
        &mut self,
        remove_bcs: bool,
        inputs: AssemblyInputs<T>,
    ) -> eyre::Result<BoundaryContributions<T>> {
        let mut contributions = BoundaryContributions::default();
        if remove_bcs {
            let vectors = CorrectionVectors {
                rhs: inputs.rhs,
                transpose_rhs: inputs.transpose_rhs,
            };
            contributions = apply_boundary_correction(
                &mut self.matrix,
                &*self.row_space,
                &*self.col_space,
                &self.boundary_correction,
                vectors,
            )
            .wrap_err_with(|| format!("boundary correction of '{}' failed", self.config.name))?;
            debug!(
                "Corrected {} constrained rows of '{}'",
                contributions.constrained_rows(),
                self.config.name
            );
        }
        self.callbacks.run_all(&mut self.matrix)?;
        Ok(contributions)
    }
}

impl<T, G, M> fmt::Display for StiffnessMatrix<T, G, M>
where
    T: RealField,
    G: ProcessGroup,
    M: DistributedMatrix<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "StiffnessMatrix '{}'", self.config.name)?;
        writeln!(
            f,
            "  global size: {} x {}",
            self.num_global_rows(),
            self.num_global_columns()
        )?;
        writeln!(
            f,
            "  member {} of {}: {} local rows, {} local columns",
            self.group.rank(),
            self.group.size(),
            self.local_row_count(),
            self.local_column_count()
        )?;
        writeln!(
            f,
            "  nonzeros: {} ({} diagonal, {} off-diagonal)",
            self.nonzero_count(),
            self.diagonal_nonzero_count(),
            self.off_diagonal_nonzero_count()
        )?;
        writeln!(f, "  nonlinear: {}", self.config.is_nonlinear)?;
        writeln!(f, "  terms: {:?}", self.terms)?;
        write!(f, "  modify callbacks: {:?}", self.callbacks)
    }
}

impl<T, G, M> fmt::Debug for StiffnessMatrix<T, G, M>
where
    T: RealField,
    G: ProcessGroup + fmt::Debug,
    M: DistributedMatrix<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StiffnessMatrix")
            .field("config", &self.config)
            .field("group", &self.group)
            .field("terms", &self.terms)
            .field("callbacks", &self.callbacks)
            .field("built", &self.is_built())
            .field("assembled", &self.is_assembled())
            .finish()
    }
}
