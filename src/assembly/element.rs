use crate::assembly::term::{ElementContext, TermRegistry};
use crate::backend::DistributedMatrix;
use crate::error::AssemblyError;
use crate::space::FunctionSpace;
use eyre::WrapErr;
use log::debug;
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector, RealField, Scalar};
use rayon::prelude::*;
use std::cell::RefCell;
use std::fmt::Write;
use thread_local::ThreadLocal;

/// The inputs of one pass over the elements.
#[derive(Clone, Copy)]
pub struct ElementLoop<'a, T: Scalar> {
    pub row_space: &'a (dyn FunctionSpace<T> + Sync),
    pub col_space: &'a (dyn FunctionSpace<T> + Sync),
    pub terms: &'a TermRegistry<T>,
    pub solution: Option<&'a DVector<T>>,
}

/// The summed contributions of all terms for one element, with its equation maps.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementBlock<T: Scalar> {
    pub element_index: usize,
    pub row_equations: Vec<usize>,
    pub col_equations: Vec<usize>,
    pub matrix: DMatrix<T>,
}

#[derive(Debug, Clone)]
struct ElementWorkspace<T: Scalar> {
    row_equations: Vec<usize>,
    col_equations: Vec<usize>,
    term_matrix: DMatrix<T>,
}

impl<T: RealField> Default for ElementWorkspace<T> {
    fn default() -> Self {
        Self {
            row_equations: Vec::new(),
            col_equations: Vec::new(),
            term_matrix: DMatrix::zeros(0, 0),
        }
    }
}

/// Computes element stiffness blocks and scatters them into a distributed matrix.
///
/// Buffers are kept per thread so that repeated assembly does not reallocate them.
#[derive(Debug)]
pub struct ElementAssembler<T: Scalar + Send> {
    workspace: ThreadLocal<RefCell<ElementWorkspace<T>>>,
}

impl<T: Scalar + Send> Default for ElementAssembler<T> {
    fn default() -> Self {
        Self {
            workspace: ThreadLocal::new(),
        }
    }
}

impl<T: RealField> ElementAssembler<T> {
    /// Sums the contributions of all terms for one element.
    ///
    /// A non-finite contribution is reported as [`AssemblyError::MalformedContribution`],
    /// naming the element and the term.
    pub fn evaluate_element(&self, inputs: &ElementLoop<T>, element_index: usize) -> eyre::Result<ElementBlock<T>> {
        let ws = &mut *self.workspace.get_or_default().borrow_mut();

        inputs
            .row_space
            .populate_element_equations(&mut ws.row_equations, element_index);
        inputs
            .col_space
            .populate_element_equations(&mut ws.col_equations, element_index);
        let (nrows, ncols) = (ws.row_equations.len(), ws.col_equations.len());

        let mut element_matrix = DMatrix::zeros(nrows, ncols);
        ws.term_matrix.resize_mut(nrows, ncols, T::zero());

        let context = ElementContext {
            element_index,
            row_equations: &ws.row_equations,
            col_equations: &ws.col_equations,
            solution: inputs.solution,
        };

        for term in inputs.terms.iter() {
            ws.term_matrix.fill(T::zero());
            term.assemble_element_matrix_into(&context, DMatrixViewMut::from(&mut ws.term_matrix))
                .wrap_err_with(|| AssemblyError::TermFailure {
                    element: element_index,
                    term: term.name().to_string(),
                })?;

            if let Some((idx, _)) = ws.term_matrix.iter().enumerate().find(|(_, v)| !v.is_finite()) {
                // Storage is column major
                return Err(AssemblyError::MalformedContribution {
                    element: element_index,
                    term: term.name().to_string(),
                    row: idx % nrows,
                    col: idx / nrows,
                }
                .into());
            }
            element_matrix += &ws.term_matrix;
        }

        Ok(ElementBlock {
            element_index,
            row_equations: ws.row_equations.clone(),
            col_equations: ws.col_equations.clone(),
            matrix: element_matrix,
        })
    }

    /// Evaluates the given elements and adds their blocks to `matrix`.
    ///
    /// With `parallel`, blocks are evaluated concurrently but scattered in element order, so
    /// the result is identical to serial assembly.
    pub fn assemble_into<M>(
        &self,
        matrix: &mut M,
        inputs: &ElementLoop<T>,
        elements: &[usize],
        parallel: bool,
        print_blocks: bool,
    ) -> eyre::Result<()>
    where
        M: ?Sized + DistributedMatrix<T>,
    {
        let scatter = |matrix: &mut M, block: &ElementBlock<T>| -> eyre::Result<()> {
            if print_blocks {
                debug!(target: "stiffness::element", "{}", format_element_block(block));
            }
            matrix
                .add_values(&block.row_equations, &block.col_equations, DMatrixView::from(&block.matrix))
                .wrap_err_with(|| format!("failed to scatter block of element {}", block.element_index))
        };

        if parallel {
            let blocks = elements
                .par_iter()
                .with_min_len(32)
                .map(|&element_index| self.evaluate_element(inputs, element_index))
                .collect::<eyre::Result<Vec<_>>>()?;
            for block in &blocks {
                scatter(matrix, block)?;
            }
        } else {
            for &element_index in elements {
                let block = self.evaluate_element(inputs, element_index)?;
                scatter(matrix, &block)?;
            }
        }
        Ok(())
    }
}

/// Formats an element block together with its row and column equation maps.
pub fn format_element_block<T: Scalar + std::fmt::Display>(block: &ElementBlock<T>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "element {} stiffness block:", block.element_index);
    let _ = writeln!(out, "  row equations:    {:?}", block.row_equations);
    let _ = writeln!(out, "  column equations: {:?}", block.col_equations);
    for i in 0..block.matrix.nrows() {
        let _ = write!(out, "  [{}]", block.row_equations[i]);
        for j in 0..block.matrix.ncols() {
            let _ = write!(out, " {:12.5}", block.matrix[(i, j)]);
        }
        let _ = writeln!(out);
    }
    out
}
