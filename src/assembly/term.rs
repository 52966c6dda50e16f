use nalgebra::{DMatrixViewMut, DVector, Scalar};
use std::fmt;

/// Everything a term may know about the element it is evaluated on.
#[derive(Debug, Clone)]
pub struct ElementContext<'a, T: Scalar> {
    pub element_index: usize,
    /// Global equation numbers of the rows of the element block.
    pub row_equations: &'a [usize],
    /// Global equation numbers of the columns of the element block.
    pub col_equations: &'a [usize],
    /// The current solution, indexed by column equation numbers. Always present when the
    /// matrix is nonlinear.
    pub solution: Option<&'a DVector<T>>,
}

/// A contribution to the element stiffness block.
///
/// The element block is the sum of the contributions of all registered terms. Terms receive a
/// zeroed output of shape (row equations x column equations), and may leave it untouched if
/// they do not contribute to an element.
pub trait StiffnessTerm<T: Scalar>: Send + Sync {
    fn name(&self) -> &str;

    fn assemble_element_matrix_into(&self, context: &ElementContext<T>, output: DMatrixViewMut<T>) -> eyre::Result<()>;
}

type TermFn<T> = dyn Fn(&ElementContext<T>, DMatrixViewMut<T>) -> eyre::Result<()> + Send + Sync;

/// A term defined by a closure.
pub struct FnTerm<T: Scalar> {
    name: String,
    function: Box<TermFn<T>>,
}

impl<T: Scalar> FnTerm<T> {
    pub fn new<F>(name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&ElementContext<T>, DMatrixViewMut<T>) -> eyre::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            function: Box::new(function),
        }
    }
}

impl<T: Scalar> fmt::Debug for FnTerm<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTerm").field("name", &self.name).finish()
    }
}

impl<T: Scalar> StiffnessTerm<T> for FnTerm<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn assemble_element_matrix_into(&self, context: &ElementContext<T>, output: DMatrixViewMut<T>) -> eyre::Result<()> {
        (self.function)(context, output)
    }
}

/// An ordered collection of stiffness terms.
///
/// Terms are evaluated in insertion order. Names are not required to be unique.
pub struct TermRegistry<T: Scalar> {
    terms: Vec<Box<dyn StiffnessTerm<T>>>,
}

impl<T: Scalar> Default for TermRegistry<T> {
    fn default() -> Self {
        Self { terms: Vec::new() }
    }
}

impl<T: Scalar> fmt::Debug for TermRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<T: Scalar> TermRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, term: impl StiffnessTerm<T> + 'static) {
        self.push_boxed(Box::new(term));
    }

    pub fn push_boxed(&mut self, term: Box<dyn StiffnessTerm<T>>) {
        self.terms.push(term);
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn names(&self) -> impl '_ + Iterator<Item = &str> {
        self.terms.iter().map(|term| term.name())
    }

    pub fn iter(&self) -> impl '_ + Iterator<Item = &dyn StiffnessTerm<T>> {
        self.terms.iter().map(|term| term.as_ref())
    }
}
