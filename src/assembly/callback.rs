use eyre::WrapErr;
use std::fmt;

/// A hook that may modify a matrix once assembly and boundary correction are complete.
///
/// Assembly may run several times per solve, so callbacks should be idempotent.
pub trait ModifyCallback<M: ?Sized>: Send {
    fn modify(&mut self, matrix: &mut M) -> eyre::Result<()>;
}

impl<M, F> ModifyCallback<M> for F
where
    M: ?Sized,
    F: FnMut(&mut M) -> eyre::Result<()> + Send,
{
    fn modify(&mut self, matrix: &mut M) -> eyre::Result<()> {
        self(matrix)
    }
}

/// Identifies a registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(usize);

impl CallbackId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Append-only list of modify callbacks, run in registration order.
pub struct ModifyCallbacks<M: ?Sized> {
    entries: Vec<(String, Box<dyn ModifyCallback<M>>)>,
}

impl<M: ?Sized> Default for ModifyCallbacks<M> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<M: ?Sized> fmt::Debug for ModifyCallbacks<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<M: ?Sized> ModifyCallbacks<M> {
    /// Registers a closure together with a name describing its context.
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F) -> CallbackId
    where
        F: FnMut(&mut M) -> eyre::Result<()> + Send + 'static,
    {
        self.register_callback(name, callback)
    }

    pub fn register_callback(
        &mut self,
        name: impl Into<String>,
        callback: impl ModifyCallback<M> + 'static,
    ) -> CallbackId {
        self.entries.push((name.into(), Box::new(callback)));
        CallbackId(self.entries.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, id: CallbackId) -> Option<&str> {
        self.entries.get(id.0).map(|(name, _)| name.as_str())
    }

    pub fn names(&self) -> impl '_ + Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Runs all callbacks in registration order, stopping at the first failure.
    pub fn run_all(&mut self, matrix: &mut M) -> eyre::Result<()> {
        for (name, callback) in &mut self.entries {
            callback
                .modify(matrix)
                .wrap_err_with(|| format!("modify callback '{}' failed", name))?;
        }
        Ok(())
    }
}
