//! Explicit registration of task factories under stable identifiers.

use std::sync::Arc;

use tracing::debug;

use crate::error::{require_name, Result, RoleworkError};
use crate::runnable::{TaskFactory, TaskRef};

/// Ordered set of named task factories.
///
/// A registry is itself a [`TaskFactory`]: it produces the tasks of every
/// registered entry, in registration order.
///
/// ```rust
/// use rolework_runtime::{TaskRef, TaskRegistry, TaskFactory};
///
/// # fn mailer(_: &()) -> Vec<TaskRef> { Vec::new() }
/// # fn indexer(_: &()) -> Vec<TaskRef> { Vec::new() }
/// let mut registry = TaskRegistry::new();
/// registry.register("mailer", mailer)?;
/// registry.register("indexer", indexer)?;
///
/// assert_eq!(registry.ids().collect::<Vec<_>>(), ["mailer", "indexer"]);
/// assert!(registry.tasks(&()).is_empty());
/// # Ok::<(), rolework_runtime::RoleworkError>(())
/// ```
pub struct TaskRegistry<C> {
    entries: Vec<(String, Arc<dyn TaskFactory<C>>)>,
}

impl<C> Default for TaskRegistry<C> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<C> TaskRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> Result<&mut Self>
    where
        F: TaskFactory<C> + 'static,
    {
        self.register_shared(id, Arc::new(factory))
    }

    pub fn register_shared(&mut self, id: impl Into<String>, factory: Arc<dyn TaskFactory<C>>) -> Result<&mut Self> {
        let id = id.into();
        require_name(&id, "factory id")?;
        if self.contains(&id) {
            return Err(RoleworkError::DuplicateFactory(id));
        }

        debug!(factory = %id, "task factory registered");
        self.entries.push((id, factory));
        Ok(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(existing, _)| existing == id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TaskFactory<C>>> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, factory)| factory.clone())
    }

    /// Registered identifiers in registration order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> TaskFactory<C> for TaskRegistry<C> {
    fn tasks(&self, config: &C) -> Vec<TaskRef> {
        self.entries
            .iter()
            .flat_map(|(_, factory)| factory.tasks(config))
            .collect()
    }
}
