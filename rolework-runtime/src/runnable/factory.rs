use std::sync::Arc;

use super::r#trait::RunnableTask;

/// Shared handle to a runnable task
pub type TaskRef = Arc<dyn RunnableTask>;

/// Produces the tasks a unit manager will own.
///
/// `config` is the passthrough value handed to
/// [`UnitManager::on_start`](crate::UnitManager::on_start). Returning an empty
/// list is legal.
pub trait TaskFactory<C>: Send + Sync {
    fn tasks(&self, config: &C) -> Vec<TaskRef>;
}

impl<C, F> TaskFactory<C> for F
where
    F: Fn(&C) -> Vec<TaskRef> + Send + Sync,
{
    fn tasks(&self, config: &C) -> Vec<TaskRef> {
        self(config)
    }
}
