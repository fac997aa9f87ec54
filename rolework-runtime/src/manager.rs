//! Unit manager - owns the lifecycle of a group of tasks.
//!
//! Host lifecycle:
//!
//! ```text
//! UnitManager::builder().factory(..).build()?
//!   -> on_start(config)   load tasks once from every factory
//!   -> run()              staggered start
//!   -> on_stop()          concurrent, best-effort stop
//!   -> dispose()          concurrent, best-effort release
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Result, RoleworkError};
use crate::runnable::{BoxFuture, RunnableTask, TaskFactory, TaskRef};
use crate::scale::aggregate_signals;
use crate::starter::{Starter, DEFAULT_STAGGER};

/// Builder for UnitManager
pub struct UnitManagerBuilder<C> {
    name: String,
    factories: Vec<Arc<dyn TaskFactory<C>>>,
    stagger: Duration,
    handle: Option<Handle>,
}

impl<C: Send + Sync + 'static> UnitManagerBuilder<C> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a factory
    pub fn factory<F>(mut self, factory: F) -> Self
    where
        F: TaskFactory<C> + 'static,
    {
        self.factories.push(Arc::new(factory));
        self
    }

    /// Register a factory that is shared with another owner
    pub fn shared_factory(mut self, factory: Arc<dyn TaskFactory<C>>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Spacing between task starts in `run()`
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<UnitManager<C>> {
        if self.factories.is_empty() {
            return Err(RoleworkError::NoFactories);
        }
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RoleworkError::NoRuntime)?,
        };

        debug!(
            unit = %self.name,
            factories = self.factories.len(),
            "Building unit manager"
        );

        Ok(UnitManager {
            starter: Starter::new(self.stagger, handle.clone())?,
            name: self.name,
            factories: self.factories,
            tasks: RwLock::new(None),
            retired: Mutex::new(Vec::new()),
            handle,
        })
    }
}

/// Owns a frozen set of tasks built from one or more factories.
pub struct UnitManager<C> {
    name: String,
    factories: Vec<Arc<dyn TaskFactory<C>>>,
    tasks: RwLock<Option<Arc<[TaskRef]>>>,
    /// Stopped but not yet disposed.
    retired: Mutex<Vec<TaskRef>>,
    starter: Starter,
    handle: Handle,
}

impl<C: Send + Sync + 'static> UnitManager<C> {
    /// Create a new builder for UnitManager
    pub fn builder() -> UnitManagerBuilder<C> {
        UnitManagerBuilder {
            name: "unit-manager".to_string(),
            factories: Vec::new(),
            stagger: DEFAULT_STAGGER,
            handle: None,
        }
    }

    /// Shorthand for a builder with the given factories and defaults.
    pub fn new(factories: impl IntoIterator<Item = Arc<dyn TaskFactory<C>>>) -> Result<Self> {
        factories
            .into_iter()
            .fold(Self::builder(), |builder, factory| builder.shared_factory(factory))
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the loaded tasks. Empty until `on_start` loads something.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.tasks
            .read()
            .as_deref()
            .map(<[TaskRef]>::to_vec)
            .unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.tasks.read().is_some()
    }

    /// Load tasks from every factory. Only the first successful load counts.
    pub fn on_start(&self, passthrough: &C) -> bool {
        let mut tasks = self.tasks.write();
        if tasks.is_some() {
            info!(unit = %self.name, "tasks previously loaded");
            return true;
        }

        let loaded: Vec<TaskRef> = self
            .factories
            .iter()
            .flat_map(|factory| factory.tasks(passthrough))
            .collect();

        if loaded.is_empty() {
            warn!(unit = %self.name, "no tasks loaded from factories");
        } else {
            info!(unit = %self.name, tasks = loaded.len(), "tasks loaded");
            *tasks = Some(loaded.into());
        }

        true
    }

    /// Start the loaded tasks through the stagger queue.
    pub fn run(&self) {
        let tasks = self.tasks();
        if tasks.is_empty() {
            warn!(unit = %self.name, "no tasks to start");
            return;
        }

        info!(unit = %self.name, tasks = tasks.len(), "running tasks");
        self.starter.start(tasks);
    }

    /// Stop every loaded task concurrently and clear the task set.
    pub async fn on_stop(&self) {
        let Some(tasks) = self.tasks.write().take() else {
            info!(unit = %self.name, "no tasks to be stopped");
            return;
        };

        info!(unit = %self.name, tasks = tasks.len(), "stopping tasks");
        let results = fan_out(&self.handle, &tasks, |task| async move { task.stop().await }).await;
        for (task, result) in results {
            match result {
                Ok(success) => debug!(unit = %self.name, %task, success, "task stopped"),
                Err(e) => error!(unit = %self.name, %task, error = %e, "failed to stop task"),
            }
        }

        info!(unit = %self.name, tasks = tasks.len(), "stopped tasks");

        // Only the latest stopped batch waits for dispose; older ones were
        // replaced by a reload and are released now.
        let earlier = std::mem::replace(&mut *self.retired.lock(), tasks.to_vec());
        let earlier = excluding(earlier, &tasks);
        if !earlier.is_empty() {
            debug!(unit = %self.name, tasks = earlier.len(), "releasing an earlier stopped batch");
            self.dispose_all(&earlier).await;
        }
    }

    /// Cancel pending starts and dispose every task concurrently.
    /// Safe to call repeatedly.
    pub async fn dispose(&self) {
        self.starter.dispose();

        let mut doomed = std::mem::take(&mut *self.retired.lock());
        if let Some(loaded) = self.tasks.write().take() {
            doomed = excluding(doomed, &loaded);
            doomed.extend(loaded.iter().cloned());
        }
        if doomed.is_empty() {
            return;
        }
        self.dispose_all(&doomed).await;
    }

    async fn dispose_all(&self, tasks: &[TaskRef]) {
        let results = fan_out(&self.handle, tasks, |task| async move { task.dispose().await }).await;
        for (task, result) in results {
            if let Err(e) = result {
                error!(unit = %self.name, %task, error = %e, "error while disposing of task");
            }
        }
        debug!(unit = %self.name, tasks = tasks.len(), "tasks disposed");
    }
}

/// `tasks` minus any instance also present in `other`.
fn excluding(mut tasks: Vec<TaskRef>, other: &[TaskRef]) -> Vec<TaskRef> {
    tasks.retain(|task| !other.iter().any(|o| Arc::ptr_eq(task, o)));
    tasks
}

/// Run `op` for every task on its own runtime task and wait for all of them.
async fn fan_out<T, F, Fut>(handle: &Handle, tasks: &[TaskRef], op: F) -> Vec<(String, std::result::Result<T, JoinError>)>
where
    T: Send + 'static,
    F: Fn(TaskRef) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
{
    let mut set = JoinSet::new();
    let mut names = std::collections::HashMap::with_capacity(tasks.len());
    for task in tasks {
        let name = task.name().to_string();
        let id = set.spawn_on(op(task.clone()), handle).id();
        names.insert(id, name);
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, value)) => results.push((names.remove(&id).unwrap_or_default(), Ok(value))),
            Err(e) => results.push((names.remove(&e.id()).unwrap_or_default(), Err(e))),
        }
    }
    results
}

impl<C> Drop for UnitManager<C> {
    fn drop(&mut self) {
        let mut doomed = std::mem::take(self.retired.get_mut());
        if let Some(loaded) = self.tasks.get_mut().take() {
            doomed = excluding(doomed, &loaded);
            doomed.extend(loaded.iter().cloned());
        }
        if doomed.is_empty() {
            return;
        }

        warn!(
            unit = %self.name,
            tasks = doomed.len(),
            "unit manager dropped without dispose; disposing tasks in background"
        );
        self.handle.spawn(async move {
            for task in doomed {
                task.dispose().await;
            }
        });
    }
}

/// A unit manager is itself runnable, so managers can be nested and pooled.
/// Starting it loads tasks with `C::default()` as the passthrough.
impl<C> RunnableTask for UnitManager<C>
where
    C: Default + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        UnitManager::name(self)
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            let started = self.on_start(&C::default());
            self.run();
            started
        })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.on_stop().await;
            true
        })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { UnitManager::dispose(self).await })
    }

    fn scale(&self) -> Option<bool> {
        aggregate_signals(self.tasks().iter().map(|task| task.scale()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{as_task, Journal, RecordingTask};

    fn manager_with(tasks: Vec<Arc<RecordingTask>>) -> UnitManager<()> {
        UnitManager::builder()
            .name("test-unit")
            .stagger(Duration::from_millis(10))
            .factory(move |_: &()| tasks.iter().map(as_task).collect::<Vec<_>>())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn requires_a_factory() {
        let result = UnitManager::<()>::builder().build();
        assert!(matches!(result, Err(RoleworkError::NoFactories)));

        let result = UnitManager::<()>::new(Vec::new());
        assert!(matches!(result, Err(RoleworkError::NoFactories)));
    }

    #[tokio::test]
    async fn loads_tasks_only_once() {
        let journal = Journal::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (j, s) = (journal.clone(), seen.clone());

        let manager = UnitManager::builder()
            .factory(move |config: &String| {
                s.lock().push(config.clone());
                vec![as_task(&RecordingTask::new(config, &j))]
            })
            .build()
            .unwrap();

        assert!(manager.on_start(&"first".to_string()));
        assert!(manager.on_start(&"second".to_string()));

        assert_eq!(*seen.lock(), vec!["first".to_string()]);
        let tasks = manager.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "first");
        manager.dispose().await;
    }

    #[tokio::test]
    async fn flattens_every_factory() {
        let journal = Journal::default();
        let (a, b) = (journal.clone(), journal.clone());

        let manager = UnitManager::builder()
            .factory(move |_: &()| vec![as_task(&RecordingTask::new("a", &a))])
            .factory(|_: &()| Vec::<TaskRef>::new())
            .factory(move |_: &()| {
                vec![
                    as_task(&RecordingTask::new("b", &b)),
                    as_task(&RecordingTask::new("c", &b)),
                ]
            })
            .build()
            .unwrap();

        manager.on_start(&());
        let names: Vec<String> = manager.tasks().iter().map(|t| t.name().to_string()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_tasks_is_legal() {
        let manager = manager_with(Vec::new());

        manager.run();
        assert!(manager.on_start(&()));
        assert!(!manager.is_loaded());
        manager.run();
        manager.on_stop().await;
        manager.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn run_starts_loaded_tasks() {
        let journal = Journal::default();
        let tasks = vec![
            RecordingTask::new("one", &journal),
            RecordingTask::new("two", &journal),
        ];
        let manager = manager_with(tasks.clone());

        manager.run();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(journal.entries().is_empty());

        manager.on_start(&());
        manager.run();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(journal.entries(), vec!["start:one", "start:two"]);
        manager.dispose().await;
    }

    #[tokio::test]
    async fn stop_is_best_effort_and_clears_tasks() {
        let journal = Journal::default();
        let tasks = vec![
            RecordingTask::new("one", &journal),
            RecordingTask::panicking("bad", &journal, "stop"),
            RecordingTask::new("three", &journal),
        ];
        let manager = manager_with(tasks.clone());

        manager.on_start(&());
        manager.on_stop().await;

        for task in &tasks {
            assert_eq!(RecordingTask::count(&task.stops), 1);
        }
        assert!(manager.tasks().is_empty());

        // A later start reloads from the factories.
        manager.on_start(&());
        assert_eq!(manager.tasks().len(), 3);
        manager.on_stop().await;
        manager.on_start(&());
        manager.dispose().await;

        for task in &tasks {
            assert_eq!(RecordingTask::count(&task.disposals), 1);
        }
    }

    #[tokio::test]
    async fn dispose_releases_each_task_once() {
        let journal = Journal::default();
        let tasks = vec![
            RecordingTask::new("one", &journal),
            RecordingTask::panicking("bad", &journal, "dispose"),
        ];
        let manager = manager_with(tasks.clone());

        manager.on_start(&());
        manager.on_stop().await;
        manager.dispose().await;
        manager.dispose().await;

        for task in &tasks {
            assert_eq!(RecordingTask::count(&task.stops), 1);
            assert_eq!(RecordingTask::count(&task.disposals), 1);
        }
    }

    #[tokio::test]
    async fn repeated_stop_cycles_keep_only_the_latest_batch() {
        let journal = Journal::default();
        let created = Arc::new(Mutex::new(Vec::new()));
        let (j, c) = (journal.clone(), created.clone());

        let manager = UnitManager::builder()
            .factory(move |_: &()| {
                let task = RecordingTask::new("cycled", &j);
                c.lock().push(task.clone());
                vec![as_task(&task)]
            })
            .build()
            .unwrap();

        for _ in 0..3 {
            manager.on_start(&());
            manager.on_stop().await;
            assert_eq!(manager.retired.lock().len(), 1);
        }

        let created = created.lock().clone();
        assert_eq!(created.len(), 3);
        assert_eq!(RecordingTask::count(&created[0].disposals), 1);
        assert_eq!(RecordingTask::count(&created[1].disposals), 1);
        assert_eq!(RecordingTask::count(&created[2].disposals), 0);

        manager.dispose().await;
        for task in &created {
            assert_eq!(RecordingTask::count(&task.stops), 1);
            assert_eq!(RecordingTask::count(&task.disposals), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_without_dispose_still_disposes() {
        let journal = Journal::default();
        let task = RecordingTask::new("leaked", &journal);
        let manager = manager_with(vec![task.clone()]);

        manager.on_start(&());
        drop(manager);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(RecordingTask::count(&task.disposals), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn managers_nest_as_tasks() {
        let journal = Journal::default();
        let leaf = RecordingTask::with_signal("leaf", &journal, Some(true));
        let inner = Arc::new(manager_with(vec![leaf.clone()]));

        let inner_task: TaskRef = inner.clone();
        let outer = UnitManager::builder()
            .stagger(Duration::from_millis(10))
            .factory(move |_: &()| vec![inner_task.clone()])
            .build()
            .unwrap();

        outer.on_start(&());
        outer.run();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(RecordingTask::count(&leaf.starts), 1);
        assert_eq!(inner.scale(), Some(true));

        outer.on_stop().await;
        assert_eq!(RecordingTask::count(&leaf.stops), 1);
        outer.dispose().await;
        assert_eq!(RecordingTask::count(&leaf.disposals), 1);
    }
}
