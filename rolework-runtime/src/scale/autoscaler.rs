//! AutoScaler - the control loop that keeps a pool within its bounds.
//!
//! Every tick makes at most one decision:
//!
//! ```text
//! pool empty (first run)            -> initialize(minimum)
//! signal = grow   and units < max   -> scale_up
//! signal = shrink and units > min   -> scale_down
//! anything else                     -> hold
//! ```
//!
//! Ticks go through the periodic runner's single-flight guard, so decisions
//! never interleave.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ScalingSettings;
use crate::error::{Result, RoleworkError};
use crate::periodic::{PeriodicRunner, TickOutcome};
use crate::runnable::{BoxFuture, RunnableTask, TaskFactory, TaskRef};
use crate::starter::DEFAULT_STAGGER;

use super::bounds::InstanceBounds;
use super::pool::{Pool, Scaler};

/// How often the control loop checks the pool by default
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(20 * 60);

struct ScaleControl<C> {
    name: String,
    pool: Arc<dyn Scaler<C>>,
    bounds: InstanceBounds,
    config: C,
    unit: Arc<dyn TaskFactory<C>>,
}

impl<C: Send + Sync + 'static> ScaleControl<C> {
    fn unit_name(&self) -> String {
        format!("{}-{}", self.name, Uuid::new_v4())
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let minimum = self.bounds.minimum();
        let maximum = self.bounds.maximum();

        if self.pool.is_first_run(minimum) {
            if minimum == 0 {
                debug!(scaler = %self.name, "nothing to bootstrap");
                return Ok(());
            }
            self.pool
                .initialize(minimum, self.unit.clone(), &self.config, &self.unit_name())?;
            info!(scaler = %self.name, units = minimum, "pool bootstrapped to minimum");
            return Ok(());
        }

        let signal = self.pool.should_scale();
        match signal {
            Some(true) if self.pool.current_units() < maximum => {
                self.pool
                    .scale_up(self.unit.clone(), &self.config, &self.unit_name())?;
                debug!(scaler = %self.name, units = self.pool.current_units(), maximum, "scaled up");
            }
            Some(false) if self.pool.current_units() > minimum => {
                self.pool.scale_down(&self.unit_name()).await?;
                debug!(scaler = %self.name, units = self.pool.current_units(), minimum, "scaled down");
            }
            _ => {
                debug!(
                    scaler = %self.name,
                    ?signal,
                    units = self.pool.current_units(),
                    minimum,
                    maximum,
                    "holding steady"
                );
            }
        }

        Ok(())
    }
}

/// Builder for AutoScaler
pub struct AutoScalerBuilder<C> {
    name: String,
    config: C,
    unit: Arc<dyn TaskFactory<C>>,
    minimum: usize,
    maximum: usize,
    check_interval: Duration,
    stagger: Duration,
    pool: Option<Arc<dyn Scaler<C>>>,
    handle: Option<Handle>,
}

impl<C: Send + Sync + 'static> AutoScalerBuilder<C> {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Pool size bounds. Defaults to `[1, 2]`.
    pub fn bounds(mut self, minimum: usize, maximum: usize) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn check_interval_minutes(self, minutes: u64) -> Self {
        self.check_interval(Duration::from_secs(minutes.saturating_mul(60)))
    }

    /// Stagger for the task starts inside each scaled unit.
    pub fn stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Replace the default [`Pool`].
    pub fn pool(mut self, pool: Arc<dyn Scaler<C>>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Apply bounds, check interval and stagger from settings.
    pub fn settings(self, settings: &ScalingSettings) -> Result<Self> {
        Ok(self
            .bounds(settings.minimum, settings.maximum)
            .check_interval(settings.check_interval()?)
            .stagger(settings.stagger_offset()?))
    }

    pub fn build(self) -> Result<AutoScaler<C>> {
        let bounds = InstanceBounds::new(self.minimum, self.maximum)?;
        if self.stagger.is_zero() {
            return Err(RoleworkError::InvalidPeriod(self.stagger));
        }
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RoleworkError::NoRuntime)?,
        };

        let pool = match self.pool {
            Some(pool) => pool,
            None => Arc::new(Pool::with_runtime(handle.clone()).stagger(self.stagger)?),
        };

        let control = Arc::new(ScaleControl {
            name: self.name.clone(),
            pool,
            bounds,
            config: self.config,
            unit: self.unit,
        });

        let tick = control.clone();
        let runner = PeriodicRunner::builder(self.name, self.check_interval)
            .runtime(handle)
            .build(move || {
                let control = tick.clone();
                async move { control.tick().await }
            })?;

        Ok(AutoScaler { runner, control })
    }
}

/// Elastic control loop over a private pool of scaled units.
///
/// The scaled unit's work is described by the `unit` factory; the scaler is
/// itself a [`TaskFactory`] producing exactly that work, and a
/// [`RunnableTask`] that a host unit manager can start and stop.
///
/// # Example
///
/// ```rust,no_run
/// use rolework_runtime::{AutoScaler, RunnableTask, TaskRef};
/// use std::sync::Arc;
///
/// # fn queue_worker(_: &String) -> Vec<TaskRef> { Vec::new() }
/// # async fn demo() -> rolework_runtime::Result<()> {
/// let scaler = AutoScaler::builder("orders-queue".to_string(), queue_worker)
///     .name("order-workers")
///     .bounds(1, 8)
///     .check_interval_minutes(2)
///     .build()?;
///
/// let scaler: TaskRef = Arc::new(scaler);
/// scaler.start().await;
/// # Ok(())
/// # }
/// ```
pub struct AutoScaler<C> {
    runner: PeriodicRunner,
    control: Arc<ScaleControl<C>>,
}

impl<C: Send + Sync + 'static> AutoScaler<C> {
    /// Create a new builder. `config` is passed to every scaled unit.
    pub fn builder<F>(config: C, unit: F) -> AutoScalerBuilder<C>
    where
        F: TaskFactory<C> + 'static,
    {
        AutoScalerBuilder {
            name: "autoscaler".to_string(),
            config,
            unit: Arc::new(unit),
            minimum: InstanceBounds::default().minimum(),
            maximum: InstanceBounds::default().maximum(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            stagger: DEFAULT_STAGGER,
            pool: None,
            handle: None,
        }
    }

    /// Build a scaler entirely from settings.
    pub fn from_settings<F>(config: C, unit: F, settings: &ScalingSettings) -> Result<Self>
    where
        F: TaskFactory<C> + 'static,
    {
        Self::builder(config, unit).settings(settings)?.build()
    }

    pub fn name(&self) -> &str {
        &self.control.name
    }

    pub fn bounds(&self) -> InstanceBounds {
        self.control.bounds
    }

    pub fn configuration(&self) -> &C {
        &self.control.config
    }

    pub fn pool(&self) -> &Arc<dyn Scaler<C>> {
        &self.control.pool
    }

    pub fn runner(&self) -> &PeriodicRunner {
        &self.runner
    }

    /// Tasks for one scaled unit.
    pub fn scale_unit(&self, config: &C) -> Vec<TaskRef> {
        self.control.unit.tasks(config)
    }

    /// Evaluate the pool once, through the single-flight guard.
    pub async fn run_once(&self) -> TickOutcome {
        self.runner.invoke().await
    }

    /// Stop the control loop and tear down every pooled unit.
    pub async fn dispose(&self) {
        self.runner.dispose();
        self.control.pool.dispose().await;
    }
}

impl<C: Send + Sync + 'static> TaskFactory<C> for AutoScaler<C> {
    fn tasks(&self, config: &C) -> Vec<TaskRef> {
        self.scale_unit(config)
    }
}

impl<C: Send + Sync + 'static> RunnableTask for AutoScaler<C> {
    fn name(&self) -> &str {
        AutoScaler::name(self)
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.runner.start() })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.runner.stop() })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { AutoScaler::dispose(self).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{as_task, Journal, RecordingTask};
    use parking_lot::Mutex;

    /// Scripted pool that records every call.
    struct FakePool {
        first_run: bool,
        signal: Option<bool>,
        units: usize,
        calls: Mutex<Vec<String>>,
    }

    impl FakePool {
        fn new(first_run: bool, signal: Option<bool>, units: usize) -> Arc<Self> {
            Arc::new(Self {
                first_run,
                signal,
                units,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn called(&self, op: &str) -> usize {
            self.calls.lock().iter().filter(|c| c.starts_with(op)).count()
        }
    }

    impl Scaler<String> for FakePool {
        fn current_units(&self) -> usize {
            self.units
        }

        fn initialize(&self, count: usize, _: Arc<dyn TaskFactory<String>>, config: &String, prefix: &str) -> Result<()> {
            assert!(!prefix.is_empty());
            self.calls.lock().push(format!("initialize:{count}:{config}"));
            Ok(())
        }

        fn scale_up(&self, _: Arc<dyn TaskFactory<String>>, config: &String, name: &str) -> Result<()> {
            assert!(!name.is_empty());
            self.calls.lock().push(format!("scale_up:{config}"));
            Ok(())
        }

        fn scale_down<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                assert!(!name.is_empty());
                self.calls.lock().push("scale_down".to_string());
                Ok(())
            })
        }

        fn is_first_run(&self, minimum: usize) -> bool {
            self.calls.lock().push(format!("is_first_run:{minimum}"));
            self.first_run
        }

        fn should_scale(&self) -> Option<bool> {
            self.calls.lock().push("should_scale".to_string());
            self.signal
        }

        fn dispose(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.calls.lock().push("dispose".to_string());
            })
        }
    }

    fn scaler_with(pool: Arc<FakePool>) -> AutoScaler<String> {
        AutoScaler::builder("cfg".to_string(), |_: &String| Vec::<TaskRef>::new())
            .bounds(1, 2)
            .pool(pool)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn minimum_above_maximum_fails() {
        let result = AutoScaler::builder((), |_: &()| Vec::<TaskRef>::new())
            .bounds(100, 1)
            .build();
        assert!(matches!(result, Err(RoleworkError::InvalidBounds { .. })));
    }

    #[tokio::test]
    async fn zero_minimum_is_legal() {
        let scaler = AutoScaler::builder((), |_: &()| Vec::<TaskRef>::new())
            .bounds(0, 1)
            .build()
            .unwrap();
        assert_eq!(scaler.bounds().minimum(), 0);
    }

    #[tokio::test]
    async fn zero_check_interval_fails() {
        let result = AutoScaler::builder((), |_: &()| Vec::<TaskRef>::new())
            .check_interval(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(RoleworkError::InvalidPeriod(_))));
    }

    #[tokio::test]
    async fn exposes_bounds_and_defaults() {
        let scaler = AutoScaler::builder((), |_: &()| Vec::<TaskRef>::new())
            .build()
            .unwrap();
        assert_eq!(scaler.bounds(), InstanceBounds::new(1, 2).unwrap());
        assert_eq!(scaler.runner().period(), DEFAULT_CHECK_INTERVAL);

        let scaler = AutoScaler::builder((), |_: &()| Vec::<TaskRef>::new())
            .bounds(100, 150)
            .check_interval_minutes(5)
            .build()
            .unwrap();
        assert_eq!(scaler.bounds().maximum(), 150);
        assert_eq!(scaler.runner().period(), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn produces_scaled_unit_tasks_with_config() {
        let journal = Journal::default();
        let seen = Arc::new(Mutex::new(None));
        let (j, s) = (journal.clone(), seen.clone());

        let scaler = AutoScaler::builder("cfg".to_string(), move |config: &String| {
            *s.lock() = Some(config.clone());
            vec![as_task(&RecordingTask::new("unit-work", &j))]
        })
        .build()
        .unwrap();

        let tasks = TaskFactory::tasks(&scaler, &"passed".to_string());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "unit-work");
        assert_eq!(seen.lock().as_deref(), Some("passed"));
    }

    #[tokio::test]
    async fn first_run_initializes_only() {
        let pool = FakePool::new(true, Some(true), 0);
        let scaler = scaler_with(pool.clone());

        assert_eq!(scaler.run_once().await, TickOutcome::Completed);

        assert_eq!(pool.called("is_first_run:1"), 1);
        assert_eq!(pool.called("initialize:1:cfg"), 1);
        assert_eq!(pool.called("scale_up"), 0);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn first_run_with_zero_minimum_does_nothing_else() {
        let pool = FakePool::new(true, Some(true), 0);
        let scaler = AutoScaler::builder("cfg".to_string(), |_: &String| Vec::<TaskRef>::new())
            .bounds(0, 2)
            .pool(pool.clone())
            .build()
            .unwrap();

        assert_eq!(scaler.run_once().await, TickOutcome::Completed);

        assert_eq!(pool.called("is_first_run:0"), 1);
        assert_eq!(pool.called("initialize"), 0);
        assert_eq!(pool.called("should_scale"), 0);
        assert_eq!(pool.called("scale_up"), 0);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn grows_below_maximum() {
        let pool = FakePool::new(false, Some(true), 0);
        let scaler = scaler_with(pool.clone());

        scaler.run_once().await;

        assert_eq!(pool.called("should_scale"), 1);
        assert_eq!(pool.called("scale_up:cfg"), 1);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn shrinks_above_minimum() {
        let pool = FakePool::new(false, Some(false), 100);
        let scaler = scaler_with(pool.clone());

        scaler.run_once().await;

        assert_eq!(pool.called("scale_down"), 1);
        assert_eq!(pool.called("scale_up"), 0);
    }

    #[tokio::test]
    async fn holds_without_signal() {
        let pool = FakePool::new(false, None, 1);
        let scaler = scaler_with(pool.clone());

        scaler.run_once().await;

        assert_eq!(pool.called("is_first_run"), 1);
        assert_eq!(pool.called("scale_up"), 0);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn holds_at_maximum() {
        let pool = FakePool::new(false, Some(true), 2);
        let scaler = scaler_with(pool.clone());

        scaler.run_once().await;

        assert_eq!(pool.called("scale_up"), 0);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn holds_at_minimum() {
        let pool = FakePool::new(false, Some(false), 1);
        let scaler = scaler_with(pool.clone());

        scaler.run_once().await;

        assert_eq!(pool.called("scale_up"), 0);
        assert_eq!(pool.called("scale_down"), 0);
    }

    #[tokio::test]
    async fn dispose_stops_loop_and_tears_down_pool() {
        let pool = FakePool::new(false, None, 0);
        let scaler = scaler_with(pool.clone());

        assert!(RunnableTask::start(&scaler).await);
        assert!(scaler.runner().is_running());

        RunnableTask::dispose(&scaler).await;
        assert!(!scaler.runner().is_running());
        assert_eq!(pool.called("dispose"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_drives_ticks() {
        let pool = FakePool::new(false, None, 1);
        let scaler = AutoScaler::builder("cfg".to_string(), |_: &String| Vec::<TaskRef>::new())
            .pool(pool.clone())
            .check_interval(Duration::from_secs(60))
            .build()
            .unwrap();

        RunnableTask::start(&scaler).await;
        tokio::time::sleep(Duration::from_secs(150)).await;
        RunnableTask::stop(&scaler).await;

        assert_eq!(pool.called("is_first_run"), 3);
    }
}
