//! Pool of running units.
//!
//! Units are homogeneous, so the pool is a stack: scale-down removes the most
//! recently added unit unless one carrying the requested name exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::error::{require_name, Result, RoleworkError};
use crate::manager::UnitManager;
use crate::runnable::{BoxFuture, TaskFactory};
use crate::starter::DEFAULT_STAGGER;

use super::aggregate_signals;

/// Operations the control loop needs from a pool.
///
/// [`Pool`] is the real implementation; tests substitute recording fakes.
pub trait Scaler<C>: Send + Sync {
    /// Number of units currently pooled
    fn current_units(&self) -> usize;

    /// Scale up `count` times, naming units `<name_prefix>-<n>`.
    fn initialize(&self, count: usize, factory: Arc<dyn TaskFactory<C>>, config: &C, name_prefix: &str) -> Result<()>;

    /// Build, start and push one unit.
    fn scale_up(&self, factory: Arc<dyn TaskFactory<C>>, config: &C, name: &str) -> Result<()>;

    /// Pop one unit, then stop and dispose it.
    fn scale_down<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>>;

    /// True while nothing has been initialized.
    fn is_first_run(&self, minimum: usize) -> bool;

    /// Aggregate scale signal over every pooled task.
    fn should_scale(&self) -> Option<bool>;

    /// Stop and dispose every unit.
    fn dispose(&self) -> BoxFuture<'_, ()>;
}

/// One running entry in the pool.
pub struct ScaledUnit<C> {
    name: String,
    label: String,
    id: u64,
    manager: UnitManager<C>,
}

impl<C: Send + Sync + 'static> ScaledUnit<C> {
    /// `<label>#<id>`, unique for the lifetime of the pool.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name the unit was requested under. Not necessarily unique.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sequence number, unique for the lifetime of the pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn manager(&self) -> &UnitManager<C> {
        &self.manager
    }

    async fn retire(&self) {
        self.manager.on_stop().await;
        self.manager.dispose().await;
    }
}

/// Thread-safe stack of running unit managers.
pub struct Pool<C> {
    units: Mutex<Vec<Arc<ScaledUnit<C>>>>,
    next_id: AtomicU64,
    stagger: Duration,
    handle: Handle,
}

impl<C: Send + Sync + 'static> Pool<C> {
    /// Pool bound to the current runtime.
    pub fn new() -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| RoleworkError::NoRuntime)?;
        Ok(Self::with_runtime(handle))
    }

    pub fn with_runtime(handle: Handle) -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            stagger: DEFAULT_STAGGER,
            handle,
        }
    }

    /// Stagger used by the unit managers this pool creates.
    pub fn stagger(mut self, stagger: Duration) -> Result<Self> {
        if stagger.is_zero() {
            return Err(RoleworkError::InvalidPeriod(stagger));
        }
        self.stagger = stagger;
        Ok(self)
    }

    /// Snapshot of the pooled units, oldest first.
    pub fn units(&self) -> Vec<Arc<ScaledUnit<C>>> {
        self.units.lock().clone()
    }

    fn take(&self, name: &str) -> Option<Arc<ScaledUnit<C>>> {
        let mut units = self.units.lock();
        match units
            .iter()
            .rposition(|unit| unit.name == name || unit.label == name)
        {
            Some(position) => Some(units.remove(position)),
            None => units.pop(),
        }
    }
}

impl<C: Send + Sync + 'static> Scaler<C> for Pool<C> {
    fn current_units(&self) -> usize {
        self.units.lock().len()
    }

    fn initialize(&self, count: usize, factory: Arc<dyn TaskFactory<C>>, config: &C, name_prefix: &str) -> Result<()> {
        if count == 0 {
            return Err(RoleworkError::InvalidCount);
        }
        require_name(name_prefix, "name prefix")?;

        for n in 0..count {
            self.scale_up(factory.clone(), config, &format!("{name_prefix}-{n}"))?;
        }
        info!(units = self.current_units(), "pool initialized");
        Ok(())
    }

    fn scale_up(&self, factory: Arc<dyn TaskFactory<C>>, config: &C, name: &str) -> Result<()> {
        require_name(name, "unit name")?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let unique = format!("{name}#{id}");
        let manager = UnitManager::builder()
            .name(unique.clone())
            .stagger(self.stagger)
            .runtime(self.handle.clone())
            .shared_factory(factory)
            .build()?;

        manager.on_start(config);
        manager.run();

        let units = {
            let mut units = self.units.lock();
            units.push(Arc::new(ScaledUnit {
                name: unique.clone(),
                label: name.to_string(),
                id,
                manager,
            }));
            units.len()
        };
        info!(unit = %unique, units, "scaled up");
        Ok(())
    }

    fn scale_down<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            require_name(name, "unit name")?;

            let Some(unit) = self.take(name) else {
                debug!(unit = %name, "pool is empty, nothing to scale down");
                return Ok(());
            };

            unit.retire().await;
            info!(
                unit = %unit.name,
                units = self.current_units(),
                "scaled down"
            );
            Ok(())
        })
    }

    fn is_first_run(&self, _minimum: usize) -> bool {
        self.current_units() == 0
    }

    fn should_scale(&self) -> Option<bool> {
        let units = self.units();
        aggregate_signals(
            units
                .iter()
                .flat_map(|unit| unit.manager.tasks())
                .map(|task| task.scale()),
        )
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let units = std::mem::take(&mut *self.units.lock());
            if units.is_empty() {
                return;
            }

            let count = units.len();
            for unit in units.into_iter().rev() {
                unit.retire().await;
            }
            info!(units = count, "pool disposed");
        })
    }
}
