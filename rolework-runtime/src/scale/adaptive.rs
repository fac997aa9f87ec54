//! Adaptive polling: back off while idle, snap back when work shows up.
//!
//! The same busy/idle streaks feed a scale signal, which makes an adaptive
//! task a natural load gauge inside a scaled unit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{Result, RoleworkError};
use crate::periodic::{PeriodicRunner, TickAction, TickOutcome};
use crate::runnable::{BoxFuture, RunnableTask};

/// Consecutive ticks in one direction before the signal fires
pub const DEFAULT_THRESHOLD: u32 = 3;

/// Exponential backoff between a minimum and a maximum period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    minimum: Duration,
    maximum: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(minimum: Duration, maximum: Duration) -> Result<Self> {
        if minimum.is_zero() {
            return Err(RoleworkError::InvalidPeriod(minimum));
        }
        if minimum > maximum {
            return Err(RoleworkError::InvalidBackoff { minimum, maximum });
        }

        Ok(Self {
            minimum,
            maximum,
            current: minimum,
        })
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Reset to the minimum after work, double (capped) after an idle pass.
    pub fn next(&mut self, worked: bool) -> Duration {
        self.current = if worked {
            self.minimum
        } else {
            self.current
                .checked_mul(2)
                .map_or(self.maximum, |doubled| doubled.min(self.maximum))
        };
        self.current
    }
}

#[derive(Default)]
struct Streaks {
    busy: u32,
    idle: u32,
}

struct AdaptiveState {
    backoff: Mutex<Backoff>,
    streaks: Mutex<Streaks>,
    threshold: u32,
}

impl AdaptiveState {
    /// Record one pass and return the period for the next one.
    fn record(&self, worked: bool) -> Duration {
        {
            let mut streaks = self.streaks.lock();
            if worked {
                streaks.busy = streaks.busy.saturating_add(1);
                streaks.idle = 0;
            } else {
                streaks.idle = streaks.idle.saturating_add(1);
                streaks.busy = 0;
            }
        }
        self.backoff.lock().next(worked)
    }

    fn signal(&self) -> Option<bool> {
        let streaks = self.streaks.lock();
        if streaks.busy >= self.threshold {
            Some(true)
        } else if streaks.idle >= self.threshold {
            Some(false)
        } else {
            None
        }
    }
}

/// Builder for AdaptiveTask
pub struct AdaptiveTaskBuilder {
    name: String,
    minimum: Duration,
    maximum: Duration,
    threshold: u32,
    handle: Option<Handle>,
}

impl AdaptiveTaskBuilder {
    /// Streak length that turns into a scale signal. Defaults to 3.
    pub fn threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Build around an action that reports whether it found work.
    pub fn build<F, Fut>(self, action: F) -> Result<AdaptiveTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        if self.threshold == 0 {
            return Err(RoleworkError::InvalidCount);
        }

        let state = Arc::new(AdaptiveState {
            backoff: Mutex::new(Backoff::new(self.minimum, self.maximum)?),
            streaks: Mutex::new(Streaks::default()),
            threshold: self.threshold,
        });

        let mut builder = PeriodicRunner::builder(self.name, self.minimum);
        if let Some(handle) = self.handle {
            builder = builder.runtime(handle);
        }

        let tick_state = state.clone();
        let runner = builder.build_with(move |timing| -> TickAction {
            Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
                let state = tick_state.clone();
                let timing = timing.clone();
                let pass = action();
                Box::pin(async move {
                    let worked = pass.await?;
                    let period = state.record(worked);
                    if period != timing.period() {
                        debug!(worked, period_ms = period.as_millis() as u64, "adapting poll period");
                    }
                    timing.change_timing(period)?;
                    Ok(())
                })
            })
        })?;

        Ok(AdaptiveTask { runner, state })
    }
}

/// Recurring task whose period follows its own workload.
///
/// # Example
///
/// ```rust,no_run
/// use rolework_runtime::AdaptiveTask;
/// use std::time::Duration;
///
/// # async fn poll_inbox() -> anyhow::Result<bool> { Ok(false) }
/// # async fn demo() -> rolework_runtime::Result<()> {
/// let poller = AdaptiveTask::builder("inbox", Duration::from_secs(1), Duration::from_secs(60))
///     .threshold(5)
///     .build(|| poll_inbox())?;
///
/// poller.start();
/// # Ok(())
/// # }
/// ```
pub struct AdaptiveTask {
    runner: PeriodicRunner,
    state: Arc<AdaptiveState>,
}

impl AdaptiveTask {
    pub fn builder(name: impl Into<String>, minimum: Duration, maximum: Duration) -> AdaptiveTaskBuilder {
        AdaptiveTaskBuilder {
            name: name.into(),
            minimum,
            maximum,
            threshold: DEFAULT_THRESHOLD,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        self.runner.name()
    }

    /// Period the next tick will wait.
    pub fn period(&self) -> Duration {
        self.runner.period()
    }

    /// `Some(true)` after a busy streak, `Some(false)` after an idle streak.
    pub fn signal(&self) -> Option<bool> {
        self.state.signal()
    }

    pub fn start(&self) -> bool {
        self.runner.start()
    }

    pub fn stop(&self) -> bool {
        self.runner.stop()
    }

    pub async fn invoke(&self) -> TickOutcome {
        self.runner.invoke().await
    }

    pub fn dispose(&self) {
        self.runner.dispose();
    }
}

impl RunnableTask for AdaptiveTask {
    fn name(&self) -> &str {
        AdaptiveTask::name(self)
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { AdaptiveTask::start(self) })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { AdaptiveTask::stop(self) })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { AdaptiveTask::dispose(self) })
    }

    fn scale(&self) -> Option<bool> {
        self.signal()
    }
}
