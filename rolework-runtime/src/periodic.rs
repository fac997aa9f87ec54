//! Periodic runner - a cancellable, single-flight recurring timer.
//!
//! Each tick is spawned off the timer loop, so a slow action never delays the
//! timer itself. A tick that fires while the previous one is still running is
//! dropped, not queued.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Result, RoleworkError};
use crate::runnable::{BoxFuture, RunnableTask};

/// Action executed on every tick
pub type TickAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Result of one guarded invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The action ran and returned `Ok`.
    Completed,
    /// The action returned an error or panicked. Already logged.
    Failed,
    /// A previous tick was still in flight.
    Skipped,
}

struct Shared {
    name: String,
    action: TickAction,
    in_flight: AtomicBool,
    handle: Handle,
}

/// Clears the in-flight flag on every exit path, including cancellation.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    async fn invoke(&self) -> TickOutcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!(runner = %self.name, "previous tick still running, skipping");
            return TickOutcome::Skipped;
        };

        // Spawned so a panicking action surfaces as a JoinError.
        match self.handle.spawn((self.action)()).await {
            Ok(Ok(())) => TickOutcome::Completed,
            Ok(Err(e)) => {
                error!(runner = %self.name, error = %e, "tick failed");
                TickOutcome::Failed
            }
            Err(e) => {
                error!(runner = %self.name, error = %e, "tick panicked");
                TickOutcome::Failed
            }
        }
    }
}

async fn timer_loop(shared: Arc<Shared>, mut period: watch::Receiver<Duration>, initial_delay: Duration) {
    if !initial_delay.is_zero() {
        tokio::time::sleep(initial_delay).await;
    }

    loop {
        let tick = shared.clone();
        shared.handle.spawn(async move {
            tick.invoke().await;
        });

        let wait = *period.borrow_and_update();
        tokio::time::sleep(wait).await;
    }
}

/// Invokes an action on a fixed period until stopped, at most one at a time.
///
/// # Example
///
/// ```rust,no_run
/// use rolework_runtime::PeriodicRunner;
/// use std::time::Duration;
///
/// # async fn demo() -> rolework_runtime::Result<()> {
/// let runner = PeriodicRunner::builder("heartbeat", Duration::from_secs(5))
///     .initial_delay(Duration::from_secs(1))
///     .build(|| async {
///         tracing::info!("still alive");
///         Ok(())
///     })?;
///
/// runner.start();
/// # Ok(())
/// # }
/// ```
pub struct PeriodicRunner {
    shared: Arc<Shared>,
    timing: TimingHandle,
    initial_delay: Duration,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for PeriodicRunner
pub struct PeriodicRunnerBuilder {
    name: String,
    period: Duration,
    initial_delay: Duration,
    handle: Option<Handle>,
}

impl PeriodicRunnerBuilder {
    /// Delay before the first tick. Defaults to zero.
    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Runtime that drives the timer and the ticks.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build<F, Fut>(self, action: F) -> Result<PeriodicRunner>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.build_with(move |_| {
            Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(action()) })
        })
    }

    /// Build with an action that can retime its own runner.
    pub(crate) fn build_with<M>(self, make_action: M) -> Result<PeriodicRunner>
    where
        M: FnOnce(TimingHandle) -> TickAction,
    {
        validate_period(self.period)?;
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|_| RoleworkError::NoRuntime)?,
        };

        let timing = TimingHandle {
            name: self.name.clone(),
            period: Arc::new(watch::channel(self.period).0),
        };
        let action = make_action(timing.clone());

        Ok(PeriodicRunner {
            shared: Arc::new(Shared {
                name: self.name,
                action,
                in_flight: AtomicBool::new(false),
                handle,
            }),
            timing,
            initial_delay: self.initial_delay,
            timer: Mutex::new(None),
        })
    }
}

/// Shared access to a runner's period.
#[derive(Clone)]
pub struct TimingHandle {
    name: String,
    period: Arc<watch::Sender<Duration>>,
}

impl TimingHandle {
    pub fn period(&self) -> Duration {
        *self.period.borrow()
    }

    /// Change the period; a running timer picks it up on its next tick.
    pub fn change_timing(&self, period: Duration) -> Result<()> {
        validate_period(period)?;
        let previous = self.period.send_replace(period);
        if previous != period {
            debug!(
                runner = %self.name,
                from_ms = previous.as_millis() as u64,
                to_ms = period.as_millis() as u64,
                "timing changed"
            );
        }
        Ok(())
    }
}

fn validate_period(period: Duration) -> Result<()> {
    if period.is_zero() {
        return Err(RoleworkError::InvalidPeriod(period));
    }
    Ok(())
}

impl PeriodicRunner {
    /// Create a new builder for PeriodicRunner
    pub fn builder(name: impl Into<String>, period: Duration) -> PeriodicRunnerBuilder {
        PeriodicRunnerBuilder {
            name: name.into(),
            period,
            initial_delay: Duration::ZERO,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current period.
    pub fn period(&self) -> Duration {
        self.timing.period()
    }

    pub fn timing(&self) -> TimingHandle {
        self.timing.clone()
    }

    /// Whether the timer is armed.
    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Arm the timer. Starting an armed runner is a no-op.
    pub fn start(&self) -> bool {
        let mut timer = self.timer.lock();
        if timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return true;
        }

        let shared = self.shared.clone();
        let period = self.timing.period.subscribe();
        *timer = Some(
            self.shared
                .handle
                .spawn(timer_loop(shared, period, self.initial_delay)),
        );

        info!(
            runner = %self.shared.name,
            period_ms = self.period().as_millis() as u64,
            initial_delay_ms = self.initial_delay.as_millis() as u64,
            "periodic runner started"
        );
        true
    }

    /// Disarm the timer. A tick already in flight runs to completion.
    pub fn stop(&self) -> bool {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
            info!(runner = %self.shared.name, "periodic runner stopped");
        }
        true
    }

    /// Change the period; the running timer picks it up on its next tick.
    pub fn change_timing(&self, period: Duration) -> Result<()> {
        self.timing.change_timing(period)
    }

    /// Run one guarded tick now, outside the timer.
    pub async fn invoke(&self) -> TickOutcome {
        self.shared.invoke().await
    }

    /// Disarm and release the timer. Safe to call repeatedly.
    pub fn dispose(&self) {
        self.stop();
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

impl RunnableTask for PeriodicRunner {
    fn name(&self) -> &str {
        PeriodicRunner::name(self)
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { PeriodicRunner::start(self) })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { PeriodicRunner::stop(self) })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { PeriodicRunner::dispose(self) })
    }
}
