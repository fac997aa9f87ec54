//! Run coordination for jobs that must not run more often than their period,
//! even when several processes host the same job.
//!
//! A [`Coordinator`] is asked before every run and told about its start and
//! completion. [`InMemoryCoordinator`] implements the rules for a single
//! process; a shared store can implement the same trait.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{require_name, Result, RoleworkError};
use crate::periodic::{PeriodicRunner, TickOutcome};
use crate::runnable::{BoxFuture, RunnableTask};

/// Decides whether a job may run and records what happened.
pub trait Coordinator: Send + Sync {
    fn check<'a>(&'a self, job: &'a str) -> BoxFuture<'a, anyhow::Result<bool>>;

    fn start<'a>(&'a self, job: &'a str, run_id: Uuid, started_at: DateTime<Utc>) -> BoxFuture<'a, anyhow::Result<()>>;

    fn complete<'a>(
        &'a self,
        job: &'a str,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        success: bool,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Latest known run of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: Option<bool>,
}

/// Process-local coordinator.
///
/// A job may run when it has no record, when its last run failed, when its
/// last successful run completed at least one period ago, or when an
/// unfinished run started at least one period ago (presumed dead).
pub struct InMemoryCoordinator {
    period: chrono::Duration,
    runs: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryCoordinator {
    pub fn new(period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(RoleworkError::InvalidPeriod(period));
        }
        let period = chrono::Duration::from_std(period).map_err(|_| RoleworkError::InvalidPeriod(period))?;

        Ok(Self {
            period,
            runs: Mutex::new(HashMap::new()),
        })
    }

    pub fn latest(&self, job: &str) -> Option<RunRecord> {
        self.runs.lock().get(job).cloned()
    }

    pub fn may_run(&self, job: &str, now: DateTime<Utc>) -> bool {
        let runs = self.runs.lock();
        let Some(run) = runs.get(job) else {
            return true;
        };

        match (run.completed_at, run.success) {
            (Some(_), Some(false)) => true,
            (Some(completed_at), _) => completed_at + self.period <= now,
            (None, _) => run.started_at + self.period <= now,
        }
    }
}

impl Coordinator for InMemoryCoordinator {
    fn check<'a>(&'a self, job: &'a str) -> BoxFuture<'a, anyhow::Result<bool>> {
        Box::pin(async move { Ok(self.may_run(job, Utc::now())) })
    }

    fn start<'a>(&'a self, job: &'a str, run_id: Uuid, started_at: DateTime<Utc>) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            self.runs.lock().insert(
                job.to_string(),
                RunRecord {
                    run_id,
                    started_at,
                    completed_at: None,
                    success: None,
                },
            );
            Ok(())
        })
    }

    fn complete<'a>(
        &'a self,
        job: &'a str,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        success: bool,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            match self.runs.lock().get_mut(job) {
                Some(run) if run.run_id == run_id => {
                    run.started_at = started_at;
                    run.completed_at = Some(completed_at);
                    run.success = Some(success);
                }
                _ => warn!(job, %run_id, "completion for a run that is no longer the latest"),
            }
            Ok(())
        })
    }
}

async fn run_coordinated<Fut>(coordinator: &dyn Coordinator, job: &str, pass: impl FnOnce() -> Fut) -> anyhow::Result<()>
where
    Fut: Future<Output = anyhow::Result<()>>,
{
    if !coordinator.check(job).await? {
        debug!(job, "coordinator declined the run");
        return Ok(());
    }

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    coordinator.start(job, run_id, started_at).await?;
    let result = pass().await;
    coordinator
        .complete(job, run_id, started_at, Utc::now(), result.is_ok())
        .await?;
    result
}

/// Builder for CoordinatedTask
pub struct CoordinatedTaskBuilder {
    name: String,
    period: Duration,
    coordinator: Arc<dyn Coordinator>,
    initial_delay: Duration,
    handle: Option<Handle>,
}

impl CoordinatedTaskBuilder {
    pub fn initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build<F, Fut>(self, action: F) -> Result<CoordinatedTask>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        require_name(&self.name, "job name")?;

        let mut builder = PeriodicRunner::builder(self.name.clone(), self.period).initial_delay(self.initial_delay);
        if let Some(handle) = self.handle {
            builder = builder.runtime(handle);
        }

        let action = Arc::new(action);
        let coordinator = self.coordinator.clone();
        let job = self.name;
        let runner = builder.build(move || {
            let (action, coordinator, job) = (action.clone(), coordinator.clone(), job.clone());
            async move { run_coordinated(coordinator.as_ref(), &job, || (*action)()).await }
        })?;

        Ok(CoordinatedTask {
            runner,
            coordinator: self.coordinator,
        })
    }
}

/// Recurring job gated by a [`Coordinator`].
pub struct CoordinatedTask {
    runner: PeriodicRunner,
    coordinator: Arc<dyn Coordinator>,
}

impl CoordinatedTask {
    pub fn builder(name: impl Into<String>, period: Duration, coordinator: Arc<dyn Coordinator>) -> CoordinatedTaskBuilder {
        CoordinatedTaskBuilder {
            name: name.into(),
            period,
            coordinator,
            initial_delay: Duration::ZERO,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        self.runner.name()
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    pub async fn invoke(&self) -> TickOutcome {
        self.runner.invoke().await
    }
}

impl RunnableTask for CoordinatedTask {
    fn name(&self) -> &str {
        CoordinatedTask::name(self)
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.runner.start() })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move { self.runner.stop() })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.runner.dispose() })
    }
}
