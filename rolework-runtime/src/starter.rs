//! Staggered start of a batch of tasks.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{Result, RoleworkError};
use crate::runnable::TaskRef;

/// Default spacing between two task starts
pub const DEFAULT_STAGGER: Duration = Duration::from_secs(1);

/// Tasks waiting to start, and whether a stagger loop is draining them.
///
/// Both live under one lock so a loop never exits while a caller believes
/// it will pick up newly queued tasks.
#[derive(Default)]
struct Queue {
    tasks: VecDeque<TaskRef>,
    draining: bool,
}

/// Starts queued tasks one per `offset`, in queue order.
///
/// A failing start is logged and the queue moves on. Disposing the starter
/// drops whatever is still queued; tasks already started are untouched.
pub struct Starter {
    offset: Duration,
    handle: Handle,
    queue: Arc<Mutex<Queue>>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Starter {
    pub fn new(offset: Duration, handle: Handle) -> Result<Self> {
        if offset.is_zero() {
            return Err(RoleworkError::InvalidPeriod(offset));
        }

        Ok(Self {
            offset,
            handle,
            queue: Arc::new(Mutex::new(Queue::default())),
            timer: Mutex::new(None),
        })
    }

    pub fn offset(&self) -> Duration {
        self.offset
    }

    /// Number of tasks not yet started.
    pub fn pending(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Queue `tasks` and make sure the stagger loop is running.
    pub fn start(&self, tasks: impl IntoIterator<Item = TaskRef>) {
        let mut timer = self.timer.lock();
        let queued = {
            let mut queue = self.queue.lock();
            queue.tasks.extend(tasks);
            if queue.draining {
                debug!(queued = queue.tasks.len(), "stagger loop already running");
                return;
            }
            queue.draining = true;
            queue.tasks.len()
        };

        info!(
            queued,
            offset_ms = self.offset.as_millis() as u64,
            "starting tasks"
        );
        *timer = Some(self.handle.spawn(stagger(
            self.queue.clone(),
            self.offset,
            self.handle.clone(),
        )));
    }

    /// Cancel pending starts. Safe to call repeatedly.
    pub fn dispose(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }

        let dropped = {
            let mut queue = self.queue.lock();
            let dropped = queue.tasks.len();
            queue.tasks.clear();
            queue.draining = false;
            dropped
        };
        if dropped > 0 {
            debug!(dropped, "pending task starts cancelled");
        }
    }
}

impl Drop for Starter {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

async fn stagger(queue: Arc<Mutex<Queue>>, offset: Duration, handle: Handle) {
    let mut interval = tokio::time::interval_at(Instant::now() + offset, offset);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let next = {
            let mut queue = queue.lock();
            let next = queue.tasks.pop_front();
            if next.is_none() {
                queue.draining = false;
            }
            next
        };
        let Some(task) = next else {
            break;
        };

        let name = task.name().to_string();
        let starting = task.clone();
        match handle.spawn(async move { starting.start().await }).await {
            Ok(true) => info!(task = %name, "task started"),
            Ok(false) => warn!(task = %name, "task reported it did not start"),
            Err(e) => error!(task = %name, error = %e, "failed to start task"),
        }
    }
}
