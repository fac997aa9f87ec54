//! Recording fakes shared by unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runnable::{BoxFuture, RunnableTask, TaskRef};

/// Event log shared between fakes so tests can assert on ordering.
#[derive(Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub(crate) struct RecordingTask {
    name: String,
    journal: Journal,
    signal: Mutex<Option<bool>>,
    panic_on: Option<&'static str>,
    pub(crate) starts: AtomicUsize,
    pub(crate) stops: AtomicUsize,
    pub(crate) disposals: AtomicUsize,
}

impl RecordingTask {
    pub(crate) fn new(name: &str, journal: &Journal) -> Arc<Self> {
        Self::build(name, journal, None, None)
    }

    pub(crate) fn with_signal(name: &str, journal: &Journal, signal: Option<bool>) -> Arc<Self> {
        Self::build(name, journal, signal, None)
    }

    /// Panics inside `start`, `stop` or `dispose`.
    pub(crate) fn panicking(name: &str, journal: &Journal, on: &'static str) -> Arc<Self> {
        Self::build(name, journal, None, Some(on))
    }

    fn build(name: &str, journal: &Journal, signal: Option<bool>, panic_on: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            journal: journal.clone(),
            signal: Mutex::new(signal),
            panic_on,
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set_signal(&self, signal: Option<bool>) {
        *self.signal.lock() = signal;
    }

    pub(crate) fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn record(&self, event: &'static str, counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.journal.push(format!("{event}:{}", self.name));
        if self.panic_on == Some(event) {
            panic!("{} failed to {event}", self.name);
        }
    }
}

impl RunnableTask for RecordingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.record("start", &self.starts);
            true
        })
    }

    fn stop(&self) -> BoxFuture<'_, bool> {
        Box::pin(async move {
            self.record("stop", &self.stops);
            true
        })
    }

    fn dispose(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.record("dispose", &self.disposals);
        })
    }

    fn scale(&self) -> Option<bool> {
        *self.signal.lock()
    }
}

pub(crate) fn as_task(task: &Arc<RecordingTask>) -> TaskRef {
    task.clone()
}
