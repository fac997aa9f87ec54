use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future returned by task lifecycle methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A long-running unit of work owned by a [`UnitManager`](crate::UnitManager).
///
/// Implement this trait on your struct to make it manageable. Simple recurring
/// jobs, adaptive jobs and nested unit managers all share this contract, so a
/// unit manager can be pooled inside another one.
///
/// # Example
///
/// ```rust
/// use rolework_runtime::{BoxFuture, RunnableTask};
///
/// struct Heartbeat;
///
/// impl RunnableTask for Heartbeat {
///     fn start(&self) -> BoxFuture<'_, bool> {
///         Box::pin(async move { true })
///     }
///
///     fn stop(&self) -> BoxFuture<'_, bool> {
///         Box::pin(async move { true })
///     }
///
///     fn dispose(&self) -> BoxFuture<'_, ()> {
///         Box::pin(async move {})
///     }
/// }
/// ```
pub trait RunnableTask: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Begin running. Returns whether the task considers itself started.
    fn start(&self) -> BoxFuture<'_, bool>;

    /// Stop running. Must not interrupt work already in flight.
    fn stop(&self) -> BoxFuture<'_, bool>;

    /// Release everything the task holds. Must be safe to call more than once.
    fn dispose(&self) -> BoxFuture<'_, ()>;

    /// Scale signal: `Some(true)` wants more capacity, `Some(false)` wants
    /// less, `None` has no opinion.
    fn scale(&self) -> Option<bool> {
        None
    }
}
