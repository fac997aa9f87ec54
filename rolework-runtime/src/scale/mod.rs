//! Elastic scaling: the unit pool, the control loop and adaptive signal sources.

mod adaptive;
mod autoscaler;
mod bounds;
mod pool;

pub use adaptive::{AdaptiveTask, AdaptiveTaskBuilder, Backoff};
pub use autoscaler::{AutoScaler, AutoScalerBuilder, DEFAULT_CHECK_INTERVAL};
pub use bounds::InstanceBounds;
pub use pool::{Pool, ScaledUnit, Scaler};

/// Fold scale signals: any `Some(true)` wins, otherwise any `Some(false)`,
/// otherwise no opinion.
pub fn aggregate_signals(signals: impl IntoIterator<Item = Option<bool>>) -> Option<bool> {
    let mut shrink = false;
    for signal in signals {
        match signal {
            Some(true) => return Some(true),
            Some(false) => shrink = true,
            None => {}
        }
    }
    shrink.then_some(false)
}
