//! Rolework Runtime - elastic pools of long-running background work
//!
//! This crate provides the engine behind `rolework`: periodic runners,
//! staggered starts, unit managers, and an autoscaler that grows and shrinks
//! a pool of units from the scale signals their tasks report.

mod config;
mod coordinator;
mod error;
mod manager;
mod periodic;
mod registry;
mod runnable;
pub mod scale;
mod starter;
mod time_unit;

#[cfg(test)]
mod testing;

// Re-export public API
pub use config::{load_toml_config, load_yaml_config, DurationSetting, ScalingSettings, DEFAULT_SECTION};
pub use coordinator::{CoordinatedTask, CoordinatedTaskBuilder, Coordinator, InMemoryCoordinator, RunRecord};
pub use error::{Result, RoleworkError};
pub use manager::{UnitManager, UnitManagerBuilder};
pub use periodic::{PeriodicRunner, PeriodicRunnerBuilder, TickAction, TickOutcome, TimingHandle};
pub use registry::TaskRegistry;
pub use runnable::{BoxFuture, RunnableTask, TaskFactory, TaskRef};
pub use scale::{
    aggregate_signals, AdaptiveTask, AdaptiveTaskBuilder, AutoScaler, AutoScalerBuilder, Backoff, InstanceBounds,
    Pool, ScaledUnit, Scaler, DEFAULT_CHECK_INTERVAL,
};
pub use starter::{Starter, DEFAULT_STAGGER};
pub use time_unit::TimeUnit;
