//! # Rolework - Self-Managing Elastic Worker Pools for Rust
//!
//! This library runs groups of long-lived background tasks as *units*, and
//! keeps a pool of identical units sized to the load the tasks report.
//!
//! ## Features
//!
//! - **Unit managers**: load tasks once from factories, start them staggered,
//!   stop and dispose them concurrently and best-effort
//! - **Periodic runners**: cancellable recurring timers with a single-flight
//!   guard and runtime retiming
//! - **Autoscaling**: a control loop that bootstraps a pool to its minimum and
//!   then grows or shrinks it one unit per check
//! - **Adaptive polling**: exponential backoff while idle, doubling as a
//!   scale signal
//! - **Coordination**: gate recurring jobs so they run at most once per period
//! - **Config support**: read scaling bounds and intervals from TOML or YAML
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rolework::{AdaptiveTask, AutoScaler, TaskRef, UnitManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! async fn drain_queue() -> anyhow::Result<bool> {
//!     // Return true when a message was processed.
//!     Ok(false)
//! }
//!
//! fn queue_worker(_: &()) -> Vec<TaskRef> {
//!     AdaptiveTask::builder("queue", Duration::from_millis(100), Duration::from_secs(10))
//!         .build(drain_queue)
//!         .map(|poller| vec![Arc::new(poller) as TaskRef])
//!         .unwrap_or_default()
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let scaler = Arc::new(
//!         AutoScaler::builder((), queue_worker)
//!             .bounds(1, 4)
//!             .check_interval(Duration::from_secs(30))
//!             .build()?,
//!     );
//!
//!     let host = UnitManager::builder()
//!         .factory(move |_: &()| vec![scaler.clone() as TaskRef])
//!         .build()?;
//!     host.on_start(&());
//!     host.run();
//!
//!     tokio::signal::ctrl_c().await?;
//!     host.on_stop().await;
//!     host.dispose().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Create `config/application.toml`:
//!
//! ```toml
//! [scaling]
//! minimum = 1
//! maximum = 8
//! check_interval = "2m"
//! stagger_offset = "500ms"
//! ```
//!
//! and build the scaler with [`AutoScaler::from_settings`] after reading the
//! section with [`ScalingSettings::from_config`]. Environment variables with
//! the `APP_` prefix override file values:
//!
//! ```bash
//! export APP_SCALING__MAXIMUM=16
//! ```

pub use rolework_runtime::{
    aggregate_signals, load_toml_config, load_yaml_config, AdaptiveTask, AdaptiveTaskBuilder, AutoScaler,
    AutoScalerBuilder, Backoff, BoxFuture, CoordinatedTask, CoordinatedTaskBuilder, Coordinator, DurationSetting,
    InMemoryCoordinator, InstanceBounds, PeriodicRunner, PeriodicRunnerBuilder, Pool, Result, RoleworkError,
    RunRecord, RunnableTask, ScaledUnit, Scaler, ScalingSettings, Starter, TaskFactory, TaskRef, TaskRegistry,
    TickOutcome, TimeUnit, TimingHandle, UnitManager, UnitManagerBuilder, DEFAULT_CHECK_INTERVAL, DEFAULT_SECTION,
    DEFAULT_STAGGER,
};

// Make the runtime crate reachable for advanced use
pub use rolework_runtime;
