use rolework::{AdaptiveTask, AutoScaler, PeriodicRunner, TaskRef, UnitManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

/// Shared backlog standing in for a message queue
#[derive(Default)]
struct Backlog {
    pending: AtomicUsize,
    processed: AtomicUsize,
}

impl Backlog {
    /// Take one message if there is one
    fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// One scaled unit: a single adaptive consumer
fn consumer(backlog: &Arc<Backlog>) -> Vec<TaskRef> {
    let backlog = backlog.clone();
    let poller = AdaptiveTask::builder("consumer", Duration::from_millis(100), Duration::from_secs(2))
        .threshold(5)
        .build(move || {
            let backlog = backlog.clone();
            async move {
                let worked = backlog.take();
                if worked {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    backlog.processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(worked)
            }
        });

    match poller {
        Ok(poller) => vec![Arc::new(poller)],
        Err(e) => {
            tracing::error!(error = %e, "could not build consumer");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_target(false)
        .init();

    println!("🚀 Starting elastic pool example...\n");
    println!("📝 A producer pushes bursts of messages; consumers scale between 1 and 4.\n");

    let backlog = Arc::new(Backlog::default());

    let scaler = Arc::new(
        AutoScaler::builder(backlog.clone(), consumer)
            .name("consumers")
            .bounds(1, 4)
            .check_interval(Duration::from_secs(2))
            .stagger(Duration::from_millis(200))
            .build()?,
    );

    let producer_backlog = backlog.clone();
    let producer = Arc::new(
        PeriodicRunner::builder("producer", Duration::from_secs(10)).build(move || {
            let backlog = producer_backlog.clone();
            async move {
                let queued = backlog.pending.fetch_add(200, Ordering::SeqCst) + 200;
                tracing::info!(queued, "burst produced");
                Ok(())
            }
        })?,
    );

    let host = UnitManager::builder()
        .name("host")
        .stagger(Duration::from_millis(100))
        .factory(move |_: &()| vec![scaler.clone() as TaskRef, producer.clone() as TaskRef])
        .build()?;
    host.on_start(&());
    host.run();

    println!("✅ Running. Press Ctrl+C to stop.\n");

    tokio::select! {
        _ = async {
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                println!(
                    "📊 pending: {:>4}  processed: {:>5}",
                    backlog.pending.load(Ordering::SeqCst),
                    backlog.processed.load(Ordering::SeqCst)
                );
            }
        } => {},
        _ = signal::ctrl_c() => {
            println!("\n👋 Shutting down...");
        }
    }

    host.on_stop().await;
    host.dispose().await;

    println!("   processed {} messages", backlog.processed.load(Ordering::SeqCst));
    Ok(())
}
