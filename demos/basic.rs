use baton::{task, BoxError, PushOptions, ScheduleOptions, SchedulerBuilder};
use chrono::Local;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Runs every 5 seconds
#[task(cron = "*/5 * * * * *")]
async fn heartbeat(_data: Option<String>) -> Result<bool, BoxError> {
    let now = Local::now().format("%H:%M:%S%.3f");
    println!("[{}] [HEARTBEAT] tick", now);
    Ok(true)
}

/// Only bound; executions arrive through `push`
#[task(id = "greet")]
async fn greet(data: Option<String>) -> Result<bool, BoxError> {
    let now = Local::now().format("%H:%M:%S%.3f");
    println!("[{}] [GREET] hello, {}", now, data.as_deref().unwrap_or("stranger"));
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,baton_runtime=debug")),
        )
        .with_target(false)
        .init();

    println!("🚀 Starting basic example (in-process broker)...\n");

    let mut scheduler = SchedulerBuilder::new().register_all().build()?;

    // Fails twice, then succeeds: redelivered after each 2s retry window.
    let attempts = Arc::new(AtomicU32::new(0));
    scheduler.register("flaky", ScheduleOptions::new("*/20 * * * * *").retry_timeout(Duration::from_secs(2)))?;
    scheduler.bind("flaky", {
        let attempts = attempts.clone();
        move |_data: Option<String>| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let now = Local::now().format("%H:%M:%S%.3f");
                println!("[{}] [FLAKY] attempt #{}", now, attempt);
                if attempt % 3 != 0 {
                    return Err::<bool, BoxError>("not yet".into());
                }
                Ok(true)
            }
        }
    })?;

    scheduler.start()?;

    scheduler.push("greet", PushOptions::new().data("world")).await?;
    scheduler
        .push("greet", PushOptions::new().data("later").delay(Duration::from_secs(3)))
        .await?;

    println!("\n✅ Press Ctrl+C to stop.\n");
    tokio::signal::ctrl_c().await?;

    println!("\n👋 Shutting down...");
    scheduler.shutdown().await;
    Ok(())
}
