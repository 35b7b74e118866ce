//! Two schedulers sharing one Redis server. Every cron tick is handled by
//! exactly one of them; pushed work is spread across both.
//!
//! ```text
//! REDIS_URL=redis://127.0.0.1/ cargo run --example fleet
//! ```

use baton::{BoxError, PushOptions, RedisBroker, ScheduleOptions, Scheduler, SchedulerBuilder};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn worker(name: &'static str) -> impl Fn(Option<String>) -> std::future::Ready<Result<bool, BoxError>> + Send + Sync {
    move |data| {
        let now = Local::now().format("%H:%M:%S%.3f");
        println!("[{}] [{}] handled {:?}", now, name, data);
        std::future::ready(Ok(true))
    }
}

fn node(broker: Arc<RedisBroker>, name: &'static str) -> Result<Scheduler, Box<dyn std::error::Error>> {
    let mut scheduler = SchedulerBuilder::with_toml("demos/config/application.toml")?
        .broker(broker)
        .build()?;
    scheduler.register("report", ScheduleOptions::new("*/3 * * * * *").retry(true))?;
    scheduler.bind("report", worker(name))?;
    scheduler.bind("resize", worker(name))?;
    Ok(scheduler)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let broker = Arc::new(RedisBroker::connect(&url, "baton-fleet").await?);
    broker.ping().await?;

    let mut nodes = vec![node(broker.clone(), "node-a")?, node(broker.clone(), "node-b")?];
    for scheduler in nodes.iter_mut() {
        scheduler.start()?;
    }

    for i in 0..6 {
        nodes[0]
            .push("resize", PushOptions::new().data(format!("image-{i}")).delay(Duration::from_secs(1)))
            .await?;
    }

    println!("\n✅ Press Ctrl+C to stop.\n");
    tokio::signal::ctrl_c().await?;

    for scheduler in nodes.iter_mut() {
        scheduler.shutdown().await;
    }
    Ok(())
}
