//! Runs against a live server: `REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored`

use std::sync::Arc;
use std::time::{Duration, Instant};

use baton::{Broker, DelayedPoll, Execution, RedisBroker};
use chrono::Utc;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

async fn broker() -> RedisBroker {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let prefix = format!("baton-test-{}", unique_suffix());
    RedisBroker::connect(&url, prefix).await.unwrap()
}

fn unique_suffix() -> String {
    format!("{}-{}", std::process::id(), Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis server"]
async fn test_redis_lock_has_single_winner() {
    let broker = Arc::new(broker().await);
    let fire_at = Utc::now();

    let mut contenders = Vec::new();
    for _ in 0..8 {
        let broker = broker.clone();
        contenders.push(tokio::spawn(async move {
            let execution = Execution::for_tick("daily", fire_at, false, None);
            broker
                .lock_and_record(&execution, Duration::from_secs(1), None)
                .await
                .unwrap()
        }));
    }

    let mut winners = 0;
    for contender in contenders {
        if contender.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_delayed_index() {
    let broker = broker().await;
    let now = Utc::now();
    assert_eq!(broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Empty);

    let execution = Execution::builder("report").data("x").build(now).unwrap().execution().clone();
    let due_at = now + chrono::Duration::milliseconds(200);
    broker.enqueue_delayed(due_at, &execution).await.unwrap();

    match broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap() {
        DelayedPoll::Pending(at) => assert_eq!(at.timestamp_millis(), due_at.timestamp_millis()),
        other => panic!("expected pending, got {other:?}"),
    }

    let later = due_at + chrono::Duration::milliseconds(1);
    assert_eq!(broker.poll_delayed(later, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Due(execution.clone()));
    assert_eq!(broker.poll_delayed(later, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Empty);

    broker.enqueue_delayed(due_at, &execution).await.unwrap();
    broker.clear_pending(execution.execution_id()).await.unwrap();
    assert_eq!(broker.poll_delayed(later, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Empty);
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_ready_queues() {
    let broker = broker().await;
    let ids = vec!["a".to_string(), "b".to_string()];
    assert!(broker
        .dequeue_ready(&ids, Duration::from_millis(100))
        .await
        .unwrap()
        .is_none());

    let execution = Execution::builder("b").build(Utc::now()).unwrap().execution().clone();
    broker.enqueue_ready(&execution).await.unwrap();
    assert_eq!(
        broker.dequeue_ready(&ids, Duration::from_secs(1)).await.unwrap(),
        Some(execution)
    );
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_due_retry_entry_stays_parked() {
    let broker = broker().await;
    let now = Utc::now();
    let execution = Execution::builder("report")
        .retry_timeout(Duration::from_secs(5))
        .build(now)
        .unwrap()
        .execution()
        .clone();
    broker.enqueue_delayed(now, &execution).await.unwrap();

    assert_eq!(
        broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap(),
        DelayedPoll::Due(execution.clone())
    );
    assert!(broker.is_pending(execution.execution_id()).await.unwrap());
    match broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap() {
        DelayedPoll::Pending(at) => {
            assert_eq!(at.timestamp_millis(), now.timestamp_millis() + 5_000)
        }
        other => panic!("expected pending, got {other:?}"),
    }

    broker.clear_pending(execution.execution_id()).await.unwrap();
    assert!(!broker.is_pending(execution.execution_id()).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires a running Redis server"]
async fn test_redis_blocking_pops_run_side_by_side() {
    let broker = Arc::new(broker().await);
    let started = Instant::now();

    let mut pops = Vec::new();
    for task in ["a", "b", "c"] {
        let broker = broker.clone();
        pops.push(tokio::spawn(async move {
            broker
                .dequeue_ready(&[task.to_string()], Duration::from_secs(1))
                .await
                .unwrap()
        }));
    }
    for pop in pops {
        assert!(pop.await.unwrap().is_none());
    }

    // Three one-second waits sharing a connection would take three seconds.
    assert!(started.elapsed() < Duration::from_millis(2500), "{:?}", started.elapsed());
}
