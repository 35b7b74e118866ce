use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use super::{Broker, DelayedPoll};
use crate::error::SchedulerResult;
use crate::execution::Execution;

/// In-process broker.
///
/// Share one instance through an `Arc` between several schedulers to run a
/// fleet inside a single process.
#[derive(Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    ready: Notify,
}

#[derive(Default)]
struct State {
    ready: HashMap<String, VecDeque<Execution>>,
    /// (due millis, execution id), ordered by due time.
    delayed: BTreeSet<(i64, String)>,
    parked: HashMap<String, (i64, Execution)>,
    locks: HashMap<String, Instant>,
}

impl State {
    fn pop_ready(&mut self, task_ids: &[String]) -> Option<Execution> {
        task_ids
            .iter()
            .find_map(|id| self.ready.get_mut(id).and_then(VecDeque::pop_front))
    }

    fn park(&mut self, due_at: DateTime<Utc>, execution: &Execution) {
        let due = due_at.timestamp_millis();
        let id = execution.execution_id().to_string();
        if let Some((previous, _)) = self.parked.insert(id.clone(), (due, execution.clone())) {
            self.delayed.remove(&(previous, id.clone()));
        }
        self.delayed.insert((due, id));
    }

    fn unpark(&mut self, execution_id: &str) -> Option<Execution> {
        let (due, execution) = self.parked.remove(execution_id)?;
        self.delayed.remove(&(due, execution_id.to_string()));
        Some(execution)
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ready_len(&self, task_id: &str) -> usize {
        let state = self.state.lock().await;
        state.ready.get(task_id).map_or(0, VecDeque::len)
    }

    pub async fn delayed_len(&self) -> usize {
        self.state.lock().await.delayed.len()
    }

    /// Due time of a parked execution, if any.
    pub async fn pending_due(&self, execution_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state
            .parked
            .get(execution_id)
            .and_then(|(due, _)| DateTime::from_timestamp_millis(*due))
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue_ready(&self, execution: &Execution) -> SchedulerResult<()> {
        {
            let mut state = self.state.lock().await;
            state
                .ready
                .entry(execution.task_id().to_string())
                .or_default()
                .push_back(execution.clone());
        }
        self.ready.notify_waiters();
        Ok(())
    }

    async fn dequeue_ready(&self, task_ids: &[String], timeout: Duration) -> SchedulerResult<Option<Execution>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before looking, so a push between the check
            // and the wait still wakes us.
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(execution) = self.state.lock().await.pop_ready(task_ids) {
                return Ok(Some(execution));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn poll_delayed(&self, now: DateTime<Utc>, default_retry_timeout: Duration) -> SchedulerResult<DelayedPoll> {
        let mut state = self.state.lock().await;
        let Some((due, id)) = state.delayed.first().cloned() else {
            return Ok(DelayedPoll::Empty);
        };

        if due > now.timestamp_millis() {
            let due_at = DateTime::from_timestamp_millis(due).unwrap_or(now);
            return Ok(DelayedPoll::Pending(due_at));
        }

        match state.unpark(&id) {
            Some(execution) => {
                match execution.retry_deadline(now, default_retry_timeout) {
                    Ok(Some(deadline)) => state.park(deadline, &execution),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(execution_id = %id, error = %e, "Retry timeout not re-armed");
                    }
                }
                Ok(DelayedPoll::Due(execution))
            }
            None => {
                state.delayed.remove(&(due, id));
                Ok(DelayedPoll::Empty)
            }
        }
    }

    async fn enqueue_delayed(&self, due_at: DateTime<Utc>, execution: &Execution) -> SchedulerResult<()> {
        self.state.lock().await.park(due_at, execution);
        Ok(())
    }

    async fn lock_and_record(
        &self,
        execution: &Execution,
        guard: Duration,
        retry_deadline: Option<DateTime<Utc>>,
    ) -> SchedulerResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.locks.retain(|_, expires_at| *expires_at > now);

        if state.locks.contains_key(execution.execution_id()) {
            return Ok(false);
        }
        state
            .locks
            .insert(execution.execution_id().to_string(), now + guard);

        if let Some(deadline) = retry_deadline {
            state.park(deadline, execution);
        }
        Ok(true)
    }

    async fn clear_pending(&self, execution_id: &str) -> SchedulerResult<()> {
        self.state.lock().await.unpark(execution_id);
        Ok(())
    }

    async fn is_pending(&self, execution_id: &str) -> SchedulerResult<bool> {
        Ok(self.state.lock().await.parked.contains_key(execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn adhoc(task_id: &str) -> Execution {
        Execution::builder(task_id).build(Utc::now()).unwrap().execution().clone()
    }

    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_ready_queue_is_fifo_per_task() {
        let broker = MemoryBroker::new();
        let first = adhoc("a");
        let second = adhoc("a");
        broker.enqueue_ready(&first).await.unwrap();
        broker.enqueue_ready(&second).await.unwrap();

        let ids = vec!["a".to_string()];
        let timeout = Duration::from_millis(10);
        assert_eq!(broker.dequeue_ready(&ids, timeout).await.unwrap(), Some(first));
        assert_eq!(broker.dequeue_ready(&ids, timeout).await.unwrap(), Some(second));
        assert_eq!(broker.dequeue_ready(&ids, timeout).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dequeue_ignores_unlisted_tasks() {
        let broker = MemoryBroker::new();
        broker.enqueue_ready(&adhoc("other")).await.unwrap();
        let got = broker
            .dequeue_ready(&["mine".to_string()], Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
        assert_eq!(broker.ready_len("other").await, 1);
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .dequeue_ready(&["a".to_string()], Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let execution = adhoc("a");
        broker.enqueue_ready(&execution).await.unwrap();
        assert_eq!(waiter.await.unwrap(), Some(execution));
    }

    #[tokio::test]
    async fn test_poll_delayed_outcomes() {
        let broker = MemoryBroker::new();
        let now = Utc::now();
        assert_eq!(broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Empty);

        let execution = adhoc("a");
        let due_at = DateTime::from_timestamp_millis(now.timestamp_millis() + 500).unwrap();
        broker.enqueue_delayed(due_at, &execution).await.unwrap();
        assert_eq!(broker.poll_delayed(now, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Pending(due_at));

        let later = due_at + chrono::Duration::milliseconds(1);
        assert_eq!(broker.poll_delayed(later, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Due(execution));
        assert_eq!(broker.poll_delayed(later, DEFAULT_TIMEOUT).await.unwrap(), DelayedPoll::Empty);
    }

    #[tokio::test]
    async fn test_due_retry_entry_stays_parked() {
        let broker = MemoryBroker::new();
        let now = Utc::now();
        let execution = Execution::builder("a")
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
        assert_eq!(
            broker.pending_due(execution.execution_id()).await.map(|d| d.timestamp_millis()),
            Some((now + chrono::Duration::seconds(5)).timestamp_millis())
        );

        broker.clear_pending(execution.execution_id()).await.unwrap();
        assert!(!broker.is_pending(execution.execution_id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_reparking_moves_deadline() {
        let broker = MemoryBroker::new();
        let now = Utc::now();
        let execution = adhoc("a");
        broker
            .enqueue_delayed(now + chrono::Duration::seconds(10), &execution)
            .await
            .unwrap();
        broker
            .enqueue_delayed(now + chrono::Duration::seconds(20), &execution)
            .await
            .unwrap();
        assert_eq!(broker.delayed_len().await, 1);
        assert_eq!(
            broker.pending_due(execution.execution_id()).await.map(|d| d.timestamp_millis()),
            Some((now + chrono::Duration::seconds(20)).timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_clear_pending_is_idempotent() {
        let broker = MemoryBroker::new();
        let execution = adhoc("a");
        broker
            .enqueue_delayed(Utc::now(), &execution)
            .await
            .unwrap();
        broker.clear_pending(execution.execution_id()).await.unwrap();
        broker.clear_pending(execution.execution_id()).await.unwrap();
        assert_eq!(broker.delayed_len().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_lock_has_single_winner() {
        let broker = Arc::new(MemoryBroker::new());
        let fire_at = Utc::now();
        let mut contenders = Vec::new();
        for _ in 0..16 {
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
    async fn test_lock_records_retry_entry_and_expires() {
        let broker = MemoryBroker::new();
        let now = Utc::now();
        let execution = Execution::for_tick("daily", now, true, Some(Duration::from_secs(30)));
        let deadline = now + chrono::Duration::seconds(30);

        assert!(broker
            .lock_and_record(&execution, Duration::from_millis(30), Some(deadline))
            .await
            .unwrap());
        assert_eq!(broker.delayed_len().await, 1);
        assert!(!broker
            .lock_and_record(&execution, Duration::from_millis(30), Some(deadline))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(broker
            .lock_and_record(&execution, Duration::from_millis(30), None)
            .await
            .unwrap());
    }
}
