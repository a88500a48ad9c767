//! In-memory queue for tests/dev.
//!
//! Mirrors the Redis layout: entries are stored encoded, appended at the
//! front and popped from the back; claims live in a separate in-flight list
//! with a deadline. A single mutex makes every operation atomic.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use taskq_core::{JobRecord, JobRequest};

use super::{Claim, JobQueue, QueueError, ReliableQueue, codec};

#[derive(Debug)]
struct InFlight {
    raw: String,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Front = newest, back = oldest.
    entries: VecDeque<String>,
    inflight: Vec<InFlight>,
}

/// Process-local queue with the same contract as `RedisJobQueue`.
#[derive(Debug)]
pub struct InMemoryJobQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    pub fn arc(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Number of claimed, unacknowledged entries.
    pub fn in_flight(&self) -> usize {
        self.lock().inflight.len()
    }

    /// Append a raw entry exactly as a foreign producer would.
    pub fn push_raw(&self, raw: impl Into<String>) {
        self.lock().entries.push_front(raw.into());
        self.available.notify_one();
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until `take` yields something or `timeout` elapses.
    async fn wait_for<T>(
        &self,
        timeout: Duration,
        mut take: impl FnMut(&mut QueueState) -> Option<T>,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let found = take(&mut *self.lock());
            if found.is_some() {
                return found;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new("tasks_queue")
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, request: JobRequest) -> Result<JobRecord, QueueError> {
        let record = JobRecord::admit(request)?;
        self.push_raw(codec::encode(&record)?);
        Ok(record)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRecord>, QueueError> {
        self.wait_for(timeout, |state| state.entries.pop_back())
            .await
            .map(|raw| codec::decode(&raw))
            .transpose()
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        Ok(self.lock().entries.len())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl ReliableQueue for InMemoryJobQueue {
    async fn claim(
        &self,
        timeout: Duration,
        visibility: Duration,
    ) -> Result<Option<Claim>, QueueError> {
        let claimed = self
            .wait_for(timeout, |state| {
                let raw = state.entries.pop_back()?;
                state.inflight.push(InFlight {
                    raw: raw.clone(),
                    deadline: Instant::now() + visibility,
                });
                Some(raw)
            })
            .await;

        let Some(raw) = claimed else {
            return Ok(None);
        };

        match codec::decode(&raw) {
            Ok(record) => Ok(Some(Claim::new(record, raw))),
            Err(e) => {
                self.lock().inflight.retain(|f| f.raw != raw);
                Err(e)
            }
        }
    }

    async fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        let mut state = self.lock();
        if let Some(pos) = state.inflight.iter().position(|f| f.raw == claim.receipt()) {
            state.inflight.remove(pos);
        }
        Ok(())
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let requeued = {
            let mut state = self.lock();
            let (expired, live): (Vec<_>, Vec<_>) = state
                .inflight
                .drain(..)
                .partition(|f| f.deadline <= now);
            state.inflight = live;
            // Oldest claim goes to the consuming end last.
            for entry in expired.iter().rev() {
                state.entries.push_back(entry.raw.clone());
            }
            expired.len()
        };

        for _ in 0..requeued {
            self.available.notify_one();
        }
        Ok(requeued)
    }
}
