//! Queue-draining worker loop.
//!
//! A worker alternates between two states:
//! - **Waiting**: blocked in `dequeue`/`claim` for up to the configured timeout
//! - **Processing**: running exactly one job through the [`JobProcessor`]
//!
//! Nothing that happens to a single job stops the loop. Processor errors and
//! panics are logged and swallowed; store failures trigger a cooldown.
//! Shutdown is observed between iterations and during cooldown, never in the
//! middle of a dequeue, so a job taken from the store always reaches the
//! processor.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use taskq_core::JobRecord;

use super::backoff::Backoff;
use super::processor::JobProcessor;
use crate::config::{DEFAULT_DEQUEUE_TIMEOUT, DEFAULT_VISIBILITY_TIMEOUT};
use crate::queue::{QueueError, ReliableQueue};

/// Delivery guarantee of the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Jobs are removed on dequeue; a failed job is lost.
    #[default]
    AtMostOnce,
    /// Jobs are claimed and acknowledged after success; an unacknowledged
    /// job is redelivered once `visibility_timeout` has passed.
    AtLeastOnce { visibility_timeout: Duration },
}

impl DeliveryMode {
    pub fn at_least_once() -> Self {
        Self::AtLeastOnce {
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Parse `at-most-once` / `at-least-once` (case-insensitive, `_` allowed).
    pub fn parse(raw: &str, visibility_timeout: Duration) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "at-most-once" => Some(Self::AtMostOnce),
            "at-least-once" => Some(Self::AtLeastOnce { visibility_timeout }),
            _ => None,
        }
    }
}

/// Worker loop configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Worker name, carried on every log event.
    pub name: String,
    /// Upper bound of one blocking dequeue.
    pub dequeue_timeout: Duration,
    /// Cooldown after store failures.
    pub backoff: Backoff,
    pub delivery: DeliveryMode,
}

impl WorkerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            backoff: Backoff::default(),
            delivery: DeliveryMode::AtMostOnce,
        }
    }

    pub fn with_dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("worker")
    }
}

/// Worker counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Jobs handed to the processor.
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    /// Processor errors and panics.
    pub jobs_failed: u64,
    /// Dequeues that timed out empty.
    pub idle_polls: u64,
    /// Store failures (each followed by a cooldown).
    pub store_errors: u64,
    /// Entries discarded because they were not valid job records.
    pub malformed: u64,
    /// Expired claims returned to the queue by this worker.
    pub requeued: u64,
    pub consecutive_store_errors: u32,
}

enum Polled {
    Idle,
    Processed,
}

/// Sequential consumer of one queue.
pub struct Worker<Q: ?Sized> {
    queue: Arc<Q>,
    processor: Arc<dyn JobProcessor>,
    config: WorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<Q> Worker<Q>
where
    Q: ReliableQueue + ?Sized + 'static,
{
    pub fn new(queue: Arc<Q>, processor: Arc<dyn JobProcessor>, config: WorkerConfig) -> Self {
        Self {
            queue,
            processor,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stats(&self) -> WorkerStats {
        self.lock_stats().clone()
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let name = self.config.name.as_str();
        info!(
            worker = %name,
            queue = %self.queue.name(),
            delivery = ?self.config.delivery,
            "worker started"
        );

        while !shutdown_requested(&shutdown) {
            match self.poll_once().await {
                Ok(Polled::Idle) => {
                    trace!(worker = %name, "dequeue timed out");
                    self.update_stats(|s| {
                        s.idle_polls += 1;
                        s.consecutive_store_errors = 0;
                    });
                }
                Ok(Polled::Processed) => {}
                Err(QueueError::Codec(msg)) => {
                    warn!(worker = %name, error = %msg, "discarding malformed queue entry");
                    self.update_stats(|s| {
                        s.malformed += 1;
                        s.consecutive_store_errors = 0;
                    });
                }
                Err(err) => {
                    let failures = self.update_stats(|s| {
                        s.store_errors += 1;
                        s.consecutive_store_errors = s.consecutive_store_errors.saturating_add(1);
                        s.consecutive_store_errors
                    });
                    let delay = self.config.backoff.delay_for(failures);
                    warn!(
                        worker = %name,
                        error = %err,
                        failures,
                        cooldown_ms = delay.as_millis() as u64,
                        "queue store failure; cooling down"
                    );
                    if cooldown(delay, &mut shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(worker = %name, "worker stopped");
    }

    /// Run the loop on a tokio task.
    pub fn spawn(self) -> WorkerHandle
    where
        Q: Send + Sync,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    /// One Waiting → (Processing) → Waiting round.
    async fn poll_once(&self) -> Result<Polled, QueueError> {
        let timeout = self.config.dequeue_timeout;

        match self.config.delivery {
            DeliveryMode::AtMostOnce => {
                let Some(job) = self.queue.dequeue(timeout).await? else {
                    return Ok(Polled::Idle);
                };
                self.reset_store_errors();
                self.execute(&job).await;
                Ok(Polled::Processed)
            }
            DeliveryMode::AtLeastOnce { visibility_timeout } => {
                let requeued = self.queue.requeue_expired().await?;
                if requeued > 0 {
                    info!(worker = %self.config.name, requeued, "requeued expired claims");
                    self.update_stats(|s| s.requeued += requeued as u64);
                }

                let Some(claim) = self.queue.claim(timeout, visibility_timeout).await? else {
                    return Ok(Polled::Idle);
                };
                self.reset_store_errors();
                if self.execute(&claim.record).await {
                    self.queue.ack(&claim).await?;
                    debug!(worker = %self.config.name, job_id = %claim.record.id, "job acknowledged");
                }
                Ok(Polled::Processed)
            }
        }
    }

    /// Hand `job` to the processor on its own task so a panic is contained.
    /// Returns whether the job succeeded.
    async fn execute(&self, job: &JobRecord) -> bool {
        let name = self.config.name.as_str();
        debug!(worker = %name, job_id = %job.id, job_type = %job.job_type(), "job received");

        let processor = self.processor.clone();
        let owned = job.clone();
        let outcome = tokio::spawn(async move { processor.process(&owned).await }).await;

        let succeeded = match outcome {
            Ok(Ok(())) => {
                info!(worker = %name, job_id = %job.id, "job completed");
                true
            }
            Ok(Err(err)) => {
                error!(worker = %name, job_id = %job.id, error = %err, "job failed");
                false
            }
            Err(err) => {
                error!(worker = %name, job_id = %job.id, error = %err, "job panicked");
                false
            }
        };

        self.update_stats(|s| {
            s.jobs_processed += 1;
            if succeeded {
                s.jobs_succeeded += 1;
            } else {
                s.jobs_failed += 1;
            }
        });
        succeeded
    }

    fn reset_store_errors(&self) {
        self.update_stats(|s| s.consecutive_store_errors = 0);
    }

    fn update_stats<T>(&self, f: impl FnOnce(&mut WorkerStats) -> T) -> T {
        f(&mut *self.lock_stats())
    }

    fn lock_stats(&self) -> MutexGuard<'_, WorkerStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn shutdown_requested(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

/// Sleep for `delay` unless shutdown is requested first. Returns `true` on
/// shutdown.
async fn cooldown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_for_shutdown(shutdown) => true,
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Handle to control and join a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A job already taken from the queue is finished first.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.join.await {
            error!(error = %err, "worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
