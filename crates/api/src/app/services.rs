use std::sync::Arc;

use tracing::{info, warn};

use taskq_core::{DomainError, JobRecord};
use taskq_infra::config::StoreConfig;
use taskq_infra::queue::{JobQueue, QueueError};

use crate::app::dto::SubmitJobRequest;

#[cfg(not(feature = "redis"))]
use taskq_infra::queue::InMemoryJobQueue;
#[cfg(feature = "redis")]
use taskq_infra::queue::RedisJobQueue;

/// Why a submission was not accepted.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The caller's request is invalid; the message is safe to return.
    #[error("{0}")]
    Validation(String),

    /// The queue store failed; details stay server-side.
    #[error("queue store error: {0}")]
    Store(QueueError),
}

impl From<QueueError> for SubmitError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(DomainError::Validation(msg)) => Self::Validation(msg),
            QueueError::Validation(other) => Self::Validation(other.to_string()),
            other => Self::Store(other),
        }
    }
}

/// Queue depth as seen by the readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub queue: String,
    pub depth: usize,
}

/// Producer-side job submission.
pub struct JobService {
    queue: Arc<dyn JobQueue>,
}

impl JobService {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Validate `body` and append it to the queue.
    ///
    /// Nothing is appended when validation fails. A store failure is not
    /// retried.
    pub async fn submit(&self, body: SubmitJobRequest) -> Result<JobRecord, SubmitError> {
        let request = body.into_request().map_err(SubmitError::Validation)?;
        let record = self.queue.enqueue(request).await?;

        info!(
            job_id = %record.id,
            job_type = %record.job_type(),
            queue = %self.queue.name(),
            "job enqueued"
        );
        Ok(record)
    }

    pub async fn readiness(&self) -> Result<Readiness, QueueError> {
        self.queue.ping().await?;
        Ok(Readiness {
            queue: self.queue.name().to_string(),
            depth: self.queue.depth().await?,
        })
    }
}

/// Pick the queue backend for the producer: Redis.
#[cfg(feature = "redis")]
pub fn build_queue(config: &StoreConfig) -> Result<Arc<dyn JobQueue>, QueueError> {
    let queue = RedisJobQueue::from_config(config)?;
    info!(queue = %config.queue_name, redis_url = %config.redis_url, "using redis queue");
    Ok(Arc::new(queue))
}

/// Pick the queue backend for the producer: without the `redis` feature an
/// in-process queue is used, which only makes sense for local development.
#[cfg(not(feature = "redis"))]
pub fn build_queue(config: &StoreConfig) -> Result<Arc<dyn JobQueue>, QueueError> {
    warn!(queue = %config.queue_name, "redis feature disabled; using in-memory queue");
    Ok(Arc::new(InMemoryJobQueue::new(config.queue_name.clone())))
}

/// Log (but tolerate) an unreachable store at startup; the first request
/// retries the connection.
pub async fn check_store(queue: &dyn JobQueue) {
    if let Err(err) = queue.ping().await {
        warn!(queue = %queue.name(), error = %err, "queue store not reachable at startup");
    }
}
