//! Queue store adapters.
//!
//! ## Design
//!
//! - One shared FIFO list per queue name: producers append at the head,
//!   workers pop from the tail, so the oldest entry is always delivered first
//! - Each append and each pop is atomic in the store; no client-side locking
//! - `dequeue` removes the entry before returning it (at-most-once)
//! - `ReliableQueue` adds claim/ack with a visibility deadline (at-least-once)
//! - The adapter owns the wire format (`codec`); callers only see `JobRecord`
//!
//! ## Components
//!
//! - `JobQueue`: enqueue / blocking dequeue contract
//! - `ReliableQueue`: claim, acknowledge, requeue expired claims
//! - `RedisJobQueue`: Redis lists (`LPUSH` / `BRPOP` / `BLMOVE`)
//! - `InMemoryJobQueue`: same semantics in process memory (tests/dev)

use std::time::Duration;

use async_trait::async_trait;

use taskq_core::{DomainError, JobRecord, JobRequest};

pub mod codec;
pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_list;

pub use in_memory::InMemoryJobQueue;
#[cfg(feature = "redis")]
pub use redis_list::RedisJobQueue;

/// Queue operation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    /// The request was rejected before touching the store.
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// The store could not be reached, or answered with a protocol error.
    #[error("queue store unavailable: {0}")]
    Unavailable(String),

    /// An entry popped from the store is not a valid job record.
    #[error("malformed queue entry: {0}")]
    Codec(String),
}

impl QueueError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

/// A job claimed under at-least-once delivery.
///
/// The claim stays in the store's in-flight set until it is acknowledged or
/// its visibility deadline passes.
#[derive(Debug, Clone, PartialEq)]
pub struct Claim {
    pub record: JobRecord,
    receipt: String,
}

impl Claim {
    pub fn new(record: JobRecord, receipt: impl Into<String>) -> Self {
        Self {
            record,
            receipt: receipt.into(),
        }
    }

    /// Store-specific handle identifying the in-flight entry.
    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

/// Shared FIFO queue of job records.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Name of the underlying list.
    fn name(&self) -> &str;

    /// Admit `request` as a new record and append it to the queue.
    ///
    /// No internal retry: a store failure is returned to the caller.
    async fn enqueue(&self, request: JobRequest) -> Result<JobRecord, QueueError>;

    /// Remove and return the oldest record, waiting up to `timeout`.
    ///
    /// `Ok(None)` means nothing arrived in time; that is not an error.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRecord>, QueueError>;

    /// Number of records waiting to be dequeued.
    async fn depth(&self) -> Result<usize, QueueError>;

    /// Check that the store answers.
    async fn ping(&self) -> Result<(), QueueError>;
}

/// Claim/acknowledge extension for at-least-once delivery.
#[async_trait]
pub trait ReliableQueue: JobQueue {
    /// Move the oldest record into the in-flight set, waiting up to `timeout`.
    ///
    /// The record becomes eligible for redelivery once `visibility` has
    /// elapsed without an [`ack`](Self::ack).
    async fn claim(
        &self,
        timeout: Duration,
        visibility: Duration,
    ) -> Result<Option<Claim>, QueueError>;

    /// Permanently remove a claimed record.
    async fn ack(&self, claim: &Claim) -> Result<(), QueueError>;

    /// Return every claim past its deadline to the consuming end of the
    /// queue. Returns how many records were requeued.
    async fn requeue_expired(&self) -> Result<usize, QueueError>;
}
