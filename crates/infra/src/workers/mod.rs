//! Background workers.
//!
//! - `job_worker`: the queue-draining loop and its handle
//! - `processor`: per-job business logic seam
//! - `backoff`: cooldown after store failures

pub mod backoff;
pub mod job_worker;
pub mod processor;

pub use backoff::Backoff;
pub use job_worker::{DeliveryMode, Worker, WorkerConfig, WorkerHandle, WorkerStats};
pub use processor::{FnProcessor, JobProcessor, ProcessingError, SimulatedProcessor};
