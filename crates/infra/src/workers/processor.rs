//! Business logic invoked by the worker for each job.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use taskq_core::JobRecord;

/// A job could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProcessingError(pub String);

impl ProcessingError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<String> for ProcessingError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for ProcessingError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

/// Processes one job. Called once per delivery.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process(&self, job: &JobRecord) -> Result<(), ProcessingError>;
}

/// Adapts an async closure into a [`JobProcessor`].
///
/// The closure receives an owned copy of the record so the returned future
/// can be `'static`.
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> JobProcessor for FnProcessor<F>
where
    F: Fn(JobRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProcessingError>> + Send,
{
    async fn process(&self, job: &JobRecord) -> Result<(), ProcessingError> {
        (self.f)(job.clone()).await
    }
}

/// Logs the job, pretends to work for a fixed duration, and succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    work: Duration,
}

impl SimulatedProcessor {
    pub fn new(work: Duration) -> Self {
        Self { work }
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[async_trait]
impl JobProcessor for SimulatedProcessor {
    async fn process(&self, job: &JobRecord) -> Result<(), ProcessingError> {
        info!(
            job_id = %job.id,
            job_type = %job.job_type(),
            data = ?job.data(),
            "processing job"
        );
        tokio::time::sleep(self.work).await;
        info!(job_id = %job.id, "job processed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use taskq_core::JobRequest;

    fn record(job_type: &str) -> JobRecord {
        JobRecord::admit(JobRequest::new(job_type, None)).unwrap()
    }

    #[tokio::test]
    async fn fn_processor_forwards_the_record_and_result() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let processor = FnProcessor::new(move |job: JobRecord| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if job.job_type() == "bad" {
                    Err(ProcessingError::new("bad job"))
                } else {
                    Ok(())
                }
            }
        });

        assert!(processor.process(&record("good")).await.is_ok());
        assert_eq!(
            processor.process(&record("bad")).await.unwrap_err(),
            ProcessingError::new("bad job")
        );
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_processor_takes_its_configured_time() {
        let processor = SimulatedProcessor::default();
        let started = tokio::time::Instant::now();

        processor.process(&record("email")).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
