use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use taskq_core::{JobId, JobRecord, JobRequest};
use taskq_infra::queue::{Claim, InMemoryJobQueue, JobQueue, QueueError, ReliableQueue};
use taskq_infra::workers::{
    Backoff, DeliveryMode, FnProcessor, JobProcessor, ProcessingError, Worker, WorkerConfig, WorkerHandle,
};

/// In-memory queue whose consuming operations fail while `outage` is non-zero.
struct FlakyQueue {
    inner: InMemoryJobQueue,
    outage: AtomicU32,
}

impl FlakyQueue {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryJobQueue::new("flaky"),
            outage: AtomicU32::new(failures),
        })
    }

    fn heal(&self) {
        self.outage.store(0, Ordering::SeqCst);
    }

    fn trip(&self) -> Result<(), QueueError> {
        let tripped = self
            .outage
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(QueueError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn enqueue(&self, request: JobRequest) -> Result<JobRecord, QueueError> {
        self.inner.enqueue(request).await
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobRecord>, QueueError> {
        self.trip()?;
        self.inner.dequeue(timeout).await
    }

    async fn depth(&self) -> Result<usize, QueueError> {
        self.inner.depth().await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.trip()
    }
}

#[async_trait]
impl ReliableQueue for FlakyQueue {
    async fn claim(
        &self,
        timeout: Duration,
        visibility: Duration,
    ) -> Result<Option<Claim>, QueueError> {
        self.trip()?;
        self.inner.claim(timeout, visibility).await
    }

    async fn ack(&self, claim: &Claim) -> Result<(), QueueError> {
        self.inner.ack(claim).await
    }

    async fn requeue_expired(&self) -> Result<usize, QueueError> {
        self.inner.requeue_expired().await
    }
}

fn fast_config(name: &str) -> WorkerConfig {
    WorkerConfig::new(name)
        .with_dequeue_timeout(Duration::from_millis(20))
        .with_backoff(Backoff::fixed(Duration::from_millis(5)))
}

fn job(job_type: &str, n: usize) -> JobRequest {
    JobRequest::new(job_type, Some(json!({ "n": n })))
}

/// Processor that records every job id it sees.
#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<JobId>>,
}

impl Recorder {
    fn seen(&self) -> Vec<JobId> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobProcessor for Recorder {
    async fn process(&self, job: &JobRecord) -> Result<(), ProcessingError> {
        self.seen.lock().unwrap().push(job.id);
        Ok(())
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn processed(handle: &WorkerHandle, n: u64) {
    eventually("jobs processed", || handle.stats().jobs_processed >= n).await;
}

#[tokio::test]
async fn jobs_are_processed_in_submission_order() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    let mut sent = Vec::new();
    for n in 0..5 {
        sent.push(queue.enqueue(job("email", n)).await.unwrap().id);
    }

    let recorder = Arc::new(Recorder::default());
    let handle = Worker::new(queue.clone(), recorder.clone(), fast_config("w-1")).spawn();
    processed(&handle, 5).await;
    handle.shutdown().await;

    assert_eq!(recorder.seen(), sent);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn competing_workers_never_share_a_job() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    let recorder = Arc::new(Recorder::default());

    let handles: Vec<_> = (0..4)
        .map(|i| Worker::new(queue.clone(), recorder.clone(), fast_config(&format!("w-{i}"))).spawn())
        .collect();

    let producers: Vec<_> = (0..2)
        .map(|p| {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut ids = Vec::new();
                for n in 0..50 {
                    ids.push(queue.enqueue(job(&format!("producer-{p}"), n)).await.unwrap().id);
                    tokio::task::yield_now().await;
                }
                ids
            })
        })
        .collect();

    let mut sent = HashSet::new();
    for producer in producers {
        sent.extend(producer.await.unwrap());
    }

    eventually("all 100 jobs processed", || recorder.seen().len() >= 100).await;
    for handle in handles {
        handle.shutdown().await;
    }

    let seen = recorder.seen();
    let unique: HashSet<_> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 100, "a job was delivered twice");
    assert_eq!(unique, sent);
}

#[tokio::test]
async fn failing_and_panicking_jobs_do_not_stop_the_loop() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    queue.enqueue(job("fail", 0)).await.unwrap();
    queue.enqueue(job("panic", 1)).await.unwrap();
    let last = queue.enqueue(job("email", 2)).await.unwrap();

    let done = Arc::new(Mutex::new(Vec::new()));
    let sink = done.clone();
    let processor = FnProcessor::new(move |job: JobRecord| {
        let sink = sink.clone();
        async move {
            match job.job_type() {
                "fail" => Err(ProcessingError::new("smtp rejected")),
                "panic" => panic!("processor bug"),
                _ => {
                    sink.lock().unwrap().push(job.id);
                    Ok(())
                }
            }
        }
    });

    let handle = Worker::new(queue.clone(), Arc::new(processor), fast_config("w-1")).spawn();
    processed(&handle, 3).await;

    let stats = handle.stats();
    assert!(!handle.is_finished());
    handle.shutdown().await;

    assert_eq!(stats.jobs_succeeded, 1);
    assert_eq!(stats.jobs_failed, 2);
    assert_eq!(*done.lock().unwrap(), vec![last.id]);
    // At-most-once: failed jobs are gone.
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn store_outage_is_survived_and_backoff_resets() {
    let queue = FlakyQueue::new(u32::MAX);
    let recorder = Arc::new(Recorder::default());
    let handle = Worker::new(queue.clone(), recorder.clone(), fast_config("w-1")).spawn();

    eventually("several consecutive store errors", || {
        handle.stats().consecutive_store_errors >= 3
    })
    .await;
    assert!(!handle.is_finished());

    queue.heal();
    let sent = queue.enqueue(job("email", 0)).await.unwrap();
    processed(&handle, 1).await;

    let stats = handle.stats();
    handle.shutdown().await;

    assert_eq!(recorder.seen(), vec![sent.id]);
    assert!(stats.store_errors >= 3);
    assert_eq!(stats.consecutive_store_errors, 0);
}

#[tokio::test]
async fn shutdown_interrupts_a_long_cooldown() {
    let queue = FlakyQueue::new(u32::MAX);
    let config = fast_config("w-1").with_backoff(Backoff::fixed(Duration::from_secs(3600)));
    let handle = Worker::new(queue, Arc::new(Recorder::default()), config).spawn();

    eventually("first store error", || handle.stats().store_errors >= 1).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("worker did not stop during cooldown");
}

#[tokio::test]
async fn shutdown_lets_the_running_job_finish() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    queue.enqueue(job("slow", 0)).await.unwrap();

    let started = Arc::new(tokio::sync::Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));
    let (s, f) = (started.clone(), finished.clone());
    let processor = FnProcessor::new(move |_job: JobRecord| {
        let (s, f) = (s.clone(), f.clone());
        async move {
            s.notify_one();
            tokio::time::sleep(Duration::from_millis(100)).await;
            f.fetch_add(1, Ordering::SeqCst);
            Ok::<(), ProcessingError>(())
        }
    });

    let handle = Worker::new(queue, Arc::new(processor), fast_config("w-1")).spawn();
    started.notified().await;
    handle.shutdown().await;

    assert_eq!(finished.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn malformed_entries_are_skipped_without_cooldown() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    queue.push_raw("{\"id\":42}");
    let good = queue.enqueue(job("email", 0)).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let handle = Worker::new(queue, recorder.clone(), fast_config("w-1")).spawn();
    processed(&handle, 1).await;

    let stats = handle.stats();
    handle.shutdown().await;

    assert_eq!(recorder.seen(), vec![good.id]);
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.store_errors, 0);
}

#[tokio::test]
async fn at_least_once_redelivers_a_failed_job() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    queue.enqueue(job("email", 0)).await.unwrap();

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let processor = FnProcessor::new(move |_job: JobRecord| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            if attempt == 0 {
                Err(ProcessingError::new("transient"))
            } else {
                Ok(())
            }
        }
    });

    let config = fast_config("w-1").with_delivery(DeliveryMode::AtLeastOnce {
        visibility_timeout: Duration::from_millis(50),
    });
    let handle = Worker::new(queue.clone(), Arc::new(processor), config).spawn();

    eventually("job succeeds on redelivery", || handle.stats().jobs_succeeded >= 1).await;
    let stats = handle.stats();
    handle.shutdown().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(stats.jobs_failed, 1);
    assert_eq!(stats.requeued, 1);
    assert_eq!(queue.in_flight(), 0);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test]
async fn at_least_once_acknowledges_successful_jobs() {
    let queue = InMemoryJobQueue::arc("tasks_queue");
    for n in 0..3 {
        queue.enqueue(job("email", n)).await.unwrap();
    }

    let recorder = Arc::new(Recorder::default());
    let config = fast_config("w-1").with_delivery(DeliveryMode::at_least_once());
    let handle = Worker::new(queue.clone(), recorder.clone(), config).spawn();
    processed(&handle, 3).await;
    handle.shutdown().await;

    assert_eq!(recorder.seen().len(), 3);
    assert_eq!(queue.in_flight(), 0);
}
