use std::sync::Arc;

use tokio::sync::watch;

use taskq_infra::config::{StoreConfig, WorkerSettings};
use taskq_infra::queue::{JobQueue, RedisJobQueue};
use taskq_infra::workers::{SimulatedProcessor, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskq_observability::init();

    let store = StoreConfig::from_env()?;
    let settings = WorkerSettings::from_env()?;

    // One adapter per worker: a blocking pop holds the connection.
    let queue = Arc::new(RedisJobQueue::from_config(&store)?);
    if let Err(err) = queue.ping().await {
        tracing::warn!(queue = %store.queue_name, error = %err, "queue store not reachable at startup");
    }

    let processor = Arc::new(SimulatedProcessor::new(settings.simulated_work));
    let worker = Worker::new(queue, processor, settings.worker_config());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    tracing::info!(worker = %worker.name(), "waiting for jobs");
    worker.run(shutdown_rx).await;

    let stats = worker.stats();
    tracing::info!(
        jobs_processed = stats.jobs_processed,
        jobs_failed = stats.jobs_failed,
        store_errors = stats.store_errors,
        "worker exited"
    );
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown requested; finishing current job");
}
