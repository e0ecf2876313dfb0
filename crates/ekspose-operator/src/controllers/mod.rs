//! Deployment exposure controller
//!
//! Wires the watch source, work queue and worker loops together. Workers only
//! start once the Deployment cache holds a full initial list.

pub mod deployment;
pub mod retry;

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{CacheError, DeploymentCache, WatchSource};
use crate::config::OperatorConfig;
use crate::events::EventAdapter;
use crate::gateway::ControlPlane;
use crate::health::HealthState;
use crate::key::ObjectKey;
use crate::queue::WorkQueue;

pub use deployment::process_next_item;

/// Shared state for the reconciler and its workers
pub struct ControllerContext {
    /// Cluster API for live reads and writes
    pub gateway: Arc<dyn ControlPlane>,
    /// Local Deployment mirror
    pub cache: DeploymentCache,
    /// Keys pending reconciliation
    pub queue: WorkQueue<ObjectKey>,
    /// Backed-off retries per key before waiting for a new event
    pub max_retries: u32,
}

impl ControllerContext {
    pub fn new(gateway: Arc<dyn ControlPlane>, cache: DeploymentCache, max_retries: u32) -> Self {
        Self {
            gateway,
            cache,
            queue: WorkQueue::new(),
            max_retries,
        }
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("shutdown requested before the Deployment cache synced")]
    SyncAborted,
    #[error("Deployment cache failed to sync: {0}")]
    Cache(#[from] CacheError),
}

/// Pull keys until the queue shuts down
pub async fn worker(ctx: Arc<ControllerContext>, id: usize) {
    info!(worker = id, "Worker started");
    while process_next_item(&ctx).await {}
    info!(worker = id, "Worker stopped");
}

/// Run the controller until `shutdown` is cancelled.
///
/// Blocks until the Deployment cache has synced before starting workers. On
/// shutdown the queue is drained and in-flight reconciliations run to completion.
pub async fn run(
    ctx: Arc<ControllerContext>,
    source: WatchSource,
    config: &OperatorConfig,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
) -> Result<(), ControllerError> {
    let adapter = EventAdapter::new(ctx.queue.clone());
    run_with_watch(ctx, source.run(adapter), config.workers(), health, shutdown).await
}

async fn run_with_watch<W>(
    ctx: Arc<ControllerContext>,
    watch: W,
    workers: usize,
    health: Arc<HealthState>,
    shutdown: CancellationToken,
) -> Result<(), ControllerError>
where
    W: Future<Output = ()> + Send + 'static,
{
    info!(workers, "Starting Deployment exposure controller");
    let watch = tokio::spawn(watch);

    info!("Waiting for Deployment cache to sync");
    let synced = select! {
        biased;
        _ = shutdown.cancelled() => Err(ControllerError::SyncAborted),
        result = ctx.cache.wait_for_sync() => result.map_err(ControllerError::from),
    };
    if let Err(e) = synced {
        ctx.queue.shutdown();
        watch.abort();
        return Err(e);
    }

    info!(cached = ctx.cache.len(), "Deployment cache synced");
    health.mark_ready();

    let handles: Vec<_> = (0..workers)
        .map(|id| tokio::spawn(worker(Arc::clone(&ctx), id)))
        .collect();

    shutdown.cancelled().await;

    info!("Shutting down controller");
    health.mark_not_ready();
    ctx.queue.shutdown();

    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = ?e, "Worker task failed");
        }
    }
    watch.abort();

    info!("Controller stopped");
    Ok(())
}
