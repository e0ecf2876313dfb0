//! Deployment reconciler
//!
//! Each dequeued key is reconciled from scratch against the live API:
//!
//! - Deployment exists: create its Service, then an Ingress for that Service
//! - Deployment is gone: delete the Service, then the Ingress
//!
//! The live read decides which branch runs, so the order in which add and delete
//! events arrived does not matter. Exactly one attempt is made per dequeue; any
//! retry goes back through the work queue.

use k8s_openapi::api::apps::v1::Deployment;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::gateway::GatewayError;
use crate::key::ObjectKey;
use crate::synthesize::{desired_ingress, desired_service, ingress_path};

use super::retry::{decide, ErrorKind, RetryDecision};
use super::ControllerContext;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to check Deployment: {0}")]
    Existence(#[source] GatewayError),
    #[error("failed to create Service: {0}")]
    CreateService(#[source] GatewayError),
    #[error("failed to create Ingress: {0}")]
    CreateIngress(#[source] GatewayError),
    #[error("failed to delete Service: {0}")]
    DeleteService(#[source] GatewayError),
    #[error("failed to delete Ingress: {0}")]
    DeleteIngress(#[source] GatewayError),
}

impl ReconcileError {
    fn gateway_error(&self) -> &GatewayError {
        match self {
            ReconcileError::Existence(e)
            | ReconcileError::CreateService(e)
            | ReconcileError::CreateIngress(e)
            | ReconcileError::DeleteService(e)
            | ReconcileError::DeleteIngress(e) => e,
        }
    }
}

/// Result of a successful reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Service and Ingress were created for an existing Deployment
    Converged,
    /// Service and Ingress of a deleted Deployment were removed
    TornDown,
}

/// Reconcile a single Deployment key
#[instrument(skip(key, ctx), fields(namespace = %key.namespace(), name = %key.name()))]
pub(crate) async fn reconcile(
    key: &ObjectKey,
    ctx: &ControllerContext,
) -> Result<Outcome, ReconcileError> {
    match ctx.gateway.get_deployment(key.namespace(), key.name()).await {
        Ok(live) => {
            converge(key, &live, ctx).await?;
            Ok(Outcome::Converged)
        }
        Err(e) if e.is_not_found() => {
            info!("Deployment no longer exists, removing its Service and Ingress");
            teardown(key, ctx).await?;
            Ok(Outcome::TornDown)
        }
        Err(e) => Err(ReconcileError::Existence(e)),
    }
}

/// Create the Service and Ingress for an existing Deployment
async fn converge(
    key: &ObjectKey,
    live: &Deployment,
    ctx: &ControllerContext,
) -> Result<(), ReconcileError> {
    // The mirror is the usual source; it can trail the live read right after creation
    let cached = ctx.cache.lookup(key.namespace(), key.name());
    let service = match cached.as_deref() {
        Some(deployment) => desired_service(deployment),
        None => {
            debug!("Deployment not cached yet, using live object");
            desired_service(live)
        }
    };

    let service = ctx
        .gateway
        .create_service(&service)
        .await
        .map_err(ReconcileError::CreateService)?;
    info!("Created Service");

    let ingress = desired_ingress(&service);
    ctx.gateway
        .create_ingress(&ingress)
        .await
        .map_err(ReconcileError::CreateIngress)?;
    info!(path = %ingress_path(key.name()), "Created Ingress");

    Ok(())
}

/// Delete the Service, then the Ingress, of a deleted Deployment
async fn teardown(key: &ObjectKey, ctx: &ControllerContext) -> Result<(), ReconcileError> {
    ctx.gateway
        .delete_service(key.namespace(), key.name())
        .await
        .map_err(ReconcileError::DeleteService)?;
    info!("Deleted Service");

    ctx.gateway
        .delete_ingress(key.namespace(), key.name())
        .await
        .map_err(ReconcileError::DeleteIngress)?;
    info!("Deleted Ingress");

    Ok(())
}

/// Classify error type for retry behavior
fn classify_error(error: &ReconcileError) -> ErrorKind {
    if error.gateway_error().is_retriable() {
        ErrorKind::Transient
    } else {
        ErrorKind::Permanent
    }
}

/// Record the outcome of an attempt with the queue.
///
/// Success and permanent failures reset the key's backoff; transient failures are
/// requeued with backoff until the retry budget is spent.
fn settle(key: &ObjectKey, result: Result<Outcome, ReconcileError>, ctx: &ControllerContext) {
    match result {
        Ok(outcome) => {
            debug!(key = %key, ?outcome, "Reconciled Deployment");
            ctx.queue.forget(key);
        }
        Err(error) => {
            let kind = classify_error(&error);
            let attempt = ctx.queue.num_requeues(key) + 1;

            warn!(
                key = %key,
                error = %error,
                attempt = attempt,
                error_kind = ?kind,
                "Reconciliation error"
            );

            match decide(attempt, ctx.max_retries, kind) {
                RetryDecision::Requeue => ctx.queue.add_rate_limited(key.clone()),
                RetryDecision::GiveUp => ctx.queue.forget(key),
            }
        }
    }
}

/// Take one key off the queue and reconcile it.
///
/// Returns `false` once the queue is shut down and drained.
pub async fn process_next_item(ctx: &ControllerContext) -> bool {
    let Some(key) = ctx.queue.get().await else {
        return false;
    };

    let result = reconcile(&key, ctx).await;
    settle(&key, result, ctx);
    ctx.queue.done(&key);

    true
}
