//! Deployment cache and watch source
//!
//! A reflector keeps an eventually-consistent mirror of every Deployment in the
//! cluster. The [`WatchSource`] drives the underlying watch and forwards each
//! event to the [`EventAdapter`]; the [`DeploymentCache`] serves reads from the
//! mirror and exposes the initial-list barrier.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::{store::Writer, ObjectRef, Store};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::EventAdapter;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("watch source stopped before the initial list completed")]
    SourceStopped,
}

/// Read handle on the local Deployment mirror
#[derive(Clone)]
pub struct DeploymentCache {
    store: Store<Deployment>,
    synced: Arc<AtomicBool>,
}

impl DeploymentCache {
    pub fn new(store: Store<Deployment>) -> Self {
        Self {
            store,
            synced: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cached Deployment `namespace/name`, if the mirror has seen it
    pub fn lookup(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }

    /// Whether the initial full list has been mirrored
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    /// Wait until the initial full list has been mirrored
    pub async fn wait_for_sync(&self) -> Result<(), CacheError> {
        self.store
            .wait_until_ready()
            .await
            .map_err(|_| CacheError::SourceStopped)?;
        self.synced.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Number of mirrored Deployments
    pub fn len(&self) -> usize {
        self.store.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Watch over all Deployments feeding the cache and the event adapter
pub struct WatchSource {
    api: Api<Deployment>,
    config: watcher::Config,
    writer: Writer<Deployment>,
    synced: Arc<AtomicBool>,
}

impl WatchSource {
    /// Watch Deployments in every namespace
    pub fn new(client: Client) -> (Self, DeploymentCache) {
        let (store, writer) = reflector::store();
        let cache = DeploymentCache::new(store);

        let source = Self {
            api: Api::all(client),
            config: watcher::Config::default(),
            writer,
            synced: Arc::clone(&cache.synced),
        };

        (source, cache)
    }

    /// Drive the watch until the stream ends, handing every event to `adapter`.
    ///
    /// Watch errors are logged and retried with the watcher's default backoff.
    pub async fn run(self, mut adapter: EventAdapter) {
        info!("Starting Deployment watch");

        let mut events = pin!(watcher(self.api, self.config)
            .default_backoff()
            .reflect(self.writer));

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if matches!(event, watcher::Event::InitDone) {
                        debug!("Deployment cache synced");
                        self.synced.store(true, Ordering::SeqCst);
                    }
                    adapter.handle(&event);
                }
                Err(e) => {
                    warn!(error = %e, "Deployment watch error, retrying with backoff");
                }
            }
        }

        warn!("Deployment watch stream ended");
    }
}
