//! Event adapter between the Deployment watch and the work queue
//!
//! The watch reports raw object events; the reconciler only reacts to additions
//! and deletions. Both enqueue the object's key through the same path. Whether the
//! object still exists is decided later by a live read, never from the event.
//!
//! The watch does not distinguish a new object from a modified one, and objects
//! deleted while the watch was disconnected silently vanish from the next full
//! list. The adapter remembers which keys it has seen to recover both cases:
//! modifications of known objects are ignored, and known keys missing from a
//! re-list are reported as deletions.

use std::collections::HashSet;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher;
use tracing::{debug, trace, warn};

use crate::key::{KeyError, ObjectKey};
use crate::queue::WorkQueue;

/// Notification derived from a watch event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Added(ObjectKey),
    Deleted(ObjectKey),
}

impl Notification {
    pub fn key(&self) -> &ObjectKey {
        match self {
            Notification::Added(key) | Notification::Deleted(key) => key,
        }
    }
}

pub struct EventAdapter {
    queue: WorkQueue<ObjectKey>,
    /// Keys observed and not yet reported deleted
    known: HashSet<ObjectKey>,
    /// Keys seen during an in-progress re-list
    relisted: Option<HashSet<ObjectKey>>,
}

impl EventAdapter {
    pub fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self {
            queue,
            known: HashSet::new(),
            relisted: None,
        }
    }

    /// Handle an add notification for `deployment`
    pub fn on_add(&mut self, deployment: &Deployment) {
        match ObjectKey::from_object(deployment) {
            Ok(key) => {
                self.known.insert(key.clone());
                self.dispatch(Notification::Added(key));
            }
            Err(e) => reject(&e),
        }
    }

    /// Handle a delete notification for `deployment`
    pub fn on_delete(&mut self, deployment: &Deployment) {
        match ObjectKey::from_object(deployment) {
            Ok(key) => {
                self.known.remove(&key);
                self.dispatch(Notification::Deleted(key));
            }
            Err(e) => reject(&e),
        }
    }

    /// Translate a raw watch event into add/delete notifications
    pub fn handle(&mut self, event: &watcher::Event<Deployment>) {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitApply(deployment) => {
                if let (Some(relisted), Ok(key)) =
                    (self.relisted.as_mut(), ObjectKey::from_object(deployment))
                {
                    relisted.insert(key);
                }
                self.apply(deployment);
            }
            watcher::Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    let vanished: Vec<ObjectKey> =
                        self.known.difference(&relisted).cloned().collect();
                    for key in vanished {
                        self.known.remove(&key);
                        self.dispatch(Notification::Deleted(key));
                    }
                }
            }
            watcher::Event::Apply(deployment) => self.apply(deployment),
            watcher::Event::Delete(deployment) => self.on_delete(deployment),
        }
    }

    /// Added if never seen before; modifications are not reconciled
    fn apply(&mut self, deployment: &Deployment) {
        match ObjectKey::from_object(deployment) {
            Ok(key) if self.known.contains(&key) => {
                trace!(key = %key, "Ignoring modification of known Deployment");
            }
            Ok(_) => self.on_add(deployment),
            Err(e) => reject(&e),
        }
    }

    fn dispatch(&self, notification: Notification) {
        debug!(?notification, "Enqueueing Deployment");
        self.queue.add(notification.key().clone());
    }
}

fn reject(error: &KeyError) {
    warn!(error = %error, "Dropping Deployment event with unusable metadata");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_deployment, test_key};
    use std::time::Duration;

    async fn drain(queue: &WorkQueue<ObjectKey>) -> Vec<ObjectKey> {
        let mut keys = Vec::new();
        while let Ok(Some(key)) = tokio::time::timeout(Duration::from_millis(20), queue.get()).await
        {
            queue.done(&key);
            keys.push(key);
        }
        keys.sort();
        keys
    }

    #[tokio::test]
    async fn test_add_and_delete_enqueue_the_same_key() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());
        let web = test_deployment("default", "web", &[]);

        adapter.on_add(&web);
        assert_eq!(drain(&queue).await, vec![test_key("default", "web")]);

        adapter.on_delete(&web);
        assert_eq!(drain(&queue).await, vec![test_key("default", "web")]);
    }

    #[tokio::test]
    async fn test_add_then_delete_before_processing_is_one_item() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());
        let web = test_deployment("default", "web", &[]);

        adapter.on_add(&web);
        adapter.on_delete(&web);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_modification_of_known_deployment_is_ignored() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());
        let web = test_deployment("default", "web", &[("app", "web")]);

        adapter.handle(&watcher::Event::Apply(web.clone()));
        assert_eq!(drain(&queue).await.len(), 1);

        let mut relabelled = web;
        relabelled.metadata.generation = Some(2);
        adapter.handle(&watcher::Event::Apply(relabelled));
        assert!(drain(&queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_event_enqueues() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());
        let web = test_deployment("default", "web", &[]);

        adapter.handle(&watcher::Event::Apply(web.clone()));
        drain(&queue).await;
        adapter.handle(&watcher::Event::Delete(web.clone()));
        assert_eq!(drain(&queue).await, vec![test_key("default", "web")]);

        // Re-created after deletion counts as a new addition
        adapter.handle(&watcher::Event::Apply(web));
        assert_eq!(drain(&queue).await, vec![test_key("default", "web")]);
    }

    #[tokio::test]
    async fn test_initial_list_adds_everything() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());

        adapter.handle(&watcher::Event::Init);
        adapter.handle(&watcher::Event::InitApply(test_deployment("a", "one", &[])));
        adapter.handle(&watcher::Event::InitApply(test_deployment("b", "two", &[])));
        adapter.handle(&watcher::Event::InitDone);

        assert_eq!(
            drain(&queue).await,
            vec![test_key("a", "one"), test_key("b", "two")]
        );
    }

    #[tokio::test]
    async fn test_relist_reports_vanished_deployments() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());

        adapter.handle(&watcher::Event::Init);
        adapter.handle(&watcher::Event::InitApply(test_deployment("a", "one", &[])));
        adapter.handle(&watcher::Event::InitApply(test_deployment("a", "two", &[])));
        adapter.handle(&watcher::Event::InitDone);
        drain(&queue).await;

        // Watch restarted; "two" was deleted while disconnected
        adapter.handle(&watcher::Event::Init);
        adapter.handle(&watcher::Event::InitApply(test_deployment("a", "one", &[])));
        adapter.handle(&watcher::Event::InitDone);

        assert_eq!(drain(&queue).await, vec![test_key("a", "two")]);

        // Once reported, it is no longer known
        adapter.handle(&watcher::Event::Init);
        adapter.handle(&watcher::Event::InitApply(test_deployment("a", "one", &[])));
        adapter.handle(&watcher::Event::InitDone);
        assert!(drain(&queue).await.is_empty());
    }

    #[tokio::test]
    async fn test_event_without_namespace_is_dropped() {
        let queue = WorkQueue::new();
        let mut adapter = EventAdapter::new(queue.clone());

        let mut orphan = test_deployment("default", "web", &[]);
        orphan.metadata.namespace = None;
        adapter.handle(&watcher::Event::Apply(orphan.clone()));
        adapter.handle(&watcher::Event::Delete(orphan));

        assert!(queue.is_empty());
    }

    #[test]
    fn test_notification_key() {
        let key = test_key("default", "web");
        assert_eq!(Notification::Added(key.clone()).key(), &key);
        assert_eq!(Notification::Deleted(key.clone()).key(), &key);
    }
}
