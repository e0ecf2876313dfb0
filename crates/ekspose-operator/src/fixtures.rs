//! Shared builders for unit tests

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::store::Writer;
use kube::runtime::watcher;

use kube::core::ErrorResponse;

use crate::cache::DeploymentCache;
use crate::gateway::GatewayError;
use crate::key::ObjectKey;

pub fn test_deployment(namespace: &str, name: &str, pod_labels: &[(&str, &str)]) -> Deployment {
    let pod_labels: BTreeMap<String, String> = pod_labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels),
                    ..Default::default()
                }),
                spec: None,
            },
            ..Default::default()
        }),
        status: None,
    }
}

pub fn test_key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::from_object(&test_deployment(namespace, name, &[]))
        .expect("fixture deployments always carry a key")
}

/// Cache pre-populated with `deployments`; the writer is dropped
pub fn test_cache(deployments: Vec<Deployment>) -> DeploymentCache {
    let mut writer: Writer<Deployment> = Writer::default();
    for deployment in deployments {
        writer.apply_watcher_event(&watcher::Event::Apply(deployment));
    }
    DeploymentCache::new(writer.as_reader())
}

pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> GatewayError {
    GatewayError::NotFound {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

pub fn already_exists(kind: &'static str, namespace: &str, name: &str) -> GatewayError {
    GatewayError::AlreadyExists {
        kind,
        namespace: namespace.to_string(),
        name: name.to_string(),
    }
}

/// Transient API server failure
pub fn unavailable() -> GatewayError {
    GatewayError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: "etcdserver: request timed out".to_string(),
        reason: "ServiceUnavailable".to_string(),
        code: 503,
    }))
}
