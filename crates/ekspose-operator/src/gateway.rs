//! Control-plane gateway
//!
//! The only place that talks to the Kubernetes API for writes and live reads.
//! Errors are classified here so the reconciler can tell "gone" from "broken"
//! without inspecting HTTP status codes itself. Nothing is retried at this layer.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, instrument};

/// Operations the reconciler needs from the cluster API
///
/// This trait allows for mocking in tests while keeping the concrete
/// implementation for production use.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Live read of a Deployment, bypassing any cache
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Deployment, GatewayError>;

    /// Create a Service, returning the object as stored by the API server
    async fn create_service(&self, service: &Service) -> Result<Service, GatewayError>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;

    /// Create an Ingress, returning the object as stored by the API server
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError>;

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), GatewayError>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} rejected by API server: {message}")]
    Rejected {
        kind: &'static str,
        namespace: String,
        name: String,
        message: String,
    },
    #[error("{kind} object is missing {field}")]
    InvalidObject {
        kind: &'static str,
        field: &'static str,
    },
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }

    /// Whether repeating the same call can succeed without anything else changing
    pub fn is_retriable(&self) -> bool {
        match self {
            GatewayError::Kube(_) => true,
            GatewayError::NotFound { .. }
            | GatewayError::AlreadyExists { .. }
            | GatewayError::Rejected { .. }
            | GatewayError::InvalidObject { .. } => false,
        }
    }

    /// Map a kube client error for the object `namespace/name` of kind `kind`
    fn from_kube(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 404 => GatewayError::NotFound {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                GatewayError::AlreadyExists {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(resp) if resp.code == 400 || resp.code == 422 => {
                GatewayError::Rejected {
                    kind,
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    message: resp.message,
                }
            }
            other => GatewayError::Kube(other),
        }
    }
}

/// Namespace and name of an object about to be created
fn target_of<K: Resource>(obj: &K, kind: &'static str) -> Result<(String, String), GatewayError> {
    let namespace = obj
        .namespace()
        .ok_or(GatewayError::InvalidObject {
            kind,
            field: "metadata.namespace",
        })?;
    let name = obj.meta().name.clone().ok_or(GatewayError::InvalidObject {
        kind,
        field: "metadata.name",
    })?;
    Ok((namespace, name))
}

/// [`ControlPlane`] backed by a kube client
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ControlPlane for KubeGateway {
    #[instrument(skip(self))]
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Deployment, GatewayError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| GatewayError::from_kube(e, "Deployment", namespace, name))
    }

    #[instrument(skip(self, service), fields(name = %service.name_any()))]
    async fn create_service(&self, service: &Service) -> Result<Service, GatewayError> {
        let (namespace, name) = target_of(service, "Service")?;
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let created = api
            .create(&PostParams::default(), service)
            .await
            .map_err(|e| GatewayError::from_kube(e, "Service", &namespace, &name))?;

        debug!(namespace = %namespace, name = %name, "Created Service");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| GatewayError::from_kube(e, "Service", namespace, name))?;

        debug!("Deleted Service");
        Ok(())
    }

    #[instrument(skip(self, ingress), fields(name = %ingress.name_any()))]
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress, GatewayError> {
        let (namespace, name) = target_of(ingress, "Ingress")?;
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &namespace);
        let created = api
            .create(&PostParams::default(), ingress)
            .await
            .map_err(|e| GatewayError::from_kube(e, "Ingress", &namespace, &name))?;

        debug!(namespace = %namespace, name = %name, "Created Ingress");
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| GatewayError::from_kube(e, "Ingress", namespace, name))?;

        debug!("Deleted Ingress");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from test"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_from_kube_not_found() {
        let err = GatewayError::from_kube(api_error(404, "NotFound"), "Deployment", "default", "web");
        assert!(err.is_not_found());
        assert!(!err.is_retriable());
        assert_eq!(err.to_string(), "Deployment default/web not found");
    }

    #[test]
    fn test_from_kube_already_exists() {
        let err = GatewayError::from_kube(api_error(409, "AlreadyExists"), "Service", "default", "web");
        assert!(matches!(err, GatewayError::AlreadyExists { kind: "Service", .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_from_kube_conflict_is_retriable() {
        // Optimistic concurrency conflicts clear up on their own
        let err = GatewayError::from_kube(api_error(409, "Conflict"), "Service", "default", "web");
        assert!(matches!(err, GatewayError::Kube(_)));
        assert!(err.is_retriable());
    }

    #[test]
    fn test_from_kube_rejected() {
        let err = GatewayError::from_kube(api_error(422, "Invalid"), "Ingress", "default", "web");
        match &err {
            GatewayError::Rejected { message, .. } => assert_eq!(message, "Invalid from test"),
            other => panic!("expected Rejected, got {other:?}"),
        }
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_from_kube_server_error_is_retriable() {
        let err = GatewayError::from_kube(
            api_error(503, "ServiceUnavailable"),
            "Deployment",
            "default",
            "web",
        );
        assert!(!err.is_not_found());
        assert!(err.is_retriable());
    }

    #[test]
    fn test_target_of_requires_namespace() {
        let service = Service {
            metadata: kube::api::ObjectMeta {
                name: Some("web".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = target_of(&service, "Service").unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidObject {
                field: "metadata.namespace",
                ..
            }
        ));
    }
}
