//! Desired Service and Ingress for a Deployment
//!
//! Pure derivations: the same Deployment always yields the same objects. The
//! Service and Ingress reuse the Deployment's namespace and name, which is the
//! only link teardown relies on.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::config::{annotations, exposure, labels};

/// Pod-template labels of a Deployment, used as the Service selector
pub fn pod_template_labels(deployment: &Deployment) -> Option<BTreeMap<String, String>> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.metadata.as_ref())
        .and_then(|meta| meta.labels.clone())
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(labels::MANAGED_BY.to_string(), labels::MANAGER.to_string())])
}

/// Service selecting the Deployment's pods on the fixed HTTP port
pub fn desired_service(deployment: &Deployment) -> Service {
    Service {
        metadata: ObjectMeta {
            name: deployment.metadata.name.clone(),
            namespace: deployment.metadata.namespace.clone(),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: pod_template_labels(deployment),
            ports: Some(vec![ServicePort {
                name: Some(exposure::PORT_NAME.to_string()),
                port: exposure::PORT,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Path prefix an exposed Service is served under
pub fn ingress_path(service_name: &str) -> String {
    format!("/{service_name}")
}

/// Ingress routing `/<service name>` to the Service's HTTP port
pub fn desired_ingress(service: &Service) -> Ingress {
    let service_name = service.metadata.name.clone().unwrap_or_default();

    let path = HTTPIngressPath {
        path: Some(ingress_path(&service_name)),
        path_type: exposure::PATH_TYPE.to_string(),
        backend: IngressBackend {
            service: Some(IngressServiceBackend {
                name: service_name.clone(),
                port: Some(ServiceBackendPort {
                    number: Some(exposure::PORT),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        },
    };

    Ingress {
        metadata: ObjectMeta {
            name: service.metadata.name.clone(),
            namespace: service.metadata.namespace.clone(),
            labels: Some(managed_labels()),
            annotations: Some(BTreeMap::from([(
                annotations::REWRITE_TARGET.to_string(),
                annotations::REWRITE_TARGET_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue { paths: vec![path] }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::test_deployment;

    fn paths(ingress: &Ingress) -> &[HTTPIngressPath] {
        &ingress
            .spec
            .as_ref()
            .and_then(|s| s.rules.as_ref())
            .and_then(|r| r.first())
            .and_then(|r| r.http.as_ref())
            .expect("ingress should have one HTTP rule")
            .paths
    }

    #[test]
    fn test_desired_service() {
        let deployment = test_deployment("default", "web", &[("app", "web")]);
        let service = desired_service(&deployment);

        assert_eq!(service.metadata.name.as_deref(), Some("web"));
        assert_eq!(service.metadata.namespace.as_deref(), Some("default"));

        let spec = service.spec.expect("service should have a spec");
        assert_eq!(
            spec.selector,
            Some(BTreeMap::from([("app".to_string(), "web".to_string())]))
        );
        let ports = spec.ports.expect("service should expose ports");
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name.as_deref(), Some("http"));
        assert_eq!(ports[0].port, 80);
    }

    #[test]
    fn test_desired_service_is_labelled() {
        let service = desired_service(&test_deployment("default", "web", &[]));
        let service_labels = service.metadata.labels.expect("service should be labelled");
        assert_eq!(
            service_labels.get(labels::MANAGED_BY).map(String::as_str),
            Some(labels::MANAGER)
        );
    }

    #[test]
    fn test_desired_service_without_template_labels() {
        let mut deployment = test_deployment("default", "web", &[]);
        deployment.spec.as_mut().unwrap().template.metadata = None;

        let service = desired_service(&deployment);
        assert_eq!(service.spec.and_then(|s| s.selector), None);
    }

    #[test]
    fn test_desired_ingress() {
        let deployment = test_deployment("default", "web", &[("app", "web")]);
        let ingress = desired_ingress(&desired_service(&deployment));

        assert_eq!(ingress.metadata.name.as_deref(), Some("web"));
        assert_eq!(ingress.metadata.namespace.as_deref(), Some("default"));
        assert_eq!(
            ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get("nginx.ingress.kubernetes.io/rewrite-target"))
                .map(String::as_str),
            Some("/")
        );

        let paths = paths(&ingress);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path.as_deref(), Some("/web"));
        assert_eq!(paths[0].path_type, "Prefix");

        let backend = paths[0]
            .backend
            .service
            .as_ref()
            .expect("path should route to a service");
        assert_eq!(backend.name, "web");
        assert_eq!(backend.port.as_ref().and_then(|p| p.number), Some(80));
    }

    #[test]
    fn test_synthesis_is_deterministic() {
        let deployment = test_deployment("team-a", "api", &[("app", "api"), ("tier", "backend")]);

        let first_service = desired_service(&deployment);
        let second_service = desired_service(&deployment);
        assert_eq!(first_service, second_service);
        assert_eq!(
            desired_ingress(&first_service),
            desired_ingress(&second_service)
        );
    }

    #[test]
    fn test_names_follow_the_deployment() {
        for (namespace, name) in [("default", "web"), ("payments", "checkout-v2"), ("a", "b")] {
            let deployment = test_deployment(namespace, name, &[("app", name)]);
            let service = desired_service(&deployment);
            let ingress = desired_ingress(&service);

            assert_eq!(service.metadata.name.as_deref(), Some(name));
            assert_eq!(service.metadata.namespace.as_deref(), Some(namespace));
            assert_eq!(ingress.metadata.name.as_deref(), Some(name));
            assert_eq!(ingress.metadata.namespace.as_deref(), Some(namespace));
        }
    }

    #[test]
    fn test_ingress_follows_created_service() {
        // The API server may fill in fields; only name and namespace are consumed
        let mut created = desired_service(&test_deployment("default", "web", &[("app", "web")]));
        created.metadata.uid = Some("server-assigned".to_string());
        created.spec.as_mut().unwrap().cluster_ip = Some("10.96.0.12".to_string());

        let ingress = desired_ingress(&created);
        assert_eq!(ingress.metadata.uid, None);
        assert_eq!(paths(&ingress)[0].path.as_deref(), Some("/web"));
    }
}
