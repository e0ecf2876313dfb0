//! Queue identity for watched Deployments
//!
//! An [`ObjectKey`] is the only thing that travels through the work queue. It is
//! derived from object metadata at the event boundary and used afterwards as the
//! lookup key for the live API, the local cache and the derived Service/Ingress.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("object has no name")]
    MissingName,
    #[error("object {0} has no namespace")]
    MissingNamespace(String),
}

/// Namespaced identity of a Deployment
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    namespace: String,
    name: String,
}

impl ObjectKey {
    /// Derive the key of a namespaced object from its metadata
    pub fn from_object<K: Resource>(obj: &K) -> Result<Self, KeyError> {
        Self::from_meta(obj.meta())
    }

    fn from_meta(meta: &ObjectMeta) -> Result<Self, KeyError> {
        let name = meta
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or(KeyError::MissingName)?;
        let namespace = meta
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or_else(|| KeyError::MissingNamespace(name.to_string()))?;

        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
