//! Runtime settings and fixed exposure constants

use thiserror::Error;

/// Default number of concurrent worker loops
pub const DEFAULT_WORKERS: usize = 1;

/// Default port for the health probe server
pub const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Default number of backed-off retries before an identity waits for a new event
pub const DEFAULT_MAX_RETRIES: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workers must be at least 1")]
    NoWorkers,
    #[error("health port must be non-zero")]
    InvalidHealthPort,
}

/// Operator runtime settings
///
/// Fields are private to enforce invariants. Use [`OperatorConfig::new()`] for
/// validated construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    workers: usize,
    health_port: u16,
    max_retries: u32,
}

impl OperatorConfig {
    pub fn new(workers: usize, health_port: u16, max_retries: u32) -> Result<Self, ConfigError> {
        if workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if health_port == 0 {
            return Err(ConfigError::InvalidHealthPort);
        }

        Ok(Self {
            workers,
            health_port,
            max_retries,
        })
    }

    /// Number of worker loops pulling from the queue
    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn health_port(&self) -> u16 {
        self.health_port
    }

    /// Failed attempts per identity that are retried with backoff.
    /// Zero disables requeueing entirely.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            health_port: DEFAULT_HEALTH_PORT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// How a Deployment is exposed
pub mod exposure {
    /// Name of the single Service port
    pub const PORT_NAME: &str = "http";
    /// Service port and Ingress backend port
    pub const PORT: i32 = 80;
    /// Ingress path match type
    pub const PATH_TYPE: &str = "Prefix";
}

/// Annotations set on generated objects
pub mod annotations {
    /// Rewrites `/<name>/...` to `/...` before it reaches the backend
    pub const REWRITE_TARGET: &str = "nginx.ingress.kubernetes.io/rewrite-target";
    pub const REWRITE_TARGET_VALUE: &str = "/";
}

/// Labels set on generated objects
pub mod labels {
    pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
    pub const MANAGER: &str = "ekspose-operator";
}
