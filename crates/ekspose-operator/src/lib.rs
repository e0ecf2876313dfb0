//! ekspose-operator: exposes every Deployment through a Service and an Ingress

pub mod cache;
pub mod config;
pub mod controllers;
pub mod events;
pub mod gateway;
pub mod health;
pub mod key;
pub mod queue;
pub mod rate_limit;
pub mod synthesize;

#[cfg(test)]
mod fixtures;

pub use config::OperatorConfig;
pub use key::ObjectKey;
