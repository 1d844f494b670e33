//! Seams to target clusters: client construction, manifest apply and
//! service endpoint lookup.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Namespace used for namespaced objects that do not carry one.
    pub namespace: String,
    /// Overwrite existing objects instead of failing on conflict.
    pub update: bool,
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointAddr {
    pub address: String,
    pub port: i32,
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.address, self.port) }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub internal: Option<EndpointAddr>,
    pub external: Option<EndpointAddr>,
}

impl Endpoint {
    /// `internal=<addr:port|N/A>, external=<addr:port|N/A>`
    pub fn describe(&self) -> String {
        let show = |a: &Option<EndpointAddr>| a.as_ref().map(|a| a.to_string()).unwrap_or_else(|| "N/A".to_string());
        format!("internal={}, external={}", show(&self.internal), show(&self.external))
    }
}

/// A connected target cluster.
#[async_trait::async_trait]
pub trait TargetClient: Send + Sync {
    /// Apply (or delete) every document of a YAML manifest.
    async fn apply_manifest(&self, manifest: &str, opts: &ApplyOptions) -> anyhow::Result<()>;

    /// Resolve reachable addresses for a service.
    async fn service_endpoint(&self, cancel: &CancellationToken, service: &str, namespace: &str) -> anyhow::Result<Endpoint>;
}

/// Builds a fresh client per credential; clients are never cached.
#[async_trait::async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, credential: &str) -> anyhow::Result<Arc<dyn TargetClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_fills_missing_with_na() {
        let ep = Endpoint { internal: Some(EndpointAddr { address: "10.0.0.7".into(), port: 8500 }), external: None };
        assert_eq!(ep.describe(), "internal=10.0.0.7:8500, external=N/A");
        assert_eq!(Endpoint::default().describe(), "internal=N/A, external=N/A");
    }
}
