//! Keel kubehub: build a `kube::Client` per kubeconfig credential and look up
//! service endpoints.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use k8s_openapi::api::core::v1::Service;
use keel_core::{ApplyOptions, ClientFactory, Endpoint, EndpointAddr, TargetClient};
use kube::{
    api::Api,
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Parse a serialized kubeconfig and build a client for its current context.
pub async fn client_from_kubeconfig(raw: &str) -> Result<(Client, String)> {
    if raw.trim().is_empty() {
        return Err(anyhow!("empty kubeconfig"));
    }
    let kubeconfig = Kubeconfig::from_yaml(raw).context("parsing kubeconfig")?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("loading kubeconfig context")?;
    let host = config.cluster_url.host().unwrap_or_default().to_string();
    let client = Client::try_from(config).context("creating kube client")?;
    Ok((client, host))
}

/// Factory that turns each credential into a fresh `KubeTarget`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeClientFactory;

#[async_trait::async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn TargetClient>> {
        let (client, api_host) = client_from_kubeconfig(credential).await?;
        counter!("kube_clients_built", 1u64);
        debug!(host = %api_host, "target client ready");
        Ok(Arc::new(KubeTarget { client, api_host }))
    }
}

/// One connected cluster.
#[derive(Clone)]
pub struct KubeTarget {
    client: Client,
    /// API server host, used as the external address of NodePort services.
    api_host: String,
}

impl KubeTarget {
    pub fn new(client: Client, api_host: impl Into<String>) -> Self { Self { client, api_host: api_host.into() } }
}

#[async_trait::async_trait]
impl TargetClient for KubeTarget {
    async fn apply_manifest(&self, manifest: &str, opts: &ApplyOptions) -> Result<()> {
        keel_apply::apply_manifest(&self.client, manifest, opts).await.map(|_| ())
    }

    async fn service_endpoint(&self, cancel: &CancellationToken, service: &str, namespace: &str) -> Result<Endpoint> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = tokio::select! {
            _ = cancel.cancelled() => return Err(anyhow!("endpoint lookup for {} cancelled", service)),
            res = api.get(service) => res.with_context(|| format!("fetching service {}/{}", namespace, service))?,
        };
        let ep = endpoint_of(&svc, &self.api_host)?;
        info!(service = %service, ns = %namespace, endpoint = %ep.describe(), "service endpoint resolved");
        Ok(ep)
    }
}

/// Derive internal and external addresses from a Service object.
///
/// Internal is `clusterIP:port` of the first port. External is the first
/// load-balancer ingress, or `api_host:nodePort` for NodePort services.
pub fn endpoint_of(svc: &Service, api_host: &str) -> Result<Endpoint> {
    let spec = svc.spec.as_ref().ok_or_else(|| anyhow!("service has no spec"))?;
    let port = spec
        .ports
        .as_ref()
        .and_then(|p| p.first())
        .ok_or_else(|| anyhow!("service exposes no ports"))?;

    let internal = spec
        .cluster_ip
        .as_ref()
        .filter(|ip| !ip.is_empty() && ip.as_str() != "None")
        .map(|ip| EndpointAddr { address: ip.clone(), port: port.port });

    let lb = svc
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|i| i.first())
        .and_then(|ing| ing.ip.clone().or_else(|| ing.hostname.clone()));

    let external = match (spec.type_.as_deref(), lb, port.node_port) {
        (Some("LoadBalancer"), Some(addr), _) => Some(EndpointAddr { address: addr, port: port.port }),
        (Some("LoadBalancer") | Some("NodePort"), None, Some(np)) if !api_host.is_empty() => {
            Some(EndpointAddr { address: api_host.to_string(), port: np })
        }
        _ => None,
    };
    Ok(Endpoint { internal, external })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(v: serde_json::Value) -> Service { serde_json::from_value(v).unwrap() }

    #[test]
    fn cluster_ip_service_has_internal_only() {
        let s = svc(serde_json::json!({
            "metadata": {"name": "consul-ui"},
            "spec": {"type": "ClusterIP", "clusterIP": "10.96.0.12", "ports": [{"port": 80}]}
        }));
        let ep = endpoint_of(&s, "192.168.49.2").unwrap();
        assert_eq!(ep.describe(), "internal=10.96.0.12:80, external=N/A");
    }

    #[test]
    fn load_balancer_prefers_ingress() {
        let s = svc(serde_json::json!({
            "metadata": {"name": "consul-ui"},
            "spec": {"type": "LoadBalancer", "clusterIP": "10.96.0.12", "ports": [{"port": 80, "nodePort": 30080}]},
            "status": {"loadBalancer": {"ingress": [{"ip": "34.1.2.3"}]}}
        }));
        let ep = endpoint_of(&s, "192.168.49.2").unwrap();
        assert_eq!(ep.external.unwrap().to_string(), "34.1.2.3:80");
    }

    #[test]
    fn node_port_uses_api_host() {
        let s = svc(serde_json::json!({
            "metadata": {"name": "httpbin"},
            "spec": {"type": "NodePort", "clusterIP": "10.96.0.40", "ports": [{"port": 8000, "nodePort": 31000}]}
        }));
        let ep = endpoint_of(&s, "192.168.49.2").unwrap();
        assert_eq!(ep.describe(), "internal=10.96.0.40:8000, external=192.168.49.2:31000");
    }

    #[test]
    fn portless_service_is_an_error() {
        let s = svc(serde_json::json!({"metadata": {"name": "x"}, "spec": {"clusterIP": "None"}}));
        assert!(endpoint_of(&s, "h").is_err());
    }

    #[tokio::test]
    async fn blank_kubeconfig_is_rejected() {
        let err = client_from_kubeconfig("  ").await.err().expect("error");
        assert!(err.to_string().contains("empty kubeconfig"));
    }
}
