#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{Endpoint, EndpointAddr, KeelError, OperationRequest};
use keel_ops::mock::{MockFactory, MockInstaller, MockManifests, RecordingSink};
use keel_ops::{Adapter, Catalog, ChannelSink};
use tokio_util::sync::CancellationToken;

struct Rig {
    adapter: Adapter,
    factory: MockFactory,
    installer: Arc<MockInstaller>,
    manifests: Arc<MockManifests>,
    sink: Arc<RecordingSink>,
}

fn rig_with(factory: MockFactory, installer: MockInstaller, manifests: MockManifests) -> Rig {
    let installer = Arc::new(installer);
    let manifests = Arc::new(manifests);
    let sink = Arc::new(RecordingSink::new());
    let adapter = Adapter::new(
        Catalog::builtin().unwrap(),
        Arc::new(factory.clone()),
        installer.clone(),
        manifests.clone(),
        sink.clone(),
    );
    Rig { adapter, factory, installer, manifests, sink }
}

fn rig(factory: MockFactory) -> Rig { rig_with(factory, MockInstaller::new(), MockManifests::new()) }

fn request(name: &str, delete: bool, n: usize) -> OperationRequest {
    OperationRequest {
        operation_name: name.into(),
        is_delete: delete,
        namespace: "mesh".into(),
        operation_id: "op-1".into(),
        targets: (0..n).map(|i| format!("cluster-{}", i)).collect(),
        custom_body: None,
    }
}

fn httpbin_endpoint() -> Endpoint {
    Endpoint {
        internal: Some(EndpointAddr { address: "10.96.0.12".into(), port: 8000 }),
        external: Some(EndpointAddr { address: "172.18.0.2".into(), port: 31080 }),
    }
}

#[tokio::test]
async fn unknown_operation_fails_with_one_event_and_no_fan_out() {
    let r = rig(MockFactory::new());
    let err = r.adapter.apply_operation(&CancellationToken::new(), &request("unknown", false, 2)).await.unwrap_err();
    assert_eq!(err, KeelError::OperationNotFound("unknown".into()));

    let events = r.sink.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].is_failure());
    assert_eq!(events[0].summary, "Error unknown operation name");
    assert_eq!(events[0].operation_id, "op-1");
    assert!(r.installer.calls().is_empty());
    assert!(r.manifests.calls().is_empty());
    assert_eq!(r.factory.connects(), 0);
}

#[tokio::test]
async fn blank_credential_fails_before_lookup() {
    let r = rig(MockFactory::new());
    let mut req = request("httpbin", false, 2);
    req.targets[1] = "   ".into();
    let err = r.adapter.apply_operation(&CancellationToken::new(), &req).await.unwrap_err();
    assert!(matches!(err, KeelError::InvalidCredential { index: 1, .. }));
    assert_eq!(r.sink.failures()[0].summary, "Error while reading target credentials");
    assert!(r.manifests.calls().is_empty());
}

#[tokio::test]
async fn chart_operation_passes_catalog_version() {
    let r = rig(MockFactory::new());
    r.adapter.apply_operation(&CancellationToken::new(), &request("consul_install", false, 3)).await.unwrap();

    let calls = r.installer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].version, "0.32.1");
    assert_eq!(calls[0].namespace, "mesh");
    assert_eq!(calls[0].targets, 3);
    assert!(!calls[0].delete);
    assert!(r.manifests.calls().is_empty());
}

#[tokio::test]
async fn chart_failure_aborts_before_endpoints() {
    let r = rig_with(MockFactory::new(), MockInstaller::failing(), MockManifests::new());
    let err = r.adapter.apply_operation(&CancellationToken::new(), &request("consul_install", false, 2)).await.unwrap_err();
    assert_eq!(err, KeelError::Install("chart repository unreachable".into()));

    let events = r.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].summary, "Error while deploying Consul Service Mesh");
    assert_eq!(r.factory.connects(), 0);
    assert!(r.factory.lookups().is_empty());
}

#[tokio::test]
async fn manifest_failure_aborts_before_endpoints() {
    let r = rig_with(MockFactory::new(), MockInstaller::new(), MockManifests::failing());
    let err = r.adapter.apply_operation(&CancellationToken::new(), &request("httpbin", true, 2)).await.unwrap_err();
    assert!(matches!(err, KeelError::Manifest(_)));
    assert_eq!(r.sink.failures()[0].summary, "Error while removing HTTPbin Application");
    assert!(r.sink.infos().is_empty());
    assert_eq!(r.factory.connects(), 0);
}

#[tokio::test]
async fn manifest_success_reports_endpoints() {
    let r = rig(MockFactory::new().endpoint("httpbin", httpbin_endpoint()));
    r.adapter.apply_operation(&CancellationToken::new(), &request("httpbin", false, 1)).await.unwrap();

    assert_eq!(r.manifests.calls(), vec!["httpbin"]);
    assert_eq!(r.factory.lookups(), vec![("cluster-0".to_string(), "httpbin".to_string())]);

    let infos = r.sink.infos();
    assert_eq!(infos.len(), 1);
    assert!(r.sink.failures().is_empty());
    let expected = "HTTPbin Application deployed successfully. Service endpoints for service httpbin: \
                    internal=10.96.0.12:8000, external=172.18.0.2:31080";
    assert_eq!(infos[0].summary, expected);
    assert_eq!(infos[0].details, expected);
}

#[tokio::test]
async fn endpoint_lookups_cover_every_target() {
    let r = rig(MockFactory::new().endpoint("httpbin", httpbin_endpoint()));
    r.adapter.apply_operation(&CancellationToken::new(), &request("httpbin", false, 3)).await.unwrap();

    let mut looked: Vec<String> = r.factory.lookups().into_iter().map(|(c, _)| c).collect();
    looked.sort();
    assert_eq!(looked, vec!["cluster-0", "cluster-1", "cluster-2"]);
    let info = &r.sink.infos()[0];
    assert_eq!(info.summary.matches("Service endpoints for service httpbin").count(), 3);
}

#[tokio::test]
async fn endpoint_failures_are_warnings_only() {
    // no endpoint registered for consul-ui
    let r = rig(MockFactory::new().fail_connect("cluster-1"));
    r.adapter.apply_operation(&CancellationToken::new(), &request("consul_install", false, 2)).await.unwrap();

    let failures = r.sink.failures();
    assert_eq!(failures.len(), 2);
    let summaries: Vec<&str> = failures.iter().map(|e| e.summary.as_str()).collect();
    assert!(summaries.contains(&"Unable to retrieve service endpoint for the service consul-ui."));
    assert!(summaries.contains(&"Unable to connect to target #1."));

    let infos = r.sink.infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].summary, "Deploying");
    // the final record comes after the warnings
    assert!(!r.sink.events().last().unwrap().is_failure());
}

#[tokio::test]
async fn delete_skips_endpoint_lookups() {
    let r = rig(MockFactory::new().endpoint("httpbin", httpbin_endpoint()));
    r.adapter.apply_operation(&CancellationToken::new(), &request("httpbin", true, 2)).await.unwrap();
    assert!(r.factory.lookups().is_empty());
    let infos = r.sink.infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].summary, "HTTPbin Application removed successfully.");
}

#[tokio::test]
async fn cancelled_token_only_affects_endpoints() {
    let r = rig(MockFactory::new().endpoint("httpbin", httpbin_endpoint()));
    let cancel = CancellationToken::new();
    cancel.cancel();
    r.adapter.apply_operation(&cancel, &request("httpbin", false, 1)).await.unwrap();
    assert_eq!(r.manifests.calls().len(), 1);
    assert_eq!(r.sink.failures().len(), 1);
    assert_eq!(r.sink.infos()[0].summary, "HTTPbin Application deployed successfully.");
}

#[tokio::test]
async fn channel_sink_receives_operation_events() {
    let (sink, mut rx) = ChannelSink::channel();
    let adapter = Adapter::new(
        Catalog::builtin().unwrap(),
        Arc::new(MockFactory::new()),
        Arc::new(MockInstaller::new()),
        Arc::new(MockManifests::new()),
        Arc::new(sink),
    );
    adapter.apply_operation(&CancellationToken::new(), &request("custom", false, 1)).await.unwrap();
    drop(adapter);

    let mut got = Vec::new();
    while let Some(ev) = rx.recv().await {
        got.push(ev);
    }
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].summary, "Custom YAML deployed successfully.");
    assert_eq!(got[0].component, "consul");
}
