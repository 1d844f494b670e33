//! In-memory collaborators for tests: no cluster, no helm.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use keel_core::{
    ApplyOptions, ClientFactory, Endpoint, EventSink, ExecutionResult, KeelError, OperationDescriptor,
    OperationRequest, ProgressEvent, TargetClient,
};
use tokio_util::sync::CancellationToken;

use crate::helm::{status_labels, ChartInstaller};
use crate::manifests::ManifestRoutine;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(|p| p.into_inner()) }

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedManifest {
    pub credential: String,
    pub manifest: String,
    pub opts: ApplyOptions,
}

#[derive(Default)]
struct MockState {
    fail_connect: HashSet<String>,
    fail_apply: HashSet<String>,
    endpoints: HashMap<String, Endpoint>,
    connects: AtomicUsize,
    applied: Mutex<Vec<AppliedManifest>>,
    lookups: Mutex<Vec<(String, String)>>,
}

/// Client factory keyed by credential string. Credentials act as cluster names.
#[derive(Clone, Default)]
pub struct MockFactory {
    state: Arc<MockState>,
}

impl MockFactory {
    pub fn new() -> Self { Self::default() }

    /// Builder methods must run before the factory is cloned or shared.
    fn edit(mut self, f: impl FnOnce(&mut MockState)) -> Self {
        match Arc::get_mut(&mut self.state) {
            Some(s) => f(s),
            None => panic!("MockFactory configured after it was cloned; call builder methods first"),
        }
        self
    }

    pub fn fail_connect(self, credential: &str) -> Self { self.edit(|s| { s.fail_connect.insert(credential.to_string()); }) }

    pub fn fail_apply(self, credential: &str) -> Self { self.edit(|s| { s.fail_apply.insert(credential.to_string()); }) }

    /// Services not registered here fail to resolve.
    pub fn endpoint(self, service: &str, ep: Endpoint) -> Self { self.edit(|s| { s.endpoints.insert(service.to_string(), ep); }) }

    pub fn connects(&self) -> usize { self.state.connects.load(Ordering::SeqCst) }

    /// Successful applies, in completion order.
    pub fn applied(&self) -> Vec<AppliedManifest> { lock(&self.state.applied).clone() }

    /// `(credential, service)` pairs looked up.
    pub fn lookups(&self) -> Vec<(String, String)> { lock(&self.state.lookups).clone() }
}

#[async_trait::async_trait]
impl ClientFactory for MockFactory {
    async fn connect(&self, credential: &str) -> Result<Arc<dyn TargetClient>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_connect.contains(credential) {
            return Err(anyhow!("cannot reach cluster {}", credential));
        }
        Ok(Arc::new(MockTarget { credential: credential.to_string(), state: self.state.clone() }))
    }
}

struct MockTarget {
    credential: String,
    state: Arc<MockState>,
}

#[async_trait::async_trait]
impl TargetClient for MockTarget {
    async fn apply_manifest(&self, manifest: &str, opts: &ApplyOptions) -> Result<()> {
        tokio::task::yield_now().await;
        if self.state.fail_apply.contains(&self.credential) {
            return Err(anyhow!("admission webhook denied the request"));
        }
        lock(&self.state.applied).push(AppliedManifest {
            credential: self.credential.clone(),
            manifest: manifest.to_string(),
            opts: opts.clone(),
        });
        Ok(())
    }

    async fn service_endpoint(&self, cancel: &CancellationToken, service: &str, _namespace: &str) -> Result<Endpoint> {
        lock(&self.state.lookups).push((self.credential.clone(), service.to_string()));
        if cancel.is_cancelled() {
            return Err(anyhow!("cancelled"));
        }
        self.state.endpoints.get(service).cloned().ok_or_else(|| anyhow!("services \"{}\" not found", service))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCall {
    pub delete: bool,
    pub version: String,
    pub namespace: String,
    pub targets: usize,
}

/// Chart installer that records calls.
#[derive(Default)]
pub struct MockInstaller {
    fail: bool,
    calls: Mutex<Vec<InstallCall>>,
}

impl MockInstaller {
    pub fn new() -> Self { Self::default() }

    pub fn failing() -> Self { Self { fail: true, ..Default::default() } }

    pub fn calls(&self) -> Vec<InstallCall> { lock(&self.calls).clone() }
}

#[async_trait::async_trait]
impl ChartInstaller for MockInstaller {
    async fn install(&self, delete: bool, version: &str, namespace: &str, targets: &[String]) -> ExecutionResult {
        lock(&self.calls).push(InstallCall { delete, version: version.to_string(), namespace: namespace.to_string(), targets: targets.len() });
        let (active, done) = status_labels(delete);
        if self.fail {
            return ExecutionResult::failed(active, KeelError::Install("chart repository unreachable".into()));
        }
        ExecutionResult::ok(done)
    }
}

/// Manifest routine that records operation names.
#[derive(Default)]
pub struct MockManifests {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl MockManifests {
    pub fn new() -> Self { Self::default() }

    pub fn failing() -> Self { Self { fail: true, ..Default::default() } }

    pub fn calls(&self) -> Vec<String> { lock(&self.calls).clone() }
}

#[async_trait::async_trait]
impl ManifestRoutine for MockManifests {
    async fn apply(&self, req: &OperationRequest, op: &OperationDescriptor, _targets: &[String]) -> ExecutionResult {
        lock(&self.calls).push(op.name.clone());
        let (active, done) = status_labels(req.is_delete);
        if self.fail {
            return ExecutionResult::failed(active, KeelError::Manifest("template rejected".into()));
        }
        ExecutionResult::ok(done)
    }
}

/// Sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self { Self::default() }

    pub fn events(&self) -> Vec<ProgressEvent> { lock(&self.events).clone() }

    pub fn infos(&self) -> Vec<ProgressEvent> { self.events().into_iter().filter(|e| !e.is_failure()).collect() }

    pub fn failures(&self) -> Vec<ProgressEvent> { self.events().into_iter().filter(|e| e.is_failure()).collect() }
}

impl EventSink for RecordingSink {
    fn info(&self, event: ProgressEvent) { lock(&self.events).push(event); }

    fn error(&self, event: ProgressEvent, _err: &KeelError) { lock(&self.events).push(event); }
}
