//! Keel Ops: dispatch of declarative components and catalog operations,
//! executed concurrently against every target cluster.
//!
//! [`Adapter`] is the entry point. Component lists go through the
//! [`registry::Registry`] (mesh handler or generic translator), operations
//! through the [`catalog::Catalog`] and then the chart installer or manifest
//! routine, followed by best-effort endpoint reporting.

#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{
    merge_errors, merge_msgs, ClientFactory, Component, Configuration, EventSink, ExecutionResult, FailureClassifier,
    KeelError, KeelResult, OperationCategory, OperationRequest, ProgressEvent, TaxonomyClassifier,
    HELM_CHART_VERSION_KEY,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

pub mod catalog;
pub mod endpoints;
pub mod events;
pub mod fanout;
pub mod helm;
pub mod manifests;
pub mod mock;
pub mod registry;
pub mod translate;

pub use catalog::Catalog;
pub use events::{ChannelSink, Emitter, TracingSink};
pub use helm::{ChartInstaller, HelmCli};
pub use manifests::{ManifestRoutine, TemplateManifests};
pub use registry::{ComponentType, Registry};

/// Identity stamped on every progress event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub kind: String,
    pub name: String,
}

impl Default for AdapterInfo {
    fn default() -> Self { Self { kind: "consul".into(), name: "keel-consul".into() } }
}

pub struct Adapter {
    info: AdapterInfo,
    catalog: Catalog,
    registry: Registry,
    factory: Arc<dyn ClientFactory>,
    installer: Arc<dyn ChartInstaller>,
    manifests: Arc<dyn ManifestRoutine>,
    emitter: Emitter,
}

impl Adapter {
    pub fn new(
        catalog: Catalog,
        factory: Arc<dyn ClientFactory>,
        installer: Arc<dyn ChartInstaller>,
        manifests: Arc<dyn ManifestRoutine>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            info: AdapterInfo::default(),
            catalog,
            registry: Registry::new(factory.clone(), installer.clone()),
            factory,
            installer,
            manifests,
            emitter: Emitter::new(sink, Arc::new(TaxonomyClassifier)),
        }
    }

    pub fn with_info(mut self, info: AdapterInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.emitter = self.emitter.with_classifier(classifier);
        self
    }

    pub fn catalog(&self) -> &Catalog { &self.catalog }

    fn event(&self, operation_id: impl Into<String>) -> ProgressEvent {
        ProgressEvent::new(operation_id, self.info.kind.clone(), self.info.name.clone())
    }

    /// Process components in order, one event each. A failing component does
    /// not stop the ones after it; failures are merged at the end.
    pub async fn handle_components(&self, comps: &[Component], delete: bool, targets: &[String]) -> ExecutionResult {
        let (active, done) = helm::status_labels(delete);
        let mut errs: Vec<KeelError> = Vec::new();
        let mut msgs: Vec<String> = Vec::new();
        for comp in comps {
            let ev = self.event(Uuid::new_v4().to_string());
            let ty = ComponentType::of(comp.type_tag());
            let res = self.registry.resolve(ty).handle(comp, delete, targets).await;
            if let Some(err) = res.error {
                warn!(component = %comp.name, kind = %comp.type_tag(), error = %err, "component failed");
                self.emitter.fail(ev, format!("Error while {} {}", active, comp.type_tag()), &err);
                errs.push(err);
                continue;
            }
            let ev = if ty.is_specialized() {
                ev.with_summary(
                    format!("{} {} {} successfully", comp.name, comp.type_tag(), done),
                    format!("The {} {} is now {}.", comp.name, comp.type_tag(), done),
                )
            } else {
                ev.with_summary(
                    format!("{} {} successfully", comp.type_tag(), done),
                    format!("The {} is now {}.", comp.type_tag(), done),
                )
            };
            self.emitter.info(ev);
            msgs.push(res.message);
        }
        ExecutionResult { message: merge_msgs(&msgs), error: merge_errors(errs) }
    }

    /// Record every trait of every configured component. Traits are not
    /// applied to anything.
    pub fn handle_application_configuration(&self, config: &Configuration) -> ExecutionResult {
        let msgs: Vec<String> = config
            .components
            .iter()
            .flat_map(|c| c.traits.iter().map(move |t| format!("applied trait \"{}\" on service \"{}\"", t.name, c.component_name)))
            .collect();
        ExecutionResult::ok(merge_msgs(&msgs))
    }

    /// Run a catalog operation on every target.
    ///
    /// Invalid credentials, unknown operations and installer or manifest
    /// failures abort the request. Endpoint reporting afterwards never fails it.
    pub async fn apply_operation(&self, cancel: &CancellationToken, req: &OperationRequest) -> KeelResult<()> {
        let ev = self.event(req.operation_id.clone())
            .with_summary(if req.is_delete { "Removing" } else { "Deploying" }, "None");

        if let Err(err) = ensure_targets(&req.targets) {
            self.emitter.fail(ev, "Error while reading target credentials", &err);
            return Err(err);
        }

        let op = match self.catalog.lookup(&req.operation_name) {
            Ok(op) => op,
            Err(err) => {
                self.emitter.fail(ev, "Error unknown operation name", &err);
                return Err(err);
            }
        };
        info!(op = %op.name, ns = %req.namespace, delete = req.is_delete, targets = req.targets.len(), "operation start");

        let ev = match op.category {
            OperationCategory::Chart => {
                let version = op.additional_properties.get(HELM_CHART_VERSION_KEY).map(String::as_str).unwrap_or("");
                let res = self.installer.install(req.is_delete, version, &req.namespace, &req.targets).await;
                if let Some(err) = res.error {
                    self.emitter.fail(ev, format!("Error while {} {}", res.message, op.description), &err);
                    return Err(err);
                }
                ev
            }
            OperationCategory::Manifest => {
                let res = self.manifests.apply(req, op, &req.targets).await;
                if let Some(err) = res.error {
                    self.emitter.fail(ev, format!("Error while {} {}", res.message, op.description), &err);
                    return Err(err);
                }
                let summary = format!("{} {} successfully.", op.description, res.message);
                ev.with_summary(summary.clone(), summary)
            }
        };

        endpoints::report_endpoints(self.factory.clone(), &self.emitter, cancel, req, op, ev).await;
        Ok(())
    }
}

/// Every credential must carry something; the content is checked when the
/// client is built.
fn ensure_targets(targets: &[String]) -> KeelResult<()> {
    match targets.iter().position(|t| t.trim().is_empty()) {
        Some(index) => Err(KeelError::InvalidCredential { index, reason: "empty kubeconfig".into() }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_credential_is_rejected() {
        assert!(ensure_targets(&[]).is_ok());
        assert!(ensure_targets(&["apiVersion: v1".to_string()]).is_ok());
        let err = ensure_targets(&["a".to_string(), " \n".to_string()]).unwrap_err();
        assert_eq!(err, KeelError::InvalidCredential { index: 1, reason: "empty kubeconfig".into() });
    }

    #[test]
    fn default_identity() {
        let info = AdapterInfo::default();
        assert_eq!(info.kind, "consul");
    }
}
