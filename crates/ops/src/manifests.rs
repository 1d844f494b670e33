//! Manifest-based operations: apply the operation's templates (or the
//! request's custom body) to every target.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use keel_core::{ApplyOptions, ClientFactory, ExecutionResult, KeelError, OperationDescriptor, OperationRequest};
use tracing::info;

use crate::fanout::{fan_out, merged_failure};
use crate::helm::status_labels;

/// Applies the manifests of an operation. Same status-label convention as
/// [`crate::helm::ChartInstaller`].
#[async_trait::async_trait]
pub trait ManifestRoutine: Send + Sync {
    async fn apply(&self, req: &OperationRequest, op: &OperationDescriptor, targets: &[String]) -> ExecutionResult;
}

/// Reads template files relative to `templates_dir`.
pub struct TemplateManifests {
    factory: Arc<dyn ClientFactory>,
    templates_dir: PathBuf,
}

impl TemplateManifests {
    pub fn new(factory: Arc<dyn ClientFactory>, templates_dir: impl Into<PathBuf>) -> Self {
        Self { factory, templates_dir: templates_dir.into() }
    }

    /// All manifest documents for `op`, joined into one YAML stream.
    pub async fn load(&self, req: &OperationRequest, op: &OperationDescriptor) -> Result<String> {
        if op.templates.is_empty() {
            return req
                .custom_body
                .clone()
                .filter(|b| !b.trim().is_empty())
                .ok_or_else(|| anyhow!("operation {} has no templates and the request carries no manifest body", op.name));
        }
        let mut docs = Vec::with_capacity(op.templates.len());
        for t in &op.templates {
            let path = self.templates_dir.join(t);
            let body = tokio::fs::read_to_string(&path).await.with_context(|| format!("reading template {}", path.display()))?;
            docs.push(body);
        }
        Ok(docs.join("\n---\n"))
    }
}

#[async_trait::async_trait]
impl ManifestRoutine for TemplateManifests {
    async fn apply(&self, req: &OperationRequest, op: &OperationDescriptor, targets: &[String]) -> ExecutionResult {
        let (active, done) = status_labels(req.is_delete);
        let manifest = match self.load(req, op).await {
            Ok(m) => Arc::new(m),
            Err(e) => return ExecutionResult::failed(active, KeelError::Manifest(format!("{:#}", e))),
        };
        let opts = Arc::new(ApplyOptions { namespace: req.namespace.clone(), update: true, delete: req.is_delete });
        let outcomes = fan_out(self.factory.clone(), targets, move |idx, client| {
            let manifest = manifest.clone();
            let opts = opts.clone();
            async move {
                client
                    .apply_manifest(&manifest, &opts)
                    .await
                    .map_err(|e| KeelError::Apply { target: idx, reason: format!("{:#}", e) })
            }
        })
        .await;
        match merged_failure(outcomes) {
            Some(err) => ExecutionResult::failed(active, KeelError::Manifest(err.to_string())),
            None => {
                info!(op = %op.name, ns = %req.namespace, targets = targets.len(), "manifests applied");
                ExecutionResult::ok(done)
            }
        }
    }
}
