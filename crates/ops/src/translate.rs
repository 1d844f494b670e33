//! Generic component translation: render a component as a plain Kubernetes
//! object and apply it to every target.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::{
    ApplyOptions, ClientFactory, Component, ExecutionResult, KeelError, KeelResult, API_VERSION_ANNOTATION,
    KIND_ANNOTATION,
};
use serde::Serialize;
use tracing::{error, info};

use crate::fanout::{fan_out, merged_failure};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ArtifactMeta {
    pub name: String,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// A generic deployable object built from a component.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedArtifact {
    pub api_version: String,
    pub kind: String,
    pub metadata: ArtifactMeta,
    pub spec: serde_json::Map<String, serde_json::Value>,
}

impl RenderedArtifact {
    pub fn to_yaml(&self) -> KeelResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| KeelError::Serialization { component: self.metadata.name.clone(), reason: e.to_string() })
    }
}

/// Explicit values win; otherwise fall back to the workload annotations.
pub fn resolve_gvk(comp: &Component, api_version: Option<&str>, kind: Option<&str>) -> KeelResult<(String, String)> {
    fn pick(explicit: Option<&str>, comp: &Component, key: &str) -> Option<String> {
        explicit
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .or_else(|| comp.annotations.get(key).filter(|s| !s.is_empty()).cloned())
    }
    let api_version = pick(api_version, comp, API_VERSION_ANNOTATION)
        .ok_or_else(|| KeelError::Resolution { component: comp.name.clone(), field: "API Version" })?;
    let kind = pick(kind, comp, KIND_ANNOTATION).ok_or_else(|| KeelError::Resolution { component: comp.name.clone(), field: "kind" })?;
    Ok((api_version, kind))
}

pub fn render(comp: &Component, api_version: Option<&str>, kind: Option<&str>) -> KeelResult<RenderedArtifact> {
    let (api_version, kind) = resolve_gvk(comp, api_version, kind)?;
    Ok(RenderedArtifact {
        api_version,
        kind,
        metadata: ArtifactMeta { name: comp.name.clone(), annotations: comp.annotations.clone(), labels: comp.labels.clone() },
        spec: comp.spec.settings.clone(),
    })
}

pub fn status_message(kind: &str, comp: &Component, delete: bool) -> String {
    if delete {
        format!("deleted {} config \"{}\" in namespace \"{}\"", kind, comp.name, comp.namespace)
    } else {
        format!("created {} \"{}\" in namespace \"{}\"", kind, comp.name, comp.namespace)
    }
}

/// Render `comp` and apply it concurrently to every target.
///
/// Rendering failures return before any target is contacted. Target failures
/// are merged; the status message is returned either way.
pub async fn translate_and_apply(
    factory: Arc<dyn ClientFactory>,
    comp: &Component,
    delete: bool,
    api_version: Option<&str>,
    kind: Option<&str>,
    targets: &[String],
) -> ExecutionResult {
    let artifact = match render(comp, api_version, kind) {
        Ok(a) => a,
        Err(e) => return ExecutionResult::failed("", e),
    };
    let manifest = match artifact.to_yaml() {
        Ok(y) => Arc::new(y),
        Err(e) => {
            error!(component = %comp.name, error = %e, "manifest encoding failed");
            return ExecutionResult::failed("", e);
        }
    };
    let msg = status_message(&artifact.kind, comp, delete);
    let opts = Arc::new(ApplyOptions { namespace: comp.namespace.clone(), update: true, delete });

    let outcomes = fan_out(factory, targets, move |idx, client| {
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
        Some(err) => ExecutionResult::failed(msg, err),
        None => {
            info!(component = %comp.name, kind = %artifact.kind, targets = targets.len(), delete, "component applied");
            ExecutionResult::ok(msg)
        }
    }
}
