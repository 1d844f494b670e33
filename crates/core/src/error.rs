//! Failure taxonomy, aggregation and classification.

use serde::{Deserialize, Serialize};

/// Failures surfaced by the dispatch engine.
///
/// Operation-level variants (`OperationNotFound`, `InvalidCredential`,
/// `Install`, `Manifest`) abort a request. Component- and target-level
/// variants are collected and folded into `Aggregate`.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum KeelError {
    #[error("operation not found: {0}")]
    OperationNotFound(String),
    #[error("invalid credential for target #{index}: {reason}")]
    InvalidCredential { index: usize, reason: String },
    #[error("empty version passed for service mesh installation: {component}")]
    MissingVersion { component: String },
    #[error("failed to get {field} for: {component}")]
    Resolution { component: String, field: &'static str },
    #[error("failed to encode manifest for {component}: {reason}")]
    Serialization { component: String, reason: String },
    #[error("target #{target}: failed to construct client: {reason}")]
    ClientConstruction { target: usize, reason: String },
    #[error("target #{target}: failed to apply manifest: {reason}")]
    Apply { target: usize, reason: String },
    #[error("chart install failed: {0}")]
    Install(String),
    #[error("manifest operation failed: {0}")]
    Manifest(String),
    #[error("unable to resolve endpoint for service {service}: {reason}")]
    EndpointResolution { service: String, reason: String },
    #[error("target #{target}: task aborted: {reason}")]
    TargetTask { target: usize, reason: String },
    #[error("{0}")]
    Aggregate(String),
}

pub type KeelResult<T> = Result<T, KeelError>;

/// Fold failures into one; `None` when there are none.
pub fn merge_errors(errs: Vec<KeelError>) -> Option<KeelError> {
    if errs.is_empty() {
        return None;
    }
    let texts: Vec<String> = errs.iter().map(|e| e.to_string()).collect();
    Some(KeelError::Aggregate(texts.join("\n")))
}

pub fn merge_msgs<S: AsRef<str>>(msgs: &[S]) -> String {
    msgs.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join("\n")
}

/// Metadata attached to failure events.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub code: u32,
    pub probable_cause: String,
    pub suggested_remediation: String,
}

/// Maps a failure to its code, cause and remedy.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, err: &KeelError) -> Classification;
}

/// Classifier backed by the fixed `KeelError` taxonomy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxonomyClassifier;

impl FailureClassifier for TaxonomyClassifier {
    fn classify(&self, err: &KeelError) -> Classification {
        let (code, cause, remedy) = match err {
            KeelError::OperationNotFound(_) => (
                1000,
                "The requested operation is not registered in the operation catalog.",
                "Check the operation name against the catalog (keelctl catalog).",
            ),
            KeelError::InvalidCredential { .. } => (
                1001,
                "A target credential is empty or unreadable.",
                "Provide a valid kubeconfig for every target cluster.",
            ),
            KeelError::MissingVersion { .. } => (
                1002,
                "The mesh component does not declare a version.",
                "Set spec.version on the mesh component.",
            ),
            KeelError::Resolution { .. } => (
                1003,
                "The component carries neither explicit nor annotated apiVersion/kind.",
                "Add the workload apiVersion and kind annotations to the component.",
            ),
            KeelError::Serialization { .. } => (
                1004,
                "The component settings could not be encoded as a manifest.",
                "Check the component settings for values that cannot be represented in YAML.",
            ),
            KeelError::ClientConstruction { .. } => (
                1005,
                "A Kubernetes client could not be built from the target credential.",
                "Verify the kubeconfig contents and that the cluster is reachable.",
            ),
            KeelError::Apply { .. } => (
                1006,
                "The cluster rejected the manifest.",
                "Inspect the manifest and the cluster's RBAC and admission configuration.",
            ),
            KeelError::Install(_) => (
                1007,
                "The chart installer failed.",
                "Check chart version, repository access and the installer logs.",
            ),
            KeelError::Manifest(_) => (
                1008,
                "The manifest operation could not be completed.",
                "Check the operation templates and the per-target errors.",
            ),
            KeelError::EndpointResolution { .. } => (
                1009,
                "The service does not exist yet or exposes no ports.",
                "Wait for the service to be created, then retry the lookup.",
            ),
            KeelError::TargetTask { .. } => (
                1010,
                "A per-target task terminated unexpectedly.",
                "Retry the request; report the failure if it persists.",
            ),
            KeelError::Aggregate(_) => (
                1011,
                "One or more components or targets failed.",
                "Review the individual errors listed in the details.",
            ),
        };
        Classification { code, probable_cause: cause.to_string(), suggested_remediation: remedy.to_string() }
    }
}
