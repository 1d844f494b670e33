//! Keel core types: components, operations, progress events and the
//! collaborator traits the dispatch engine talks through.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod target;

pub use error::{merge_errors, merge_msgs, Classification, FailureClassifier, KeelError, KeelResult, TaxonomyClassifier};
pub use event::{EventSink, ProgressEvent};
pub use target::{ApplyOptions, ClientFactory, Endpoint, EndpointAddr, TargetClient};

pub mod prelude {
    pub use super::{
        Component, ComponentSpec, Configuration, ConfiguredComponent, ExecutionResult, OperationCategory,
        OperationDescriptor, OperationRequest, Trait,
    };
    pub use super::error::{merge_errors, merge_msgs, KeelError, KeelResult};
    pub use super::event::{EventSink, ProgressEvent};
    pub use super::target::{ApplyOptions, ClientFactory, Endpoint, TargetClient};
}

/// Annotation carrying the target apiVersion of a generic component.
pub const API_VERSION_ANNOTATION: &str = "pattern.meshery.io.mesh.workload.k8sAPIVersion";
/// Annotation carrying the target kind of a generic component.
pub const KIND_ANNOTATION: &str = "pattern.meshery.io.mesh.workload.k8sKind";

/// Additional-properties key holding the chart version of a chart-based operation.
pub const HELM_CHART_VERSION_KEY: &str = "helm_chart_version";

/// A typed, named unit of desired state.
///
/// Mappings are `BTreeMap`s (and `serde_json::Map`, which is ordered) so that
/// rendering the same component twice yields identical bytes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub spec: ComponentSpec,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ComponentSpec {
    /// Type tag used to pick a handler.
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl Component {
    pub fn type_tag(&self) -> &str { &self.spec.component_type }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Trait {
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// Application configuration: which components get which traits.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Configuration {
    #[serde(default)]
    pub components: Vec<ConfiguredComponent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredComponent {
    #[serde(rename = "componentName")]
    pub component_name: String,
    #[serde(default)]
    pub traits: Vec<Trait>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    /// Installed through the chart installer.
    Chart,
    /// Applied as raw manifests.
    Manifest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationDescriptor {
    /// Catalog key; filled from the map key when loading a catalog.
    #[serde(default)]
    pub name: String,
    pub description: String,
    pub category: OperationCategory,
    #[serde(default)]
    pub additional_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub services: Vec<String>,
    /// Manifest files applied by manifest-based operations, in order.
    #[serde(default)]
    pub templates: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationRequest {
    pub operation_name: String,
    #[serde(default)]
    pub is_delete: bool,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub operation_id: String,
    /// Serialized kubeconfigs, one per target cluster.
    #[serde(default)]
    pub targets: Vec<String>,
    /// Manifest body for manifest operations without templates.
    #[serde(default)]
    pub custom_body: Option<String>,
}

/// Outcome of a dispatch-level call: combined message plus aggregated failure.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub message: String,
    pub error: Option<KeelError>,
}

impl ExecutionResult {
    pub fn ok(message: impl Into<String>) -> Self { Self { message: message.into(), error: None } }

    pub fn failed(message: impl Into<String>, error: KeelError) -> Self {
        Self { message: message.into(), error: Some(error) }
    }

    pub fn is_ok(&self) -> bool { self.error.is_none() }

    /// Convert into a `Result`, dropping the message on failure.
    pub fn into_result(self) -> KeelResult<String> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.message),
        }
    }
}
