//! Component handlers, keyed by a closed set of component types.

use std::sync::Arc;

use keel_core::{ClientFactory, Component, ExecutionResult, KeelError};

use crate::helm::ChartInstaller;
use crate::translate::translate_and_apply;

/// Type tag handled by the mesh handler.
pub const MESH_COMPONENT_TYPE: &str = "ConsulMesh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    /// The service mesh itself, installed through the chart installer.
    Mesh,
    /// Anything else: rendered from annotations and applied as-is.
    Generic,
}

impl ComponentType {
    pub fn of(tag: &str) -> Self {
        match tag {
            MESH_COMPONENT_TYPE => ComponentType::Mesh,
            _ => ComponentType::Generic,
        }
    }

    /// Whether a dedicated handler exists (as opposed to the generic fallback).
    pub fn is_specialized(self) -> bool { !matches!(self, ComponentType::Generic) }
}

#[async_trait::async_trait]
pub trait ComponentHandler: Send + Sync {
    async fn handle(&self, comp: &Component, delete: bool, targets: &[String]) -> ExecutionResult;
}

/// Installs the mesh at `spec.version` into the component's namespace.
pub struct MeshHandler {
    installer: Arc<dyn ChartInstaller>,
}

impl MeshHandler {
    pub fn new(installer: Arc<dyn ChartInstaller>) -> Self { Self { installer } }
}

#[async_trait::async_trait]
impl ComponentHandler for MeshHandler {
    async fn handle(&self, comp: &Component, delete: bool, targets: &[String]) -> ExecutionResult {
        if comp.spec.version.is_empty() {
            return ExecutionResult::failed("", KeelError::MissingVersion { component: comp.name.clone() });
        }
        let res = self.installer.install(delete, &comp.spec.version, &comp.namespace, targets).await;
        ExecutionResult { message: format!("{}: {}", comp.name, res.message), error: res.error }
    }
}

/// Fallback for every component without a dedicated handler.
pub struct GenericHandler {
    factory: Arc<dyn ClientFactory>,
}

impl GenericHandler {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self { Self { factory } }
}

#[async_trait::async_trait]
impl ComponentHandler for GenericHandler {
    async fn handle(&self, comp: &Component, delete: bool, targets: &[String]) -> ExecutionResult {
        translate_and_apply(self.factory.clone(), comp, delete, None, None, targets).await
    }
}

/// One handler per `ComponentType`, fixed at construction.
pub struct Registry {
    mesh: Arc<dyn ComponentHandler>,
    generic: Arc<dyn ComponentHandler>,
}

impl Registry {
    pub fn new(factory: Arc<dyn ClientFactory>, installer: Arc<dyn ChartInstaller>) -> Self {
        Self::with_handlers(Arc::new(MeshHandler::new(installer)), Arc::new(GenericHandler::new(factory)))
    }

    pub fn with_handlers(mesh: Arc<dyn ComponentHandler>, generic: Arc<dyn ComponentHandler>) -> Self { Self { mesh, generic } }

    pub fn resolve(&self, ty: ComponentType) -> &dyn ComponentHandler {
        match ty {
            ComponentType::Mesh => self.mesh.as_ref(),
            ComponentType::Generic => self.generic.as_ref(),
        }
    }
}
