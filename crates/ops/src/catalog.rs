//! Operation catalog: operation name to descriptor.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use keel_core::{KeelError, KeelResult, OperationDescriptor};
use tracing::info;

const BUILTIN: &str = include_str!("../assets/catalog.yaml");

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    ops: BTreeMap<String, OperationDescriptor>,
}

impl Catalog {
    /// Catalog embedded in the binary.
    pub fn builtin() -> Result<Self> { Self::from_yaml(BUILTIN).context("parsing built-in catalog") }

    /// Parse a YAML mapping of operation name to descriptor.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: BTreeMap<String, OperationDescriptor> = serde_yaml::from_str(yaml).context("parsing operation catalog")?;
        let ops = raw
            .into_iter()
            .map(|(name, mut desc)| {
                desc.name = name.clone();
                (name, desc)
            })
            .collect();
        Ok(Self { ops })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read_to_string(path).await.with_context(|| format!("reading catalog {}", path.display()))?;
        let cat = Self::from_yaml(&yaml)?;
        info!(path = %path.display(), ops = cat.len(), "catalog loaded");
        Ok(cat)
    }

    pub fn insert(&mut self, desc: OperationDescriptor) { self.ops.insert(desc.name.clone(), desc); }

    pub fn lookup(&self, name: &str) -> KeelResult<&OperationDescriptor> {
        self.ops.get(name).ok_or_else(|| KeelError::OperationNotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationDescriptor> { self.ops.values() }

    pub fn len(&self) -> usize { self.ops.len() }

    pub fn is_empty(&self) -> bool { self.ops.is_empty() }
}
