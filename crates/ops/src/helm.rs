//! Chart installer seam and the default `helm` CLI implementation.

use anyhow::{anyhow, Context, Result};
use keel_core::{ExecutionResult, KeelError};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use crate::fanout::{each_target, TargetOutcome};

/// Installs or removes the mesh chart on every target.
///
/// The returned message is a status label: `deploying`/`removing` on failure,
/// `deployed`/`removed` on success.
#[async_trait::async_trait]
pub trait ChartInstaller: Send + Sync {
    async fn install(&self, delete: bool, version: &str, namespace: &str, targets: &[String]) -> ExecutionResult;
}

/// Progress labels for a deploy or remove.
pub fn status_labels(delete: bool) -> (&'static str, &'static str) {
    if delete { ("removing", "removed") } else { ("deploying", "deployed") }
}

/// Runs `helm` once per target against a temporary kubeconfig file.
#[derive(Debug, Clone)]
pub struct HelmCli {
    pub bin: String,
    pub repo: String,
    pub chart: String,
    pub release: String,
}

impl Default for HelmCli {
    fn default() -> Self {
        Self {
            bin: "helm".into(),
            repo: "https://helm.releases.hashicorp.com".into(),
            chart: "consul".into(),
            release: "consul".into(),
        }
    }
}

impl HelmCli {
    /// Defaults overridden by `KEEL_HELM_BIN`, `KEEL_CHART_REPO`,
    /// `KEEL_CHART_NAME` and `KEEL_RELEASE_NAME`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            bin: std::env::var("KEEL_HELM_BIN").unwrap_or(d.bin),
            repo: std::env::var("KEEL_CHART_REPO").unwrap_or(d.repo),
            chart: std::env::var("KEEL_CHART_NAME").unwrap_or(d.chart),
            release: std::env::var("KEEL_RELEASE_NAME").unwrap_or(d.release),
        }
    }

    pub fn args(&self, delete: bool, version: &str, namespace: &str, kubeconfig: &str) -> Vec<String> {
        let mut args: Vec<String> = if delete {
            vec!["uninstall".into(), self.release.clone()]
        } else {
            vec![
                "upgrade".into(),
                "--install".into(),
                self.release.clone(),
                self.chart.clone(),
                "--repo".into(),
                self.repo.clone(),
                "--version".into(),
                version.to_string(),
                "--create-namespace".into(),
            ]
        };
        args.extend(["--namespace".to_string(), namespace.to_string(), "--kubeconfig".to_string(), kubeconfig.to_string()]);
        args
    }

    async fn run(&self, delete: bool, version: &str, namespace: &str, credential: &str) -> Result<()> {
        // removed when dropped, including when the task is aborted mid-run
        let kubeconfig = kubeconfig_file(credential).await?;
        let args = self.args(delete, version, namespace, &kubeconfig.path().to_string_lossy());
        debug!(bin = %self.bin, delete, "helm: spawning");
        let out = Command::new(&self.bin).args(&args).kill_on_drop(true).output().await.with_context(|| format!("spawning {}", self.bin))?;
        if !out.status.success() {
            return Err(anyhow!("{} exited with {}: {}", self.bin, out.status, String::from_utf8_lossy(&out.stderr).trim()));
        }
        Ok(())
    }
}

/// Owner-only (0600) temporary kubeconfig holding `credential`.
async fn kubeconfig_file(credential: &str) -> Result<NamedTempFile> {
    let file = tempfile::Builder::new().prefix("keel-").suffix(".kubeconfig").tempfile().context("creating temporary kubeconfig")?;
    tokio::fs::write(file.path(), credential).await.with_context(|| format!("writing {}", file.path().display()))?;
    Ok(file)
}

/// Fold per-target install failures into one `Install` error.
fn install_failure(outcomes: Vec<TargetOutcome<()>>) -> Option<KeelError> {
    let reasons: Vec<String> = outcomes
        .into_iter()
        .filter_map(|o| o.result.err())
        .map(|e| match e {
            KeelError::Install(reason) => reason,
            other => other.to_string(),
        })
        .collect();
    if reasons.is_empty() { None } else { Some(KeelError::Install(reasons.join("\n"))) }
}

#[async_trait::async_trait]
impl ChartInstaller for HelmCli {
    async fn install(&self, delete: bool, version: &str, namespace: &str, targets: &[String]) -> ExecutionResult {
        let (active, done) = status_labels(delete);
        if !delete && version.is_empty() {
            return ExecutionResult::failed(active, KeelError::Install("empty chart version".into()));
        }
        info!(release = %self.release, version = %version, ns = %namespace, delete, targets = targets.len(), "helm: start");
        let this = self.clone();
        let (version, namespace) = (version.to_string(), namespace.to_string());
        let outcomes = each_target(targets, move |idx, cred| {
            let this = this.clone();
            let (version, namespace) = (version.clone(), namespace.clone());
            async move {
                this.run(delete, &version, &namespace, &cred)
                    .await
                    .map_err(|e| KeelError::Install(format!("target #{}: {:#}", idx, e)))
            }
        })
        .await;
        match install_failure(outcomes) {
            Some(err) => ExecutionResult::failed(active, err),
            None => ExecutionResult::ok(done),
        }
    }
}
