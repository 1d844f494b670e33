use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_core::{Component, Configuration, EventSink, ExecutionResult, KeelError, OperationRequest, ProgressEvent};
use keel_kubehub::KubeClientFactory;
use keel_ops::{translate, Adapter, Catalog, HelmCli, TemplateManifests};
use serde::Deserialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel CLI: dispatch components and operations to many clusters")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Kubeconfig file of a target cluster; repeat for more clusters
    #[arg(long = "kubeconfig", global = true, action = ArgAction::Append)]
    kubeconfigs: Vec<PathBuf>,

    /// Target namespace
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Operation catalog (YAML); the built-in catalog is used when unset
    #[arg(long = "catalog", global = true, env = "KEEL_CATALOG")]
    catalog: Option<PathBuf>,

    /// Directory manifest templates are read from
    #[arg(long = "templates", global = true, env = "KEEL_TEMPLATES_DIR", default_value = "templates")]
    templates: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List catalog operations
    Catalog,
    /// Run a catalog operation on every target
    Op {
        /// Operation name, e.g. "consul_install"
        name: String,
        /// Remove instead of deploy
        #[arg(long = "delete", action = ArgAction::SetTrue)]
        delete: bool,
        /// Operation id stamped on events (random when unset)
        #[arg(long = "id")]
        id: Option<String>,
        /// Manifest body for operations without templates
        #[arg(long = "body")]
        body: Option<PathBuf>,
    },
    /// Deploy (or delete) the components of a YAML stream on every target
    Components {
        file: PathBuf,
        #[arg(long = "delete", action = ArgAction::SetTrue)]
        delete: bool,
    },
    /// Record the traits of an application configuration
    Config { file: PathBuf },
    /// Print the artifacts generic components translate to
    Render { file: PathBuf },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

/// Prints progress events as they arrive.
struct PrintSink {
    output: Output,
}

impl PrintSink {
    fn print(&self, level: &str, ev: &ProgressEvent) {
        match self.output {
            Output::Human => {
                println!("[{}] {} • {}", level, ev.summary, ev.details);
                if let Some(cause) = &ev.probable_cause {
                    println!("    cause: {}", cause);
                }
                if let Some(fix) = &ev.suggested_remediation {
                    println!("    remedy: {}", fix);
                }
            }
            Output::Json => match serde_json::to_string(ev) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!(error = %e, "event not printable"),
            },
        }
    }
}

impl EventSink for PrintSink {
    fn info(&self, ev: ProgressEvent) { self.print("info", &ev) }

    fn error(&self, ev: ProgressEvent, _err: &KeelError) { self.print("error", &ev) }
}

fn default_kubeconfig() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("KUBECONFIG") {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    std::env::var("HOME").ok().map(|h| Path::new(&h).join(".kube").join("config"))
}

async fn read_targets(paths: &[PathBuf]) -> Result<Vec<String>> {
    let paths: Vec<PathBuf> = if paths.is_empty() { default_kubeconfig().into_iter().collect() } else { paths.to_vec() };
    let mut out = Vec::with_capacity(paths.len());
    for p in &paths {
        let raw = tokio::fs::read_to_string(p).await.with_context(|| format!("reading kubeconfig {}", p.display()))?;
        out.push(raw);
    }
    Ok(out)
}

async fn read_components(path: &Path, namespace: Option<&str>) -> Result<Vec<Component>> {
    let text = tokio::fs::read_to_string(path).await.with_context(|| format!("reading {}", path.display()))?;
    let mut comps = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        let value = serde_yaml::Value::deserialize(doc)?;
        if value.is_null() {
            continue;
        }
        let mut comp: Component = serde_yaml::from_value(value).context("parsing component")?;
        if comp.namespace.is_empty() {
            comp.namespace = namespace.unwrap_or("default").to_string();
        }
        comps.push(comp);
    }
    Ok(comps)
}

fn finish(output: Output, res: ExecutionResult) -> Result<()> {
    match output {
        Output::Human => {
            if !res.message.is_empty() {
                println!("{}", res.message);
            }
        }
        Output::Json => println!("{}", serde_json::json!({ "message": res.message, "error": res.error.as_ref().map(|e| e.to_string()) })),
    }
    res.into_result().map(|_| ()).map_err(Into::into)
}

async fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(p) => Catalog::load(p).await,
        None => Catalog::builtin(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let catalog = load_catalog(cli.catalog.as_deref()).await?;

    let factory = Arc::new(KubeClientFactory);
    let adapter = Adapter::new(
        catalog,
        factory.clone(),
        Arc::new(HelmCli::from_env()),
        Arc::new(TemplateManifests::new(factory, cli.templates.clone())),
        Arc::new(PrintSink { output: cli.output }),
    );

    match cli.command {
        Commands::Catalog => match cli.output {
            Output::Human => {
                for op in adapter.catalog().iter() {
                    let svcs = if op.services.is_empty() { "-".to_string() } else { op.services.join(",") };
                    println!("{} • {} • {:?} • {}", op.name, op.description, op.category, svcs);
                }
            }
            Output::Json => {
                let ops: Vec<_> = adapter.catalog().iter().collect();
                println!("{}", serde_json::to_string_pretty(&ops)?);
            }
        },
        Commands::Op { name, delete, id, body } => {
            let targets = read_targets(&cli.kubeconfigs).await?;
            let custom_body = match body {
                Some(p) => Some(tokio::fs::read_to_string(&p).await.with_context(|| format!("reading {}", p.display()))?),
                None => None,
            };
            let req = OperationRequest {
                operation_name: name,
                is_delete: delete,
                namespace: cli.namespace.clone().unwrap_or_else(|| "default".to_string()),
                operation_id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                targets,
                custom_body,
            };
            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if signal::ctrl_c().await.is_ok() {
                        warn!("interrupt received; cancelling endpoint lookups");
                        cancel.cancel();
                    }
                }
            });
            info!(op = %req.operation_name, targets = req.targets.len(), delete, "op invoked");
            adapter.apply_operation(&cancel, &req).await?;
        }
        Commands::Components { file, delete } => {
            let comps = read_components(&file, cli.namespace.as_deref()).await?;
            let targets = read_targets(&cli.kubeconfigs).await?;
            info!(components = comps.len(), targets = targets.len(), delete, "components invoked");
            let res = adapter.handle_components(&comps, delete, &targets).await;
            finish(cli.output, res)?;
        }
        Commands::Config { file } => {
            let text = tokio::fs::read_to_string(&file).await.with_context(|| format!("reading {}", file.display()))?;
            let config: Configuration = serde_yaml::from_str(&text).context("parsing application configuration")?;
            finish(cli.output, adapter.handle_application_configuration(&config))?;
        }
        Commands::Render { file } => {
            let comps = read_components(&file, cli.namespace.as_deref()).await?;
            let mut docs = Vec::with_capacity(comps.len());
            for comp in &comps {
                let artifact = translate::render(comp, None, None)?;
                match cli.output {
                    Output::Human => docs.push(artifact.to_yaml()?),
                    Output::Json => println!("{}", serde_json::to_string(&artifact)?),
                }
            }
            if !docs.is_empty() {
                print!("{}", docs.join("---\n"));
            }
        }
    }
    Ok(())
}
