//! kforge - drive OpenShift binary builds and apply Kubernetes manifests
//!
//! Thin CLI over the library services: apply a generated manifest, undeploy
//! it again, run a binary build from a context archive, or put an applied
//! controller into debug mode and forward its debug port.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use kforge::apply::{ApplyOpts, ApplyService};
use kforge::build::{BuildDescriptor, BuildService};
use kforge::cluster::{self, ClusterOps, KubeCluster};
use kforge::debug::{DEFAULT_DEBUG_PORT, DebugService};
use kforge::podlog::PodLogService;
use kforge::undeploy::UndeployService;
use kforge::{manifest, portforward};

/// Drive OpenShift binary builds and apply Kubernetes manifests
#[derive(Parser, Debug)]
#[command(name = "kforge")]
#[command(about = "Build container images on OpenShift and manage the generated manifests", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, short = 'd', global = true)]
    debug: bool,

    /// Namespace to operate in (defaults to NAMESPACE env or "default")
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a generated manifest to the cluster
    Apply {
        /// Manifest file (kubernetes.yml / openshift.yml)
        file: PathBuf,
        /// Source label used in log output (defaults to the file name)
        #[arg(long)]
        source: Option<String>,
        /// Do not create resources that are missing
        #[arg(long)]
        no_create: bool,
        /// Delete and recreate existing resources instead of patching
        #[arg(long)]
        recreate: bool,
        /// Only apply Service resources
        #[arg(long)]
        services_only: bool,
    },
    /// Delete everything a manifest applied, including build artifacts
    Undeploy {
        /// Manifest files to undeploy
        files: Vec<PathBuf>,
    },
    /// Run an OpenShift binary build from a context archive
    Build {
        /// Build descriptor (image + build configuration)
        #[arg(long)]
        config: PathBuf,
        /// Build context archive to upload
        #[arg(long)]
        archive: PathBuf,
    },
    /// Enable debug mode on an applied controller and forward its debug port
    Debug {
        /// Manifest file the controller was applied from
        file: PathBuf,
        /// Local and remote debug port
        #[arg(long, default_value_t = DEFAULT_DEBUG_PORT)]
        port: u16,
        /// Suspend the JVM until a debugger attaches
        #[arg(long)]
        suspend: bool,
    },
    /// Tail logs of the pods behind a label selector
    Logs {
        /// Label selector entries, key=value
        #[arg(long, short = 'l', required = true)]
        selector: Vec<String>,
    },
}

/// Initialize logging; debug flag widens the default filter
fn init_logging(debug: bool) {
    let default_filter = if debug { "kforge=debug,kube=info" } else { "kforge=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let client = cluster::create_client().await?;
    let ops: Arc<dyn ClusterOps> = Arc::new(KubeCluster::new(client.clone()));
    let namespace = cluster::default_namespace(args.namespace.as_deref());

    match args.command {
        Command::Apply {
            file,
            source,
            no_create,
            recreate,
            services_only,
        } => {
            let source = source.unwrap_or_else(|| {
                file.file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });
            let docs = manifest::load(&file)?;
            let opts = ApplyOpts {
                allow_create: !no_create,
                recreate,
                services_only,
            };
            let apply = ApplyService::new(ops, opts);
            let mut outcomes = Vec::new();
            for doc in &docs {
                outcomes.extend(apply.apply(doc, &namespace, &source).await?);
            }
            for outcome in &outcomes {
                println!(
                    "{:?} {} {}/{}",
                    outcome.outcome, outcome.kind, outcome.namespace, outcome.name
                );
            }
        }
        Command::Undeploy { files } => {
            let undeploy = UndeployService::new(ops, namespace);
            undeploy.undeploy_files(&files).await?;
        }
        Command::Build { config, archive } => {
            let content = std::fs::read_to_string(&config)
                .with_context(|| format!("Failed to read build descriptor {}", config.display()))?;
            let descriptor: BuildDescriptor = serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid build descriptor {}", config.display()))?;
            let build = BuildService::new(ops, descriptor.build.clone(), &namespace);
            let build_name = build.build(&descriptor.image, &archive).await?;
            println!("Build {} complete", build_name);
        }
        Command::Debug { file, port, suspend } => {
            let entities: Vec<Value> = manifest::load_resources(&file)?;
            let apply = ApplyService::new(ops.clone(), ApplyOpts::default());
            let debug = DebugService::new(ops, apply, namespace.clone());
            let pod = debug.debug(&entities, port, suspend).await?;
            portforward::forward(client, &namespace, &pod, port, port).await?;
        }
        Command::Logs { selector } => {
            let mut labels = BTreeMap::new();
            for entry in &selector {
                let (key, value) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("Selector {} is not key=value", entry))?;
                labels.insert(key.to_string(), value.to_string());
            }
            let logs = PodLogService::new(ops, namespace);
            logs.tail(&labels).await?;
        }
    }

    Ok(())
}
