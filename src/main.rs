use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

use pipetail_k8s::{Cluster, KubeCluster, client_for_context};
use pipetail_logs::{Options, Reader};

mod writer;

/// Configuration file structure for .pipetail
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Config {
    /// Kubernetes context name
    context: Option<String>,
    /// Namespace
    namespace: Option<String>,
    /// Prepend timestamps to every line
    #[serde(default)]
    timestamps: bool,
    /// Prefix lines with their task and step
    prefix: Option<bool>,
}

impl Config {
    /// Load config from .pipetail file in current directory
    fn load() -> Option<Self> {
        let path = PathBuf::from(".pipetail");
        if path.exists() {
            let content = std::fs::read_to_string(&path).ok()?;
            toml::from_str(&content).ok()
        } else {
            None
        }
    }
}

/// Pipetail - tail and aggregate logs from pipeline and task runs
#[derive(Parser, Debug)]
#[command(name = "pipetail")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Kubernetes context name (defaults to the current context)
    #[arg(long, global = true)]
    context: Option<String>,

    /// Namespace of the run
    #[arg(short = 'n', long, global = true)]
    namespace: Option<String>,

    /// Ignore .pipetail config file
    #[arg(long, global = true)]
    no_config: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the logs of a pipeline run
    #[command(alias = "pipelinerun")]
    Pr(LogsArgs),
    /// Show the logs of a task run
    #[command(alias = "taskrun")]
    Tr(LogsArgs),
}

#[derive(Args, Debug)]
struct LogsArgs {
    /// Name of the run
    run: String,

    /// Stream live logs until the run completes
    #[arg(short, long)]
    follow: bool,

    /// Prepend an RFC3339 timestamp to every line
    #[arg(short, long)]
    timestamps: bool,

    /// Include init steps
    #[arg(long)]
    all_steps: bool,

    /// Only show the named steps (repeatable)
    #[arg(short = 's', long = "step")]
    steps: Vec<String>,

    /// Retry count of the task, for live pod discovery
    #[arg(long, default_value_t = 0)]
    retries: usize,

    /// Seconds to wait for the platform to name a pod
    #[arg(long, default_value_t = 600)]
    activity_timeout: u64,

    /// Do not prefix lines with their task and step
    #[arg(long)]
    no_prefix: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing for debugging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Merge CLI args with config file (CLI takes precedence)
    let config = if cli.no_config { None } else { Config::load() };

    let context = cli
        .context
        .or_else(|| config.as_ref().and_then(|c| c.context.clone()));
    let namespace = cli
        .namespace
        .or_else(|| config.as_ref().and_then(|c| c.namespace.clone()))
        .unwrap_or_else(|| "default".to_string());

    let client = client_for_context(context.as_deref())
        .await
        .context("Failed to connect to the cluster. Is kubectl configured?")?;
    let cluster: Arc<dyn Cluster> = Arc::new(KubeCluster::new(client));

    let (args, pipeline) = match &cli.command {
        Commands::Pr(args) => (args, true),
        Commands::Tr(args) => (args, false),
    };

    let prefix = !args.no_prefix && config.as_ref().and_then(|c| c.prefix).unwrap_or(true);
    let opts = Options {
        ns: namespace,
        run: args.run.clone(),
        follow: args.follow,
        timestamps: args.timestamps || config.as_ref().is_some_and(|c| c.timestamps),
        all_steps: args.all_steps,
        steps: args.steps.clone(),
        retries: args.retries,
        activity_timeout: Duration::from_secs(args.activity_timeout),
        ..Default::default()
    };

    let mut reader = if pipeline {
        Reader::pipeline_reader(cluster, opts)
    } else {
        Reader::task_reader(cluster, opts)
    };

    // Ctrl-C drains the streams and closes both channels
    let cancel = reader.cancellation_token();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel.cancel();
    });

    let (logs, errs) = reader.read().await?;

    let had_errors = writer::write(logs, errs, prefix).await;
    if had_errors {
        std::process::exit(1);
    }
    Ok(())
}
