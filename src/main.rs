/// kubestrap - idempotent Kubernetes cluster bootstrap
///
/// Drives kops on AWS or kubeadm on the local host through ordered, re-runnable steps.
/// Every step checks before it creates, and transient failures get a bounded number of retries.
mod aws;
mod config;
mod error;
mod k8s;
mod kops;
mod kubeadm;
mod pipeline;
mod provision;
mod tools;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ClusterConfig, Provider, Session};
use crate::utils::command::SystemExecutor;
use crate::provision::Workspace;
use crate::tools::ToolInstaller;
use crate::utils::prompt::confirm_stdin;

#[derive(Parser)]
#[command(name = "kubestrap")]
#[command(about = "Bootstrap Kubernetes clusters with kops or kubeadm", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "cluster.yaml")]
    config: PathBuf,

    /// Output directory for generated files
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    Init,

    /// Create the cluster
    Create,

    /// Validate an existing cluster
    Validate,

    /// Destroy the cluster (asks for confirmation)
    Destroy,

    /// Show cluster status
    Status,

    /// Print shell exports for the saved session
    Env,

    /// Install the CLIs the selected provider needs
    InstallTools,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("kubestrap={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Execute command
    let result = match cli.command {
        Commands::Init => init_config(&cli).await,
        Commands::Create => create_cluster(&cli).await,
        Commands::Validate => validate_cluster(&cli).await,
        Commands::Destroy => destroy_cluster(&cli).await,
        Commands::Status => show_status(&cli).await,
        Commands::Env => print_env(&cli).await,
        Commands::InstallTools => install_tools(&cli).await,
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Load configuration
fn load_config(cli: &Cli) -> Result<ClusterConfig> {
    let config = ClusterConfig::from_file(&cli.config).context("Failed to load configuration")?;
    info!("Cluster name: {} ({:?})", config.cluster_name, config.provider);
    Ok(config)
}

/// Executor whose children find downloaded tools before system ones
fn executor(config: &ClusterConfig) -> SystemExecutor {
    SystemExecutor::with_path_prefix(&config.tools.install_dir())
}

/// Create the cluster
async fn create_cluster(cli: &Cli) -> Result<()> {
    info!("Starting cluster creation...");

    let config = load_config(cli)?;
    let exec = executor(&config);
    let ws = Workspace::new(&exec, &config, &cli.output);

    let report = match config.provider {
        Provider::Kops => {
            let installer = ToolInstaller::new(config.tools.install_dir())?;
            provision::kops::create(&ws, &installer).await?
        }
        Provider::Kubeadm => provision::kubeadm::create(&ws).await?,
    };

    info!("");
    info!("Completed {} steps", report.completed.len());
    info!("Run report: {}", ws.report_path().display());
    info!("Session: eval \"$(kubestrap -o {} env)\"", cli.output.display());

    Ok(())
}

/// Validate an existing cluster
async fn validate_cluster(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let exec = executor(&config);
    let ws = Workspace::new(&exec, &config, &cli.output);

    match config.provider {
        Provider::Kops => provision::kops::validate(&ws).await,
        Provider::Kubeadm => provision::kubeadm::validate(&ws).await,
    }
}

/// Destroy the cluster
async fn destroy_cluster(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let exec = executor(&config);
    let ws = Workspace::new(&exec, &config, &cli.output);

    match config.provider {
        Provider::Kops => provision::kops::destroy(&ws, confirm_stdin).await?,
        Provider::Kubeadm => provision::kubeadm::destroy(&ws, confirm_stdin).await?,
    };

    info!("✓ Cluster destroyed successfully");
    Ok(())
}

/// Show cluster status
async fn show_status(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let exec = executor(&config);
    let ws = Workspace::new(&exec, &config, &cli.output);

    match config.provider {
        Provider::Kops => provision::kops::status(&ws).await,
        Provider::Kubeadm => provision::kubeadm::status(&ws).await,
    }
}

/// Print the saved session as shell exports
async fn print_env(cli: &Cli) -> Result<()> {
    let session = Session::load(&cli.output).await?;
    print!("{}", session.exports());
    Ok(())
}

/// Install the required CLIs without creating anything
async fn install_tools(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    let exec = executor(&config);
    let ws = Workspace::new(&exec, &config, &cli.output);

    match config.provider {
        Provider::Kops => {
            let installer = ToolInstaller::new(config.tools.install_dir())?;
            provision::kops::install_tools(&ws, &installer).await?;
            info!("Downloaded tools go to {}", installer.install_dir().display());
        }
        Provider::Kubeadm => provision::kubeadm::install_tools(&ws).await?,
    }

    info!("✓ Tools ready");
    Ok(())
}

/// Initialize example configuration file
async fn init_config(cli: &Cli) -> Result<()> {
    if cli.config.exists() {
        anyhow::bail!(
            "Configuration file already exists: {}",
            cli.config.display()
        );
    }

    let example_config = ClusterConfig::example();
    let yaml = serde_yaml::to_string(&example_config)?;

    tokio::fs::write(&cli.config, yaml)
        .await
        .context("Failed to write configuration file")?;

    info!("Example configuration created: {}", cli.config.display());
    info!("");
    info!("Next steps:");
    info!("  1. Edit the configuration file and pick a provider (kops or kubeadm)");
    info!("  2. For kops, make sure AWS credentials are available to the aws CLI");
    info!("  3. Create the cluster:");
    info!("     kubestrap create");

    Ok(())
}
