//! hardway CLI - bootstrap a Kubernetes cluster the hard way, automatically

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hardway::cluster::ClusterManager;
use hardway::config::ClusterConfig;
use hardway::pki::RcgenIssuer;
use hardway::progress::ConsoleReporter;
use hardway::transport::SshTransport;

/// Bare-metal Kubernetes cluster bootstrapper
#[derive(Parser, Debug)]
#[command(name = "hardway", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Provision the cluster described by the config file
    Setup(ClusterArgs),

    /// Tear down the cluster and remove the local work directory
    Destroy(ClusterArgs),

    /// Print the cluster status as seen from the controller
    Status(ClusterArgs),

    /// Write an example configuration file to get started
    InitConfig {
        /// Where to write the example config
        #[arg(long, default_value = "cluster.yaml")]
        output: PathBuf,
    },
}

/// Arguments shared by the cluster subcommands
#[derive(Parser, Debug)]
struct ClusterArgs {
    /// Path to the cluster configuration file
    #[arg(long, short, env = "HARDWAY_CONFIG", default_value = "cluster.yaml")]
    config: PathBuf,

    /// Verify remote host keys instead of accepting them blindly
    #[arg(long)]
    verify_host_keys: bool,

    /// Per-command SSH timeout in seconds (0 disables the timeout)
    #[arg(long, default_value = "30")]
    command_timeout: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Setup(args) => {
            let manager = build_manager(&args)?;
            manager.setup_cluster().await?;
            println!("cluster setup completed");
            Ok(())
        }
        Commands::Destroy(args) => {
            let manager = build_manager(&args)?;
            manager.destroy_cluster().await?;
            println!("cluster destroyed");
            Ok(())
        }
        Commands::Status(args) => {
            let manager = build_manager(&args)?;
            let status = manager.cluster_status().await?;
            println!("Nodes:\n{}", status.nodes.trim_end());
            println!("\nSystem pods:\n{}", status.pod_status.trim_end());
            println!("\nTest deployment:\n{}", status.test_status.trim_end());
            Ok(())
        }
        Commands::InitConfig { output } => {
            let config = ClusterConfig::default_config();
            config.save(&output)?;
            println!("wrote example config to {}", output.display());
            Ok(())
        }
    }
}

fn build_manager(args: &ClusterArgs) -> anyhow::Result<ClusterManager> {
    let config = ClusterConfig::load(&args.config)?;

    let timeout = if args.command_timeout == 0 {
        None
    } else {
        Some(Duration::from_secs(args.command_timeout))
    };
    let transport = SshTransport::new(config.ssh_user.as_str(), &config.ssh_key)?
        .with_host_key_verification(args.verify_host_keys)
        .with_command_timeout(timeout);

    Ok(ClusterManager::new(
        config,
        Arc::new(transport),
        Arc::new(RcgenIssuer::new()),
        Arc::new(ConsoleReporter::new()),
    ))
}
