//! Cluster Autopilot CLI
//!
//! A command-line tool for operating the autopilot control plane: backend
//! fleet, application registrations, node pool and supervised targets.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::ChangeEnvRequest;
use commands::{apps, backends, nodes, status};

/// Cluster Autopilot CLI
#[derive(Parser)]
#[command(name = "apctl")]
#[command(author, version, about = "CLI for the Cluster Autopilot control plane", long_about = None)]
pub struct Cli {
    /// API endpoint URL (defaults to the config file, then http://localhost:8080)
    #[arg(long, env = "APCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the autopilot service answers
    Ping,

    /// Manage the backend peer fleet
    #[command(subcommand)]
    Backends(BackendCommands),

    /// Manage application registrations
    #[command(subcommand)]
    Apps(AppCommands),

    /// Manage cluster nodes and the backup pool
    #[command(subcommand)]
    Nodes(NodeCommands),

    /// Inspect pod health
    #[command(subcommand)]
    Pods(PodCommands),

    /// Show supervised autoscaling targets and their scale history
    Targets,
}

#[derive(Subcommand)]
pub enum BackendCommands {
    /// List registered backends
    List,

    /// Register a backend peer
    Add {
        /// Backend IP address
        ip: String,
    },

    /// Remove a backend peer
    Remove {
        /// Backend IP address
        ip: String,
    },

    /// Probe every backend once and show latency samples
    Latency,

    /// Run one scheduling pass now
    Check,
}

#[derive(Subcommand)]
pub enum AppCommands {
    /// List registered applications
    List,

    /// Register an application for latency-based migration
    Register {
        /// Application (deployment) name
        #[arg(long)]
        name: String,

        /// Application namespace
        #[arg(long, short)]
        namespace: String,

        /// Mirror application deployed on backends
        #[arg(long)]
        mirror_app: String,

        /// Namespace of the mirror application
        #[arg(long)]
        mirror_namespace: String,

        /// Environment variable holding the backend address
        #[arg(long)]
        url_key: String,

        /// Backend currently serving the application
        #[arg(long)]
        backend: String,

        /// Exposed port as name=port (30000-32767), repeatable
        #[arg(long = "port", required = true)]
        ports: Vec<String>,
    },

    /// Remove a registration
    Remove {
        /// Application name
        name: String,

        /// Application namespace
        namespace: String,
    },

    /// Point an application's routing variable at a backend
    SetEnv {
        /// Application (deployment) name
        name: String,

        /// Application namespace
        namespace: String,

        /// Environment variable holding the backend address
        #[arg(long)]
        url_key: String,

        /// Backend address to route to
        #[arg(long)]
        backend: String,
    },
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// List the backup node pool
    BackupList,

    /// Add an IP to the backup pool
    BackupAdd {
        /// Node IP address
        ip: String,
    },

    /// Remove an IP from the backup pool
    BackupRemove {
        /// Node IP address
        ip: String,
    },

    /// Join a machine to the cluster now
    Add {
        /// Node IP address
        ip: String,
    },

    /// Force-remove a machine from the cluster now
    Delete {
        /// Node IP address
        ip: String,
    },
}

#[derive(Subcommand)]
pub enum PodCommands {
    /// Show pods the health recorder flagged
    Exceptions,
}

async fn run(cli: Cli) -> Result<()> {
    let config = config::Config::load()?;
    let client = client::ApiClient::new(&config.resolve_api_url(cli.api_url))?;
    let format = cli.format;

    match cli.command {
        Commands::Ping => status::ping(&client).await?,
        Commands::Backends(cmd) => match cmd {
            BackendCommands::List => backends::list(&client, format).await?,
            BackendCommands::Add { ip } => backends::add(&client, &ip, format).await?,
            BackendCommands::Remove { ip } => backends::remove(&client, &ip, format).await?,
            BackendCommands::Latency => backends::latency(&client, format).await?,
            BackendCommands::Check => backends::check(&client, format).await?,
        },
        Commands::Apps(cmd) => match cmd {
            AppCommands::List => apps::list(&client, format).await?,
            AppCommands::Register {
                name,
                namespace,
                mirror_app,
                mirror_namespace,
                url_key,
                backend,
                ports,
            } => {
                let args = apps::RegisterArgs {
                    name,
                    namespace,
                    mirror_app,
                    mirror_namespace,
                    url_key,
                    backend,
                    ports,
                };
                apps::register(&client, args, format).await?;
            }
            AppCommands::Remove { name, namespace } => {
                apps::remove(&client, &name, &namespace, format).await?;
            }
            AppCommands::SetEnv {
                name,
                namespace,
                url_key,
                backend,
            } => {
                let request = ChangeEnvRequest {
                    app_name: name,
                    namespace,
                    url_key,
                    backend,
                };
                apps::set_env(&client, request, format).await?;
            }
        },
        Commands::Nodes(cmd) => match cmd {
            NodeCommands::BackupList => nodes::backup_list(&client, format).await?,
            NodeCommands::BackupAdd { ip } => nodes::backup_add(&client, &ip, format).await?,
            NodeCommands::BackupRemove { ip } => nodes::backup_remove(&client, &ip, format).await?,
            NodeCommands::Add { ip } => nodes::add(&client, &ip, format).await?,
            NodeCommands::Delete { ip } => nodes::delete(&client, &ip, format).await?,
        },
        Commands::Pods(PodCommands::Exceptions) => status::pod_exceptions(&client, format).await?,
        Commands::Targets => status::targets(&client, format).await?,
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}
