//! Naming service binary

use clap::{Parser, Subcommand};
use minidfs::common::{Config, NodeRole, NodeSeed};
use minidfs::Coordinator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minidfs-naming")]
#[command(about = "minidfs naming service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the naming service
    Serve {
        /// Bind address for HTTP (overrides config)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Metadata directory (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Storage node as `id=address`, repeatable (replaces configured nodes)
        #[arg(long = "node", value_parser = parse_node)]
        nodes: Vec<NodeSeed>,

        /// Id of the MAIN node among `--node` entries
        #[arg(long)]
        main: Option<String>,

        /// Health monitor period in seconds
        #[arg(long)]
        monitor_interval: Option<u64>,
    },
}

fn parse_node(s: &str) -> Result<NodeSeed, String> {
    let (id, address) = s
        .split_once('=')
        .ok_or_else(|| format!("expected id=address, got '{}'", s))?;
    if id.is_empty() || address.is_empty() {
        return Err(format!("expected id=address, got '{}'", s));
    }
    Ok(NodeSeed {
        id: id.to_string(),
        address: address.to_string(),
        role: NodeRole::Replica,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config from file and environment, then override with CLI arguments.
    // A broken config file stops startup before any node is provisioned.
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            db,
            mut nodes,
            main,
            monitor_interval,
        } => {
            let mut coord_config = config.coordinator;
            if let Some(bind) = bind {
                coord_config.bind_addr = bind;
            }
            if let Some(db) = db {
                coord_config.db_path = db;
            }
            if let Some(secs) = monitor_interval {
                coord_config.monitor_interval_secs = secs;
            }
            if !nodes.is_empty() {
                if let Some(main) = &main {
                    let seed = nodes
                        .iter_mut()
                        .find(|n| &n.id == main)
                        .ok_or_else(|| anyhow::anyhow!("--main {} is not one of the --node ids", main))?;
                    seed.role = NodeRole::Main;
                }
                coord_config.nodes = nodes;
            }

            Coordinator::new(coord_config).serve().await?;
        }
    }

    Ok(())
}
