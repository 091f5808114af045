//! CLI for naming service operations

use clap::{Parser, Subcommand};
use minidfs::common::format_bytes;
use minidfs::coordinator::metadata::ReplicationStatus;
use minidfs::ops::{repair_cluster, verify_cluster, NamingClient};

#[derive(Parser)]
#[command(name = "minidfs")]
#[command(about = "minidfs distributed file store CLI")]
#[command(version)]
struct Cli {
    /// Naming service URL
    #[arg(long, env = "MINIDFS_URL", default_value = "http://localhost:8080")]
    naming: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List storage nodes
    Nodes {
        /// Probe nodes live instead of showing the registry
        #[arg(long)]
        check: bool,
    },

    /// List files and their replicas
    Files,

    /// Replay pending replications to a node
    Recover {
        /// Target node id
        node: String,
    },

    /// Recover every UP node with pending replications
    Repair {
        /// Only report what would be recovered
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the replication queue
    Queue {
        /// Filter by target node
        #[arg(long)]
        node: Option<String>,

        /// Filter by status (pending, completed, failed)
        #[arg(long)]
        status: Option<ReplicationStatus>,
    },

    /// Reset failed replications to pending
    Retry {
        /// Only items targeting this node
        #[arg(long)]
        node: Option<String>,
    },

    /// Report files without an available copy
    Verify,

    /// Delete a file from every node
    Delete {
        /// File key
        file_key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = NamingClient::new(&cli.naming);

    match cli.command {
        Commands::Nodes { check: false } => {
            for node in client.nodes().await? {
                println!(
                    "{:<12} {:<8} {:<5} {:>6} ms  {}",
                    node.id, node.role, node.status, node.latency_ms, node.address
                );
            }
        }

        Commands::Nodes { check: true } => {
            for check in client.check_nodes().await? {
                println!(
                    "{:<12} {:<5} {:>6} ms  {}",
                    check.node_id, check.status, check.latency_ms, check.address
                );
            }
        }

        Commands::Files => {
            for file in client.files().await? {
                let meta = &file.metadata;
                println!(
                    "{}  {}  {}  [{}]",
                    meta.file_key,
                    meta.original_filename,
                    format_bytes(meta.size_bytes),
                    file.replicas.join(", ")
                );
            }
        }

        Commands::Recover { node } => {
            let report = client.recover(&node).await?;
            println!("Recovery report for {}:", report.target_node_id);
            println!("  Total: {}", report.total);
            println!("  Succeeded: {}", report.succeeded);
            println!("  Failed: {}", report.failed);
        }

        Commands::Repair { dry_run } => {
            let report = repair_cluster(&client, dry_run).await?;
            println!("Repair report:");
            println!("  Nodes recovered: {}", report.nodes_recovered);
            println!("  Items: {}", report.items_total);
            println!("  Succeeded: {}", report.items_succeeded);
            println!("  Failed: {}", report.items_failed);
        }

        Commands::Queue { node, status } => {
            for item in client.queue(node.as_deref(), status).await? {
                println!(
                    "#{:<6} {:<10} {} -> {}  {}  retries={}{}",
                    item.id,
                    item.status,
                    item.source_node_id,
                    item.target_node_id,
                    item.file_key,
                    item.retry_count,
                    item.error_message
                        .map(|e| format!("  ({})", e))
                        .unwrap_or_default()
                );
            }
        }

        Commands::Retry { node } => {
            let reset = client.retry(node.as_deref()).await?;
            println!("Reset {} failed item(s) to PENDING", reset);
        }

        Commands::Verify => {
            let report = verify_cluster(&client).await?;
            println!("Verification report:");
            println!("  Total files: {}", report.total_files);
            println!("  Available: {}", report.available);
            println!("  Unavailable: {}", report.unavailable.len());
            for key in &report.unavailable {
                println!("    {}", key);
            }
            println!("  Under-replicated: {}", report.under_replicated.len());
            println!("  Pending replications: {}", report.pending_replications);
            println!("  Failed replications: {}", report.failed_replications);
        }

        Commands::Delete { file_key } => {
            let report = client.delete(&file_key).await?;
            println!(
                "Deleted {} from {}/{} node(s), {} failed",
                report.file_key, report.deleted_from, report.total_nodes, report.failed
            );
        }
    }

    Ok(())
}
