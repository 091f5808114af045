//! Verify file availability across the cluster

use crate::common::Result;
use crate::coordinator::metadata::Node;
use crate::coordinator::service::FileListing;
use crate::ops::client::NamingClient;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct VerifyReport {
    pub total_files: usize,
    pub available: usize,
    /// Files with no ACTIVE copy on an UP node
    pub unavailable: Vec<String>,
    /// Files held by fewer nodes than are registered
    pub under_replicated: Vec<String>,
    pub pending_replications: usize,
    pub failed_replications: usize,
}

pub async fn verify_cluster(client: &NamingClient) -> Result<VerifyReport> {
    tracing::info!("Starting cluster verification");

    let nodes = client.nodes().await?;
    let files = client.files().await?;
    let mut report = assess(&files, &nodes);

    let queue = client.queue_summary().await?;
    report.pending_replications = queue.pending;
    report.failed_replications = queue.failed;

    Ok(report)
}

fn assess(files: &[FileListing], nodes: &[Node]) -> VerifyReport {
    let up: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.is_up())
        .map(|n| n.id.as_str())
        .collect();

    let mut report = VerifyReport {
        total_files: files.len(),
        ..Default::default()
    };

    for file in files {
        let key = &file.metadata.file_key;
        if file.replicas.iter().any(|r| up.contains(r.as_str())) {
            report.available += 1;
        } else {
            report.unavailable.push(key.clone());
        }
        if file.replicas.len() < nodes.len() {
            report.under_replicated.push(key.clone());
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NodeRole, NodeStatus};
    use crate::coordinator::metadata::FileMetadata;
    use chrono::Utc;

    fn node(id: &str, status: NodeStatus) -> Node {
        Node {
            id: id.to_string(),
            address: format!("http://{}:8000", id),
            role: NodeRole::Replica,
            status,
            last_heartbeat: None,
            latency_ms: 10,
        }
    }

    fn listing(key: &str, replicas: &[&str]) -> FileListing {
        FileListing {
            metadata: FileMetadata {
                file_key: key.to_string(),
                original_filename: format!("{}.txt", key),
                size_bytes: 1,
                checksum: String::new(),
                uploaded_at: Utc::now(),
            },
            replicas: replicas.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_assess() {
        let nodes = vec![node("n1", NodeStatus::Up), node("n2", NodeStatus::Down)];
        let files = vec![
            listing("both", &["n1", "n2"]),
            listing("down-only", &["n2"]),
            listing("none", &[]),
        ];

        let report = assess(&files, &nodes);
        assert_eq!(report.total_files, 3);
        assert_eq!(report.available, 1);
        assert_eq!(report.unavailable, vec!["down-only", "none"]);
        assert_eq!(report.under_replicated, vec!["down-only", "none"]);
    }
}
