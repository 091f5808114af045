//! Naming service: the operations the router and monitor share
//!
//! One `NamingService` is built at startup and handed out as `Arc` to the HTTP
//! layer and the background monitor. It owns the metadata handle and wires the
//! registry, location index, replication engine and monitor together.

use crate::common::{validate_key, CoordinatorConfig, NodeSeed, NodeStatus, Result, METRICS};
use crate::coordinator::locations::LocationIndex;
use crate::coordinator::metadata::{
    FileMetadata, MetadataStore, Node, QueueFilter, QueueSummary, ReplicationQueueItem,
};
use crate::coordinator::monitor::{HealthMonitor, NodeCheck};
use crate::coordinator::node_client::{DeleteOutcome, NodeTransport};
use crate::coordinator::placement;
use crate::coordinator::registry::{address_map, NodeRegistry};
use crate::coordinator::replication::{RecoveryReport, ReplicationEngine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of files returned by a listing
pub const FILE_LIST_LIMIT: usize = 100;

/// Callback from the node that accepted an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterFile {
    pub file_key: String,
    pub original_filename: String,
    pub size_bytes: u64,
    #[serde(alias = "checksum_sha256", default)]
    pub checksum: String,
    /// Node holding the copy
    pub node_id: String,
    /// Replica targets the holder could not write to
    #[serde(default)]
    pub failed_nodes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteReport {
    pub file_key: String,
    pub deleted_from: usize,
    pub failed: usize,
    pub total_nodes: usize,
    pub deleted_nodes: Vec<String>,
}

/// A file with its ACTIVE replicas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileListing {
    #[serde(flatten)]
    pub metadata: FileMetadata,
    pub replicas: Vec<String>,
}

pub struct NamingService {
    store: Arc<MetadataStore>,
    registry: NodeRegistry,
    locations: LocationIndex,
    engine: Arc<ReplicationEngine>,
    monitor: Arc<HealthMonitor>,
    transport: Arc<dyn NodeTransport>,
}

impl NamingService {
    pub fn new(
        store: Arc<MetadataStore>,
        transport: Arc<dyn NodeTransport>,
        config: &CoordinatorConfig,
    ) -> Self {
        let registry = NodeRegistry::new(store.clone());
        let engine = Arc::new(ReplicationEngine::new(
            store.clone(),
            transport.clone(),
            config.recovery_batch_size,
            config.max_retries,
        ));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            engine.clone(),
            transport.clone(),
            config.monitor_interval(),
            config.probe_timeout(),
        ));

        Self {
            locations: LocationIndex::new(store.clone()),
            store,
            registry,
            engine,
            monitor,
            transport,
        }
    }

    pub fn monitor(&self) -> Arc<HealthMonitor> {
        self.monitor.clone()
    }

    /// Flush the metadata store to disk
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Seed the registry from configuration
    pub fn provision(&self, seeds: &[NodeSeed]) -> Result<()> {
        for seed in seeds {
            self.registry.provision(seed)?;
        }
        Ok(())
    }

    // === Node registry ===

    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.registry.list_nodes()
    }

    pub fn set_node_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        self.registry.set_status(node_id, status)
    }

    pub fn set_node_latency(&self, node_id: &str, latency_ms: u64) -> Result<()> {
        self.registry.set_latency(node_id, latency_ms)
    }

    /// Record a failed contact with a node the router had selected.
    ///
    /// The monitor re-evaluates the node on its next cycle.
    pub fn mark_unreachable(&self, node_id: &str) {
        match self.registry.set_status(node_id, NodeStatus::Down) {
            Ok(()) => {
                METRICS.status_transitions.inc();
                tracing::warn!(node_id, "Marked node DOWN after failed contact");
            }
            Err(e) => tracing::warn!(node_id, error = %e, "Failed to mark node DOWN"),
        }
    }

    /// Live probe of every node; nothing is persisted
    pub async fn check_nodes(&self) -> Result<Vec<NodeCheck>> {
        let nodes = self.registry.list_nodes()?;
        Ok(self.monitor.check_nodes(&nodes).await)
    }

    // === Selection ===

    pub fn select_upload_target(&self, nodes: &[Node]) -> Option<Node> {
        placement::select_upload_target(nodes).cloned()
    }

    pub fn select_download_target(&self, file_key: &str, nodes: &[Node]) -> Result<Option<Node>> {
        let holders = self.locations.get_locations(file_key)?;
        Ok(placement::select_download_target(&holders, nodes).cloned())
    }

    // === Files ===

    /// Upsert file metadata, mark the holder ACTIVE and queue a replica copy
    /// for every failed target.
    pub fn register_file(&self, req: RegisterFile) -> Result<()> {
        validate_key(&req.file_key)?;

        // re-registration keeps the first upload time
        let uploaded_at = match self.store.get_file(&req.file_key)? {
            Some(existing) => existing.uploaded_at,
            None => Utc::now(),
        };
        self.store.put_file(&FileMetadata {
            file_key: req.file_key.clone(),
            original_filename: req.original_filename.clone(),
            size_bytes: req.size_bytes,
            checksum: req.checksum.clone(),
            uploaded_at,
        })?;
        self.locations.mark_active(&req.file_key, &req.node_id)?;

        for target in req.failed_nodes.iter().filter(|t| **t != req.node_id) {
            if let Err(e) = self.engine.enqueue(&req.file_key, target, &req.node_id) {
                tracing::error!(file_key = %req.file_key, target = %target, error = %e, "Failed to queue replication");
            }
        }

        tracing::info!(
            file_key = %req.file_key,
            node_id = %req.node_id,
            size_bytes = req.size_bytes,
            failed_targets = req.failed_nodes.len(),
            "Registered file"
        );
        Ok(())
    }

    pub fn get_file_locations(&self, file_key: &str) -> Result<Vec<String>> {
        self.locations.get_locations(file_key)
    }

    /// Newest first, each with its ACTIVE replicas
    pub fn list_files(&self) -> Result<Vec<FileListing>> {
        self.store
            .list_files(FILE_LIST_LIMIT)?
            .into_iter()
            .map(|metadata| {
                let replicas = self.locations.get_locations(&metadata.file_key)?;
                Ok(FileListing { metadata, replicas })
            })
            .collect()
    }

    /// Best-effort delete from every holder, then purge all records of the file.
    ///
    /// With no recorded locations every registered node is tried. A node that
    /// no longer has the file counts as neither deleted nor failed.
    pub async fn delete_file(&self, file_key: &str) -> Result<DeleteReport> {
        validate_key(file_key)?;

        let nodes = self.registry.list_nodes()?;
        let mut targets = self.locations.get_locations(file_key)?;
        if targets.is_empty() {
            tracing::info!(file_key, "No recorded locations, trying every node");
            targets = nodes.iter().map(|n| n.id.clone()).collect();
        }
        let addresses = address_map(&nodes);

        let mut report = DeleteReport {
            file_key: file_key.to_string(),
            deleted_from: 0,
            failed: 0,
            total_nodes: targets.len(),
            deleted_nodes: Vec::new(),
        };

        for node_id in &targets {
            let Some(address) = addresses.get(node_id.as_str()) else {
                tracing::warn!(file_key, node_id = %node_id, "Holder is not a registered node");
                report.failed += 1;
                continue;
            };

            match self.transport.delete(address, file_key).await {
                Ok(DeleteOutcome::Deleted) => {
                    report.deleted_from += 1;
                    report.deleted_nodes.push(node_id.clone());
                    if let Err(e) = self.locations.mark_deleted(file_key, node_id) {
                        tracing::warn!(file_key, node_id = %node_id, error = %e, "Failed to mark location deleted");
                    }
                }
                Ok(DeleteOutcome::NotFound) => {
                    tracing::debug!(file_key, node_id = %node_id, "Already absent on node");
                }
                Err(e) => {
                    tracing::warn!(file_key, node_id = %node_id, error = %e, "Delete failed on node");
                    report.failed += 1;
                }
            }
        }

        let queued = self.store.delete_queue_for_file(file_key)?;
        self.locations.purge(file_key)?;
        self.store.delete_file(file_key)?;
        METRICS.deletes_total.inc();

        tracing::info!(
            file_key,
            deleted_from = report.deleted_from,
            failed = report.failed,
            queue_items_removed = queued,
            "Delete completed"
        );
        Ok(report)
    }

    // === Replication ===

    pub async fn recover(&self, target_node_id: &str) -> Result<RecoveryReport> {
        self.engine.recover(target_node_id).await
    }

    pub fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<ReplicationQueueItem>> {
        self.engine.list_queue(filter)
    }

    pub fn queue_summary(&self) -> Result<QueueSummary> {
        self.engine.summary()
    }

    pub fn retry_failed(&self, target_node_id: Option<&str>) -> Result<usize> {
        self.engine.retry_failed(target_node_id)
    }
}
