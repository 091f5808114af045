//! Replication queue and recovery engine
//!
//! Failed or skipped replica writes land in the queue as PENDING items keyed by
//! target node. A recovery pass replays them by copying bytes from the source
//! node to the target node:
//!
//! ```text
//! PENDING ──transfer ok──▶ COMPLETED   (+ ACTIVE location for the target)
//!    │
//!    └──any failure──────▶ FAILED      (retry_count += 1, error_message set)
//! ```
//!
//! FAILED items are never picked up again by a pass; `retry_failed` is the
//! only way back to PENDING.

use crate::common::{Result, METRICS};
use crate::coordinator::metadata::{
    MetadataStore, Node, QueueFilter, QueueSummary, ReplicationQueueItem, ReplicationStatus,
};
use crate::coordinator::node_client::NodeTransport;
use crate::coordinator::registry::{address_map, NodeRegistry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Maximum number of items returned by a queue listing
pub const QUEUE_LIST_LIMIT: usize = 100;

/// Outcome of one recovery pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub target_node_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The batch as fetched, before any transitions
    pub items: Vec<ReplicationQueueItem>,
}

pub struct ReplicationEngine {
    store: Arc<MetadataStore>,
    registry: NodeRegistry,
    transport: Arc<dyn NodeTransport>,
    batch_size: usize,
    max_retries: u32,
}

impl ReplicationEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        transport: Arc<dyn NodeTransport>,
        batch_size: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            registry: NodeRegistry::new(store.clone()),
            store,
            transport,
            batch_size,
            max_retries,
        }
    }

    /// Record a replica copy that still has to happen
    pub fn enqueue(
        &self,
        file_key: &str,
        target_node_id: &str,
        source_node_id: &str,
    ) -> Result<ReplicationQueueItem> {
        let item = self.store.enqueue(file_key, target_node_id, source_node_id)?;
        METRICS.replications_enqueued.inc();
        tracing::info!(
            queue_id = item.id,
            file_key,
            target = target_node_id,
            source = source_node_id,
            "Queued replication"
        );
        Ok(item)
    }

    /// Replay PENDING items for `target_node_id` against the current registry
    pub async fn recover(&self, target_node_id: &str) -> Result<RecoveryReport> {
        let nodes = self.registry.list_nodes()?;
        self.recover_with_nodes(target_node_id, &nodes).await
    }

    /// Replay PENDING items, resolving addresses from a caller-held snapshot
    pub async fn recover_with_nodes(
        &self,
        target_node_id: &str,
        nodes: &[Node],
    ) -> Result<RecoveryReport> {
        let batch = self.store.pending_for_target(target_node_id, self.batch_size)?;
        let addresses = address_map(nodes);
        METRICS.recovery_passes.inc();

        tracing::info!(
            target = target_node_id,
            pending = batch.len(),
            "Starting recovery pass"
        );

        let mut succeeded = 0;
        let mut failed = 0;

        for item in &batch {
            let source = addresses.get(item.source_node_id.as_str());
            let target = addresses.get(item.target_node_id.as_str());

            let outcome = match (source, target) {
                (Some(src), Some(dst)) => self
                    .transfer(item, src, dst)
                    .await
                    .map_err(|e| e.to_string()),
                _ => Err("node not found".to_string()),
            };

            let recorded = match &outcome {
                Ok(()) => self.mark_completed(item),
                Err(reason) => {
                    tracing::warn!(
                        queue_id = item.id,
                        file_key = %item.file_key,
                        target = %item.target_node_id,
                        error = %reason,
                        "Replication failed"
                    );
                    self.mark_failed(item, reason).map(|()| false)
                }
            };
            let completed = match recorded {
                Ok(completed) => completed,
                Err(e) => {
                    // the item keeps its old status
                    tracing::error!(queue_id = item.id, error = %e, "Failed to record replication outcome");
                    false
                }
            };

            if outcome.is_ok() && completed {
                succeeded += 1;
                METRICS.replications_completed.inc();
            } else {
                failed += 1;
                METRICS.replications_failed.inc();
            }
        }

        tracing::info!(
            target = target_node_id,
            total = batch.len(),
            succeeded,
            failed,
            "Recovery pass finished"
        );

        Ok(RecoveryReport {
            target_node_id: target_node_id.to_string(),
            total: batch.len(),
            succeeded,
            failed,
            items: batch,
        })
    }

    /// Newest first, at most `QUEUE_LIST_LIMIT`
    pub fn list_queue(&self, filter: &QueueFilter) -> Result<Vec<ReplicationQueueItem>> {
        self.store.list_queue(filter, QUEUE_LIST_LIMIT)
    }

    /// Uncapped counts, for operators
    pub fn summary(&self) -> Result<QueueSummary> {
        self.store.queue_summary()
    }

    /// Reset FAILED items below the retry cap back to PENDING.
    ///
    /// Returns the number of items reset.
    pub fn retry_failed(&self, target_node_id: Option<&str>) -> Result<usize> {
        let filter = QueueFilter {
            node_id: target_node_id.map(str::to_string),
            status: Some(ReplicationStatus::Failed),
        };

        let max_retries = self.max_retries;
        let mut reset = 0;
        for item in self.store.list_queue(&filter, usize::MAX)? {
            let updated = self.store.update_queue_item(item.id, |item| {
                if item.status != ReplicationStatus::Failed || item.retry_count >= max_retries {
                    return false;
                }
                item.status = ReplicationStatus::Pending;
                true
            })?;
            if updated.is_some() {
                reset += 1;
            }
        }

        tracing::info!(target = ?target_node_id, reset, "Reset failed replications");
        Ok(reset)
    }

    async fn transfer(&self, item: &ReplicationQueueItem, source: &str, target: &str) -> Result<()> {
        let fetched = self.transport.fetch(source, &item.file_key).await?;
        let filename = fetched
            .filename
            .unwrap_or_else(|| item.file_key.clone());
        let size = fetched.bytes.len();

        self.transport
            .store(target, &item.file_key, &filename, fetched.bytes)
            .await?;

        tracing::debug!(
            queue_id = item.id,
            file_key = %item.file_key,
            size,
            "Replica transferred"
        );
        Ok(())
    }

    /// Whether the item ended up COMPLETED
    fn mark_completed(&self, item: &ReplicationQueueItem) -> Result<bool> {
        if self.store.complete_queue_item(item.id)?.is_some() {
            return Ok(true);
        }
        match self.store.get_queue_item(item.id)? {
            // a concurrent pass got there first
            Some(current) => Ok(current.status == ReplicationStatus::Completed),
            None => {
                tracing::warn!(
                    queue_id = item.id,
                    file_key = %item.file_key,
                    target = %item.target_node_id,
                    "File deleted during transfer, not recording location"
                );
                Ok(false)
            }
        }
    }

    fn mark_failed(&self, item: &ReplicationQueueItem, reason: &str) -> Result<()> {
        let now = Utc::now();
        self.store.update_queue_item(item.id, |item| {
            if item.status == ReplicationStatus::Completed {
                return false;
            }
            item.status = ReplicationStatus::Failed;
            item.retry_count += 1;
            item.last_attempt = Some(now);
            item.error_message = Some(reason.to_string());
            true
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NodeRole, NodeStatus};
    use crate::coordinator::locations::LocationIndex;
    use crate::coordinator::test_support::{add_node, address_of, temp_store, FakeTransport};

    fn setup() -> (
        tempfile::TempDir,
        Arc<MetadataStore>,
        Arc<FakeTransport>,
        ReplicationEngine,
    ) {
        let (dir, store) = temp_store();
        let transport = FakeTransport::new();
        for id in ["node-1", "node-2", "node-3"] {
            transport.add_node(&address_of(id), true);
        }
        add_node(&store, "node-1", NodeRole::Main, NodeStatus::Up, 5);
        add_node(&store, "node-2", NodeRole::Replica, NodeStatus::Up, 10);
        add_node(&store, "node-3", NodeRole::Replica, NodeStatus::Up, 15);
        let engine = ReplicationEngine::new(store.clone(), transport.clone(), 100, 5);
        (dir, store, transport, engine)
    }

    #[tokio::test]
    async fn test_recovery_copies_pending_items() {
        let (_dir, store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", Some("one.txt"));
        transport.put_file(&address_of("node-1"), "k2", b"two", None);
        engine.enqueue("k1", "node-2", "node-1").unwrap();
        engine.enqueue("k2", "node-2", "node-1").unwrap();

        let report = engine.recover("node-2").await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(transport.store_calls(), 2);

        // filename preserved when advertised, else the key
        let (bytes, name) = transport.file(&address_of("node-2"), "k1").unwrap();
        assert_eq!(&bytes[..], b"one");
        assert_eq!(name.as_deref(), Some("one.txt"));
        let (_, name) = transport.file(&address_of("node-2"), "k2").unwrap();
        assert_eq!(name.as_deref(), Some("k2"));

        let locations = LocationIndex::new(store.clone());
        assert_eq!(locations.get_locations("k1").unwrap(), vec!["node-2"]);

        for item in &report.items {
            let item = store.get_queue_item(item.id).unwrap().unwrap();
            assert_eq!(item.status, ReplicationStatus::Completed);
            assert!(item.completed_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_batch() {
        let (_dir, store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        // k-missing is not on the source
        transport.put_file(&address_of("node-1"), "k3", b"three", None);
        let a = engine.enqueue("k1", "node-2", "node-1").unwrap();
        let b = engine.enqueue("k-missing", "node-2", "node-1").unwrap();
        let c = engine.enqueue("k3", "node-2", "node-1").unwrap();

        let report = engine.recover("node-2").await.unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(transport.fetch_calls(), 3);

        let failed = store.get_queue_item(b.id).unwrap().unwrap();
        assert_eq!(failed.status, ReplicationStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(failed.last_attempt.is_some());
        assert!(!failed.error_message.unwrap_or_default().is_empty());

        for id in [a.id, c.id] {
            let item = store.get_queue_item(id).unwrap().unwrap();
            assert_eq!(item.status, ReplicationStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_target_write_failure_marks_failed() {
        let (_dir, store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        transport.reject_writes(&address_of("node-3"));
        let item = engine.enqueue("k1", "node-3", "node-1").unwrap();

        let report = engine.recover("node-3").await.unwrap();
        assert_eq!(report.failed, 1);

        let item = store.get_queue_item(item.id).unwrap().unwrap();
        assert_eq!(item.status, ReplicationStatus::Failed);
        assert!(LocationIndex::new(store)
            .get_locations("k1")
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unknown_source_node() {
        let (_dir, store, transport, engine) = setup();
        let item = engine.enqueue("k1", "node-2", "node-gone").unwrap();

        let report = engine.recover("node-2").await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(transport.fetch_calls(), 0);

        let item = store.get_queue_item(item.id).unwrap().unwrap();
        assert_eq!(item.status, ReplicationStatus::Failed);
        assert_eq!(item.error_message.as_deref(), Some("node not found"));
    }

    #[tokio::test]
    async fn test_file_deleted_mid_transfer_stays_deleted() {
        let (_dir, store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        transport.put_file(&address_of("node-1"), "k2", b"two", None);
        engine.enqueue("k1", "node-2", "node-1").unwrap();
        let kept = engine.enqueue("k2", "node-2", "node-1").unwrap();

        // the whole-file delete lands while k1 is being written
        let purger = store.clone();
        transport.on_store(move |file_key| {
            if file_key == "k1" {
                purger.delete_queue_for_file("k1").unwrap();
                purger.delete_locations("k1").unwrap();
                purger.delete_file("k1").unwrap();
            }
        });

        let report = engine.recover("node-2").await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);

        let locations = LocationIndex::new(store.clone());
        assert!(locations.get_locations("k1").unwrap().is_empty());
        assert_eq!(locations.get_locations("k2").unwrap(), vec!["node-2"]);

        let queue = engine.list_queue(&QueueFilter::default()).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id, kept.id);
        assert_eq!(queue[0].status, ReplicationStatus::Completed);
    }

    #[tokio::test]
    async fn test_second_pass_is_empty() {
        let (_dir, _store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        engine.enqueue("k1", "node-2", "node-1").unwrap();
        // fails, so the item leaves PENDING too
        engine.enqueue("k-missing", "node-2", "node-1").unwrap();

        let first = engine.recover("node-2").await.unwrap();
        assert_eq!(first.total, 2);
        let stores = transport.store_calls();
        let fetches = transport.fetch_calls();

        let second = engine.recover("node-2").await.unwrap();
        assert_eq!(second.total, 0);
        assert!(second.items.is_empty());
        assert_eq!(transport.store_calls(), stores);
        assert_eq!(transport.fetch_calls(), fetches);
    }

    #[tokio::test]
    async fn test_only_target_items_are_processed() {
        let (_dir, _store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        engine.enqueue("k1", "node-2", "node-1").unwrap();
        engine.enqueue("k1", "node-3", "node-1").unwrap();

        let report = engine.recover("node-3").await.unwrap();
        assert_eq!(report.total, 1);
        assert!(transport.has_file(&address_of("node-3"), "k1"));
        assert!(!transport.has_file(&address_of("node-2"), "k1"));
    }

    #[tokio::test]
    async fn test_batch_size_bounds_a_pass() {
        let (_dir, store, transport, _) = setup();
        let engine = ReplicationEngine::new(store, transport.clone(), 2, 5);
        for i in 0..5 {
            let key = format!("k{}", i);
            transport.put_file(&address_of("node-1"), &key, b"x", None);
            engine.enqueue(&key, "node-2", "node-1").unwrap();
        }

        let report = engine.recover("node-2").await.unwrap();
        assert_eq!(report.total, 2);
        // oldest first
        assert_eq!(report.items[0].file_key, "k0");
        assert_eq!(report.items[1].file_key, "k1");
    }

    #[tokio::test]
    async fn test_retry_failed_respects_cap() {
        let (_dir, store, _transport, engine) = setup();
        let fresh = engine.enqueue("k1", "node-2", "node-1").unwrap();
        let exhausted = engine.enqueue("k2", "node-2", "node-1").unwrap();
        engine.recover("node-2").await.unwrap();

        store
            .update_queue_item(exhausted.id, |item| {
                item.retry_count = 5;
                true
            })
            .unwrap();

        assert_eq!(engine.retry_failed(Some("node-2")).unwrap(), 1);
        let fresh = store.get_queue_item(fresh.id).unwrap().unwrap();
        assert_eq!(fresh.status, ReplicationStatus::Pending);
        assert_eq!(fresh.retry_count, 1);
        let exhausted = store.get_queue_item(exhausted.id).unwrap().unwrap();
        assert_eq!(exhausted.status, ReplicationStatus::Failed);

        assert_eq!(engine.retry_failed(Some("node-3")).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_queue_filters() {
        let (_dir, _store, transport, engine) = setup();
        transport.put_file(&address_of("node-1"), "k1", b"one", None);
        engine.enqueue("k1", "node-2", "node-1").unwrap();
        engine.enqueue("k2", "node-3", "node-1").unwrap();
        engine.recover("node-2").await.unwrap();

        let all = engine.list_queue(&QueueFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].file_key, "k2");

        let done = engine
            .list_queue(&QueueFilter {
                node_id: None,
                status: Some(ReplicationStatus::Completed),
            })
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].target_node_id, "node-2");
    }
}
