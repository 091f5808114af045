//! Metadata store using RocksDB
//!
//! Stores:
//! - Node registry (node_id → address, role, status, latency)
//! - File metadata (file_key → filename, size, checksum)
//! - File locations (file_key + node_id → ACTIVE / DELETED)
//! - Replication queue (id → pending replica copy), indexed by PENDING target
//!   and by file
//!
//! Every method is a single point read/write, a single scan, or a single
//! write batch. There are no transactions spanning several calls; callers
//! tolerate interleaving with other writers. Read-modify-write of a node
//! record or a queue item happens under a store lock so concurrent point
//! updates never drop each other's fields.

use crate::common::{NodeRole, NodeStatus, Result};
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

const CF_NODES: &str = "nodes";
const CF_FILES: &str = "files";
const CF_LOCATIONS: &str = "locations";
const CF_QUEUE: &str = "queue";
/// target \0 id → () for PENDING items only
const CF_QUEUE_PENDING: &str = "queue_pending";
/// file_key \0 id → () for every item
const CF_QUEUE_BY_FILE: &str = "queue_by_file";
const CF_META: &str = "meta";

const QUEUE_SEQ_KEY: &[u8] = b"queue_seq";

/// Storage node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub latency_ms: u64,
}

impl Node {
    pub fn is_up(&self) -> bool {
        self.status.is_up()
    }

    pub fn is_main(&self) -> bool {
        self.role == NodeRole::Main
    }
}

/// File metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_key: String,
    pub original_filename: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LocationStatus {
    Active,
    Deleted,
}

/// A node's copy of a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub file_key: String,
    pub node_id: String,
    pub status: LocationStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReplicationStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for ReplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicationStatus::Pending => f.pad("PENDING"),
            ReplicationStatus::Completed => f.pad("COMPLETED"),
            ReplicationStatus::Failed => f.pad("FAILED"),
        }
    }
}

impl std::str::FromStr for ReplicationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ReplicationStatus::Pending),
            "COMPLETED" => Ok(ReplicationStatus::Completed),
            "FAILED" => Ok(ReplicationStatus::Failed),
            other => Err(crate::Error::InvalidRequest(format!(
                "unknown replication status: {}",
                other
            ))),
        }
    }
}

/// A pending (or attempted) replica copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationQueueItem {
    pub id: u64,
    pub file_key: String,
    pub target_node_id: String,
    pub source_node_id: String,
    pub status: ReplicationStatus,
    pub retry_count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Filter for queue listings; `None` matches everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueFilter {
    pub node_id: Option<String>,
    pub status: Option<ReplicationStatus>,
}

impl QueueFilter {
    fn matches(&self, item: &ReplicationQueueItem) -> bool {
        self.node_id
            .as_deref()
            .map_or(true, |n| item.target_node_id == n)
            && self.status.map_or(true, |s| item.status == s)
    }
}

/// Queue counts by status, plus PENDING counts per target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending_by_target: BTreeMap<String, usize>,
}

fn location_key(file_key: &str, node_id: &str) -> Vec<u8> {
    let mut key = location_prefix(file_key);
    key.extend_from_slice(node_id.as_bytes());
    key
}

fn location_prefix(file_key: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(file_key.len() + 1);
    key.extend_from_slice(file_key.as_bytes());
    key.push(0);
    key
}

/// `prefix \0 id` index key; big-endian ids keep each prefix in id order
fn index_key(prefix: &str, id: u64) -> Vec<u8> {
    let mut key = location_prefix(prefix);
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Metadata store
pub struct MetadataStore {
    db: DB,
    /// Last allocated queue id. Held for every queue write.
    queue_seq: Mutex<u64>,
    /// Held for node read-modify-write
    node_lock: Mutex<()>,
}

impl MetadataStore {
    /// Open or create metadata store
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let db = DB::open_cf(
            &opts,
            path,
            vec![
                CF_NODES,
                CF_FILES,
                CF_LOCATIONS,
                CF_QUEUE,
                CF_QUEUE_PENDING,
                CF_QUEUE_BY_FILE,
                CF_META,
            ],
        )?;

        let mut store = Self {
            db,
            queue_seq: Mutex::new(0),
            node_lock: Mutex::new(()),
        };
        let seq = store.recover_queue_seq()?;
        store.queue_seq = Mutex::new(seq);

        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| crate::Error::Internal(format!("missing column family {}", name)))
    }

    fn put_value<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Decode every value whose key starts with `prefix`, in key order
    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Ids of the items listed in an index family under `prefix`, ascending
    fn scan_index(&self, cf: &str, prefix: &str, limit: usize) -> Result<Vec<u64>> {
        let start = location_prefix(prefix);
        let mut ids = Vec::new();
        for item in self
            .db
            .iterator_cf(self.cf(cf)?, IteratorMode::From(&start, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&start) {
                break;
            }
            ids.push(decode_id(&key[start.len()..])?);
            if ids.len() >= limit {
                break;
            }
        }
        Ok(ids)
    }

    fn lock_queue(&self) -> Result<std::sync::MutexGuard<'_, u64>> {
        self.queue_seq
            .lock()
            .map_err(|_| crate::Error::Internal("queue lock poisoned".into()))
    }

    fn recover_queue_seq(&self) -> Result<u64> {
        let persisted = match self.db.get_cf(self.cf(CF_META)?, QUEUE_SEQ_KEY)? {
            Some(bytes) => decode_id(&bytes)?,
            None => 0,
        };
        let last_key = match self
            .db
            .iterator_cf(self.cf(CF_QUEUE)?, IteratorMode::End)
            .next()
        {
            Some(item) => decode_id(&item?.0)?,
            None => 0,
        };
        Ok(persisted.max(last_key))
    }

    // === Node operations ===

    /// Read-modify-write a node record under the node lock.
    ///
    /// `f` receives the current record (if any) and returns the record to
    /// store, or `None` to leave the store untouched.
    pub fn modify_node<F>(&self, node_id: &str, f: F) -> Result<Option<Node>>
    where
        F: FnOnce(Option<Node>) -> Option<Node>,
    {
        let _guard = self
            .node_lock
            .lock()
            .map_err(|_| crate::Error::Internal("node lock poisoned".into()))?;
        let current = self.get_node(node_id)?;
        let next = f(current);
        if let Some(node) = &next {
            self.put_value(CF_NODES, node.id.as_bytes(), node)?;
        }
        Ok(next)
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.get_value(CF_NODES, node_id.as_bytes())
    }

    /// List all nodes, ordered by node id
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.scan_prefix(CF_NODES, b"")
    }

    // === File operations ===

    pub fn put_file(&self, meta: &FileMetadata) -> Result<()> {
        self.put_value(CF_FILES, meta.file_key.as_bytes(), meta)
    }

    pub fn get_file(&self, file_key: &str) -> Result<Option<FileMetadata>> {
        self.get_value(CF_FILES, file_key.as_bytes())
    }

    /// Most recently uploaded files first
    pub fn list_files(&self, limit: usize) -> Result<Vec<FileMetadata>> {
        let mut files: Vec<FileMetadata> = self.scan_prefix(CF_FILES, b"")?;
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        files.truncate(limit);
        Ok(files)
    }

    pub fn delete_file(&self, file_key: &str) -> Result<()> {
        self.db.delete_cf(self.cf(CF_FILES)?, file_key.as_bytes())?;
        Ok(())
    }

    // === Location operations ===

    pub fn put_location(&self, location: &FileLocation) -> Result<()> {
        let key = location_key(&location.file_key, &location.node_id);
        self.put_value(CF_LOCATIONS, &key, location)
    }

    pub fn get_location(&self, file_key: &str, node_id: &str) -> Result<Option<FileLocation>> {
        self.get_value(CF_LOCATIONS, &location_key(file_key, node_id))
    }

    /// All location rows for a file, any status
    pub fn list_locations(&self, file_key: &str) -> Result<Vec<FileLocation>> {
        self.scan_prefix(CF_LOCATIONS, &location_prefix(file_key))
    }

    /// Hard-delete every location row of a file; returns rows removed
    pub fn delete_locations(&self, file_key: &str) -> Result<usize> {
        let cf = self.cf(CF_LOCATIONS)?;
        let prefix = location_prefix(file_key);
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            batch.delete_cf(cf, key);
            removed += 1;
        }

        self.db.write(batch)?;
        Ok(removed)
    }

    // === Replication queue operations ===

    /// Append a PENDING item; ids are never reused
    pub fn enqueue(
        &self,
        file_key: &str,
        target_node_id: &str,
        source_node_id: &str,
    ) -> Result<ReplicationQueueItem> {
        let mut seq = self.lock_queue()?;
        let id = *seq + 1;

        let item = ReplicationQueueItem {
            id,
            file_key: file_key.to_string(),
            target_node_id: target_node_id.to_string(),
            source_node_id: source_node_id.to_string(),
            status: ReplicationStatus::Pending,
            retry_count: 0,
            last_attempt: None,
            created_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };

        let mut batch = WriteBatch::default();
        self.stage_queue_item(&mut batch, None, &item)?;
        batch.put_cf(self.cf(CF_META)?, QUEUE_SEQ_KEY, id.to_be_bytes());
        self.db.write(batch)?;

        *seq = id;
        Ok(item)
    }

    pub fn get_queue_item(&self, id: u64) -> Result<Option<ReplicationQueueItem>> {
        self.get_value(CF_QUEUE, &id.to_be_bytes())
    }

    /// Add the item write and its index maintenance to `batch`
    fn stage_queue_item(
        &self,
        batch: &mut WriteBatch,
        old: Option<&ReplicationQueueItem>,
        item: &ReplicationQueueItem,
    ) -> Result<()> {
        let value = bincode::serialize(item)
            .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))?;
        batch.put_cf(self.cf(CF_QUEUE)?, item.id.to_be_bytes(), value);

        let pending = self.cf(CF_QUEUE_PENDING)?;
        if let Some(old) = old {
            if old.status == ReplicationStatus::Pending {
                batch.delete_cf(pending, index_key(&old.target_node_id, old.id));
            }
        } else {
            batch.put_cf(
                self.cf(CF_QUEUE_BY_FILE)?,
                index_key(&item.file_key, item.id),
                b"",
            );
        }
        if item.status == ReplicationStatus::Pending {
            batch.put_cf(pending, index_key(&item.target_node_id, item.id), b"");
        }
        Ok(())
    }

    /// Transition an item that still exists.
    ///
    /// `f` edits the item in place and returns whether to persist it. Returns
    /// the stored item, or `None` when the item is gone or `f` declined.
    pub fn update_queue_item<F>(&self, id: u64, f: F) -> Result<Option<ReplicationQueueItem>>
    where
        F: FnOnce(&mut ReplicationQueueItem) -> bool,
    {
        self.update_queue_item_with(id, f, |_, _| Ok(()))
    }

    /// Mark an item COMPLETED and its target ACTIVE in one write.
    ///
    /// Nothing is written when the item has been purged, so a file deleted
    /// mid-transfer does not regain a location.
    pub fn complete_queue_item(&self, id: u64) -> Result<Option<ReplicationQueueItem>> {
        let now = Utc::now();
        self.update_queue_item_with(
            id,
            |item| {
                if item.status == ReplicationStatus::Completed {
                    return false;
                }
                item.status = ReplicationStatus::Completed;
                item.last_attempt = Some(now);
                item.completed_at = Some(now);
                item.error_message = None;
                true
            },
            |batch, item| {
                let location = FileLocation {
                    file_key: item.file_key.clone(),
                    node_id: item.target_node_id.clone(),
                    status: LocationStatus::Active,
                    updated_at: now,
                };
                let value = bincode::serialize(&location)
                    .map_err(|e| crate::Error::Internal(format!("Serialize error: {}", e)))?;
                batch.put_cf(
                    self.cf(CF_LOCATIONS)?,
                    location_key(&location.file_key, &location.node_id),
                    value,
                );
                Ok(())
            },
        )
    }

    fn update_queue_item_with<F, G>(
        &self,
        id: u64,
        f: F,
        extra: G,
    ) -> Result<Option<ReplicationQueueItem>>
    where
        F: FnOnce(&mut ReplicationQueueItem) -> bool,
        G: FnOnce(&mut WriteBatch, &ReplicationQueueItem) -> Result<()>,
    {
        let _guard = self.lock_queue()?;
        let Some(old) = self.get_queue_item(id)? else {
            return Ok(None);
        };
        let mut item = old.clone();
        if !f(&mut item) {
            return Ok(None);
        }

        let mut batch = WriteBatch::default();
        self.stage_queue_item(&mut batch, Some(&old), &item)?;
        extra(&mut batch, &item)?;
        self.db.write(batch)?;
        Ok(Some(item))
    }

    /// PENDING items for a target, oldest first
    pub fn pending_for_target(
        &self,
        target_node_id: &str,
        limit: usize,
    ) -> Result<Vec<ReplicationQueueItem>> {
        let mut out = Vec::new();
        for id in self.scan_index(CF_QUEUE_PENDING, target_node_id, limit)? {
            if let Some(item) = self.get_queue_item(id)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    /// Items matching `filter`, newest first
    pub fn list_queue(
        &self,
        filter: &QueueFilter,
        limit: usize,
    ) -> Result<Vec<ReplicationQueueItem>> {
        // PENDING listings for one target come straight from the index
        if let (Some(node_id), Some(ReplicationStatus::Pending)) = (&filter.node_id, filter.status) {
            let mut items = self.pending_for_target(node_id, usize::MAX)?;
            items.reverse();
            items.truncate(limit);
            return Ok(items);
        }

        let mut out = Vec::new();
        for item in self.db.iterator_cf(self.cf(CF_QUEUE)?, IteratorMode::End) {
            let (_, value) = item?;
            let item: ReplicationQueueItem = bincode::deserialize(&value)?;
            if filter.matches(&item) {
                out.push(item);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Counts over the whole queue
    pub fn queue_summary(&self) -> Result<QueueSummary> {
        let mut summary = QueueSummary::default();
        for item in self.db.iterator_cf(self.cf(CF_QUEUE)?, IteratorMode::Start) {
            let (_, value) = item?;
            let item: ReplicationQueueItem = bincode::deserialize(&value)?;
            match item.status {
                ReplicationStatus::Pending => {
                    summary.pending += 1;
                    *summary
                        .pending_by_target
                        .entry(item.target_node_id)
                        .or_default() += 1;
                }
                ReplicationStatus::Completed => summary.completed += 1,
                ReplicationStatus::Failed => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    /// Remove every queue item for a file; returns items removed
    pub fn delete_queue_for_file(&self, file_key: &str) -> Result<usize> {
        let _guard = self.lock_queue()?;
        let by_file = self.cf(CF_QUEUE_BY_FILE)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;

        for id in self.scan_index(CF_QUEUE_BY_FILE, file_key, usize::MAX)? {
            batch.delete_cf(by_file, index_key(file_key, id));
            if let Some(item) = self.get_queue_item(id)? {
                batch.delete_cf(self.cf(CF_QUEUE)?, id.to_be_bytes());
                batch.delete_cf(
                    self.cf(CF_QUEUE_PENDING)?,
                    index_key(&item.target_node_id, id),
                );
                removed += 1;
            }
        }

        self.db.write(batch)?;
        Ok(removed)
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn decode_id(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| crate::Error::MetadataCorrupted("bad queue id length".into()))?;
    Ok(u64::from_be_bytes(arr))
}
