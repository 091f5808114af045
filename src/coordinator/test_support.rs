//! In-process fakes shared by coordinator unit tests

use crate::common::{Error, NodeRole, NodeSeed, NodeStatus, Result};
use crate::coordinator::metadata::MetadataStore;
use crate::coordinator::node_client::{DeleteOutcome, FetchedFile, NodeTransport};
use crate::coordinator::registry::NodeRegistry;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
struct FakeNode {
    healthy: bool,
    unreachable: bool,
    reject_writes: bool,
    files: HashMap<String, (Bytes, Option<String>)>,
}

type StoreHook = Box<dyn Fn(&str) + Send + Sync>;

/// Storage nodes keyed by address, with call counters
#[derive(Default)]
pub struct FakeTransport {
    nodes: Mutex<HashMap<String, FakeNode>>,
    /// Runs with the file key before every store
    store_hook: Mutex<Option<StoreHook>>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
    stores: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, address: &str, healthy: bool) {
        self.nodes.lock().unwrap().insert(
            address.to_string(),
            FakeNode {
                healthy,
                ..Default::default()
            },
        );
    }

    pub fn set_healthy(&self, address: &str, healthy: bool) {
        self.with_node(address, |n| n.healthy = healthy);
    }

    /// Transport-level failure on every call
    pub fn set_unreachable(&self, address: &str, unreachable: bool) {
        self.with_node(address, |n| n.unreachable = unreachable);
    }

    /// Replica stores answer 500
    pub fn reject_writes(&self, address: &str) {
        self.with_node(address, |n| n.reject_writes = true);
    }

    pub fn on_store(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.store_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn put_file(&self, address: &str, key: &str, data: &[u8], filename: Option<&str>) {
        let entry = (Bytes::copy_from_slice(data), filename.map(str::to_string));
        self.with_node(address, |n| {
            n.files.insert(key.to_string(), entry);
        });
    }

    pub fn file(&self, address: &str, key: &str) -> Option<(Bytes, Option<String>)> {
        self.nodes
            .lock()
            .unwrap()
            .get(address)
            .and_then(|n| n.files.get(key).cloned())
    }

    pub fn has_file(&self, address: &str, key: &str) -> bool {
        self.file(address, key).is_some()
    }

    pub fn probe_calls(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn store_calls(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }

    fn with_node(&self, address: &str, f: impl FnOnce(&mut FakeNode)) {
        let mut nodes = self.nodes.lock().unwrap();
        f(nodes.entry(address.to_string()).or_default());
    }

    /// Runs `f` against a reachable node, or fails like a dead socket
    fn reach<T>(&self, address: &str, f: impl FnOnce(&mut FakeNode) -> Result<T>) -> Result<T> {
        let mut nodes = self.nodes.lock().unwrap();
        match nodes.get_mut(address) {
            Some(node) if !node.unreachable => f(node),
            _ => Err(Error::Unreachable {
                node: address.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

#[async_trait]
impl NodeTransport for FakeTransport {
    async fn probe(&self, address: &str, _timeout: Duration) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.reach(address, |n| {
            if n.healthy {
                Ok(())
            } else {
                Err(Error::Upstream {
                    node: address.to_string(),
                    status: 503,
                })
            }
        })
    }

    async fn fetch(&self, address: &str, file_key: &str) -> Result<FetchedFile> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.reach(address, |n| match n.files.get(file_key) {
            Some((bytes, filename)) => Ok(FetchedFile {
                bytes: bytes.clone(),
                filename: filename.clone(),
            }),
            None => Err(Error::Upstream {
                node: address.to_string(),
                status: 404,
            }),
        })
    }

    async fn store(
        &self,
        address: &str,
        file_key: &str,
        filename: &str,
        bytes: Bytes,
    ) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = self.store_hook.lock().unwrap().as_ref() {
            hook(file_key);
        }
        self.reach(address, |n| {
            if n.reject_writes {
                return Err(Error::Upstream {
                    node: address.to_string(),
                    status: 500,
                });
            }
            n.files
                .insert(file_key.to_string(), (bytes, Some(filename.to_string())));
            Ok(())
        })
    }

    async fn delete(&self, address: &str, file_key: &str) -> Result<DeleteOutcome> {
        self.reach(address, |n| match n.files.remove(file_key) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        })
    }
}

pub fn temp_store() -> (TempDir, Arc<MetadataStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
    (dir, store)
}

pub fn address_of(id: &str) -> String {
    format!("http://{}:8000", id)
}

/// Register a node with the given live state
pub fn add_node(store: &Arc<MetadataStore>, id: &str, role: NodeRole, status: NodeStatus, latency_ms: u64) {
    let registry = NodeRegistry::new(store.clone());
    registry
        .provision(&NodeSeed {
            id: id.to_string(),
            address: address_of(id),
            role,
        })
        .unwrap();
    registry.set_status(id, status).unwrap();
    registry.set_latency(id, latency_ms).unwrap();
}
