//! Node registry: the single source of truth for node address, role, status
//! and latency. Reads always go to the metadata store; nothing is cached.

use crate::common::{NodeSeed, NodeStatus, Result, LATENCY_UNREACHABLE_MS};
use crate::coordinator::metadata::{MetadataStore, Node};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeRegistry {
    store: Arc<MetadataStore>,
}

impl NodeRegistry {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    /// All known nodes with current fields, in registry listing order
    pub fn list_nodes(&self) -> Result<Vec<Node>> {
        self.store.list_nodes()
    }

    /// Persist a status and stamp `last_heartbeat`
    pub fn set_status(&self, node_id: &str, status: NodeStatus) -> Result<()> {
        self.update(node_id, |node| {
            node.status = status;
            node.last_heartbeat = Some(Utc::now());
        })
    }

    pub fn set_latency(&self, node_id: &str, latency_ms: u64) -> Result<()> {
        self.update(node_id, |node| node.latency_ms = latency_ms)
    }

    /// Create or refresh a node from configuration.
    ///
    /// New nodes start DOWN with sentinel latency so the first monitor cycle
    /// sees them come up. Known nodes keep their status and latency.
    pub fn provision(&self, seed: &NodeSeed) -> Result<Node> {
        let node = self
            .store
            .modify_node(&seed.id, |existing| {
                Some(match existing {
                    Some(mut existing) => {
                        existing.address = seed.address.clone();
                        existing.role = seed.role;
                        existing
                    }
                    None => Node {
                        id: seed.id.clone(),
                        address: seed.address.clone(),
                        role: seed.role,
                        status: NodeStatus::Down,
                        last_heartbeat: None,
                        latency_ms: LATENCY_UNREACHABLE_MS,
                    },
                })
            })?
            .ok_or_else(|| crate::Error::Internal(format!("provisioning {} stored nothing", seed.id)))?;
        tracing::info!(node_id = %node.id, address = %node.address, role = %node.role, "Provisioned node");
        Ok(node)
    }

    /// Point update of one node; unknown ids are an error
    fn update(&self, node_id: &str, f: impl FnOnce(&mut Node)) -> Result<()> {
        self.store
            .modify_node(node_id, |node| {
                node.map(|mut node| {
                    f(&mut node);
                    node
                })
            })?
            .map(|_| ())
            .ok_or_else(|| crate::Error::NodeNotFound(node_id.to_string()))
    }
}

/// node_id → address for a node snapshot
pub fn address_map(nodes: &[Node]) -> HashMap<&str, &str> {
    nodes
        .iter()
        .map(|n| (n.id.as_str(), n.address.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NodeRole;
    use tempfile::tempdir;

    fn seed(id: &str, role: NodeRole) -> NodeSeed {
        NodeSeed {
            id: id.to_string(),
            address: format!("http://{}:8000", id),
            role,
        }
    }

    #[test]
    fn test_provision_and_updates() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
        let registry = NodeRegistry::new(store.clone());

        let node = registry.provision(&seed("node-1", NodeRole::Main)).unwrap();
        assert_eq!(node.status, NodeStatus::Down);
        assert_eq!(node.latency_ms, LATENCY_UNREACHABLE_MS);
        assert!(node.last_heartbeat.is_none());

        registry.set_status("node-1", NodeStatus::Up).unwrap();
        registry.set_latency("node-1", 42).unwrap();

        let node = store.get_node("node-1").unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Up);
        assert_eq!(node.latency_ms, 42);
        assert!(node.last_heartbeat.is_some());

        // Re-provisioning refreshes address/role but keeps live fields
        let mut moved = seed("node-1", NodeRole::Replica);
        moved.address = "http://elsewhere:9000".to_string();
        let node = registry.provision(&moved).unwrap();
        assert_eq!(node.address, "http://elsewhere:9000");
        assert_eq!(node.role, NodeRole::Replica);
        assert_eq!(node.status, NodeStatus::Up);
        assert_eq!(node.latency_ms, 42);
    }

    #[test]
    fn test_unknown_node_update_fails() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
        let registry = NodeRegistry::new(store);

        let err = registry.set_status("ghost", NodeStatus::Up).unwrap_err();
        assert!(matches!(err, crate::Error::NodeNotFound(_)));
        let err = registry.set_latency("ghost", 5).unwrap_err();
        assert!(matches!(err, crate::Error::NodeNotFound(_)));
        assert!(registry.list_nodes().unwrap().is_empty());
    }

    #[test]
    fn test_status_and_latency_writers_do_not_clobber() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
        let registry = NodeRegistry::new(store.clone());
        registry.provision(&seed("node-1", NodeRole::Main)).unwrap();
        registry.set_status("node-1", NodeStatus::Up).unwrap();

        let monitor = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for ms in 1..=200 {
                    registry.set_latency("node-1", ms).unwrap();
                }
            })
        };
        let router = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    registry.set_status("node-1", NodeStatus::Down).unwrap();
                }
            })
        };
        monitor.join().unwrap();
        router.join().unwrap();

        let node = store.get_node("node-1").unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Down);
        assert_eq!(node.latency_ms, 200);
    }

    #[test]
    fn test_address_map() {
        let dir = tempdir().unwrap();
        let store = Arc::new(MetadataStore::open(dir.path().join("meta.db")).unwrap());
        let registry = NodeRegistry::new(store);
        registry.provision(&seed("a", NodeRole::Main)).unwrap();
        registry.provision(&seed("b", NodeRole::Replica)).unwrap();

        let nodes = registry.list_nodes().unwrap();
        let map = address_map(&nodes);
        assert_eq!(map.get("b"), Some(&"http://b:8000"));
        assert!(map.get("c").is_none());
    }
}
