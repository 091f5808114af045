//! Health & latency monitor
//!
//! One background task probes every registered node per tick. Each node gets
//! two probes: the first is timed for latency, the second classifies UP/DOWN.
//! A DOWN→UP transition replays the node's pending replication queue.

use crate::common::{NodeStatus, LATENCY_UNREACHABLE_MS, METRICS};
use crate::coordinator::metadata::Node;
use crate::coordinator::node_client::NodeTransport;
use crate::coordinator::registry::NodeRegistry;
use crate::coordinator::replication::{RecoveryReport, ReplicationEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Serialize)]
pub struct StatusTransition {
    pub node_id: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// What one monitor cycle observed and did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub probed: usize,
    pub up: usize,
    pub transitions: Vec<StatusTransition>,
    pub recoveries: Vec<RecoveryReport>,
}

/// Live probe result, not persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeCheck {
    pub node_id: String,
    pub address: String,
    pub status: NodeStatus,
    pub latency_ms: u64,
}

pub struct HealthMonitor {
    registry: NodeRegistry,
    engine: Arc<ReplicationEngine>,
    transport: Arc<dyn NodeTransport>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthMonitor {
    pub fn new(
        registry: NodeRegistry,
        engine: Arc<ReplicationEngine>,
        transport: Arc<dyn NodeTransport>,
        interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            transport,
            interval,
            probe_timeout,
        }
    }

    /// Spawn the periodic loop. Cycles never overlap: a slow cycle delays
    /// the next tick instead of queueing more.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(interval_secs = self.interval.as_secs(), "Health monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let report = self.run_cycle().await;
                tracing::debug!(
                    probed = report.probed,
                    up = report.up,
                    transitions = report.transitions.len(),
                    recoveries = report.recoveries.len(),
                    "Monitor cycle complete"
                );
            }
        })
    }

    /// Probe every node once, persist latency/status, recover nodes that came back
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let nodes = match self.registry.list_nodes() {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping monitor cycle: cannot list nodes");
                return report;
            }
        };

        for node in &nodes {
            report.probed += 1;

            let latency_ms = self.measure_latency(&node.address).await;
            if let Err(e) = self.registry.set_latency(&node.id, latency_ms) {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to store latency");
            }

            let status = self.check_health(&node.address).await;
            if status.is_up() {
                report.up += 1;
            }
            if status == node.status {
                continue;
            }

            if let Err(e) = self.registry.set_status(&node.id, status) {
                tracing::warn!(node_id = %node.id, error = %e, "Failed to store status");
                continue;
            }
            METRICS.status_transitions.inc();
            tracing::info!(
                node_id = %node.id,
                from = %node.status,
                to = %status,
                latency_ms,
                "Node status changed"
            );
            report.transitions.push(StatusTransition {
                node_id: node.id.clone(),
                from: node.status,
                to: status,
            });

            if status == NodeStatus::Up {
                match self.engine.recover_with_nodes(&node.id, &nodes).await {
                    Ok(recovery) => report.recoveries.push(recovery),
                    Err(e) => {
                        tracing::warn!(node_id = %node.id, error = %e, "Recovery pass failed")
                    }
                }
            }
        }

        METRICS.monitor_cycles.inc();
        METRICS.nodes_total.set(report.probed as u64);
        METRICS.nodes_up.set(report.up as u64);
        report
    }

    /// Probe every node without touching the registry
    pub async fn check_nodes(&self, nodes: &[Node]) -> Vec<NodeCheck> {
        let mut checks = Vec::with_capacity(nodes.len());
        for node in nodes {
            let latency_ms = self.measure_latency(&node.address).await;
            let status = if latency_ms == LATENCY_UNREACHABLE_MS {
                NodeStatus::Down
            } else {
                NodeStatus::Up
            };
            checks.push(NodeCheck {
                node_id: node.id.clone(),
                address: node.address.clone(),
                status,
                latency_ms,
            });
        }
        checks
    }

    /// Elapsed round-trip of a health probe, or the sentinel on any failure
    async fn measure_latency(&self, address: &str) -> u64 {
        let start = Instant::now();
        match self.transport.probe(address, self.probe_timeout).await {
            Ok(()) => {
                let elapsed = start.elapsed();
                METRICS.probe_latency.observe(elapsed.as_secs_f64() * 1000.0);
                (elapsed.as_millis() as u64).min(LATENCY_UNREACHABLE_MS - 1)
            }
            Err(e) => {
                tracing::debug!(address, error = %e, "Latency probe failed");
                LATENCY_UNREACHABLE_MS
            }
        }
    }

    async fn check_health(&self, address: &str) -> NodeStatus {
        match self.transport.probe(address, self.probe_timeout).await {
            Ok(()) => NodeStatus::Up,
            Err(_) => NodeStatus::Down,
        }
    }
}
