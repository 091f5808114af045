//! Naming service
//!
//! The naming service is responsible for:
//! - Node registry (address, role, UP/DOWN, latency)
//! - Health and latency monitoring
//! - Upload/download node selection
//! - File location index
//! - Replication queue and recovery
//! - Routing client uploads, downloads and deletes

pub mod http;
pub mod locations;
pub mod metadata;
pub mod monitor;
pub mod node_client;
pub mod placement;
pub mod registry;
pub mod replication;
pub mod server;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

pub use server::Coordinator;
pub use service::NamingService;
