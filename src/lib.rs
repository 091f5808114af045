//! # minidfs
//!
//! Naming service for a small distributed file store:
//! - Node registry with periodic health and latency probing
//! - Upload routing to the MAIN node, falling back to the fastest UP node
//! - Download routing to the fastest UP node holding the file
//! - Durable replication queue, replayed when a node comes back
//! - Best-effort cluster-wide deletes
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            clients
//!               │ HTTP
//! ┌─────────────▼───────────────────────────┐
//! │           Naming service                │
//! │  router ─▶ selector ─▶ registry         │
//! │  monitor ─▶ recovery ─▶ location index  │
//! │           (RocksDB metadata)            │
//! └───────┬──────────────┬──────────────┬───┘
//!         │ HTTP         │              │
//! ┌───────▼────┐   ┌─────▼──────┐   ┌───▼────────┐
//! │ node-1     │   │ node-2     │   │ node-3     │
//! │ (MAIN)     │◀──│ (REPLICA)  │   │ (REPLICA)  │
//! └────────────┘   └────────────┘   └────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the naming service
//! ```bash
//! minidfs-naming serve \
//!   --bind 0.0.0.0:8080 \
//!   --db ./naming-data \
//!   --node node-1=http://localhost:8001 \
//!   --node node-2=http://localhost:8002 \
//!   --main node-1
//! ```
//!
//! ### Use the CLI
//! ```bash
//! minidfs nodes
//! minidfs queue --status failed
//! minidfs recover node-2
//! minidfs retry --node node-2
//! minidfs verify
//! minidfs delete 3f2a...
//! ```

pub mod common;
pub mod coordinator;
pub mod ops;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use coordinator::{Coordinator, NamingService};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
