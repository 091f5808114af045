//! Common utilities and types shared across minidfs

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, CoordinatorConfig, NodeRole, NodeSeed};
pub use error::{Error, Result};
pub use metrics::METRICS;
pub use utils::{
    content_disposition_filename, encode_key, format_bytes, node_url, validate_key, NodeStatus,
    LATENCY_UNREACHABLE_MS,
};
