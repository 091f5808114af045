//! Error types for minidfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Lookup Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    // === Placement Errors ===
    #[error("No available nodes")]
    NoAvailableNodes,

    // === Storage Node Errors ===
    #[error("Node {node} unreachable: {reason}")]
    Unreachable { node: String, reason: String },

    #[error("Node {node} returned status {status}")]
    Upstream { node: String, status: u16 },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    // === Metadata Errors ===
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("Metadata corrupted: {0}")]
    MetadataCorrupted(String),

    // === Request / Config Errors ===
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// A failed contact that takes the node DOWN. An HTTP error status from a
    /// live node does not.
    pub fn marks_node_down(&self) -> bool {
        matches!(self, Error::Unreachable { .. })
    }

    /// Convert to HTTP status code
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::NotFound(_) | Error::NodeNotFound(_) => StatusCode::NOT_FOUND,
            Error::NoAvailableNodes => StatusCode::SERVICE_UNAVAILABLE,
            Error::Unreachable { .. } | Error::Upstream { .. } | Error::Transfer(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::MetadataCorrupted(e.to_string())
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Error::Other(e.to_string())
    }
}
