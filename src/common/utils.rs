//! Utility functions for minidfs

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};

/// Latency recorded for nodes that did not answer a probe.
///
/// Large enough that selection never prefers an unreachable node.
pub const LATENCY_UNREACHABLE_MS: u64 = 9999;

/// Percent-encoding set for file keys used as URL path segments
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&')
    .add(b'"');

/// Encode a file key for use in a URL path or query
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_idx])
}

/// Join a node base address and a path without doubling slashes
pub fn node_url(address: &str, path: &str) -> String {
    format!(
        "{}/{}",
        address.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Extract `filename` from a `Content-Disposition` header value.
///
/// Handles `filename="a b.txt"` and bare `filename=a.txt`. Returns `None` when
/// absent or empty.
pub fn content_disposition_filename(value: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|param| {
        let (name, raw) = param.trim().split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = raw.trim().trim_matches('"');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    })
}

/// Node health state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Up,
    Down,
}

impl NodeStatus {
    /// Is this node able to serve requests?
    pub fn is_up(&self) -> bool {
        matches!(self, NodeStatus::Up)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Up => f.pad("UP"),
            NodeStatus::Down => f.pad("DOWN"),
        }
    }
}

/// Validate a file key (non-empty, reasonable length, no control chars)
pub fn validate_key(key: &str) -> crate::Result<()> {
    if key.is_empty() {
        return Err(crate::Error::InvalidRequest("file key cannot be empty".into()));
    }

    if key.len() > 1024 {
        return Err(crate::Error::InvalidRequest(
            "file key too long (max 1024 bytes)".into(),
        ));
    }

    if key.chars().any(|c| c.is_control() || c == '\0') {
        return Err(crate::Error::InvalidRequest(
            "file key contains invalid characters".into(),
        ));
    }

    Ok(())
}
