//! Node selection for uploads and downloads
//!
//! Both policies are pure functions over a registry snapshot. Ties on latency
//! go to the first node in listing order.

use crate::coordinator::metadata::Node;

/// Pick the node that should receive a client upload.
///
/// The MAIN node wins whenever it is UP, since it drives replica fan-out.
/// Otherwise the lowest-latency UP node takes the write. `None` if nothing is UP.
pub fn select_upload_target(nodes: &[Node]) -> Option<&Node> {
    nodes
        .iter()
        .find(|n| n.is_up() && n.is_main())
        .or_else(|| lowest_latency(nodes.iter().filter(|n| n.is_up())))
}

/// Pick the node that should serve a download of a file held by `holders`.
///
/// Only UP nodes listed in `holders` (the file's ACTIVE locations) qualify.
pub fn select_download_target<'a, S: AsRef<str>>(
    holders: &[S],
    nodes: &'a [Node],
) -> Option<&'a Node> {
    lowest_latency(
        nodes
            .iter()
            .filter(|n| n.is_up() && holders.iter().any(|h| h.as_ref() == n.id)),
    )
}

fn lowest_latency<'a>(candidates: impl Iterator<Item = &'a Node>) -> Option<&'a Node> {
    // ties keep the earlier node
    candidates.fold(None::<&'a Node>, |best, n| match best {
        Some(b) if b.latency_ms <= n.latency_ms => Some(b),
        _ => Some(n),
    })
}
