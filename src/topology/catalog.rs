//! Full-mesh edge catalog generation.
//!
//! For every ordered pair of distinct peers the catalog holds exactly one
//! edge whose properties are derived from the endpoint profiles:
//! bandwidth is the bottleneck of source upload and target download,
//! latency is additive and loss is the worse of the two ends.

use log::info;

use super::types::{peer_order_key, Edge, Peer};

/// Derives the shaping properties of a single directed edge.
pub fn derive_edge(source: &Peer, target: &Peer) -> Edge {
    Edge {
        source: source.name.clone(),
        target: target.name.clone(),
        bandwidth: source.max_upload.min(target.max_download),
        latency: source.latency + target.latency,
        loss: source.loss.max(target.loss),
    }
}

/// Builds the complete ordered-pair catalog, sorted by (source, target) with
/// `origin` first so the emitted listing is stable across runs.
pub fn build_catalog(peers: &[Peer]) -> Vec<Edge> {
    let mut edges = Vec::with_capacity(peers.len().saturating_sub(1) * peers.len());
    for source in peers {
        for target in peers {
            if source.name != target.name {
                edges.push(derive_edge(source, target));
            }
        }
    }
    edges.sort_by(|a, b| {
        peer_order_key(&a.source)
            .cmp(&peer_order_key(&b.source))
            .then(peer_order_key(&a.target).cmp(&peer_order_key(&b.target)))
    });
    info!("derived {} catalog edges for {} peers", edges.len(), peers.len());
    edges
}
