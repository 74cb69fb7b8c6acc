//! Core topology data types.
//!
//! A `Peer` is an endpoint profile produced by the sampler and immutable
//! afterwards. An `Edge` is a directed connection between two peers whose
//! properties are a deterministic function of the endpoint profiles.

use serde::{Deserialize, Serialize};

/// Reserved name of the unique peer that initially holds the artifact.
pub const ORIGIN: &str = "origin";

/// Network profile of a single endpoint.
///
/// Rates are integer Kbit/s, latency is one-way in milliseconds, loss is a
/// fraction in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    pub name: String,
    #[serde(rename = "maxUpload")]
    pub max_upload: u32,
    #[serde(rename = "maxDownload")]
    pub max_download: u32,
    #[serde(skip)]
    pub latency: f64,
    #[serde(skip)]
    pub loss: f64,
}

impl Peer {
    pub fn is_origin(&self) -> bool {
        self.name == ORIGIN
    }
}

/// A directed catalog edge with derived shaping properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    /// Theoretical capacity in Kbit/s: `min(source.maxUpload, target.maxDownload)`.
    pub bandwidth: u32,
    /// Latency budget in ms: `source.latency + target.latency`.
    pub latency: f64,
    /// Loss fraction: `max(source.loss, target.loss)`.
    pub loss: f64,
}

/// Sort key for peer names: `origin` first, then numeric peer names in
/// ascending order. Keeps every emitted listing stable.
pub fn peer_order_key(name: &str) -> (u8, u64) {
    if name == ORIGIN {
        (0, 0)
    } else {
        (1, name.parse::<u64>().unwrap_or(u64::MAX))
    }
}
