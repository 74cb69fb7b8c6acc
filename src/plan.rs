//! Plan artifacts.
//!
//! Everything the planner emits for later stages lives in the run's output
//! directory: a human-readable statistics report, the full catalog
//! (`input-data`), the selected overlay (`output-data`) and the allocated
//! edges (`connection-details`) that the shaping script and validator read.

use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topology::overlay::OverlayEdge;
use crate::topology::{projected_transfer_ms, AllocatedEdge, Edge, Overlay, Peer};

/// Catalog edge as serialized into `input-data-N.json`: integer Kbit/s plus
/// fixed-precision decimal strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEdgeJson {
    #[serde(rename = "sourceName")]
    pub source: String,
    #[serde(rename = "targetName")]
    pub target: String,
    pub bandwidth: u32,
    pub latency: String,
    pub loss: String,
}

impl From<&Edge> for CatalogEdgeJson {
    fn from(edge: &Edge) -> Self {
        CatalogEdgeJson {
            source: edge.source.clone(),
            target: edge.target.clone(),
            bandwidth: edge.bandwidth,
            latency: format!("{:.2}", edge.latency),
            loss: format!("{:.4}", edge.loss),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputData {
    pub filename: String,
    pub filesize: u64,
    pub peers: Vec<Peer>,
    pub connections: Vec<CatalogEdgeJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuperPeerEntry {
    pub name: String,
}

/// Overlay selection as serialized into `output-data-N.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputData {
    pub peer2peer: Vec<OverlayEdge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superpeers: Vec<SuperPeerEntry>,
}

impl OutputData {
    pub fn from_overlay(overlay: &Overlay) -> Self {
        OutputData {
            peer2peer: overlay.edges.clone(),
            superpeers: overlay
                .superpeers
                .iter()
                .map(|name| SuperPeerEntry { name: name.clone() })
                .collect(),
        }
    }

    pub fn into_overlay(self) -> Overlay {
        Overlay {
            superpeers: self.superpeers.into_iter().map(|sp| sp.name).collect(),
            edges: self.peer2peer,
        }
    }
}

/// Writes the per-peer statistics report in the established row format.
pub fn write_network_statistics(output_dir: &Path, peers: &[Peer]) -> Result<PathBuf> {
    let path = output_dir.join(format!("network-statistics-{}.txt", peers.len() - 1));
    let mut rows = String::new();
    for peer in peers {
        rows.push_str(&format!(
            "{}: Max Upload: {} Kbps, Max Download: {} Kbps, Latency: {:.2} ms, Packet Loss: {:.4}%\n",
            peer.name, peer.max_upload, peer.max_download, peer.latency, peer.loss
        ));
    }
    std::fs::write(&path, rows)?;
    info!("wrote network statistics to {}", path.display());
    Ok(path)
}

/// Writes the catalog artifact.
pub fn write_input_data(
    output_dir: &Path,
    peers: &[Peer],
    catalog: &[Edge],
    file_name: &str,
    file_bytes: u64,
) -> Result<PathBuf> {
    let path = output_dir.join(format!("input-data-{}.json", peers.len() - 1));
    let data = InputData {
        filename: file_name.to_string(),
        filesize: file_bytes,
        peers: peers.to_vec(),
        connections: catalog.iter().map(CatalogEdgeJson::from).collect(),
    };
    std::fs::write(&path, serde_json::to_string_pretty(&data)?)?;
    info!("wrote input data to {}", path.display());
    Ok(path)
}

/// Writes the overlay artifact.
pub fn write_output_data(output_dir: &Path, overlay: &Overlay, peer_count: usize) -> Result<PathBuf> {
    let path = output_dir.join(format!("output-data-{peer_count}.json"));
    std::fs::write(
        &path,
        serde_json::to_string_pretty(&OutputData::from_overlay(overlay))?,
    )?;
    info!("wrote output data to {}", path.display());
    Ok(path)
}

/// Writes the allocated-edge artifact consumed by the shaping script and
/// the validator.
pub fn write_connection_details(
    output_dir: &Path,
    allocated: &[AllocatedEdge],
    peer_count: usize,
) -> Result<PathBuf> {
    let path = output_dir.join(format!("connection-details-{peer_count}.json"));
    std::fs::write(&path, serde_json::to_string_pretty(allocated)?)?;
    info!("wrote connection details to {}", path.display());
    Ok(path)
}

/// Reads the allocated-edge artifact back.
pub fn read_connection_details(path: &Path) -> Result<Vec<AllocatedEdge>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Reads the overlay artifact back.
pub fn read_output_data(path: &Path) -> Result<Overlay> {
    let contents = std::fs::read_to_string(path)?;
    let data: OutputData = serde_json::from_str(&contents)?;
    Ok(data.into_overlay())
}

/// Logs the allocation table, its bottleneck and the projected per-edge
/// transfer times.
pub fn log_allocation_summary(allocated: &[AllocatedEdge], file_bytes: u64) {
    let mut min_bandwidth = u32::MAX;
    for edge in allocated {
        info!("{}-{}: {} Kbit/s", edge.source, edge.target, edge.bandwidth);
        min_bandwidth = min_bandwidth.min(edge.bandwidth);
    }
    if !allocated.is_empty() {
        info!("smallest allocated bandwidth: {min_bandwidth} Kbit/s");
    }
    for edge in allocated {
        info!(
            "projected transfer {}-{}: {} ms",
            edge.source,
            edge.target,
            projected_transfer_ms(file_bytes, edge.bandwidth)
        );
    }
}
