//! Two-pass fair-share bandwidth allocation.
//!
//! Each source splits its upload ceiling across its overlay targets. Targets
//! that cannot absorb an equal share are clamped to their download ceiling
//! first; the freed budget is then redistributed evenly over the remaining
//! targets. The result is the bandwidth actually shaped onto each link.

use std::collections::HashMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::overlay::Overlay;
use super::types::Peer;
use crate::error::{Result, TestbedError};

/// An overlay edge with its applied shaping values.
///
/// Serialized as the `connection-details` artifact consumed by the shaping
/// script and the validator: integer Kbit/s, latency with two fractional
/// digits and loss with four, both as strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatedEdge {
    #[serde(rename = "sourceName")]
    pub source: String,
    #[serde(rename = "targetName")]
    pub target: String,
    /// Allocated bandwidth in Kbit/s, never above the catalog capacity.
    pub bandwidth: u32,
    pub latency: String,
    pub loss: String,
}

impl AllocatedEdge {
    pub fn latency_ms(&self) -> f64 {
        self.latency.parse().unwrap_or(0.0)
    }

    pub fn loss_fraction(&self) -> f64 {
        self.loss.parse().unwrap_or(0.0)
    }
}

/// Splits one source's upload budget across its targets.
///
/// Pass 1 clamps targets whose download ceiling is below the equal share;
/// pass 2 deals the remaining budget out evenly, still capped per target.
/// Targets keep the order the overlay emitted them in.
fn allocate_for_source(
    source: &Peer,
    targets: &[&Peer],
) -> Result<Vec<(String, u32)>> {
    if source.max_upload == 0 {
        return Err(TestbedError::NoUplinkBudget(source.name.clone()));
    }
    let share = source.max_upload / targets.len() as u32;

    let mut allocations: Vec<(String, Option<u32>)> =
        targets.iter().map(|t| (t.name.clone(), None)).collect();
    let mut remaining_budget = source.max_upload;
    let mut remaining_targets = targets.len() as u32;

    for (i, target) in targets.iter().enumerate() {
        if target.max_download < share {
            allocations[i].1 = Some(target.max_download);
            remaining_budget -= target.max_download;
            remaining_targets -= 1;
        }
    }

    let redistributed = if remaining_targets > 0 {
        remaining_budget / remaining_targets
    } else {
        0
    };
    for (i, target) in targets.iter().enumerate() {
        if allocations[i].1.is_none() {
            allocations[i].1 = Some(redistributed.min(target.max_download));
        }
    }

    let total: u64 = allocations.iter().map(|(_, a)| a.unwrap_or(0) as u64).sum();
    if total > source.max_upload as u64 {
        return Err(TestbedError::OverAllocation {
            peer: source.name.clone(),
            allocated: total,
            ceiling: source.max_upload as u64,
        });
    }

    Ok(allocations
        .into_iter()
        .map(|(name, alloc)| (name, alloc.unwrap_or(0)))
        .collect())
}

/// Allocates shaped bandwidth for every overlay edge.
///
/// Latency and loss carry over from the catalog derivation of the endpoint
/// profiles; they are formatted here once, in the exact shape the artifact
/// contract requires.
pub fn allocate_bandwidth(peers: &[Peer], overlay: &Overlay) -> Result<Vec<AllocatedEdge>> {
    let by_name: HashMap<&str, &Peer> = peers.iter().map(|p| (p.name.as_str(), p)).collect();
    let mut allocated = Vec::with_capacity(overlay.edges.len());

    for source_name in overlay.sources() {
        let source = by_name
            .get(source_name)
            .ok_or_else(|| TestbedError::OverlayInvalid(format!("unknown source '{source_name}'")))?;
        let target_names = overlay.targets_of(source_name);
        let targets: Vec<&Peer> = target_names
            .iter()
            .map(|name| {
                by_name
                    .get(name)
                    .copied()
                    .ok_or_else(|| TestbedError::OverlayInvalid(format!("unknown target '{name}'")))
            })
            .collect::<Result<_>>()?;

        debug!(
            "{} has {} target peers and an upload capacity of {} Kbit/s",
            source.name,
            targets.len(),
            source.max_upload
        );

        for (target_name, bandwidth) in allocate_for_source(source, &targets)? {
            let target = by_name[target_name.as_str()];
            allocated.push(AllocatedEdge {
                source: source.name.clone(),
                target: target_name,
                bandwidth,
                latency: format!("{:.2}", source.latency + target.latency),
                loss: format!("{:.4}", source.loss.max(target.loss)),
            });
        }
    }

    let min_bandwidth = allocated.iter().map(|e| e.bandwidth).min().unwrap_or(0);
    info!(
        "allocated {} overlay edges, smallest link {} Kbit/s",
        allocated.len(),
        min_bandwidth
    );
    Ok(allocated)
}

/// Projected transfer time in milliseconds for a file of `file_bytes` over a
/// link allocated `bandwidth_kbit`.
pub fn projected_transfer_ms(file_bytes: u64, bandwidth_kbit: u32) -> u64 {
    if bandwidth_kbit == 0 {
        return u64::MAX;
    }
    let kbytes = file_bytes as f64 / 1000.0;
    let kbytes_per_second = bandwidth_kbit as f64 / 8.0;
    (kbytes / kbytes_per_second * 1000.0) as u64
}
