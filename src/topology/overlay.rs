//! Dissemination overlay selection.
//!
//! The overlay is the subset of catalog edges actually used to move the
//! artifact: either a star rooted at the origin, or a two-tier tree where
//! the origin feeds a set of super-peers which in turn feed the remaining
//! leaves. The two-tier mapping comes from a partitioner collaborator; the
//! planner only validates it against the overlay invariants and rejects
//! anything that breaks them.

use std::collections::{BTreeMap, HashMap, HashSet};

use log::info;
use serde::{Deserialize, Serialize};

use super::types::{peer_order_key, Peer, ORIGIN};
use crate::error::{Result, TestbedError};

/// One directed dissemination hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEdge {
    #[serde(rename = "sourceName")]
    pub source: String,
    #[serde(rename = "targetName")]
    pub target: String,
}

/// Selected dissemination overlay.
///
/// `edges` preserves emission order; the allocator uses that order as its
/// tie-break when splitting a source's upload budget.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub superpeers: Vec<String>,
    pub edges: Vec<OverlayEdge>,
}

/// Mapping handed back by a partitioner: which peers act as super-peers and
/// which leaves each one serves.
#[derive(Debug, Clone)]
pub struct SuperPeerAssignment {
    pub superpeers: Vec<String>,
    pub leaves: BTreeMap<String, Vec<String>>,
}

/// Collaborator contract for producing the two-tier mapping.
pub trait OverlayPartitioner {
    fn partition(&self, peers: &[Peer]) -> Result<SuperPeerAssignment>;
}

impl Overlay {
    /// Star overlay: one edge from the origin to every other peer, in stable
    /// peer order.
    pub fn star(peers: &[Peer]) -> Overlay {
        let mut targets: Vec<&Peer> = peers.iter().filter(|p| !p.is_origin()).collect();
        targets.sort_by_key(|p| peer_order_key(&p.name));
        let edges = targets
            .iter()
            .map(|p| OverlayEdge {
                source: ORIGIN.to_string(),
                target: p.name.clone(),
            })
            .collect();
        Overlay {
            superpeers: Vec::new(),
            edges,
        }
    }

    /// Two-tier overlay from a partitioner assignment: origin feeds every
    /// super-peer, each super-peer feeds its leaves.
    pub fn two_tier(assignment: &SuperPeerAssignment) -> Overlay {
        let mut edges = Vec::new();
        for sp in &assignment.superpeers {
            edges.push(OverlayEdge {
                source: ORIGIN.to_string(),
                target: sp.clone(),
            });
        }
        for sp in &assignment.superpeers {
            if let Some(leaves) = assignment.leaves.get(sp) {
                for leaf in leaves {
                    edges.push(OverlayEdge {
                        source: sp.clone(),
                        target: leaf.clone(),
                    });
                }
            }
        }
        Overlay {
            superpeers: assignment.superpeers.clone(),
            edges,
        }
    }

    /// Ordered targets of one source, preserving emission order.
    pub fn targets_of(&self, source: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.source == source)
            .map(|e| e.target.as_str())
            .collect()
    }

    /// Distinct sources in first-emission order.
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|e| seen.insert(e.source.as_str()))
            .map(|e| e.source.as_str())
            .collect()
    }

    /// The source feeding one peer, if any.
    pub fn feeder_of(&self, target: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.target == target)
            .map(|e| e.source.as_str())
    }

    /// Checks the overlay invariants against the peer set:
    /// every non-origin peer is fed by exactly one edge, every edge source is
    /// the origin or a super-peer that is itself fed by the origin, the
    /// origin is never fed, and every super-peer serves at least one leaf.
    pub fn validate(&self, peers: &[Peer]) -> Result<()> {
        let known: HashSet<&str> = peers.iter().map(|p| p.name.as_str()).collect();
        let origin_targets: HashSet<&str> = self
            .edges
            .iter()
            .filter(|e| e.source == ORIGIN)
            .map(|e| e.target.as_str())
            .collect();

        let mut fed: HashMap<&str, usize> = HashMap::new();
        for edge in &self.edges {
            if edge.target == ORIGIN {
                return Err(TestbedError::OverlayInvalid(
                    "origin must not be a dissemination target".to_string(),
                ));
            }
            if !known.contains(edge.source.as_str()) || !known.contains(edge.target.as_str()) {
                return Err(TestbedError::OverlayInvalid(format!(
                    "edge {} -> {} references an unknown peer",
                    edge.source, edge.target
                )));
            }
            if edge.source != ORIGIN {
                if !self.superpeers.iter().any(|sp| *sp == edge.source) {
                    return Err(TestbedError::OverlayInvalid(format!(
                        "edge source '{}' is neither origin nor a super-peer",
                        edge.source
                    )));
                }
                if !origin_targets.contains(edge.source.as_str()) {
                    return Err(TestbedError::OverlayInvalid(format!(
                        "super-peer '{}' is not fed by the origin",
                        edge.source
                    )));
                }
            }
            *fed.entry(edge.target.as_str()).or_insert(0) += 1;
        }

        for peer in peers.iter().filter(|p| !p.is_origin()) {
            match fed.get(peer.name.as_str()) {
                Some(1) => {}
                Some(n) => {
                    return Err(TestbedError::OverlayInvalid(format!(
                        "peer '{}' is fed by {} overlay paths",
                        peer.name, n
                    )))
                }
                None => {
                    return Err(TestbedError::OverlayInvalid(format!(
                        "peer '{}' is unreachable from the origin",
                        peer.name
                    )))
                }
            }
        }

        for sp in &self.superpeers {
            if !self.edges.iter().any(|e| e.source == *sp) {
                return Err(TestbedError::OverlayInvalid(format!(
                    "super-peer '{}' serves no leaves",
                    sp
                )));
            }
        }

        Ok(())
    }
}

/// Default partitioner: promotes the peers with the largest upload ceilings
/// to super-peers and deals the remaining leaves out round-robin.
pub struct CapacityPartitioner {
    pub superpeer_count: usize,
}

impl OverlayPartitioner for CapacityPartitioner {
    fn partition(&self, peers: &[Peer]) -> Result<SuperPeerAssignment> {
        let mut candidates: Vec<&Peer> = peers.iter().filter(|p| !p.is_origin()).collect();
        if self.superpeer_count == 0 || candidates.len() <= self.superpeer_count {
            return Err(TestbedError::Config(format!(
                "cannot promote {} super-peers out of {} peers",
                self.superpeer_count,
                candidates.len()
            )));
        }

        // Highest upload first; peer order as tie-break keeps it deterministic.
        candidates.sort_by(|a, b| {
            b.max_upload
                .cmp(&a.max_upload)
                .then(peer_order_key(&a.name).cmp(&peer_order_key(&b.name)))
        });
        let mut superpeers: Vec<String> = candidates
            .iter()
            .take(self.superpeer_count)
            .map(|p| p.name.clone())
            .collect();
        superpeers.sort_by_key(|n| peer_order_key(n));

        let mut remaining: Vec<&Peer> = candidates
            .iter()
            .skip(self.superpeer_count)
            .copied()
            .collect();
        remaining.sort_by_key(|p| peer_order_key(&p.name));

        let mut leaves: BTreeMap<String, Vec<String>> = superpeers
            .iter()
            .map(|sp| (sp.clone(), Vec::new()))
            .collect();
        for (i, leaf) in remaining.iter().enumerate() {
            let sp = &superpeers[i % superpeers.len()];
            leaves.get_mut(sp).expect("super-peer key").push(leaf.name.clone());
        }

        info!(
            "partitioned {} peers into {} super-peers and {} leaves",
            candidates.len(),
            superpeers.len(),
            remaining.len()
        );
        Ok(SuperPeerAssignment { superpeers, leaves })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(name: &str, up: u32) -> Peer {
        Peer {
            name: name.to_string(),
            max_upload: up,
            max_download: up * 10,
            latency: 20.0,
            loss: 0.001,
        }
    }

    fn peer_set(n: usize) -> Vec<Peer> {
        let mut peers = vec![peer(ORIGIN, 25000)];
        for i in 1..=n {
            peers.push(peer(&i.to_string(), 1000 + i as u32 * 100));
        }
        peers
    }

    #[test]
    fn star_overlay_covers_every_peer_once() {
        let peers = peer_set(5);
        let overlay = Overlay::star(&peers);
        assert_eq!(overlay.edges.len(), 5);
        assert!(overlay.validate(&peers).is_ok());
        assert_eq!(overlay.targets_of(ORIGIN), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn two_tier_overlay_validates() {
        let peers = peer_set(7);
        let assignment = CapacityPartitioner { superpeer_count: 2 }
            .partition(&peers)
            .unwrap();
        let overlay = Overlay::two_tier(&assignment);
        assert!(overlay.validate(&peers).is_ok());
        assert_eq!(overlay.superpeers.len(), 2);

        // Origin feeds exactly the super-peers.
        let origin_targets = overlay.targets_of(ORIGIN);
        assert_eq!(origin_targets.len(), 2);
        for sp in &overlay.superpeers {
            assert!(origin_targets.contains(&sp.as_str()));
        }
    }

    #[test]
    fn duplicate_coverage_is_rejected() {
        let peers = peer_set(2);
        let overlay = Overlay {
            superpeers: Vec::new(),
            edges: vec![
                OverlayEdge { source: ORIGIN.into(), target: "1".into() },
                OverlayEdge { source: ORIGIN.into(), target: "1".into() },
                OverlayEdge { source: ORIGIN.into(), target: "2".into() },
            ],
        };
        assert!(matches!(
            overlay.validate(&peers),
            Err(TestbedError::OverlayInvalid(_))
        ));
    }

    #[test]
    fn unreachable_peer_is_rejected() {
        let peers = peer_set(3);
        let overlay = Overlay {
            superpeers: Vec::new(),
            edges: vec![
                OverlayEdge { source: ORIGIN.into(), target: "1".into() },
                OverlayEdge { source: ORIGIN.into(), target: "2".into() },
            ],
        };
        assert!(matches!(
            overlay.validate(&peers),
            Err(TestbedError::OverlayInvalid(_))
        ));
    }

    #[test]
    fn unfed_superpeer_source_is_rejected() {
        let peers = peer_set(3);
        // "2" relays to "3" but nothing feeds "2" from the origin.
        let overlay = Overlay {
            superpeers: vec!["2".to_string()],
            edges: vec![
                OverlayEdge { source: ORIGIN.into(), target: "1".into() },
                OverlayEdge { source: "2".into(), target: "3".into() },
            ],
        };
        assert!(matches!(
            overlay.validate(&peers),
            Err(TestbedError::OverlayInvalid(_))
        ));
    }

    #[test]
    fn partitioner_prefers_high_upload_peers() {
        let mut peers = vec![peer(ORIGIN, 25000)];
        peers.push(peer("1", 100));
        peers.push(peer("2", 9000));
        peers.push(peer("3", 200));
        peers.push(peer("4", 8000));
        peers.push(peer("5", 300));

        let assignment = CapacityPartitioner { superpeer_count: 2 }
            .partition(&peers)
            .unwrap();
        assert_eq!(assignment.superpeers, vec!["2".to_string(), "4".to_string()]);
        let total_leaves: usize = assignment.leaves.values().map(Vec::len).sum();
        assert_eq!(total_leaves, 3);
    }
}
