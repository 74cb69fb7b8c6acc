//! Endpoint wiring: the environment variable schema every workload process
//! reads at startup, parsed into explicit records.
//!
//! A malformed variable is a hard error with the offending name and reason;
//! nothing is allowed to propagate silently into the transfer phase.

use std::str::FromStr;

use crate::error::{Result, TestbedError};

pub const ROLE_ORIGIN: &str = "origin";
pub const ROLE_SUPERPEER: &str = "superpeer";
pub const ROLE_LEAF: &str = "leaf";
pub const ROLE_TRACKER: &str = "tracker";

/// Fixed port the origin serves the artifact on.
pub const ORIGIN_PORT: u16 = 7070;
/// Fixed port super-peers serve their leaves on.
pub const SUPERPEER_PORT: u16 = 9090;
/// Fixed port of the tracker barrier.
pub const TRACKER_PORT: u16 = 5050;

/// Workload role of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Origin,
    SuperPeer,
    Leaf,
    Tracker,
}

impl FromStr for Role {
    type Err = TestbedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ROLE_ORIGIN => Ok(Role::Origin),
            ROLE_SUPERPEER => Ok(Role::SuperPeer),
            ROLE_LEAF => Ok(Role::Leaf),
            ROLE_TRACKER => Ok(Role::Tracker),
            other => Err(TestbedError::Environment {
                name: "ROLE".to_string(),
                reason: format!("unknown role '{other}'"),
            }),
        }
    }
}

/// One outbound shaped link: `<iface>:<localIp>,<targetName>:<targetIp>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub iface: String,
    pub local_ip: String,
    pub target_peer: String,
    pub target_ip: String,
}

impl ConnectionRecord {
    pub fn parse(raw: &str) -> Result<Self> {
        let bad = |reason: &str| TestbedError::Environment {
            name: "CONNECTION".to_string(),
            reason: format!("{reason} in '{raw}'"),
        };

        let (local, remote) = raw
            .split_once(',')
            .ok_or_else(|| bad("missing ',' separator"))?;
        let (iface, local_ip) = local
            .trim()
            .split_once(':')
            .ok_or_else(|| bad("missing ':' in local half"))?;
        let (target_peer, target_ip) = remote
            .trim()
            .split_once(':')
            .ok_or_else(|| bad("missing ':' in remote half"))?;

        if iface.is_empty() || local_ip.is_empty() || target_peer.is_empty() || target_ip.is_empty()
        {
            return Err(bad("empty field"));
        }

        Ok(ConnectionRecord {
            iface: iface.to_string(),
            local_ip: local_ip.to_string(),
            target_peer: target_peer.to_string(),
            target_ip: target_ip.to_string(),
        })
    }
}

/// Tracker configuration: how many confirmations complete the barrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub expected: usize,
}

/// Origin configuration: serve the artifact over every outbound link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginConfig {
    pub total_peers: usize,
    pub targets: Vec<String>,
    pub connections: Vec<ConnectionRecord>,
}

/// Super-peer configuration: receive from the feeder, then relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperPeerConfig {
    pub name: String,
    pub total_peers: usize,
    pub feeder: String,
    pub feeder_ip: String,
    pub targets: Vec<String>,
    pub connections: Vec<ConnectionRecord>,
}

/// Leaf configuration: receive from the feeder and confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafConfig {
    pub name: String,
    pub total_peers: usize,
    pub feeder: String,
    pub feeder_ip: String,
}

/// Role plus its configuration, as one tagged variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoleConfig {
    Tracker(TrackerConfig),
    Origin(OriginConfig),
    SuperPeer(SuperPeerConfig),
    Leaf(LeafConfig),
}

/// Reads the role configuration from the process environment.
pub fn role_config_from_env() -> Result<RoleConfig> {
    role_config_from(&|name| std::env::var(name).ok())
}

/// Reads the role configuration through a lookup closure (testable without
/// touching the process environment).
pub fn role_config_from(lookup: &dyn Fn(&str) -> Option<String>) -> Result<RoleConfig> {
    let require = |name: &str| -> Result<String> {
        lookup(name).ok_or_else(|| TestbedError::Environment {
            name: name.to_string(),
            reason: "not set".to_string(),
        })
    };

    let role: Role = require("ROLE")?.parse()?;
    let total_peers: usize = require("TOTAL_PEERS")?
        .parse()
        .map_err(|e| TestbedError::Environment {
            name: "TOTAL_PEERS".to_string(),
            reason: format!("not an integer: {e}"),
        })?;

    let parse_targets = |raw: String| -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    };

    let collect_connections = || -> Result<Vec<ConnectionRecord>> {
        let mut connections = Vec::new();
        for i in 1.. {
            match lookup(&format!("CONNECTION_{i}")) {
                Some(raw) => connections.push(ConnectionRecord::parse(&raw)?),
                None => break,
            }
        }
        Ok(connections)
    };

    match role {
        Role::Tracker => Ok(RoleConfig::Tracker(TrackerConfig {
            expected: total_peers,
        })),
        Role::Origin => Ok(RoleConfig::Origin(OriginConfig {
            total_peers,
            targets: parse_targets(require("TARGET_PEERS")?),
            connections: collect_connections()?,
        })),
        Role::SuperPeer => Ok(RoleConfig::SuperPeer(SuperPeerConfig {
            name: require("SOURCE_PEER")?,
            total_peers,
            feeder: require("SUPER_PEER")?,
            feeder_ip: require("SUPER_PEER_IP")?,
            targets: parse_targets(require("TARGET_PEERS")?),
            connections: collect_connections()?,
        })),
        Role::Leaf => Ok(RoleConfig::Leaf(LeafConfig {
            name: require("SOURCE_PEER")?,
            total_peers,
            feeder: require("SUPER_PEER")?,
            feeder_ip: require("SUPER_PEER_IP")?,
        })),
    }
}
