//! Translates a dissemination plan into the topology document.
//!
//! One node per endpoint plus the tracker; one veth link per overlay edge
//! with a dedicated /24. Each endpoint gets the environment the workload
//! reads at startup and the exec steps that apply shaping before the
//! workload's first connection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::info;

use super::ip::{mgmt_ip_for, InterfaceAllocator, LinkSubnetAllocator, MGMT_SUBNET, ORIGIN_MGMT_IP, TRACKER_MGMT_IP};
use super::types::{LinkSpec, MgmtSection, NodeSpec, TopologyBody, TopologyDoc};
use crate::error::Result;
use crate::topology::{Overlay, Peer, ORIGIN};
use crate::transfer::wiring::{ROLE_LEAF, ROLE_ORIGIN, ROLE_SUPERPEER, ROLE_TRACKER};

pub const TOPOLOGY_NAME: &str = "testbed";
pub const TOPOLOGY_PREFIX: &str = "p2p";
pub const TRACKER_NODE: &str = "tracker";

/// In-container locations of the mounted inputs.
pub const ARTIFACT_MOUNT: &str = "/app/mydocument.pdf";
pub const SHAPING_SCRIPT_MOUNT: &str = "/app/apply-shaping.sh";

/// Everything the builder needs beyond the plan itself.
#[derive(Debug, Clone)]
pub struct FabricSettings {
    pub image: String,
    /// Path of the workload binary inside the image.
    pub endpoint_binary: String,
    /// Host path of the source artifact, mounted read-only into the origin.
    pub artifact_path: PathBuf,
    /// Host path of the allocated-edge artifact, mounted into every endpoint.
    pub connection_details_path: PathBuf,
    /// Host path of the shaping script, mounted into every endpoint.
    pub shaping_script_path: PathBuf,
}

impl FabricSettings {
    fn details_mount(&self) -> String {
        let file_name = self
            .connection_details_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "connection-details.json".to_string());
        format!("/app/{file_name}")
    }
}

/// Per-endpoint wiring accumulated while walking the overlay edges.
#[derive(Default)]
struct EndpointWiring {
    /// `CONNECTION_<i>` payloads for outbound edges, in overlay order.
    connections: Vec<String>,
    /// Local address on the inbound link (`.3` end).
    inbound_ip: Option<String>,
    /// Feeder name and its `.2` address on the inbound link.
    feeder: Option<(String, String)>,
}

/// Builds the complete topology document for a plan.
pub fn build_topology(
    peers: &[Peer],
    overlay: &Overlay,
    settings: &FabricSettings,
) -> Result<TopologyDoc> {
    let mut interfaces = InterfaceAllocator::new();
    let mut subnets = LinkSubnetAllocator::new();
    let mut wiring: BTreeMap<String, EndpointWiring> = BTreeMap::new();
    let mut links = Vec::with_capacity(overlay.edges.len());

    for edge in &overlay.edges {
        let source_iface = interfaces.assign(&edge.source);
        let target_iface = interfaces.assign(&edge.target);
        let addresses = subnets.next();

        links.push(LinkSpec {
            endpoints: [
                format!("{}:{}", edge.source, source_iface),
                format!("{}:{}", edge.target, target_iface),
            ],
        });

        let source_wiring = wiring.entry(edge.source.clone()).or_default();
        source_wiring.connections.push(format!(
            "{}:{},{}:{}",
            source_iface, addresses.source_ip, edge.target, addresses.target_ip
        ));

        let target_wiring = wiring.entry(edge.target.clone()).or_default();
        target_wiring.inbound_ip = Some(addresses.target_ip.clone());
        target_wiring.feeder = Some((edge.source.clone(), addresses.source_ip.clone()));
    }

    let total_peers = peers.len();
    let mut nodes = BTreeMap::new();
    nodes.insert(TRACKER_NODE.to_string(), tracker_node(total_peers, settings));

    for peer in peers {
        let endpoint_wiring = wiring.remove(&peer.name).unwrap_or_default();
        let node = if peer.is_origin() {
            origin_node(overlay, &endpoint_wiring, total_peers, settings)
        } else {
            peer_node(peer, overlay, &endpoint_wiring, total_peers, settings)
        };
        nodes.insert(peer.name.clone(), node);
    }

    info!(
        "fabric: {} nodes, {} shaped links",
        nodes.len(),
        links.len()
    );

    Ok(TopologyDoc {
        name: TOPOLOGY_NAME.to_string(),
        prefix: TOPOLOGY_PREFIX.to_string(),
        mgmt: MgmtSection {
            network: "fixedips".to_string(),
            ipv4_subnet: MGMT_SUBNET.to_string(),
        },
        topology: TopologyBody { nodes, links },
    })
}

fn common_env(role: &str, total_peers: usize) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("ROLE".to_string(), role.to_string());
    env.insert("TOTAL_PEERS".to_string(), total_peers.to_string());
    env
}

fn connection_env(env: &mut BTreeMap<String, String>, wiring: &EndpointWiring) {
    for (i, record) in wiring.connections.iter().enumerate() {
        env.insert(format!("CONNECTION_{}", i + 1), record.clone());
    }
}

fn endpoint_cmd(settings: &FabricSettings) -> Option<String> {
    Some(format!("{} endpoint", settings.endpoint_binary))
}

fn shaping_binds(settings: &FabricSettings) -> Vec<String> {
    vec![
        format!(
            "{}:{}:ro",
            settings.connection_details_path.display(),
            settings.details_mount()
        ),
        format!(
            "{}:{}:ro",
            settings.shaping_script_path.display(),
            SHAPING_SCRIPT_MOUNT
        ),
    ]
}

/// Exec steps shared by all shaped endpoints: settle, (optionally) wait for
/// the origin's management address to answer, then apply shaping.
fn shaping_exec(wait_for_origin: bool) -> Vec<String> {
    let mut exec = vec!["sleep 5".to_string()];
    if wait_for_origin {
        exec.push(format!(
            "/bin/sh -c 'while ! ping -c 1 {ORIGIN_MGMT_IP} > /dev/null; do sleep 1; done'"
        ));
    }
    exec.push(format!("chmod +x {SHAPING_SCRIPT_MOUNT}"));
    exec.push(SHAPING_SCRIPT_MOUNT.to_string());
    exec
}

fn tracker_node(total_peers: usize, settings: &FabricSettings) -> NodeSpec {
    let mut labels = BTreeMap::new();
    labels.insert("role".to_string(), "tracker".to_string());
    labels.insert("group".to_string(), "tracker".to_string());
    NodeSpec {
        kind: "linux".to_string(),
        image: settings.image.clone(),
        mgmt_ipv4: Some(TRACKER_MGMT_IP.to_string()),
        env: common_env(ROLE_TRACKER, total_peers),
        labels,
        binds: Vec::new(),
        exec: vec!["sleep 5".to_string()],
        cmd: endpoint_cmd(settings),
        ports: vec!["5050:5050".to_string()],
    }
}

fn origin_node(
    overlay: &Overlay,
    wiring: &EndpointWiring,
    total_peers: usize,
    settings: &FabricSettings,
) -> NodeSpec {
    let mut env = common_env(ROLE_ORIGIN, total_peers);
    env.insert("SOURCE_PEER".to_string(), ORIGIN.to_string());
    env.insert(
        "TARGET_PEERS".to_string(),
        overlay.targets_of(ORIGIN).join(","),
    );
    connection_env(&mut env, wiring);

    let mut labels = BTreeMap::new();
    labels.insert("role".to_string(), "sender".to_string());
    labels.insert("group".to_string(), "server".to_string());

    let mut binds = vec![format!(
        "{}:{}:ro",
        settings.artifact_path.display(),
        ARTIFACT_MOUNT
    )];
    binds.extend(shaping_binds(settings));

    NodeSpec {
        kind: "linux".to_string(),
        image: settings.image.clone(),
        mgmt_ipv4: Some(ORIGIN_MGMT_IP.to_string()),
        env,
        labels,
        binds,
        exec: shaping_exec(false),
        cmd: endpoint_cmd(settings),
        ports: vec!["7070:7070".to_string()],
    }
}

fn peer_node(
    peer: &Peer,
    overlay: &Overlay,
    wiring: &EndpointWiring,
    total_peers: usize,
    settings: &FabricSettings,
) -> NodeSpec {
    let is_superpeer = overlay.superpeers.iter().any(|sp| *sp == peer.name);
    let role = if is_superpeer { ROLE_SUPERPEER } else { ROLE_LEAF };

    let mut env = common_env(role, total_peers);
    env.insert("SOURCE_PEER".to_string(), peer.name.clone());
    if let Some((feeder, feeder_ip)) = &wiring.feeder {
        env.insert("SUPER_PEER".to_string(), feeder.clone());
        env.insert("SUPER_PEER_IP".to_string(), feeder_ip.clone());
    }
    if let Some(inbound_ip) = &wiring.inbound_ip {
        env.insert("IP_ADDRESS".to_string(), inbound_ip.clone());
    }
    if is_superpeer {
        env.insert(
            "TARGET_PEERS".to_string(),
            overlay.targets_of(&peer.name).join(","),
        );
        connection_env(&mut env, wiring);
    }

    let mut labels = BTreeMap::new();
    labels.insert(
        "role".to_string(),
        if is_superpeer { "receiver/sender" } else { "receiver" }.to_string(),
    );
    labels.insert(
        "group".to_string(),
        if is_superpeer { "superpeer" } else { "peer" }.to_string(),
    );

    NodeSpec {
        kind: "linux".to_string(),
        image: settings.image.clone(),
        mgmt_ipv4: Some(mgmt_ip_for(&peer.name)),
        env,
        labels,
        binds: shaping_binds(settings),
        exec: shaping_exec(true),
        cmd: endpoint_cmd(settings),
        ports: Vec::new(),
    }
}

/// Writes the document to `<output_dir>/testbed-topology.yml`.
pub fn write_topology(doc: &TopologyDoc, output_dir: &Path) -> Result<PathBuf> {
    let path = output_dir.join("testbed-topology.yml");
    std::fs::write(&path, serde_yaml::to_string(doc)?)?;
    info!("wrote topology document to {}", path.display());
    Ok(path)
}
