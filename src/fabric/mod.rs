//! Fabric description: translating a plan into the declarative topology
//! document consumed by the container runtime.

pub mod builder;
pub mod ip;
pub mod types;

pub use builder::{build_topology, FabricSettings};
pub use ip::{mgmt_ip_for, InterfaceAllocator, LinkSubnetAllocator, MGMT_SUBNET, ORIGIN_MGMT_IP, TRACKER_MGMT_IP};
pub use types::{LinkSpec, NodeSpec, TopologyDoc};
