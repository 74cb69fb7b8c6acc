//! Address and interface assignment for the fabric.
//!
//! Management addresses live in one fixed /24; every overlay link gets its
//! own /24 carved out by a monotonic counter, with the source end at `.2`
//! and the target end at `.3`.

use std::collections::HashMap;

use crate::topology::ORIGIN;

/// Management network for coordinator access to every endpoint.
pub const MGMT_SUBNET: &str = "172.100.100.0/24";
pub const TRACKER_MGMT_IP: &str = "172.100.100.11";
pub const ORIGIN_MGMT_IP: &str = "172.100.100.12";

/// First third octet used for per-link /24 subnets.
const LINK_SUBNET_BASE: u32 = 21;

/// Management IP for a named endpoint. Numeric peers start at `.13`.
pub fn mgmt_ip_for(name: &str) -> String {
    if name == ORIGIN {
        return ORIGIN_MGMT_IP.to_string();
    }
    let index: u32 = name.parse().unwrap_or(0);
    format!("172.100.100.{}", 12 + index)
}

/// Source/target addresses of one shaped link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkAddresses {
    pub source_ip: String,
    pub target_ip: String,
}

/// Carves a fresh /24 per link.
#[derive(Debug, Default)]
pub struct LinkSubnetAllocator {
    counter: u32,
}

impl LinkSubnetAllocator {
    pub fn new() -> Self {
        LinkSubnetAllocator { counter: 0 }
    }

    pub fn next(&mut self) -> LinkAddresses {
        let octet = LINK_SUBNET_BASE + self.counter;
        self.counter += 1;
        LinkAddresses {
            source_ip: format!("172.20.{octet}.2"),
            target_ip: format!("172.20.{octet}.3"),
        }
    }
}

/// Hands out `eth1`, `eth2`, ... per endpoint.
#[derive(Debug, Default)]
pub struct InterfaceAllocator {
    counters: HashMap<String, u32>,
}

impl InterfaceAllocator {
    pub fn new() -> Self {
        InterfaceAllocator::default()
    }

    pub fn assign(&mut self, endpoint: &str) -> String {
        let counter = self.counters.entry(endpoint.to_string()).or_insert(1);
        let iface = format!("eth{counter}");
        *counter += 1;
        iface
    }
}
