//! Declarative topology document schema.
//!
//! Mirrors the containerlab file layout: top-level `name`/`prefix`/`mgmt`,
//! then `topology.nodes.<id>` and `topology.links`. Serialized with
//! `serde_yaml` and handed to the runtime collaborator unchanged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyDoc {
    pub name: String,
    pub prefix: String,
    pub mgmt: MgmtSection,
    pub topology: TopologyBody,
}

impl TopologyDoc {
    /// Container name the runtime derives for an endpoint id.
    pub fn container_name(&self, endpoint: &str) -> String {
        format!("{}-{}-{}", self.prefix, self.name, endpoint)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MgmtSection {
    pub network: String,
    #[serde(rename = "ipv4-subnet")]
    pub ipv4_subnet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyBody {
    pub nodes: BTreeMap<String, NodeSpec>,
    pub links: Vec<LinkSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    pub kind: String,
    pub image: String,
    #[serde(rename = "mgmt-ipv4", skip_serializing_if = "Option::is_none")]
    pub mgmt_ipv4: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub binds: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub exec: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    pub endpoints: [String; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_shape_matches_the_runtime_contract() {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "tracker".to_string(),
            NodeSpec {
                kind: "linux".to_string(),
                image: "peerbed-testbed".to_string(),
                mgmt_ipv4: Some("172.100.100.11".to_string()),
                ports: vec!["5050:5050".to_string()],
                ..NodeSpec::default()
            },
        );
        let doc = TopologyDoc {
            name: "testbed".to_string(),
            prefix: "p2p".to_string(),
            mgmt: MgmtSection {
                network: "fixedips".to_string(),
                ipv4_subnet: "172.100.100.0/24".to_string(),
            },
            topology: TopologyBody {
                nodes,
                links: vec![LinkSpec {
                    endpoints: ["origin:eth1".to_string(), "1:eth1".to_string()],
                }],
            },
        };

        let yaml = serde_yaml::to_string(&doc).unwrap();
        assert!(yaml.contains("name: testbed"));
        assert!(yaml.contains("mgmt-ipv4: 172.100.100.11"));
        assert!(yaml.contains("ipv4-subnet: 172.100.100.0/24"));
        assert!(yaml.contains("origin:eth1"));
        // Empty sections stay out of the document entirely.
        assert!(!yaml.contains("binds"));
        assert!(!yaml.contains("cmd"));
    }

    #[test]
    fn container_names_use_the_runtime_prefix() {
        let doc = TopologyDoc {
            name: "testbed".to_string(),
            prefix: "p2p".to_string(),
            mgmt: MgmtSection {
                network: "fixedips".to_string(),
                ipv4_subnet: "172.100.100.0/24".to_string(),
            },
            topology: TopologyBody {
                nodes: BTreeMap::new(),
                links: Vec::new(),
            },
        };
        assert_eq!(doc.container_name("7"), "p2p-testbed-7");
    }
}
