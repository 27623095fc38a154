//! Topology model of an active scenario.
//!
//! Only what the engine consumes is modeled: node names, types, geo data,
//! connectivity, radio priorities and network characteristics.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::automation::NetworkModel;
use crate::error::{Result, ValidationError};
use crate::geo::{LineString, Point};
use crate::store::{ComputeData, PoaData, UeData};
use crate::types::{
    parse_priority_list, AssetId, AssetKind, ComputeSubtype, NetChar, PathMode, PoaSubtype,
};

/// Type of a scenario node carrying geo data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Ue,
    Poa(PoaSubtype),
    Compute(ComputeSubtype),
}

impl NodeType {
    pub fn kind(self) -> AssetKind {
        match self {
            NodeType::Ue => AssetKind::Terminal,
            NodeType::Poa(_) => AssetKind::PointOfAttachment,
            NodeType::Compute(_) => AssetKind::Compute,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Ue => "UE",
            NodeType::Poa(s) => s.as_str(),
            NodeType::Compute(s) => s.as_str(),
        }
    }
}

impl FromStr for NodeType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "UE" => Ok(NodeType::Ue),
            "POA" => Ok(NodeType::Poa(PoaSubtype::Generic)),
            "POA-4G" => Ok(NodeType::Poa(PoaSubtype::Cell4g)),
            "POA-5G" => Ok(NodeType::Poa(PoaSubtype::Cell5g)),
            "POA-WIFI" => Ok(NodeType::Poa(PoaSubtype::Wifi)),
            "EDGE" => Ok(NodeType::Compute(ComputeSubtype::Edge)),
            "FOG" => Ok(NodeType::Compute(ComputeSubtype::Fog)),
            "DC" => Ok(NodeType::Compute(ComputeSubtype::Cloud)),
            other => Err(ValidationError::UnsupportedAssetType(other.to_string())),
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NodeType {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeType {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Geographic data of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<LineString>,
    /// End-of-path mode, `LOOP` or `REVERSE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eop_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

impl GeoData {
    /// Parsed end-of-path mode.
    pub fn path_mode(&self) -> Result<Option<PathMode>> {
        match self.eop_mode.as_deref() {
            None | Some("") => Ok(None),
            Some(raw) => Ok(Some(raw.parse()?)),
        }
    }
}

fn default_connected() -> bool {
    true
}

/// One node of the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_data: Option<GeoData>,
    #[serde(default = "default_connected")]
    pub connected: bool,
    /// Comma-separated radio technology priority of a terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wireless_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_char: Option<NetChar>,
}

impl Node {
    pub fn asset_id(&self) -> AssetId {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map_or_else(AssetId::generate, AssetId::from)
    }

    /// Terminal fields from this node's geo data.
    ///
    /// `None` when the node carries no geo data.
    pub fn ue_data(&self) -> Result<Option<UeData>> {
        let Some(ref geo) = self.geo_data else {
            return Ok(None);
        };
        Ok(Some(UeData {
            position: geo.location,
            path: geo.path.clone(),
            clear_path: false,
            mode: geo.path_mode()?,
            velocity: geo.velocity,
            priority: Some(parse_priority_list(
                self.wireless_type.as_deref().unwrap_or_default(),
            )),
            connected: Some(self.connected),
        }))
    }

    /// POA fields from this node's geo data.
    pub fn poa_data(&self, subtype: PoaSubtype) -> Option<PoaData> {
        self.geo_data.as_ref().map(|geo| PoaData {
            subtype: Some(subtype),
            position: geo.location,
            radius: geo.radius,
        })
    }

    /// Compute fields from this node's geo data.
    pub fn compute_data(&self, subtype: ComputeSubtype) -> Option<ComputeData> {
        self.geo_data.as_ref().map(|geo| ComputeData {
            subtype: Some(subtype),
            position: geo.location,
            connected: Some(self.connected),
        })
    }
}

/// A scenario: a named set of nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Scenario {
    pub fn from_json(raw: &str) -> Result<Self> {
        let scenario: Scenario = serde_json::from_str(raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Check for duplicate or empty node names.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(ValidationError::MissingField("name").into());
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(ValidationError::MissingField("node name").into());
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ValidationError::DuplicateName(node.name.clone()).into());
            }
            if let Some(ref geo) = node.geo_data {
                geo.path_mode()?;
            }
        }
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }
}

impl NetworkModel for Scenario {
    fn terminal_connected(&self, ue: &str) -> Option<bool> {
        self.node(ue)
            .filter(|n| n.node_type == NodeType::Ue)
            .map(|n| n.connected)
    }

    fn terminal_net_char(&self, ue: &str) -> Option<NetChar> {
        self.node(ue)
            .filter(|n| n.node_type == NodeType::Ue)
            .map(|n| n.net_char.unwrap_or_default())
    }

    fn set_terminal_net_char(&mut self, ue: &str, net_char: NetChar) {
        if let Some(node) = self.node_mut(ue) {
            node.net_char = Some(net_char);
        }
    }

    fn poa_net_char(&self, poa: &str) -> Option<NetChar> {
        self.node(poa).and_then(|n| n.net_char)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"{
        "name": "monaco",
        "nodes": [
            {
                "name": "poa1",
                "type": "POA-4G",
                "geoData": {
                    "location": { "type": "Point", "coordinates": [7.418494, 43.733449] },
                    "radius": 160
                },
                "netChar": { "throughputUl": 1000, "throughputDl": 1000, "packetLoss": 0 }
            },
            {
                "name": "ue1",
                "id": "ue1-id",
                "type": "UE",
                "wirelessType": "4g, wifi",
                "geoData": {
                    "location": { "type": "Point", "coordinates": [7.418522, 43.734198] },
                    "eopMode": "REVERSE",
                    "velocity": 5
                }
            },
            { "name": "edge1", "type": "EDGE" }
        ]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let s = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(s.name, "monaco");
        assert_eq!(s.nodes.len(), 3);

        let ue = s.node("ue1").unwrap();
        assert_eq!(ue.node_type, NodeType::Ue);
        assert!(ue.connected);
        assert_eq!(ue.asset_id().as_str(), "ue1-id");

        let data = ue.ue_data().unwrap().unwrap();
        assert_eq!(data.mode, Some(PathMode::Reverse));
        assert_eq!(data.priority.unwrap(), vec!["4g", "wifi"]);
        assert_eq!(data.velocity, Some(5.0));

        let edge = s.node("edge1").unwrap();
        assert_eq!(edge.node_type.kind(), AssetKind::Compute);
        assert!(edge.compute_data(ComputeSubtype::Edge).is_none());
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let raw = r#"{ "name": "s", "nodes": [ { "name": "x", "type": "SATELLITE" } ] }"#;
        assert!(Scenario::from_json(raw).is_err());
        assert!(matches!(
            "SATELLITE".parse::<NodeType>(),
            Err(ValidationError::UnsupportedAssetType(_))
        ));
    }

    #[test]
    fn test_bad_path_mode_rejected() {
        let raw = r#"{ "name": "s", "nodes": [
            { "name": "ue1", "type": "UE", "geoData": { "eopMode": "PINGPONG" } }
        ] }"#;
        let err = Scenario::from_json(raw).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let raw = r#"{ "name": "s", "nodes": [
            { "name": "a", "type": "UE" }, { "name": "a", "type": "POA" }
        ] }"#;
        assert!(Scenario::from_json(raw).unwrap_err().is_validation());
    }

    #[test]
    fn test_network_model() {
        let mut s = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(s.terminal_connected("ue1"), Some(true));
        assert_eq!(s.terminal_connected("poa1"), None);
        assert_eq!(s.terminal_net_char("ue1"), Some(NetChar::BASELINE));
        assert_eq!(s.poa_net_char("poa1"), Some(NetChar::new(1000, 1000, 0.0)));

        s.set_terminal_net_char("ue1", NetChar::DISCONNECTED);
        assert_eq!(s.terminal_net_char("ue1"), Some(NetChar::DISCONNECTED));
    }
}
