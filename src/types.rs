//! Core types used throughout the GIS engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Serving POA sentinel for a terminal with no radio association.
pub const DISCONNECTED: &str = "DISCONNECTED";

/// Default technology priority list for terminals that declare none.
pub const DEFAULT_PRIORITY: [&str; 4] = ["wifi", "5g", "4g", "other"];

/// Stable identifier of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random identifier for assets declared without one.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Terminal,
    PointOfAttachment,
    Compute,
}

impl AssetKind {
    /// Short tag used in cache keys.
    pub fn tag(self) -> &'static str {
        match self {
            AssetKind::Terminal => "ue",
            AssetKind::PointOfAttachment => "poa",
            AssetKind::Compute => "compute",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Radio technology of a point of attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoaSubtype {
    #[serde(rename = "POA")]
    Generic,
    #[serde(rename = "POA-4G")]
    Cell4g,
    #[serde(rename = "POA-5G")]
    Cell5g,
    #[serde(rename = "POA-WIFI")]
    Wifi,
}

impl PoaSubtype {
    /// Wire name as stored and exchanged with the topology.
    pub fn as_str(self) -> &'static str {
        match self {
            PoaSubtype::Generic => "POA",
            PoaSubtype::Cell4g => "POA-4G",
            PoaSubtype::Cell5g => "POA-5G",
            PoaSubtype::Wifi => "POA-WIFI",
        }
    }

    /// Token matched against a terminal's priority list.
    pub fn priority_token(self) -> &'static str {
        match self {
            PoaSubtype::Generic => "other",
            PoaSubtype::Cell4g => "4g",
            PoaSubtype::Cell5g => "5g",
            PoaSubtype::Wifi => "wifi",
        }
    }

    pub fn is_cellular(self) -> bool {
        matches!(self, PoaSubtype::Cell4g | PoaSubtype::Cell5g)
    }
}

impl FromStr for PoaSubtype {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "POA" => Ok(PoaSubtype::Generic),
            "POA-4G" => Ok(PoaSubtype::Cell4g),
            "POA-5G" => Ok(PoaSubtype::Cell5g),
            "POA-WIFI" => Ok(PoaSubtype::Wifi),
            other => Err(ValidationError::UnsupportedAssetType(other.to_string())),
        }
    }
}

impl fmt::Display for PoaSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device class of a compute node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeSubtype {
    #[serde(rename = "EDGE")]
    Edge,
    #[serde(rename = "FOG")]
    Fog,
    #[serde(rename = "DC")]
    Cloud,
}

impl ComputeSubtype {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputeSubtype::Edge => "EDGE",
            ComputeSubtype::Fog => "FOG",
            ComputeSubtype::Cloud => "DC",
        }
    }
}

impl FromStr for ComputeSubtype {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EDGE" => Ok(ComputeSubtype::Edge),
            "FOG" => Ok(ComputeSubtype::Fog),
            "DC" => Ok(ComputeSubtype::Cloud),
            other => Err(ValidationError::UnsupportedAssetType(other.to_string())),
        }
    }
}

impl fmt::Display for ComputeSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// End-of-path traversal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PathMode {
    /// Wrap to the start of the path.
    #[default]
    Loop,
    /// Bounce back along the path.
    Reverse,
}

impl PathMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PathMode::Loop => "LOOP",
            PathMode::Reverse => "REVERSE",
        }
    }
}

impl FromStr for PathMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOOP" => Ok(PathMode::Loop),
            "REVERSE" => Ok(PathMode::Reverse),
            other => Err(ValidationError::UnsupportedPathMode(other.to_string())),
        }
    }
}

impl fmt::Display for PathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modeled network characteristics of a link.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetChar {
    /// Uplink throughput (Mbps).
    #[serde(default)]
    pub throughput_ul: i32,
    /// Downlink throughput (Mbps).
    #[serde(default)]
    pub throughput_dl: i32,
    /// Packet loss (percent).
    #[serde(default)]
    pub packet_loss: f64,
}

impl NetChar {
    /// Baseline applied when modulation is switched off.
    pub const BASELINE: Self = Self {
        throughput_ul: 0,
        throughput_dl: 0,
        packet_loss: 0.0,
    };

    /// Nominal values of a terminal that lost its radio link.
    pub const DISCONNECTED: Self = Self {
        throughput_ul: 1,
        throughput_dl: 1,
        packet_loss: 100.0,
    };

    pub fn new(throughput_ul: i32, throughput_dl: i32, packet_loss: f64) -> Self {
        Self {
            throughput_ul,
            throughput_dl,
            packet_loss,
        }
    }

    pub fn is_baseline(&self) -> bool {
        *self == Self::BASELINE
    }
}

/// Parse a comma-separated technology priority list.
///
/// Tokens are trimmed and lowercased; an empty list yields [`DEFAULT_PRIORITY`].
pub fn parse_priority_list(raw: &str) -> Vec<String> {
    let list: Vec<String> = raw
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if list.is_empty() {
        DEFAULT_PRIORITY.iter().map(|t| (*t).to_string()).collect()
    } else {
        list
    }
}
