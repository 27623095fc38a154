//! Rows held by the spatial store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::{LineString, Point};
use crate::types::{AssetId, ComputeSubtype, PathMode, PoaSubtype};

/// A terminal (UE) row together with its current selection state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ue {
    pub id: AssetId,
    pub name: String,
    pub position: Point,
    pub path: Option<LineString>,
    pub path_mode: PathMode,
    pub path_velocity: f64,
    pub path_length: f64,
    pub path_increment: f64,
    pub path_fraction: f64,
    /// Serving POA name, empty when disconnected.
    pub poa: String,
    pub poa_distance: f64,
    pub poa_in_range: Vec<String>,
    pub poa_type_prio: Vec<String>,
    pub connected: bool,
    /// In-range measurements keyed by POA name.
    #[serde(default)]
    pub measurements: BTreeMap<String, Measurement>,
}

impl Ue {
    /// Whether the terminal moves on each automation tick.
    pub fn is_mobile(&self) -> bool {
        self.path.is_some() && self.path_velocity > 0.0
    }
}

/// A point of attachment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poa {
    pub id: AssetId,
    pub name: String,
    pub subtype: PoaSubtype,
    pub position: Point,
    /// Coverage radius in metres, 0 = unlimited.
    pub radius: f64,
}

/// A compute node row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Compute {
    pub id: AssetId,
    pub name: String,
    pub subtype: ComputeSubtype,
    pub position: Point,
    pub connected: bool,
}

/// One (terminal, POA) measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurement {
    pub ue: String,
    pub poa: String,
    pub subtype: PoaSubtype,
    pub radius: f64,
    pub distance: f64,
    pub in_range: bool,
    pub rssi: f64,
    pub rsrp: f64,
    pub rsrq: f64,
}

impl Measurement {
    /// Row key, unique per pair.
    pub fn key(ue: &str, poa: &str) -> String {
        format!("{ue}-{poa}")
    }
}

/// One row of the combined terminal x POA query.
#[derive(Debug, Clone, PartialEq)]
pub struct PoaMatrixRow {
    pub ue: String,
    pub poa_type_prio: Vec<String>,
    pub current_poa: String,
    pub poa: String,
    pub subtype: PoaSubtype,
    pub radius: f64,
    pub distance: f64,
    pub in_range: bool,
}

/// Fields of a terminal to create or change. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct UeData {
    pub position: Option<Point>,
    pub path: Option<LineString>,
    /// Remove any existing path.
    pub clear_path: bool,
    pub mode: Option<PathMode>,
    pub velocity: Option<f64>,
    /// Ordered technology tokens, e.g. `["wifi", "5g"]`.
    pub priority: Option<Vec<String>>,
    pub connected: Option<bool>,
}

impl UeData {
    /// Whether applying this update invalidates the path parameters.
    pub fn touches_path(&self) -> bool {
        self.path.is_some() || self.clear_path || self.mode.is_some() || self.velocity.is_some()
    }
}

/// Fields of a POA to create or change.
#[derive(Debug, Clone, Default)]
pub struct PoaData {
    pub subtype: Option<PoaSubtype>,
    pub position: Option<Point>,
    pub radius: Option<f64>,
}

/// Fields of a compute node to create or change.
#[derive(Debug, Clone, Default)]
pub struct ComputeData {
    pub subtype: Option<ComputeSubtype>,
    pub position: Option<Point>,
    pub connected: Option<bool>,
}
