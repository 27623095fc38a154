//! Deterministic radio quality stand-ins.
//!
//! Values scale linearly with `1 - distance / radius` inside the coverage
//! area and sit at the range minimum outside it. They are reporting
//! placeholders, not a propagation model.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo::Point;
use crate::store::SpatialStore;
use crate::types::PoaSubtype;

// 4G: RSRP -100..-70 dBm, RSRQ -20..-5 dB, in reporting units.
const CELL4G_RSRP: (f64, f64) = (40.0, 70.0);
const CELL4G_RSRQ: (f64, f64) = (-2.0, 28.0);

// 5G: RSRP -115..-65 dBm, RSRQ -20..-5 dB, in reporting units.
const CELL5G_RSRP: (f64, f64) = (42.0, 92.0);
const CELL5G_RSRQ: (f64, f64) = (47.0, 77.0);

// WiFi RSSI, in reporting units.
const WIFI_RSSI: (f64, f64) = (32.0, 77.0);

/// Signal figures for one (terminal, POA) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RadioPower {
    pub rssi: f64,
    pub rsrp: f64,
    pub rsrq: f64,
}

/// Signal figures at `distance` from a POA of the given technology.
///
/// An unlimited radius (0) reports full strength.
pub fn calculate_power(subtype: PoaSubtype, radius: f64, distance: f64) -> RadioPower {
    let strength = if radius == 0.0 {
        Some(1.0)
    } else if distance < radius {
        Some(1.0 - distance / radius)
    } else {
        None
    };
    let scale = |(min, max): (f64, f64)| strength.map_or(min, |s| (min + (max - min) * s).trunc());

    match subtype {
        PoaSubtype::Cell4g => RadioPower {
            rsrp: scale(CELL4G_RSRP),
            rsrq: scale(CELL4G_RSRQ),
            ..Default::default()
        },
        PoaSubtype::Cell5g => RadioPower {
            rsrp: scale(CELL5G_RSRP),
            rsrq: scale(CELL5G_RSRQ),
            ..Default::default()
        },
        PoaSubtype::Wifi => RadioPower {
            rssi: scale(WIFI_RSSI),
            ..Default::default()
        },
        PoaSubtype::Generic => RadioPower::default(),
    }
}

/// Cellular signal at an arbitrary coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatePower {
    pub latitude: f64,
    pub longitude: f64,
    pub rsrp: i32,
    pub rsrq: i32,
    /// Nearest covering cellular POA, empty when none.
    pub poa_name: String,
}

/// Signal of the nearest covering 4G/5G POA at `point`; zeros when uncovered.
pub fn cellular_power(store: &SpatialStore, point: &Point) -> Result<CoordinatePower> {
    let nearest = store
        .poas_covering(point)?
        .into_iter()
        .find(|(poa, _)| poa.subtype.is_cellular());

    let (rsrp, rsrq, poa_name) = match nearest {
        Some((poa, distance)) => {
            let power = calculate_power(poa.subtype, poa.radius, distance);
            (power.rsrp as i32, power.rsrq as i32, poa.name)
        }
        None => (0, 0, String::new()),
    };

    Ok(CoordinatePower {
        latitude: point.lat(),
        longitude: point.lon(),
        rsrp,
        rsrq,
        poa_name,
    })
}
