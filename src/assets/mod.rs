//! Asset manager: validated asset CRUD over the spatial store.
//!
//! Every geometry-affecting mutation re-runs POA selection: a terminal change
//! refreshes that terminal, a POA change refreshes all terminals.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::{Result, ValidationError};
use crate::geo::Point;
use crate::mobility;
use crate::selection::{self, CoordinatePower};
use crate::store::{Compute, ComputeData, Poa, PoaData, SpatialStore, Ue, UeData};
use crate::types::{AssetId, DEFAULT_PRIORITY};

/// Validated access to terminals, POAs and compute nodes.
pub struct AssetManager {
    store: SpatialStore,
}

impl AssetManager {
    pub fn new(store: SpatialStore) -> Self {
        Self { store }
    }

    /// Manager over a fresh in-memory store.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(SpatialStore::in_memory()?))
    }

    pub fn store(&self) -> &SpatialStore {
        &self.store
    }

    // Terminals

    pub fn create_ue(&self, id: &AssetId, name: &str, mut data: UeData) -> Result<()> {
        validate_ue(name, &data, true)?;
        if data.priority.as_ref().map_or(true, Vec::is_empty) {
            data.priority = Some(DEFAULT_PRIORITY.iter().map(|t| (*t).to_string()).collect());
        }
        self.store.create_ue(id, name, &data)?;
        selection::refresh_ue(&self.store, name)
    }

    pub fn update_ue(&self, name: &str, mut data: UeData) -> Result<()> {
        validate_ue(name, &data, false)?;
        if data.priority.as_ref().is_some_and(Vec::is_empty) {
            data.priority = Some(DEFAULT_PRIORITY.iter().map(|t| (*t).to_string()).collect());
        }
        self.store.update_ue(name, &data)?;
        if data.position.is_some() || data.priority.is_some() {
            selection::refresh_ue(&self.store, name)?;
        }
        Ok(())
    }

    pub fn get_ue(&self, name: &str) -> Result<Ue> {
        self.store.get_ue(name)
    }

    pub fn get_all_ue(&self) -> Result<BTreeMap<String, Ue>> {
        self.store.get_all_ue()
    }

    pub fn delete_ue(&self, name: &str) -> Result<()> {
        self.store.delete_ue(name)
    }

    pub fn delete_all_ue(&self) -> Result<()> {
        self.store.delete_all_ue()
    }

    // Points of attachment

    pub fn create_poa(&self, id: &AssetId, name: &str, data: PoaData) -> Result<()> {
        validate_poa(name, &data, true)?;
        self.store.create_poa(id, name, &data)?;
        selection::refresh_all(&self.store)
    }

    pub fn update_poa(&self, name: &str, data: PoaData) -> Result<()> {
        validate_poa(name, &data, false)?;
        self.store.update_poa(name, &data)?;
        selection::refresh_all(&self.store)
    }

    pub fn get_poa(&self, name: &str) -> Result<Poa> {
        self.store.get_poa(name)
    }

    pub fn get_all_poa(&self) -> Result<BTreeMap<String, Poa>> {
        self.store.get_all_poa()
    }

    pub fn delete_poa(&self, name: &str) -> Result<()> {
        self.store.delete_poa(name)?;
        selection::refresh_all(&self.store)
    }

    /// Remove every POA; terminals stay but lose their selection.
    pub fn delete_all_poa(&self) -> Result<()> {
        self.store.delete_all_poa()?;
        selection::refresh_all(&self.store)
    }

    // Compute nodes

    pub fn create_compute(&self, id: &AssetId, name: &str, data: ComputeData) -> Result<()> {
        if let Some(ref p) = data.position {
            p.validate()?;
        }
        self.store.create_compute(id, name, &data)
    }

    pub fn update_compute(&self, name: &str, data: ComputeData) -> Result<()> {
        if let Some(ref p) = data.position {
            p.validate()?;
        }
        self.store.update_compute(name, &data)
    }

    pub fn get_compute(&self, name: &str) -> Result<Compute> {
        self.store.get_compute(name)
    }

    pub fn get_all_compute(&self) -> Result<BTreeMap<String, Compute>> {
        self.store.get_all_compute()
    }

    pub fn delete_compute(&self, name: &str) -> Result<()> {
        self.store.delete_compute(name)
    }

    pub fn delete_all_compute(&self) -> Result<()> {
        self.store.delete_all_compute()
    }

    /// Bulk delete of every asset table.
    pub fn delete_all(&self) -> Result<()> {
        self.store.delete_all_ue()?;
        self.store.delete_all_poa()?;
        self.store.delete_all_compute()?;
        info!("Deleted all assets");
        Ok(())
    }

    // Movement and selection

    pub fn advance_ue_position(&self, name: &str, elapsed: f64) -> Result<bool> {
        mobility::advance_ue_position(&self.store, name, elapsed)
    }

    pub fn advance_all(&self, elapsed: f64) -> Result<usize> {
        mobility::advance_all(&self.store, elapsed)
    }

    pub fn refresh_all(&self) -> Result<()> {
        selection::refresh_all(&self.store)
    }

    // Spatial queries

    pub fn distance(&self, a: &Point, b: &Point) -> Result<f64> {
        self.store.distance(a, b)
    }

    pub fn within(&self, a: &Point, b: &Point, radius: f64) -> Result<bool> {
        self.store.within(a, b, radius)
    }

    /// Cellular signal at each coordinate, in input order.
    pub fn cellular_power(&self, points: &[Point]) -> Result<Vec<CoordinatePower>> {
        points
            .iter()
            .map(|p| {
                p.validate()?;
                selection::cellular_power(&self.store, p)
            })
            .collect()
    }
}

fn validate_ue(name: &str, data: &UeData, creating: bool) -> Result<()> {
    match data.position {
        Some(ref p) => p.validate()?,
        None if creating => return Err(ValidationError::MissingPosition(name.to_string()).into()),
        None => {}
    }
    if let Some(velocity) = data.velocity {
        if velocity < 0.0 || !velocity.is_finite() {
            return Err(ValidationError::NegativeVelocity {
                name: name.to_string(),
                velocity,
            }
            .into());
        }
    }
    if let Some(ref path) = data.path {
        path.validate()?;
    }
    Ok(())
}

fn validate_poa(name: &str, data: &PoaData, creating: bool) -> Result<()> {
    match data.position {
        Some(ref p) => p.validate()?,
        None if creating => return Err(ValidationError::MissingPosition(name.to_string()).into()),
        None => {}
    }
    if creating && data.subtype.is_none() {
        return Err(ValidationError::MissingField("subtype").into());
    }
    if let Some(radius) = data.radius {
        if radius < 0.0 || !radius.is_finite() {
            return Err(ValidationError::NegativeRadius {
                name: name.to_string(),
                radius,
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PoaSubtype;

    #[test]
    fn test_negative_velocity_rejected() {
        let am = AssetManager::in_memory().unwrap();
        let data = UeData {
            position: Some(Point::new(7.4, 43.7)),
            velocity: Some(-1.0),
            ..Default::default()
        };
        let err = am.create_ue(&"id".into(), "ue1", data).unwrap_err();
        assert!(err.is_validation());
        assert!(am.get_all_ue().unwrap().is_empty());
    }

    #[test]
    fn test_negative_radius_rejected() {
        let am = AssetManager::in_memory().unwrap();
        let data = PoaData {
            subtype: Some(PoaSubtype::Wifi),
            position: Some(Point::new(7.4, 43.7)),
            radius: Some(-5.0),
        };
        assert!(am.create_poa(&"id".into(), "poa1", data).unwrap_err().is_validation());
        assert_eq!(am.store().poa_count().unwrap(), 0);
    }

    #[test]
    fn test_missing_poa_position_rejected() {
        let am = AssetManager::in_memory().unwrap();
        let data = PoaData {
            subtype: Some(PoaSubtype::Wifi),
            ..Default::default()
        };
        let err = am.create_poa(&"id".into(), "poa1", data).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Validation(ValidationError::MissingPosition(_))
        ));
    }

    #[test]
    fn test_empty_priority_defaults() {
        let am = AssetManager::in_memory().unwrap();
        let data = UeData {
            position: Some(Point::new(7.4, 43.7)),
            priority: Some(vec![]),
            ..Default::default()
        };
        am.create_ue(&"id".into(), "ue1", data).unwrap();
        assert_eq!(am.get_ue("ue1").unwrap().poa_type_prio, DEFAULT_PRIORITY.to_vec());
    }
}
