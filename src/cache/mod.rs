//! Downstream geo cache and differential synchronisation.
//!
//! Readers of the cache are latency sensitive, so [`CacheSynchronizer::sync`]
//! only pushes what changed since the previous publication and removes what
//! no longer exists. Comparison is exact: a coordinate that moved by one ulp
//! is rewritten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::store::SpatialStore;
use crate::types::AssetKind;

/// Published signal figures for one (terminal, POA) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CachedMeasurement {
    pub distance: f64,
    pub in_range: bool,
    pub rssi: f64,
    pub rsrp: f64,
    pub rsrq: f64,
}

/// A downstream key-value cache of positions and measurements.
pub trait GeoCache: Send + Sync {
    /// Published positions of one asset kind, `[lon, lat]` by name.
    fn positions(&self, kind: AssetKind) -> Result<HashMap<String, [f64; 2]>>;

    fn set_position(&self, kind: AssetKind, name: &str, coordinates: [f64; 2]) -> Result<()>;

    fn del_position(&self, kind: AssetKind, name: &str) -> Result<()>;

    /// Published measurements by `(ue, poa)`.
    fn measurements(&self) -> Result<HashMap<(String, String), CachedMeasurement>>;

    fn set_measurement(&self, ue: &str, poa: &str, m: CachedMeasurement) -> Result<()>;

    fn del_measurement(&self, ue: &str, poa: &str) -> Result<()>;

    /// Remove every entry.
    fn flush(&self) -> Result<()>;
}

/// Key of a published position.
pub fn position_key(kind: AssetKind, name: &str) -> String {
    format!("pos:{}:{}", kind.tag(), name)
}

/// Key of a published measurement.
pub fn measurement_key(ue: &str, poa: &str) -> String {
    format!("meas:{ue}:{poa}")
}

#[derive(Debug, Clone)]
enum Entry {
    Position {
        kind: AssetKind,
        name: String,
        coordinates: [f64; 2],
    },
    Measurement {
        ue: String,
        poa: String,
        value: CachedMeasurement,
    },
}

/// In-process cache with write and delete counters.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Published position by key.
    pub fn position(&self, kind: AssetKind, name: &str) -> Option<[f64; 2]> {
        match self.entries.get(&position_key(kind, name)).as_deref() {
            Some(Entry::Position { coordinates, .. }) => Some(*coordinates),
            _ => None,
        }
    }

    /// Total writes since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Total deletes since creation.
    pub fn delete_count(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

impl GeoCache for MemoryCache {
    fn positions(&self, kind: AssetKind) -> Result<HashMap<String, [f64; 2]>> {
        Ok(self
            .entries
            .iter()
            .filter_map(|e| match e.value() {
                Entry::Position {
                    kind: k,
                    name,
                    coordinates,
                } if *k == kind => Some((name.clone(), *coordinates)),
                _ => None,
            })
            .collect())
    }

    fn set_position(&self, kind: AssetKind, name: &str, coordinates: [f64; 2]) -> Result<()> {
        self.entries.insert(
            position_key(kind, name),
            Entry::Position {
                kind,
                name: name.to_string(),
                coordinates,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn del_position(&self, kind: AssetKind, name: &str) -> Result<()> {
        if self.entries.remove(&position_key(kind, name)).is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn measurements(&self) -> Result<HashMap<(String, String), CachedMeasurement>> {
        Ok(self
            .entries
            .iter()
            .filter_map(|e| match e.value() {
                Entry::Measurement { ue, poa, value } => Some(((ue.clone(), poa.clone()), *value)),
                Entry::Position { .. } => None,
            })
            .collect())
    }

    fn set_measurement(&self, ue: &str, poa: &str, value: CachedMeasurement) -> Result<()> {
        self.entries.insert(
            measurement_key(ue, poa),
            Entry::Measurement {
                ue: ue.to_string(),
                poa: poa.to_string(),
                value,
            },
        );
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn del_measurement(&self, ue: &str, poa: &str) -> Result<()> {
        if self.entries.remove(&measurement_key(ue, poa)).is_some() {
            self.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

/// Counts of cache mutations made by one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub writes: usize,
    pub deletes: usize,
}

impl SyncReport {
    /// Whether the sync changed nothing.
    pub fn is_noop(&self) -> bool {
        self.writes == 0 && self.deletes == 0
    }
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, rhs: Self) {
        self.writes += rhs.writes;
        self.deletes += rhs.deletes;
    }
}

/// Pushes the store's state to a [`GeoCache`] as a minimal delta.
#[derive(Clone)]
pub struct CacheSynchronizer {
    cache: Arc<dyn GeoCache>,
}

impl CacheSynchronizer {
    pub fn new(cache: Arc<dyn GeoCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<dyn GeoCache> {
        &self.cache
    }

    /// Bring the cache in line with `store`.
    pub fn sync(&self, store: &SpatialStore) -> Result<SyncReport> {
        let ues = store.get_all_ue()?;
        let mut report = SyncReport::default();

        let ue_positions = ues
            .values()
            .map(|ue| (ue.name.clone(), ue.position.coordinates))
            .collect();
        report += self.sync_positions(AssetKind::Terminal, ue_positions)?;

        let poa_positions = store
            .get_all_poa()?
            .into_values()
            .map(|poa| (poa.name, poa.position.coordinates))
            .collect();
        report += self.sync_positions(AssetKind::PointOfAttachment, poa_positions)?;

        let compute_positions = store
            .get_all_compute()?
            .into_values()
            .map(|c| (c.name, c.position.coordinates))
            .collect();
        report += self.sync_positions(AssetKind::Compute, compute_positions)?;

        let measurements = ues
            .values()
            .flat_map(|ue| ue.measurements.values())
            .map(|m| {
                (
                    (m.ue.clone(), m.poa.clone()),
                    CachedMeasurement {
                        distance: m.distance,
                        in_range: m.in_range,
                        rssi: m.rssi,
                        rsrp: m.rsrp,
                        rsrq: m.rsrq,
                    },
                )
            })
            .collect();
        report += self.sync_measurements(measurements)?;

        if !report.is_noop() {
            debug!(
                "Cache sync: {} writes, {} deletes",
                report.writes, report.deletes
            );
        }
        Ok(report)
    }

    /// Clear the cache.
    pub fn flush(&self) -> Result<()> {
        self.cache.flush()
    }

    fn sync_positions(
        &self,
        kind: AssetKind,
        current: HashMap<String, [f64; 2]>,
    ) -> Result<SyncReport> {
        let published = self.cache.positions(kind)?;
        let mut report = SyncReport::default();

        for (name, coords) in &current {
            if published.get(name) != Some(coords) {
                self.cache.set_position(kind, name, *coords)?;
                report.writes += 1;
            }
        }
        for name in published.keys() {
            if !current.contains_key(name) {
                self.cache.del_position(kind, name)?;
                report.deletes += 1;
            }
        }
        Ok(report)
    }

    fn sync_measurements(
        &self,
        current: HashMap<(String, String), CachedMeasurement>,
    ) -> Result<SyncReport> {
        let published = self.cache.measurements()?;
        let mut report = SyncReport::default();

        for ((ue, poa), m) in &current {
            let key = (ue.clone(), poa.clone());
            if published.get(&key) != Some(m) {
                self.cache.set_measurement(ue, poa, *m)?;
                report.writes += 1;
            }
        }
        for (ue, poa) in published.keys() {
            if !current.contains_key(&(ue.clone(), poa.clone())) {
                self.cache.del_measurement(ue, poa)?;
                report.deletes += 1;
            }
        }
        Ok(report)
    }
}
