//! Engine facade.
//!
//! The engine owns the asset manager, the downstream cache and event
//! dispatch, and one coarse lock over its mutable state: the active scenario,
//! the asset index, the automation flags and the scheduler handle. Every
//! handler and every tick holds the lock for its whole duration; events are
//! dispatched after it is released.

pub mod scenario;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::assets::AssetManager;
use crate::automation::{
    Automation, AutomationState, AutomationType, NetworkModel, Scheduler, TickReport,
};
use crate::cache::{CacheSynchronizer, GeoCache, MemoryCache, SyncReport};
use crate::config::Config;
use crate::error::{Error, ErrorContext, Result, ValidationError};
use crate::events::{BroadcastSink, Dispatcher, Event, LogSink};
use crate::geo::{LineString, Point};
use crate::selection::CoordinatePower;
use crate::store::{Compute, ComputeData, Poa, PoaData, SpatialStore, Ue, UeData};
use crate::types::{parse_priority_list, AssetKind};

pub use scenario::{GeoData, Node, NodeType, Scenario};

/// Geo data of one asset as exchanged over the API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoDataAsset {
    pub asset_name: String,
    /// `UE`, `POA` or `COMPUTE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<LineString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eop_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f64>,
}

impl From<&Ue> for GeoDataAsset {
    fn from(ue: &Ue) -> Self {
        let has_path = ue.path.is_some();
        Self {
            asset_name: ue.name.clone(),
            asset_type: Some("UE".to_string()),
            location: Some(ue.position),
            path: ue.path.clone(),
            eop_mode: has_path.then(|| ue.path_mode.to_string()),
            velocity: has_path.then_some(ue.path_velocity),
            ..Default::default()
        }
    }
}

impl From<&Poa> for GeoDataAsset {
    fn from(poa: &Poa) -> Self {
        Self {
            asset_name: poa.name.clone(),
            asset_type: Some("POA".to_string()),
            sub_type: Some(poa.subtype.as_str().to_string()),
            location: Some(poa.position),
            radius: Some(poa.radius),
            ..Default::default()
        }
    }
}

impl From<&Compute> for GeoDataAsset {
    fn from(compute: &Compute) -> Self {
        Self {
            asset_name: compute.name.clone(),
            asset_type: Some("COMPUTE".to_string()),
            sub_type: Some(compute.subtype.as_str().to_string()),
            location: Some(compute.position),
            ..Default::default()
        }
    }
}

/// Other end of a distance or range query.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Asset(String),
    Coordinates(Point),
}

#[derive(Debug, Clone, Copy)]
struct AssetEntry {
    node_type: NodeType,
    /// Geo data is present in the store.
    allocated: bool,
}

#[derive(Default)]
struct EngineState {
    scenario: Option<Scenario>,
    assets: BTreeMap<String, AssetEntry>,
    automation: Automation,
    scheduler: Option<Scheduler>,
}

/// The geo-spatial engine.
pub struct Engine {
    assets: AssetManager,
    cache: CacheSynchronizer,
    dispatcher: Dispatcher,
    broadcast: Arc<BroadcastSink>,
    tick_interval: Duration,
    state: Mutex<EngineState>,
}

impl Engine {
    /// Build an engine from configuration.
    pub fn new(config: &Config) -> Result<Arc<Self>> {
        let store = match config.store.path {
            Some(ref path) => SpatialStore::new(path)?,
            None => SpatialStore::in_memory()?,
        };
        Ok(Self::with_parts(store, Arc::new(MemoryCache::new()), config))
    }

    /// Build an engine over an existing store and cache.
    pub fn with_parts(store: SpatialStore, cache: Arc<dyn GeoCache>, config: &Config) -> Arc<Self> {
        let broadcast = Arc::new(BroadcastSink::new(config.events.channel_capacity));
        let mut dispatcher = Dispatcher::new().with_sink(broadcast.clone());
        if config.events.log_events {
            dispatcher = dispatcher.with_sink(Arc::new(LogSink));
        }

        Arc::new(Self {
            assets: AssetManager::new(store),
            cache: CacheSynchronizer::new(cache),
            dispatcher,
            broadcast,
            tick_interval: config.automation.tick_interval,
            state: Mutex::new(EngineState {
                automation: Automation::new(),
                ..Default::default()
            }),
        })
    }

    pub fn assets(&self) -> &AssetManager {
        &self.assets
    }

    pub fn cache(&self) -> &CacheSynchronizer {
        &self.cache
    }

    /// Subscribe to emitted events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast.subscribe()
    }

    /// Name of the active scenario.
    pub fn scenario_name(&self) -> Option<String> {
        self.state.lock().scenario.as_ref().map(|s| s.name.clone())
    }

    /// Copy of the active scenario model.
    pub fn scenario(&self) -> Option<Scenario> {
        self.state.lock().scenario.clone()
    }

    // ------------------------------------------------------------------
    // Scenario lifecycle
    // ------------------------------------------------------------------

    /// Activate a scenario, replacing any active one.
    pub fn activate(&self, scenario: Scenario) -> Result<()> {
        scenario.validate()?;
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.scenario.is_some() {
                events = self.terminate_locked(&mut state)?;
            }
            info!("Activating scenario {}", scenario.name);

            let names: Vec<String> = scenario.nodes.iter().map(|n| n.name.clone()).collect();
            state.scenario = Some(scenario);
            self.add_assets(&mut state, &names);
            self.sync_cache();
        }
        self.dispatcher.dispatch(events);
        Ok(())
    }

    /// Apply an updated model of the active scenario.
    ///
    /// Assets new to the model, or still without geo data, are added; assets
    /// gone from the model are removed. Others keep their current geo data.
    pub fn update(&self, scenario: Scenario) -> Result<()> {
        scenario.validate()?;
        let mut state = self.state.lock();
        if state.scenario.is_none() {
            return Err(Error::NoActiveScenario);
        }

        let incoming: BTreeSet<&str> = scenario.nodes.iter().map(|n| n.name.as_str()).collect();
        let to_add: Vec<String> = scenario
            .nodes
            .iter()
            .filter(|n| !state.assets.get(&n.name).is_some_and(|a| a.allocated))
            .map(|n| n.name.clone())
            .collect();
        let to_remove: Vec<String> = state
            .assets
            .keys()
            .filter(|name| !incoming.contains(name.as_str()))
            .cloned()
            .collect();
        debug!(
            "Scenario update: {} to add, {} to remove",
            to_add.len(),
            to_remove.len()
        );

        state.scenario = Some(scenario);
        self.remove_assets(&mut state, &to_remove);
        self.add_assets(&mut state, &to_add);
        self.sync_cache();
        Ok(())
    }

    /// Terminate the active scenario: stop automation and delete all geo data.
    pub fn terminate(&self) -> Result<()> {
        let events = {
            let mut state = self.state.lock();
            self.terminate_locked(&mut state)?
        };
        self.dispatcher.dispatch(events);
        Ok(())
    }

    fn terminate_locked(&self, state: &mut EngineState) -> Result<Vec<Event>> {
        let events = {
            let EngineState {
                scenario,
                automation,
                ..
            } = &mut *state;
            let mut empty = Scenario::default();
            let network: &mut dyn NetworkModel = match scenario.as_mut() {
                Some(s) => s,
                None => &mut empty,
            };
            automation.reset(&self.assets, network, Instant::now())?
        };
        if let Some(scheduler) = state.scheduler.take() {
            scheduler.stop();
        }

        self.assets.delete_all()?;
        state.assets.clear();
        if let Some(scenario) = state.scenario.take() {
            info!("Terminated scenario {}", scenario.name);
        }
        self.cache.flush()?;
        Ok(events)
    }

    fn add_assets(&self, state: &mut EngineState, names: &[String]) {
        let EngineState {
            scenario, assets, ..
        } = &mut *state;
        let Some(scenario) = scenario.as_ref() else {
            return;
        };
        for name in names {
            let Some(node) = scenario.node(name) else {
                continue;
            };
            let allocated = match self.allocate(node) {
                Ok(allocated) => allocated,
                Err(e) => {
                    let ctx = ErrorContext {
                        asset: Some(name.clone()),
                        operation: "add_asset",
                    };
                    warn!("Skipping asset: {} ({})", ctx, e);
                    false
                }
            };
            if !allocated {
                debug!("No geo data stored for {}", name);
            }
            assets.insert(
                name.clone(),
                AssetEntry {
                    node_type: node.node_type,
                    allocated,
                },
            );
        }
    }

    /// Store a node's geo data; `false` when it has none.
    fn allocate(&self, node: &Node) -> Result<bool> {
        let id = node.asset_id();
        match node.node_type {
            NodeType::Ue => {
                let Some(data) = node.ue_data()? else {
                    return Ok(false);
                };
                self.assets.create_ue(&id, &node.name, data)?;
            }
            NodeType::Poa(subtype) => {
                let Some(data) = node.poa_data(subtype) else {
                    return Ok(false);
                };
                self.assets.create_poa(&id, &node.name, data)?;
            }
            NodeType::Compute(subtype) => {
                let Some(data) = node.compute_data(subtype) else {
                    return Ok(false);
                };
                self.assets.create_compute(&id, &node.name, data)?;
            }
        }
        debug!("Geo data stored for {} {}", node.node_type, node.name);
        Ok(true)
    }

    fn remove_assets(&self, state: &mut EngineState, names: &[String]) {
        for name in names {
            let Some(entry) = state.assets.remove(name) else {
                continue;
            };
            if let Err(e) = self.delete_asset(name, entry.node_type.kind()) {
                let ctx = ErrorContext {
                    asset: Some(name.clone()),
                    operation: "remove_asset",
                };
                warn!("Failed to remove asset: {} ({})", ctx, e);
            }
        }
    }

    fn delete_asset(&self, name: &str, kind: AssetKind) -> Result<()> {
        match kind {
            AssetKind::Terminal => self.assets.delete_ue(name),
            AssetKind::PointOfAttachment => self.assets.delete_poa(name),
            AssetKind::Compute => self.assets.delete_compute(name),
        }?;
        debug!("Geo data deleted for {} {}", kind, name);
        Ok(())
    }

    fn sync_cache(&self) -> Option<SyncReport> {
        match self.cache.sync(self.assets.store()) {
            Ok(report) => Some(report),
            Err(e) => {
                let ctx = ErrorContext {
                    asset: None,
                    operation: "cache_sync",
                };
                warn!("Cache sync failed: {} ({})", ctx, e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Geo data
    // ------------------------------------------------------------------

    /// Geo data of one asset of the active scenario.
    pub fn get_geodata(&self, name: &str) -> Result<GeoDataAsset> {
        let state = self.state.lock();
        let node_type = node_type(&state, name)?;
        Ok(match node_type.kind() {
            AssetKind::Terminal => GeoDataAsset::from(&self.assets.get_ue(name)?),
            AssetKind::PointOfAttachment => GeoDataAsset::from(&self.assets.get_poa(name)?),
            AssetKind::Compute => GeoDataAsset::from(&self.assets.get_compute(name)?),
        })
    }

    /// Geo data of every stored asset, optionally filtered by node type.
    ///
    /// The filter is a node type name (`UE`, `POA-4G`, `EDGE`, ...).
    pub fn list_geodata(&self, asset_type: Option<&str>) -> Result<Vec<GeoDataAsset>> {
        let filter = match asset_type {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<NodeType>()?),
        };
        let wants = |t: NodeType| filter.map_or(true, |f| f == t);

        let _state = self.state.lock();
        let mut list = Vec::new();
        if wants(NodeType::Ue) {
            list.extend(self.assets.get_all_ue()?.values().map(GeoDataAsset::from));
        }
        list.extend(
            self.assets
                .get_all_poa()?
                .values()
                .filter(|p| wants(NodeType::Poa(p.subtype)))
                .map(GeoDataAsset::from),
        );
        list.extend(
            self.assets
                .get_all_compute()?
                .values()
                .filter(|c| wants(NodeType::Compute(c.subtype)))
                .map(GeoDataAsset::from),
        );
        Ok(list)
    }

    /// Create or update geo data of an asset of the active scenario.
    pub fn set_geodata(&self, name: &str, asset: GeoDataAsset) -> Result<()> {
        if asset.asset_name != name {
            return Err(ValidationError::NameMismatch {
                path: name.to_string(),
                body: asset.asset_name,
            }
            .into());
        }

        let mut state = self.state.lock();
        let node_type = node_type(&state, name)?;
        let allocated = state.assets.get(name).is_some_and(|a| a.allocated);
        let node = state
            .scenario
            .as_ref()
            .and_then(|s| s.node(name))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("asset {name}")))?;

        match node_type {
            NodeType::Ue => {
                let mode = GeoData {
                    eop_mode: asset.eop_mode,
                    ..Default::default()
                }
                .path_mode()?;
                let mut data = UeData {
                    position: asset.location,
                    path: asset.path,
                    mode,
                    velocity: asset.velocity,
                    ..Default::default()
                };
                if allocated {
                    self.assets.update_ue(name, data)?;
                } else {
                    data.priority = Some(parse_priority_list(
                        node.wireless_type.as_deref().unwrap_or_default(),
                    ));
                    data.connected = Some(node.connected);
                    self.assets.create_ue(&node.asset_id(), name, data)?;
                }
            }
            NodeType::Poa(subtype) => {
                let data = PoaData {
                    subtype: Some(subtype),
                    position: asset.location,
                    radius: asset.radius,
                };
                if allocated {
                    self.assets.update_poa(name, data)?;
                } else {
                    self.assets.create_poa(&node.asset_id(), name, data)?;
                }
            }
            NodeType::Compute(subtype) => {
                let data = ComputeData {
                    subtype: Some(subtype),
                    position: asset.location,
                    connected: Some(node.connected),
                };
                if allocated {
                    self.assets.update_compute(name, data)?;
                } else {
                    self.assets.create_compute(&node.asset_id(), name, data)?;
                }
            }
        }

        state.assets.insert(
            name.to_string(),
            AssetEntry {
                node_type,
                allocated: true,
            },
        );
        info!("Geo data set for {} {}", node_type, name);
        self.sync_cache();
        Ok(())
    }

    /// Remove geo data of an asset; the asset stays in the scenario.
    pub fn delete_geodata(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let node_type = node_type(&state, name)?;
        self.delete_asset(name, node_type.kind())?;
        state.assets.insert(
            name.to_string(),
            AssetEntry {
                node_type,
                allocated: false,
            },
        );
        self.sync_cache();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------

    /// Geodesic distance in metres from an asset to a target.
    pub fn distance_to(&self, name: &str, target: &Target) -> Result<f64> {
        let state = self.state.lock();
        let (src, dst) = self.endpoints(&state, name, target)?;
        self.assets.distance(&src, &dst)
    }

    /// Whether a target lies within `radius` metres of an asset.
    pub fn within_range(&self, name: &str, target: &Target, radius: f64) -> Result<bool> {
        if radius < 0.0 || !radius.is_finite() {
            return Err(ValidationError::NegativeRadius {
                name: name.to_string(),
                radius,
            }
            .into());
        }
        let state = self.state.lock();
        let (src, dst) = self.endpoints(&state, name, target)?;
        self.assets.within(&src, &dst, radius)
    }

    /// Cellular signal at each coordinate.
    pub fn cellular_power(&self, points: &[Point]) -> Result<Vec<CoordinatePower>> {
        let _state = self.state.lock();
        self.assets.cellular_power(points)
    }

    fn endpoints(&self, state: &EngineState, name: &str, target: &Target) -> Result<(Point, Point)> {
        let src = self.position_of(state, name)?;
        let dst = match target {
            Target::Asset(other) => self.position_of(state, other)?,
            Target::Coordinates(point) => {
                point.validate()?;
                *point
            }
        };
        Ok((src, dst))
    }

    fn position_of(&self, state: &EngineState, name: &str) -> Result<Point> {
        Ok(match node_type(state, name)?.kind() {
            AssetKind::Terminal => self.assets.get_ue(name)?.position,
            AssetKind::PointOfAttachment => self.assets.get_poa(name)?.position,
            AssetKind::Compute => self.assets.get_compute(name)?.position,
        })
    }

    // ------------------------------------------------------------------
    // Automation
    // ------------------------------------------------------------------

    pub fn automation_states(&self) -> Vec<AutomationState> {
        self.state.lock().automation.states()
    }

    pub fn automation_state(&self, kind: AutomationType) -> AutomationState {
        AutomationState {
            kind,
            active: self.state.lock().automation.is_enabled(kind),
        }
    }

    /// Whether the periodic automation task is running.
    pub fn is_automation_running(&self) -> bool {
        self.state.lock().scheduler.is_some()
    }

    /// Enable or disable an automation type.
    ///
    /// The periodic task starts with the first enabled type and stops with
    /// the last disabled one.
    pub fn set_automation(self: &Arc<Self>, kind: AutomationType, run: bool) -> Result<()> {
        let events = {
            let mut state = self.state.lock();
            let EngineState {
                scenario,
                automation,
                scheduler,
                ..
            } = &mut *state;

            let mut empty = Scenario::default();
            let network: &mut dyn NetworkModel = match scenario.as_mut() {
                Some(s) => s,
                None => &mut empty,
            };
            let events = automation.set(kind, run, &self.assets, network, Instant::now())?;

            if automation.any_enabled() {
                if scheduler.is_none() {
                    // Without a runtime the engine is ticked by hand
                    match self.spawn_scheduler() {
                        Ok(started) => *scheduler = Some(started),
                        Err(e) => warn!("Automation loop not started: {}", e),
                    }
                }
            } else if let Some(running) = scheduler.take() {
                running.stop();
            }
            events
        };
        self.dispatcher.dispatch(events);
        Ok(())
    }

    fn spawn_scheduler(self: &Arc<Self>) -> Result<Scheduler> {
        let engine: Weak<Self> = Arc::downgrade(self);
        Scheduler::start(self.tick_interval, move || {
            if let Some(engine) = engine.upgrade() {
                // Failures are logged by the tick and retried on the next one
                let _ = engine.tick();
            }
        })
    }

    /// Run one automation tick now, then publish the cache delta.
    pub fn tick(&self) -> Result<TickReport> {
        let report = {
            let mut state = self.state.lock();
            let EngineState {
                scenario,
                automation,
                ..
            } = &mut *state;

            let mut empty = Scenario::default();
            let network: &mut dyn NetworkModel = match scenario.as_mut() {
                Some(s) => s,
                None => &mut empty,
            };
            let mut report = match automation.run_tick(&self.assets, network, Instant::now()) {
                Ok(report) => report,
                Err(e) => {
                    let ctx = ErrorContext {
                        asset: None,
                        operation: "automation_tick",
                    };
                    error!("Automation tick aborted: {} ({})", ctx, e);
                    return Err(e);
                }
            };
            report.sync = self.sync_cache();
            report
        };
        self.dispatcher.dispatch(report.events.clone());
        Ok(report)
    }

    /// Stop the periodic task, if running.
    pub fn shutdown(&self) {
        if let Some(scheduler) = self.state.lock().scheduler.take() {
            scheduler.stop();
        }
    }
}

fn node_type(state: &EngineState, name: &str) -> Result<NodeType> {
    let scenario = state.scenario.as_ref().ok_or(Error::NoActiveScenario)?;
    scenario
        .node(name)
        .map(|n| n.node_type)
        .ok_or_else(|| Error::NotFound(format!("asset {name}")))
}
