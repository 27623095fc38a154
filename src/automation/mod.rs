//! Automation: periodic movement and change detection.
//!
//! Each tick runs, in order:
//!
//! ```text
//!   MOVEMENT ──► snapshot UEs/POAs ──► MOBILITY ──► POAS-IN-RANGE ──► NETWORK-CHARACTERISTICS-UPDATE ──► prune
//!   (advance                           (serving     (in-range set     (throughput from
//!    positions)                         POA diff)    diff)             distance / radius)
//! ```
//!
//! Each step is gated by its own flag. Events are collected into a
//! [`TickReport`]; delivery happens outside, after the engine lock is released.

pub mod scheduler;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::assets::AssetManager;
use crate::cache::SyncReport;
use crate::error::{Result, ValidationError};
use crate::events::Event;
use crate::store::{Poa, Ue};
use crate::types::{NetChar, DISCONNECTED};

pub use scheduler::Scheduler;

/// Width of one throughput band, as a fraction of the radius.
const STEP_INCREMENT: f64 = 0.25;

/// Element type reported in network characteristics events.
const UE_ELEMENT_TYPE: &str = "UE";

/// Kind of automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutomationType {
    #[serde(rename = "MOVEMENT")]
    Movement,
    #[serde(rename = "MOBILITY")]
    Mobility,
    #[serde(rename = "NETWORK-CHARACTERISTICS-UPDATE")]
    NetCharUpdate,
    #[serde(rename = "POAS-IN-RANGE")]
    PoasInRange,
}

impl AutomationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AutomationType::Movement => "MOVEMENT",
            AutomationType::Mobility => "MOBILITY",
            AutomationType::NetCharUpdate => "NETWORK-CHARACTERISTICS-UPDATE",
            AutomationType::PoasInRange => "POAS-IN-RANGE",
        }
    }

    pub fn all() -> [AutomationType; 4] {
        [
            AutomationType::Movement,
            AutomationType::Mobility,
            AutomationType::NetCharUpdate,
            AutomationType::PoasInRange,
        ]
    }
}

impl FromStr for AutomationType {
    type Err = ValidationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AutomationType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownAutomation(s.to_string()))
    }
}

impl fmt::Display for AutomationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enabled state of one automation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationState {
    #[serde(rename = "type")]
    pub kind: AutomationType,
    pub active: bool,
}

/// Topology-side data the network characteristics step reads and writes.
pub trait NetworkModel {
    /// Connected flag of a terminal's node; `None` when the node is unknown.
    fn terminal_connected(&self, ue: &str) -> Option<bool>;

    /// Last modeled characteristics of a terminal.
    fn terminal_net_char(&self, ue: &str) -> Option<NetChar>;

    /// Record newly modeled characteristics of a terminal.
    fn set_terminal_net_char(&mut self, ue: &str, net_char: NetChar);

    /// Maximum characteristics offered by a POA.
    fn poa_net_char(&self, poa: &str) -> Option<NetChar>;
}

/// What the automation observed about one terminal on previous ticks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UeSnapshot {
    /// A mobility event has been emitted at least once.
    pub mobility_armed: bool,
    /// Serving POA at the last mobility event.
    pub poa: String,
    pub connected: bool,
    /// An in-range event has been emitted at least once.
    pub range_armed: bool,
    /// Sorted in-range set at the last in-range event.
    pub poas_in_range: Vec<String>,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Terminals moved by the movement step.
    pub moved: usize,
    /// Events to deliver, in emission order.
    pub events: Vec<Event>,
    /// Cache delta published after the tick, if a sync ran.
    pub sync: Option<SyncReport>,
}

/// Automation flags and per-terminal observation state.
#[derive(Debug, Default)]
pub struct Automation {
    flags: BTreeMap<AutomationType, bool>,
    last_tick: Option<Instant>,
    snapshots: HashMap<String, UeSnapshot>,
}

impl Automation {
    pub fn new() -> Self {
        Self {
            flags: AutomationType::all().into_iter().map(|t| (t, false)).collect(),
            last_tick: None,
            snapshots: HashMap::new(),
        }
    }

    pub fn is_enabled(&self, kind: AutomationType) -> bool {
        self.flags.get(&kind).copied().unwrap_or(false)
    }

    /// Whether any automation is enabled, i.e. the scheduler should run.
    pub fn any_enabled(&self) -> bool {
        self.flags.values().any(|on| *on)
    }

    /// States of every automation type, in a fixed order.
    pub fn states(&self) -> Vec<AutomationState> {
        AutomationType::all()
            .into_iter()
            .map(|kind| AutomationState {
                kind,
                active: self.is_enabled(kind),
            })
            .collect()
    }

    pub fn snapshot(&self, ue: &str) -> Option<&UeSnapshot> {
        self.snapshots.get(ue)
    }

    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Enable or disable one automation type.
    ///
    /// Turning network characteristics off drives every terminal back to
    /// baseline first; the returned events report that reset.
    pub fn set(
        &mut self,
        kind: AutomationType,
        run: bool,
        assets: &AssetManager,
        network: &mut dyn NetworkModel,
        now: Instant,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        match kind {
            AutomationType::Movement => {
                self.last_tick = run.then_some(now);
            }
            AutomationType::NetCharUpdate if !run && self.is_enabled(kind) => {
                events = reset_net_char(&assets.get_all_ue()?, network);
            }
            _ => {}
        }
        self.flags.insert(kind, run);
        info!("Automation {} {}", kind, if run { "enabled" } else { "disabled" });
        Ok(events)
    }

    /// Disable everything and forget every snapshot.
    pub fn reset(
        &mut self,
        assets: &AssetManager,
        network: &mut dyn NetworkModel,
        now: Instant,
    ) -> Result<Vec<Event>> {
        let mut events = Vec::new();
        for kind in AutomationType::all() {
            events.extend(self.set(kind, false, assets, network, now)?);
        }
        self.snapshots.clear();
        Ok(events)
    }

    /// Run one tick at `now`.
    ///
    /// Errors reading the store abort the tick before any flag or snapshot
    /// changes; the next tick retries.
    pub fn run_tick(
        &mut self,
        assets: &AssetManager,
        network: &mut dyn NetworkModel,
        now: Instant,
    ) -> Result<TickReport> {
        let mut report = TickReport::default();

        if self.is_enabled(AutomationType::Movement) {
            let elapsed = self
                .last_tick
                .map_or(0.0, |t| now.saturating_duration_since(t).as_secs_f64());
            report.moved = assets.advance_all(elapsed)?;
            self.last_tick = Some(now);
        }

        let ues = assets.get_all_ue()?;
        let poas = assets.get_all_poa()?;

        if self.is_enabled(AutomationType::Mobility) {
            self.detect_mobility(&ues, &mut report.events);
        }
        if self.is_enabled(AutomationType::PoasInRange) {
            self.detect_poas_in_range(&ues, &mut report.events);
        }
        if self.is_enabled(AutomationType::NetCharUpdate) {
            update_net_char(&ues, &poas, network, &mut report.events);
        }

        self.snapshots.retain(|name, _| ues.contains_key(name));

        debug!(
            "Tick: {} moved, {} events",
            report.moved,
            report.events.len()
        );
        Ok(report)
    }

    fn detect_mobility(&mut self, ues: &BTreeMap<String, Ue>, events: &mut Vec<Event>) {
        for ue in ues.values() {
            let snap = self.snapshots.entry(ue.name.clone()).or_default();
            let serving = !ue.poa.is_empty();
            let changed = !snap.mobility_armed
                || (serving && (!snap.connected || ue.poa != snap.poa))
                || (!serving && snap.connected);
            if !changed {
                continue;
            }
            let dest = if serving { ue.poa.clone() } else { DISCONNECTED.to_string() };
            events.push(Event::Mobility {
                ue: ue.name.clone(),
                dest,
            });
            snap.mobility_armed = true;
            snap.poa = ue.poa.clone();
            snap.connected = serving;
        }
    }

    fn detect_poas_in_range(&mut self, ues: &BTreeMap<String, Ue>, events: &mut Vec<Event>) {
        for ue in ues.values() {
            let snap = self.snapshots.entry(ue.name.clone()).or_default();
            let mut current = ue.poa_in_range.clone();
            current.sort();
            if snap.range_armed && snap.poas_in_range == current {
                continue;
            }
            events.push(Event::PoasInRange {
                ue: ue.name.clone(),
                poas: ue.poa_in_range.clone(),
            });
            snap.range_armed = true;
            snap.poas_in_range = current;
        }
    }
}

fn update_net_char(
    ues: &BTreeMap<String, Ue>,
    poas: &BTreeMap<String, Poa>,
    network: &mut dyn NetworkModel,
    events: &mut Vec<Event>,
) {
    for ue in ues.values() {
        // Unknown or disconnected terminal nodes are left alone
        if network.terminal_connected(&ue.name) != Some(true) {
            continue;
        }
        let mut net_char = network.terminal_net_char(&ue.name).unwrap_or_default();
        let mut changed = false;
        let mut disconnected = false;

        match (poas.get(&ue.poa), ue.measurements.get(&ue.poa)) {
            (Some(poa), Some(meas)) => {
                let max = network.poa_net_char(&poa.name).unwrap_or_default();
                let (ul, dl) = calculate_throughput(
                    poa.radius,
                    meas.distance,
                    max.throughput_ul,
                    max.throughput_dl,
                );
                if ul == 0 || dl == 0 {
                    disconnected = true;
                } else if ul != net_char.throughput_ul || dl != net_char.throughput_dl {
                    net_char = NetChar::new(ul, dl, 0.0);
                    changed = true;
                }
            }
            _ => disconnected = true,
        }

        if disconnected && net_char.packet_loss != NetChar::DISCONNECTED.packet_loss {
            net_char = NetChar::DISCONNECTED;
            changed = true;
        }

        if changed {
            network.set_terminal_net_char(&ue.name, net_char);
            events.push(Event::NetCharUpdate {
                element_name: ue.name.clone(),
                element_type: UE_ELEMENT_TYPE.to_string(),
                net_char,
            });
        }
    }
}

/// Drive every terminal's modeled characteristics back to baseline.
pub fn reset_net_char(ues: &BTreeMap<String, Ue>, network: &mut dyn NetworkModel) -> Vec<Event> {
    let mut events = Vec::new();
    for name in ues.keys() {
        let Some(current) = network.terminal_net_char(name) else {
            continue;
        };
        if current.is_baseline() {
            continue;
        }
        network.set_terminal_net_char(name, NetChar::BASELINE);
        events.push(Event::NetCharUpdate {
            element_name: name.clone(),
            element_type: UE_ELEMENT_TYPE.to_string(),
            net_char: NetChar::BASELINE,
        });
    }
    events
}

/// Modeled throughput at `distance` from a POA of the given `radius`.
///
/// The coverage disc is split into bands of a quarter radius; each band away
/// from the POA removes a quarter of the maximum. A connected value never
/// drops below 1. Out of range yields `(0, 0)`; radius 0 never attenuates.
pub fn calculate_throughput(radius: f64, distance: f64, max_ul: i32, max_dl: i32) -> (i32, i32) {
    if radius == 0.0 {
        return (max_ul, max_dl);
    }
    if distance >= radius {
        return (0, 0);
    }
    let step = (distance / (radius * STEP_INCREMENT)).floor();
    let fraction = 1.0 - STEP_INCREMENT * step;
    let scale = |max: i32| ((f64::from(max) * fraction) as i32).max(1);
    (scale(max_ul), scale(max_dl))
}
