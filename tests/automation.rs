//! Automation tests against a running engine.
//!
//! Ticks are driven by hand; the periodic task is configured with a period
//! long enough to never fire during a test.

use std::sync::Arc;
use std::time::Duration;

use gis_engine::automation::AutomationType;
use gis_engine::cache::MemoryCache;
use gis_engine::config::Config;
use gis_engine::engine::{Engine, GeoDataAsset, Scenario};
use gis_engine::events::Event;
use gis_engine::store::SpatialStore;
use gis_engine::types::NetChar;
use gis_engine::Error;

const MONACO: &str = include_str!("fixtures/monaco.json");

fn engine() -> Arc<Engine> {
    let mut config = Config::default();
    config.automation.tick_interval = Duration::from_secs(3600);
    let engine = Engine::with_parts(
        SpatialStore::in_memory().unwrap(),
        Arc::new(MemoryCache::new()),
        &config,
    );
    engine
        .activate(Scenario::from_json(MONACO).unwrap())
        .unwrap();
    engine
}

fn set_radius(engine: &Engine, poa: &str, radius: f64) {
    engine
        .set_geodata(
            poa,
            GeoDataAsset {
                asset_name: poa.to_string(),
                radius: Some(radius),
                ..Default::default()
            },
        )
        .unwrap();
}

fn mobility(ue: &str, dest: &str) -> Event {
    Event::Mobility {
        ue: ue.to_string(),
        dest: dest.to_string(),
    }
}

fn ue_net_char(engine: &Engine, ue: &str) -> Option<NetChar> {
    engine.scenario()?.node(ue)?.net_char
}

// ============================================================================
// Automation State
// ============================================================================

#[test]
fn test_all_types_start_disabled() {
    let engine = engine();
    let states = engine.automation_states();
    assert_eq!(states.len(), 4);
    assert!(states.iter().all(|s| !s.active));
    assert!(!engine.is_automation_running());
}

#[test]
fn test_enable_and_disable() {
    let engine = engine();
    engine
        .set_automation(AutomationType::Mobility, true)
        .unwrap();
    assert!(engine.automation_state(AutomationType::Mobility).active);
    assert!(!engine.automation_state(AutomationType::Movement).active);

    engine
        .set_automation(AutomationType::Mobility, false)
        .unwrap();
    assert!(!engine.automation_state(AutomationType::Mobility).active);
}

#[tokio::test]
async fn test_scheduler_follows_enabled_types() {
    let engine = engine();
    engine
        .set_automation(AutomationType::Movement, true)
        .unwrap();
    engine
        .set_automation(AutomationType::Mobility, true)
        .unwrap();
    assert!(engine.is_automation_running());

    engine
        .set_automation(AutomationType::Movement, false)
        .unwrap();
    assert!(engine.is_automation_running());

    engine
        .set_automation(AutomationType::Mobility, false)
        .unwrap();
    assert!(!engine.is_automation_running());
}

#[test]
fn test_unknown_type_rejected() {
    let err = "TELEPORT".parse::<AutomationType>().unwrap_err();
    assert!(Error::from(err).is_validation());
}

// ============================================================================
// Movement
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_movement_uses_elapsed_time() {
    let engine = engine();
    engine
        .set_automation(AutomationType::Movement, true)
        .unwrap();

    tokio::time::advance(Duration::from_secs(25)).await;
    let report = engine.tick().unwrap();
    assert_eq!(report.moved, 1);

    let ue = engine.assets().get_ue("ue1").unwrap();
    assert!((ue.path_fraction - 0.6219).abs() < 1e-3);

    // A stationary terminal never moves
    let ue2 = engine.assets().get_ue("ue2").unwrap();
    assert_eq!(ue2.path_fraction, 0.0);

    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_movement_disabled_does_not_move() {
    let engine = engine();
    engine
        .set_automation(AutomationType::Mobility, true)
        .unwrap();

    tokio::time::advance(Duration::from_secs(25)).await;
    let report = engine.tick().unwrap();
    assert_eq!(report.moved, 0);
    assert_eq!(engine.assets().get_ue("ue1").unwrap().path_fraction, 0.0);

    engine.shutdown();
}

// ============================================================================
// Mobility Events
// ============================================================================

#[test]
fn test_mobility_events() {
    let engine = engine();
    engine
        .set_automation(AutomationType::Mobility, true)
        .unwrap();

    // First tick reports every terminal
    let report = engine.tick().unwrap();
    assert_eq!(
        report.events,
        vec![mobility("ue1", "poa1"), mobility("ue2", "DISCONNECTED")]
    );

    // Nothing changed
    assert!(engine.tick().unwrap().events.is_empty());

    // ue1 loses coverage
    set_radius(&engine, "poa1", 50.0);
    let report = engine.tick().unwrap();
    assert_eq!(report.events, vec![mobility("ue1", "DISCONNECTED")]);

    // and gets it back
    set_radius(&engine, "poa1", 160.0);
    let report = engine.tick().unwrap();
    assert_eq!(report.events, vec![mobility("ue1", "poa1")]);
}

#[tokio::test]
async fn test_events_reach_subscribers() {
    let engine = engine();
    let mut rx = engine.subscribe();
    engine
        .set_automation(AutomationType::Mobility, true)
        .unwrap();

    engine.tick().unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let second = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, mobility("ue1", "poa1"));
    assert_eq!(second, mobility("ue2", "DISCONNECTED"));

    engine.shutdown();
}

// ============================================================================
// POAs In Range Events
// ============================================================================

#[test]
fn test_poas_in_range_events() {
    let engine = engine();
    engine
        .set_automation(AutomationType::PoasInRange, true)
        .unwrap();

    let report = engine.tick().unwrap();
    assert_eq!(
        report.events,
        vec![
            Event::PoasInRange {
                ue: "ue1".into(),
                poas: vec!["poa1".into()],
            },
            Event::PoasInRange {
                ue: "ue2".into(),
                poas: vec![],
            },
        ]
    );
    assert!(engine.tick().unwrap().events.is_empty());

    // poa3 now reaches ue1 (329 m away) but not ue2
    set_radius(&engine, "poa3", 400.0);
    let report = engine.tick().unwrap();
    assert_eq!(
        report.events,
        vec![Event::PoasInRange {
            ue: "ue1".into(),
            poas: vec!["poa1".into(), "poa3".into()],
        }]
    );
}

// ============================================================================
// Network Characteristics
// ============================================================================

#[test]
fn test_net_char_follows_distance() {
    let engine = engine();
    engine
        .set_automation(AutomationType::NetCharUpdate, true)
        .unwrap();

    let report = engine.tick().unwrap();
    assert_eq!(report.events.len(), 2);
    assert_eq!(
        ue_net_char(&engine, "ue1"),
        Some(NetChar::new(500, 500, 0.0))
    );
    assert_eq!(ue_net_char(&engine, "ue2"), Some(NetChar::DISCONNECTED));

    match &report.events[0] {
        Event::NetCharUpdate {
            element_name,
            element_type,
            net_char,
        } => {
            assert_eq!(element_name, "ue1");
            assert_eq!(element_type, "UE");
            assert_eq!(*net_char, NetChar::new(500, 500, 0.0));
        }
        other => panic!("unexpected event {other:?}"),
    }

    // Steady state
    assert!(engine.tick().unwrap().events.is_empty());

    // Out of range: disconnected characteristics, reported once
    set_radius(&engine, "poa1", 50.0);
    let report = engine.tick().unwrap();
    assert_eq!(report.events.len(), 1);
    assert_eq!(ue_net_char(&engine, "ue1"), Some(NetChar::DISCONNECTED));
    assert!(engine.tick().unwrap().events.is_empty());
}

#[test]
fn test_disabling_net_char_restores_baseline() {
    let engine = engine();
    engine
        .set_automation(AutomationType::NetCharUpdate, true)
        .unwrap();
    engine.tick().unwrap();
    assert_ne!(ue_net_char(&engine, "ue1"), Some(NetChar::BASELINE));

    engine
        .set_automation(AutomationType::NetCharUpdate, false)
        .unwrap();
    assert_eq!(ue_net_char(&engine, "ue1"), Some(NetChar::BASELINE));
    assert_eq!(ue_net_char(&engine, "ue2"), Some(NetChar::BASELINE));
}

#[test]
fn test_disconnected_node_is_skipped() {
    let mut scenario = Scenario::from_json(MONACO).unwrap();
    if let Some(node) = scenario.nodes.iter_mut().find(|n| n.name == "ue1") {
        node.connected = false;
    }
    let engine = engine();
    engine.activate(scenario).unwrap();
    engine
        .set_automation(AutomationType::NetCharUpdate, true)
        .unwrap();

    let report = engine.tick().unwrap();
    assert!(report.events.iter().all(|e| e.subject() != "ue1"));
    assert_eq!(ue_net_char(&engine, "ue1"), None);
}

// ============================================================================
// Scenario Lifecycle
// ============================================================================

#[test]
fn test_terminate_resets_automation() {
    let engine = engine();
    for kind in AutomationType::all() {
        engine.set_automation(kind, true).unwrap();
    }
    engine.tick().unwrap();

    engine.terminate().unwrap();

    assert!(engine.scenario_name().is_none());
    assert!(engine.automation_states().iter().all(|s| !s.active));
    assert!(engine.assets().get_all_ue().unwrap().is_empty());
    assert!(engine.assets().get_all_poa().unwrap().is_empty());
    assert!(engine.assets().get_all_compute().unwrap().is_empty());
}

#[test]
fn test_activate_replaces_active_scenario() {
    let engine = engine();
    let mut other = Scenario::from_json(MONACO).unwrap();
    other.name = "monaco-2".into();
    other.nodes.retain(|n| n.name.starts_with("poa"));

    engine.activate(other).unwrap();

    assert_eq!(engine.scenario_name().as_deref(), Some("monaco-2"));
    assert!(engine.assets().get_all_ue().unwrap().is_empty());
    assert_eq!(engine.assets().get_all_poa().unwrap().len(), 3);
}

#[test]
fn test_update_adds_and_removes() {
    let engine = engine();
    let mut updated = Scenario::from_json(MONACO).unwrap();
    updated.nodes.retain(|n| n.name != "ue2");
    if let Some(node) = updated.nodes.iter_mut().find(|n| n.name == "ue1") {
        // Geo data of allocated assets is left alone
        node.geo_data = None;
    }

    engine.update(updated).unwrap();

    let ues = engine.assets().get_all_ue().unwrap();
    assert!(ues.contains_key("ue1"));
    assert!(!ues.contains_key("ue2"));
}

#[test]
fn test_update_without_scenario() {
    let engine = engine();
    engine.terminate().unwrap();
    let err = engine
        .update(Scenario::from_json(MONACO).unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::NoActiveScenario));
}
