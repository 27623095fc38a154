//! Spatial store and POA selection tests.
//!
//! Covers:
//! - Geodesic distances against known fixtures
//! - Serving POA selection as coverage and technologies change
//! - Cellular power queries
//! - Disconnection when the last POA goes away

use gis_engine::assets::AssetManager;
use gis_engine::geo::{LineString, Point};
use gis_engine::store::{PoaData, UeData};
use gis_engine::types::{AssetId, PathMode, PoaSubtype};

fn point1() -> Point {
    Point::new(7.418522, 43.734198)
}
fn point2() -> Point {
    Point::new(7.418536, 43.733866)
}
fn point3() -> Point {
    Point::new(7.418578, 43.733701)
}
fn point4() -> Point {
    Point::new(7.418711, 43.733306)
}
fn point5() -> Point {
    Point::new(7.417135, 43.731531)
}

fn poa(subtype: PoaSubtype, position: Point, radius: f64) -> PoaData {
    PoaData {
        subtype: Some(subtype),
        position: Some(position),
        radius: Some(radius),
    }
}

fn ue_at(position: Point) -> UeData {
    UeData {
        position: Some(position),
        ..Default::default()
    }
}

/// poa1 (4G), poa2 (generic) and poa3 (4G) around point1.
fn monaco() -> AssetManager {
    let assets = AssetManager::in_memory().unwrap();
    assets
        .create_poa(
            &AssetId::generate(),
            "poa1",
            poa(PoaSubtype::Cell4g, Point::new(7.418494, 43.733449), 160.0),
        )
        .unwrap();
    assets
        .create_poa(
            &AssetId::generate(),
            "poa2",
            poa(PoaSubtype::Generic, Point::new(7.421626, 43.736983), 350.0),
        )
        .unwrap();
    assets
        .create_poa(
            &AssetId::generate(),
            "poa3",
            poa(PoaSubtype::Cell4g, Point::new(7.422239, 43.732972), 220.0),
        )
        .unwrap();
    assets
}

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected} +/- {tolerance}, got {actual}"
    );
}

// ============================================================================
// Distance Tests
// ============================================================================

#[test]
fn test_fixture_distances() {
    let assets = monaco();
    let poa1 = assets.get_poa("poa1").unwrap();
    let poa2 = assets.get_poa("poa2").unwrap();
    let poa3 = assets.get_poa("poa3").unwrap();

    assert_close(
        assets.distance(&point1(), &poa1.position).unwrap(),
        83.2497,
        0.01,
    );
    assert_close(
        assets.distance(&poa2.position, &point1()).unwrap(),
        397.8,
        0.5,
    );
    assert_close(
        assets.distance(&poa3.position, &point1()).unwrap(),
        329.0,
        0.5,
    );
}

#[test]
fn test_within_is_inclusive() {
    let assets = monaco();
    let poa1 = assets.get_poa("poa1").unwrap().position;
    let d = assets.distance(&point1(), &poa1).unwrap();

    assert!(assets.within(&point1(), &poa1, d).unwrap());
    assert!(assets.within(&point1(), &poa1, d + 1.0).unwrap());
    assert!(!assets.within(&point1(), &poa1, d - 1.0).unwrap());
}

#[test]
fn test_path_length_and_increment() {
    let assets = monaco();
    let path = LineString::new(&[point1(), point2(), point3(), point4(), point1()]);
    assets
        .create_ue(
            &AssetId::new("ue1-id"),
            "ue1",
            UeData {
                position: Some(point1()),
                path: Some(path),
                mode: Some(PathMode::Loop),
                velocity: Some(5.0),
                ..Default::default()
            },
        )
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_close(ue.path_length, 200.9938, 0.01);
    assert_close(ue.path_increment, 0.024876, 1e-5);
    assert_eq!(ue.path_fraction, 0.0);
    assert!(ue.is_mobile());
}

// ============================================================================
// Selection Tests
// ============================================================================

#[test]
fn test_terminal_served_by_nearest_supported_poa() {
    let assets = monaco();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point1()))
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "poa1");
    assert_close(ue.poa_distance, 83.2497, 0.01);
    assert_eq!(ue.poa_in_range, vec!["poa1"]);

    // Only in-range measurements are reported
    assert_eq!(ue.measurements.len(), 1);
    let meas = &ue.measurements["poa1"];
    assert!(meas.in_range);
    assert_eq!(meas.rsrp, 54.0);
    assert_eq!(meas.rsrq, 12.0);
}

#[test]
fn test_coverage_change_reselects() {
    let assets = monaco();
    assets
        .update_poa(
            "poa1",
            PoaData {
                radius: Some(50.0),
                ..Default::default()
            },
        )
        .unwrap();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point1()))
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "");
    assert!(ue.poa_in_range.is_empty());
    assert_eq!(ue.poa_distance, 0.0);

    // Widening the radius brings poa1 back into range
    assets
        .update_poa(
            "poa1",
            PoaData {
                radius: Some(160.0),
                ..Default::default()
            },
        )
        .unwrap();
    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "poa1");
    assert_eq!(ue.poa_in_range, vec!["poa1"]);
}

#[test]
fn test_higher_technology_takes_over() {
    let assets = monaco();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point1()))
        .unwrap();
    assert_eq!(assets.get_ue("ue1").unwrap().poa, "poa1");

    assets
        .create_poa(
            &AssetId::generate(),
            "wifi1",
            poa(PoaSubtype::Wifi, point2(), 100.0),
        )
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "wifi1");
    assert_eq!(ue.poa_in_range, vec!["poa1", "wifi1"]);
}

#[test]
fn test_unsupported_technology_leaves_terminal_disconnected() {
    let assets = monaco();
    assets
        .create_ue(
            &AssetId::generate(),
            "ue1",
            UeData {
                position: Some(point1()),
                priority: Some(vec!["wifi".into()]),
                ..Default::default()
            },
        )
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "");
    assert_eq!(ue.poa_in_range, vec!["poa1"]);
}

#[test]
fn test_unlimited_radius_always_in_range() {
    let assets = AssetManager::in_memory().unwrap();
    assets
        .create_poa(
            &AssetId::generate(),
            "far",
            poa(PoaSubtype::Cell5g, Point::new(2.3522, 48.8566), 0.0),
        )
        .unwrap();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point1()))
        .unwrap();

    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "far");
    assert!(ue.poa_distance > 600_000.0);
}

#[test]
fn test_deleting_all_poas_disconnects() {
    let assets = monaco();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point1()))
        .unwrap();
    assets
        .create_ue(&AssetId::generate(), "ue2", ue_at(point3()))
        .unwrap();
    assert_eq!(assets.get_ue("ue2").unwrap().poa, "poa1");

    assets.delete_all_poa().unwrap();

    for ue in assets.get_all_ue().unwrap().values() {
        assert_eq!(ue.poa, "", "{} still attached", ue.name);
        assert!(ue.poa_in_range.is_empty());
        assert!(ue.measurements.is_empty());
    }
}

#[test]
fn test_deleting_serving_poa_reselects() {
    let assets = monaco();
    assets
        .create_ue(&AssetId::generate(), "ue1", ue_at(point2()))
        .unwrap();
    assert_eq!(assets.get_ue("ue1").unwrap().poa, "poa1");

    // Same technology and closer, but the serving POA is kept
    assets
        .create_poa(
            &AssetId::generate(),
            "poa4",
            poa(PoaSubtype::Cell4g, point2(), 200.0),
        )
        .unwrap();
    let ue = assets.get_ue("ue1").unwrap();
    assert_eq!(ue.poa, "poa1");
    assert_eq!(ue.poa_in_range, vec!["poa1", "poa4"]);

    assets.delete_poa("poa1").unwrap();
    assert_eq!(assets.get_ue("ue1").unwrap().poa, "poa4");
}

// ============================================================================
// Cellular Power Tests
// ============================================================================

#[test]
fn test_cellular_power_at_coordinates() {
    let assets = monaco();
    let power = assets
        .cellular_power(&[point1(), point2(), point5()])
        .unwrap();
    assert_eq!(power.len(), 3);

    assert_eq!(power[0].poa_name, "poa1");
    assert_eq!((power[0].rsrp, power[0].rsrq), (54, 12));
    assert_close(power[0].longitude, 7.418522, 1e-9);
    assert_close(power[0].latitude, 43.734198, 1e-9);

    assert_eq!(power[1].poa_name, "poa1");
    assert_eq!((power[1].rsrp, power[1].rsrq), (61, 19));

    // Outside every cellular POA
    assert_eq!(power[2].poa_name, "");
    assert_eq!((power[2].rsrp, power[2].rsrq), (0, 0));
}

#[test]
fn test_cellular_power_ignores_non_cellular() {
    let assets = AssetManager::in_memory().unwrap();
    assets
        .create_poa(
            &AssetId::generate(),
            "wifi1",
            poa(PoaSubtype::Wifi, point1(), 100.0),
        )
        .unwrap();

    let power = assets.cellular_power(&[point1()]).unwrap();
    assert_eq!(power[0].poa_name, "");
    assert_eq!(power[0].rsrp, 0);
}
