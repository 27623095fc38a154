//! Point-of-attachment selection.
//!
//! Each refresh recomputes, for every terminal, the distance and in-range flag
//! against every POA, then picks the serving POA:
//!
//! 1. The current serving POA is kept if it is still in range and its technology
//!    appears in the terminal's priority list.
//! 2. Every in-range candidate then replaces the selection when nothing is selected,
//!    when its technology ranks strictly higher than the selection's, or when the
//!    ranks tie, the candidate outranks the currently-serving technology, and the
//!    candidate is closer than the selection.
//!
//! A technology missing from the priority list is never selected, so a terminal may
//! have POAs in range and still be disconnected.

pub mod power;

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::store::{Measurement, PoaMatrixRow, SpatialStore};
use crate::types::PoaSubtype;

pub use power::{calculate_power, cellular_power, CoordinatePower, RadioPower};

/// Priority rank of a technology in a terminal's list; `-1` when unsupported.
///
/// The first entry ranks highest (`len`), the last ranks `1`.
pub fn priority(list: &[String], subtype: PoaSubtype) -> i32 {
    list.iter()
        .position(|t| t == subtype.priority_token())
        .map_or(-1, |i| (list.len() - i) as i32)
}

/// A POA considered for one terminal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub name: &'a str,
    pub subtype: PoaSubtype,
    pub distance: f64,
    pub in_range: bool,
}

/// Outcome of selection for one terminal.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Selection {
    /// Serving POA, empty when disconnected.
    pub poa: String,
    /// Distance to the serving POA, 0 when disconnected.
    pub distance: f64,
    /// All in-range POA names in candidate order.
    pub in_range: Vec<String>,
}

/// Pick the serving POA among `candidates`.
pub fn select_poa(priorities: &[String], current: &str, candidates: &[Candidate<'_>]) -> Selection {
    let in_range: Vec<&Candidate<'_>> = candidates.iter().filter(|c| c.in_range).collect();
    let names = in_range.iter().map(|c| c.name.to_string()).collect();

    let mut selected: Option<&Candidate<'_>> = in_range
        .iter()
        .copied()
        .find(|c| c.name == current && priority(priorities, c.subtype) >= 0);

    // Serving technology counts only while the serving POA stays selectable
    let current_prio = selected.map_or(-1, |c| priority(priorities, c.subtype));

    for cand in in_range.iter().copied() {
        let prio = priority(priorities, cand.subtype);
        if prio < 0 {
            continue;
        }
        let replace = match selected {
            None => true,
            Some(sel) => {
                let sel_prio = priority(priorities, sel.subtype);
                prio > sel_prio
                    || (prio == sel_prio && prio > current_prio && cand.distance < sel.distance)
            }
        };
        if replace {
            selected = Some(cand);
        }
    }

    match selected {
        Some(sel) => Selection {
            poa: sel.name.to_string(),
            distance: sel.distance,
            in_range: names,
        },
        None => Selection {
            in_range: names,
            ..Default::default()
        },
    }
}

/// Recompute measurements and selection for one terminal.
pub fn refresh_ue(store: &SpatialStore, name: &str) -> Result<()> {
    refresh(store, Some(name))
}

/// Recompute measurements and selection for every terminal.
pub fn refresh_all(store: &SpatialStore) -> Result<()> {
    refresh(store, None)
}

fn refresh(store: &SpatialStore, ue: Option<&str>) -> Result<()> {
    // Without any POA every terminal is disconnected.
    if store.poa_count()? == 0 {
        match ue {
            Some(name) => store.set_ue_selection(name, "", 0.0, &[])?,
            None => store.reset_all_ue_selection()?,
        }
        return Ok(());
    }

    let matrix = store.poa_matrix(ue)?;
    let mut by_ue: BTreeMap<&str, Vec<&PoaMatrixRow>> = BTreeMap::new();
    for row in &matrix {
        by_ue.entry(row.ue.as_str()).or_default().push(row);
    }

    let mut measurements = Vec::with_capacity(matrix.len());
    for (name, rows) in &by_ue {
        let candidates: Vec<Candidate<'_>> = rows
            .iter()
            .map(|r| Candidate {
                name: &r.poa,
                subtype: r.subtype,
                distance: r.distance,
                in_range: r.in_range,
            })
            .collect();
        // Every row of a terminal carries the same terminal columns.
        let head = rows[0];
        let selection = select_poa(&head.poa_type_prio, &head.current_poa, &candidates);

        if selection.poa != head.current_poa {
            debug!(
                "UE {} serving POA {:?} -> {:?}",
                name, head.current_poa, selection.poa
            );
        }
        store.set_ue_selection(name, &selection.poa, selection.distance, &selection.in_range)?;

        measurements.extend(rows.iter().map(|r| {
            let power = calculate_power(r.subtype, r.radius, r.distance);
            Measurement {
                ue: r.ue.clone(),
                poa: r.poa.clone(),
                subtype: r.subtype,
                radius: r.radius,
                distance: r.distance,
                in_range: r.in_range,
                rssi: power.rssi,
                rsrp: power.rsrp,
                rsrq: power.rsrq,
            }
        }));
    }

    store.upsert_measurements(&measurements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prio(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|t| (*t).to_string()).collect()
    }

    fn cand(name: &str, subtype: PoaSubtype, distance: f64, in_range: bool) -> Candidate<'_> {
        Candidate {
            name,
            subtype,
            distance,
            in_range,
        }
    }

    #[test]
    fn test_priority_rank() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        assert_eq!(priority(&list, PoaSubtype::Wifi), 4);
        assert_eq!(priority(&list, PoaSubtype::Generic), 1);
        assert_eq!(priority(&prio(&["5g"]), PoaSubtype::Cell4g), -1);

        // d2d holds a rank but matches no POA technology
        let with_d2d = prio(&["d2d", "wifi", "4g"]);
        assert_eq!(priority(&with_d2d, PoaSubtype::Wifi), 2);
        assert_eq!(priority(&with_d2d, PoaSubtype::Cell4g), 1);
    }

    #[test]
    fn test_empty_range_disconnects() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        let cands = [cand("poa1", PoaSubtype::Cell4g, 200.0, false)];
        let sel = select_poa(&list, "poa1", &cands);
        assert_eq!(sel, Selection::default());
    }

    #[test]
    fn test_higher_technology_wins() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        let cands = [
            cand("cell", PoaSubtype::Cell4g, 10.0, true),
            cand("hotspot", PoaSubtype::Wifi, 80.0, true),
        ];
        let sel = select_poa(&list, "cell", &cands);
        assert_eq!(sel.poa, "hotspot");
        assert_eq!(sel.distance, 80.0);
        assert_eq!(sel.in_range, vec!["cell", "hotspot"]);
    }

    #[test]
    fn test_sticky_on_same_technology() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        let cands = [
            cand("near", PoaSubtype::Cell4g, 10.0, true),
            cand("serving", PoaSubtype::Cell4g, 90.0, true),
        ];
        let sel = select_poa(&list, "serving", &cands);
        assert_eq!(sel.poa, "serving");
    }

    #[test]
    fn test_closer_tie_when_upgrading_from_lower_technology() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        // Serving a 4G cell that dropped out of range, two WiFi candidates tie
        let cands = [
            cand("cell", PoaSubtype::Cell4g, 300.0, false),
            cand("wifi-far", PoaSubtype::Wifi, 60.0, true),
            cand("wifi-near", PoaSubtype::Wifi, 20.0, true),
        ];
        let sel = select_poa(&list, "cell", &cands);
        assert_eq!(sel.poa, "wifi-near");
    }

    #[test]
    fn test_closest_wins_after_leaving_higher_technology() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        // Walked out of the hotspot into two cells of the same technology
        let cands = [
            cand("cell-a", PoaSubtype::Cell4g, 100.0, true),
            cand("cell-b", PoaSubtype::Cell4g, 10.0, true),
            cand("hotspot", PoaSubtype::Wifi, 500.0, false),
        ];
        let sel = select_poa(&list, "hotspot", &cands);
        assert_eq!(sel.poa, "cell-b");
        assert_eq!(sel.distance, 10.0);
        assert_eq!(sel.in_range, vec!["cell-a", "cell-b"]);
    }

    #[test]
    fn test_in_range_but_unsupported() {
        let list = prio(&["5g"]);
        let cands = [cand("poa1", PoaSubtype::Cell4g, 10.0, true)];
        let sel = select_poa(&list, "", &cands);
        assert_eq!(sel.poa, "");
        assert_eq!(sel.distance, 0.0);
        assert_eq!(sel.in_range, vec!["poa1"]);
    }

    #[test]
    fn test_selection_is_idempotent() {
        let list = prio(&["wifi", "5g", "4g", "other"]);
        let cands = [
            cand("a", PoaSubtype::Cell5g, 40.0, true),
            cand("b", PoaSubtype::Cell5g, 30.0, true),
            cand("c", PoaSubtype::Generic, 5.0, true),
        ];
        let first = select_poa(&list, "", &cands);
        let second = select_poa(&list, &first.poa, &cands);
        assert_eq!(first, second);
    }
}
