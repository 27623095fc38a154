//! Terminal movement along declared paths.
//!
//! The traversal fraction grows by `increment * elapsed` per call. In loop mode it
//! wraps at 1. In reverse mode it runs over `[0, 2)`: the first half walks the path
//! forward, the second half walks it back.

use tracing::{debug, trace};

use crate::error::Result;
use crate::selection;
use crate::store::{SpatialStore, Ue};
use crate::types::PathMode;

/// Fractions produced by one advance step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Fraction of the path length at which the terminal now sits, in `[0, 1]`.
    pub effective: f64,
    /// Fraction to persist for the next step.
    pub persisted: f64,
}

/// Advance a traversal fraction by `elapsed` seconds.
pub fn advance_fraction(mode: PathMode, fraction: f64, increment: f64, elapsed: f64) -> Step {
    let raw = fraction + increment * elapsed;
    match mode {
        PathMode::Loop => {
            let wrapped = raw.rem_euclid(1.0);
            Step {
                effective: wrapped,
                persisted: wrapped,
            }
        }
        PathMode::Reverse => {
            let persisted = raw.rem_euclid(2.0);
            let effective = if persisted > 1.0 {
                2.0 - persisted
            } else {
                persisted
            };
            Step {
                effective,
                persisted,
            }
        }
    }
}

/// Move one terminal by `elapsed` seconds, then refresh its selection.
///
/// Returns `false` when the terminal has no path or no velocity.
pub fn advance_ue_position(store: &SpatialStore, name: &str, elapsed: f64) -> Result<bool> {
    let ue = store.get_ue(name)?;
    if !move_ue(store, &ue, elapsed)? {
        return Ok(false);
    }
    selection::refresh_ue(store, name)?;
    Ok(true)
}

/// Move every mobile terminal by `elapsed` seconds, then refresh all selections.
///
/// Returns the number of terminals moved.
pub fn advance_all(store: &SpatialStore, elapsed: f64) -> Result<usize> {
    let mut moved = 0;
    for ue in store.get_all_ue()?.values() {
        if move_ue(store, ue, elapsed)? {
            moved += 1;
        }
    }
    if moved > 0 {
        selection::refresh_all(store)?;
    }
    debug!("Advanced {} UEs by {:.3}s", moved, elapsed);
    Ok(moved)
}

fn move_ue(store: &SpatialStore, ue: &Ue, elapsed: f64) -> Result<bool> {
    if !ue.is_mobile() || elapsed <= 0.0 {
        return Ok(false);
    }
    let step = advance_fraction(ue.path_mode, ue.path_fraction, ue.path_increment, elapsed);
    let Some(position) = store.interpolate_path(&ue.name, step.effective)? else {
        return Ok(false);
    };
    store.set_ue_position(&ue.name, &position, step.persisted)?;
    trace!(
        "UE {} at fraction {:.5} ({:.6}, {:.6})",
        ue.name,
        step.effective,
        position.lon(),
        position.lat()
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_wraps() {
        let step = advance_fraction(PathMode::Loop, 0.9, 0.05, 4.0);
        assert!((step.effective - 0.1).abs() < 1e-9);
        assert!((step.persisted - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_loop_round_trip() {
        let increment = 5.0 / 200.994;
        let step = advance_fraction(PathMode::Loop, 0.25, increment, 200.994 / 5.0);
        assert!((step.effective - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_reverse_bounces() {
        // Forward leg
        let step = advance_fraction(PathMode::Reverse, 0.0, 0.1, 7.0);
        assert!((step.effective - 0.7).abs() < 1e-9);

        // Past the end: walking back
        let step = advance_fraction(PathMode::Reverse, step.persisted, 0.1, 6.0);
        assert!((step.persisted - 1.3).abs() < 1e-9);
        assert!((step.effective - 0.7).abs() < 1e-9);

        // Back at the start after a full cycle
        let step = advance_fraction(PathMode::Reverse, step.persisted, 0.1, 7.0);
        assert!(step.effective.abs() < 1e-9);
    }

    #[test]
    fn test_reverse_symmetry() {
        let start = 0.3;
        let once = advance_fraction(PathMode::Reverse, start, 0.1, 7.0);
        let twice = advance_fraction(PathMode::Reverse, once.persisted, 0.1, 7.0);
        assert!((once.effective - 1.0).abs() < 1e-9);
        assert!((twice.effective - start).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_is_identity() {
        let step = advance_fraction(PathMode::Reverse, 1.4, 0.1, 0.0);
        assert!((step.persisted - 1.4).abs() < 1e-9);
        assert!((step.effective - 0.6).abs() < 1e-9);
    }
}
