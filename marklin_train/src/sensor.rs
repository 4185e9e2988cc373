//! Sensor acceptance, timeout, and blacklist synthesis (§4.9 scenario S4).
//! Grounded on `train2/train.h`'s `sensor_timeout_deadlines`/
//! `expected_arrival_times` pair and `train_is_sensor_blacklisted`.

use marklin_common::consts::{SENSOR_IDS_PER_BANK, SENSOR_TOLERANCE_BOUNDARY_TICKS, SENSOR_TOLERANCE_INTERIOR_TICKS};
use marklin_common::ids::{NodeIndex, Tick};
use marklin_topology::graph::{NodeType, TrackGraph};

use crate::motion::MotionState;

/// Map a track node's name to a physical sensor bank/id pair, under the
/// convention `"S{n}"` where `n = bank * 16 + (id - 1)`. Branch/Merge/Enter/
/// Exit nodes never match (they are not plain sensors).
pub fn node_to_sensor_addr(name: &str) -> Option<(u8, u8)> {
    let digits = name.strip_prefix('S')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: usize = digits.parse().ok()?;
    let bank = (n / SENSOR_IDS_PER_BANK) as u8;
    let id = (n % SENSOR_IDS_PER_BANK + 1) as u8;
    Some((bank, id))
}

/// Inverse of [`node_to_sensor_addr`].
pub fn sensor_addr_to_node_name(bank: u8, sensor_id: u8) -> heapless::String<16> {
    let n = bank as usize * SENSOR_IDS_PER_BANK + (sensor_id as usize - 1);
    let mut s = heapless::String::new();
    use core::fmt::Write;
    let _ = write!(s, "S{n}");
    s
}

/// Outcome of handing a sensor trigger to [`accept_trigger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// The trigger matched an expected slot within tolerance; the motion
    /// state's expectation for that slot has been cleared.
    Accepted { slot: usize },
    /// The trigger matched an expected node, but arrived badly outside the
    /// predicted arrival window — still accepted (the sensor is ground
    /// truth), but flagged for calibration review.
    AcceptedOutOfTolerance { slot: usize },
    /// The triggered node was not one of this train's expected sensors;
    /// likely another train or a spurious detector.
    Unexpected,
}

fn tolerance_for(graph: &TrackGraph, node: NodeIndex) -> u64 {
    match graph.node(node).node_type {
        NodeType::Branch | NodeType::Merge => SENSOR_TOLERANCE_BOUNDARY_TICKS,
        _ => SENSOR_TOLERANCE_INTERIOR_TICKS,
    }
}

/// Try to match a just-triggered node against `motion`'s expected sensors,
/// updating position and clearing the satisfied slot on a match.
pub fn accept_trigger(motion: &mut MotionState, graph: &TrackGraph, triggered: NodeIndex, now: Tick) -> Acceptance {
    for slot in 0..2 {
        if motion.expected_sensors[slot] != Some(triggered) {
            continue;
        }
        motion.position = crate::motion::Position { anchor: triggered, offset_mm: 0 };
        motion.last_position_update = now;

        let within_tolerance = motion.expected_arrival_tick[slot]
            .map(|eta| {
                let tolerance = tolerance_for(graph, triggered);
                now.since(eta).unwrap_or(0) <= tolerance && eta.since(now).unwrap_or(0) <= tolerance
            })
            .unwrap_or(true);

        motion.clear_expected_slot(slot);
        return if within_tolerance {
            Acceptance::Accepted { slot }
        } else {
            Acceptance::AcceptedOutOfTolerance { slot }
        };
    }
    Acceptance::Unexpected
}

/// Scenario S4: the next expected sensor (slot 0) is known unreliable and
/// will never physically trigger. Once the kinematic offset reaches where
/// it should have fired, snap position onto it and clear the slot exactly
/// as `accept_trigger` would, but without going through a real trigger (so
/// the caller must not publish a trigger event for it). `is_blacklisted`
/// answers for the node `accept_trigger` would have matched against.
pub fn synthesize_if_blacklisted(motion: &mut MotionState, is_blacklisted: impl FnOnce(NodeIndex) -> bool) -> Option<NodeIndex> {
    let node = motion.expected_sensors[0]?;
    if motion.position.offset_mm < motion.expected_distance_mm[0] as i32 {
        return None;
    }
    if !is_blacklisted(node) {
        return None;
    }
    motion.position = crate::motion::Position { anchor: node, offset_mm: 0 };
    motion.clear_expected_slot(0);
    Some(node)
}

/// Check whether any expected-sensor slot's deadline has passed without a
/// trigger, returning the slot index the first time it is detected (the
/// caller should then synthesize a stop/replan and mark the slot handled).
pub fn check_timeout(motion: &mut MotionState, now: Tick) -> Option<usize> {
    for slot in 0..2 {
        if motion.sensor_timeout_handled[slot] {
            continue;
        }
        let Some(deadline) = motion.sensor_deadline[slot] else { continue };
        if motion.expected_sensors[slot].is_some() && now >= deadline {
            motion.sensor_timeout_handled[slot] = true;
            return Some(slot);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_topology::layout;

    #[test]
    fn sensor_addr_round_trips_through_node_name() {
        let name = sensor_addr_to_node_name(2, 5);
        assert_eq!(name.as_str(), "S20");
        assert_eq!(node_to_sensor_addr("S20"), Some((2, 5)));
    }

    #[test]
    fn non_sensor_names_do_not_parse() {
        assert_eq!(node_to_sensor_addr("BR1"), None);
        assert_eq!(node_to_sensor_addr("EX1"), None);
    }

    #[test]
    fn accepted_trigger_clears_the_matching_slot() {
        let graph = layout::layout_a();
        let s1 = graph.find_by_name("S1").unwrap();
        let s2 = graph.find_by_name("S2").unwrap();
        let mut motion = MotionState::new(graph.find_by_name("S0").unwrap(), Tick(0));
        motion.set_expected_sensors(&[(s1, 100, 10), (s2, 200, 20)], Tick(0), 50);

        let result = accept_trigger(&mut motion, &graph, s1, Tick(10));
        assert_eq!(result, Acceptance::Accepted { slot: 0 });
        assert_eq!(motion.expected_sensors[0], Some(s2));
    }

    #[test]
    fn late_trigger_is_accepted_out_of_tolerance() {
        let graph = layout::layout_a();
        let s1 = graph.find_by_name("S1").unwrap();
        let mut motion = MotionState::new(graph.find_by_name("S0").unwrap(), Tick(0));
        motion.set_expected_sensors(&[(s1, 100, 10)], Tick(0), 50);

        let result = accept_trigger(&mut motion, &graph, s1, Tick(10_000));
        assert_eq!(result, Acceptance::AcceptedOutOfTolerance { slot: 0 });
    }

    #[test]
    fn unexpected_node_does_not_clear_any_slot() {
        let graph = layout::layout_a();
        let s1 = graph.find_by_name("S1").unwrap();
        let s4 = graph.find_by_name("S4").unwrap();
        let mut motion = MotionState::new(graph.find_by_name("S0").unwrap(), Tick(0));
        motion.set_expected_sensors(&[(s1, 100, 10)], Tick(0), 50);

        let result = accept_trigger(&mut motion, &graph, s4, Tick(5));
        assert_eq!(result, Acceptance::Unexpected);
        assert_eq!(motion.expected_sensors[0], Some(s1));
    }

    #[test]
    fn blacklisted_sensor_synthesizes_once_offset_reaches_it() {
        let graph = layout::layout_a();
        let s1 = graph.find_by_name("S1").unwrap();
        let mut motion = MotionState::new(graph.find_by_name("S0").unwrap(), Tick(0));
        motion.set_expected_sensors(&[(s1, 300, 10)], Tick(0), 50);

        motion.position.offset_mm = 299;
        assert_eq!(synthesize_if_blacklisted(&mut motion, |_| true), None);

        motion.position.offset_mm = 300;
        assert_eq!(synthesize_if_blacklisted(&mut motion, |_| false), None);
        assert_eq!(synthesize_if_blacklisted(&mut motion, |_| true), Some(s1));
        assert_eq!(motion.position, crate::motion::Position { anchor: s1, offset_mm: 0 });
        assert_eq!(motion.expected_sensors[0], None);
    }

    #[test]
    fn timeout_fires_once_past_deadline() {
        let graph = layout::layout_a();
        let s1 = graph.find_by_name("S1").unwrap();
        let mut motion = MotionState::new(graph.find_by_name("S0").unwrap(), Tick(0));
        motion.set_expected_sensors(&[(s1, 100, 10)], Tick(0), 50);

        assert_eq!(check_timeout(&mut motion, Tick(5)), None);
        assert_eq!(check_timeout(&mut motion, Tick(61)), Some(0));
        assert_eq!(check_timeout(&mut motion, Tick(70)), None);
    }
}
