//! Unified per-train motion state (§4.9 "unified train motion state").
//! Grounded on `train2/train.h`'s `train_motion_state_t`/`train_position_t`.

use marklin_common::consts::TRAIN_LENGTH_MM;
use marklin_common::fixed::Fixed;
use marklin_common::ids::{NodeIndex, Tick};
use marklin_runtime::event::TrainDirection;

use crate::kinematics::KinematicModel;

/// A train's continuous position: a sensor/node anchor plus a signed
/// millimetre offset (positive = past the anchor in the direction of travel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub anchor: NodeIndex,
    pub offset_mm: i32,
}

/// Single source of truth for a train's speed, direction, and navigation
/// state, updated once per control loop iteration.
#[derive(Debug, Clone)]
pub struct MotionState {
    /// Speed currently sent to the train hardware.
    pub commanded_speed: u8,
    /// Speed requested by the operator or the autonomous navigator.
    pub requested_speed: u8,
    /// True while commanded_speed != requested_speed (accel/decel in progress).
    pub is_accelerating: bool,
    /// Whether the current commanded speed arrived from a higher speed
    /// (kinematic hysteresis direction).
    pub from_higher: bool,
    pub speed_change_tick: Tick,
    pub direction: TrainDirection,

    /// Speed level the actual (ramping) velocity is converging on, separate
    /// from `commanded_speed` so callers can tell the hardware target apart
    /// from where the train physically is on the kinematic curve.
    pub actual_speed: u8,
    /// Current physical velocity, mm/tick, ramping toward
    /// `model.velocity(commanded_speed, from_higher)` once per pass.
    pub velocity: Fixed,
    /// Acceleration or deceleration rate last applied to `velocity`.
    pub acceleration: Fixed,
    /// Sub-millimetre remainder carried between passes so integration does
    /// not lose the fractional part of `velocity` every tick.
    offset_remainder: Fixed,

    pub position: Position,
    pub last_position_update: Tick,

    /// Up to two sensors the train expects to trigger next, in order.
    pub expected_sensors: [Option<NodeIndex>; 2],
    /// Distance from `position` to each expected sensor, mm.
    pub expected_distance_mm: [u32; 2],
    /// Predicted arrival tick for each expected sensor, from the kinematic
    /// model's current velocity. Used to judge how close an actual trigger
    /// landed to prediction (§S4 tolerance check).
    pub expected_arrival_tick: [Option<Tick>; 2],
    /// Tick by which each expected sensor should have triggered.
    pub sensor_deadline: [Option<Tick>; 2],
    /// Whether a timeout on each slot has already been handled, so it is
    /// only acted on once.
    pub sensor_timeout_handled: [bool; 2],

    /// Current stopping distance at `commanded_speed`, recomputed whenever
    /// speed or direction changes.
    pub stop_distance_mm: u32,
}

impl MotionState {
    pub fn new(start: NodeIndex, now: Tick) -> Self {
        Self {
            commanded_speed: 0,
            requested_speed: 0,
            is_accelerating: false,
            from_higher: false,
            speed_change_tick: now,
            direction: TrainDirection::Forward,
            actual_speed: 0,
            velocity: Fixed::ZERO,
            acceleration: Fixed::ZERO,
            offset_remainder: Fixed::ZERO,
            position: Position { anchor: start, offset_mm: 0 },
            last_position_update: now,
            expected_sensors: [None, None],
            expected_distance_mm: [0, 0],
            expected_arrival_tick: [None, None],
            sensor_deadline: [None, None],
            sensor_timeout_handled: [false, false],
            stop_distance_mm: 0,
        }
    }

    /// Set a new commanded speed, recording the hysteresis direction and
    /// resetting the accelerating flag's clock.
    pub fn set_commanded_speed(&mut self, speed: u8, now: Tick) {
        self.from_higher = speed < self.commanded_speed;
        self.is_accelerating = speed != self.commanded_speed;
        self.commanded_speed = speed;
        self.speed_change_tick = now;
    }

    /// Install the next one or two expected sensors (node, distance mm, eta
    /// ticks), clearing timeout state.
    pub fn set_expected_sensors(&mut self, sensors: &[(NodeIndex, u32, u64)], now: Tick, timeout_ticks: u64) {
        self.expected_sensors = [None, None];
        self.expected_distance_mm = [0, 0];
        self.expected_arrival_tick = [None, None];
        self.sensor_deadline = [None, None];
        self.sensor_timeout_handled = [false, false];
        for (slot, &(node, dist_mm, eta_ticks)) in sensors.iter().take(2).enumerate() {
            self.expected_sensors[slot] = Some(node);
            self.expected_distance_mm[slot] = dist_mm;
            self.expected_arrival_tick[slot] = Some(now.add(eta_ticks));
            self.sensor_deadline[slot] = Some(now.add(eta_ticks + timeout_ticks));
        }
    }

    /// Clear a satisfied expectation slot and advance the remaining one (if
    /// any) into slot 0.
    pub fn clear_expected_slot(&mut self, slot: usize) {
        if slot == 0 && self.expected_sensors[1].is_some() {
            self.expected_sensors[0] = self.expected_sensors[1];
            self.expected_distance_mm[0] = self.expected_distance_mm[1];
            self.expected_arrival_tick[0] = self.expected_arrival_tick[1];
            self.sensor_deadline[0] = self.sensor_deadline[1];
            self.sensor_timeout_handled[0] = self.sensor_timeout_handled[1];
            self.expected_sensors[1] = None;
            self.expected_distance_mm[1] = 0;
            self.expected_arrival_tick[1] = None;
            self.sensor_deadline[1] = None;
            self.sensor_timeout_handled[1] = false;
        } else {
            self.expected_sensors[slot] = None;
            self.expected_distance_mm[slot] = 0;
            self.expected_arrival_tick[slot] = None;
            self.sensor_deadline[slot] = None;
            self.sensor_timeout_handled[slot] = false;
        }
    }

    /// Step 1 of the per-pass control loop: nudge `velocity` one tick closer
    /// to the commanded speed's steady-state value, using the model's
    /// acceleration or deceleration rate depending on which side of it
    /// `velocity` currently sits.
    pub fn advance_speed(&mut self, model: &KinematicModel) {
        let target = model.velocity(self.commanded_speed, self.from_higher);
        let params = model.params(self.commanded_speed, self.from_higher);
        if self.velocity < target {
            self.acceleration = params.acceleration;
            self.velocity = self.velocity.add(params.acceleration).min(target);
        } else if self.velocity > target {
            self.acceleration = params.deceleration;
            self.velocity = self.velocity.sub(params.deceleration).max(target);
        } else {
            self.acceleration = Fixed::ZERO;
        }
        self.is_accelerating = self.velocity != target;
        if !self.is_accelerating {
            self.actual_speed = self.commanded_speed;
        }
    }

    /// Step 2: integrate the current velocity into `position.offset_mm`,
    /// carrying the sub-millimetre remainder forward instead of truncating
    /// it away every pass.
    pub fn integrate_position(&mut self, now: Tick) {
        self.offset_remainder = self.offset_remainder.add(self.velocity);
        let whole_mm = self.offset_remainder.to_int();
        if whole_mm != 0 {
            self.position.offset_mm += whole_mm as i32;
            self.offset_remainder = self.offset_remainder.sub(Fixed::from_int(whole_mm));
        }
        self.last_position_update = now;
    }

    /// Effective train-length-compensated stopping offset: the distance at
    /// which the train's *front* would foul the target, accounting for the
    /// physical length of the consist.
    pub fn stopping_offset_with_length(&self, target_offset_mm: i32) -> i32 {
        match self.direction {
            TrainDirection::Forward => target_offset_mm - TRAIN_LENGTH_MM as i32,
            TrainDirection::Reverse => target_offset_mm + TRAIN_LENGTH_MM as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_commanded_speed_records_hysteresis_direction() {
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.set_commanded_speed(10, Tick(1));
        assert!(!motion.from_higher);
        motion.set_commanded_speed(4, Tick(2));
        assert!(motion.from_higher);
    }

    #[test]
    fn clear_slot_zero_advances_slot_one() {
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.set_expected_sensors(&[(NodeIndex(1), 100, 10), (NodeIndex(2), 200, 20)], Tick(0), 50);
        motion.clear_expected_slot(0);
        assert_eq!(motion.expected_sensors[0], Some(NodeIndex(2)));
        assert_eq!(motion.expected_distance_mm[0], 200);
        assert_eq!(motion.expected_sensors[1], None);
    }

    #[test]
    fn advance_speed_ramps_toward_commanded_and_settles() {
        let model = crate::kinematics::KinematicModel::seeded(marklin_common::ids::TrainId(1));
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.set_commanded_speed(10, Tick(0));
        let target = model.velocity(10, motion.from_higher);
        for _ in 0..10_000 {
            motion.advance_speed(&model);
        }
        assert_eq!(motion.velocity, target);
        assert_eq!(motion.actual_speed, 10);
        assert!(!motion.is_accelerating);
    }

    #[test]
    fn integrate_position_advances_offset_and_keeps_fractional_remainder() {
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.velocity = Fixed::from_raw(Fixed::from_int(1).0 / 2); // 0.5 mm/tick
        motion.integrate_position(Tick(1));
        assert_eq!(motion.position.offset_mm, 0);
        motion.integrate_position(Tick(2));
        assert_eq!(motion.position.offset_mm, 1);
    }

    #[test]
    fn stopping_offset_accounts_for_train_length() {
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.direction = TrainDirection::Forward;
        assert_eq!(motion.stopping_offset_with_length(500), 500 - TRAIN_LENGTH_MM as i32);
        motion.direction = TrainDirection::Reverse;
        assert_eq!(motion.stopping_offset_with_length(500), 500 + TRAIN_LENGTH_MM as i32);
    }
}
