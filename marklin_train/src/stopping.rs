//! Unified prioritized stopping logic (§4.9 "unified stop action
//! enumeration"). Grounded on `train2/train.h`'s `train_stop_action_t` and
//! `train_check_unified_stop_conditions`/`train_execute_stop_action`.

use marklin_common::ids::Tick;

use crate::kinematics::KinematicModel;
use crate::motion::MotionState;
use crate::state::PathState;

/// Which condition should govern the next speed command, in priority order
/// (checked top to bottom; the first that applies wins).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopAction {
    /// No stop condition applies; continue at the requested speed.
    Continue,
    /// Stop short of the destination offset.
    StopDestination,
    /// Stop because the activated path segment has run out.
    StopPathEnd,
    /// Stop at a reversal point before executing the reversal.
    StopReversal,
    /// Safety-critical stop, overrides everything else.
    EmergencyStop,
}

/// Inputs needed to decide the current [`StopAction`].
pub struct StopInputs<'a> {
    pub motion: &'a MotionState,
    pub model: &'a KinematicModel,
    pub path_state: PathState,
    pub destination_distance_mm: Option<i32>,
    pub emergency_requested: bool,
    /// True when a block within the current stopping distance, ahead of the
    /// train on its reserved path, is owned by someone else (or nobody).
    /// Highest-priority stop condition: collision avoidance.
    pub collision_ahead: bool,
}

/// Evaluate all stop conditions in priority order.
pub fn check_unified_stop_conditions(inputs: &StopInputs) -> StopAction {
    if inputs.emergency_requested || inputs.collision_ahead {
        return StopAction::EmergencyStop;
    }

    let stop_distance = inputs.model.stop_distance_mm(inputs.motion.commanded_speed, inputs.motion.from_higher) as i32;

    if let Some(distance_mm) = inputs.destination_distance_mm {
        if distance_mm <= stop_distance {
            return StopAction::StopDestination;
        }
    }

    match inputs.path_state {
        PathState::AtReversal => StopAction::StopReversal,
        PathState::ContinuationNeeded => StopAction::StopPathEnd,
        _ => StopAction::Continue,
    }
}

/// Resolve the speed command to send for a given [`StopAction`]. Returns
/// `(speed, is_critical)`; critical stops should be enqueued at
/// `Priority::Critical`, everything else at the scheduler's normal tiers.
pub fn resolve_speed_command(action: StopAction, requested_speed: u8) -> (u8, bool) {
    match action {
        StopAction::Continue => (requested_speed, false),
        StopAction::StopDestination | StopAction::StopPathEnd | StopAction::StopReversal => (0, false),
        StopAction::EmergencyStop => (0, true),
    }
}

/// Record an observed stop (destination or segment end actually reached)
/// back into the kinematic model so the next prediction improves.
pub fn record_stop_observation(
    model: &mut KinematicModel,
    speed: u8,
    from_higher: bool,
    observed_distance_mm: u32,
    observed_ticks: u64,
    now: Tick,
) {
    model.calibrate_stop(speed, from_higher, observed_distance_mm, observed_ticks, now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::ids::{NodeIndex, TrainId};

    fn model() -> KinematicModel {
        KinematicModel::seeded(TrainId(1))
    }

    #[test]
    fn emergency_always_wins() {
        let motion = MotionState::new(NodeIndex(0), Tick(0));
        let model = model();
        let inputs = StopInputs {
            motion: &motion,
            model: &model,
            path_state: PathState::Active,
            destination_distance_mm: Some(10_000),
            emergency_requested: true,
            collision_ahead: false,
        };
        assert_eq!(check_unified_stop_conditions(&inputs), StopAction::EmergencyStop);
    }

    #[test]
    fn collision_ahead_wins_over_a_distant_destination() {
        let motion = MotionState::new(NodeIndex(0), Tick(0));
        let model = model();
        let inputs = StopInputs {
            motion: &motion,
            model: &model,
            path_state: PathState::Active,
            destination_distance_mm: Some(100_000),
            emergency_requested: false,
            collision_ahead: true,
        };
        assert_eq!(check_unified_stop_conditions(&inputs), StopAction::EmergencyStop);
    }

    #[test]
    fn close_destination_triggers_stop() {
        let mut motion = MotionState::new(NodeIndex(0), Tick(0));
        motion.set_commanded_speed(10, Tick(0));
        let model = model();
        let stop_distance = model.stop_distance_mm(10, false) as i32;
        let inputs = StopInputs {
            motion: &motion,
            model: &model,
            path_state: PathState::Active,
            destination_distance_mm: Some(stop_distance - 1),
            emergency_requested: false,
            collision_ahead: false,
        };
        assert_eq!(check_unified_stop_conditions(&inputs), StopAction::StopDestination);
    }

    #[test]
    fn reversal_point_stops_even_with_distant_destination() {
        let motion = MotionState::new(NodeIndex(0), Tick(0));
        let model = model();
        let inputs = StopInputs {
            motion: &motion,
            model: &model,
            path_state: PathState::AtReversal,
            destination_distance_mm: Some(100_000),
            emergency_requested: false,
            collision_ahead: false,
        };
        assert_eq!(check_unified_stop_conditions(&inputs), StopAction::StopReversal);
    }

    #[test]
    fn resolve_speed_command_zeros_speed_on_any_stop() {
        assert_eq!(resolve_speed_command(StopAction::StopDestination, 12), (0, false));
        assert_eq!(resolve_speed_command(StopAction::EmergencyStop, 12), (0, true));
        assert_eq!(resolve_speed_command(StopAction::Continue, 12), (12, false));
    }
}
