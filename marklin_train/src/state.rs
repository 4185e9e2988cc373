//! Train state machine (§4.9 "train2-style path state machine"). Grounded
//! on `train2/train.h`'s `train_state_t`/`train_movement_state_t`/
//! `train_path_state_t`/`train_reversal_state_t` and the primary/movement/
//! reversal sub-state split; the low-speed-mode timer sub-state was not
//! carried forward (see `DESIGN.md`).

use marklin_common::ids::Tick;

/// Top-level train state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryState {
    /// Stopped, no active path.
    Idle,
    /// In motion (includes kinematic-curve stopping toward a destination).
    Moving,
    /// Emergency stop in progress.
    Stopping,
    /// Executing a reversal sequence.
    Reversing,
    /// A command or sensor failure left the train in an unknown state.
    Error,
}

/// Movement sub-state, valid while [`PrimaryState::Moving`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementState {
    Stationary,
    Accelerating,
    Cruising,
    Decelerating,
}

/// Path-following sub-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    /// No active path.
    None,
    /// A `FindPath` request is outstanding.
    Requesting,
    /// A path has been activated and is being followed.
    Active,
    /// The destination has been reached.
    Reached,
    /// The activated segment ran out before the destination; more of the
    /// same path needs activating.
    ContinuationNeeded,
    /// The train reached a path step where reversal is required.
    AtReversal,
    /// Reversal sequence is in progress.
    Reversing,
}

/// Reversal sequence sub-state, valid while [`PathState::Reversing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalState {
    None,
    Stopping,
    Command,
    Clearing,
    Resuming,
}

/// Events fed into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    StartMoving,
    StopRequested,
    EmergencyStop,
    SensorTriggered,
    DestinationReached,
    PathEndReached,
    ReversalNeeded,
    ReversalComplete,
    ErrorDetected,
    SpeedChanged,
    PathContinuationNeeded,
}

/// Outcome of feeding an [`Event`] into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The event was accepted; state may have changed.
    Handled,
    /// The event does not apply to the current state and was dropped.
    Ignored,
}

/// The train's full state-machine context.
#[derive(Debug, Clone, Copy)]
pub struct StateMachine {
    pub current: PrimaryState,
    pub previous: PrimaryState,
    pub movement: MovementState,
    pub path: PathState,
    pub reversal: ReversalState,
    pub state_entry_tick: Tick,
    pub transition_count: u32,
    /// Tick at which the train last left `Moving`, used to gate stale
    /// sensor triggers arriving after a stop (§S4).
    pub last_moving_exit_tick: Tick,
}

impl StateMachine {
    pub fn new(now: Tick) -> Self {
        Self {
            current: PrimaryState::Idle,
            previous: PrimaryState::Idle,
            movement: MovementState::Stationary,
            path: PathState::None,
            reversal: ReversalState::None,
            state_entry_tick: now,
            transition_count: 0,
            last_moving_exit_tick: now,
        }
    }

    fn enter(&mut self, state: PrimaryState, now: Tick) {
        if state != self.current {
            if self.current == PrimaryState::Moving {
                self.last_moving_exit_tick = now;
            }
            self.previous = self.current;
            self.current = state;
            self.state_entry_tick = now;
            self.transition_count += 1;
        }
    }

    /// Feed one event into the machine, returning whether it was accepted.
    pub fn handle(&mut self, event: Event, now: Tick) -> TransitionResult {
        use Event::*;
        use PrimaryState::*;

        if event == ErrorDetected {
            self.enter(Error, now);
            self.path = PathState::None;
            self.reversal = ReversalState::None;
            return TransitionResult::Handled;
        }
        if event == EmergencyStop {
            self.enter(Stopping, now);
            self.movement = MovementState::Decelerating;
            return TransitionResult::Handled;
        }

        match (self.current, event) {
            (Idle, StartMoving) => {
                self.enter(Moving, now);
                self.movement = MovementState::Accelerating;
                self.path = PathState::Requesting;
                TransitionResult::Handled
            }
            (Moving, SpeedChanged) => {
                TransitionResult::Handled
            }
            (Moving, SensorTriggered) => {
                TransitionResult::Handled
            }
            (Moving, StopRequested) | (Moving, DestinationReached) => {
                self.movement = MovementState::Decelerating;
                self.path = PathState::Reached;
                self.enter(Idle, now);
                self.movement = MovementState::Stationary;
                TransitionResult::Handled
            }
            (Moving, PathEndReached) => {
                self.path = PathState::ContinuationNeeded;
                TransitionResult::Handled
            }
            (Moving, PathContinuationNeeded) => {
                self.path = PathState::ContinuationNeeded;
                TransitionResult::Handled
            }
            (Moving, ReversalNeeded) => {
                self.path = PathState::AtReversal;
                self.enter(Reversing, now);
                self.reversal = ReversalState::Stopping;
                TransitionResult::Handled
            }
            (Reversing, ReversalComplete) => {
                self.reversal = ReversalState::None;
                self.path = PathState::Active;
                self.enter(Moving, now);
                self.movement = MovementState::Accelerating;
                TransitionResult::Handled
            }
            (Stopping, StartMoving) => {
                self.enter(Idle, now);
                TransitionResult::Handled
            }
            (Error, StartMoving) => {
                self.enter(Idle, now);
                TransitionResult::Handled
            }
            _ => TransitionResult::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_to_moving_on_start() {
        let mut sm = StateMachine::new(Tick(0));
        assert_eq!(sm.handle(Event::StartMoving, Tick(1)), TransitionResult::Handled);
        assert_eq!(sm.current, PrimaryState::Moving);
        assert_eq!(sm.movement, MovementState::Accelerating);
        assert_eq!(sm.path, PathState::Requesting);
    }

    #[test]
    fn emergency_stop_preempts_any_state() {
        let mut sm = StateMachine::new(Tick(0));
        sm.handle(Event::StartMoving, Tick(1));
        assert_eq!(sm.handle(Event::EmergencyStop, Tick(2)), TransitionResult::Handled);
        assert_eq!(sm.current, PrimaryState::Stopping);
    }

    #[test]
    fn reversal_round_trip_returns_to_moving() {
        let mut sm = StateMachine::new(Tick(0));
        sm.handle(Event::StartMoving, Tick(1));
        sm.handle(Event::ReversalNeeded, Tick(2));
        assert_eq!(sm.current, PrimaryState::Reversing);
        sm.handle(Event::ReversalComplete, Tick(3));
        assert_eq!(sm.current, PrimaryState::Moving);
        assert_eq!(sm.path, PathState::Active);
    }

    #[test]
    fn irrelevant_event_in_idle_is_ignored() {
        let mut sm = StateMachine::new(Tick(0));
        assert_eq!(sm.handle(Event::ReversalComplete, Tick(1)), TransitionResult::Ignored);
        assert_eq!(sm.current, PrimaryState::Idle);
    }

    #[test]
    fn destination_reached_returns_to_idle() {
        let mut sm = StateMachine::new(Tick(0));
        sm.handle(Event::StartMoving, Tick(1));
        sm.handle(Event::DestinationReached, Tick(2));
        assert_eq!(sm.current, PrimaryState::Idle);
        assert_eq!(sm.path, PathState::Reached);
    }
}
