//! Event types carried on the pub/sub bus (§6 "Event types on the pub/sub bus").

use heapless::String as HString;

use marklin_common::ids::{BlockId, NodeIndex, SwitchId, Tick, TrainId};

/// A block's reservation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Nobody owns the block.
    Free,
    /// Owned but the train has not yet entered it.
    Reserved,
    /// Owned and the train is currently inside it.
    Occupied,
}

/// A branch node's commanded direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDirection {
    /// Edge index 0.
    Straight,
    /// Edge index 1.
    Curved,
}

/// High-level train status, mirrored on every `TrainPosition` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainStatus {
    /// Not moving, no outstanding path request.
    Idle,
    /// Waiting on a path-find/activate to succeed.
    RequestingPath,
    /// Under way.
    Moving,
    /// Decelerating toward a stop.
    Stopping,
}

/// Train headlight setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Headlight {
    /// Off.
    Off,
    /// On.
    On,
    /// Follows direction of travel.
    Auto,
}

/// Direction of travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainDirection {
    /// Facing the node's forward orientation.
    Forward,
    /// Facing the node's reverse orientation.
    Reverse,
}

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Directly commanded by an operator.
    Manual,
    /// Autonomously navigating to a destination.
    Waypoint,
}

/// A typed event published on the message queue broker.
#[derive(Debug, Clone)]
pub enum Event {
    /// A sensor transitioned (or was synthesized from kinematics, §S4).
    SensorUpdate {
        /// Sensor bank, `0..SENSOR_BANKS`.
        bank: u8,
        /// Sensor id within the bank, `1..=16`.
        sensor_id: u8,
        /// New triggered state.
        triggered: bool,
        /// Tick at which the transition was recorded.
        last_triggered_tick: Tick,
    },
    /// A switch's commanded direction changed.
    SwitchState {
        /// Switch (branch node) identifier.
        switch_id: SwitchId,
        /// New direction.
        direction: SwitchDirection,
        /// Tick at which the change took effect.
        last_changed_tick: Tick,
    },
    /// A train's position/status snapshot.
    TrainPosition {
        /// Which train.
        train_id: TrainId,
        /// Current location (sensor or node the position is anchored to).
        current_location: NodeIndex,
        /// Direction of travel.
        direction: TrainDirection,
        /// Headlight setting.
        headlight: Headlight,
        /// Requested speed level.
        speed: u8,
        /// Destination node, if any.
        destination: Option<NodeIndex>,
        /// Destination node's name, for display.
        destination_name: HString<16>,
        /// Operating mode.
        mode: TrainMode,
        /// Offset from `current_location`, in millimetres.
        location_offset_mm: i32,
        /// Offset from `destination`, in millimetres.
        destination_offset_mm: i32,
        /// High-level status.
        status: TrainStatus,
        /// First expected next sensor, if any.
        next_sensor_1: Option<NodeIndex>,
        /// Second expected next sensor, if any.
        next_sensor_2: Option<NodeIndex>,
    },
    /// A block's reservation state changed.
    BlockReservation {
        /// Which block.
        block_id: BlockId,
        /// Owning train, `TrainId::NONE` if free.
        owner_train_id: TrainId,
        /// New status.
        status: BlockStatus,
        /// Tick at which the change took effect.
        timestamp: Tick,
        /// Name of the block's entry sensor, for display.
        entry_sensor_name: HString<16>,
    },
}

/// Which variant of [`Event`] a subscription is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`Event::SensorUpdate`].
    SensorUpdate,
    /// [`Event::SwitchState`].
    SwitchState,
    /// [`Event::TrainPosition`].
    TrainPosition,
    /// [`Event::BlockReservation`].
    BlockReservation,
}

impl Event {
    /// The [`EventKind`] this event belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::SensorUpdate { .. } => EventKind::SensorUpdate,
            Event::SwitchState { .. } => EventKind::SwitchState,
            Event::TrainPosition { .. } => EventKind::TrainPosition,
            Event::BlockReservation { .. } => EventKind::BlockReservation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let e = Event::SwitchState {
            switch_id: SwitchId(3),
            direction: SwitchDirection::Curved,
            last_changed_tick: Tick(10),
        };
        assert_eq!(e.kind(), EventKind::SwitchState);
    }
}
