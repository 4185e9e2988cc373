//! Switch (turnout) control (§4.6 "Switch control").
//!
//! Grounded directly on `conductor/switch.c`'s `switch_set_direction`: skip
//! re-issuing the Marklin command if the direction is already what was
//! requested, unless the caller forces it; schedule a follow-up
//! `SolenoidOff` separately when the solenoid should disengage.

use std::collections::HashMap;

use marklin_common::consts::{SOLENOID_OFF_DELAY_TICKS, SWITCH_GAP_SOLENOID_TICKS, SWITCH_GAP_TICKS};
use marklin_common::error::MarklinResult;
use marklin_common::ids::{SwitchId, TaskId, Tick, TrainId};

use marklin_io::scheduler::{Priority, SchedulerHandle};
use marklin_io::wire;
use marklin_runtime::event::{Event, SwitchDirection};
use marklin_runtime::pubsub::Broker;

/// Last-commanded direction of every switch seen so far. Unknown switches
/// default to [`SwitchDirection::Straight`] the first time they're set.
pub struct SwitchTable {
    directions: HashMap<SwitchId, SwitchDirection>,
}

impl SwitchTable {
    pub fn new() -> Self {
        Self { directions: HashMap::new() }
    }

    pub fn direction(&self, id: SwitchId) -> SwitchDirection {
        self.directions.get(&id).copied().unwrap_or(SwitchDirection::Straight)
    }
}

impl Default for SwitchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Command a switch to `direction`. Unless `force_update`, a no-op if the
/// table already records that direction for `switch_id`. On an actual
/// change, enqueues the opcode at `Priority::High` with the solenoid-aware
/// gap, updates the table, and publishes a `SwitchState` event. If
/// `disengage_solenoid`, separately schedules a low-priority `SolenoidOff`
/// after `SOLENOID_OFF_DELAY_TICKS`.
#[allow(clippy::too_many_arguments)]
pub fn set_switch(
    table: &mut SwitchTable,
    scheduler: &SchedulerHandle,
    broker: &Broker,
    me: TaskId,
    switch_id: SwitchId,
    direction: SwitchDirection,
    disengage_solenoid: bool,
    force_update: bool,
    now: Tick,
) -> MarklinResult<()> {
    if !force_update && table.directions.get(&switch_id) == Some(&direction) {
        return Ok(());
    }

    let bytes = match direction {
        SwitchDirection::Straight => wire::switch_straight(switch_id).to_vec(),
        SwitchDirection::Curved => wire::switch_curved(switch_id).to_vec(),
    };
    let gap_ticks = if disengage_solenoid { SWITCH_GAP_SOLENOID_TICKS } else { SWITCH_GAP_TICKS };
    scheduler.enqueue(me, &bytes, gap_ticks, Priority::High, TrainId::NONE, true)?;

    table.directions.insert(switch_id, direction);
    broker.publish(Event::SwitchState { switch_id, direction, last_changed_tick: now });

    if disengage_solenoid {
        let off = wire::solenoid_off();
        scheduler.enqueue(me, &off, SOLENOID_OFF_DELAY_TICKS, Priority::Low, TrainId::NONE, false)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_io::uart::{LoopbackBackend, UartChannel};

    fn harness() -> (SchedulerHandle, Broker) {
        let uart = marklin_io::uart::spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        (marklin_io::scheduler::spawn(uart), Broker::new())
    }

    #[test]
    fn setting_a_new_direction_issues_the_command() {
        let (scheduler, broker) = harness();
        let sub = broker.subscribe(TaskId(1), marklin_runtime::event::EventKind::SwitchState);
        let mut table = SwitchTable::new();
        set_switch(
            &mut table,
            &scheduler,
            &broker,
            TaskId(1),
            SwitchId(3),
            SwitchDirection::Curved,
            false,
            false,
            Tick(1),
        )
        .unwrap();
        assert_eq!(table.direction(SwitchId(3)), SwitchDirection::Curved);
        assert!(sub.try_receive().is_some());
    }

    #[test]
    fn repeating_the_same_direction_is_a_no_op_unless_forced() {
        let (scheduler, broker) = harness();
        let sub = broker.subscribe(TaskId(1), marklin_runtime::event::EventKind::SwitchState);
        let mut table = SwitchTable::new();
        set_switch(
            &mut table,
            &scheduler,
            &broker,
            TaskId(1),
            SwitchId(5),
            SwitchDirection::Straight,
            false,
            false,
            Tick(1),
        )
        .unwrap();
        let _ = sub.try_receive();

        set_switch(
            &mut table,
            &scheduler,
            &broker,
            TaskId(1),
            SwitchId(5),
            SwitchDirection::Straight,
            false,
            false,
            Tick(2),
        )
        .unwrap();
        assert!(sub.try_receive().is_none());

        set_switch(
            &mut table,
            &scheduler,
            &broker,
            TaskId(1),
            SwitchId(5),
            SwitchDirection::Straight,
            false,
            true,
            Tick(3),
        )
        .unwrap();
        assert!(sub.try_receive().is_some());
    }

    #[test]
    fn disengaging_solenoid_schedules_a_follow_up_off() {
        let (scheduler, broker) = harness();
        let mut table = SwitchTable::new();
        set_switch(
            &mut table,
            &scheduler,
            &broker,
            TaskId(1),
            SwitchId(9),
            SwitchDirection::Curved,
            true,
            false,
            Tick(1),
        )
        .unwrap();
    }
}
