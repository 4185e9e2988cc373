//! Sensor polling pipeline (§4.6 "Sensor pipeline").
//!
//! Grounded on `conductor/sensor.c`: poll all banks on a fixed period,
//! bit-reverse each returned byte, diff against the previously observed
//! bitmap, and publish a `SensorUpdate` for every transition not on the
//! blacklist.

use marklin_common::consts::{SENSOR_BANKS, SENSOR_IDS_PER_BANK};
use marklin_common::error::MarklinResult;
use marklin_common::ids::{TaskId, Tick, TrainId};

use marklin_io::scheduler::{Priority, SchedulerHandle};
use marklin_io::uart::UartHandle;
use marklin_io::wire::{self, SENSOR_REPORT_BYTES};
use marklin_runtime::event::Event;
use marklin_runtime::pubsub::Broker;
use marklin_topology::server::TopologyHandle;

/// Observed state of every physical sensor, one bit per `(bank, id)`.
pub struct SensorTable {
    triggered: [[bool; SENSOR_IDS_PER_BANK]; SENSOR_BANKS],
    last_triggered_tick: [[Tick; SENSOR_IDS_PER_BANK]; SENSOR_BANKS],
}

impl SensorTable {
    pub fn new() -> Self {
        Self {
            triggered: [[false; SENSOR_IDS_PER_BANK]; SENSOR_BANKS],
            last_triggered_tick: [[Tick(0); SENSOR_IDS_PER_BANK]; SENSOR_BANKS],
        }
    }

    pub fn is_triggered(&self, bank: u8, sensor_id: u8) -> bool {
        self.triggered[bank as usize][(sensor_id - 1) as usize]
    }

    pub fn last_triggered_tick(&self, bank: u8, sensor_id: u8) -> Tick {
        self.last_triggered_tick[bank as usize][(sensor_id - 1) as usize]
    }
}

impl Default for SensorTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One polling cycle: request a report, read the 10-byte reply, diff it
/// against `table`, and publish an `Event::SensorUpdate` for every
/// transition that is not blacklisted. Returns the number of transitions
/// observed (blacklisted or not).
pub fn poll_once(
    table: &mut SensorTable,
    scheduler: &SchedulerHandle,
    uart: &UartHandle,
    topology: &TopologyHandle,
    broker: &Broker,
    me: TaskId,
    now: Tick,
) -> MarklinResult<usize> {
    scheduler.enqueue(me, &wire::report_all_banks(), 1, Priority::Medium, TrainId::NONE, true)?;

    let mut raw = [0u8; SENSOR_REPORT_BYTES];
    for slot in raw.iter_mut() {
        *slot = uart.getc(me);
    }
    let banks = wire::decode_sensor_banks(&raw);

    let mut transitions = 0;
    for (bank_idx, &bits) in banks.iter().enumerate() {
        let bank = bank_idx as u8;
        for bit in 0..SENSOR_IDS_PER_BANK {
            let sensor_id = (bit + 1) as u8;
            let new_state = (bits >> (SENSOR_IDS_PER_BANK - 1 - bit)) & 1 != 0;
            let slot = &mut table.triggered[bank_idx][bit];
            if *slot == new_state {
                continue;
            }
            *slot = new_state;
            table.last_triggered_tick[bank_idx][bit] = now;
            transitions += 1;

            if topology.is_sensor_blacklisted(me, bank, sensor_id) {
                continue;
            }
            broker.publish(Event::SensorUpdate {
                bank,
                sensor_id,
                triggered: new_state,
                last_triggered_tick: now,
            });
        }
    }
    Ok(transitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::config::TrackLayout;
    use marklin_io::uart::{LoopbackBackend, UartChannel};
    use marklin_runtime::event::EventKind;

    fn harness() -> (SchedulerHandle, UartHandle, TopologyHandle, Broker) {
        let mut backend = LoopbackBackend::new();
        // One raw report: bank 0 byte 0 = 0b1000_0000 (reversed -> bit 0 set).
        backend.inject_rx(&[0b1000_0000, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let uart = marklin_io::uart::spawn(UartChannel::Marklin, Box::new(backend));
        let scheduler = marklin_io::scheduler::spawn(uart.clone());
        let topology = marklin_topology::server::spawn(TrackLayout::A);
        (scheduler, uart, topology, Broker::new())
    }

    #[test]
    fn a_rising_transition_is_published() {
        let (scheduler, uart, topology, broker) = harness();
        let sub = broker.subscribe(TaskId(1), EventKind::SensorUpdate);
        let mut table = SensorTable::new();
        let n = poll_once(&mut table, &scheduler, &uart, &topology, &broker, TaskId(1), Tick(5)).unwrap();
        assert_eq!(n, 1);
        assert!(table.is_triggered(0, 1));
        assert_eq!(table.last_triggered_tick(0, 1), Tick(5));
        let delivery = sub.try_receive().unwrap();
        match delivery.event {
            Event::SensorUpdate { bank, sensor_id, triggered, .. } => {
                assert_eq!((bank, sensor_id, triggered), (0, 1, true));
            }
            _ => panic!("expected SensorUpdate"),
        }
    }

    #[test]
    fn a_blacklisted_sensor_updates_state_but_does_not_publish() {
        let (scheduler, uart, topology, broker) = harness();
        topology.add_blacklisted_sensor(TaskId(1), 0, 1);
        let sub = broker.subscribe(TaskId(1), EventKind::SensorUpdate);
        let mut table = SensorTable::new();
        poll_once(&mut table, &scheduler, &uart, &topology, &broker, TaskId(1), Tick(5)).unwrap();
        assert!(table.is_triggered(0, 1));
        assert!(sub.try_receive().is_none());
    }
}
