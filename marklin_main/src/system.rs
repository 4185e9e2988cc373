//! Boot sequence and aggregation loop for the whole workspace. Grounded on
//! `evo_hal`'s `HalCore` (load config, init, run, shutdown) and on
//! `marklin_conductor::server`'s externally-paced `Tick` request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use marklin_common::config::{MarklinConfig, TrainConfig};
use marklin_common::consts::{SENSOR_POLL_PERIOD_TICKS, TICK_MS};
use marklin_common::ids::{TaskId, TrainId};
use marklin_conductor::server::{self as conductor_server, ConductorHandle};
use marklin_io::scheduler::{self, SchedulerHandle};
use marklin_io::uart::{self, LoopbackBackend, UartChannel, UartHandle};
use marklin_runtime::clock::{self, ClockHandle};
use marklin_runtime::event::EventKind;
use marklin_runtime::name_server::{self, NameServerHandle};
use marklin_runtime::pubsub::Broker;
use marklin_topology::server::{self as topology_server, TopologyHandle};
use marklin_train::server::TrainHandle;

use crate::blocks;

/// Task id the top-level process uses for its own calls into the servers it
/// boots (the aggregation loop, the conductor pacer).
const SYSTEM_TASK: TaskId = TaskId(1);

/// Every server handle plus the per-train controller handles, running for
/// the life of the process.
pub struct MarklinSystem {
    pub name_server: NameServerHandle,
    pub clock: ClockHandle,
    pub broker: Arc<Broker>,
    pub console_uart: UartHandle,
    pub marklin_uart: UartHandle,
    pub scheduler: SchedulerHandle,
    pub topology: TopologyHandle,
    pub conductor: ConductorHandle,
    pub trains: Vec<(TrainId, TrainHandle)>,
    running: Arc<AtomicBool>,
}

impl MarklinSystem {
    /// Boot the name service, clock, bus, UART/scheduler, topology,
    /// conductor, and one controller thread per configured train.
    pub fn boot(config: &MarklinConfig) -> Self {
        let name_server = name_server::spawn();
        let clock = clock::spawn_realtime();
        let broker = Arc::new(Broker::new());

        let console_uart = uart::spawn(UartChannel::Console, Box::new(LoopbackBackend::new()));
        let marklin_uart = uart::spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        let scheduler = scheduler::spawn(marklin_uart.clone());

        let topology = topology_server::spawn(config.layout);
        name_server
            .register_as(SYSTEM_TASK, topology_server::SERVER_NAME)
            .expect("topology service name should be unreserved at boot");

        let block_defs = blocks::for_layout(config.layout);
        let conductor = conductor_server::spawn(
            config.layout,
            block_defs,
            topology.clone(),
            marklin_uart.clone(),
            scheduler.clone(),
            broker.clone(),
        );

        let graph = topology.track_nodes(SYSTEM_TASK).0;
        let mut trains = Vec::new();
        for train_cfg in &config.trains {
            let train_id = TrainId(train_cfg.train_id);
            let Some(start) = graph.find_by_name(&train_cfg.start_sensor) else {
                tracing::error!(
                    train_id = train_cfg.train_id,
                    start_sensor = %train_cfg.start_sensor,
                    "unknown start_sensor, skipping train"
                );
                continue;
            };
            let handle = marklin_train::server::spawn(
                train_id,
                start,
                topology.clone(),
                conductor.clone(),
                scheduler.clone(),
                broker.clone(),
            );
            if wants_reverse(train_cfg) {
                let me = TaskId(2000 + train_id.0 as u32);
                let _ = handle.reverse(me);
            }
            info!(train_id = train_cfg.train_id, start_sensor = %train_cfg.start_sensor, "train controller started");
            trains.push((train_id, handle));
        }

        Self {
            name_server,
            clock,
            broker,
            console_uart,
            marklin_uart,
            scheduler,
            topology,
            conductor,
            trains,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// A clone of the running flag, for a `ctrlc` handler to clear.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run until `running` is cleared: pace the conductor's sensor-poll
    /// cycle and log every `TrainPosition`/`SwitchState`/`BlockReservation`
    /// event the bus carries, standing in for the out-of-scope TUI.
    pub fn run(&self) {
        let conductor = self.conductor.clone();
        let clock = self.clock.clone();
        let running = self.running.clone();
        let poll_period = Duration::from_millis(SENSOR_POLL_PERIOD_TICKS * TICK_MS);
        let pacer = thread::Builder::new()
            .name("conductor_pacer".into())
            .spawn(move || {
                let me = TaskId(3);
                while running.load(Ordering::Relaxed) {
                    let now = clock.time(me);
                    conductor.tick(me, now);
                    thread::sleep(poll_period);
                }
            })
            .expect("failed to spawn conductor_pacer thread");

        let train_positions = self.broker.subscribe(SYSTEM_TASK, EventKind::TrainPosition);
        let switch_states = self.broker.subscribe(SYSTEM_TASK, EventKind::SwitchState);
        let block_reservations = self.broker.subscribe(SYSTEM_TASK, EventKind::BlockReservation);

        while self.running.load(Ordering::Relaxed) {
            while let Some(delivery) = train_positions.try_receive() {
                let event = delivery.event;
                info!(?event, "train position");
            }
            while let Some(delivery) = switch_states.try_receive() {
                let event = delivery.event;
                info!(?event, "switch state");
            }
            while let Some(delivery) = block_reservations.try_receive() {
                let event = delivery.event;
                info!(?event, "block reservation");
            }
            thread::sleep(Duration::from_millis(TICK_MS));
        }

        let _ = pacer.join();
    }
}

fn wants_reverse(train_cfg: &TrainConfig) -> bool {
    train_cfg.start_direction.eq_ignore_ascii_case("reverse")
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::config::TrackLayout;

    #[test]
    fn boots_with_no_trains_configured() {
        let config = MarklinConfig {
            layout: TrackLayout::A,
            trains: Vec::new(),
            log_level: "info".to_string(),
        };
        let system = MarklinSystem::boot(&config);
        assert!(system.trains.is_empty());
    }

    #[test]
    fn boots_one_train_at_its_configured_start_sensor() {
        let config = MarklinConfig {
            layout: TrackLayout::A,
            trains: vec![TrainConfig {
                train_id: 24,
                start_sensor: "S0".to_string(),
                start_direction: "forward".to_string(),
            }],
            log_level: "info".to_string(),
        };
        let system = MarklinSystem::boot(&config);
        assert_eq!(system.trains.len(), 1);
        assert_eq!(system.trains[0].0, TrainId(24));
    }

    #[test]
    fn unknown_start_sensor_is_skipped_not_fatal() {
        let config = MarklinConfig {
            layout: TrackLayout::A,
            trains: vec![TrainConfig {
                train_id: 24,
                start_sensor: "NOPE".to_string(),
                start_direction: "forward".to_string(),
            }],
            log_level: "info".to_string(),
        };
        let system = MarklinSystem::boot(&config);
        assert!(system.trains.is_empty());
    }
}
