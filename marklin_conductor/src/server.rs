//! The conductor named server (§4.6): single-task owner of all dynamic
//! track state — switch directions, sensor states, block reservations, and
//! path-finding/activation. Grounded on `conductor/api.h`'s request set and,
//! for the owning-loop shape, `evo_hal/src/driver_registry.rs`.

use std::thread;
use std::time::Duration;

use marklin_common::config::TrackLayout;
use marklin_common::consts::{MAX_TRAINS, SENSOR_POLL_PERIOD_TICKS, TICK_MS};
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::{BlockId, NodeIndex, SwitchId, TaskId, Tick, TrainId};

use marklin_io::scheduler::SchedulerHandle;
use marklin_io::uart::UartHandle;
use marklin_runtime::event::SwitchDirection;
use marklin_runtime::ipc::{channel, Mailbox, ServerEndpoint};
use std::sync::Arc;

use marklin_runtime::pubsub::Broker;
use marklin_topology::graph::TrackGraph;
use marklin_topology::layout;
use marklin_topology::server::TopologyHandle;

use crate::block::{BlockDef, BlockTable};
use crate::deadlock::{DeadlockTracker, FailureRecord};
use crate::path::{self, ActivationResult, PathResult};
use crate::sensor::{self, SensorTable};
use crate::switch::{self, SwitchTable};

/// Well-known registration name for this service.
pub const SERVER_NAME: &str = "marklin_conductor";

enum Request {
    SetSwitch { switch_id: SwitchId, direction: SwitchDirection, disengage_solenoid: bool, force: bool },
    SensorState { bank: u8, sensor_id: u8 },
    FindPath { start: NodeIndex, goal: NodeIndex, train: TrainId, excluded: heapless::Vec<marklin_common::ids::BlockId, 8> },
    ActivatePath { path: PathResult, train: TrainId, max_distance_mm: u32 },
    ReleaseBlock { node: NodeIndex, train: TrainId },
    ReleaseAllExcept { train: TrainId, except_node: Option<NodeIndex> },
    ReserveBlock { node: NodeIndex, train: TrainId },
    BlockOwner(NodeIndex),
    RecordFailure(FailureRecord),
    Tick(Tick),
}

enum Reply {
    Ok,
    Err(MarklinError),
    Bool(bool),
    Path(MarklinResult<PathResult>),
    Activation(MarklinResult<ActivationResult>),
    BlockOwner(Option<(BlockId, TrainId)>),
}

/// Client handle to the conductor service.
#[derive(Clone)]
pub struct ConductorHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl ConductorHandle {
    pub fn set_switch(
        &self,
        me: TaskId,
        switch_id: SwitchId,
        direction: SwitchDirection,
        disengage_solenoid: bool,
        force: bool,
    ) -> MarklinResult<()> {
        let request = Request::SetSwitch { switch_id, direction, disengage_solenoid, force };
        match self.mailbox.call(me, request) {
            Reply::Ok => Ok(()),
            Reply::Err(e) => Err(e),
            _ => unreachable!("SetSwitch replies with Ok or Err"),
        }
    }

    pub fn sensor_state(&self, me: TaskId, bank: u8, sensor_id: u8) -> bool {
        match self.mailbox.call(me, Request::SensorState { bank, sensor_id }) {
            Reply::Bool(b) => b,
            _ => unreachable!("SensorState replies with Bool"),
        }
    }

    /// Find a path for `train` from `start` to `goal`. Any block excluded by
    /// a still-pending deadlock resolution for `train` is consulted and
    /// merged with the caller-supplied `excluded` list, and consumed.
    pub fn find_path(
        &self,
        me: TaskId,
        start: NodeIndex,
        goal: NodeIndex,
        train: TrainId,
        excluded: &[marklin_common::ids::BlockId],
    ) -> MarklinResult<PathResult> {
        let mut buf = heapless::Vec::new();
        for &b in excluded.iter().take(8) {
            let _ = buf.push(b);
        }
        match self.mailbox.call(me, Request::FindPath { start, goal, train, excluded: buf }) {
            Reply::Path(r) => r,
            _ => unreachable!("FindPath replies with Path"),
        }
    }

    pub fn activate_path(
        &self,
        me: TaskId,
        path: PathResult,
        train: TrainId,
        max_distance_mm: u32,
    ) -> MarklinResult<ActivationResult> {
        match self.mailbox.call(me, Request::ActivatePath { path, train, max_distance_mm }) {
            Reply::Activation(r) => r,
            _ => unreachable!("ActivatePath replies with Activation"),
        }
    }

    pub fn release_block(&self, me: TaskId, node: NodeIndex, train: TrainId) -> MarklinResult<()> {
        match self.mailbox.call(me, Request::ReleaseBlock { node, train }) {
            Reply::Ok => Ok(()),
            Reply::Err(e) => Err(e),
            _ => unreachable!("ReleaseBlock replies with Ok or Err"),
        }
    }

    pub fn release_all_except(&self, me: TaskId, train: TrainId, except_node: Option<NodeIndex>) {
        match self.mailbox.call(me, Request::ReleaseAllExcept { train, except_node }) {
            Reply::Ok => {}
            _ => unreachable!("ReleaseAllExcept replies with Ok"),
        }
    }

    /// Re-assert `train`'s reservation of the block containing `node`;
    /// idempotent if already held, fails if owned by another train.
    pub fn reserve_block(&self, me: TaskId, node: NodeIndex, train: TrainId) -> MarklinResult<()> {
        match self.mailbox.call(me, Request::ReserveBlock { node, train }) {
            Reply::Ok => Ok(()),
            Reply::Err(e) => Err(e),
            _ => unreachable!("ReserveBlock replies with Ok or Err"),
        }
    }

    /// The block id and owning train containing `node`, if any.
    pub fn block_owner(&self, me: TaskId, node: NodeIndex) -> Option<(BlockId, TrainId)> {
        match self.mailbox.call(me, Request::BlockOwner(node)) {
            Reply::BlockOwner(o) => o,
            _ => unreachable!("BlockOwner replies with BlockOwner"),
        }
    }

    pub fn record_failure(&self, me: TaskId, record: FailureRecord) {
        match self.mailbox.call(me, Request::RecordFailure(record)) {
            Reply::Ok => {}
            _ => unreachable!("RecordFailure replies with Ok"),
        }
    }

    /// Drive one sensor-poll cycle; called by a ticking caller (normally
    /// the conductor's own background thread) at `SENSOR_POLL_PERIOD_TICKS`.
    pub fn tick(&self, me: TaskId, now: Tick) {
        match self.mailbox.call(me, Request::Tick(now)) {
            Reply::Ok => {}
            _ => unreachable!("Tick replies with Ok"),
        }
    }
}

struct State {
    layout_kind: TrackLayout,
    graph: TrackGraph,
    blocks: BlockTable,
    switches: SwitchTable,
    sensors: SensorTable,
    deadlock: DeadlockTracker,
    now: Tick,
    /// One-shot per-train block exclusions produced by
    /// [`DeadlockTracker::detect_mutual_block`], consumed by the next
    /// `FindPath` request from the named train.
    pending_exclusions: heapless::Vec<(TrainId, BlockId), MAX_TRAINS>,
}

/// Spawn the conductor server for `layout_kind`, using `block_defs` as the
/// hardcoded per-layout block table.
pub fn spawn(
    layout_kind: TrackLayout,
    block_defs: &'static [BlockDef],
    topology: TopologyHandle,
    marklin_uart: UartHandle,
    scheduler: SchedulerHandle,
    broker: Arc<Broker>,
) -> ConductorHandle {
    let graph = layout::load(layout_kind);
    graph.validate().expect("hardcoded track layout failed structural validation");
    let blocks = BlockTable::resolve(&graph, block_defs).expect("hardcoded block table failed to resolve");

    let state = State {
        layout_kind,
        graph,
        blocks,
        switches: SwitchTable::new(),
        sensors: SensorTable::new(),
        deadlock: DeadlockTracker::new(),
        now: Tick(0),
        pending_exclusions: heapless::Vec::new(),
    };

    let (mailbox, endpoint) = channel();
    thread::Builder::new()
        .name(SERVER_NAME.into())
        .spawn(move || run(endpoint, state, topology, marklin_uart, scheduler, broker))
        .expect("failed to spawn marklin_conductor thread");
    ConductorHandle { mailbox }
}

fn run(
    endpoint: ServerEndpoint<Request, Reply>,
    mut state: State,
    topology: TopologyHandle,
    marklin_uart: UartHandle,
    scheduler: SchedulerHandle,
    broker: Arc<Broker>,
) {
    let self_task = TaskId(0);
    let poll_period = Duration::from_millis(SENSOR_POLL_PERIOD_TICKS * TICK_MS);

    loop {
        match endpoint.receive_timeout(poll_period) {
            None => continue,
            Some(call) => {
                let (_from, request, token) = call.into_parts();
                match request {
                    Request::SetSwitch { switch_id, direction, disengage_solenoid, force } => {
                        let result = switch::set_switch(
                            &mut state.switches,
                            &scheduler,
                            &broker,
                            self_task,
                            switch_id,
                            direction,
                            disengage_solenoid,
                            force,
                            state.now,
                        );
                        token.reply(match result {
                            Ok(()) => Reply::Ok,
                            Err(e) => Reply::Err(e),
                        });
                    }
                    Request::SensorState { bank, sensor_id } => {
                        token.reply(Reply::Bool(state.sensors.is_triggered(bank, sensor_id)));
                    }
                    Request::FindPath { start, goal, train, excluded } => {
                        let blacklist_names = layout::reversal_blacklist(state.layout_kind);
                        let mut blacklist = heapless::Vec::<NodeIndex, 8>::new();
                        for name in blacklist_names {
                            if let Some(idx) = state.graph.find_by_name(name) {
                                let _ = blacklist.push(idx);
                            }
                        }
                        let mut excluded_blocks = excluded;
                        if let Some(pos) = state.pending_exclusions.iter().position(|(t, _)| *t == train) {
                            let (_, block) = state.pending_exclusions.swap_remove(pos);
                            if !excluded_blocks.contains(&block) {
                                excluded_blocks.push(block).ok();
                            }
                        }
                        let result = path::find_path(
                            &state.graph,
                            &state.blocks,
                            start,
                            goal,
                            &blacklist,
                            &excluded_blocks,
                        );
                        token.reply(Reply::Path(result));
                    }
                    Request::ActivatePath { path, train, max_distance_mm } => {
                        let result = path::activate_path(
                            &state.graph,
                            &path,
                            &mut state.blocks,
                            &mut state.switches,
                            &scheduler,
                            &broker,
                            self_task,
                            train,
                            max_distance_mm,
                            state.now,
                        );
                        token.reply(Reply::Activation(result));
                    }
                    Request::ReleaseBlock { node, train } => {
                        let result = state.blocks.release_block(node, train, None).map(|_| ());
                        token.reply(match result {
                            Ok(()) => Reply::Ok,
                            Err(e) => Reply::Err(e),
                        });
                    }
                    Request::ReleaseAllExcept { train, except_node } => {
                        state.blocks.release_all_except(train, except_node);
                        token.reply(Reply::Ok);
                    }
                    Request::ReserveBlock { node, train } => {
                        let result = state.blocks.reserve(node, train, state.now).map(|_| ());
                        token.reply(match result {
                            Ok(()) => Reply::Ok,
                            Err(e) => Reply::Err(e),
                        });
                    }
                    Request::BlockOwner(node) => {
                        let owner = state.blocks.containing_node(node).map(|b| (b.id, b.owner_train_id));
                        token.reply(Reply::BlockOwner(owner));
                    }
                    Request::RecordFailure(record) => {
                        state.deadlock.record_failure(record.timestamp, record);
                        if let Some(resolution) = state.deadlock.detect_mutual_block(state.now) {
                            state
                                .pending_exclusions
                                .iter()
                                .position(|(t, _)| *t == resolution.yield_train)
                                .map(|pos| state.pending_exclusions.swap_remove(pos));
                            state
                                .pending_exclusions
                                .push((resolution.yield_train, resolution.excluded_block))
                                .ok();
                        }
                        token.reply(Reply::Ok);
                    }
                    Request::Tick(now) => {
                        state.now = now;
                        sensor::poll_once(
                            &mut state.sensors,
                            &scheduler,
                            &marklin_uart,
                            &topology,
                            &broker,
                            self_task,
                            now,
                        )
                        .ok();
                        token.reply(Reply::Ok);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_io::uart::{LoopbackBackend, UartChannel};

    static BLOCK_DEFS: &[BlockDef] = &[BlockDef {
        block_id: 0,
        entry_sensors: &["S0"],
        exit_sensors: &["S2"],
        internal_sensors: &["S1"],
        turnouts: &[],
        connected_blocks: &[],
    }];

    fn harness() -> ConductorHandle {
        let topology = marklin_topology::server::spawn(TrackLayout::A);
        let uart = marklin_io::uart::spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        let scheduler = marklin_io::scheduler::spawn(uart.clone());
        spawn(TrackLayout::A, BLOCK_DEFS, topology, uart, scheduler, Arc::new(Broker::new()))
    }

    #[test]
    fn set_switch_round_trips() {
        let handle = harness();
        let me = TaskId(1);
        handle.set_switch(me, SwitchId(3), SwitchDirection::Curved, false, false).unwrap();
    }

    #[test]
    fn find_path_and_activate_reserves_blocks() {
        let handle = harness();
        let me = TaskId(1);
        let topology = marklin_topology::server::spawn(TrackLayout::A);
        let (graph, _) = topology.track_nodes(me);
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let path = handle.find_path(me, start, goal, TrainId(7), &[]).unwrap();
        let activation = handle.activate_path(me, path, TrainId(7), 5000).unwrap();
        assert!(!activation.blocks_reserved.is_empty());
    }

    #[test]
    fn release_block_frees_a_reservation() {
        let handle = harness();
        let me = TaskId(1);
        let topology = marklin_topology::server::spawn(TrackLayout::A);
        let (graph, _) = topology.track_nodes(me);
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let path = handle.find_path(me, start, goal, TrainId(7), &[]).unwrap();
        handle.activate_path(me, path, TrainId(7), 5000).unwrap();
        let s0 = graph.find_by_name("S0").unwrap();
        handle.release_block(me, s0, TrainId(7)).unwrap();
    }
}
