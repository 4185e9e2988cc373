//! The per-train named server (§4.9): owns one train's kinematic model,
//! motion state, and `train2`-style state machine, and drives Manual or
//! Waypoint navigation. Grounded on `train2/train.h`'s `train_task_data_t`
//! and the shape of `conductor/server.rs`'s owning loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use marklin_common::consts::{
    MAX_TRACK_BLOCKS, PATH_ACTIVATION_BUDGET_MM, RETRY_BACKOFF_INITIAL_TICKS, RETRY_BACKOFF_MAX_ATTEMPTS,
    RETRY_BACKOFF_MAX_TICKS, TICK_MS,
};
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::{BlockId, NodeIndex, TaskId, Tick, TrainId};

use marklin_conductor::path::{PathResult, StopReason};
use marklin_conductor::server::ConductorHandle;
use marklin_io::scheduler::{Priority, SchedulerHandle};
use marklin_io::wire;
use marklin_runtime::event::{Event, EventKind, Headlight, TrainDirection, TrainMode, TrainStatus};
use marklin_runtime::ipc::{channel, Mailbox, ServerEndpoint};
use marklin_runtime::pubsub::Broker;
use marklin_topology::graph::{EdgeDirection, TrackGraph};
use marklin_topology::server::TopologyHandle;

use crate::kinematics::KinematicModel;
use crate::motion::MotionState;
use crate::sensor;
use crate::state::{self, PathState, StateMachine};
use crate::stopping::{self, StopInputs};

/// A train's destination, as set via [`TrainHandle::set_destination`].
#[derive(Debug, Clone)]
struct Destination {
    node: NodeIndex,
    name: heapless::String<16>,
    offset_mm: i32,
}

/// Exponential retry backoff for path-find/activation failures (§4.9,
/// grounded on `train_should_retry_path`/`train_calculate_retry_delay`).
#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    next_retry_tick: Tick,
    in_backoff: bool,
}

impl RetryState {
    fn new() -> Self {
        Self { attempts: 0, next_retry_tick: Tick(0), in_backoff: false }
    }

    /// Record a failure. Returns `true` once the attempt budget is
    /// exhausted, at which point the caller should surface the error
    /// instead of retrying again.
    fn record_failure(&mut self, now: Tick) -> bool {
        self.attempts += 1;
        if self.attempts >= RETRY_BACKOFF_MAX_ATTEMPTS {
            self.in_backoff = false;
            return true;
        }
        let delay = RETRY_BACKOFF_INITIAL_TICKS.saturating_mul(1u64 << (self.attempts - 1)).min(RETRY_BACKOFF_MAX_TICKS);
        self.next_retry_tick = now.add(delay);
        self.in_backoff = true;
        false
    }

    fn should_retry(&self, now: Tick) -> bool {
        self.in_backoff && now >= self.next_retry_tick
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Snapshot returned by [`TrainHandle::snapshot`] for display/diagnostics.
#[derive(Debug, Clone)]
pub struct TrainSnapshot {
    pub train_id: TrainId,
    pub location: NodeIndex,
    pub direction: TrainDirection,
    pub headlight: Headlight,
    pub speed: u8,
    pub destination: Option<NodeIndex>,
    pub destination_name: heapless::String<16>,
    pub mode: TrainMode,
    pub location_offset_mm: i32,
    pub destination_offset_mm: i32,
    pub status: TrainStatus,
    pub next_sensor_1: Option<NodeIndex>,
    pub next_sensor_2: Option<NodeIndex>,
}

enum Request {
    SetSpeed(u8),
    SetHeadlight(Headlight),
    ToggleHeadlight,
    Reverse,
    Stop,
    EmergencyStop,
    SetDestination { node: NodeIndex, name: heapless::String<16>, offset_mm: i32 },
    ClearDestination,
    SetMode(TrainMode),
    Snapshot,
    Tick,
}

enum Reply {
    Ok,
    Err(MarklinError),
    Snapshot(TrainSnapshot),
}

/// Client handle to one train's server.
#[derive(Clone)]
pub struct TrainHandle {
    mailbox: Mailbox<Request, Reply>,
}

impl TrainHandle {
    pub fn set_speed(&self, me: TaskId, speed: u8) -> MarklinResult<()> {
        self.ok_or_err(me, Request::SetSpeed(speed))
    }

    pub fn set_headlight(&self, me: TaskId, headlight: Headlight) -> MarklinResult<()> {
        self.ok_or_err(me, Request::SetHeadlight(headlight))
    }

    pub fn toggle_headlight(&self, me: TaskId) -> MarklinResult<()> {
        self.ok_or_err(me, Request::ToggleHeadlight)
    }

    pub fn reverse(&self, me: TaskId) -> MarklinResult<()> {
        self.ok_or_err(me, Request::Reverse)
    }

    pub fn stop(&self, me: TaskId) -> MarklinResult<()> {
        self.ok_or_err(me, Request::Stop)
    }

    pub fn emergency_stop(&self, me: TaskId) -> MarklinResult<()> {
        self.ok_or_err(me, Request::EmergencyStop)
    }

    pub fn set_destination(&self, me: TaskId, node: NodeIndex, name: &str, offset_mm: i32) -> MarklinResult<()> {
        let mut hname = heapless::String::new();
        let _ = hname.push_str(name);
        self.ok_or_err(me, Request::SetDestination { node, name: hname, offset_mm })
    }

    pub fn clear_destination(&self, me: TaskId) -> MarklinResult<()> {
        self.ok_or_err(me, Request::ClearDestination)
    }

    pub fn set_mode(&self, me: TaskId, mode: TrainMode) -> MarklinResult<()> {
        self.ok_or_err(me, Request::SetMode(mode))
    }

    pub fn snapshot(&self, me: TaskId) -> TrainSnapshot {
        match self.mailbox.call(me, Request::Snapshot) {
            Reply::Snapshot(s) => s,
            _ => unreachable!("Snapshot replies with Snapshot"),
        }
    }

    /// Drive one control-loop iteration; called periodically by the caller
    /// that owns this train's clock (normally `marklin_main`).
    pub fn tick(&self, me: TaskId) {
        match self.mailbox.call(me, Request::Tick) {
            Reply::Ok => {}
            _ => unreachable!("Tick replies with Ok"),
        }
    }

    fn ok_or_err(&self, me: TaskId, request: Request) -> MarklinResult<()> {
        match self.mailbox.call(me, request) {
            Reply::Ok => Ok(()),
            Reply::Err(e) => Err(e),
            _ => unreachable!("this request replies with Ok or Err"),
        }
    }
}

struct State {
    train_id: TrainId,
    graph: Arc<TrackGraph>,
    topology: TopologyHandle,
    motion: MotionState,
    sm: StateMachine,
    model: KinematicModel,
    mode: TrainMode,
    headlight: Headlight,
    destination: Option<Destination>,
    reserved_blocks: heapless::Vec<BlockId, MAX_TRACK_BLOCKS>,
    active_path: Option<PathResult>,
    retry: RetryState,
    now: Tick,
}

/// Spawn the named server for one train, starting at `start` with no active
/// destination and in `Manual` mode.
pub fn spawn(
    train_id: TrainId,
    start: NodeIndex,
    topology: TopologyHandle,
    conductor: ConductorHandle,
    scheduler: SchedulerHandle,
    broker: Arc<Broker>,
) -> TrainHandle {
    let self_task = TaskId(1000 + train_id.0 as u32);
    let (graph, _) = topology.track_nodes(self_task);

    let state = State {
        train_id,
        graph,
        topology: topology.clone(),
        motion: MotionState::new(start, Tick(0)),
        sm: StateMachine::new(Tick(0)),
        model: KinematicModel::seeded(train_id),
        mode: TrainMode::Manual,
        headlight: Headlight::Auto,
        destination: None,
        reserved_blocks: heapless::Vec::new(),
        active_path: None,
        retry: RetryState::new(),
        now: Tick(0),
    };

    let (mailbox, endpoint) = channel();
    let name = format!("marklin_train_{}", train_id.0);
    thread::Builder::new()
        .name(name)
        .spawn(move || run(endpoint, state, conductor, scheduler, broker, self_task))
        .expect("failed to spawn marklin_train thread");
    TrainHandle { mailbox }
}

fn run(
    endpoint: ServerEndpoint<Request, Reply>,
    mut state: State,
    conductor: ConductorHandle,
    scheduler: SchedulerHandle,
    broker: Arc<Broker>,
    me: TaskId,
) {
    let sensors = broker.subscribe(me, EventKind::SensorUpdate);
    let loop_period = Duration::from_millis(TICK_MS);

    loop {
        match endpoint.receive_timeout(loop_period) {
            Some(call) => {
                let (_from, request, token) = call.into_parts();
                let reply = handle_request(&mut state, &conductor, &scheduler, &broker, me, request);
                token.reply(reply);
            }
            None => {
                state.now = state.now.add(1);
                run_control_pass(&mut state, &conductor, &scheduler, me);
                drain_sensor_events(&mut state, &sensors, &conductor, &scheduler, me);
                navigate(&mut state, &conductor, &scheduler, me);
                publish_position(&state, &broker);
            }
        }
    }
}

/// One pass of the kinematic/reservation control loop, run every tick
/// regardless of mode: advance the speed curve, integrate the resulting
/// velocity into position, re-assert the reservation of the block the train
/// physically sits in, synthesize a blacklisted-sensor arrival if the offset
/// has reached one, recompute the stopping distance, and act on whichever
/// stop condition has highest priority.
fn run_control_pass(state: &mut State, conductor: &ConductorHandle, scheduler: &SchedulerHandle, me: TaskId) {
    state.motion.advance_speed(&state.model);
    state.motion.integrate_position(state.now);

    let _ = conductor.reserve_block(me, state.motion.position.anchor, state.train_id);

    let topology = &state.topology;
    let graph = &state.graph;
    if let Some(node) = sensor::synthesize_if_blacklisted(&mut state.motion, |candidate| {
        let name = graph.node(candidate).name.clone();
        sensor::node_to_sensor_addr(name.as_str())
            .map(|(bank, id)| topology.is_sensor_blacklisted(me, bank, id))
            .unwrap_or(false)
    }) {
        state.sm.handle(state::Event::SensorTriggered, state.now);
        conductor.release_all_except(me, state.train_id, Some(node));
    }

    handle_sensor_timeouts(state, scheduler, me);

    state.motion.stop_distance_mm = state.model.stop_distance_mm(state.motion.commanded_speed, state.motion.from_higher);

    let destination_distance_mm = destination_distance_mm(state);
    let inputs = StopInputs {
        motion: &state.motion,
        model: &state.model,
        path_state: state.sm.path,
        destination_distance_mm,
        emergency_requested: state.sm.current == crate::state::PrimaryState::Stopping,
        collision_ahead: collision_ahead(state, conductor, me),
    };
    let action = stopping::check_unified_stop_conditions(&inputs);
    let (speed, critical) = stopping::resolve_speed_command(action, state.motion.requested_speed);
    match action {
        stopping::StopAction::Continue => {}
        stopping::StopAction::StopDestination => {
            let _ = send_speed(state, scheduler, me, speed, critical);
            state.sm.handle(state::Event::DestinationReached, state.now);
        }
        stopping::StopAction::StopPathEnd => {
            let _ = send_speed(state, scheduler, me, speed, critical);
            state.sm.handle(state::Event::PathEndReached, state.now);
        }
        stopping::StopAction::StopReversal => {
            let _ = send_speed(state, scheduler, me, speed, critical);
        }
        stopping::StopAction::EmergencyStop => {
            let _ = send_speed(state, scheduler, me, speed, critical);
            state.sm.handle(state::Event::EmergencyStop, state.now);
        }
    }
}

/// Fix S4-adjacent behavior (§4.9 "sensor timeouts"): once an expected
/// sensor's deadline passes with no trigger and every other expected slot is
/// already resolved, the train is assumed to have lost track of its
/// position and is stopped rather than left to drift indefinitely.
fn handle_sensor_timeouts(state: &mut State, scheduler: &SchedulerHandle, me: TaskId) {
    let Some(slot) = sensor::check_timeout(&mut state.motion, state.now) else { return };
    let other_resolved = if slot == 0 {
        state.motion.expected_sensors[1].is_none() || state.motion.sensor_timeout_handled[1]
    } else {
        state.motion.sensor_timeout_handled[0]
    };
    if other_resolved && state.motion.commanded_speed > 0 {
        let _ = send_speed(state, scheduler, me, 0, true);
        state.sm.handle(state::Event::EmergencyStop, state.now);
        state.motion.set_expected_sensors(&[], state.now, 0);
    }
}

/// Remaining distance to the active destination along the activated path,
/// length-compensated, or `None` if there is no destination or the
/// activated path does not reach it yet.
fn destination_distance_mm(state: &State) -> Option<i32> {
    let dest = state.destination.as_ref()?;
    let path = state.active_path.as_ref()?;
    let anchor_idx = path.nodes.iter().position(|n| n.node == state.motion.position.anchor)?;
    let mut cursor = state.motion.position.anchor;
    let mut dist_mm = 0i64;
    let mut found = cursor == dest.node;
    for step in path.nodes.iter().skip(anchor_idx + 1) {
        dist_mm += edge_distance(&state.graph, cursor, step.node).unwrap_or(0) as i64;
        cursor = step.node;
        if cursor == dest.node {
            found = true;
            break;
        }
    }
    if !found {
        return None;
    }
    let raw = dist_mm as i32 + dest.offset_mm - state.motion.position.offset_mm;
    Some(state.motion.stopping_offset_with_length(raw))
}

/// Collision-avoidance lookahead: true if any block within the train's
/// current stopping distance, ahead of it on the activated path, is not
/// among the blocks this train holds.
fn collision_ahead(state: &State, conductor: &ConductorHandle, me: TaskId) -> bool {
    let Some(path) = &state.active_path else { return false };
    let anchor_idx = path.nodes.iter().position(|n| n.node == state.motion.position.anchor).unwrap_or(0);
    let mut remaining_mm = state.motion.stop_distance_mm as i64 - state.motion.position.offset_mm as i64;
    if remaining_mm <= 0 {
        return false;
    }
    let mut cursor = state.motion.position.anchor;
    for step in path.nodes.iter().skip(anchor_idx + 1) {
        let dist_mm = edge_distance(&state.graph, cursor, step.node).unwrap_or(0) as i64;
        if let Some((block_id, owner)) = conductor.block_owner(me, step.node) {
            if owner != state.train_id && !state.reserved_blocks.contains(&block_id) {
                return true;
            }
        }
        remaining_mm -= dist_mm;
        cursor = step.node;
        if remaining_mm <= 0 {
            break;
        }
    }
    false
}

fn handle_request(
    state: &mut State,
    conductor: &ConductorHandle,
    scheduler: &SchedulerHandle,
    broker: &Broker,
    me: TaskId,
    request: Request,
) -> Reply {
    match request {
        Request::SetSpeed(speed) => {
            state.motion.requested_speed = speed;
            if let Err(e) = send_speed(state, scheduler, me, speed, false) {
                return Reply::Err(e);
            }
            Reply::Ok
        }
        Request::SetHeadlight(h) => {
            state.headlight = h;
            Reply::Ok
        }
        Request::ToggleHeadlight => {
            state.headlight = match state.headlight {
                Headlight::Off => Headlight::On,
                Headlight::On => Headlight::Off,
                Headlight::Auto => Headlight::Auto,
            };
            Reply::Ok
        }
        Request::Reverse => {
            let bytes = wire::reverse(state.train_id, headlight_on(state));
            if let Err(e) = scheduler.enqueue(me, &bytes, 15, Priority::High, state.train_id, true) {
                return Reply::Err(e);
            }
            state.motion.direction = match state.motion.direction {
                TrainDirection::Forward => TrainDirection::Reverse,
                TrainDirection::Reverse => TrainDirection::Forward,
            };
            Reply::Ok
        }
        Request::Stop => {
            if let Err(e) = send_speed(state, scheduler, me, 0, false) {
                return Reply::Err(e);
            }
            state.motion.requested_speed = 0;
            Reply::Ok
        }
        Request::EmergencyStop => {
            if let Err(e) = send_speed(state, scheduler, me, 0, true) {
                return Reply::Err(e);
            }
            state.sm.handle(state::Event::EmergencyStop, state.now);
            Reply::Ok
        }
        Request::SetDestination { node, name, offset_mm } => {
            state.destination = Some(Destination { node, name, offset_mm });
            state.mode = TrainMode::Waypoint;
            state.retry.reset();
            state.sm.path = PathState::None;
            Reply::Ok
        }
        Request::ClearDestination => {
            state.destination = None;
            state.active_path = None;
            conductor.release_all_except(me, state.train_id, Some(state.motion.position.anchor));
            Reply::Ok
        }
        Request::SetMode(mode) => {
            state.mode = mode;
            if mode == TrainMode::Manual {
                state.destination = None;
                state.active_path = None;
            }
            Reply::Ok
        }
        Request::Snapshot => Reply::Snapshot(snapshot(state)),
        Request::Tick => {
            state.now = state.now.add(1);
            let _ = broker;
            Reply::Ok
        }
    }
}

fn headlight_on(state: &State) -> bool {
    match state.headlight {
        Headlight::Off => false,
        Headlight::On => true,
        Headlight::Auto => matches!(state.motion.direction, TrainDirection::Forward),
    }
}

fn send_speed(state: &mut State, scheduler: &SchedulerHandle, me: TaskId, speed: u8, critical: bool) -> MarklinResult<()> {
    let bytes = wire::train_speed(state.train_id, speed, headlight_on(state));
    let priority = if critical { Priority::Critical } else { Priority::Medium };
    scheduler.enqueue(me, &bytes, 1, priority, state.train_id, false)?;
    state.motion.set_commanded_speed(speed, state.now);
    Ok(())
}

fn snapshot(state: &State) -> TrainSnapshot {
    let status = match state.sm.current {
        crate::state::PrimaryState::Idle => TrainStatus::Idle,
        crate::state::PrimaryState::Moving | crate::state::PrimaryState::Reversing => {
            if state.sm.path == PathState::Requesting {
                TrainStatus::RequestingPath
            } else {
                TrainStatus::Moving
            }
        }
        crate::state::PrimaryState::Stopping => TrainStatus::Stopping,
        crate::state::PrimaryState::Error => TrainStatus::Idle,
    };
    TrainSnapshot {
        train_id: state.train_id,
        location: state.motion.position.anchor,
        direction: state.motion.direction,
        headlight: state.headlight,
        speed: state.motion.commanded_speed,
        destination: state.destination.as_ref().map(|d| d.node),
        destination_name: state.destination.as_ref().map(|d| d.name.clone()).unwrap_or_default(),
        mode: state.mode,
        location_offset_mm: state.motion.position.offset_mm,
        destination_offset_mm: state.destination.as_ref().map(|d| d.offset_mm).unwrap_or(0),
        status,
        next_sensor_1: state.motion.expected_sensors[0],
        next_sensor_2: state.motion.expected_sensors[1],
    }
}

fn publish_position(state: &State, broker: &Broker) {
    let snap = snapshot(state);
    broker.publish(Event::TrainPosition {
        train_id: snap.train_id,
        current_location: snap.location,
        direction: snap.direction,
        headlight: snap.headlight,
        speed: snap.speed,
        destination: snap.destination,
        destination_name: snap.destination_name,
        mode: snap.mode,
        location_offset_mm: snap.location_offset_mm,
        destination_offset_mm: snap.destination_offset_mm,
        status: snap.status,
        next_sensor_1: snap.next_sensor_1,
        next_sensor_2: snap.next_sensor_2,
    });
}

fn drain_sensor_events(
    state: &mut State,
    sensors: &marklin_runtime::pubsub::Subscriber,
    conductor: &ConductorHandle,
    scheduler: &SchedulerHandle,
    me: TaskId,
) {
    while let Some(delivery) = sensors.try_receive() {
        let Event::SensorUpdate { bank, sensor_id, triggered, last_triggered_tick } = delivery.event else { continue };
        if !triggered {
            continue;
        }
        let name = sensor::sensor_addr_to_node_name(bank, sensor_id);
        let Some(node) = state.graph.find_by_name(name.as_str()) else { continue };

        match sensor::accept_trigger(&mut state.motion, &state.graph, node, last_triggered_tick) {
            sensor::Acceptance::Accepted { .. } | sensor::Acceptance::AcceptedOutOfTolerance { .. } => {
                state.sm.handle(state::Event::SensorTriggered, state.now);
                // Only release blocks behind once enough track ahead is
                // reserved to cover the current stopping distance; otherwise
                // releasing early could hand a block the train still needs
                // to another train.
                if !collision_ahead(state, conductor, me) {
                    conductor.release_all_except(me, state.train_id, Some(node));
                }
            }
            sensor::Acceptance::Unexpected => continue,
        }

        let reached = state.destination.as_ref().is_some_and(|d| d.node == node);
        if reached {
            state.sm.handle(state::Event::DestinationReached, state.now);
            let _ = send_speed(state, scheduler, me, 0, false);
            state.destination = None;
            state.active_path = None;
            state.retry.reset();
        }
    }
}

fn navigate(state: &mut State, conductor: &ConductorHandle, scheduler: &SchedulerHandle, me: TaskId) {
    if state.mode != TrainMode::Waypoint {
        return;
    }
    let Some(dest) = state.destination.clone() else { return };

    if state.active_path.is_none() && !state.retry.in_backoff {
        match find_and_activate(state, conductor, scheduler, me, dest.node) {
            Ok(()) => {
                state.sm.handle(state::Event::StartMoving, state.now);
                state.retry.reset();
            }
            Err(_) => {
                let give_up = state.retry.record_failure(state.now);
                if give_up {
                    state.destination = None;
                    state.mode = TrainMode::Manual;
                }
            }
        }
        return;
    }

    if state.retry.should_retry(state.now) {
        state.retry.in_backoff = false;
        return;
    }
}

fn find_and_activate(
    state: &mut State,
    conductor: &ConductorHandle,
    scheduler: &SchedulerHandle,
    me: TaskId,
    goal: NodeIndex,
) -> MarklinResult<()> {
    let start = state.motion.position.anchor;
    let path = conductor.find_path(me, start, goal, state.train_id, &[])?;
    let activation = conductor.activate_path(me, path.clone(), state.train_id, PATH_ACTIVATION_BUDGET_MM);
    let activation = match activation {
        Ok(activation) => activation,
        Err(e) => return Err(e),
    };

    if activation.stop_reason == StopReason::BlockUnavailable {
        if let (Some(blocking_train), Some(blocking_block)) = (activation.blocked_by_train, activation.blocked_by_block) {
            conductor.record_failure(
                me,
                marklin_conductor::deadlock::FailureRecord {
                    train_id: state.train_id,
                    from: start,
                    to: goal,
                    blocking_train,
                    blocking_block,
                    timestamp: state.now,
                },
            );
        }
    }

    for &block in activation.blocks_reserved.iter() {
        if !state.reserved_blocks.contains(&block) {
            let _ = state.reserved_blocks.push(block);
        }
    }

    if activation.stop_reason == StopReason::ReversalPoint {
        state.sm.handle(state::Event::ReversalNeeded, state.now);
        let bytes = wire::reverse(state.train_id, headlight_on(state));
        scheduler.enqueue(me, &bytes, 15, Priority::High, state.train_id, true)?;
        state.motion.direction = match state.motion.direction {
            TrainDirection::Forward => TrainDirection::Reverse,
            TrainDirection::Reverse => TrainDirection::Forward,
        };
        state.sm.handle(state::Event::ReversalComplete, state.now);
    }

    install_expected_sensors(state, &path);
    state.active_path = Some(path);
    send_speed(state, scheduler, me, state.motion.requested_speed.max(8), false)
}

fn install_expected_sensors(state: &mut State, path: &PathResult) {
    let velocity = state.model.velocity(state.motion.commanded_speed.max(1), state.motion.from_higher);
    let velocity_int = velocity.to_int().max(1);

    let mut next = heapless::Vec::<(NodeIndex, u32, u64), 2>::new();
    let anchor_idx = path.nodes.iter().position(|n| n.node == state.motion.position.anchor).unwrap_or(0);
    let mut cursor = state.motion.position.anchor;
    for step in path.nodes.iter().skip(anchor_idx + 1) {
        let dist = edge_distance(&state.graph, cursor, step.node).unwrap_or(0);
        let eta = ((dist as i64) / velocity_int).max(1) as u64;
        if next.push((step.node, dist, eta)).is_err() {
            break;
        }
        cursor = step.node;
    }

    state.motion.set_expected_sensors(&next, state.now, marklin_common::consts::SENSOR_TIMEOUT_MIN_GRACE_TICKS);
}

fn edge_distance(graph: &TrackGraph, from: NodeIndex, to: NodeIndex) -> Option<u32> {
    let node = graph.node(from);
    for dir in [EdgeDirection::Straight, EdgeDirection::Curved] {
        if let Some(edge) = node.edge(dir) {
            if edge.dest == to {
                return Some(edge.dist_mm);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::config::TrackLayout;
    use marklin_io::uart::{LoopbackBackend, UartChannel};

    fn harness() -> (TrainHandle, TaskId) {
        let topology = marklin_topology::server::spawn(TrackLayout::A);
        let uart = marklin_io::uart::spawn(UartChannel::Marklin, Box::new(LoopbackBackend::new()));
        let scheduler = marklin_io::scheduler::spawn(uart.clone());
        let broker = Arc::new(Broker::new());

        static BLOCK_DEFS: &[marklin_conductor::block::BlockDef] = &[marklin_conductor::block::BlockDef {
            block_id: 0,
            entry_sensors: &["S0"],
            exit_sensors: &["S2"],
            internal_sensors: &["S1"],
            turnouts: &[],
            connected_blocks: &[],
        }];
        let conductor = marklin_conductor::server::spawn(
            TrackLayout::A,
            BLOCK_DEFS,
            topology.clone(),
            uart.clone(),
            scheduler.clone(),
            broker.clone(),
        );

        let me = TaskId(1);
        let start = topology.track_nodes(me).0.find_by_name("S0").unwrap();
        let handle = spawn(TrainId(24), start, topology, conductor, scheduler, broker);
        (handle, me)
    }

    #[test]
    fn set_speed_round_trips() {
        let (handle, me) = harness();
        handle.set_speed(me, 8).unwrap();
        let snap = handle.snapshot(me);
        assert_eq!(snap.train_id, TrainId(24));
    }

    #[test]
    fn setting_destination_switches_to_waypoint_mode() {
        let (handle, me) = harness();
        let snap_before = handle.snapshot(me);
        assert_eq!(snap_before.mode, TrainMode::Manual);

        handle.set_destination(me, NodeIndex(2), "S2", 0).unwrap();
        let snap = handle.snapshot(me);
        assert_eq!(snap.mode, TrainMode::Waypoint);
        assert_eq!(snap.destination, Some(NodeIndex(2)));
    }

    #[test]
    fn clearing_destination_returns_to_no_destination() {
        let (handle, me) = harness();
        handle.set_destination(me, NodeIndex(2), "S2", 0).unwrap();
        handle.clear_destination(me).unwrap();
        let snap = handle.snapshot(me);
        assert_eq!(snap.destination, None);
    }
}
