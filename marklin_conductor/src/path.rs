//! Path-finding and path activation (§4.6 "Path-finding"/"Path activation").
//!
//! `find_path` is a Dijkstra over the track graph's existing forward/reverse
//! node pairs, directly grounded on `conductor/path.c`'s `path_find`: lazy
//! deletion of finalized nodes, a reversal "edge" available only when the
//! state under relaxation is the start node itself (and not on the
//! reversal blacklist), and an excluded-blocks check before relaxing an
//! edge into a node inside a block the caller wants avoided.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use heapless::Vec as HVec;

use marklin_common::consts::{MAX_TRACK_BLOCKS, PATH_COST_REVERSAL, PATH_POOL_SIZE};
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::{BlockId, NodeIndex, TaskId, Tick, TrainId};

use marklin_io::scheduler::SchedulerHandle;
use marklin_runtime::event::{Event, SwitchDirection};
use marklin_runtime::pubsub::Broker;
use marklin_topology::graph::{EdgeDirection, TrackGraph};

use crate::block::BlockTable;
use crate::switch::{self, SwitchTable};

/// One step of a found path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathNode {
    pub node: NodeIndex,
    /// True if this step is reached by reversing in place (only ever the
    /// second entry of a path, immediately after the start node).
    pub reverse_here: bool,
}

/// A complete path from start to goal.
#[derive(Debug, Clone)]
pub struct PathResult {
    pub nodes: HVec<PathNode, PATH_POOL_SIZE>,
    pub total_distance_mm: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct Scored {
    cost: u32,
    seq: u32,
    node: NodeIndex,
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost.cmp(&other.cost).then(self.seq.cmp(&other.seq))
    }
}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy)]
enum Step {
    Edge,
    Reversal,
}

/// Find the cheapest path from `start` to `goal`. A reversal in place is
/// permitted only as the very first step (from `start`), and only if
/// `start` is not in `reversal_blacklist`. Nodes inside any block listed in
/// `excluded_blocks` are never entered.
pub fn find_path(
    graph: &TrackGraph,
    blocks: &BlockTable,
    start: NodeIndex,
    goal: NodeIndex,
    reversal_blacklist: &[NodeIndex],
    excluded_blocks: &[BlockId],
) -> MarklinResult<PathResult> {
    let n = graph.len();
    let mut dist = vec![u32::MAX; n];
    let mut finalized = vec![false; n];
    let mut prev: Vec<Option<(NodeIndex, Step)>> = vec![None; n];

    dist[start.0 as usize] = 0;
    let mut heap: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
    let mut seq = 0u32;
    heap.push(Reverse(Scored { cost: 0, seq, node: start }));
    seq += 1;

    while let Some(Reverse(Scored { cost, node, .. })) = heap.pop() {
        let idx = node.0 as usize;
        if finalized[idx] {
            continue;
        }
        if cost > dist[idx] {
            continue;
        }
        finalized[idx] = true;

        if node == goal {
            break;
        }

        let current = graph.node(node);

        // Reversal is only ever explored from the true start state.
        if node == start && !reversal_blacklist.contains(&node) {
            let rev = current.reverse;
            let rev_idx = rev.0 as usize;
            let new_cost = cost.saturating_add(PATH_COST_REVERSAL);
            if !finalized[rev_idx] && new_cost < dist[rev_idx] && !excluded(blocks, rev, excluded_blocks) {
                dist[rev_idx] = new_cost;
                prev[rev_idx] = Some((node, Step::Reversal));
                heap.push(Reverse(Scored { cost: new_cost, seq, node: rev }));
                seq += 1;
            }
        }

        for dir in [EdgeDirection::Straight, EdgeDirection::Curved] {
            let Some(edge) = current.edge(dir) else { continue };
            let dest = edge.dest;
            let dest_idx = dest.0 as usize;
            if finalized[dest_idx] || excluded(blocks, dest, excluded_blocks) {
                continue;
            }
            let new_cost = cost.saturating_add(edge.dist_mm);
            if new_cost < dist[dest_idx] {
                dist[dest_idx] = new_cost;
                prev[dest_idx] = Some((node, Step::Edge));
                heap.push(Reverse(Scored { cost: new_cost, seq, node: dest }));
                seq += 1;
            }
        }
    }

    if dist[goal.0 as usize] == u32::MAX {
        return Err(MarklinError::NoPath);
    }

    // Walk predecessors back to `start` and reverse.
    let mut chain = Vec::new();
    let mut cur = goal;
    loop {
        chain.push(cur);
        if cur == start {
            break;
        }
        match prev[cur.0 as usize] {
            Some((p, _)) => cur = p,
            None => return Err(MarklinError::NoPath),
        }
        if chain.len() > PATH_POOL_SIZE {
            return Err(MarklinError::NoPath);
        }
    }
    chain.reverse();

    let mut nodes = HVec::new();
    for (i, &node) in chain.iter().enumerate() {
        let reverse_here = i > 0 && matches!(prev[node.0 as usize], Some((_, Step::Reversal)));
        nodes.push(PathNode { node, reverse_here }).map_err(|_| MarklinError::NoPath)?;
    }

    Ok(PathResult { nodes, total_distance_mm: dist[goal.0 as usize] })
}

fn excluded(blocks: &BlockTable, node: NodeIndex, excluded_blocks: &[BlockId]) -> bool {
    blocks.containing_node(node).map(|b| excluded_blocks.contains(&b.id)).unwrap_or(false)
}

/// Why `activate_path` stopped advancing (mirrors
/// `path_activation_stop_reason_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfPath,
    BlockUnavailable,
    BudgetExceeded,
    ReversalPoint,
    PreviouslyReserved,
    Error,
}

/// Result of one `activate_path` call.
pub struct ActivationResult {
    pub next_expected_sensor: Option<NodeIndex>,
    pub segment_distance_mm: u32,
    pub blocks_reserved: HVec<BlockId, MAX_TRACK_BLOCKS>,
    pub stop_reason: StopReason,
    pub furthest_activated_node: NodeIndex,
    /// When `stop_reason == BlockUnavailable`, who owns the block that
    /// stopped activation, so the caller can record it for deadlock
    /// detection.
    pub blocked_by_train: Option<TrainId>,
    pub blocked_by_block: Option<BlockId>,
}

fn edge_distance(graph: &TrackGraph, from: NodeIndex, to: NodeIndex) -> u32 {
    let node = graph.node(from);
    for dir in [EdgeDirection::Straight, EdgeDirection::Curved] {
        if let Some(edge) = node.edge(dir) {
            if edge.dest == to {
                return edge.dist_mm;
            }
        }
    }
    0
}

/// Reserve as much of `path` as is available, and set every branch switch
/// encountered along the way.
///
/// First walks backward from the path's end toward its start, identifying
/// block boundaries and the distance from the start accumulated at each one,
/// to find the furthest index that can safely be committed: a block owned by
/// another train, a block this train already holds from a previous
/// activation, the `max_distance_mm` budget, or the start of the path itself
/// stop the backward walk. The forward pass then actually reserves blocks
/// and sets switches from the path's start up to that index.
#[allow(clippy::too_many_arguments)]
pub fn activate_path(
    graph: &TrackGraph,
    path: &PathResult,
    blocks: &mut BlockTable,
    switches: &mut SwitchTable,
    scheduler: &SchedulerHandle,
    broker: &Broker,
    me: TaskId,
    train: TrainId,
    max_distance_mm: u32,
    now: Tick,
) -> MarklinResult<ActivationResult> {
    let last_idx = path.nodes.len().checked_sub(1).ok_or(MarklinError::NoPath)?;
    let total_distance_mm = path.total_distance_mm;

    // `cutoff`: highest node index (inclusive) safe to commit in the forward
    // pass below. `-1` means nothing at all is safe. Starts optimistic (the
    // whole path) and is only pulled back by an obstruction found while
    // walking backward from the destination.
    let mut cutoff: isize = last_idx as isize;
    let mut stop_reason = StopReason::EndOfPath;
    let mut blocked_by_train = None;
    let mut blocked_by_block = None;
    let mut prev_block_id = blocks.containing_node(path.nodes[last_idx].node).map(|b| b.id);

    if let Some(block) = blocks.containing_node(path.nodes[last_idx].node) {
        if !block.owner_train_id.is_none() && block.owner_train_id != train {
            cutoff = last_idx as isize - 1;
            stop_reason = StopReason::BlockUnavailable;
            blocked_by_train = Some(block.owner_train_id);
            blocked_by_block = Some(block.id);
        }
    }

    let mut dist_from_end = 0u32;
    if stop_reason == StopReason::EndOfPath && last_idx > 0 {
        for i in (0..last_idx).rev() {
            dist_from_end += edge_distance(graph, path.nodes[i].node, path.nodes[i + 1].node);
            let dist_from_start = total_distance_mm.saturating_sub(dist_from_end);
            if dist_from_start > max_distance_mm {
                cutoff = i as isize - 1;
                stop_reason = StopReason::BudgetExceeded;
                break;
            }

            if let Some(block) = blocks.containing_node(path.nodes[i].node) {
                if Some(block.id) != prev_block_id {
                    if block.owner_train_id == train {
                        // Already ours from a previous activation; no
                        // obstruction, just no need to scan further back.
                        stop_reason = StopReason::PreviouslyReserved;
                        break;
                    }
                    if !block.owner_train_id.is_none() {
                        cutoff = i as isize - 1;
                        stop_reason = StopReason::BlockUnavailable;
                        blocked_by_train = Some(block.owner_train_id);
                        blocked_by_block = Some(block.id);
                        break;
                    }
                    prev_block_id = Some(block.id);
                }
            }
        }
    }

    let mut blocks_reserved = HVec::new();
    let mut furthest = path.nodes[0].node;
    let mut segment_distance_mm = 0;

    if cutoff < 0 {
        return Ok(ActivationResult {
            next_expected_sensor: None,
            segment_distance_mm: 0,
            blocks_reserved,
            stop_reason,
            furthest_activated_node: furthest,
            blocked_by_train,
            blocked_by_block,
        });
    }
    let cutoff = cutoff as usize;

    for (i, step) in path.nodes.iter().enumerate().take(cutoff + 1) {
        if i > 0 && step.reverse_here {
            stop_reason = StopReason::ReversalPoint;
            break;
        }

        if let Some(block) = blocks.containing_node(step.node) {
            if block.owner_train_id != train {
                match blocks.reserve(step.node, train, now) {
                    Ok(id) => {
                        if !blocks_reserved.contains(&id) {
                            blocks_reserved.push(id).ok();
                            broker.publish(Event::BlockReservation {
                                block_id: id,
                                owner_train_id: train,
                                status: marklin_runtime::event::BlockStatus::Reserved,
                                timestamp: now,
                                entry_sensor_name: heapless::String::new(),
                            });
                        }
                    }
                    Err(MarklinError::AlreadyReserved) => {
                        // The backward scan already cleared everything up to
                        // `cutoff`; a race here means the block changed hands
                        // between the two passes. Stop short rather than
                        // reserving past it.
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let node = graph.node(step.node);
        if node.node_type == marklin_topology::graph::NodeType::Branch {
            if let Some(next) = path.nodes.get(i + 1) {
                let dir = if node.edge(EdgeDirection::Straight).map(|e| e.dest) == Some(next.node) {
                    SwitchDirection::Straight
                } else {
                    SwitchDirection::Curved
                };
                let switch_id = marklin_common::ids::SwitchId(node.num.max(0) as u8);
                switch::set_switch(switches, scheduler, broker, me, switch_id, dir, false, false, now)?;
            }
        }

        furthest = step.node;
        if let Some(next) = path.nodes.get(i + 1) {
            segment_distance_mm += edge_distance(graph, step.node, next.node);
        }
    }

    let next_expected_sensor = path
        .nodes
        .get(path.nodes.iter().position(|s| s.node == furthest).map(|i| i + 1).unwrap_or(path.nodes.len()))
        .map(|s| s.node)
        .filter(|_| matches!(stop_reason, StopReason::EndOfPath | StopReason::BlockUnavailable | StopReason::BudgetExceeded));

    Ok(ActivationResult {
        next_expected_sensor,
        segment_distance_mm,
        blocks_reserved,
        stop_reason,
        furthest_activated_node: furthest,
        blocked_by_train,
        blocked_by_block,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::config::TrackLayout;
    use marklin_topology::layout;

    fn empty_blocks(graph: &TrackGraph) -> BlockTable {
        BlockTable::resolve(graph, &[]).unwrap()
    }

    #[test]
    fn finds_the_direct_ring_path() {
        let graph = layout::load(TrackLayout::A);
        let blocks = empty_blocks(&graph);
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let result = find_path(&graph, &blocks, start, goal, &[], &[]).unwrap();
        assert_eq!(result.nodes.first().unwrap().node, start);
        assert_eq!(result.nodes.last().unwrap().node, goal);
        assert!(result.total_distance_mm > 0);
    }

    #[test]
    fn unreachable_goal_reports_no_path() {
        let graph = layout::load(TrackLayout::A);
        let blocks = empty_blocks(&graph);
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("ENT1").unwrap();
        let err = find_path(&graph, &blocks, start, goal, &[], &[]).unwrap_err();
        assert_eq!(err, MarklinError::NoPath);
    }

    #[test]
    fn excluded_block_forces_a_detour_or_failure() {
        let graph = layout::load(TrackLayout::A);
        let s1 = graph.find_by_name("S1").unwrap();
        let defs = [crate::block::BlockDef {
            block_id: 0,
            entry_sensors: &["S1"],
            exit_sensors: &[],
            internal_sensors: &[],
            turnouts: &[],
            connected_blocks: &[],
        }];
        let blocks = BlockTable::resolve(&graph, &defs).unwrap();
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let err = find_path(&graph, &blocks, start, goal, &[], &[BlockId(0)]).unwrap_err();
        assert_eq!(err, MarklinError::NoPath);
        let _ = s1;
    }

    fn activation_harness() -> (SchedulerHandle, Broker) {
        let uart = marklin_io::uart::spawn(
            marklin_io::uart::UartChannel::Marklin,
            Box::new(marklin_io::uart::LoopbackBackend::new()),
        );
        (marklin_io::scheduler::spawn(uart), Broker::new())
    }

    fn ring_defs() -> [crate::block::BlockDef; 2] {
        [
            crate::block::BlockDef {
                block_id: 0,
                entry_sensors: &["S0"],
                exit_sensors: &["S2"],
                internal_sensors: &["S1"],
                turnouts: &[],
                connected_blocks: &[1],
            },
            crate::block::BlockDef {
                block_id: 1,
                entry_sensors: &["S4"],
                exit_sensors: &["S7"],
                internal_sensors: &["S6"],
                turnouts: &["BR1"],
                connected_blocks: &[0],
            },
        ]
    }

    #[test]
    fn ample_budget_reserves_the_whole_path() {
        let graph = layout::load(TrackLayout::A);
        let mut blocks = BlockTable::resolve(&graph, &ring_defs()).unwrap();
        let mut switches = SwitchTable::new();
        let (scheduler, broker) = activation_harness();
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let path = find_path(&graph, &blocks, start, goal, &[], &[]).unwrap();

        let result = activate_path(
            &graph, &path, &mut blocks, &mut switches, &scheduler, &broker, TaskId(1), TrainId(7), 10_000, Tick(1),
        )
        .unwrap();

        assert_eq!(result.stop_reason, StopReason::EndOfPath);
        assert_eq!(result.furthest_activated_node, goal);
        assert!(!result.blocks_reserved.is_empty());
    }

    #[test]
    fn zero_budget_reserves_nothing() {
        let graph = layout::load(TrackLayout::A);
        let mut blocks = BlockTable::resolve(&graph, &ring_defs()).unwrap();
        let mut switches = SwitchTable::new();
        let (scheduler, broker) = activation_harness();
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let path = find_path(&graph, &blocks, start, goal, &[], &[]).unwrap();

        let result = activate_path(
            &graph, &path, &mut blocks, &mut switches, &scheduler, &broker, TaskId(1), TrainId(7), 0, Tick(1),
        )
        .unwrap();

        assert_eq!(result.stop_reason, StopReason::BudgetExceeded);
        assert!(result.blocks_reserved.is_empty());
        assert_eq!(result.furthest_activated_node, start);
    }

    #[test]
    fn destination_block_owned_by_another_train_reports_block_unavailable() {
        let graph = layout::load(TrackLayout::A);
        let mut blocks = BlockTable::resolve(&graph, &ring_defs()).unwrap();
        let mut switches = SwitchTable::new();
        let (scheduler, broker) = activation_harness();
        let start = graph.find_by_name("S0").unwrap();
        let goal = graph.find_by_name("S2").unwrap();
        let path = find_path(&graph, &blocks, start, goal, &[], &[]).unwrap();

        let s1 = graph.find_by_name("S1").unwrap();
        blocks.reserve(s1, TrainId(9), Tick(0)).unwrap();

        let result = activate_path(
            &graph, &path, &mut blocks, &mut switches, &scheduler, &broker, TaskId(1), TrainId(7), 10_000, Tick(1),
        )
        .unwrap();

        assert_eq!(result.stop_reason, StopReason::BlockUnavailable);
        assert_eq!(result.blocked_by_train, Some(TrainId(9)));
        assert!(result.blocks_reserved.is_empty());
    }
}
