//! Track blocks (§3 "Block"; §4.6 "Block release").
//!
//! Grounded on `conductor/block.h`'s `track_block_t` field set and
//! `block_definitions.h`'s name-based hardcoded table, resolved against a
//! [`marklin_topology::graph::TrackGraph`] at startup.

use heapless::Vec as HVec;

use marklin_common::consts::{
    MAX_BOUNDARY_SENSORS_PER_BLOCK, MAX_CONNECTED_BLOCKS_PER_BLOCK, MAX_INTERNAL_SENSORS_PER_BLOCK,
    MAX_TRACK_BLOCKS, MAX_TURNOUTS_PER_BLOCK,
};
use marklin_common::error::{MarklinError, MarklinResult};
use marklin_common::ids::{BlockId, NodeIndex, Tick, TrainId};
use marklin_topology::graph::TrackGraph;

/// Reservation/occupancy status of a block (§3 "Block").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Free,
    Reserved,
    Occupied,
}

/// A hardcoded block definition, named by sensor/turnout node names, before
/// it is resolved against a loaded [`TrackGraph`].
pub struct BlockDef {
    pub block_id: u32,
    pub entry_sensors: &'static [&'static str],
    pub exit_sensors: &'static [&'static str],
    pub internal_sensors: &'static [&'static str],
    pub turnouts: &'static [&'static str],
    pub connected_blocks: &'static [u32],
}

/// One resolved track block (§3 "Block").
#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub entry_sensors: HVec<NodeIndex, MAX_BOUNDARY_SENSORS_PER_BLOCK>,
    pub exit_sensors: HVec<NodeIndex, MAX_BOUNDARY_SENSORS_PER_BLOCK>,
    pub internal_sensors: HVec<NodeIndex, MAX_INTERNAL_SENSORS_PER_BLOCK>,
    pub turnouts: HVec<NodeIndex, MAX_TURNOUTS_PER_BLOCK>,
    pub connected_blocks: HVec<BlockId, MAX_CONNECTED_BLOCKS_PER_BLOCK>,
    pub owner_train_id: TrainId,
    pub reservation_time: Tick,
    pub occupied: bool,
    pub current_entry_sensor: Option<NodeIndex>,
    pub occupancy_time: Tick,
}

impl Block {
    pub fn status(&self) -> BlockStatus {
        if self.owner_train_id.is_none() {
            BlockStatus::Free
        } else if self.occupied {
            BlockStatus::Occupied
        } else {
            BlockStatus::Reserved
        }
    }

    fn contains_sensor(&self, node: NodeIndex) -> bool {
        self.entry_sensors.contains(&node)
            || self.exit_sensors.contains(&node)
            || self.internal_sensors.contains(&node)
    }

    fn is_boundary(&self, node: NodeIndex) -> bool {
        self.entry_sensors.contains(&node) || self.exit_sensors.contains(&node)
    }
}

/// The full set of resolved blocks for one layout, owned by the conductor.
pub struct BlockTable {
    blocks: HVec<Block, MAX_TRACK_BLOCKS>,
}

impl BlockTable {
    /// Resolve a hardcoded per-layout block table against a loaded graph.
    pub fn resolve(graph: &TrackGraph, defs: &[BlockDef]) -> MarklinResult<Self> {
        let mut blocks = HVec::new();
        for def in defs {
            let resolve_list = |names: &[&str], out: &mut HVec<NodeIndex, 8>| -> MarklinResult<()> {
                for name in names {
                    let idx = graph.find_by_name(name).ok_or(MarklinError::NotFound)?;
                    out.push(idx).map_err(|_| MarklinError::InvalidArgument)?;
                }
                Ok(())
            };
            let mut entry_sensors = HVec::new();
            resolve_list(def.entry_sensors, &mut entry_sensors)?;
            let mut exit_sensors = HVec::new();
            resolve_list(def.exit_sensors, &mut exit_sensors)?;
            let mut internal_sensors = HVec::new();
            resolve_list(def.internal_sensors, &mut internal_sensors)?;
            let mut turnouts = HVec::new();
            resolve_list(def.turnouts, &mut turnouts)?;
            let mut connected_blocks = HVec::new();
            for id in def.connected_blocks {
                connected_blocks.push(BlockId(*id)).map_err(|_| MarklinError::InvalidArgument)?;
            }
            blocks
                .push(Block {
                    id: BlockId(def.block_id),
                    entry_sensors,
                    exit_sensors,
                    internal_sensors,
                    turnouts,
                    connected_blocks,
                    owner_train_id: TrainId::NONE,
                    reservation_time: Tick(0),
                    occupied: false,
                    current_entry_sensor: None,
                    occupancy_time: Tick(0),
                })
                .map_err(|_| MarklinError::InvalidArgument)?;
        }
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    /// The block whose boundary or interior contains `node`, if any.
    pub fn containing_node(&self, node: NodeIndex) -> Option<&Block> {
        self.blocks.iter().find(|b| b.contains_sensor(node))
    }

    pub fn is_boundary_sensor(&self, node: NodeIndex) -> bool {
        self.blocks.iter().any(|b| b.is_boundary(node))
    }

    /// Attempt to reserve the block containing `node` for `train`. Fails
    /// with `AlreadyReserved` if owned by a different train; idempotent if
    /// already owned by `train`.
    pub fn reserve(&mut self, node: NodeIndex, train: TrainId, now: Tick) -> MarklinResult<BlockId> {
        let id = self.containing_node(node).map(|b| b.id).ok_or(MarklinError::NotFound)?;
        let block = self.get_mut(id).ok_or(MarklinError::NotFound)?;
        if block.owner_train_id.is_none() {
            block.owner_train_id = train;
            block.reservation_time = now;
            Ok(block.id)
        } else if block.owner_train_id == train {
            Ok(block.id)
        } else {
            Err(MarklinError::AlreadyReserved)
        }
    }

    /// Mark the block containing `node` occupied (physically detected).
    pub fn mark_occupied(&mut self, node: NodeIndex, now: Tick) {
        if let Some(block) = self.blocks.iter_mut().find(|b| b.contains_sensor(node)) {
            block.occupied = true;
            block.current_entry_sensor = Some(node);
            block.occupancy_time = now;
        }
    }

    /// Release the single block containing `node`, owned by `train`.
    /// `keep_block_node`, if supplied, aborts the release (returns
    /// `NotOwner`) unless the train still owns that other block too — used
    /// to atomically guarantee the train always retains its current block.
    pub fn release_block(
        &mut self,
        node: NodeIndex,
        train: TrainId,
        keep_block_node: Option<NodeIndex>,
    ) -> MarklinResult<BlockId> {
        if let Some(keep) = keep_block_node {
            let keep_owned = self
                .containing_node(keep)
                .map(|b| b.owner_train_id == train)
                .unwrap_or(false);
            if !keep_owned {
                return Err(MarklinError::NotOwner);
            }
        }
        let id = self.containing_node(node).map(|b| b.id).ok_or(MarklinError::NotFound)?;
        let block = self.get_mut(id).ok_or(MarklinError::NotFound)?;
        if block.owner_train_id != train {
            return Err(MarklinError::NotOwner);
        }
        block.owner_train_id = TrainId::NONE;
        block.occupied = false;
        block.current_entry_sensor = None;
        Ok(block.id)
    }

    /// Release every block owned by `train`, optionally keeping the block
    /// containing `except_node`. Returns the ids released.
    pub fn release_all_except(
        &mut self,
        train: TrainId,
        except_node: Option<NodeIndex>,
    ) -> HVec<BlockId, MAX_TRACK_BLOCKS> {
        let keep_id = except_node.and_then(|n| self.containing_node(n)).map(|b| b.id);
        let mut released = HVec::new();
        for block in self.blocks.iter_mut() {
            if block.owner_train_id == train && Some(block.id) != keep_id {
                block.owner_train_id = TrainId::NONE;
                block.occupied = false;
                block.current_entry_sensor = None;
                released.push(block.id).ok();
            }
        }
        released
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marklin_common::config::TrackLayout;
    use marklin_topology::layout;

    fn sample_table() -> BlockTable {
        let graph = layout::load(TrackLayout::A);
        let defs = [
            BlockDef {
                block_id: 0,
                entry_sensors: &["S0"],
                exit_sensors: &["S2"],
                internal_sensors: &["S1"],
                turnouts: &[],
                connected_blocks: &[1],
            },
            BlockDef {
                block_id: 1,
                entry_sensors: &["S4"],
                exit_sensors: &["S7"],
                internal_sensors: &["S6"],
                turnouts: &["BR1"],
                connected_blocks: &[0],
            },
        ];
        BlockTable::resolve(&graph, &defs).unwrap()
    }

    #[test]
    fn reserve_then_release_round_trips() {
        let graph = layout::load(TrackLayout::A);
        let mut table = sample_table();
        let s1 = graph.find_by_name("S1").unwrap();
        let block_id = table.reserve(s1, TrainId(5), Tick(10)).unwrap();
        assert_eq!(table.get(block_id).unwrap().status(), BlockStatus::Reserved);

        table.release_block(s1, TrainId(5), None).unwrap();
        assert_eq!(table.get(block_id).unwrap().status(), BlockStatus::Free);
    }

    #[test]
    fn reserve_by_another_train_is_rejected() {
        let graph = layout::load(TrackLayout::A);
        let mut table = sample_table();
        let s1 = graph.find_by_name("S1").unwrap();
        table.reserve(s1, TrainId(1), Tick(0)).unwrap();
        let err = table.reserve(s1, TrainId(2), Tick(0)).unwrap_err();
        assert_eq!(err, MarklinError::AlreadyReserved);
    }

    #[test]
    fn release_all_except_keeps_the_named_block() {
        let graph = layout::load(TrackLayout::A);
        let mut table = sample_table();
        let s1 = graph.find_by_name("S1").unwrap();
        let s6 = graph.find_by_name("S6").unwrap();
        table.reserve(s1, TrainId(3), Tick(0)).unwrap();
        table.reserve(s6, TrainId(3), Tick(0)).unwrap();

        let released = table.release_all_except(TrainId(3), Some(s1));
        assert_eq!(released.len(), 1);
        assert_eq!(table.containing_node(s1).unwrap().status(), BlockStatus::Reserved);
        assert_eq!(table.containing_node(s6).unwrap().status(), BlockStatus::Free);
    }

    #[test]
    fn release_with_unowned_keep_node_is_rejected() {
        let graph = layout::load(TrackLayout::A);
        let mut table = sample_table();
        let s1 = graph.find_by_name("S1").unwrap();
        let s6 = graph.find_by_name("S6").unwrap();
        table.reserve(s1, TrainId(3), Tick(0)).unwrap();
        let err = table.release_block(s1, TrainId(3), Some(s6)).unwrap_err();
        assert_eq!(err, MarklinError::NotOwner);
    }
}
