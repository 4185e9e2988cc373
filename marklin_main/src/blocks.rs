//! Hardcoded per-layout block tables, fed to `marklin_conductor::server::spawn`.
//!
//! The original `block_definitions.c` per-node C tables were never present
//! in the retrieval pack (see `marklin_topology::layout`'s doc comment), so
//! these are generated against the reverse-consistent ring layouts that
//! module builds: one block per ring segment between consecutive
//! branch/merge boundaries, plus the siding and the exit spur as their own
//! blocks.

use marklin_common::config::TrackLayout;
use marklin_conductor::block::BlockDef;

/// Layout A: ring boundaries at `BR1` (siding branch), `MG1` (siding merge),
/// and `S8` (exit branch).
pub static BLOCK_DEFS_A: &[BlockDef] = &[
    BlockDef {
        block_id: 0,
        entry_sensors: &["BR1"],
        exit_sensors: &["MG1"],
        internal_sensors: &["S4"],
        turnouts: &["BR1"],
        connected_blocks: &[1, 3],
    },
    BlockDef {
        block_id: 1,
        entry_sensors: &["MG1"],
        exit_sensors: &["S8"],
        internal_sensors: &["S6", "S7"],
        turnouts: &["MG1"],
        connected_blocks: &[0, 2, 4],
    },
    BlockDef {
        block_id: 2,
        entry_sensors: &["S8"],
        exit_sensors: &["BR1"],
        internal_sensors: &["S9", "S0", "S1", "S2"],
        turnouts: &["S8"],
        connected_blocks: &[1, 0, 3, 4],
    },
    BlockDef {
        block_id: 3,
        entry_sensors: &["BR1"],
        exit_sensors: &["MG1"],
        internal_sensors: &["SD1", "SD2"],
        turnouts: &[],
        connected_blocks: &[0, 2],
    },
    BlockDef {
        block_id: 4,
        entry_sensors: &["S8"],
        exit_sensors: &[],
        internal_sensors: &["EX1"],
        turnouts: &[],
        connected_blocks: &[1, 2],
    },
];

/// Layout B: ring boundaries at `BR1`, `MG1`, and `S7`.
pub static BLOCK_DEFS_B: &[BlockDef] = &[
    BlockDef {
        block_id: 0,
        entry_sensors: &["BR1"],
        exit_sensors: &["MG1"],
        internal_sensors: &["S3"],
        turnouts: &["BR1"],
        connected_blocks: &[1, 3],
    },
    BlockDef {
        block_id: 1,
        entry_sensors: &["MG1"],
        exit_sensors: &["S7"],
        internal_sensors: &["S5", "S6"],
        turnouts: &["MG1"],
        connected_blocks: &[0, 2, 4],
    },
    BlockDef {
        block_id: 2,
        entry_sensors: &["S7"],
        exit_sensors: &["BR1"],
        internal_sensors: &["S8", "S9", "S10", "S11", "S0", "S1"],
        turnouts: &["S7"],
        connected_blocks: &[1, 0, 3, 4],
    },
    BlockDef {
        block_id: 3,
        entry_sensors: &["BR1"],
        exit_sensors: &["MG1"],
        internal_sensors: &["SD1", "SD2"],
        turnouts: &[],
        connected_blocks: &[0, 2],
    },
    BlockDef {
        block_id: 4,
        entry_sensors: &["S7"],
        exit_sensors: &[],
        internal_sensors: &["EX1"],
        turnouts: &[],
        connected_blocks: &[1, 2],
    },
];

/// Resolve the hardcoded block table for `layout`.
pub fn for_layout(layout: TrackLayout) -> &'static [BlockDef] {
    match layout {
        TrackLayout::A => BLOCK_DEFS_A,
        TrackLayout::B => BLOCK_DEFS_B,
    }
}
