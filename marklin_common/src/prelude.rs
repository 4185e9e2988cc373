//! Convenience re-exports.
//!
//! ```rust
//! use marklin_common::prelude::*;
//! ```

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::{MarklinError, MarklinResult};

// ─── Identifiers ────────────────────────────────────────────────────
pub use crate::ids::{BlockId, NodeIndex, SwitchId, TaskId, Tick, TrainId};

// ─── Fixed-point arithmetic ─────────────────────────────────────────
pub use crate::fixed::Fixed;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, MarklinConfig, TrackLayout, TrainConfig};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{
    KINEMATIC_SCALE, MAX_SPEED, MAX_TRACK_BLOCKS, MAX_TRAINS, MIN_SPEED, TICK_MS, TRACK_MAX,
};
