//! Marklin Train Library
//!
//! One named server per running train: kinematic model, motion state,
//! the `train2`-style path state machine, sensor acceptance/timeout
//! handling, unified stopping logic, and Manual/Waypoint navigation.
//!
//! # Module Structure
//!
//! - [`kinematics`] — the 28-entry per-train speed table and EWMA calibration.
//! - [`motion`] — `MotionState`, the single source of truth for speed/position.
//! - [`state`] — the primary/movement/path/reversal state machine.
//! - [`sensor`] — sensor-trigger acceptance, timeout detection, address mapping.
//! - [`stopping`] — the unified prioritized stop-action decision.
//! - [`server`] — `marklin_train`, the per-train named server.

pub mod kinematics;
pub mod motion;
pub mod sensor;
pub mod server;
pub mod state;
pub mod stopping;
