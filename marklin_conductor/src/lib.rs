//! Marklin Conductor Library
//!
//! Owns all dynamic track state: switch directions, sensor observations,
//! block reservations, path-finding and activation, and mutual-deadlock
//! detection.
//!
//! # Module Structure
//!
//! - [`block`] — `Block`/`BlockTable`, the hardcoded per-layout block table.
//! - [`switch`] — switch direction commands and the solenoid-disengage follow-up.
//! - [`sensor`] — the sensor polling pipeline.
//! - [`path`] — Dijkstra path-finding and path activation.
//! - [`deadlock`] — mutual-block detection and resolution.
//! - [`server`] — `marklin_conductor`, the named server tying it together.

pub mod block;
pub mod deadlock;
pub mod path;
pub mod sensor;
pub mod server;
pub mod switch;
