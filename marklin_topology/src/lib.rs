//! Marklin Topology Library
//!
//! The static track graph, per-layout hardcoded tables, and the sensor
//! blacklist service.
//!
//! # Module Structure
//!
//! - [`graph`] — `TrackGraph`/`TrackNode`/`Edge` and structural validation.
//! - [`layout`] — the two hardcoded layouts (A, B) and their reversal blacklists.
//! - [`blacklist`] — the mutable sensor blacklist.
//! - [`server`] — `marklin_topology_server`, the named server fronting all of it.

pub mod blacklist;
pub mod graph;
pub mod layout;
pub mod server;
