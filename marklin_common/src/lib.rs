//! Marklin Common Library
//!
//! Shared identifiers, constants, error taxonomy, fixed-point arithmetic and
//! configuration loading used by every crate in the Marklin train-control
//! workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - system-wide numeric limits and defaults
//! - [`ids`] - newtype identifiers (`TaskId`, `TrainId`, `Tick`, …)
//! - [`error`] - the flat error taxonomy shared by every server reply
//! - [`fixed`] - saturating fixed-point arithmetic for the kinematic model
//! - [`config`] - TOML configuration loading
//! - [`prelude`] - common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use marklin_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod fixed;
pub mod ids;
pub mod prelude;
