//! Marklin Runtime
//!
//! The message-passing substrate every other server in the workspace is
//! built on: the `Send`/`Receive`/`Reply` IPC primitives, the name service,
//! the clock service, and the typed pub/sub event bus.
//!
//! # Module Structure
//!
//! - [`ipc`] - request/reply channel primitives standing in for the kernel's
//!   `Send`/`Receive`/`Reply`/`AwaitEvent`
//! - [`name_server`] - `RegisterAs`/`WhoIs`
//! - [`clock`] - `Time`/`Delay`/`DelayUntil` with an ordered wait-list
//! - [`event`] - the typed events carried on the pub/sub bus
//! - [`pubsub`] - the message queue broker
//!
//! Every server here is a thread running a single-threaded `Receive` loop;
//! there is no async runtime anywhere in this crate.

pub mod clock;
pub mod event;
pub mod ipc;
pub mod name_server;
pub mod pubsub;
