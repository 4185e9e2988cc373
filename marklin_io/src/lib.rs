//! Marklin IO Library
//!
//! UART I/O service and the Marklin command scheduler: the layer between
//! the conductor/train logic and the physical (or loopback) serial wire.
//!
//! # Module Structure
//!
//! - [`uart`] — `Getc`/`TryGetc`/`Putc`/`Putn` server per UART channel.
//! - [`wire`] — Marklin opcode encoding/decoding.
//! - [`scheduler`] — priority command queue fronting the Marklin UART.

pub mod scheduler;
pub mod uart;
pub mod wire;
