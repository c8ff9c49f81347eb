//! Wire-level types for the binkp/1.0 protocol.
//!
//! binkp is FidoNet's binary point-to-point mail protocol: a TCP stream of
//! length-prefixed frames, where command frames carry a one-byte opcode and
//! an ASCII argument string, and data frames carry raw file bytes.
//!
//! This crate is pure data — no I/O, no session policy:
//!
//! - [`Frame`]: the 2-byte-header frame codec
//! - [`Command`]: the eleven binkp commands as a typed sum
//! - [`Address`]: FidoNet `zone:net/node.point@domain` addresses
//! - [`escape`]: file-name escaping for command arguments
//!
//! The session state machine that gives these types meaning lives in
//! `binkmail-core`.

pub mod address;
pub mod command;
pub mod errors;
pub mod escape;
pub mod frame;

pub use address::{Address, parse_address_list};
pub use command::{Command, FileAck, FileName, FileOffer, FileRef};
pub use errors::ProtocolError;
pub use frame::Frame;

/// Default binkp TCP port.
pub const DEFAULT_PORT: u16 = 24554;
