//! Wire-layer error types.
//!
//! Structural errors only: a `ProtocolError` means the bytes on the wire
//! (or about to go on the wire) do not form a valid binkp frame, command,
//! or address. Session-level policy (what to do about a malformed peer)
//! lives in `binkmail-core`.

use thiserror::Error;

/// Result alias for wire-layer operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding binkp wire data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload exceeds the 15-bit length field of the frame header.
    #[error("frame payload too large: {size} bytes exceeds {max}")]
    FrameTooLarge {
        /// Offending payload length.
        size: usize,
        /// Maximum payload length the header can express.
        max: usize,
    },

    /// Not enough bytes to decode a complete frame.
    ///
    /// This is a resumable condition, not a peer fault: the caller should
    /// read more bytes and retry.
    #[error("frame truncated: need {expected} bytes, have {actual}")]
    Truncated {
        /// Total bytes required for the frame (header + payload).
        expected: usize,
        /// Bytes available so far.
        actual: usize,
    },

    /// Command frame with an empty payload (no opcode byte).
    #[error("empty command frame")]
    EmptyCommand,

    /// Command arguments do not match the command's syntax.
    #[error("malformed {command} arguments: {detail}")]
    InvalidCommand {
        /// Command verb, e.g. `"M_FILE"`.
        command: &'static str,
        /// What was wrong with the arguments.
        detail: String,
    },

    /// A FidoNet address failed to parse or had a zero zone/net.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}
