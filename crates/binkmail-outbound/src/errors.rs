//! Outbound-layer error types.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Result alias for outbound operations.
pub type Result<T> = std::result::Result<T, OutboundError>;

/// Errors from the BSO directory layer.
///
/// `Busy` is the one callers branch on: it means another process owns the
/// link right now and this poll should simply skip it. Everything else is
/// a filesystem fault that skips the link and gets recorded in its `.try`
/// file.
#[derive(Error, Debug)]
pub enum OutboundError {
    /// The link's busy lock is held by someone else.
    #[error("link is busy: {0} exists")]
    Busy(PathBuf),

    /// Underlying filesystem failure.
    #[error("outbound I/O error: {0}")]
    Io(#[from] io::Error),

    /// A name that should have been 8 lowercase hex digits was not.
    #[error("invalid hex node name '{0}'")]
    InvalidHex(String),

    /// A control-file payload did not parse.
    #[error("malformed {kind} file {path}: {detail}")]
    MalformedControl {
        /// Control-file kind, e.g. `"hold"`.
        kind: &'static str,
        /// Offending file.
        path: PathBuf,
        /// What was wrong.
        detail: String,
    },
}

impl OutboundError {
    /// True when the condition means "skip this link now, retry next
    /// poll" rather than "something is broken".
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
