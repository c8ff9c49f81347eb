//! Session-layer error types.
//!
//! One enum covers the whole session lifecycle: codec faults, protocol
//! violations, authentication failures, timeouts, and I/O. The driver
//! only needs two distinctions — [`SessionError::is_benign_idle`] for
//! timeouts during the transfer phase, and everything else, which ends
//! the session.

use std::time::Duration;

use thiserror::Error;

use binkmail_proto::ProtocolError;

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors that end (or in one case, merely pause) a binkp session.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Structural wire error from the codec layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer sent a command that is illegal in the current state.
    #[error("unexpected {verb} while {context}")]
    Unexpected {
        /// Protocol verb of the offending command.
        verb: &'static str,
        /// What the session was doing at the time.
        context: &'static str,
    },

    /// Semantically invalid peer behavior (bad counts, overruns).
    #[error("peer violation: {0}")]
    Violation(String),

    /// Socket-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// No frame arrived within the per-frame deadline.
    ///
    /// Benign while transferring (an idle peer is just quiet); fatal in
    /// any handshake state.
    #[error("frame timeout after {elapsed:?} while {context}")]
    Timeout {
        /// How long we waited.
        elapsed: Duration,
        /// What the session was doing at the time.
        context: &'static str,
    },

    /// The whole-session deadline expired.
    #[error("session deadline exceeded after {elapsed:?}")]
    Deadline {
        /// Session age when the deadline tripped.
        elapsed: Duration,
    },

    /// Password or CRAM verification failed, a mandatory option was not
    /// offered, or the remote did not present an acceptable address.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Local file I/O failure during transfer.
    #[error("file I/O error: {0}")]
    File(String),

    /// The peer terminated the session with `M_ERR`.
    #[error("peer reported error: {0}")]
    Remote(String),

    /// The peer answered `M_BSY`; retry later.
    #[error("peer busy: {0}")]
    RemoteBusy(String),
}

impl SessionError {
    /// Timeouts in the transfer phase just mean the peer has nothing to
    /// say right now; the driver loops instead of failing.
    #[must_use]
    pub fn is_benign_idle(&self) -> bool {
        matches!(self, Self::Timeout { context: "transferring", .. })
    }

    /// True for conditions worth retrying on a later poll (the link is
    /// fine, the moment was wrong).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RemoteBusy(_) | Self::Timeout { .. } | Self::Deadline { .. } | Self::Network(_)
        )
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::File(err.to_string())
    }
}
