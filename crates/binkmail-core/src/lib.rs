//! binkp session logic: state machine, option negotiation, and the
//! file-transfer engine.
//!
//! This crate is the policy layer between the wire types of
//! `binkmail-proto` and the transport/outbound plumbing in the mailer.
//! The central type is [`SessionMachine`]: a socket-free state machine
//! that consumes frames and emits [`session::SessionAction`]s, in the
//! action pattern — the driver owns the socket and the deadlines, the
//! machine owns every protocol decision.
//!
//! - [`options`]: `NR`/`CRC`/`PLZ` three-state negotiation
//! - [`crc`]: CRC32 over data frames and whole files
//! - [`compress`]: per-frame `PLZ` compression with silent fallback
//! - [`transfer`]: the send queue, the active receive, resume, post-send
//!   actions
//! - [`session`]: the originator/answerer handshake and transfer phases

pub mod compress;
pub mod crc;
pub mod error;
pub mod options;
pub mod session;
pub mod transfer;

pub use compress::{PlzCodec, PlzStats};
pub use crc::{Crc32, crc32, file_crc32};
pub use error::SessionError;
pub use options::{FeatureMode, NegotiatedOptions, OptionsConfig, RemoteOptions, negotiate};
pub use session::{
    Role, SessionAction, SessionConfig, SessionMachine, SessionState, SessionSummary,
};
pub use transfer::{CompletedFile, EngineOutput, OutboundFile, PostAction, TransferEngine};
