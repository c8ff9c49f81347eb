//! binkp/1.0 mailer over TCP with a BinkleyTerm Style Outbound queue.
//!
//! The library half of the `binkmail` binary:
//!
//! - [`transport`]: frame reader/writer over async byte streams
//! - [`driver`]: runs one [`binkmail_core::SessionMachine`] over one
//!   connection, with deadlines and the inbound BSY interlock
//! - [`poller`]: one outbound poll pass over the configured links
//! - [`listener`]: the inbound accept loop
//! - [`config`]: typed mailer and link configuration

pub mod config;
pub mod driver;
pub mod listener;
pub mod poller;
pub mod transport;

pub use config::{LinkConfig, MailerConfig};
pub use driver::{SessionLock, SessionOutcome, run_session};
pub use listener::Listener;
pub use poller::{LinkOutcome, PollReport, poll_links};
