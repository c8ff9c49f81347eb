//! BinkleyTerm Style Outbound: the on-disk job queue binkp mailers poll.
//!
//! BSO encodes "what to send to whom, and how urgently" entirely in file
//! names inside a per-zone directory tree. This crate owns that
//! convention:
//!
//! - [`layout`]: address → path derivation and directory scanning
//! - [`flow`]: `.flo`/`.out` flow files, directives, flavor ordering
//! - [`locks`]: `.bsy`/`.csy`/`.hld`/`.try` control files and the atomic
//!   exclusive-create interlock between concurrent mailers
//!
//! Everything here is plain blocking filesystem work; sessions borrow a
//! [`locks::LockGuard`] for their duration and the poller sequences all
//! writes inside that scope.

pub mod errors;
pub mod flow;
pub mod layout;
pub mod locks;

pub use errors::OutboundError;
pub use flow::{Directive, Flavor, FlowEntry, FlowFile, FlowKind, find_work, has_work, sort_flows};
pub use layout::{BsoLayout, ScanEntry, net_node_hex, parse_net_node_hex, scan_dir};
pub use locks::{HoldInfo, LockGuard, LockKind, acquire, bump_try, clear_hold, clear_try,
    is_busy, read_hold, read_try, reap_stale, set_hold};
