//! CRAM challenge-response authentication for binkp sessions.
//!
//! binkp links share a per-link password. Sending it in plaintext works
//! but is replayable; CRAM (Challenge-Response Authentication Mechanism)
//! replaces the plaintext with an HMAC keyed by the password over a fresh
//! random challenge, advertised by the answering side in its greeting.
//!
//! - [`CramChallenge`]: challenge generation, `OPT` keyword formatting and
//!   parsing, response computation and verification
//! - [`CramAlgorithm`]: HMAC-MD5 and HMAC-SHA1, with SHA1 preferred
//! - [`Secret`]: a zeroize-on-drop password wrapper
//! - [`constant_time_eq`]: the non-short-circuiting comparison behind
//!   verification

pub mod cram;
pub mod secret;

pub use cram::{CHALLENGE_LEN, CramAlgorithm, CramChallenge, CramError, constant_time_eq};
pub use secret::Secret;
