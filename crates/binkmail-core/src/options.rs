//! Protocol option negotiation.
//!
//! binkp options (`NR` resume, `CRC` verification, `PLZ` compression) are
//! advertised as keywords on `M_NUL OPT` lines during the greeting. Each
//! side configures a per-feature mode; a feature is on only when both
//! sides agreed:
//!
//! ```text
//! local \ remote     absent        offered
//! None               off           off
//! Supported          off           on
//! Required           AuthFailed    on
//! ```
//!
//! The remote's *mode* is not observable — only whether it offered the
//! keyword. A remote that required a feature we did not advertise refuses
//! the session from its side with the same `AuthFailed` outcome, which is
//! how the full 3×3 mode table of the protocol emerges from this half.

use binkmail_crypto::{CramChallenge, CramError};

use crate::error::{Result, SessionError};

/// Local stance on one optional feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeatureMode {
    /// Do not advertise; never use.
    None,
    /// Advertise; use if the peer offers it too.
    #[default]
    Supported,
    /// Advertise; refuse the session if the peer does not offer it.
    Required,
}

impl FeatureMode {
    /// Whether this mode puts the keyword on our `OPT` line.
    #[must_use]
    pub fn advertises(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Outcome for this feature given whether the peer offered it.
    ///
    /// # Errors
    ///
    /// - `SessionError::AuthFailed` when the feature is required but the
    ///   peer did not offer it
    pub fn outcome(self, keyword: &'static str, remote_offered: bool) -> Result<bool> {
        match (self, remote_offered) {
            (Self::None, _) => Ok(false),
            (Self::Supported, offered) => Ok(offered),
            (Self::Required, true) => Ok(true),
            (Self::Required, false) => {
                Err(SessionError::AuthFailed(format!("peer does not support required {keyword}")))
            },
        }
    }
}

/// Per-feature local configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionsConfig {
    /// Non-reliable mode (resume of partial transfers).
    pub nr: FeatureMode,
    /// CRC32 verification of received files.
    pub crc: FeatureMode,
    /// Per-frame compression.
    pub plz: FeatureMode,
}

impl OptionsConfig {
    /// All features off; the minimal binkp/1.0 dialect.
    #[must_use]
    pub fn plain() -> Self {
        Self { nr: FeatureMode::None, crc: FeatureMode::None, plz: FeatureMode::None }
    }

    /// Keywords to put on our greeting's `OPT` line.
    #[must_use]
    pub fn advertised_keywords(&self) -> Vec<&'static str> {
        let mut keywords = Vec::new();
        if self.nr.advertises() {
            keywords.push("NR");
        }
        if self.crc.advertises() {
            keywords.push("CRC");
        }
        if self.plz.advertises() {
            keywords.push("PLZ");
        }
        keywords
    }
}

/// What the peer's `M_NUL OPT` lines contained.
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    /// Peer offered `NR`.
    pub nr: bool,
    /// Peer offered `CRC`.
    pub crc: bool,
    /// Peer offered `PLZ`.
    pub plz: bool,
    /// Peer issued a CRAM challenge.
    pub cram: Option<CramChallenge>,
}

impl RemoteOptions {
    /// Absorb one `M_NUL` argument line, collecting `OPT` keywords.
    ///
    /// Non-`OPT` info lines (`SYS`, `ZYZ`, …) are ignored here. Unknown
    /// keywords are skipped for forward compatibility; a malformed CRAM
    /// keyword is reported, since it breaks authentication.
    ///
    /// # Errors
    ///
    /// - `CramError` if a `CRAM-…` keyword is present but malformed
    pub fn absorb_nul(&mut self, line: &str) -> std::result::Result<(), CramError> {
        let Some(keywords) = line.trim_start().strip_prefix("OPT") else {
            return Ok(());
        };
        if !keywords.is_empty() && !keywords.starts_with(char::is_whitespace) {
            // "OPTIMIZED ..." is not an OPT line.
            return Ok(());
        }

        for keyword in keywords.split_whitespace() {
            match keyword {
                "NR" => self.nr = true,
                "CRC" => self.crc = true,
                "PLZ" => self.plz = true,
                other => {
                    if let Some(parsed) = CramChallenge::parse_keyword(other) {
                        self.cram = Some(parsed?);
                    } else {
                        tracing::debug!("ignoring unknown OPT keyword '{other}'");
                    }
                },
            }
        }
        Ok(())
    }
}

/// Features both sides agreed to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiatedOptions {
    /// Non-reliable mode is on.
    pub nr: bool,
    /// CRC verification is on.
    pub crc: bool,
    /// Per-frame compression is on.
    pub plz: bool,
}

/// Finalize negotiation once the peer's whole greeting has been seen.
///
/// # Errors
///
/// - `SessionError::AuthFailed` if a required feature was not offered
pub fn negotiate(local: &OptionsConfig, remote: &RemoteOptions) -> Result<NegotiatedOptions> {
    Ok(NegotiatedOptions {
        nr: local.nr.outcome("NR", remote.nr)?,
        crc: local.crc.outcome("CRC", remote.crc)?,
        plz: local.plz.outcome("PLZ", remote.plz)?,
    })
}
