//! CRAM challenge-response authentication.
//!
//! The answering side of a binkp session may advertise a random challenge
//! in its greeting (`M_NUL OPT CRAM-MD5-<hex>` / `CRAM-SHA1-<hex>`); the
//! caller then proves knowledge of the shared password by sending
//! `M_PWD CRAM-<ALG>-<hmac_hex>` instead of plaintext, where the HMAC is
//! keyed by the password over the raw challenge bytes. The password never
//! crosses the wire and the challenge never repeats, so a captured session
//! cannot be replayed.
//!
//! # Security
//!
//! - Challenges are 32 bytes from the OS entropy source; if that fails, a
//!   clock-seeded stream cipher is used instead and a warning is logged.
//! - Response verification recomputes the expected digest and compares
//!   with [`constant_time_eq`], which inspects every byte regardless of
//!   where the first mismatch sits.

use hmac::{Hmac, Mac};
use md5::Md5;
use rand_chacha::{
    ChaCha12Rng,
    rand_core::{RngCore, SeedableRng},
};
use sha1::Sha1;
use thiserror::Error;

use crate::secret::Secret;

type HmacMd5 = Hmac<Md5>;
type HmacSha1 = Hmac<Sha1>;

/// Challenge length in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Errors from challenge parsing and response verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CramError {
    /// A `CRAM-…` keyword did not have the `CRAM-<ALG>-<hex>` shape.
    #[error("malformed CRAM keyword: {0}")]
    Malformed(String),

    /// The algorithm list contained nothing we implement.
    #[error("no supported CRAM algorithm in '{0}'")]
    UnsupportedAlgorithm(String),

    /// The response digest did not match the expected one.
    #[error("CRAM response verification failed")]
    AuthFailed,
}

/// HMAC algorithms usable for CRAM responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CramAlgorithm {
    /// HMAC-MD5 (the binkp baseline).
    Md5,
    /// HMAC-SHA1 (preferred when both sides support it).
    Sha1,
}

impl CramAlgorithm {
    /// Keyword label as it appears on the wire.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
        }
    }

    fn from_label(label: &str) -> Option<Self> {
        match label.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "SHA1" => Some(Self::Sha1),
            _ => None,
        }
    }

    /// Pick the strongest algorithm both sides support: SHA1 over MD5.
    #[must_use]
    pub fn select(offered: &[Self]) -> Option<Self> {
        offered.iter().copied().max()
    }

    /// HMAC of `data` keyed by `key`, as lowercase hex.
    #[must_use]
    pub fn hmac_hex(self, key: &[u8], data: &[u8]) -> String {
        match self {
            Self::Md5 => {
                let Ok(mut mac) = HmacMd5::new_from_slice(key) else {
                    unreachable!("HMAC accepts any key size");
                };
                mac.update(data);
                hex::encode(mac.finalize().into_bytes())
            },
            Self::Sha1 => {
                let Ok(mut mac) = HmacSha1::new_from_slice(key) else {
                    unreachable!("HMAC accepts any key size");
                };
                mac.update(data);
                hex::encode(mac.finalize().into_bytes())
            },
        }
    }
}

/// A CRAM challenge as issued by the answering side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CramChallenge {
    /// Raw challenge bytes (the HMAC input).
    pub bytes: Vec<u8>,
    /// Algorithms the issuer accepts responses in.
    pub algorithms: Vec<CramAlgorithm>,
}

impl CramChallenge {
    /// Generate a fresh challenge accepting both MD5 and SHA1 responses.
    ///
    /// Draws [`CHALLENGE_LEN`] bytes from the OS entropy source. If the
    /// OS source fails, falls back to a ChaCha stream seeded from the
    /// clock and process id and logs a warning; the session still gets a
    /// unique-per-call challenge.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; CHALLENGE_LEN];
        if let Err(err) = getrandom::fill(&mut bytes) {
            tracing::warn!("OS entropy unavailable ({err}), using clock-seeded challenge");
            let nanos = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64);
            let seed = nanos ^ (u64::from(std::process::id()) << 32);
            ChaCha12Rng::seed_from_u64(seed).fill_bytes(&mut bytes);
        }
        Self { bytes, algorithms: vec![CramAlgorithm::Md5, CramAlgorithm::Sha1] }
    }

    /// Challenge bytes as lowercase hex.
    #[must_use]
    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// `OPT` keywords advertising this challenge, one per algorithm.
    #[must_use]
    pub fn opt_keywords(&self) -> Vec<String> {
        let hex = self.hex();
        self.algorithms.iter().map(|alg| format!("CRAM-{}-{hex}", alg.label())).collect()
    }

    /// Parse a `CRAM-<ALG>-<hex>` keyword from a peer's `OPT` line.
    ///
    /// The `<ALG>` part may list several algorithms separated by `/`
    /// (`CRAM-MD5/SHA1-<hex>`), a form some mailers emit to advertise one
    /// challenge for all algorithms at once. Returns `None` for keywords
    /// that are not CRAM at all.
    ///
    /// # Errors
    ///
    /// - `CramError::Malformed` if the shape or hex is wrong
    /// - `CramError::UnsupportedAlgorithm` if no listed algorithm is known
    pub fn parse_keyword(keyword: &str) -> Option<Result<Self, CramError>> {
        let rest = keyword.strip_prefix("CRAM-")?;
        Some(Self::parse_body(keyword, rest))
    }

    fn parse_body(keyword: &str, rest: &str) -> Result<Self, CramError> {
        let (alg_part, hex_part) =
            rest.split_once('-').ok_or_else(|| CramError::Malformed(keyword.to_string()))?;

        let algorithms: Vec<CramAlgorithm> =
            alg_part.split('/').filter_map(CramAlgorithm::from_label).collect();
        if algorithms.is_empty() {
            return Err(CramError::UnsupportedAlgorithm(alg_part.to_string()));
        }

        let bytes =
            hex::decode(hex_part).map_err(|_| CramError::Malformed(keyword.to_string()))?;
        if bytes.is_empty() {
            return Err(CramError::Malformed(keyword.to_string()));
        }

        Ok(Self { bytes, algorithms })
    }

    /// Compute the `M_PWD` argument answering this challenge.
    ///
    /// Picks the strongest mutually supported algorithm.
    ///
    /// # Errors
    ///
    /// - `CramError::UnsupportedAlgorithm` if the challenge lists none we
    ///   implement (cannot happen for challenges built by `parse_keyword`)
    pub fn respond(&self, secret: &Secret) -> Result<String, CramError> {
        let algorithm = CramAlgorithm::select(&self.algorithms)
            .ok_or_else(|| CramError::UnsupportedAlgorithm("(none)".to_string()))?;
        let digest = algorithm.hmac_hex(secret.as_bytes(), &self.bytes);
        Ok(format!("CRAM-{}-{digest}", algorithm.label()))
    }

    /// Verify a peer's `M_PWD` response against this challenge.
    ///
    /// # Errors
    ///
    /// - `CramError::Malformed` if the response is not `CRAM-<ALG>-<hex>`
    /// - `CramError::UnsupportedAlgorithm` for an algorithm we did not
    ///   offer
    /// - `CramError::AuthFailed` on digest mismatch
    pub fn verify(&self, secret: &Secret, response: &str) -> Result<(), CramError> {
        let rest = response
            .strip_prefix("CRAM-")
            .ok_or_else(|| CramError::Malformed(response.to_string()))?;
        let (alg_label, digest_hex) =
            rest.split_once('-').ok_or_else(|| CramError::Malformed(response.to_string()))?;

        let algorithm = CramAlgorithm::from_label(alg_label)
            .filter(|alg| self.algorithms.contains(alg))
            .ok_or_else(|| CramError::UnsupportedAlgorithm(alg_label.to_string()))?;

        let expected = algorithm.hmac_hex(secret.as_bytes(), &self.bytes);
        if constant_time_eq(expected.as_bytes(), digest_hex.to_ascii_lowercase().as_bytes()) {
            Ok(())
        } else {
            Err(CramError::AuthFailed)
        }
    }
}

/// Compare two byte strings without early exit.
///
/// Every byte pair feeds an accumulator; the comparison touches all bytes
/// even after a mismatch, so timing does not reveal the position of the
/// first differing byte. Inputs of unequal length compare unequal after a
/// full pass over the shorter one.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let mut acc = (a.len() ^ b.len()) as u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}
