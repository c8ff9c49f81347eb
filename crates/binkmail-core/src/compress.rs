//! Per-frame PLZ compression.
//!
//! When both sides negotiate `PLZ`, each data frame's payload is zlib-
//! compressed individually. Compression that would not shrink the payload
//! falls back to sending the original bytes unchanged — the frame header
//! stays a plain binkp data frame either way, so the receiver cannot tell
//! from the header which path was taken. It inflates opportunistically: a
//! payload that does not start with a valid zlib header, or fails to
//! inflate, is passed through as-is.
//!
//! Already-compressed mail archives dominate real FidoNet traffic, so the
//! fallback path is the common one; the byte statistics exist to let the
//! operator see whether `PLZ` is paying for itself on a link.

use std::io::{Read, Write};

use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};

/// Upper bound on a single inflated frame.
///
/// A well-behaved peer compresses chunks of at most 32767 bytes, but the
/// ratio is unbounded in principle; the cap keeps a hostile frame from
/// ballooning memory.
const MAX_INFLATED: u64 = 1 << 20;

/// Running totals for one session's compressed traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlzStats {
    /// Payload bytes sent after compression won.
    pub compressed_out: u64,
    /// Payload bytes sent via the uncompressed fallback.
    pub raw_out: u64,
    /// Inbound payload bytes that inflated successfully.
    pub compressed_in: u64,
    /// Inbound payload bytes passed through unchanged.
    pub raw_in: u64,
}

/// Per-session PLZ codec.
#[derive(Debug, Default)]
pub struct PlzCodec {
    stats: PlzStats,
}

impl PlzCodec {
    /// Fresh codec with zeroed statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics so far.
    #[must_use]
    pub fn stats(&self) -> PlzStats {
        self.stats
    }

    /// Compress one outbound data payload.
    ///
    /// Returns the bytes to put on the wire: the zlib stream if it is
    /// strictly smaller than the input, otherwise the input itself.
    #[must_use]
    pub fn compress(&mut self, data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::default());
        let candidate = encoder
            .write_all(data)
            .and_then(|()| encoder.finish())
            .unwrap_or_else(|_| data.to_vec());

        if candidate.len() < data.len() {
            self.stats.compressed_out += candidate.len() as u64;
            candidate
        } else {
            self.stats.raw_out += data.len() as u64;
            data.to_vec()
        }
    }

    /// Undo [`PlzCodec::compress`] on an inbound data payload.
    #[must_use]
    pub fn decompress(&mut self, data: &[u8]) -> Vec<u8> {
        if !looks_like_zlib(data) {
            self.stats.raw_in += data.len() as u64;
            return data.to_vec();
        }

        let mut inflated = Vec::with_capacity(data.len() * 2);
        let mut decoder = ZlibDecoder::new(data).take(MAX_INFLATED);
        match decoder.read_to_end(&mut inflated) {
            Ok(_) => {
                self.stats.compressed_in += data.len() as u64;
                inflated
            },
            Err(_) => {
                // Raw payload that merely resembled a zlib header.
                self.stats.raw_in += data.len() as u64;
                data.to_vec()
            },
        }
    }
}

/// Cheap zlib header check: CM must be deflate and the CMF/FLG pair must
/// satisfy the header checksum.
fn looks_like_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let cmf = u16::from(data[0]);
    let flg = u16::from(data[1]);
    data[0] & 0x0F == 8 && (cmf * 256 + flg) % 31 == 0
}
