//! CRC32 over data frames and whole files.
//!
//! Standard IEEE CRC32 (the reflected `0xEDB88320` polynomial), delegated
//! to `crc32fast`. The streaming wrapper exists so the transfer engine
//! can feed incoming data frames incrementally and so a partial file's
//! CRC can be resumed from its already-computed prefix value.

use std::{io::Read, path::Path};

/// Chunk size for whole-file CRC streaming.
const FILE_CHUNK: usize = 32 * 1024;

/// Incremental CRC32 state.
#[derive(Clone)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Crc32({:#010x})", self.value())
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Fresh state; `value()` of it is 0.
    #[must_use]
    pub fn new() -> Self {
        Self { hasher: crc32fast::Hasher::new() }
    }

    /// Continue from a previously finished CRC value, as if the bytes
    /// that produced it had been fed to this state.
    #[must_use]
    pub fn resume(crc: u32) -> Self {
        Self { hasher: crc32fast::Hasher::new_with_initial(crc) }
    }

    /// Feed bytes.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// CRC of everything fed so far.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.hasher.clone().finalize()
    }
}

/// One-shot CRC32 of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut state = Crc32::new();
    state.update(bytes);
    state.value()
}

/// CRC32 of a whole file, streamed in fixed-size chunks.
pub fn file_crc32(path: &Path) -> std::io::Result<u32> {
    let mut file = std::fs::File::open(path)?;
    let mut state = Crc32::new();
    let mut buf = vec![0u8; FILE_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        state.update(&buf[..n]);
    }
    Ok(state.value())
}

/// CRC32 of the first `limit` bytes of a file.
///
/// Used when resuming a receive: the running CRC must cover the bytes
/// already on disk before new data frames are folded in.
pub fn file_prefix_crc32(path: &Path, limit: u64) -> std::io::Result<u32> {
    let file = std::fs::File::open(path)?;
    let mut reader = file.take(limit);
    let mut state = Crc32::new();
    let mut buf = vec![0u8; FILE_CHUNK];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        state.update(&buf[..n]);
    }
    Ok(state.value())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn known_answer() {
        // The classic check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn file_crc_matches_slice_crc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let body: Vec<u8> = (0u32..100_000).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &body).unwrap();

        assert_eq!(file_crc32(&path).unwrap(), crc32(&body));
        assert_eq!(file_prefix_crc32(&path, 1234).unwrap(), crc32(&body[..1234]));
    }

    proptest! {
        #[test]
        fn concatenation_equals_resume(
            a in proptest::collection::vec(any::<u8>(), 0..512),
            b in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let whole = {
                let mut joined = a.clone();
                joined.extend_from_slice(&b);
                crc32(&joined)
            };

            let mut resumed = Crc32::resume(crc32(&a));
            resumed.update(&b);
            prop_assert_eq!(resumed.value(), whole);
        }

        #[test]
        fn chunked_equals_one_shot(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let mut state = Crc32::new();
            for chunk in data.chunks(17) {
                state.update(chunk);
            }
            prop_assert_eq!(state.value(), crc32(&data));
        }
    }
}
