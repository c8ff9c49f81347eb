//! Fuzz target for frame decoding
//!
//! # Invariants
//!
//! - Decoding arbitrary bytes never panics
//! - A successful decode consumes exactly `2 + payload_len` bytes
//! - Re-encoding a decoded frame reproduces the consumed prefix

#![no_main]

use libfuzzer_sys::fuzz_target;

use binkmail_proto::Frame;

fuzz_target!(|data: &[u8]| {
    match Frame::decode(data) {
        Ok((frame, consumed)) => {
            assert_eq!(consumed, Frame::HEADER_LEN + frame.payload.len());
            assert!(consumed <= data.len());
            let wire = frame.to_bytes();
            assert_eq!(&wire[..], &data[..consumed]);
        }
        Err(_) => {
            // Truncated input is the only failure mode on decode; either
            // way, no panic.
        }
    }
});
