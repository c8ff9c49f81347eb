//! Fuzz target for command parsing
//!
//! # Invariants
//!
//! - Parsing arbitrary command payloads never panics
//! - Anything that parses re-encodes without panicking
//! - File-name unescaping is total (malformed escapes pass through)

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;

use binkmail_proto::{escape, Command, Frame};

fuzz_target!(|data: &[u8]| {
    if data.len() <= Frame::MAX_PAYLOAD {
        let frame = Frame { is_command: true, payload: Bytes::copy_from_slice(data) };
        if let Ok(command) = Command::from_frame(&frame) {
            let _ = command.to_frame();
        }
    }

    // Unescaping must accept any printable garbage.
    if let Ok(text) = std::str::from_utf8(data) {
        let raw = escape::unescape(text);
        let _ = escape::escape(&raw);
    }
});
