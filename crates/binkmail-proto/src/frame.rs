//! The binkp frame: a two-byte header and up to 32767 payload bytes.
//!
//! Wire layout (big endian):
//!
//! ```text
//! bit 15        T-bit: 1 = command frame, 0 = data frame
//! bits 14..0    payload length in bytes
//! [payload]     `length` raw bytes
//! ```
//!
//! `Frame` is a pure data holder; command semantics live in
//! [`crate::Command`]. The codec here is synchronous and buffer-based so
//! the transport layer can wrap it with whatever I/O discipline it needs.
//!
//! # Invariants
//!
//! - Size Consistency: the encoded length field always equals
//!   `payload.len()`; [`Frame::decode`] only yields frames whose payload
//!   length matches their header.
//! - Size Limit: `payload.len()` never exceeds [`Frame::MAX_PAYLOAD`];
//!   violations are rejected at construction and encoding.

use bytes::{BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// A single binkp frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// True for command frames (T-bit set), false for data frames.
    pub is_command: bool,
    /// Owned payload bytes; length ≤ [`Frame::MAX_PAYLOAD`].
    pub payload: Bytes,
}

impl Frame {
    /// Size of the frame header in bytes.
    pub const HEADER_LEN: usize = 2;

    /// Maximum payload length expressible in the 15-bit length field.
    pub const MAX_PAYLOAD: usize = 0x7FFF;

    /// Build a command frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the payload exceeds 32767 bytes
    pub fn command(payload: impl Into<Bytes>) -> Result<Self> {
        Self::new(true, payload.into())
    }

    /// Build a data frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the payload exceeds 32767 bytes
    pub fn data(payload: impl Into<Bytes>) -> Result<Self> {
        Self::new(false, payload.into())
    }

    fn new(is_command: bool, payload: Bytes) -> Result<Self> {
        if payload.len() > Self::MAX_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: Self::MAX_PAYLOAD,
            });
        }
        Ok(Self { is_command, payload })
    }

    /// Total encoded size: header plus payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.payload.len()
    }

    /// Encode into `dst` as header-then-payload.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the payload exceeds 32767 bytes
    ///   (possible only for frames constructed field-by-field)
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        if self.payload.len() > Self::MAX_PAYLOAD {
            return Err(ProtocolError::FrameTooLarge {
                size: self.payload.len(),
                max: Self::MAX_PAYLOAD,
            });
        }

        let mut header = self.payload.len() as u16;
        if self.is_command {
            header |= 0x8000;
        }
        dst.put_u16(header);
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Encode into a fresh byte vector.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        // Cannot fail: payload length was validated at construction.
        let _ = self.encode(&mut out);
        out
    }

    /// Decode one frame from the front of `bytes`.
    ///
    /// Returns the frame and the number of bytes consumed
    /// (`HEADER_LEN + payload length`). Trailing bytes are left for the
    /// next call, which is what makes this usable on a streaming buffer.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Truncated` if fewer bytes are available than the
    ///   header (or the header's length field) requires; read more and
    ///   retry
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: Self::HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let header = u16::from_be_bytes([bytes[0], bytes[1]]);
        let is_command = header & 0x8000 != 0;
        let length = (header & 0x7FFF) as usize;

        let total = Self::HEADER_LEN + length;
        if bytes.len() < total {
            return Err(ProtocolError::Truncated { expected: total, actual: bytes.len() });
        }

        let payload = Bytes::copy_from_slice(&bytes[Self::HEADER_LEN..total]);
        debug_assert_eq!(payload.len(), length);

        Ok((Self { is_command, payload }, total))
    }

    /// Split a raw header word into its T-bit and payload length.
    ///
    /// Transports that read the two header bytes separately from the
    /// payload use this to learn how many payload bytes to expect.
    #[must_use]
    pub fn parse_header(header: [u8; 2]) -> (bool, usize) {
        let word = u16::from_be_bytes(header);
        (word & 0x8000 != 0, (word & 0x7FFF) as usize)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for Frame {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (any::<bool>(), proptest::collection::vec(any::<u8>(), 0..2048))
                .prop_map(|(is_command, payload)| Frame {
                    is_command,
                    payload: Bytes::from(payload),
                })
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn frame_round_trip(frame in any::<Frame>()) {
            let wire = frame.to_bytes();
            prop_assert_eq!(wire.len(), Frame::HEADER_LEN + frame.payload.len());

            let (parsed, consumed) = Frame::decode(&wire).unwrap();
            prop_assert_eq!(consumed, wire.len());
            prop_assert_eq!(parsed, frame);
        }

        #[test]
        fn t_bit_matches_kind(frame in any::<Frame>()) {
            let wire = frame.to_bytes();
            prop_assert_eq!(wire[0] & 0x80 != 0, frame.is_command);
        }

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let _ = Frame::decode(&bytes);
        }
    }

    #[test]
    fn zero_length_command_frame_is_legal() {
        let frame = Frame::command(Bytes::new()).unwrap();
        let wire = frame.to_bytes();
        assert_eq!(wire, vec![0x80, 0x00]);

        let (parsed, consumed) = Frame::decode(&wire).unwrap();
        assert_eq!(consumed, 2);
        assert!(parsed.is_command);
        assert!(parsed.payload.is_empty());
    }

    #[test]
    fn oversized_payload_rejected() {
        let big = vec![0u8; Frame::MAX_PAYLOAD + 1];
        assert!(matches!(
            Frame::data(big),
            Err(ProtocolError::FrameTooLarge { size: 32768, max: 32767 })
        ));
    }

    #[test]
    fn max_payload_accepted() {
        let frame = Frame::data(vec![0xAA; Frame::MAX_PAYLOAD]).unwrap();
        let wire = frame.to_bytes();
        assert_eq!(wire.len(), 2 + Frame::MAX_PAYLOAD);
        assert_eq!(&wire[..2], &[0x7F, 0xFF]);
    }

    #[test]
    fn truncated_header_and_payload() {
        assert_eq!(
            Frame::decode(&[0x80]),
            Err(ProtocolError::Truncated { expected: 2, actual: 1 })
        );
        // Header claims 4 bytes of payload, only 2 present.
        assert_eq!(
            Frame::decode(&[0x00, 0x04, 0xAA, 0xBB]),
            Err(ProtocolError::Truncated { expected: 6, actual: 4 })
        );
    }

    #[test]
    fn decode_leaves_trailing_bytes() {
        let mut wire = Frame::command(&b"\x04ack"[..]).unwrap().to_bytes();
        wire.extend_from_slice(&[0xDE, 0xAD]);

        let (frame, consumed) = Frame::decode(&wire).unwrap();
        assert!(frame.is_command);
        assert_eq!(consumed, wire.len() - 2);
    }
}
