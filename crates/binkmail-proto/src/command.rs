//! Typed binkp commands.
//!
//! A command frame's first payload byte is the opcode; the rest is an
//! argument byte string whose syntax depends on the command. [`Command`]
//! models that as one enum arm per opcode with typed fields, plus an
//! [`Command::Unknown`] arm so unrecognized opcodes survive parsing — the
//! session layer decides to ignore them, the codec never drops them.
//!
//! Argument text is ASCII except for file names, which arrive escaped
//! (see [`crate::escape`]) and are held as raw bytes in [`FileName`].

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    address::{Address, parse_address_list},
    errors::{ProtocolError, Result},
    escape,
    frame::Frame,
};

/// A file name as carried by `M_FILE`/`M_GOT`/`M_GET`/`M_SKIP`.
///
/// Kept as raw bytes: peers may send 8-bit names from legacy DOS code
/// pages, and the escaped wire form round-trips through here unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(Vec<u8>);

impl FileName {
    /// Wrap raw name bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Decode an escaped wire-form name.
    #[must_use]
    pub fn from_escaped(escaped: &str) -> Self {
        Self(escape::unescape(escaped))
    }

    /// Raw name bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Escaped wire form (always printable ASCII, no spaces).
    #[must_use]
    pub fn escaped(&self) -> String {
        escape::escape(&self.0)
    }

    /// A name safe to use as a local path component.
    ///
    /// Strips any directory part a hostile peer may have embedded (both
    /// `/` and `\` separators), replaces non-UTF-8 bytes, and never
    /// returns an empty string.
    #[must_use]
    pub fn local_name(&self) -> String {
        let tail_start = self
            .0
            .iter()
            .rposition(|&b| b == b'/' || b == b'\\')
            .map_or(0, |pos| pos + 1);
        let tail = &self.0[tail_start..];
        let name = String::from_utf8_lossy(tail);
        let name = name.trim_matches('.');
        if name.is_empty() { "unnamed".to_string() } else { name.to_string() }
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.escaped())
    }
}

impl From<&str> for FileName {
    fn from(name: &str) -> Self {
        Self(name.as_bytes().to_vec())
    }
}

/// Arguments of `M_FILE`: an offer to send a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    /// File name (unescaped).
    pub name: FileName,
    /// Total file size in bytes.
    pub size: u64,
    /// File modification time, Unix seconds.
    pub unix_time: u64,
    /// Starting offset: 0 for a fresh send, positive for a resume.
    pub offset: u64,
    /// CRC32 of the whole file, present when CRC was negotiated.
    pub crc32: Option<u32>,
}

/// Arguments of `M_GOT`: acknowledges a completely received file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAck {
    /// File name (unescaped).
    pub name: FileName,
    /// Byte count the receiver ended up with.
    pub size: u64,
}

/// Arguments of `M_GET` and `M_SKIP`: a file name plus an offset.
///
/// For `M_GET` the offset is where the peer should restart sending; for
/// `M_SKIP` it records how far the receiver got before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// File name (unescaped).
    pub name: FileName,
    /// Byte offset.
    pub offset: u64,
}

/// A binkp command, one arm per opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `M_NUL` — free-form system information (`SYS`, `ZYZ`, `OPT …`).
    Nul(String),
    /// `M_ADR` — the sender's address list.
    Address(Vec<Address>),
    /// `M_PWD` — plaintext password or `CRAM-…` response.
    Password(String),
    /// `M_FILE` — offer of a file at an offset.
    File(FileOffer),
    /// `M_OK` — password accepted (argument is informational).
    Ok(String),
    /// `M_EOB` — sender has no more files to offer.
    Eob,
    /// `M_GOT` — file fully received; sender may apply its post-action.
    Got(FileAck),
    /// `M_ERR` — fatal session error with a human-readable reason.
    Err(String),
    /// `M_BSY` — try again later.
    Busy(String),
    /// `M_GET` — restart sending the named file from an offset.
    Get(FileRef),
    /// `M_SKIP` — stop sending the named file.
    Skip(FileRef),
    /// Opcode outside 0..=10; kept so the session can log and ignore it.
    Unknown(u8, Bytes),
}

impl Command {
    /// `M_NUL` opcode.
    pub const M_NUL: u8 = 0;
    /// `M_ADR` opcode.
    pub const M_ADR: u8 = 1;
    /// `M_PWD` opcode.
    pub const M_PWD: u8 = 2;
    /// `M_FILE` opcode.
    pub const M_FILE: u8 = 3;
    /// `M_OK` opcode.
    pub const M_OK: u8 = 4;
    /// `M_EOB` opcode.
    pub const M_EOB: u8 = 5;
    /// `M_GOT` opcode.
    pub const M_GOT: u8 = 6;
    /// `M_ERR` opcode.
    pub const M_ERR: u8 = 7;
    /// `M_BSY` opcode.
    pub const M_BSY: u8 = 8;
    /// `M_GET` opcode.
    pub const M_GET: u8 = 9;
    /// `M_SKIP` opcode.
    pub const M_SKIP: u8 = 10;

    /// The opcode byte this command encodes to.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Nul(_) => Self::M_NUL,
            Self::Address(_) => Self::M_ADR,
            Self::Password(_) => Self::M_PWD,
            Self::File(_) => Self::M_FILE,
            Self::Ok(_) => Self::M_OK,
            Self::Eob => Self::M_EOB,
            Self::Got(_) => Self::M_GOT,
            Self::Err(_) => Self::M_ERR,
            Self::Busy(_) => Self::M_BSY,
            Self::Get(_) => Self::M_GET,
            Self::Skip(_) => Self::M_SKIP,
            Self::Unknown(op, _) => *op,
        }
    }

    /// Protocol verb for logging, e.g. `"M_FILE"`.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Nul(_) => "M_NUL",
            Self::Address(_) => "M_ADR",
            Self::Password(_) => "M_PWD",
            Self::File(_) => "M_FILE",
            Self::Ok(_) => "M_OK",
            Self::Eob => "M_EOB",
            Self::Got(_) => "M_GOT",
            Self::Err(_) => "M_ERR",
            Self::Busy(_) => "M_BSY",
            Self::Get(_) => "M_GET",
            Self::Skip(_) => "M_SKIP",
            Self::Unknown(..) => "M_???",
        }
    }

    /// Encode into a command frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the argument string overflows
    ///   the frame payload limit
    pub fn to_frame(&self) -> Result<Frame> {
        let args = self.encode_args();
        let mut payload = BytesMut::with_capacity(1 + args.len());
        payload.put_u8(self.opcode());
        payload.put_slice(&args);
        Frame::command(payload.freeze())
    }

    fn encode_args(&self) -> Vec<u8> {
        match self {
            Self::Nul(text) | Self::Password(text) | Self::Ok(text) | Self::Err(text)
            | Self::Busy(text) => text.as_bytes().to_vec(),
            Self::Address(addresses) => {
                let joined: Vec<String> = addresses.iter().map(ToString::to_string).collect();
                joined.join(" ").into_bytes()
            },
            Self::File(offer) => {
                let mut args = format!(
                    "{} {} {} {}",
                    offer.name.escaped(),
                    offer.size,
                    offer.unix_time,
                    offer.offset
                );
                if let Some(crc) = offer.crc32 {
                    args.push_str(&format!(" {crc:08x}"));
                }
                args.into_bytes()
            },
            Self::Eob => Vec::new(),
            Self::Got(ack) => format!("{} {}", ack.name.escaped(), ack.size).into_bytes(),
            Self::Get(fref) | Self::Skip(fref) => {
                format!("{} {}", fref.name.escaped(), fref.offset).into_bytes()
            },
            Self::Unknown(_, args) => args.to_vec(),
        }
    }

    /// Parse a command frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyCommand` if the payload has no opcode byte
    /// - `ProtocolError::InvalidCommand` on malformed arguments
    /// - `ProtocolError::InvalidAddress` on a bad `M_ADR` entry
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        debug_assert!(frame.is_command);

        let Some((&opcode, args)) = frame.payload.split_first() else {
            return Err(ProtocolError::EmptyCommand);
        };

        // Arguments are nominally ASCII; anything 8-bit inside file names
        // arrives escaped, so lossy conversion cannot corrupt them.
        let text = String::from_utf8_lossy(args);

        match opcode {
            Self::M_NUL => Ok(Self::Nul(text.into_owned())),
            Self::M_ADR => Ok(Self::Address(parse_address_list(&text)?)),
            Self::M_PWD => Ok(Self::Password(text.trim().to_string())),
            Self::M_FILE => parse_file_offer(&text).map(Self::File),
            Self::M_OK => Ok(Self::Ok(text.trim().to_string())),
            Self::M_EOB => Ok(Self::Eob),
            Self::M_GOT => parse_file_ack(&text).map(Self::Got),
            Self::M_ERR => Ok(Self::Err(text.trim().to_string())),
            Self::M_BSY => Ok(Self::Busy(text.trim().to_string())),
            Self::M_GET => parse_file_ref("M_GET", &text).map(Self::Get),
            Self::M_SKIP => parse_file_ref("M_SKIP", &text).map(Self::Skip),
            other => Ok(Self::Unknown(other, Bytes::copy_from_slice(args))),
        }
    }
}

fn parse_number(command: &'static str, field: &'static str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| ProtocolError::InvalidCommand {
        command,
        detail: format!("{field} is not a number: '{value}'"),
    })
}

/// `M_FILE name size unix_time [offset [crc32_hex]]`
fn parse_file_offer(args: &str) -> Result<FileOffer> {
    let mut fields = args.split_whitespace();
    let missing = |field: &'static str| ProtocolError::InvalidCommand {
        command: "M_FILE",
        detail: format!("missing {field}"),
    };

    let name = FileName::from_escaped(fields.next().ok_or_else(|| missing("name"))?);
    let size = parse_number("M_FILE", "size", fields.next().ok_or_else(|| missing("size"))?)?;
    let unix_time =
        parse_number("M_FILE", "timestamp", fields.next().ok_or_else(|| missing("timestamp"))?)?;
    let offset = match fields.next() {
        Some(value) => parse_number("M_FILE", "offset", value)?,
        None => 0,
    };
    let crc32 = match fields.next() {
        Some(value) => {
            Some(u32::from_str_radix(value, 16).map_err(|_| ProtocolError::InvalidCommand {
                command: "M_FILE",
                detail: format!("crc32 is not hex: '{value}'"),
            })?)
        },
        None => None,
    };

    Ok(FileOffer { name, size, unix_time, offset, crc32 })
}

/// `M_GOT name size [...]` — extra trailing fields from other mailers
/// (e.g. a timestamp) are tolerated and ignored.
fn parse_file_ack(args: &str) -> Result<FileAck> {
    let mut fields = args.split_whitespace();
    let name = FileName::from_escaped(fields.next().ok_or(ProtocolError::InvalidCommand {
        command: "M_GOT",
        detail: "missing name".to_string(),
    })?);
    let size = parse_number(
        "M_GOT",
        "size",
        fields.next().ok_or(ProtocolError::InvalidCommand {
            command: "M_GOT",
            detail: "missing size".to_string(),
        })?,
    )?;
    Ok(FileAck { name, size })
}

/// `M_GET`/`M_SKIP` `name offset`. Some mailers send the long
/// `name size time offset` form; the last numeric field wins.
fn parse_file_ref(command: &'static str, args: &str) -> Result<FileRef> {
    let mut fields = args.split_whitespace();
    let name = FileName::from_escaped(fields.next().ok_or(ProtocolError::InvalidCommand {
        command,
        detail: "missing name".to_string(),
    })?);

    let last = fields.last().ok_or(ProtocolError::InvalidCommand {
        command,
        detail: "missing offset".to_string(),
    })?;
    let offset = parse_number(command, "offset", last)?;

    Ok(FileRef { name, offset })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(command: &Command) -> Command {
        let frame = command.to_frame().unwrap();
        Command::from_frame(&frame).unwrap()
    }

    #[test]
    fn opcodes_are_the_wire_values() {
        assert_eq!(Command::Nul(String::new()).opcode(), 0);
        assert_eq!(Command::Eob.opcode(), 5);
        assert_eq!(
            Command::Skip(FileRef { name: FileName::from("x"), offset: 0 }).opcode(),
            10
        );
    }

    #[test]
    fn nul_and_eob_round_trip() {
        let nul = Command::Nul("SYS Example BBS".to_string());
        assert_eq!(round_trip(&nul), nul);
        assert_eq!(round_trip(&Command::Eob), Command::Eob);
    }

    #[test]
    fn address_round_trip() {
        let cmd = Command::Address(vec![
            Address::new(2, 5020, 999),
            Address::new(2, 5020, 999).with_point(3),
        ]);
        assert_eq!(round_trip(&cmd), cmd);
    }

    #[test]
    fn file_offer_round_trip_with_crc() {
        let offer = FileOffer {
            name: FileName::from("packet 01.pkt"),
            size: 1000,
            unix_time: 1_700_000_000,
            offset: 200,
            crc32: Some(0xDEAD_BEEF),
        };
        let got = round_trip(&Command::File(offer.clone()));
        assert_eq!(got, Command::File(offer));
    }

    #[test]
    fn file_offer_without_offset_defaults_to_zero() {
        let frame = Frame::command(&b"\x03data.zip 1000 1700000000"[..]).unwrap();
        let Command::File(offer) = Command::from_frame(&frame).unwrap() else {
            unreachable!("expected M_FILE");
        };
        assert_eq!(offer.offset, 0);
        assert_eq!(offer.crc32, None);
    }

    #[test]
    fn file_offer_missing_fields_rejected() {
        for bad in ["", "name", "name 12", "name twelve 0", "name 12 now"] {
            let mut payload = vec![Command::M_FILE];
            payload.extend_from_slice(bad.as_bytes());
            let frame = Frame::command(payload).unwrap();
            assert!(Command::from_frame(&frame).is_err(), "'{bad}' should be rejected");
        }
    }

    #[test]
    fn got_tolerates_trailing_fields() {
        let frame = Frame::command(&b"\x06data.zip 1000 1700000000"[..]).unwrap();
        let Command::Got(ack) = Command::from_frame(&frame).unwrap() else {
            unreachable!("expected M_GOT");
        };
        assert_eq!(ack.size, 1000);
    }

    #[test]
    fn get_accepts_long_form() {
        // binkd sends "M_GET name size time offset".
        let frame = Frame::command(&b"\x09data.zip 1000 1700000000 200"[..]).unwrap();
        let Command::Get(fref) = Command::from_frame(&frame).unwrap() else {
            unreachable!("expected M_GET");
        };
        assert_eq!(fref.offset, 200);

        let short = Frame::command(&b"\x09data.zip 200"[..]).unwrap();
        let Command::Get(fref) = Command::from_frame(&short).unwrap() else {
            unreachable!("expected M_GET");
        };
        assert_eq!(fref.offset, 200);
    }

    #[test]
    fn unknown_opcode_survives() {
        let frame = Frame::command(&b"\x2AEXTENSION data"[..]).unwrap();
        let Command::Unknown(op, args) = Command::from_frame(&frame).unwrap() else {
            unreachable!("expected Unknown");
        };
        assert_eq!(op, 0x2A);
        assert_eq!(&args[..], b"EXTENSION data");
    }

    #[test]
    fn empty_payload_rejected() {
        let frame = Frame { is_command: true, payload: Bytes::new() };
        assert_eq!(Command::from_frame(&frame), Err(ProtocolError::EmptyCommand));
    }

    #[test]
    fn escaped_name_with_spaces_survives() {
        let offer = FileOffer {
            name: FileName::new(b"weird name\x01.zip".to_vec()),
            size: 5,
            unix_time: 0,
            offset: 0,
            crc32: None,
        };
        let frame = Command::File(offer.clone()).to_frame().unwrap();
        // The wire form must be whitespace-splittable.
        let text = String::from_utf8(frame.payload[1..].to_vec()).unwrap();
        assert_eq!(text.split_whitespace().count(), 4);
        assert_eq!(round_trip(&Command::File(offer.clone())), Command::File(offer));
    }

    #[test]
    fn local_name_strips_directories() {
        assert_eq!(FileName::new(b"../../etc/passwd".to_vec()).local_name(), "passwd");
        assert_eq!(FileName::new(b"c:\\tmp\\evil.pkt".to_vec()).local_name(), "evil.pkt");
        assert_eq!(FileName::new(b"..".to_vec()).local_name(), "unnamed");
        assert_eq!(FileName::new(b"data.zip".to_vec()).local_name(), "data.zip");
    }
}
