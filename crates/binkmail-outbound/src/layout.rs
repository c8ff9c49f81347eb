//! Outbound path derivation.
//!
//! BinkleyTerm Style Outbound maps a FidoNet address to file names inside
//! a per-zone directory tree:
//!
//! ```text
//! <base>/                      zone 1 (the default zone)
//! <base>.002/                  zone 2 (".zzz", three lowercase hex digits)
//! <zone_dir>/00140039.flo      flow file for 20/57 ((net<<16)|node in hex)
//! <zone_dir>/00140039.pnt/     point subdirectory for 20/57's points
//! <zone_dir>/00140039.pnt/00000003.flo     point 3
//! ```
//!
//! Every control and flow file for a node shares the same eight-hex-digit
//! stem, so deriving paths is string assembly plus one scan helper.

use std::{
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use binkmail_proto::Address;

use crate::errors::{OutboundError, Result};

/// Derives outbound paths for addresses.
#[derive(Debug, Clone)]
pub struct BsoLayout {
    /// Base outbound directory (the default zone's directory).
    base: PathBuf,
    /// Zone served by the bare base directory.
    default_zone: u16,
}

impl BsoLayout {
    /// Layout rooted at `base`, with zone 1 as the default zone.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into(), default_zone: 1 }
    }

    /// Use a different default zone (the zone of the system's main AKA).
    #[must_use]
    pub fn with_default_zone(mut self, zone: u16) -> Self {
        self.default_zone = zone;
        self
    }

    /// Base outbound directory.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding zone `zone`'s outbound.
    ///
    /// The default zone uses the base directory itself; any other zone
    /// appends `.zzz` with the zone as three lowercase hex digits.
    #[must_use]
    pub fn zone_dir(&self, zone: u16) -> PathBuf {
        if zone == self.default_zone {
            self.base.clone()
        } else {
            let mut name = self.base.as_os_str().to_os_string();
            name.push(format!(".{zone:03x}"));
            PathBuf::from(name)
        }
    }

    /// Directory and file stem for `address`'s flow and control files.
    ///
    /// Plain nodes live directly in the zone directory under the
    /// `(net<<16)|node` hex stem; points live in `<netnode>.pnt/` under
    /// an eight-hex-digit point stem.
    #[must_use]
    pub fn node_slot(&self, address: &Address) -> (PathBuf, String) {
        let zone_dir = self.zone_dir(address.zone);
        let stem = net_node_hex(address.net, address.node);
        if address.is_point() {
            let point_dir = zone_dir.join(format!("{stem}.pnt"));
            (point_dir, format!("{:08x}", address.point))
        } else {
            (zone_dir, stem)
        }
    }

    /// Path of a control file (`bsy`, `csy`, `hld`, `try`) for `address`.
    #[must_use]
    pub fn control_path(&self, address: &Address, ext: &str) -> PathBuf {
        let (dir, stem) = self.node_slot(address);
        dir.join(format!("{stem}.{ext}"))
    }

    /// Path of a flow file for `address` with the given flavor prefix and
    /// extension (`flo` or `out`).
    #[must_use]
    pub fn flow_path(&self, address: &Address, flavor_prefix: &str, ext: &str) -> PathBuf {
        let (dir, stem) = self.node_slot(address);
        dir.join(format!("{flavor_prefix}{stem}.{ext}"))
    }
}

/// Encode `(net, node)` as the standard eight lowercase hex digits.
#[must_use]
pub fn net_node_hex(net: u16, node: u16) -> String {
    format!("{net:04x}{node:04x}")
}

/// Decode an eight-hex-digit node stem back into `(net, node)`.
///
/// # Errors
///
/// - `OutboundError::InvalidHex` for any length other than 8 or any
///   non-hex character
pub fn parse_net_node_hex(stem: &str) -> Result<(u16, u16)> {
    if stem.len() != 8 || !stem.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(OutboundError::InvalidHex(stem.to_string()));
    }
    let net = u16::from_str_radix(&stem[..4], 16)
        .map_err(|_| OutboundError::InvalidHex(stem.to_string()))?;
    let node = u16::from_str_radix(&stem[4..], 16)
        .map_err(|_| OutboundError::InvalidHex(stem.to_string()))?;
    Ok((net, node))
}

/// One entry from a directory scan.
#[derive(Debug, Clone)]
pub struct ScanEntry {
    /// Plain file name.
    pub file_name: String,
    /// Full path.
    pub path: PathBuf,
    /// Modification time.
    pub mtime: SystemTime,
    /// Size in bytes.
    pub size: u64,
    /// True for subdirectories.
    pub is_dir: bool,
}

/// Scan `dir`, keeping entries whose name passes `keep`.
///
/// Returns an unordered set. A missing directory is an empty scan, not an
/// error — an outbound with no traffic for a zone simply has no zone dir.
/// Entries with non-UTF-8 names are skipped; BSO names are ASCII.
pub fn scan_dir(dir: &Path, mut keep: impl FnMut(&str) -> bool) -> io::Result<Vec<ScanEntry>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };
        if !keep(&file_name) {
            continue;
        }
        let meta = entry.metadata()?;
        out.push(ScanEntry {
            path: entry.path(),
            file_name,
            mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: meta.len(),
            is_dir: meta.is_dir(),
        });
    }
    Ok(out)
}
