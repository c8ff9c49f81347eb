//! Control files: the outbound's interprocess interlocks.
//!
//! Four kinds share the node's hex stem:
//!
//! - `.bsy` — busy lock; whoever creates it owns the link
//! - `.csy` — call-in-progress marker (same acquire semantics)
//! - `.hld` — hold the link until a Unix timestamp
//! - `.try` — failed-attempt counter
//!
//! The only synchronization primitive is the filesystem's atomic
//! exclusive create (`O_CREAT | O_EXCL`): two mailers racing for the same
//! link both call create-new, the OS picks exactly one winner, and the
//! loser sees `AlreadyExists` and backs off. Locks left behind by crashed
//! processes are reaped by mtime age.

use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use binkmail_proto::Address;

use crate::{
    errors::{OutboundError, Result},
    layout::{BsoLayout, scan_dir},
};

/// Control-file kinds with acquire/release semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// `.bsy` — link busy.
    Busy,
    /// `.csy` — call in progress.
    CallInProgress,
}

impl LockKind {
    /// File extension for this kind.
    #[must_use]
    pub fn ext(self) -> &'static str {
        match self {
            Self::Busy => "bsy",
            Self::CallInProgress => "csy",
        }
    }
}

/// An owned control lock, released on drop.
///
/// Only the creator may remove the file; release is idempotent (a lock
/// already reaped by stale cleanup releases without error).
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file. Absence counts as success.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_if_present(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = remove_if_present(&self.path) {
                tracing::warn!("failed to release lock {}: {err}", self.path.display());
            }
        }
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Try to acquire a lock for `address`.
///
/// The lock file is created exclusively with payload `"<ident> <pid>\n"`.
/// The parent directory is created first if missing (a link may have no
/// traffic yet when its first inbound session arrives).
///
/// # Errors
///
/// - `OutboundError::Busy` if another process holds the lock
/// - `OutboundError::Io` on any other filesystem failure
pub fn acquire(
    layout: &BsoLayout,
    address: &Address,
    kind: LockKind,
    ident: &str,
) -> Result<LockGuard> {
    let path = layout.control_path(address, kind.ext());
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Err(OutboundError::Busy(path));
        },
        Err(err) => return Err(err.into()),
    };

    writeln!(file, "{ident} {}", std::process::id())?;
    tracing::debug!("acquired {} for {address}", path.display());
    Ok(LockGuard { path, released: false })
}

/// True if `address`'s busy lock exists.
pub fn is_busy(layout: &BsoLayout, address: &Address) -> bool {
    layout.control_path(address, LockKind::Busy.ext()).exists()
}

/// A parsed `.hld` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldInfo {
    /// Unix timestamp the hold expires at.
    pub until_unix: u64,
    /// Optional operator-readable reason.
    pub reason: Option<String>,
}

impl HoldInfo {
    /// True while the hold has not yet expired.
    #[must_use]
    pub fn is_active(&self, now: SystemTime) -> bool {
        let now_unix = now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        now_unix < self.until_unix
    }
}

/// Back the link off until `until`.
///
/// Uses the same atomic-create path as locks. Returns `false` without
/// touching anything if a hold already exists — an earlier failure's
/// verdict is not extended by later ones.
pub fn set_hold(
    layout: &BsoLayout,
    address: &Address,
    until: SystemTime,
    reason: &str,
) -> Result<bool> {
    let path = layout.control_path(address, "hld");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let until_unix = until.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    let mut file = match std::fs::OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(false),
        Err(err) => return Err(err.into()),
    };

    if reason.is_empty() {
        writeln!(file, "{until_unix}")?;
    } else {
        writeln!(file, "{until_unix} {reason}")?;
    }
    Ok(true)
}

/// Read `address`'s hold file, if any.
///
/// # Errors
///
/// - `OutboundError::MalformedControl` if the first field is not a
///   Unix timestamp
pub fn read_hold(layout: &BsoLayout, address: &Address) -> Result<Option<HoldInfo>> {
    let path = layout.control_path(address, "hld");
    let text = match std::fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut fields = text.split_whitespace();
    let until_unix = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| OutboundError::MalformedControl {
            kind: "hold",
            path: path.clone(),
            detail: format!("bad timestamp in '{}'", text.trim()),
        })?;
    let reason = {
        let rest: Vec<&str> = fields.collect();
        if rest.is_empty() { None } else { Some(rest.join(" ")) }
    };

    Ok(Some(HoldInfo { until_unix, reason }))
}

/// Remove `address`'s hold file if present.
pub fn clear_hold(layout: &BsoLayout, address: &Address) -> Result<()> {
    remove_if_present(&layout.control_path(address, "hld"))
}

/// Record a failed attempt in `address`'s `.try` file.
///
/// The payload is `<count> <last_unix>\n`. Returns the new count.
pub fn bump_try(layout: &BsoLayout, address: &Address, now: SystemTime) -> Result<u32> {
    let path = layout.control_path(address, "try");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let count = read_try(layout, address)?.map_or(1, |c| c.saturating_add(1));
    let now_unix = now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    std::fs::write(&path, format!("{count} {now_unix}\n"))?;
    Ok(count)
}

/// Current failed-attempt count, if a `.try` file exists.
pub fn read_try(layout: &BsoLayout, address: &Address) -> Result<Option<u32>> {
    let path = layout.control_path(address, "try");
    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(text.split_whitespace().next().and_then(|f| f.parse().ok())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Forget `address`'s failure history after a successful session.
pub fn clear_try(layout: &BsoLayout, address: &Address) -> Result<()> {
    remove_if_present(&layout.control_path(address, "try"))
}

/// Remove control files older than `max_age` under `dir`.
///
/// Covers `.bsy`, `.csy`, `.hld` and `.try`; a crashed mailer's leftovers
/// would otherwise block its links forever. Returns how many files were
/// removed.
pub fn reap_stale(dir: &Path, max_age: Duration, now: SystemTime) -> Result<usize> {
    let control = scan_dir(dir, |name| {
        name.ends_with(".bsy")
            || name.ends_with(".csy")
            || name.ends_with(".hld")
            || name.ends_with(".try")
    })?;

    let mut reaped = 0;
    for entry in control {
        let age = now.duration_since(entry.mtime).unwrap_or(Duration::ZERO);
        if age > max_age {
            tracing::info!(
                "reaping stale control file {} (age {}s)",
                entry.path.display(),
                age.as_secs()
            );
            remove_if_present(&entry.path)?;
            reaped += 1;
        }
    }
    Ok(reaped)
}
