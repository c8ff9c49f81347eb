//! Flow files: the per-link work queue.
//!
//! A flow file describes what to send to one address. Two kinds exist:
//!
//! - `.flo` (reference): one file path per line, with a leading character
//!   selecting what happens to the referenced file after it is sent;
//! - `.out` (netmail): the flow file *is* the payload, a netmail packet
//!   shipped as a single entry.
//!
//! The flavor — how urgently the link should be called — is encoded as a
//! one-letter prefix on the flow file name (`i`, `c`, `d`, `h`; no prefix
//! means normal). Processed reference lines are rewritten in place with a
//! `~` prefix so a crashed session never reships a delivered file.

use std::{
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

use binkmail_proto::Address;

use crate::{
    errors::Result,
    layout::{BsoLayout, net_node_hex, scan_dir},
};

/// Flow flavor, ordered by sending priority (immediate first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Flavor {
    /// `i` — call immediately, ignore call windows.
    Immediate,
    /// `c` — keep the link busy until the queue drains.
    Continuous,
    /// `d` — call directly, no routing.
    Direct,
    /// no prefix — normal scheduled traffic.
    Normal,
    /// `h` — queue only; sent when the operator flushes holds.
    Hold,
}

impl Flavor {
    /// Numeric priority, 1 (highest) to 5 (lowest).
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Immediate => 1,
            Self::Continuous => 2,
            Self::Direct => 3,
            Self::Normal => 4,
            Self::Hold => 5,
        }
    }

    /// Filename prefix for this flavor.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Immediate => "i",
            Self::Continuous => "c",
            Self::Direct => "d",
            Self::Normal => "",
            Self::Hold => "h",
        }
    }

    /// Flavor from a flow-file leading character. `-` is an explicit
    /// "normal" marker some tools write.
    #[must_use]
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'i' => Some(Self::Immediate),
            'c' => Some(Self::Continuous),
            'd' => Some(Self::Direct),
            '-' => Some(Self::Normal),
            'h' => Some(Self::Hold),
            _ => None,
        }
    }
}

/// What to do with a referenced file after it has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Leave the file alone (no prefix or `@`).
    Send,
    /// Truncate the file to zero length (`#`).
    Truncate,
    /// Delete the file (`^` or `-`).
    Delete,
    /// Do not send at all (`~` or `!`); also marks processed lines.
    Skip,
}

impl Directive {
    /// Directive from a reference line's first character, plus how many
    /// bytes of prefix to strip.
    fn from_line(line: &str) -> (Self, usize) {
        match line.chars().next() {
            Some('#') => (Self::Truncate, 1),
            Some('^' | '-') => (Self::Delete, 1),
            Some('~' | '!') => (Self::Skip, 1),
            Some('@') => (Self::Send, 1),
            _ => (Self::Send, 0),
        }
    }
}

/// Flow-file kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// `.flo` — list of file references.
    Reference,
    /// `.out` — the netmail packet itself.
    Netmail,
}

/// One file to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowEntry {
    /// Path of the file to send.
    pub path: PathBuf,
    /// Post-send action.
    pub directive: Directive,
    /// Line index inside the flow file (0 for netmail).
    pub line: usize,
}

/// A parsed flow file.
#[derive(Debug, Clone)]
pub struct FlowFile {
    /// Destination address.
    pub address: Address,
    /// Reference or netmail.
    pub kind: FlowKind,
    /// Sending priority class.
    pub flavor: Flavor,
    /// Path of the flow file itself.
    pub path: PathBuf,
    /// Modification time, used as the tie-break after flavor.
    pub mtime: SystemTime,
    /// Unprocessed entries in file order.
    pub entries: Vec<FlowEntry>,
}

impl FlowFile {
    /// Parse a flow file from disk.
    ///
    /// For reference files, lines carrying the `~`/`!` skip directive and
    /// blank lines are dropped here — they are either already processed
    /// or explicitly suppressed. A netmail file becomes one `Send` entry
    /// pointing at itself.
    pub fn load(
        path: &Path,
        address: Address,
        kind: FlowKind,
        flavor: Flavor,
        mtime: SystemTime,
    ) -> Result<Self> {
        let entries = match kind {
            FlowKind::Netmail => {
                vec![FlowEntry { path: path.to_path_buf(), directive: Directive::Send, line: 0 }]
            },
            FlowKind::Reference => {
                let text = std::fs::read_to_string(path)?;
                let mut entries = Vec::new();
                for (line, raw) in text.lines().enumerate() {
                    let raw = raw.trim_end_matches('\r');
                    if raw.trim().is_empty() {
                        continue;
                    }
                    let (directive, skip) = Directive::from_line(raw);
                    if directive == Directive::Skip {
                        continue;
                    }
                    entries.push(FlowEntry {
                        path: PathBuf::from(&raw[skip..]),
                        directive,
                        line,
                    });
                }
                entries
            },
        };

        Ok(Self { address, kind, flavor, path: path.to_path_buf(), mtime, entries })
    }

    /// True when nothing is left to send.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite the flow file marking `line` as processed (`~` prefix).
    ///
    /// Netmail files have nothing to mark; callers delete them instead
    /// once their single entry is delivered.
    pub fn mark_processed(&self, line: usize) -> Result<()> {
        if self.kind == FlowKind::Netmail {
            return Ok(());
        }
        let text = std::fs::read_to_string(&self.path)?;
        let mut out = String::with_capacity(text.len() + 1);
        for (index, raw) in text.lines().enumerate() {
            if index == line {
                let (_, skip) = Directive::from_line(raw);
                out.push('~');
                out.push_str(&raw[skip..]);
            } else {
                out.push_str(raw);
            }
            out.push('\n');
        }
        let mut file = std::fs::File::create(&self.path)?;
        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

/// Order flow files by `(flavor priority, mtime)`, both ascending.
///
/// The sort is stable, so files of equal flavor and mtime keep their scan
/// order.
pub fn sort_flows(flows: &mut [FlowFile]) {
    flows.sort_by_key(|flow| (flow.flavor.priority(), flow.mtime));
}

/// Find and parse all flow files queued for `address`.
///
/// Returns them sorted per [`sort_flows`]. Hold-flavored flows are
/// included only when `flush_holds` is set — they stay queued otherwise.
pub fn find_work(
    layout: &BsoLayout,
    address: &Address,
    flush_holds: bool,
) -> Result<Vec<FlowFile>> {
    let (dir, stem) = layout.node_slot(address);
    let mut flows = Vec::new();

    let candidates = scan_dir(&dir, |name| {
        parse_flow_name(name, &stem).is_some()
    })?;

    for entry in candidates {
        let Some((flavor, kind)) = parse_flow_name(&entry.file_name, &stem) else {
            continue;
        };
        if flavor == Flavor::Hold && !flush_holds {
            continue;
        }
        flows.push(FlowFile::load(&entry.path, address.clone(), kind, flavor, entry.mtime)?);
    }

    sort_flows(&mut flows);
    Ok(flows)
}

/// True if `address` has any sendable traffic queued.
pub fn has_work(layout: &BsoLayout, address: &Address) -> Result<bool> {
    Ok(find_work(layout, address, false)?.iter().any(|flow| !flow.is_exhausted()))
}

/// Split a flow file name into flavor and kind, if it belongs to `stem`.
fn parse_flow_name(name: &str, stem: &str) -> Option<(Flavor, FlowKind)> {
    let (base, ext) = name.rsplit_once('.')?;
    let kind = match ext.to_ascii_lowercase().as_str() {
        "flo" => FlowKind::Reference,
        "out" => FlowKind::Netmail,
        _ => return None,
    };

    // An unprefixed name is the normal flavor; a one-character prefix
    // selects another flavor. Length disambiguates: the stem is always
    // exactly eight hex digits.
    if base.eq_ignore_ascii_case(stem) {
        return Some((Flavor::Normal, kind));
    }
    if base.len() == stem.len() + 1 {
        let mut chars = base.chars();
        let flavor = Flavor::from_char(chars.next()?)?;
        if chars.as_str().eq_ignore_ascii_case(stem) {
            return Some((flavor, kind));
        }
    }
    None
}

/// Wire name a netmail flow file travels under.
///
/// The `.out` packet is offered to the peer as `<netnode_hex>.pkt`.
#[must_use]
pub fn netmail_wire_name(address: &Address) -> String {
    format!("{}.pkt", net_node_hex(address.net, address.node))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn reference_flow(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn flavor_priorities_are_ordered() {
        let mut flavors =
            vec![Flavor::Hold, Flavor::Normal, Flavor::Immediate, Flavor::Direct, Flavor::Continuous];
        flavors.sort_by_key(|f| f.priority());
        assert_eq!(
            flavors,
            vec![
                Flavor::Immediate,
                Flavor::Continuous,
                Flavor::Direct,
                Flavor::Normal,
                Flavor::Hold
            ]
        );
    }

    #[test]
    fn flow_name_parsing() {
        let stem = "00020003";
        assert_eq!(
            parse_flow_name("00020003.flo", stem),
            Some((Flavor::Normal, FlowKind::Reference))
        );
        assert_eq!(
            parse_flow_name("i00020003.flo", stem),
            Some((Flavor::Immediate, FlowKind::Reference))
        );
        assert_eq!(
            parse_flow_name("h00020003.out", stem),
            Some((Flavor::Hold, FlowKind::Netmail))
        );
        // Wrong stem, wrong extension, wrong prefix.
        assert_eq!(parse_flow_name("00020004.flo", stem), None);
        assert_eq!(parse_flow_name("00020003.bsy", stem), None);
        assert_eq!(parse_flow_name("x00020003.flo", stem), None);
    }

    #[test]
    fn reference_lines_parse_directives() {
        let dir = tempfile::tempdir().unwrap();
        let path = reference_flow(
            dir.path(),
            "00020003.flo",
            "/mail/a.pkt\n#/mail/b.pkt\n^/mail/c.pkt\n-/mail/d.pkt\n~/mail/done.pkt\n!/mail/no.pkt\n@/mail/e.pkt\n\n",
        );
        let flow = FlowFile::load(
            &path,
            Address::new(1, 2, 3),
            FlowKind::Reference,
            Flavor::Normal,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap();

        let directives: Vec<Directive> = flow.entries.iter().map(|e| e.directive).collect();
        assert_eq!(
            directives,
            vec![
                Directive::Send,
                Directive::Truncate,
                Directive::Delete,
                Directive::Delete,
                Directive::Send
            ]
        );
        assert_eq!(flow.entries[0].path, PathBuf::from("/mail/a.pkt"));
        assert_eq!(flow.entries[4].path, PathBuf::from("/mail/e.pkt"));
        // Skip lines and blanks are dropped; line numbers are preserved.
        assert_eq!(flow.entries[4].line, 6);
    }

    #[test]
    fn mark_processed_rewrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = reference_flow(dir.path(), "00020003.flo", "/mail/a.pkt\n#/mail/b.pkt\n");
        let flow = FlowFile::load(
            &path,
            Address::new(1, 2, 3),
            FlowKind::Reference,
            Flavor::Normal,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap();

        flow.mark_processed(0).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "~/mail/a.pkt\n#/mail/b.pkt\n"
        );

        let reloaded = FlowFile::load(
            &path,
            Address::new(1, 2, 3),
            FlowKind::Reference,
            Flavor::Normal,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(reloaded.entries.len(), 1);
        assert_eq!(reloaded.entries[0].directive, Directive::Truncate);
    }

    #[test]
    fn netmail_wraps_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("00020003.out");
        std::fs::write(&path, b"netmail packet bytes").unwrap();
        let flow = FlowFile::load(
            &path,
            Address::new(1, 2, 3),
            FlowKind::Netmail,
            Flavor::Normal,
            SystemTime::UNIX_EPOCH,
        )
        .unwrap();
        assert_eq!(flow.entries.len(), 1);
        assert_eq!(flow.entries[0].path, path);
        assert_eq!(flow.entries[0].directive, Directive::Send);
    }

    #[test]
    fn find_work_sorts_by_flavor_then_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BsoLayout::new(dir.path());
        let addr = Address::new(1, 2, 3);

        // Normal, then immediate, then hold.
        reference_flow(dir.path(), "00020003.flo", "/mail/normal.pkt\n");
        reference_flow(dir.path(), "i00020003.flo", "/mail/urgent.pkt\n");
        reference_flow(dir.path(), "h00020003.flo", "/mail/held.pkt\n");

        let flows = find_work(&layout, &addr, false).unwrap();
        assert_eq!(flows.len(), 2);
        assert_eq!(flows[0].flavor, Flavor::Immediate);
        assert_eq!(flows[1].flavor, Flavor::Normal);

        let with_holds = find_work(&layout, &addr, true).unwrap();
        assert_eq!(with_holds.len(), 3);
        assert_eq!(with_holds[2].flavor, Flavor::Hold);
    }

    #[test]
    fn sort_is_stable_on_equal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1000);
        let mk = |name: &str, flavor: Flavor, mtime: SystemTime| FlowFile {
            address: Address::new(1, 2, 3),
            kind: FlowKind::Reference,
            flavor,
            path: dir.path().join(name),
            mtime,
            entries: Vec::new(),
        };

        let mut flows = vec![
            mk("a", Flavor::Normal, base),
            mk("b", Flavor::Normal, base),
            mk("c", Flavor::Immediate, base + Duration::from_secs(60)),
        ];
        sort_flows(&mut flows);
        assert_eq!(flows[0].path.file_name().unwrap(), "c");
        assert_eq!(flows[1].path.file_name().unwrap(), "a");
        assert_eq!(flows[2].path.file_name().unwrap(), "b");
    }
}
