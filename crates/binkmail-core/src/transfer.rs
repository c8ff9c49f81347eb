//! The file-transfer engine.
//!
//! Drives a queue of pending sends and at most one active receive for a
//! single session. The engine is synchronous and socket-free: it consumes
//! parsed commands and data payloads, performs local file I/O, and hands
//! back the commands and data chunks the session should put on the wire.
//! The session machine owns one engine and routes transfer-phase traffic
//! through it.
//!
//! Send flow per file: `M_FILE name size mtime offset`, data frames in
//! file order, then wait for the peer's `M_GOT` before applying the
//! entry's post-action (delete or truncate). Acknowledgements are matched
//! by file name — the peer's `M_GOT` for file F may arrive while we are
//! already streaming file F+1.
//!
//! Receive flow: data lands in `<name>.tmp`, appended on resume; when the
//! byte count is complete the CRC (if negotiated) is verified, the temp
//! file is renamed into place, and `M_GOT` confirms. A CRC mismatch
//! discards the temp file and answers `M_SKIP` instead; the session
//! continues with the next file.

use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use binkmail_proto::{Command, FileAck, FileName, FileOffer, FileRef, Frame};

use crate::{
    crc::{Crc32, file_crc32, file_prefix_crc32},
    error::{Result, SessionError},
    options::NegotiatedOptions,
};

/// Data chunk size: one full frame payload.
const CHUNK: usize = Frame::MAX_PAYLOAD;

/// Data frames produced per [`TransferEngine::poll`] call, so sends stay
/// interleaved with servicing inbound frames.
const SEND_BURST: usize = 8;

/// What to do with a sent file once the peer confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostAction {
    /// Leave the file alone.
    #[default]
    Keep,
    /// Delete it (netmail packets, kill-after-send attaches).
    Delete,
    /// Truncate it to zero length.
    Truncate,
}

/// One file queued for sending.
#[derive(Debug, Clone)]
pub struct OutboundFile {
    /// Local path to read from.
    pub path: PathBuf,
    /// Name offered to the peer.
    pub wire_name: FileName,
    /// Action applied after the peer's `M_GOT`.
    pub post: PostAction,
    /// Caller-chosen tag reported back on completion (flow bookkeeping).
    pub tag: u64,
    /// Offset to start from (non-zero after an `M_GET` restart).
    pub resume_offset: u64,
}

impl OutboundFile {
    /// Queue entry for `path`, offered under its own file name.
    ///
    /// # Errors
    ///
    /// - `SessionError::File` if the path has no usable file name
    pub fn from_path(path: impl Into<PathBuf>, post: PostAction, tag: u64) -> Result<Self> {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| FileName::new(n.to_string_lossy().into_owned().into_bytes()))
            .ok_or_else(|| SessionError::File(format!("no file name in {}", path.display())))?;
        Ok(Self { path, wire_name: name, post, tag, resume_offset: 0 })
    }

    /// Offer the file to the peer under a different name.
    #[must_use]
    pub fn with_wire_name(mut self, name: FileName) -> Self {
        self.wire_name = name;
        self
    }
}

/// Things the engine wants the session to transmit.
#[derive(Debug)]
pub enum EngineOutput {
    /// A transfer-phase command.
    Command(Command),
    /// One data frame's payload (pre-compression).
    Data(Vec<u8>),
}

/// A file the engine finished sending or receiving, for logging and flow
/// bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedFile {
    /// Caller tag for sends; 0 for receives.
    pub tag: u64,
    /// Wire name of the file.
    pub name: FileName,
    /// Bytes transferred.
    pub size: u64,
}

#[derive(Debug)]
struct ActiveSend {
    entry: OutboundFile,
    file: File,
    size: u64,
    unix_time: u64,
    position: u64,
}

#[derive(Debug)]
struct ActiveReceive {
    name: FileName,
    final_path: PathBuf,
    tmp_path: PathBuf,
    file: File,
    size: u64,
    received: u64,
    crc: Option<Crc32>,
    expected_crc: Option<u32>,
}

#[derive(Debug, Default)]
enum ReceiveState {
    /// No inbound file.
    #[default]
    Idle,
    /// Writing data frames into a temp file.
    Active(ActiveReceive),
    /// Sent `M_GET`; discarding stale data until the matching re-offer.
    AwaitReoffer {
        name: FileName,
    },
}

/// Per-session transfer engine.
#[derive(Debug)]
pub struct TransferEngine {
    inbound: PathBuf,
    queue: VecDeque<OutboundFile>,
    sending: Option<ActiveSend>,
    unacked: Vec<(OutboundFile, u64)>,
    receive: ReceiveState,
    options: NegotiatedOptions,
    completions: Vec<CompletedFile>,
    received: Vec<CompletedFile>,
    files_sent: u32,
    files_received: u32,
    crc_failures: u32,
}

impl TransferEngine {
    /// Engine writing received files into `inbound`.
    #[must_use]
    pub fn new(inbound: impl Into<PathBuf>) -> Self {
        Self {
            inbound: inbound.into(),
            queue: VecDeque::new(),
            sending: None,
            unacked: Vec::new(),
            receive: ReceiveState::Idle,
            options: NegotiatedOptions::default(),
            completions: Vec::new(),
            received: Vec::new(),
            files_sent: 0,
            files_received: 0,
            crc_failures: 0,
        }
    }

    /// Queue a file for sending.
    pub fn enqueue(&mut self, entry: OutboundFile) {
        self.queue.push_back(entry);
    }

    /// Apply the session's negotiated options (called once, at the
    /// transition into the transfer phase).
    pub fn configure(&mut self, options: NegotiatedOptions) {
        self.options = options;
    }

    /// True once the outbound queue is drained and nothing is streaming.
    #[must_use]
    pub fn send_complete(&self) -> bool {
        self.queue.is_empty() && self.sending.is_none()
    }

    /// True when no transfer is in flight in either direction and every
    /// sent file has been acknowledged.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.send_complete()
            && self.unacked.is_empty()
            && matches!(self.receive, ReceiveState::Idle)
    }

    /// Completed sends since the last call (tags for flow bookkeeping).
    pub fn take_completions(&mut self) -> Vec<CompletedFile> {
        std::mem::take(&mut self.completions)
    }

    /// Completed receives since the last call.
    pub fn take_received(&mut self) -> Vec<CompletedFile> {
        std::mem::take(&mut self.received)
    }

    /// Files fully sent and acknowledged this session.
    #[must_use]
    pub fn files_sent(&self) -> u32 {
        self.files_sent
    }

    /// Files fully received this session.
    #[must_use]
    pub fn files_received(&self) -> u32 {
        self.files_received
    }

    /// CRC mismatches seen on receives this session.
    #[must_use]
    pub fn crc_failures(&self) -> u32 {
        self.crc_failures
    }

    /// Advance the send side: open the next queued file or stream the
    /// next burst of data frames from the current one.
    pub fn poll(&mut self) -> Result<Vec<EngineOutput>> {
        let mut out = Vec::new();

        if self.sending.is_none() {
            while let Some(entry) = self.queue.pop_front() {
                match self.open_send(entry) {
                    Ok((send, offer)) => {
                        out.push(EngineOutput::Command(Command::File(offer)));
                        self.sending = Some(send);
                        break;
                    },
                    Err(err) => {
                        // A vanished or unreadable file skips its entry;
                        // the rest of the queue still goes out.
                        tracing::warn!("skipping outbound file: {err}");
                    },
                }
            }
        }

        if let Some(send) = self.sending.as_mut() {
            let mut buf = vec![0u8; CHUNK];
            for _ in 0..SEND_BURST {
                if send.position >= send.size {
                    break;
                }
                let n = send.file.read(&mut buf)?;
                if n == 0 {
                    // The file shrank under us; the offered size is now a
                    // lie and the peer would wait forever.
                    return Err(SessionError::File(format!(
                        "{} truncated during send ({} of {} bytes)",
                        send.entry.path.display(),
                        send.position,
                        send.size
                    )));
                }
                send.position += n as u64;
                out.push(EngineOutput::Data(buf[..n].to_vec()));
            }
        }

        if self.sending.as_ref().is_some_and(|send| send.position >= send.size) {
            if let Some(send) = self.sending.take() {
                tracing::debug!("finished streaming {} ({} bytes)", send.entry.wire_name, send.size);
                self.unacked.push((send.entry, send.size));
            }
        }

        Ok(out)
    }

    fn open_send(&self, entry: OutboundFile) -> Result<(ActiveSend, FileOffer)> {
        let mut file = File::open(&entry.path)
            .map_err(|err| SessionError::File(format!("{}: {err}", entry.path.display())))?;
        let meta = file.metadata()?;
        let size = meta.len();
        let unix_time =
            meta.modified().ok().and_then(|t| t.duration_since(UNIX_EPOCH).ok()).map_or(
                0,
                |d| d.as_secs(),
            );

        let offset = entry.resume_offset.min(size);
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }

        let crc32 = if self.options.crc { Some(file_crc32(&entry.path)?) } else { None };

        let offer = FileOffer {
            name: entry.wire_name.clone(),
            size,
            unix_time,
            offset,
            crc32,
        };
        Ok((ActiveSend { entry, file, size, unix_time, position: offset }, offer))
    }

    /// Peer offered a file. Decides the resume offset, opens the temp
    /// file, and may answer `M_GET` instead of accepting.
    pub fn handle_offer(&mut self, offer: &FileOffer) -> Result<Vec<EngineOutput>> {
        match &self.receive {
            ReceiveState::Active(active) => {
                // A new offer while one is active means the sender
                // abandoned the old file; keep its temp for a later
                // resume.
                tracing::warn!("peer abandoned {} mid-transfer", active.name);
                self.receive = ReceiveState::Idle;
            },
            ReceiveState::AwaitReoffer { name } if *name != offer.name => {
                tracing::warn!("expected re-offer of {name}, got {}", offer.name);
                self.receive = ReceiveState::Idle;
            },
            _ => {},
        }

        let local = offer.name.local_name();
        let final_path = self.inbound.join(&local);
        let tmp_path = self.inbound.join(format!("{local}.tmp"));
        std::fs::create_dir_all(&self.inbound)?;

        let tmp_len = std::fs::metadata(&tmp_path).map_or(0, |m| m.len());

        // Resume discovery: with NR on and a shorter partial on disk,
        // ask the sender to reposition rather than accepting from zero.
        if offer.offset == 0 && self.options.nr && tmp_len > 0 && tmp_len < offer.size {
            tracing::info!("requesting resume of {} at {tmp_len}", offer.name);
            self.receive = ReceiveState::AwaitReoffer { name: offer.name.clone() };
            return Ok(vec![EngineOutput::Command(Command::Get(FileRef {
                name: offer.name.clone(),
                offset: tmp_len,
            }))]);
        }

        if offer.offset > tmp_len {
            // Cannot append across a hole; tell the sender where we are.
            self.receive = ReceiveState::AwaitReoffer { name: offer.name.clone() };
            return Ok(vec![EngineOutput::Command(Command::Get(FileRef {
                name: offer.name.clone(),
                offset: tmp_len,
            }))]);
        }

        let mut file = OpenOptions::new().create(true).write(true).truncate(false).open(&tmp_path)?;
        file.set_len(offer.offset)?;
        file.seek(SeekFrom::End(0))?;

        let crc = if self.options.crc && offer.crc32.is_some() {
            if offer.offset > 0 {
                Some(Crc32::resume(file_prefix_crc32(&tmp_path, offer.offset)?))
            } else {
                Some(Crc32::new())
            }
        } else {
            None
        };

        let mut active = ActiveReceive {
            name: offer.name.clone(),
            final_path,
            tmp_path,
            file,
            size: offer.size,
            received: offer.offset,
            crc,
            expected_crc: offer.crc32,
        };

        if active.received >= active.size {
            // Zero-length file, or a resume that was already complete.
            return self.finish_receive(active).map(|cmd| vec![EngineOutput::Command(cmd)]);
        }

        tracing::info!(
            "receiving {} ({} bytes, offset {})",
            active.name,
            active.size,
            active.received
        );
        active.file.flush()?;
        self.receive = ReceiveState::Active(active);
        Ok(Vec::new())
    }

    /// An inbound data frame (already decompressed).
    pub fn handle_data(&mut self, data: &[u8]) -> Result<Vec<EngineOutput>> {
        let ReceiveState::Active(active) = &mut self.receive else {
            // Data with no accepted offer: the tail of a file we answered
            // with M_GET, still in flight. Drop it.
            tracing::trace!("discarding {} stray data bytes", data.len());
            return Ok(Vec::new());
        };

        if active.received + data.len() as u64 > active.size {
            return Err(SessionError::Violation(format!(
                "peer overran {}: {} + {} > {}",
                active.name,
                active.received,
                data.len(),
                active.size
            )));
        }

        active.file.write_all(data)?;
        active.received += data.len() as u64;
        if let Some(crc) = &mut active.crc {
            crc.update(data);
        }

        if active.received == active.size {
            let ReceiveState::Active(active) = std::mem::take(&mut self.receive) else {
                unreachable!("receive is Active in this branch");
            };
            let command = self.finish_receive(active)?;
            return Ok(vec![EngineOutput::Command(command)]);
        }
        Ok(Vec::new())
    }

    fn finish_receive(&mut self, mut active: ActiveReceive) -> Result<Command> {
        active.file.flush()?;
        drop(active.file);
        self.receive = ReceiveState::Idle;

        if let (Some(crc), Some(expected)) = (&active.crc, active.expected_crc) {
            let computed = crc.value();
            if computed != expected {
                tracing::warn!(
                    "CRC mismatch on {}: computed {computed:08x}, peer claimed {expected:08x}",
                    active.name
                );
                self.crc_failures += 1;
                std::fs::remove_file(&active.tmp_path)?;
                return Ok(Command::Skip(FileRef { name: active.name, offset: 0 }));
            }
        }

        let final_path = unclaimed_path(&active.final_path);
        std::fs::rename(&active.tmp_path, &final_path)?;
        tracing::info!("received {} ({} bytes)", active.name, active.size);

        self.files_received += 1;
        self.received.push(CompletedFile { tag: 0, name: active.name.clone(), size: active.size });
        Ok(Command::Got(FileAck { name: active.name, size: active.size }))
    }

    /// Peer confirmed full receipt of a file we sent: apply its
    /// post-action and report the completion.
    ///
    /// Matching is by name. An `M_GOT` while the file is still streaming
    /// means "I already have it" and stops the send early.
    pub fn handle_got(&mut self, ack: &FileAck) -> Result<()> {
        let streaming = self.sending.as_ref().is_some_and(|send| send.entry.wire_name == ack.name);
        if streaming {
            if let Some(send) = self.sending.take() {
                tracing::debug!("peer already has {}, stopping send", ack.name);
                self.complete_send(send.entry, send.size)?;
            }
            return Ok(());
        }

        if let Some(index) = self.unacked.iter().position(|(e, _)| e.wire_name == ack.name) {
            let (entry, size) = self.unacked.remove(index);
            self.complete_send(entry, size)?;
            return Ok(());
        }

        tracing::warn!("M_GOT for unknown file {}", ack.name);
        Ok(())
    }

    fn complete_send(&mut self, entry: OutboundFile, size: u64) -> Result<()> {
        match entry.post {
            PostAction::Keep => {},
            PostAction::Delete => {
                if let Err(err) = std::fs::remove_file(&entry.path) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        return Err(SessionError::File(format!(
                            "deleting {}: {err}",
                            entry.path.display()
                        )));
                    }
                }
            },
            PostAction::Truncate => {
                File::create(&entry.path).map_err(|err| {
                    SessionError::File(format!("truncating {}: {err}", entry.path.display()))
                })?;
            },
        }

        tracing::info!("sent {} ({size} bytes)", entry.wire_name);
        self.files_sent += 1;
        self.completions.push(CompletedFile { tag: entry.tag, name: entry.wire_name, size });
        Ok(())
    }

    /// Peer asked us to (re)send a file from an offset.
    pub fn handle_get(&mut self, request: &FileRef) -> Result<Vec<EngineOutput>> {
        // Currently streaming that file: reposition in place.
        if let Some(send) = &mut self.sending {
            if send.entry.wire_name == request.name {
                let offset = request.offset.min(send.size);
                send.file.seek(SeekFrom::Start(offset))?;
                send.position = offset;
                let offer = FileOffer {
                    name: send.entry.wire_name.clone(),
                    size: send.size,
                    unix_time: send.unix_time,
                    offset,
                    crc32: if self.options.crc {
                        Some(file_crc32(&send.entry.path)?)
                    } else {
                        None
                    },
                };
                tracing::info!("repositioning {} to {offset}", request.name);
                return Ok(vec![EngineOutput::Command(Command::File(offer))]);
            }
        }

        // Already fully streamed but unacknowledged: requeue at the front.
        if let Some(index) = self.unacked.iter().position(|(e, _)| e.wire_name == request.name) {
            let (mut entry, _) = self.unacked.remove(index);
            entry.resume_offset = request.offset;
            self.queue.push_front(entry);
            return Ok(Vec::new());
        }

        // Still queued: adjust its start offset.
        if let Some(entry) = self.queue.iter_mut().find(|e| e.wire_name == request.name) {
            entry.resume_offset = request.offset;
            return Ok(Vec::new());
        }

        tracing::warn!("M_GET for unknown file {}", request.name);
        Ok(Vec::new())
    }

    /// Peer refused a file; stop sending it and move on.
    ///
    /// No post-action is applied and no completion is reported — the file
    /// stays queued on disk for a later session.
    pub fn handle_skip(&mut self, request: &FileRef) {
        if let Some(send) = &self.sending {
            if send.entry.wire_name == request.name {
                tracing::info!("peer skipped {} at {}", request.name, request.offset);
                self.sending = None;
                return;
            }
        }
        if let Some(index) = self.unacked.iter().position(|(e, _)| e.wire_name == request.name) {
            tracing::info!("peer skipped {} after transfer", request.name);
            self.unacked.remove(index);
            return;
        }
        let before = self.queue.len();
        self.queue.retain(|e| e.wire_name != request.name);
        if before == self.queue.len() {
            tracing::warn!("M_SKIP for unknown file {}", request.name);
        }
    }
}

/// First non-existing variant of `path` (`name`, `name.1`, `name.2`, …).
fn unclaimed_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    for suffix in 1u32.. {
        let mut candidate = path.as_os_str().to_os_string();
        candidate.push(format!(".{suffix}"));
        let candidate = PathBuf::from(candidate);
        if !candidate.exists() {
            return candidate;
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::crc32;

    struct Rig {
        _dir: tempfile::TempDir,
        files: PathBuf,
        inbound: PathBuf,
        engine: TransferEngine,
    }

    impl Rig {
        fn new(options: NegotiatedOptions) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let files = dir.path().join("files");
            let inbound = dir.path().join("inbound");
            std::fs::create_dir_all(&files).unwrap();
            std::fs::create_dir_all(&inbound).unwrap();
            let mut engine = TransferEngine::new(&inbound);
            engine.configure(options);
            Self { _dir: dir, files, inbound, engine }
        }

        fn stage(&self, name: &str, body: &[u8]) -> PathBuf {
            let path = self.files.join(name);
            std::fs::write(&path, body).unwrap();
            path
        }
    }

    fn drain_data(outputs: &[EngineOutput]) -> Vec<u8> {
        let mut data = Vec::new();
        for output in outputs {
            if let EngineOutput::Data(chunk) = output {
                data.extend_from_slice(chunk);
            }
        }
        data
    }

    #[test]
    fn send_offers_then_streams_then_awaits_ack() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let body = vec![0x5Au8; 40_000];
        let path = rig.stage("data.zip", &body);
        rig.engine
            .enqueue(OutboundFile::from_path(&path, PostAction::Keep, 7).unwrap());

        let first = rig.engine.poll().unwrap();
        let EngineOutput::Command(Command::File(offer)) = &first[0] else {
            unreachable!("expected an offer first");
        };
        assert_eq!(offer.size, 40_000);
        assert_eq!(offer.offset, 0);

        let mut streamed = drain_data(&first);
        while !rig.engine.send_complete() {
            streamed.extend(drain_data(&rig.engine.poll().unwrap()));
        }
        assert_eq!(streamed, body);

        // Not idle until the peer acknowledges.
        assert!(!rig.engine.is_idle());
        rig.engine
            .handle_got(&FileAck { name: FileName::from("data.zip"), size: 40_000 })
            .unwrap();
        assert!(rig.engine.is_idle());
        let completions = rig.engine.take_completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].tag, 7);
    }

    #[test]
    fn post_actions_apply_on_ack_only() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let delete_me = rig.stage("kill.pkt", b"netmail");
        let truncate_me = rig.stage("echo.jam", b"echomail");

        rig.engine
            .enqueue(OutboundFile::from_path(&delete_me, PostAction::Delete, 1).unwrap());
        rig.engine
            .enqueue(OutboundFile::from_path(&truncate_me, PostAction::Truncate, 2).unwrap());

        while !rig.engine.send_complete() {
            rig.engine.poll().unwrap();
        }
        assert!(delete_me.exists(), "no action before M_GOT");

        rig.engine.handle_got(&FileAck { name: FileName::from("kill.pkt"), size: 7 }).unwrap();
        assert!(!delete_me.exists());

        rig.engine.handle_got(&FileAck { name: FileName::from("echo.jam"), size: 8 }).unwrap();
        assert!(truncate_me.exists());
        assert_eq!(std::fs::metadata(&truncate_me).unwrap().len(), 0);
    }

    #[test]
    fn acks_match_by_name_not_order() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let a = rig.stage("a.pkt", b"aaaa");
        let b = rig.stage("b.pkt", b"bbbb");
        rig.engine.enqueue(OutboundFile::from_path(&a, PostAction::Keep, 1).unwrap());
        rig.engine.enqueue(OutboundFile::from_path(&b, PostAction::Keep, 2).unwrap());

        while !rig.engine.send_complete() {
            rig.engine.poll().unwrap();
        }

        // Acks arrive out of order.
        rig.engine.handle_got(&FileAck { name: FileName::from("b.pkt"), size: 4 }).unwrap();
        rig.engine.handle_got(&FileAck { name: FileName::from("a.pkt"), size: 4 }).unwrap();

        let tags: Vec<u64> = rig.engine.take_completions().iter().map(|c| c.tag).collect();
        assert_eq!(tags, vec![2, 1]);
    }

    #[test]
    fn receive_writes_tmp_then_renames() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let body = b"hello fidonet".to_vec();

        let offer = FileOffer {
            name: FileName::from("in.pkt"),
            size: body.len() as u64,
            unix_time: 1_700_000_000,
            offset: 0,
            crc32: None,
        };
        assert!(rig.engine.handle_offer(&offer).unwrap().is_empty());
        assert!(rig.inbound.join("in.pkt.tmp").exists());

        let outputs = rig.engine.handle_data(&body).unwrap();
        let EngineOutput::Command(Command::Got(ack)) = &outputs[0] else {
            unreachable!("expected M_GOT after the last byte");
        };
        assert_eq!(ack.size, body.len() as u64);
        assert!(!rig.inbound.join("in.pkt.tmp").exists());
        assert_eq!(std::fs::read(rig.inbound.join("in.pkt")).unwrap(), body);
        assert!(rig.engine.is_idle());
    }

    #[test]
    fn resume_appends_to_existing_tmp() {
        let mut rig = Rig::new(NegotiatedOptions { nr: true, ..NegotiatedOptions::default() });
        std::fs::write(rig.inbound.join("data.zip.tmp"), vec![1u8; 200]).unwrap();

        // Offer at zero with NR on: the engine asks for a resume.
        let offer = FileOffer {
            name: FileName::from("data.zip"),
            size: 1000,
            unix_time: 1_700_000_000,
            offset: 0,
            crc32: None,
        };
        let outputs = rig.engine.handle_offer(&offer).unwrap();
        let EngineOutput::Command(Command::Get(get)) = &outputs[0] else {
            unreachable!("expected M_GET");
        };
        assert_eq!(get.offset, 200);

        // Stray data from the abandoned offer is discarded.
        assert!(rig.engine.handle_data(&[0u8; 100]).unwrap().is_empty());

        // Re-offer at our offset: accept and append.
        let offer = FileOffer { offset: 200, ..offer };
        assert!(rig.engine.handle_offer(&offer).unwrap().is_empty());
        let outputs = rig.engine.handle_data(&vec![2u8; 800]).unwrap();
        assert!(matches!(&outputs[0], EngineOutput::Command(Command::Got(_))));

        let final_body = std::fs::read(rig.inbound.join("data.zip")).unwrap();
        assert_eq!(final_body.len(), 1000);
        assert_eq!(&final_body[..200], &[1u8; 200][..]);
        assert_eq!(&final_body[200..], &[2u8; 800][..]);
    }

    #[test]
    fn crc_mismatch_discards_and_skips() {
        let mut rig = Rig::new(NegotiatedOptions { crc: true, ..NegotiatedOptions::default() });
        let body = b"payload".to_vec();

        let offer = FileOffer {
            name: FileName::from("data.zip"),
            size: body.len() as u64,
            unix_time: 0,
            offset: 0,
            crc32: Some(0xCAFE_BABE), // deliberately wrong
        };
        rig.engine.handle_offer(&offer).unwrap();
        let outputs = rig.engine.handle_data(&body).unwrap();

        let EngineOutput::Command(Command::Skip(skip)) = &outputs[0] else {
            unreachable!("expected M_SKIP on CRC mismatch");
        };
        assert_eq!(skip.offset, 0);
        assert!(!rig.inbound.join("data.zip").exists());
        assert!(!rig.inbound.join("data.zip.tmp").exists());
        assert_eq!(rig.engine.crc_failures(), 1);
        assert!(rig.engine.is_idle(), "session continues after a CRC reject");
    }

    #[test]
    fn crc_match_accepts() {
        let mut rig = Rig::new(NegotiatedOptions { crc: true, ..NegotiatedOptions::default() });
        let body = b"payload".to_vec();

        let offer = FileOffer {
            name: FileName::from("data.zip"),
            size: body.len() as u64,
            unix_time: 0,
            offset: 0,
            crc32: Some(crc32(&body)),
        };
        rig.engine.handle_offer(&offer).unwrap();
        let outputs = rig.engine.handle_data(&body).unwrap();
        assert!(matches!(&outputs[0], EngineOutput::Command(Command::Got(_))));
    }

    #[test]
    fn sender_includes_crc_when_negotiated() {
        let mut rig = Rig::new(NegotiatedOptions { crc: true, ..NegotiatedOptions::default() });
        let body = b"check me".to_vec();
        let path = rig.stage("c.pkt", &body);
        rig.engine.enqueue(OutboundFile::from_path(&path, PostAction::Keep, 0).unwrap());

        let outputs = rig.engine.poll().unwrap();
        let EngineOutput::Command(Command::File(offer)) = &outputs[0] else {
            unreachable!("expected offer");
        };
        assert_eq!(offer.crc32, Some(crc32(&body)));
    }

    #[test]
    fn get_repositions_current_send() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let body: Vec<u8> = (0..100_000u32).map(|i| i as u8).collect();
        let path = rig.stage("big.zip", &body);
        rig.engine.enqueue(OutboundFile::from_path(&path, PostAction::Keep, 0).unwrap());

        // Start streaming, then the peer repositions us.
        rig.engine.poll().unwrap();
        let outputs = rig
            .engine
            .handle_get(&FileRef { name: FileName::from("big.zip"), offset: 99_000 })
            .unwrap();
        let EngineOutput::Command(Command::File(offer)) = &outputs[0] else {
            unreachable!("expected a fresh offer");
        };
        assert_eq!(offer.offset, 99_000);

        let mut streamed = Vec::new();
        while !rig.engine.send_complete() {
            streamed.extend(drain_data(&rig.engine.poll().unwrap()));
        }
        assert_eq!(streamed, &body[99_000..]);
    }

    #[test]
    fn skip_abandons_without_post_action() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let path = rig.stage("keep.pkt", b"do not delete");
        rig.engine.enqueue(OutboundFile::from_path(&path, PostAction::Delete, 0).unwrap());

        rig.engine.poll().unwrap();
        rig.engine.handle_skip(&FileRef { name: FileName::from("keep.pkt"), offset: 0 });

        assert!(rig.engine.send_complete());
        assert!(path.exists(), "skip must not apply the post-action");
        assert!(rig.engine.take_completions().is_empty());
    }

    #[test]
    fn missing_outbound_file_is_skipped() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let present = rig.stage("real.pkt", b"hello");
        rig.engine.enqueue(OutboundFile {
            path: rig.files.join("ghost.pkt"),
            wire_name: FileName::from("ghost.pkt"),
            post: PostAction::Keep,
            tag: 0,
            resume_offset: 0,
        });
        rig.engine.enqueue(OutboundFile::from_path(&present, PostAction::Keep, 1).unwrap());

        let outputs = rig.engine.poll().unwrap();
        let EngineOutput::Command(Command::File(offer)) = &outputs[0] else {
            unreachable!("expected the real file's offer");
        };
        assert_eq!(offer.name, FileName::from("real.pkt"));
    }

    #[test]
    fn zero_length_file_completes_without_data() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let offer = FileOffer {
            name: FileName::from("empty.flg"),
            size: 0,
            unix_time: 0,
            offset: 0,
            crc32: None,
        };
        let outputs = rig.engine.handle_offer(&offer).unwrap();
        assert!(matches!(&outputs[0], EngineOutput::Command(Command::Got(_))));
        assert!(rig.inbound.join("empty.flg").exists());
    }

    #[test]
    fn name_collision_gets_a_suffix() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        std::fs::write(rig.inbound.join("dup.pkt"), b"old").unwrap();

        let offer = FileOffer {
            name: FileName::from("dup.pkt"),
            size: 3,
            unix_time: 0,
            offset: 0,
            crc32: None,
        };
        rig.engine.handle_offer(&offer).unwrap();
        rig.engine.handle_data(b"new").unwrap();

        assert_eq!(std::fs::read(rig.inbound.join("dup.pkt")).unwrap(), b"old");
        assert_eq!(std::fs::read(rig.inbound.join("dup.pkt.1")).unwrap(), b"new");
    }

    #[test]
    fn overrun_is_a_violation() {
        let mut rig = Rig::new(NegotiatedOptions::default());
        let offer = FileOffer {
            name: FileName::from("tiny.pkt"),
            size: 4,
            unix_time: 0,
            offset: 0,
            crc32: None,
        };
        rig.engine.handle_offer(&offer).unwrap();
        assert!(matches!(
            rig.engine.handle_data(&[0u8; 5]),
            Err(SessionError::Violation(_))
        ));
    }
}
