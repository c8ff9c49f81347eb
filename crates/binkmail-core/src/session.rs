//! The binkp session state machine.
//!
//! One machine instance drives one TCP connection, as originator (we
//! called) or answerer (they called). The machine performs no socket
//! I/O: methods take parsed frames and the current time and return
//! [`SessionAction`]s for the driver to execute. Local file I/O happens
//! inside the owned [`TransferEngine`].
//!
//! # Phases
//!
//! ```text
//! originator                               answerer
//! ──────────                               ────────
//! send M_NUL… M_ADR ──────────────────────> send M_NUL… (OPT CRAM-…) M_ADR
//!        wait peer M_ADR <────────────────┘        wait peer M_ADR
//! [password configured?]                   [password configured?]
//!   send M_PWD (CRAM or plain) ──────────>   verify, send M_OK
//!   wait M_OK <──────────────────────────┘
//! negotiate options                        negotiate options
//! ┌──────────────── transfer: M_FILE/data/M_GOT/M_GET/M_SKIP ─────────────┐
//! └───────────── both sides M_EOB + nothing in flight → Done ─────────────┘
//! ```
//!
//! The originator computes its CRAM response from the challenge carried
//! in the answerer's greeting, so `M_PWD` goes out right after the peer's
//! `M_ADR` is seen — by then the whole greeting batch, challenge
//! included, has arrived.
//!
//! Timeouts: every frame read runs under [`SessionConfig::frame_timeout`];
//! an expiry is benign while transferring (idle peer) and fatal anywhere
//! else. The whole session dies at [`SessionConfig::session_timeout`].

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use binkmail_crypto::{CramChallenge, Secret, constant_time_eq};
use binkmail_proto::{Address, Command, Frame};

use crate::{
    compress::{PlzCodec, PlzStats},
    error::{Result, SessionError},
    options::{NegotiatedOptions, OptionsConfig, RemoteOptions, negotiate},
    transfer::{CompletedFile, EngineOutput, OutboundFile, TransferEngine},
};

/// Default per-frame read deadline.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(30);

/// Default whole-session deadline.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(300);

/// Which end of the connection this machine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We opened the connection and poll our queue at the peer.
    Originator,
    /// We accepted the connection.
    Answerer,
}

/// Session configuration, immutable for the session's lifetime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Our address list, first entry is the main AKA.
    pub local_addresses: Vec<Address>,
    /// System name for the greeting's `SYS` line.
    pub system_name: String,
    /// Operator name for the `ZYZ` line.
    pub sysop: String,
    /// Location for the `LOC` line.
    pub location: String,
    /// For originators: the address we dialed; the peer must present it.
    pub expected_remote: Option<Address>,
    /// Per-link shared secrets.
    pub auth: Vec<(Address, Secret)>,
    /// Optional-feature stances.
    pub options: OptionsConfig,
    /// Directory received files land in.
    pub inbound: PathBuf,
    /// Per-frame read deadline.
    pub frame_timeout: Duration,
    /// Whole-session deadline.
    pub session_timeout: Duration,
}

impl SessionConfig {
    /// Minimal config for one local address.
    #[must_use]
    pub fn new(local: Address, inbound: impl Into<PathBuf>) -> Self {
        Self {
            local_addresses: vec![local],
            system_name: "binkmail".to_string(),
            sysop: "sysop".to_string(),
            location: "unknown".to_string(),
            expected_remote: None,
            auth: Vec::new(),
            options: OptionsConfig::default(),
            inbound: inbound.into(),
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    /// Shared secret for any of the given remote addresses.
    fn secret_for(&self, addresses: &[Address]) -> Option<&Secret> {
        self.auth
            .iter()
            .find(|(link, _)| addresses.iter().any(|remote| remote.matches(link)))
            .map(|(_, secret)| secret)
    }
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, greeting not yet sent.
    Setup,
    /// Greeting sent, waiting for the peer's `M_ADR`.
    WaitAddress,
    /// Originator sent `M_PWD`, waiting for `M_OK`.
    WaitOk,
    /// Answerer waiting for the peer's `M_PWD`.
    WaitPassword,
    /// Authenticated; files and acknowledgements flow both ways.
    Transfer,
    /// Batch complete on both sides.
    Done,
    /// Terminated by error.
    Failed,
}

impl SessionState {
    /// Human-readable activity for error messages.
    #[must_use]
    pub fn context(self) -> &'static str {
        match self {
            Self::Setup => "setting up",
            Self::WaitAddress => "awaiting M_ADR",
            Self::WaitOk => "awaiting M_OK",
            Self::WaitPassword => "awaiting M_PWD",
            Self::Transfer => "transferring",
            Self::Done | Self::Failed => "finished",
        }
    }
}

/// Actions the driver executes on the machine's behalf.
#[derive(Debug)]
pub enum SessionAction {
    /// Write this frame to the socket (under the frame deadline).
    SendFrame(Frame),
    /// Close the connection; the session is over.
    Close {
        /// Why the session ended.
        reason: String,
    },
}

/// End-of-session accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Files fully sent and acknowledged.
    pub files_sent: u32,
    /// Files fully received and renamed into the inbound.
    pub files_received: u32,
    /// Total frame bytes written, headers included.
    pub bytes_sent: u64,
    /// Total frame bytes read, headers included.
    pub bytes_received: u64,
    /// Receives rejected for CRC mismatch.
    pub crc_failures: u32,
}

/// State machine for one binkp session.
#[derive(Debug)]
pub struct SessionMachine {
    role: Role,
    config: SessionConfig,
    state: SessionState,
    started_at: Option<Instant>,
    remote_addresses: Vec<Address>,
    remote_opts: RemoteOptions,
    issued_challenge: Option<CramChallenge>,
    negotiated: Option<NegotiatedOptions>,
    engine: TransferEngine,
    plz: Option<PlzCodec>,
    local_eob_sent: bool,
    remote_eob_seen: bool,
    bytes_sent: u64,
    bytes_received: u64,
}

impl SessionMachine {
    /// New machine in [`SessionState::Setup`].
    #[must_use]
    pub fn new(role: Role, config: SessionConfig) -> Self {
        let engine = TransferEngine::new(&config.inbound);
        Self {
            role,
            config,
            state: SessionState::Setup,
            started_at: None,
            remote_addresses: Vec::new(),
            remote_opts: RemoteOptions::default(),
            issued_challenge: None,
            negotiated: None,
            engine,
            plz: None,
            local_eob_sent: false,
            remote_eob_seen: false,
            bytes_sent: 0,
            bytes_received: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Which end we play.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// True once the session reached `Done` or `Failed`.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, SessionState::Done | SessionState::Failed)
    }

    /// Addresses the peer presented in its `M_ADR`.
    #[must_use]
    pub fn remote_addresses(&self) -> &[Address] {
        &self.remote_addresses
    }

    /// Options both sides agreed on; `None` before the transfer phase.
    #[must_use]
    pub fn negotiated(&self) -> Option<NegotiatedOptions> {
        self.negotiated
    }

    /// Per-frame read deadline the driver must apply.
    #[must_use]
    pub fn frame_timeout(&self) -> Duration {
        self.config.frame_timeout
    }

    /// Compression statistics, if `PLZ` was negotiated.
    #[must_use]
    pub fn plz_stats(&self) -> Option<PlzStats> {
        self.plz.as_ref().map(PlzCodec::stats)
    }

    /// Queue a file for sending this session.
    pub fn enqueue(&mut self, entry: OutboundFile) {
        self.engine.enqueue(entry);
    }

    /// Completed sends since the last call, for flow bookkeeping.
    pub fn take_completions(&mut self) -> Vec<CompletedFile> {
        self.engine.take_completions()
    }

    /// Completed receives since the last call.
    pub fn take_received(&mut self) -> Vec<CompletedFile> {
        self.engine.take_received()
    }

    /// End-of-session accounting.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            files_sent: self.engine.files_sent(),
            files_received: self.engine.files_received(),
            bytes_sent: self.bytes_sent,
            bytes_received: self.bytes_received,
            crc_failures: self.engine.crc_failures(),
        }
    }

    /// Emit the greeting batch and enter [`SessionState::WaitAddress`].
    ///
    /// Both roles greet the same way: `M_NUL` info lines, an `OPT` line
    /// when there is anything to advertise, then `M_ADR`. An answerer
    /// with any configured secrets also issues a CRAM challenge.
    pub fn start(&mut self, now: Instant) -> Result<Vec<SessionAction>> {
        debug_assert_eq!(self.state, SessionState::Setup);
        self.started_at = Some(now);

        let mut actions = Vec::new();
        for line in [
            format!("SYS {}", self.config.system_name),
            format!("ZYZ {}", self.config.sysop),
            format!("LOC {}", self.config.location),
            format!("VER binkmail/{} binkp/1.0", env!("CARGO_PKG_VERSION")),
        ] {
            actions.push(self.send(Command::Nul(line).to_frame()?));
        }

        let mut keywords: Vec<String> =
            self.config.options.advertised_keywords().iter().map(ToString::to_string).collect();
        if self.role == Role::Answerer && !self.config.auth.is_empty() {
            let challenge = CramChallenge::generate();
            keywords.extend(challenge.opt_keywords());
            self.issued_challenge = Some(challenge);
        }
        if !keywords.is_empty() {
            actions.push(self.send(Command::Nul(format!("OPT {}", keywords.join(" "))).to_frame()?));
        }

        actions.push(self.send(Command::Address(self.config.local_addresses.clone()).to_frame()?));
        self.state = SessionState::WaitAddress;
        Ok(actions)
    }

    /// Process one inbound frame.
    ///
    /// # Errors
    ///
    /// Any error ends the session; the driver should follow up with
    /// [`SessionMachine::abort_actions`] and close the socket.
    pub fn handle_frame(&mut self, frame: &Frame, now: Instant) -> Result<Vec<SessionAction>> {
        self.check_deadline(now)?;
        self.bytes_received += frame.encoded_len() as u64;

        if !frame.is_command {
            return self.handle_data_frame(frame);
        }

        let command = Command::from_frame(frame)?;
        tracing::trace!("<- {}", command.verb());

        match command {
            Command::Nul(line) => {
                self.absorb_nul(&line);
                Ok(Vec::new())
            },
            Command::Err(reason) => Err(SessionError::Remote(reason)),
            Command::Busy(reason) => Err(SessionError::RemoteBusy(reason)),
            Command::Unknown(opcode, _) => {
                // Forward compatibility: never fail on commands from a
                // newer dialect.
                tracing::debug!("ignoring unknown command opcode {opcode}");
                Ok(Vec::new())
            },
            command => self.dispatch(command),
        }
    }

    /// The driver's frame read timed out.
    ///
    /// Benign while transferring — the peer simply has nothing to say —
    /// so the machine keeps pumping its own sends. Fatal in every other
    /// state.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<Vec<SessionAction>> {
        self.check_deadline(now)?;
        if self.state == SessionState::Transfer {
            return self.pump();
        }
        Err(SessionError::Timeout {
            elapsed: self.config.frame_timeout,
            context: self.state.context(),
        })
    }

    /// Advance the send side: next file offers, data bursts, `M_EOB`.
    ///
    /// The driver calls this between reads while in the transfer phase;
    /// it is a no-op in any other state.
    pub fn poll_send(&mut self, now: Instant) -> Result<Vec<SessionAction>> {
        self.check_deadline(now)?;
        self.pump()
    }

    /// Actions to perform when ending the session on `err`.
    ///
    /// Sends a reasoned `M_ERR` for our own failures; peer-reported and
    /// socket-level conditions get no reply (there is nobody listening).
    pub fn abort_actions(&mut self, err: &SessionError) -> Vec<SessionAction> {
        self.state = SessionState::Failed;
        let mut actions = Vec::new();
        match err {
            SessionError::Remote(_)
            | SessionError::RemoteBusy(_)
            | SessionError::Network(_)
            | SessionError::Deadline { .. } => {},
            other => {
                if let Ok(frame) = Command::Err(other.to_string()).to_frame() {
                    actions.push(self.send(frame));
                }
            },
        }
        actions.push(SessionAction::Close { reason: err.to_string() });
        actions
    }

    fn send(&mut self, frame: Frame) -> SessionAction {
        self.bytes_sent += frame.encoded_len() as u64;
        SessionAction::SendFrame(frame)
    }

    fn check_deadline(&self, now: Instant) -> Result<()> {
        if let Some(started) = self.started_at {
            let elapsed = now.duration_since(started);
            if elapsed > self.config.session_timeout {
                return Err(SessionError::Deadline { elapsed });
            }
        }
        Ok(())
    }

    fn absorb_nul(&mut self, line: &str) {
        if let Err(err) = self.remote_opts.absorb_nul(line) {
            // A garbled challenge only matters if we end up needing it;
            // authentication will then fall back to plaintext.
            tracing::warn!("ignoring malformed CRAM advertisement: {err}");
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<Vec<SessionAction>> {
        match (self.state, command) {
            (SessionState::WaitAddress, Command::Address(addresses)) => {
                self.on_remote_addresses(addresses)
            },

            (SessionState::WaitOk, Command::Ok(_)) => self.enter_transfer(),

            (SessionState::WaitPassword, Command::Password(password)) => {
                self.on_password(&password)
            },

            (SessionState::Transfer, command) => self.on_transfer_command(command),

            (state, command) => {
                Err(SessionError::Unexpected { verb: command.verb(), context: state.context() })
            },
        }
    }

    fn on_remote_addresses(&mut self, addresses: Vec<Address>) -> Result<Vec<SessionAction>> {
        tracing::info!(
            "peer presents {}",
            addresses.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
        );

        if let Some(expected) = &self.config.expected_remote {
            if !addresses.iter().any(|addr| addr.matches(expected)) {
                return Err(SessionError::AuthFailed(format!(
                    "remote did not present expected address {expected}"
                )));
            }
        }
        self.remote_addresses = addresses;

        match self.role {
            Role::Originator => {
                let Some(secret) = self.config.secret_for(&self.remote_addresses) else {
                    // No password for this link: straight to options.
                    return self.enter_transfer();
                };

                let password = match &self.remote_opts.cram {
                    Some(challenge) => challenge
                        .respond(secret)
                        .map_err(|err| SessionError::AuthFailed(err.to_string()))?,
                    None => secret.as_str().to_string(),
                };
                let action = self.send(Command::Password(password).to_frame()?);
                self.state = SessionState::WaitOk;
                Ok(vec![action])
            },
            Role::Answerer => {
                if self.config.secret_for(&self.remote_addresses).is_some() {
                    self.state = SessionState::WaitPassword;
                    Ok(Vec::new())
                } else {
                    let action = self.send(Command::Ok("non-secure".to_string()).to_frame()?);
                    let mut actions = vec![action];
                    actions.extend(self.enter_transfer()?);
                    Ok(actions)
                }
            },
        }
    }

    fn on_password(&mut self, password: &str) -> Result<Vec<SessionAction>> {
        let Some(secret) = self.config.secret_for(&self.remote_addresses) else {
            return Err(SessionError::AuthFailed("no secret configured".to_string()));
        };

        let verified = if password.starts_with("CRAM-") {
            let Some(challenge) = &self.issued_challenge else {
                return Err(SessionError::AuthFailed(
                    "CRAM response to a challenge we never issued".to_string(),
                ));
            };
            challenge.verify(secret, password).is_ok()
        } else {
            constant_time_eq(password.as_bytes(), secret.as_bytes())
        };

        if !verified {
            return Err(SessionError::AuthFailed(format!(
                "bad password from {}",
                self.remote_addresses.first().map_or_else(String::new, ToString::to_string)
            )));
        }

        let action = self.send(Command::Ok("secure".to_string()).to_frame()?);
        let mut actions = vec![action];
        actions.extend(self.enter_transfer()?);
        Ok(actions)
    }

    fn enter_transfer(&mut self) -> Result<Vec<SessionAction>> {
        let negotiated = negotiate(&self.config.options, &self.remote_opts)?;
        self.negotiated = Some(negotiated);
        if negotiated.plz {
            self.plz = Some(PlzCodec::new());
        }
        self.engine.configure(negotiated);
        self.state = SessionState::Transfer;
        tracing::info!(
            "entering transfer (NR {}, CRC {}, PLZ {})",
            negotiated.nr,
            negotiated.crc,
            negotiated.plz
        );
        self.pump()
    }

    fn on_transfer_command(&mut self, command: Command) -> Result<Vec<SessionAction>> {
        let outputs = match command {
            Command::File(offer) => {
                // A new offer reopens the peer's batch.
                self.remote_eob_seen = false;
                self.engine.handle_offer(&offer)?
            },
            Command::Got(ack) => {
                self.engine.handle_got(&ack)?;
                Vec::new()
            },
            Command::Get(request) => {
                let outputs = self.engine.handle_get(&request)?;
                if !outputs.is_empty() {
                    // Re-offering after our EOB reopens our batch.
                    self.local_eob_sent = false;
                }
                outputs
            },
            Command::Skip(request) => {
                self.engine.handle_skip(&request);
                Vec::new()
            },
            Command::Eob => {
                tracing::debug!("peer has no more files");
                self.remote_eob_seen = true;
                Vec::new()
            },
            // A late M_OK (non-secure ack) or a password we did not ask
            // for; both harmless.
            Command::Ok(_) | Command::Password(_) => Vec::new(),
            other => {
                return Err(SessionError::Unexpected {
                    verb: other.verb(),
                    context: SessionState::Transfer.context(),
                });
            },
        };

        let mut actions = self.emit(outputs)?;
        actions.extend(self.pump()?);
        Ok(actions)
    }

    fn handle_data_frame(&mut self, frame: &Frame) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Transfer {
            return Err(SessionError::Unexpected {
                verb: "data frame",
                context: self.state.context(),
            });
        }

        let payload = match &mut self.plz {
            Some(plz) => plz.decompress(&frame.payload),
            None => frame.payload.to_vec(),
        };

        let outputs = self.engine.handle_data(&payload)?;
        let mut actions = self.emit(outputs)?;
        actions.extend(self.pump()?);
        Ok(actions)
    }

    /// Turn engine outputs into wire frames, compressing data when `PLZ`
    /// is on.
    fn emit(&mut self, outputs: Vec<EngineOutput>) -> Result<Vec<SessionAction>> {
        let mut actions = Vec::new();
        for output in outputs {
            match output {
                EngineOutput::Command(command) => {
                    tracing::trace!("-> {}", command.verb());
                    let frame = command.to_frame()?;
                    actions.push(self.send(frame));
                },
                EngineOutput::Data(data) => {
                    let payload = match &mut self.plz {
                        Some(plz) => plz.compress(&data),
                        None => data,
                    };
                    actions.push(self.send(Frame::data(payload)?));
                },
            }
        }
        Ok(actions)
    }

    /// Advance sends, declare our end of batch, detect completion.
    fn pump(&mut self) -> Result<Vec<SessionAction>> {
        if self.state != SessionState::Transfer {
            return Ok(Vec::new());
        }

        let outputs = self.engine.poll()?;
        if !outputs.is_empty() && self.local_eob_sent {
            // An M_GET restart put work back in the queue after our EOB.
            self.local_eob_sent = false;
        }
        let mut actions = self.emit(outputs)?;

        if self.engine.send_complete() && !self.local_eob_sent {
            tracing::debug!("local queue drained");
            actions.push(self.send(Command::Eob.to_frame()?));
            self.local_eob_sent = true;
        }

        if self.local_eob_sent && self.remote_eob_seen && self.engine.is_idle() {
            self.state = SessionState::Done;
            tracing::info!("session complete");
            actions.push(SessionAction::Close { reason: "batch complete".to_string() });
        }
        Ok(actions)
    }
}
