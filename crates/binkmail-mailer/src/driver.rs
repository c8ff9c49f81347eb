//! Session driver: runs one [`SessionMachine`] over one connection.
//!
//! The machine decides, the driver executes. Each loop turn the driver
//! forwards queued frames to a spawned writer task (so a slow peer can
//! never wedge our reads), reads with the machine's per-frame deadline,
//! and routes frames, timeouts, and socket errors into the machine.
//!
//! For inbound sessions the driver also takes the peer's BSY lock at the
//! moment the session enters the transfer phase — the earliest point the
//! peer's identity is authenticated — and answers `M_BSY` if another
//! session already owns that link.

use std::{collections::VecDeque, time::Instant};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};

use binkmail_core::{SessionAction, SessionError, SessionMachine, SessionState, SessionSummary};
use binkmail_outbound::{BsoLayout, LockGuard, LockKind, OutboundError};
use binkmail_proto::{Command, Frame};

/// How many frames may sit between the driver and the writer task.
const WRITE_QUEUE: usize = 64;

/// BSY handling for a session.
pub enum SessionLock<'a> {
    /// The caller already holds the link's lock (outbound polls).
    AlreadyHeld,
    /// Acquire the caller's lock once its address is authenticated
    /// (inbound sessions).
    OnTransfer {
        /// Outbound layout to derive the lock path from.
        layout: &'a BsoLayout,
        /// Ident written into the lock payload.
        ident: &'a str,
    },
}

/// Outcome of a driven session.
pub struct SessionOutcome {
    /// The machine, for summaries and completion bookkeeping.
    pub machine: SessionMachine,
    /// `Ok` when the batch completed on both sides.
    pub result: Result<SessionSummary, SessionError>,
}

/// Drive `machine` over `stream` until the session finishes.
///
/// `on_transfer` runs once, the first time the session enters the
/// transfer phase (and, for inbound sessions, after the BSY lock is
/// held). Answerers use it to queue outbound work for the caller, whose
/// identity is only known by then.
pub async fn run_session<S, F>(
    stream: S,
    mut machine: SessionMachine,
    lock: SessionLock<'_>,
    on_transfer: F,
) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    F: FnMut(&mut SessionMachine),
{
    let frame_timeout = machine.frame_timeout();
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = crate::transport::FrameReader::new(read_half);

    // Writer task: drains the frame queue so reads and writes make
    // progress independently (one reader, one writer per socket).
    let (tx, mut rx) = mpsc::channel::<Frame>(WRITE_QUEUE);
    let writer_task = tokio::spawn(async move {
        let mut writer = crate::transport::FrameWriter::new(write_half);
        while let Some(frame) = rx.recv().await {
            let write = tokio::time::timeout(frame_timeout, writer.write_frame(&frame));
            match write.await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "frame write deadline expired",
                    ));
                },
            }
        }
        writer.shutdown().await
    });

    let mut guard: Option<LockGuard> = None;
    let result =
        drive(&mut reader, &tx, &mut machine, &lock, &mut guard, on_transfer).await;

    if let Err(err) = &result {
        for action in machine.abort_actions(err) {
            if let SessionAction::SendFrame(frame) = action {
                let _ = tx.send(frame).await;
            }
        }
    }

    drop(tx);
    if let Ok(Err(err)) = writer_task.await {
        tracing::debug!("writer shutdown: {err}");
    }
    drop(guard);

    let result = result.map(|()| machine.summary());
    SessionOutcome { machine, result }
}

async fn drive<R, F>(
    reader: &mut crate::transport::FrameReader<R>,
    tx: &mpsc::Sender<Frame>,
    machine: &mut SessionMachine,
    lock: &SessionLock<'_>,
    guard: &mut Option<LockGuard>,
    mut on_transfer: F,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
    F: FnMut(&mut SessionMachine),
{
    let frame_timeout = machine.frame_timeout();
    let mut outbox: VecDeque<Frame> = VecDeque::new();
    let mut transfer_hooked = false;

    queue_actions(machine.start(Instant::now())?, &mut outbox);

    loop {
        if outbox.is_empty() && !machine.is_finished() {
            queue_actions(machine.poll_send(Instant::now())?, &mut outbox);
        }

        interlock(machine, lock, guard, tx).await?;
        if !transfer_hooked && machine.state() == SessionState::Transfer {
            transfer_hooked = true;
            on_transfer(machine);
        }

        if machine.is_finished() {
            // Flush our last frames without racing the peer's close; an
            // EOF now is just the other side finishing first.
            while let Some(frame) = outbox.pop_front() {
                tx.send(frame)
                    .await
                    .map_err(|_| SessionError::Network("writer task gone".to_string()))?;
            }
            return Ok(());
        }

        tokio::select! {
            permit = tx.reserve(), if !outbox.is_empty() => {
                let permit = permit
                    .map_err(|_| SessionError::Network("writer task gone".to_string()))?;
                if let Some(frame) = outbox.pop_front() {
                    permit.send(frame);
                }
            },
            read = tokio::time::timeout(frame_timeout, reader.read_frame()) => {
                let actions = match read {
                    Err(_elapsed) => machine.handle_timeout(Instant::now())?,
                    Ok(Err(err)) => return Err(SessionError::Network(err.to_string())),
                    Ok(Ok(frame)) => machine.handle_frame(&frame, Instant::now())?,
                };
                queue_actions(actions, &mut outbox);
            },
        }
    }
}

/// Take the peer's BSY lock once an inbound session is authenticated.
async fn interlock(
    machine: &mut SessionMachine,
    lock: &SessionLock<'_>,
    guard: &mut Option<LockGuard>,
    tx: &mpsc::Sender<Frame>,
) -> Result<(), SessionError> {
    let SessionLock::OnTransfer { layout, ident } = lock else {
        return Ok(());
    };
    if guard.is_some() || machine.state() != SessionState::Transfer {
        return Ok(());
    }
    let Some(remote) = machine.remote_addresses().first() else {
        return Ok(());
    };

    match binkmail_outbound::acquire(layout, remote, LockKind::Busy, ident) {
        Ok(acquired) => {
            *guard = Some(acquired);
            Ok(())
        },
        Err(OutboundError::Busy(path)) => {
            tracing::info!("{remote} already in session ({} exists)", path.display());
            if let Ok(frame) = Command::Busy("link is busy, try again later".to_string()).to_frame()
            {
                let _ = tx.send(frame).await;
            }
            Err(SessionError::RemoteBusy(format!("local BSY held for {remote}")))
        },
        Err(err) => Err(SessionError::File(err.to_string())),
    }
}

fn queue_actions(actions: Vec<SessionAction>, outbox: &mut VecDeque<Frame>) {
    for action in actions {
        match action {
            SessionAction::SendFrame(frame) => outbox.push_back(frame),
            SessionAction::Close { reason } => {
                tracing::debug!("session closing: {reason}");
            },
        }
    }
}
