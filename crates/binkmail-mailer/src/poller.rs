//! Outbound poller: turns queued BSO work into sessions.
//!
//! One poll pass walks the configured links. For each link with sendable
//! traffic it reaps stale control files, honors any hold, takes the BSY
//! lock, dials the endpoint, runs an originator session, and settles the
//! books afterwards: processed flow lines are marked, exhausted flow
//! files removed, the `.try` counter bumped or cleared, and a hold
//! written after a failure. A busy lock or an active hold just skips the
//! link until the next pass — some other process is already talking to
//! it, or it earned a rest.

use std::time::SystemTime;

use binkmail_core::{
    OutboundFile, PostAction, Role, SessionError, SessionMachine, SessionSummary,
    transfer::CompletedFile,
};
use binkmail_outbound::{
    BsoLayout, Directive, FlowFile, FlowKind, LockKind, OutboundError, find_work,
    flow::netmail_wire_name,
};
use binkmail_proto::Address;

use crate::{
    config::{LinkConfig, MailerConfig},
    driver::{SessionLock, run_session},
};

/// Result of polling one link.
#[derive(Debug)]
pub enum LinkOutcome {
    /// Session ran to completion.
    Completed(SessionSummary),
    /// Nothing queued and the poll was not forced.
    NoWork,
    /// Link is answer-only (no endpoint configured).
    NoEndpoint,
    /// Another process holds the link's BSY lock.
    Busy,
    /// A hold file defers this link.
    Held {
        /// Unix timestamp the hold expires at.
        until_unix: u64,
    },
    /// The session (or the dial) failed.
    Failed(String),
}

/// Per-link outcomes of one poll pass.
#[derive(Debug)]
pub struct PollReport {
    /// `(address, outcome)` per configured link, in configuration order.
    pub links: Vec<(Address, LinkOutcome)>,
}

impl PollReport {
    /// True when no link failed.
    #[must_use]
    pub fn all_ok(&self) -> bool {
        self.links.iter().all(|(_, outcome)| !matches!(outcome, LinkOutcome::Failed(_)))
    }
}

/// Poll every configured link once.
///
/// `force` dials links even when nothing is queued (to pick up waiting
/// inbound mail); `flush_holds` sends hold-flavored flows and ignores
/// hold files.
pub async fn poll_links(config: &MailerConfig, force: bool, flush_holds: bool) -> PollReport {
    let layout = config.layout();
    let mut links = Vec::new();
    for link in &config.links {
        let outcome = poll_link(config, &layout, link, force, flush_holds).await;
        match &outcome {
            LinkOutcome::Failed(reason) => tracing::warn!("{}: {reason}", link.address),
            other => tracing::debug!("{}: {other:?}", link.address),
        }
        links.push((link.address.clone(), outcome));
    }
    PollReport { links }
}

async fn poll_link(
    config: &MailerConfig,
    layout: &BsoLayout,
    link: &LinkConfig,
    force: bool,
    flush_holds: bool,
) -> LinkOutcome {
    let address = &link.address;
    let now = SystemTime::now();

    // Crashed mailers leave locks behind; reap before honoring them.
    let (node_dir, _) = layout.node_slot(address);
    if let Err(err) = binkmail_outbound::reap_stale(&node_dir, config.stale_lock_age, now) {
        return LinkOutcome::Failed(format!("stale cleanup: {err}"));
    }

    if !flush_holds {
        match binkmail_outbound::read_hold(layout, address) {
            Ok(Some(hold)) if hold.is_active(now) => {
                return LinkOutcome::Held { until_unix: hold.until_unix };
            },
            Ok(_) => {},
            Err(err) => return LinkOutcome::Failed(format!("reading hold: {err}")),
        }
    }

    let Some(endpoint) = link.endpoint() else {
        return LinkOutcome::NoEndpoint;
    };

    let guard = match binkmail_outbound::acquire(layout, address, LockKind::Busy, &config.ident())
    {
        Ok(guard) => guard,
        Err(OutboundError::Busy(_)) => return LinkOutcome::Busy,
        Err(err) => return LinkOutcome::Failed(format!("acquiring BSY: {err}")),
    };

    let mut machine =
        SessionMachine::new(Role::Originator, config.session_config(Some(address.clone())));
    let flows = match queue_for_link(layout, address, flush_holds, &mut machine) {
        Ok(flows) => flows,
        Err(err) => return LinkOutcome::Failed(format!("scanning outbound: {err}")),
    };
    if !force && flows.iter().all(FlowFile::is_exhausted) {
        return LinkOutcome::NoWork;
    }

    tracing::info!("calling {address} at {endpoint}");
    // The CSY marker covers the dial itself, so other pollers can tell a
    // call in progress from a session in progress.
    let csy = binkmail_outbound::acquire(layout, address, LockKind::CallInProgress, &config.ident())
        .ok();
    let dial = tokio::time::timeout(
        config.frame_timeout,
        tokio::net::TcpStream::connect(&endpoint),
    );
    let dialed = dial.await;
    if let Some(csy) = csy {
        if let Err(err) = csy.release() {
            tracing::warn!("{address}: releasing CSY: {err}");
        }
    }
    let stream = match dialed {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            record_failure(layout, address, config, now);
            return LinkOutcome::Failed(format!("connecting {endpoint}: {err}"));
        },
        Err(_) => {
            record_failure(layout, address, config, now);
            return LinkOutcome::Failed(format!("connecting {endpoint}: timed out"));
        },
    };

    let mut outcome = run_session(stream, machine, SessionLock::AlreadyHeld, |_| {}).await;

    // Post-actions were applied as acks arrived; settle the flow files
    // even for a session that failed partway through.
    let completions = outcome.machine.take_completions();
    if let Err(err) = settle_flows(&flows, &completions) {
        tracing::warn!("{address}: flow bookkeeping failed: {err}");
    }

    match outcome.result {
        Ok(summary) => {
            let _ = binkmail_outbound::clear_try(layout, address);
            let _ = binkmail_outbound::clear_hold(layout, address);
            if let Err(err) = guard.release() {
                tracing::warn!("{address}: releasing BSY: {err}");
            }
            tracing::info!(
                "{address}: session done, {} files / {} bytes out, {} files / {} bytes in",
                summary.files_sent,
                summary.bytes_sent,
                summary.files_received,
                summary.bytes_received
            );
            LinkOutcome::Completed(summary)
        },
        Err(SessionError::RemoteBusy(reason)) => {
            // Not a fault: the peer will free up on its own.
            tracing::info!("{address}: busy: {reason}");
            LinkOutcome::Busy
        },
        Err(err) => {
            record_failure(layout, address, config, now);
            LinkOutcome::Failed(err.to_string())
        },
    }
}

fn record_failure(layout: &BsoLayout, address: &Address, config: &MailerConfig, now: SystemTime) {
    match binkmail_outbound::bump_try(layout, address, now) {
        Ok(count) => tracing::info!("{address}: failure #{count} recorded"),
        Err(err) => tracing::warn!("{address}: recording failure: {err}"),
    }
    let until = now + config.hold_after_failure;
    if let Err(err) = binkmail_outbound::set_hold(layout, address, until, "session failed") {
        tracing::warn!("{address}: writing hold: {err}");
    }
}

/// Scan the outbound for `address` and queue everything sendable.
///
/// Returns the flow files in sending order; completion tags encode
/// `(flow index << 32) | line` so [`settle_flows`] can find its way back.
pub fn queue_for_link(
    layout: &BsoLayout,
    address: &Address,
    flush_holds: bool,
    machine: &mut SessionMachine,
) -> Result<Vec<FlowFile>, OutboundError> {
    let flows = find_work(layout, address, flush_holds)?;
    for (flow_index, flow) in flows.iter().enumerate() {
        for entry in &flow.entries {
            let tag = ((flow_index as u64) << 32) | entry.line as u64;
            let post = match entry.directive {
                Directive::Truncate => PostAction::Truncate,
                Directive::Delete => PostAction::Delete,
                Directive::Send | Directive::Skip => PostAction::Keep,
            };
            // Netmail packets travel under the standard hex name and are
            // removed as whole flow files, not via a post-action.
            let (post, wire_name) = match flow.kind {
                FlowKind::Netmail => (
                    PostAction::Keep,
                    Some(binkmail_proto::FileName::new(netmail_wire_name(address).into_bytes())),
                ),
                FlowKind::Reference => (post, None),
            };
            let outbound = match OutboundFile::from_path(&entry.path, post, tag) {
                Ok(outbound) => match wire_name {
                    Some(name) => outbound.with_wire_name(name),
                    None => outbound,
                },
                Err(err) => {
                    tracing::warn!("skipping {}: {err}", entry.path.display());
                    continue;
                },
            };
            machine.enqueue(outbound);
        }
    }
    Ok(flows)
}

/// Mark delivered flow lines and remove exhausted flow files.
pub fn settle_flows(
    flows: &[FlowFile],
    completions: &[CompletedFile],
) -> Result<(), OutboundError> {
    for completion in completions {
        let flow_index = (completion.tag >> 32) as usize;
        let line = (completion.tag & 0xFFFF_FFFF) as usize;
        let Some(flow) = flows.get(flow_index) else {
            continue;
        };
        match flow.kind {
            FlowKind::Netmail => {
                // The flow file is the delivered payload itself.
                match std::fs::remove_file(&flow.path) {
                    Ok(()) => {},
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                    Err(err) => return Err(err.into()),
                }
            },
            FlowKind::Reference => flow.mark_processed(line)?,
        }
    }

    for flow in flows {
        if flow.kind != FlowKind::Reference || !flow.path.exists() {
            continue;
        }
        let reloaded = FlowFile::load(
            &flow.path,
            flow.address.clone(),
            flow.kind,
            flow.flavor,
            flow.mtime,
        )?;
        if reloaded.is_exhausted() {
            tracing::debug!("removing exhausted flow {}", flow.path.display());
            match std::fs::remove_file(&flow.path) {
                Ok(()) => {},
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {},
                Err(err) => return Err(err.into()),
            }
        }
    }
    Ok(())
}
