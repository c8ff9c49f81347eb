//! Inbound TCP listener.
//!
//! Accepts connections on the binkp port and runs an answerer session on
//! each, one task per connection. Once a caller authenticates, the
//! session driver takes its BSY lock and the session also delivers any
//! mail we have queued for that caller — a poll costs the caller one
//! connection instead of two.

use std::sync::Arc;

use tokio::net::TcpListener;

use binkmail_core::{Role, SessionMachine};
use binkmail_outbound::FlowFile;

use crate::{
    config::MailerConfig,
    driver::{SessionLock, run_session},
    poller::{queue_for_link, settle_flows},
};

/// Bound inbound listener.
pub struct Listener {
    inner: TcpListener,
    config: Arc<MailerConfig>,
}

impl Listener {
    /// Bind to `bind` (e.g. `0.0.0.0:24554`).
    pub async fn bind(config: Arc<MailerConfig>, bind: &str) -> std::io::Result<Self> {
        let inner = TcpListener::bind(bind).await?;
        tracing::info!("listening on {}", inner.local_addr()?);
        Ok(Self { inner, config })
    }

    /// The actual bound address (useful with port 0).
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.inner.local_addr()
    }

    /// Accept loop; runs until the listener errors.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, peer) = self.inner.accept().await?;
            tracing::info!("inbound connection from {peer}");
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                handle_inbound(config, stream).await;
            });
        }
    }
}

async fn handle_inbound(config: Arc<MailerConfig>, stream: tokio::net::TcpStream) {
    let machine = SessionMachine::new(Role::Answerer, config.session_config(None));
    let layout = config.layout();
    let ident = config.ident();

    let mut flows: Vec<FlowFile> = Vec::new();
    let lock = SessionLock::OnTransfer { layout: &layout, ident: &ident };

    let mut outcome = run_session(stream, machine, lock, |machine| {
        // The caller is authenticated and locked; queue what we have
        // for its first presented address.
        let Some(remote) = machine.remote_addresses().first().cloned() else {
            return;
        };
        match queue_for_link(&layout, &remote, false, machine) {
            Ok(found) => flows = found,
            Err(err) => tracing::warn!("{remote}: scanning outbound: {err}"),
        }
    })
    .await;

    let completions = outcome.machine.take_completions();
    if let Err(err) = settle_flows(&flows, &completions) {
        tracing::warn!("inbound session flow bookkeeping failed: {err}");
    }

    match outcome.result {
        Ok(summary) => {
            tracing::info!(
                "inbound session done: {} files / {} bytes in, {} files / {} bytes out",
                summary.files_received,
                summary.bytes_received,
                summary.files_sent,
                summary.bytes_sent
            );
            if let Some(remote) = outcome.machine.remote_addresses().first() {
                let _ = binkmail_outbound::clear_try(&layout, remote);
            }
        },
        Err(err) => tracing::warn!("inbound session failed: {err}"),
    }
}
