//! binkmail binary.
//!
//! # Usage
//!
//! ```bash
//! # Answer inbound calls and poll every 10 minutes
//! binkmail --address 2:5020/999 --outbound /var/spool/fido/out \
//!          --inbound /var/spool/fido/in --listen 0.0.0.0:24554 \
//!          --link "2:5020/1,hub.example.org,secret" --poll-interval 600
//!
//! # One-shot poll of every configured link
//! binkmail --address 2:5020/999 --outbound /var/spool/fido/out \
//!          --inbound /var/spool/fido/in \
//!          --link "2:5020/1,hub.example.org,secret" --poll
//! ```

use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use binkmail_mailer::{Listener, LinkConfig, MailerConfig, poll_links};
use binkmail_proto::Address;

/// FidoNet binkp/1.0 mailer
#[derive(Parser, Debug)]
#[command(name = "binkmail")]
#[command(about = "binkp/1.0 mailer with a BinkleyTerm Style Outbound")]
#[command(version)]
struct Args {
    /// Local address (repeatable; the first is the main AKA)
    #[arg(long = "address", required = true)]
    addresses: Vec<String>,

    /// Base outbound directory
    #[arg(long)]
    outbound: std::path::PathBuf,

    /// Directory received files land in
    #[arg(long)]
    inbound: std::path::PathBuf,

    /// Address to listen on for inbound sessions
    #[arg(long)]
    listen: Option<String>,

    /// Link spec "address[,host[,password]]" (repeatable)
    #[arg(long = "link")]
    links: Vec<String>,

    /// Poll all links once and exit
    #[arg(long)]
    poll: bool,

    /// Also send hold-flavored traffic when polling
    #[arg(long)]
    flush_holds: bool,

    /// Poll queued links every N seconds while listening (0 disables)
    #[arg(long, default_value = "0")]
    poll_interval: u64,

    /// System name announced to peers
    #[arg(long, default_value = "binkmail")]
    sysname: String,

    /// Operator name announced to peers
    #[arg(long, default_value = "sysop")]
    sysop: String,

    /// Location announced to peers
    #[arg(long, default_value = "unknown")]
    location: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn build_config(args: &Args) -> Result<MailerConfig, String> {
    let mut addresses = Vec::new();
    for spec in &args.addresses {
        addresses.push(spec.parse::<Address>().map_err(|err| err.to_string())?);
    }
    let Some(main) = addresses.first().cloned() else {
        return Err("at least one --address is required".to_string());
    };

    let mut config = MailerConfig::new(main, &args.outbound, &args.inbound);
    config.local_addresses = addresses;
    config.system_name.clone_from(&args.sysname);
    config.sysop.clone_from(&args.sysop);
    config.location.clone_from(&args.location);

    for spec in &args.links {
        config.links.push(spec.parse::<LinkConfig>()?);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("configuration error: {err}");
            return ExitCode::from(1);
        },
    };

    tracing::info!(
        "binkmail {} as {}, outbound {}",
        env!("CARGO_PKG_VERSION"),
        config.local_addresses[0],
        config.outbound.display()
    );

    if args.poll {
        let report = poll_links(&config, true, args.flush_holds).await;
        return if report.all_ok() { ExitCode::SUCCESS } else { ExitCode::from(2) };
    }

    let Some(bind) = args.listen.clone() else {
        tracing::error!("nothing to do: pass --listen and/or --poll");
        return ExitCode::from(1);
    };

    let config = Arc::new(config);
    let listener = match Listener::bind(Arc::clone(&config), &bind).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("cannot bind {bind}: {err}");
            return ExitCode::from(1);
        },
    };

    if args.poll_interval > 0 {
        let config = Arc::clone(&config);
        let interval = Duration::from_secs(args.poll_interval);
        let flush_holds = args.flush_holds;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let report = poll_links(&config, false, flush_holds).await;
                if !report.all_ok() {
                    tracing::warn!("scheduled poll had failures");
                }
            }
        });
    }

    match listener.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("listener failed: {err}");
            ExitCode::from(2)
        },
    }
}
