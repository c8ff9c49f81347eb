//! Mailer configuration.
//!
//! Typed structs built from command-line arguments; there is no config
//! file parser here. A link is the unit of configuration: one remote
//! address, optionally a dialable endpoint and a shared secret. Links
//! without an endpoint are answer-only — we accept their calls and queue
//! mail, but never dial out.

use std::{
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use binkmail_core::{OptionsConfig, SessionConfig};
use binkmail_crypto::Secret;
use binkmail_proto::{Address, DEFAULT_PORT};

/// One configured remote system.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// The link's main address.
    pub address: Address,
    /// `host[:port]` to dial; `None` for answer-only links.
    pub host: Option<String>,
    /// Shared session password.
    pub password: Option<Secret>,
}

impl LinkConfig {
    /// Endpoint to dial, with the default binkp port filled in.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        self.host.as_ref().map(|host| {
            if host.contains(':') { host.clone() } else { format!("{host}:{DEFAULT_PORT}") }
        })
    }
}

impl FromStr for LinkConfig {
    type Err = String;

    /// Parse `address[,host[,password]]`, e.g.
    /// `2:5020/999,mail.example.org:24554,secret`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.splitn(3, ',').map(str::trim);
        let address = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| format!("empty link spec '{s}'"))?
            .parse::<Address>()
            .map_err(|err| err.to_string())?;
        let host = fields.next().filter(|f| !f.is_empty()).map(ToString::to_string);
        let password = fields.next().filter(|f| !f.is_empty()).map(Secret::new);
        Ok(Self { address, host, password })
    }
}

/// Whole-mailer configuration.
#[derive(Debug, Clone)]
pub struct MailerConfig {
    /// Our address list; the first entry's zone is the outbound's
    /// default zone.
    pub local_addresses: Vec<Address>,
    /// System name for greetings.
    pub system_name: String,
    /// Operator name.
    pub sysop: String,
    /// Location string.
    pub location: String,
    /// Base outbound directory.
    pub outbound: PathBuf,
    /// Directory received files land in.
    pub inbound: PathBuf,
    /// Configured links.
    pub links: Vec<LinkConfig>,
    /// Optional-feature stances for every session.
    pub options: OptionsConfig,
    /// Per-frame read/write deadline.
    pub frame_timeout: Duration,
    /// Whole-session deadline.
    pub session_timeout: Duration,
    /// Age after which leftover control files are reaped.
    pub stale_lock_age: Duration,
    /// How long a link is held after a failed session.
    pub hold_after_failure: Duration,
}

impl MailerConfig {
    /// Configuration with defaults for everything but the paths and the
    /// local address.
    #[must_use]
    pub fn new(local: Address, outbound: impl Into<PathBuf>, inbound: impl Into<PathBuf>) -> Self {
        Self {
            local_addresses: vec![local],
            system_name: "binkmail".to_string(),
            sysop: "sysop".to_string(),
            location: "unknown".to_string(),
            outbound: outbound.into(),
            inbound: inbound.into(),
            links: Vec::new(),
            options: OptionsConfig::default(),
            frame_timeout: binkmail_core::session::DEFAULT_FRAME_TIMEOUT,
            session_timeout: binkmail_core::session::DEFAULT_SESSION_TIMEOUT,
            stale_lock_age: Duration::from_secs(3600),
            hold_after_failure: Duration::from_secs(600),
        }
    }

    /// Outbound layout rooted at the configured base, with the main
    /// AKA's zone as the default zone.
    #[must_use]
    pub fn layout(&self) -> binkmail_outbound::BsoLayout {
        let default_zone = self.local_addresses.first().map_or(1, |addr| addr.zone);
        binkmail_outbound::BsoLayout::new(&self.outbound).with_default_zone(default_zone)
    }

    /// Session configuration for one connection.
    ///
    /// `expected_remote` is set for outbound calls (we know whom we
    /// dialed) and `None` for inbound ones.
    #[must_use]
    pub fn session_config(&self, expected_remote: Option<Address>) -> SessionConfig {
        SessionConfig {
            local_addresses: self.local_addresses.clone(),
            system_name: self.system_name.clone(),
            sysop: self.sysop.clone(),
            location: self.location.clone(),
            expected_remote,
            auth: self
                .links
                .iter()
                .filter_map(|link| {
                    link.password.as_ref().map(|secret| (link.address.clone(), secret.clone()))
                })
                .collect(),
            options: self.options,
            inbound: self.inbound.clone(),
            frame_timeout: self.frame_timeout,
            session_timeout: self.session_timeout,
        }
    }

    /// Ident string written into lock files.
    #[must_use]
    pub fn ident(&self) -> String {
        self.local_addresses.first().map_or_else(|| "binkmail".to_string(), ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_spec_parses_all_forms() {
        let full: LinkConfig = "2:5020/999,mail.example.org:24555,secret".parse().unwrap();
        assert_eq!(full.address, Address::new(2, 5020, 999));
        assert_eq!(full.endpoint().as_deref(), Some("mail.example.org:24555"));
        assert!(full.password.is_some());

        let default_port: LinkConfig = "2:5020/999,mail.example.org".parse().unwrap();
        assert_eq!(default_port.endpoint().as_deref(), Some("mail.example.org:24554"));
        assert!(default_port.password.is_none());

        let answer_only: LinkConfig = "2:5020/999".parse().unwrap();
        assert!(answer_only.endpoint().is_none());

        assert!("".parse::<LinkConfig>().is_err());
        assert!("0:1/2,host".parse::<LinkConfig>().is_err());
    }

    #[test]
    fn session_config_carries_link_secrets() {
        let mut config = MailerConfig::new(Address::new(2, 5020, 999), "/out", "/in");
        config.links.push("1:234/56,example.org,pw".parse().unwrap());
        config.links.push("1:234/57".parse().unwrap());

        let session = config.session_config(None);
        assert_eq!(session.auth.len(), 1);
        assert_eq!(session.auth[0].0, Address::new(1, 234, 56));
    }

    #[test]
    fn layout_uses_main_zone() {
        let config = MailerConfig::new(Address::new(2, 5020, 999), "/out", "/in");
        let layout = config.layout();
        assert_eq!(layout.zone_dir(2), PathBuf::from("/out"));
        assert_eq!(layout.zone_dir(1), PathBuf::from("/out.001"));
    }
}
