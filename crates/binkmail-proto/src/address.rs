//! FidoNet network addresses.
//!
//! An address is the tuple `zone:net/node[.point][@domain]`, e.g.
//! `2:5020/999.1@fidonet`. Zone and net must be non-zero; point 0 means
//! "the node itself". Addresses are immutable value types and the same
//! struct is used everywhere: wire parsing, configuration, and outbound
//! path derivation.

use std::{fmt, str::FromStr};

use crate::errors::{ProtocolError, Result};

/// A FidoNet node address.
///
/// Structural equality (`==`) compares every field including `domain`.
/// For the protocol's acceptance rule — domain is ignored unless both
/// sides carry one — use [`Address::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// Zone number (1-based; 0 is invalid).
    pub zone: u16,
    /// Net number within the zone (0 is invalid).
    pub net: u16,
    /// Node number within the net.
    pub node: u16,
    /// Point number; 0 for a plain node.
    pub point: u16,
    /// Optional domain, e.g. `fidonet`.
    pub domain: Option<String>,
}

impl Address {
    /// Build a plain node address with no point and no domain.
    #[must_use]
    pub fn new(zone: u16, net: u16, node: u16) -> Self {
        Self { zone, net, node, point: 0, domain: None }
    }

    /// Same address with the given point.
    #[must_use]
    pub fn with_point(mut self, point: u16) -> Self {
        self.point = point;
        self
    }

    /// True if this is a point address (point > 0).
    #[must_use]
    pub fn is_point(&self) -> bool {
        self.point > 0
    }

    /// Field-wise comparison ignoring `domain` unless both sides carry one.
    ///
    /// This is the equality the session layer uses when checking a remote
    /// address against configuration: `2:5020/999@fidonet` matches a
    /// configured `2:5020/999`.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        if self.zone != other.zone
            || self.net != other.net
            || self.node != other.node
            || self.point != other.point
        {
            return false;
        }
        match (&self.domain, &other.domain) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.point > 0 {
            write!(f, ".{}", self.point)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{domain}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ProtocolError::InvalidAddress(s.to_string());

        let (body, domain) = match s.split_once('@') {
            Some((body, domain)) if !domain.is_empty() => (body, Some(domain.to_string())),
            Some(_) => return Err(bad()),
            None => (s, None),
        };

        let (zone_str, rest) = body.split_once(':').ok_or_else(bad)?;
        let (net_str, node_str) = rest.split_once('/').ok_or_else(bad)?;
        let (node_str, point) = match node_str.split_once('.') {
            Some((node, point)) => (node, point.parse::<u16>().map_err(|_| bad())?),
            None => (node_str, 0),
        };

        let zone: u16 = zone_str.parse().map_err(|_| bad())?;
        let net: u16 = net_str.parse().map_err(|_| bad())?;
        let node: u16 = node_str.parse().map_err(|_| bad())?;

        if zone == 0 || net == 0 {
            return Err(bad());
        }

        Ok(Self { zone, net, node, point, domain })
    }
}

/// Parse a whitespace-separated address list (the `M_ADR` argument).
///
/// # Errors
///
/// - `ProtocolError::InvalidAddress` if any entry fails to parse
/// - `ProtocolError::InvalidCommand` if the list is empty
pub fn parse_address_list(args: &str) -> Result<Vec<Address>> {
    let addresses: Vec<Address> =
        args.split_whitespace().map(Address::from_str).collect::<Result<_>>()?;
    if addresses.is_empty() {
        return Err(ProtocolError::InvalidCommand {
            command: "M_ADR",
            detail: "empty address list".to_string(),
        });
    }
    Ok(addresses)
}
