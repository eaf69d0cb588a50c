//! Core value types shared by every stage of a check cycle.
//!
//! All store-specific key shapes are turned into a [`RouteKey`] at the store
//! boundary; nothing downstream branches on the raw key layout.

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;

use crate::error::{Result, RouteCheckError};

/// Host prefix length for IPv4 routes.
pub const IPV4_HOST_PREFIX_LEN: u8 = 32;

/// Host prefix length for IPv6 routes.
pub const IPV6_HOST_PREFIX_LEN: u8 = 128;

/// A normalized `address/prefixlen` route key.
///
/// Equality, hashing and ordering are defined on the normalized text only,
/// so a sorted collection of keys is in the lexicographic order the
/// sorted-merge differ expects.
#[derive(Debug, Clone)]
pub struct RouteKey {
    text: String,
    addr: IpAddr,
    prefix_len: u8,
}

impl RouteKey {
    /// Parses a route key, adding the host prefix length when none is given.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let (addr_part, len_part) = match trimmed.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (trimmed, None),
        };

        let addr = IpAddr::from_str(addr_part)
            .map_err(|_| RouteCheckError::InvalidKey(s.to_string()))?;
        let max_len = host_prefix_len(&addr);

        let prefix_len = match len_part {
            Some(len) => len
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= max_len)
                .ok_or_else(|| RouteCheckError::InvalidKey(s.to_string()))?,
            None => max_len,
        };

        Ok(Self::from_parts(addr, prefix_len))
    }

    /// Builds the host route key (`/32` or `/128`) for an address.
    pub fn host(addr: IpAddr) -> Self {
        Self::from_parts(addr, host_prefix_len(&addr))
    }

    fn from_parts(addr: IpAddr, prefix_len: u8) -> Self {
        // IpAddr's Display is already lowercase and canonically compressed for v6.
        Self {
            text: format!("{}/{}", addr, prefix_len),
            addr,
            prefix_len,
        }
    }

    /// The normalized text form.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Returns true for a single-host prefix (`/32` IPv4, `/128` IPv6).
    pub fn is_host(&self) -> bool {
        self.prefix_len == host_prefix_len(&self.addr)
    }

    /// Returns true for `0.0.0.0/0` and `::/0`.
    pub fn is_default_route(&self) -> bool {
        self.prefix_len == 0 && self.addr.is_unspecified()
    }

    /// Returns true when the address is link-local (169.254.0.0/16, fe80::/10).
    pub fn is_link_local(&self) -> bool {
        is_link_local(&self.addr)
    }
}

impl PartialEq for RouteKey {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for RouteKey {}

impl Hash for RouteKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for RouteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RouteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.text.cmp(&other.text)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for RouteKey {
    type Err = RouteCheckError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RouteKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// Returns the host prefix length for the address family.
pub fn host_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => IPV4_HOST_PREFIX_LEN,
        IpAddr::V6(_) => IPV6_HOST_PREFIX_LEN,
    }
}

/// Checks whether an address is link-local for its family.
#[inline]
pub fn is_link_local(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => is_ipv6_link_local(v6),
    }
}

#[inline]
fn is_ipv6_link_local(addr: &Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xffc0) == 0xfe80
}

/// A route as the control plane intends it (APPL_DB `ROUTE_TABLE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntendedRoute {
    pub key: RouteKey,
    /// Egress interface names; more than one for ECMP routes.
    pub ifnames: Vec<String>,
    /// Next-hop addresses; empty for directly connected routes.
    pub nexthops: Vec<IpAddr>,
}

impl IntendedRoute {
    pub fn new(key: RouteKey) -> Self {
        Self {
            key,
            ifnames: Vec::new(),
            nexthops: Vec::new(),
        }
    }

    /// Returns true if no next-hop is given or every next-hop is unspecified.
    pub fn has_unspecified_nexthop(&self) -> bool {
        self.nexthops.iter().all(|nh| nh.is_unspecified())
    }
}

/// Operation observed on the programmed-state change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOp {
    Add,
    Remove,
}

impl fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeOp::Add => f.write_str("ADD"),
            ChangeOp::Remove => f.write_str("REMOVE"),
        }
    }
}

/// One notification from the programmed-state change feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeEvent {
    pub op: ChangeOp,
    pub key: RouteKey,
}

impl ChangeEvent {
    pub fn add(key: RouteKey) -> Self {
        Self {
            op: ChangeOp::Add,
            key,
        }
    }

    pub fn remove(key: RouteKey) -> Self {
        Self {
            op: ChangeOp::Remove,
            key,
        }
    }
}

/// MAC address as stored in the `neigh` field of APPL_DB `NEIGH_TABLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Placeholder MAC written for neighbors only reachable over the standby tunnel.
    pub const ZERO: Self = Self([0; 6]);

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    /// Parse MAC from colon-separated string (e.g., "00:11:22:33:44:55")
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            *byte = u8::from_str_radix(parts.next()?, 16).ok()?;
        }
        if parts.next().is_some() {
            return None;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
