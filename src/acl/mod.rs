//! Network access control for signing requests
//!
//! Each root may carry a whitelist of address ranges. The peer address of
//! the TCP connection is the only input; nothing in the request body can
//! influence the decision. Loopback gets no special treatment.

use std::fmt;
use std::net::IpAddr;

use crate::types::{CaError, Result};

/// One address range, stored with host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Network {
    addr: IpAddr,
    prefix: u8,
}

impl Network {
    fn parse(entry: &str) -> Result<Self> {
        let (addr_str, prefix_str) = match entry.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (entry, None),
        };
        let addr = addr_str
            .parse::<IpAddr>()
            .map_err(|e| CaError::Config(format!("invalid ACL address '{}': {}", entry, e)))?;
        let max = width(&addr);
        let prefix = match prefix_str {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| {
                    CaError::Config(format!("invalid prefix length in ACL range '{}'", entry))
                })?,
            None => max,
        };
        Ok(Self {
            addr: truncate(addr, prefix),
            prefix,
        })
    }

    fn contains(&self, addr: IpAddr) -> bool {
        match (self.addr, addr) {
            (IpAddr::V4(_), IpAddr::V4(_)) | (IpAddr::V6(_), IpAddr::V6(_)) => {
                truncate(addr, self.prefix) == self.addr
            }
            _ => false,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

fn width(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Clear every bit after the first `prefix` bits
fn truncate(addr: IpAddr, prefix: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V4((u32::from(v4) & mask).into())
        }
        IpAddr::V6(v6) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            IpAddr::V6((u128::from(v6) & mask).into())
        }
    }
}

/// Whitelist of network ranges permitted to request certificates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessControl {
    networks: Vec<Network>,
}

impl AccessControl {
    /// Build from configured entries. Bare addresses become host routes.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let networks = entries
            .iter()
            .map(|entry| Network::parse(entry.as_ref().trim()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { networks })
    }

    /// Whether `addr` falls within at least one configured range.
    ///
    /// An empty whitelist denies everything.
    pub fn check(&self, addr: IpAddr) -> bool {
        let addr = canonical(addr);
        self.networks.iter().any(|net| net.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.networks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

impl fmt::Display for AccessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nets: Vec<String> = self.networks.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", nets.join(", "))
    }
}

/// Unwrap IPv4-mapped IPv6 addresses so dual-stack listeners match IPv4 ranges
fn canonical(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

/// Decide whether a caller may use a root that may or may not have a whitelist.
///
/// Roots without a whitelist accept every address.
pub fn is_permitted(acl: Option<&AccessControl>, addr: IpAddr) -> bool {
    match acl {
        Some(acl) => acl.check(addr),
        None => true,
    }
}
