//! Target host lists: literal addresses and CIDR blocks.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;

use log::debug;

use crate::error::ConnectError;

/// Widest CIDR block a host list may expand; a `/16` is 65534 hosts.
pub const MIN_CIDR_PREFIX: u8 = 16;

/// One entry of a host list before expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Host(Ipv4Addr),
    Cidr { addr: Ipv4Addr, prefix: u8 },
}

impl Target {
    /// Expands the entry into individual host addresses.
    ///
    /// Network and broadcast addresses are excluded, except for `/31` and
    /// `/32` blocks where every address is a usable host.
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        match *self {
            Target::Host(addr) => vec![addr],
            Target::Cidr { addr, prefix } => {
                let (network, broadcast) = cidr_range(addr, prefix);
                let (first, last) = if prefix >= 31 {
                    (network, broadcast)
                } else {
                    (network + 1, broadcast - 1)
                };
                (first..=last).map(Ipv4Addr::from).collect()
            }
        }
    }
}

fn cidr_range(ip: Ipv4Addr, prefix: u8) -> (u32, u32) {
    let ip_u32 = u32::from(ip);
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    let network = ip_u32 & mask;
    (network, network | !mask)
}

/// Parses `a.b.c.d` or `a.b.c.d/nn`, with `nn` between [`MIN_CIDR_PREFIX`]
/// and 32.
pub fn parse_target(entry: &str) -> Result<Target, ConnectError> {
    let entry = entry.trim();
    let invalid = || ConnectError::InvalidHost(entry.to_string());
    match entry.split_once('/') {
        Some((ip, prefix)) => {
            let addr = ip.trim().parse::<Ipv4Addr>().map_err(|_| invalid())?;
            let prefix = prefix.trim().parse::<u8>().map_err(|_| invalid())?;
            if !(MIN_CIDR_PREFIX..=32).contains(&prefix) {
                return Err(invalid());
            }
            Ok(Target::Cidr { addr, prefix })
        }
        None => entry.parse::<Ipv4Addr>().map(Target::Host).map_err(|_| invalid()),
    }
}

/// Parses a host list: one entry per line, first CSV column, `#` comments.
///
/// A first line that does not parse is treated as a CSV header. The result
/// keeps the first occurrence of every address in source order.
pub fn parse_host_list(text: &str) -> Result<Vec<Ipv4Addr>, ConnectError> {
    let mut seen = HashSet::new();
    let mut hosts = Vec::new();

    let entries = text
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .map(|line| line.split([',', ';']).next().unwrap_or_default().trim())
        .filter(|entry| !entry.is_empty())
        .enumerate();

    for (idx, entry) in entries {
        let target = match parse_target(entry) {
            Ok(target) => target,
            Err(_) if idx == 0 && !starts_with_address(entry) => {
                debug!("Skipping host list header '{}'", entry);
                continue;
            }
            Err(err) => return Err(err),
        };
        for host in target.hosts() {
            if seen.insert(host) {
                hosts.push(host);
            }
        }
    }

    Ok(hosts)
}

fn starts_with_address(entry: &str) -> bool {
    entry
        .split('/')
        .next()
        .is_some_and(|ip| ip.trim().parse::<Ipv4Addr>().is_ok())
}

/// Reads and parses a host list file.
pub async fn load_host_list(path: impl AsRef<Path>) -> Result<Vec<Ipv4Addr>, ConnectError> {
    let text = tokio::fs::read_to_string(path).await?;
    parse_host_list(&text)
}
