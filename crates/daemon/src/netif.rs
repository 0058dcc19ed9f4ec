// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local network interface inventory.
//!
//! Rebuilt at most once per TTL from the OS interface list. Used to map
//! loopback and server addresses to display names and to find the listener
//! port serving each subnet.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// One interface address entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetIf {
    pub name: String,
    pub address: IpAddr,
    pub netmask: IpAddr,
    pub broadcast: Option<IpAddr>,
    /// Display hostname: "localhost" for loopback, the server name for the
    /// server address, the literal address otherwise
    pub hostname: String,
    /// False for loopback and point-to-point interfaces
    pub is_local: bool,
    /// Port of the listener whose bound address falls in this subnet
    pub port: Option<u16>,
}

/// The interface list plus its refresh bookkeeping.
pub struct NetIfList {
    interfaces: Vec<NetIf>,
    ttl: Duration,
    refreshed: Option<Instant>,
}

impl NetIfList {
    pub fn new(ttl: Duration) -> Self {
        Self { interfaces: Vec::new(), ttl, refreshed: None }
    }

    pub fn interfaces(&self) -> &[NetIf] {
        &self.interfaces
    }

    pub fn find(&self, name: &str) -> Option<&NetIf> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    /// Refresh from the OS if the TTL has lapsed. Returns true when the
    /// list was rebuilt.
    pub fn update(
        &mut self,
        now: Instant,
        server_name: &str,
        server_addrs: &[IpAddr],
        listeners: &[SocketAddr],
    ) -> bool {
        if let Some(last) = self.refreshed {
            if now - last < self.ttl {
                return false;
            }
        }
        self.refreshed = Some(now);
        self.interfaces = enumerate(server_name, server_addrs, listeners);
        true
    }
}

fn enumerate(
    server_name: &str,
    server_addrs: &[IpAddr],
    listeners: &[SocketAddr],
) -> Vec<NetIf> {
    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "interface enumeration failed");
            return Vec::new();
        }
    };

    let mut out = Vec::new();
    for ifaddr in addrs {
        let Some(address) = ifaddr.address.as_ref().and_then(to_ip) else {
            continue;
        };
        let Some(netmask) = ifaddr.netmask.as_ref().and_then(to_ip) else {
            continue;
        };
        let broadcast = ifaddr.broadcast.as_ref().and_then(to_ip);

        let flags = ifaddr.flags;
        let loopback = flags.contains(nix::net::if_::InterfaceFlags::IFF_LOOPBACK);
        let p2p = flags.contains(nix::net::if_::InterfaceFlags::IFF_POINTOPOINT);

        let hostname = if loopback {
            "localhost".to_string()
        } else if server_addrs.contains(&address) {
            server_name.to_string()
        } else {
            address.to_string()
        };

        let port = listeners
            .iter()
            .find(|l| l.ip().is_unspecified() || in_subnet(l.ip(), address, netmask))
            .map(SocketAddr::port);

        out.push(NetIf {
            name: ifaddr.interface_name.clone(),
            address,
            netmask,
            broadcast,
            hostname,
            is_local: !loopback && !p2p,
            port,
        });
    }
    out
}

fn to_ip(addr: &nix::sys::socket::SockaddrStorage) -> Option<IpAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(IpAddr::V4(Ipv4Addr::from(v4.ip())));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        return Some(IpAddr::V6(v6.ip()));
    }
    None
}

/// Whether `candidate` falls inside `address`/`mask`'s subnet.
pub fn in_subnet(candidate: IpAddr, address: IpAddr, mask: IpAddr) -> bool {
    match (candidate, address, mask) {
        (IpAddr::V4(c), IpAddr::V4(a), IpAddr::V4(m)) => {
            let (c, a, m) = (u32::from(c), u32::from(a), u32::from(m));
            c & m == a & m
        }
        (IpAddr::V6(c), IpAddr::V6(a), IpAddr::V6(m)) => {
            let (c, a, m) =
                (u128::from(c), u128::from(a), u128::from(m));
            c & m == a & m
        }
        _ => false,
    }
}

#[cfg(test)]
#[path = "netif_tests.rs"]
mod tests;
