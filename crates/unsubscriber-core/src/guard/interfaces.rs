//! Enumeration of the prefixes assigned to the host's network interfaces.

use std::net::{IpAddr, SocketAddrV4, SocketAddrV6};

use nix::ifaddrs::getifaddrs;
use nix::sys::socket::SockaddrStorage;

use super::{Cidr, GuardError};

/// Returns one range per address assigned to a local interface.
///
/// Entries without an address or netmask (e.g. link-layer entries) are
/// skipped.
///
/// # Errors
///
/// Returns an error if the interface list cannot be read.
pub fn local_ranges() -> Result<Vec<Cidr>, GuardError> {
    let mut ranges = Vec::new();
    for ifaddr in getifaddrs().map_err(GuardError::Interfaces)? {
        let (Some(address), Some(netmask)) = (
            ifaddr.address.as_ref().and_then(to_ip),
            ifaddr.netmask.as_ref().and_then(to_ip),
        ) else {
            continue;
        };
        match Cidr::from_netmask(address, netmask) {
            Ok(cidr) => {
                tracing::debug!(interface = %ifaddr.interface_name, %cidr, "local range");
                ranges.push(cidr);
            }
            Err(e) => {
                tracing::debug!(interface = %ifaddr.interface_name, "skipping address: {e}");
            }
        }
    }
    Ok(ranges)
}

fn to_ip(addr: &SockaddrStorage) -> Option<IpAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(IpAddr::V4(*SocketAddrV4::from(*v4).ip()));
    }
    addr.as_sockaddr_in6()
        .map(|v6| IpAddr::V6(*SocketAddrV6::from(*v6).ip()))
}
