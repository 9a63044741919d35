//! CIDR address ranges.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use super::GuardError;

/// A contiguous block of addresses expressed as `network/prefix`.
///
/// Host bits of the network address are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Creates a range from any address inside it and a prefix length.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is longer than the address width.
    pub fn new(addr: IpAddr, prefix: u8) -> Result<Self, GuardError> {
        let width = address_width(addr);
        if prefix > width {
            return Err(GuardError::InvalidCidr(format!(
                "{addr}/{prefix}: prefix longer than {width} bits"
            )));
        }
        let network = match addr {
            IpAddr::V4(v4) => IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask32(prefix))),
            IpAddr::V6(v6) => IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask128(prefix))),
        };
        Ok(Self { network, prefix })
    }

    /// Creates a range from an address and its netmask.
    ///
    /// # Errors
    ///
    /// Returns an error if the families differ or the mask is not contiguous.
    pub fn from_netmask(addr: IpAddr, netmask: IpAddr) -> Result<Self, GuardError> {
        let (bits, width) = match netmask {
            IpAddr::V4(mask) if addr.is_ipv4() => (u128::from(u32::from(mask)) << 96, 32),
            IpAddr::V6(mask) if addr.is_ipv6() => (u128::from(mask), 128),
            _ => {
                return Err(GuardError::InvalidCidr(format!(
                    "{addr}: netmask {netmask} is of another family"
                )));
            }
        };
        let prefix = bits.leading_ones();
        if bits.count_ones() != prefix || prefix > width {
            return Err(GuardError::InvalidCidr(format!(
                "{addr}: netmask {netmask} is not contiguous"
            )));
        }
        // prefix <= 128 always fits
        #[allow(clippy::cast_possible_truncation)]
        Self::new(addr, prefix as u8)
    }

    /// Returns the network address.
    #[must_use]
    pub const fn network(&self) -> IpAddr {
        self.network
    }

    /// Returns the prefix length.
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Returns true if `ip` lies in this range.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip.to_canonical()) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                u32::from(ip) & mask32(self.prefix) == u32::from(net)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                u128::from(ip) & mask128(self.prefix) == u128::from(net)
            }
            _ => false,
        }
    }

    /// Returns the network bits left-aligned in a `u128` along with the
    /// prefix length, the key layout used by the range trie.
    pub(super) fn key(&self) -> (u128, u8) {
        (left_aligned(self.network), self.prefix)
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

impl FromStr for Cidr {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| GuardError::InvalidCidr(format!("{s}: missing prefix length")))?;
        let addr: IpAddr = addr
            .parse()
            .map_err(|e| GuardError::InvalidCidr(format!("{s}: {e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| GuardError::InvalidCidr(format!("{s}: {e}")))?;
        Self::new(addr, prefix)
    }
}

/// Number of bits in an address of this family.
pub(super) const fn address_width(ip: IpAddr) -> u8 {
    match ip {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// Address bits left-aligned in a `u128`.
pub(super) fn left_aligned(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)) << 96,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

const fn mask32(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

const fn mask128(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - prefix)
    }
}
