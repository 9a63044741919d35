//! Address ranges that are never a legitimate unsubscribe destination.

use super::Cidr;

/// Loopback, private, link-local, shared, multicast and otherwise reserved
/// blocks, independent of the host's own interface configuration.
const RESERVED: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "::/128",
    "::1/128",
    "2001:db8::/32",
    "fc00::/7",
    "fe80::/10",
    "ff00::/8",
];

/// Returns the reserved ranges.
pub fn reserved_ranges() -> impl Iterator<Item = Cidr> {
    RESERVED.iter().filter_map(|range| range.parse().ok())
}
