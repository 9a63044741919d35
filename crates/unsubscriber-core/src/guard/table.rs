//! Prefix trie of CIDR ranges.
//!
//! Membership is decided by walking at most `prefix length` bits, so a lookup
//! costs O(32) for IPv4 and O(128) for IPv6 regardless of how many ranges are
//! stored. The table is insertion-only; once built it is only read, so it can
//! be shared between any number of tasks without locking.

use std::net::IpAddr;

use super::cidr::{Cidr, address_width, left_aligned};

/// Set of CIDR ranges with longest-prefix style membership lookup.
#[derive(Debug, Clone, Default)]
pub struct RangeTable {
    v4: Trie,
    v6: Trie,
    ranges: Vec<Cidr>,
}

impl RangeTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a range. Inserting the same range twice is a no-op.
    pub fn insert(&mut self, cidr: Cidr) {
        if self.ranges.contains(&cidr) {
            return;
        }
        let (bits, prefix) = cidr.key();
        match cidr.network() {
            IpAddr::V4(_) => self.v4.insert(bits, prefix),
            IpAddr::V6(_) => self.v6.insert(bits, prefix),
        }
        self.ranges.push(cidr);
    }

    /// Returns true if `ip` lies in any inserted range.
    ///
    /// IPv4-mapped IPv6 addresses are looked up as IPv4.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        let trie = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        };
        trie.contains(left_aligned(ip), address_width(ip))
    }

    /// Returns the number of distinct ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Returns true if no range was inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterates over the inserted ranges in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Cidr> {
        self.ranges.iter()
    }
}

impl Extend<Cidr> for RangeTable {
    fn extend<I: IntoIterator<Item = Cidr>>(&mut self, iter: I) {
        for cidr in iter {
            self.insert(cidr);
        }
    }
}

impl FromIterator<Cidr> for RangeTable {
    fn from_iter<I: IntoIterator<Item = Cidr>>(iter: I) -> Self {
        let mut table = Self::new();
        table.extend(iter);
        table
    }
}

/// Binary trie over left-aligned address bits. Node 0 is the root.
#[derive(Debug, Clone)]
struct Trie {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    children: [Option<usize>; 2],
    /// A range ends at this node.
    terminal: bool,
}

impl Default for Trie {
    fn default() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }
}

impl Trie {
    fn insert(&mut self, bits: u128, prefix: u8) {
        let mut node = 0;
        for depth in 0..prefix {
            let bit = bit_at(bits, depth);
            node = if let Some(child) = self.nodes[node].children[bit] {
                child
            } else {
                let child = self.nodes.len();
                self.nodes.push(Node::default());
                self.nodes[node].children[bit] = Some(child);
                child
            };
        }
        self.nodes[node].terminal = true;
    }

    fn contains(&self, bits: u128, width: u8) -> bool {
        let mut node = 0;
        for depth in 0..=width {
            if self.nodes[node].terminal {
                return true;
            }
            if depth == width {
                break;
            }
            match self.nodes[node].children[bit_at(bits, depth)] {
                Some(child) => node = child,
                None => return false,
            }
        }
        false
    }
}

const fn bit_at(bits: u128, depth: u8) -> usize {
    ((bits >> (127 - depth)) & 1) as usize
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use proptest::prelude::*;

    use super::*;

    fn table(ranges: &[&str]) -> RangeTable {
        ranges.iter().map(|r| r.parse::<Cidr>().unwrap()).collect()
    }

    #[test]
    fn test_empty_table_contains_nothing() {
        let t = RangeTable::new();
        assert!(t.is_empty());
        assert!(!t.contains("127.0.0.1".parse().unwrap()));
        assert!(!t.contains("::1".parse().unwrap()));
    }

    #[test]
    fn test_membership() {
        let t = table(&["10.0.0.0/8", "192.168.1.0/24", "127.0.0.1/32", "fe80::/10"]);
        assert_eq!(t.len(), 4);
        assert!(t.contains("10.20.30.40".parse().unwrap()));
        assert!(t.contains("192.168.1.254".parse().unwrap()));
        assert!(!t.contains("192.168.2.1".parse().unwrap()));
        assert!(t.contains("127.0.0.1".parse().unwrap()));
        assert!(!t.contains("127.0.0.2".parse().unwrap()));
        assert!(t.contains("fe80::1".parse().unwrap()));
        assert!(!t.contains("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_families_are_separate() {
        let t = table(&["0.0.0.0/0"]);
        assert!(t.contains("8.8.8.8".parse().unwrap()));
        assert!(!t.contains("2001:4860::8888".parse().unwrap()));
    }

    #[test]
    fn test_mapped_ipv4_uses_ipv4_trie() {
        let t = table(&["10.0.0.0/8"]);
        assert!(t.contains("::ffff:10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_duplicate_insert_is_noop() {
        let mut t = table(&["10.0.0.0/8"]);
        t.insert("10.1.2.3/8".parse().unwrap());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_nested_ranges() {
        let t = table(&["10.1.0.0/16", "10.0.0.0/8"]);
        assert!(t.contains("10.1.2.3".parse().unwrap()));
        assert!(t.contains("10.2.2.3".parse().unwrap()));
        assert!(!t.contains("11.1.2.3".parse().unwrap()));
    }

    proptest! {
        #[test]
        fn prop_ipv4_member_of_inserted_range(addr: u32, prefix in 0u8..=32, host: u32) {
            let cidr = Cidr::new(IpAddr::V4(Ipv4Addr::from(addr)), prefix).unwrap();
            let t: RangeTable = std::iter::once(cidr).collect();
            let net = match cidr.network() { IpAddr::V4(v4) => u32::from(v4), IpAddr::V6(_) => unreachable!() };
            let host_mask = if prefix == 0 { u32::MAX } else { u32::MAX.checked_shr(u32::from(prefix)).unwrap_or(0) };
            let inside = IpAddr::V4(Ipv4Addr::from(net | (host & host_mask)));
            prop_assert!(t.contains(inside));
        }

        #[test]
        fn prop_ipv4_outside_all_ranges(addr: u32, prefix in 1u8..=32, candidate: u32) {
            let cidr = Cidr::new(IpAddr::V4(Ipv4Addr::from(addr)), prefix).unwrap();
            let t: RangeTable = std::iter::once(cidr).collect();
            let candidate = IpAddr::V4(Ipv4Addr::from(candidate));
            prop_assert_eq!(t.contains(candidate), cidr.contains(candidate));
        }

        #[test]
        fn prop_ipv6_matches_linear_scan(
            ranges in proptest::collection::vec((any::<u128>(), 0u8..=128), 0..8),
            candidate: u128,
        ) {
            let cidrs: Vec<Cidr> = ranges
                .into_iter()
                .map(|(a, p)| Cidr::new(IpAddr::V6(Ipv6Addr::from(a)), p).unwrap())
                .collect();
            let t: RangeTable = cidrs.iter().copied().collect();
            let candidate = IpAddr::V6(Ipv6Addr::from(candidate));
            prop_assert_eq!(t.contains(candidate), cidrs.iter().any(|c| c.contains(candidate)));
        }
    }
}
