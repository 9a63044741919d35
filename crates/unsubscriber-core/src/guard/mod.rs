//! Anti-SSRF host classification.
//!
//! Unsubscribe links are untrusted input. Before any outbound action the
//! handlers ask the [`HostGuard`] whether the destination resolves to an
//! address local to this machine. The guard fails closed: a resolution
//! failure is reported as an error, and callers treat both an error and an
//! [`Safety::Unsafe`] verdict as "do not proceed".

mod cidr;
mod dns;
mod interfaces;
mod reserved;
mod resolver;
mod table;

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use url::{Host, Url};

pub use self::cidr::Cidr;
pub use self::dns::GuardedResolver;
pub use self::interfaces::local_ranges;
pub use self::reserved::reserved_ranges;
pub use self::resolver::{BoxError, Resolver, SystemResolver};
pub use self::table::RangeTable;

/// Errors raised while classifying a destination.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The host could not be resolved.
    #[error("could not resolve {host:?}: {source}")]
    Resolve {
        /// The name being resolved.
        host: String,
        /// Resolver error.
        #[source]
        source: BoxError,
    },

    /// The host resolved to no address at all.
    #[error("{0:?} resolved to no address")]
    NoAddresses(String),

    /// The destination resolved to a local address.
    #[error("{0} is a local address")]
    LocalAddress(IpAddr),

    /// The link carries no host.
    #[error("link has no host")]
    MissingHost,

    /// A range could not be built.
    #[error("invalid range: {0}")]
    InvalidCidr(String),

    /// The network interfaces could not be listed.
    #[error("could not list network interfaces: {0}")]
    Interfaces(#[source] nix::Error),

    /// The system resolver could not be configured.
    #[error("could not configure resolver: {0}")]
    ResolverInit(#[source] BoxError),
}

/// Verdict of a safety check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Safety {
    /// No resolved address is local.
    Safe,
    /// This resolved address is local.
    Unsafe(IpAddr),
}

impl Safety {
    /// Returns true for [`Safety::Safe`].
    #[must_use]
    pub const fn is_safe(self) -> bool {
        matches!(self, Self::Safe)
    }

    /// Turns an unsafe verdict into [`GuardError::LocalAddress`].
    ///
    /// # Errors
    ///
    /// Returns an error for [`Safety::Unsafe`].
    pub fn into_result(self) -> Result<(), GuardError> {
        match self {
            Self::Safe => Ok(()),
            Self::Unsafe(ip) => Err(GuardError::LocalAddress(ip)),
        }
    }
}

impl fmt::Display for Safety {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => f.write_str("safe"),
            Self::Unsafe(ip) => write!(f, "unsafe ({ip})"),
        }
    }
}

/// Classifies destinations against a read-only table of local ranges.
pub struct HostGuard {
    table: RangeTable,
    resolver: Arc<dyn Resolver>,
}

impl HostGuard {
    /// Creates a guard over an already-built table.
    #[must_use]
    pub fn new(table: RangeTable, resolver: Arc<dyn Resolver>) -> Self {
        Self { table, resolver }
    }

    /// Creates a guard blocking every prefix assigned to a local interface,
    /// plus the reserved ranges when `block_reserved` is set, resolving names
    /// through the system resolver.
    ///
    /// # Errors
    ///
    /// Returns an error if the interfaces or resolver configuration cannot be
    /// read.
    pub fn from_local_interfaces(block_reserved: bool) -> Result<Self, GuardError> {
        let mut table: RangeTable = local_ranges()?.into_iter().collect();
        if block_reserved {
            table.extend(reserved_ranges());
        }
        for cidr in table.iter() {
            tracing::info!("do not send mail/requests to {cidr}");
        }
        let resolver = SystemResolver::from_system_conf()?;
        Ok(Self::new(table, Arc::new(resolver)))
    }

    /// Returns the range table.
    #[must_use]
    pub const fn table(&self) -> &RangeTable {
        &self.table
    }

    /// Classifies a single address.
    #[must_use]
    pub fn check_ip(&self, ip: IpAddr) -> Safety {
        let safety = if self.table.contains(ip) {
            Safety::Unsafe(ip)
        } else {
            Safety::Safe
        };
        tracing::debug!("checked {ip}: {safety}");
        safety
    }

    /// Resolves `host` and classifies every address, stopping at the first
    /// unsafe one.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails or yields no address.
    pub async fn check_host(&self, host: &str) -> Result<Safety, GuardError> {
        let ips = self.lookup(host).await?;
        tracing::debug!("checking host {host:?}: {ips:?}");
        Ok(ips
            .into_iter()
            .map(|ip| self.check_ip(ip))
            .find(|safety| !safety.is_safe())
            .unwrap_or(Safety::Safe))
    }

    /// Resolves `host` and returns its addresses only if none is local.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution fails, yields no address, or yields a
    /// local address.
    pub async fn resolve_safe(&self, host: &str) -> Result<Vec<IpAddr>, GuardError> {
        let ips = self.lookup(host).await?;
        if let Some(&ip) = ips.iter().find(|ip| self.table.contains(**ip)) {
            tracing::warn!("refusing to connect to {host:?}: {ip} is local");
            return Err(GuardError::LocalAddress(ip));
        }
        Ok(ips)
    }

    async fn lookup(&self, host: &str) -> Result<Vec<IpAddr>, GuardError> {
        let ips = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|source| GuardError::Resolve {
                host: host.to_string(),
                source,
            })?;
        if ips.is_empty() {
            return Err(GuardError::NoAddresses(host.to_string()));
        }
        Ok(ips)
    }

    /// Resolves the mail exchangers of `domain` and checks each of them.
    ///
    /// # Errors
    ///
    /// Returns an error if any resolution fails or no exchanger exists.
    pub async fn check_mx(&self, domain: &str) -> Result<Safety, GuardError> {
        let exchangers =
            self.resolver
                .lookup_mx(domain)
                .await
                .map_err(|source| GuardError::Resolve {
                    host: domain.to_string(),
                    source,
                })?;
        if exchangers.is_empty() {
            return Err(GuardError::NoAddresses(domain.to_string()));
        }
        for exchanger in &exchangers {
            let safety = self.check_host(exchanger).await?;
            if !safety.is_safe() {
                return Ok(safety);
            }
        }
        Ok(Safety::Safe)
    }

    /// Classifies the host of a URL. Literal addresses are checked without
    /// resolution.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no host or the name cannot be resolved.
    pub async fn check_url(&self, url: &Url) -> Result<Safety, GuardError> {
        match url.host() {
            Some(Host::Ipv4(ip)) => Ok(self.check_ip(IpAddr::V4(ip))),
            Some(Host::Ipv6(ip)) => Ok(self.check_ip(IpAddr::V6(ip))),
            Some(Host::Domain(domain)) => self.check_host(domain).await,
            None => Err(GuardError::MissingHost),
        }
    }
}

impl fmt::Debug for HostGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostGuard")
            .field("ranges", &self.table.len())
            .finish_non_exhaustive()
    }
}
