//! Name resolution used by the host guard.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;

use super::GuardError;

/// Boxed error returned by resolvers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resolves host names and mail exchangers.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolves `host` to all of its addresses.
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, BoxError>;

    /// Resolves the mail exchanger host names of `domain`.
    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, BoxError>;
}

/// Resolver backed by the system DNS configuration.
#[derive(Clone)]
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Creates a resolver from `/etc/resolv.conf` (or the platform equivalent).
    ///
    /// # Errors
    ///
    /// Returns an error if the system configuration cannot be read.
    pub fn from_system_conf() -> Result<Self, GuardError> {
        let inner = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| GuardError::ResolverInit(Box::new(e)))?;
        Ok(Self { inner })
    }
}

impl fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl Resolver for SystemResolver {
    async fn lookup_ip(&self, host: &str) -> Result<Vec<IpAddr>, BoxError> {
        let lookup = self.inner.lookup_ip(host).await?;
        Ok(lookup.iter().collect())
    }

    async fn lookup_mx(&self, domain: &str) -> Result<Vec<String>, BoxError> {
        let lookup = self.inner.mx_lookup(domain).await?;
        Ok(lookup
            .iter()
            .map(|mx| mx.exchange().to_utf8().trim_end_matches('.').to_string())
            .collect())
    }
}
