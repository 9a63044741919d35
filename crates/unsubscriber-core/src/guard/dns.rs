//! Guarded name resolution for the HTTP client.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use super::{BoxError, HostGuard};

/// Resolves connection addresses through the [`HostGuard`].
///
/// Installed with [`reqwest::ClientBuilder::dns_resolver`], it makes the
/// client connect only to addresses the guard classified in the same lookup.
/// A name with any local address fails to resolve.
#[derive(Clone)]
pub struct GuardedResolver {
    guard: Arc<HostGuard>,
}

impl GuardedResolver {
    /// Creates a resolver classifying through `guard`.
    #[must_use]
    pub const fn new(guard: Arc<HostGuard>) -> Self {
        Self { guard }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let guard = Arc::clone(&self.guard);
        Box::pin(async move {
            let ips = guard.resolve_safe(name.as_str()).await?;
            // the connector fills in the port of the request
            let addrs: Addrs = Box::new(ips.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok::<_, BoxError>(addrs)
        })
    }
}

impl fmt::Debug for GuardedResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedResolver")
            .field("guard", &self.guard)
            .finish()
    }
}
