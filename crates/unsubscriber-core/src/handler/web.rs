//! HTTP(S) unsubscribe links.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{StatusCode, redirect};
use tracing::{Instrument, Span};
use url::Url;

use super::require_safe;
use crate::pipeline::Unsubscriber;
use crate::{DeliveryFailure, GuardedResolver, HostGuard, UnsubscribeError, UnsubscribeTarget};

/// Maximum number of redirects followed for one link.
pub const MAX_REDIRECTS: usize = 5;

/// Form body of an RFC 8058 one-click unsubscription.
const ONE_CLICK_BODY: &str = "List-Unsubscribe=One-Click";

/// Visits web unsubscribe links.
///
/// Every hop, including each redirect target, is checked by the guard before
/// it is requested. Only a 2xx answer counts as success; nothing is retried.
pub struct WebHandler {
    guard: Arc<HostGuard>,
    client: reqwest::Client,
    span: Span,
}

impl WebHandler {
    /// Creates a handler whose requests time out after `timeout`.
    ///
    /// The client resolves through a [`GuardedResolver`], so a name that
    /// changes its answer after the guard check still cannot reach a local
    /// address.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(guard: Arc<HostGuard>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .dns_resolver(Arc::new(GuardedResolver::new(Arc::clone(&guard))))
            .user_agent(concat!("unsubscriber/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(guard, client))
    }

    /// Creates a handler on a preconfigured client.
    ///
    /// The client must not follow redirects itself, or hops would bypass the
    /// guard. It should resolve through a [`GuardedResolver`].
    #[must_use]
    pub fn with_client(guard: Arc<HostGuard>, client: reqwest::Client) -> Self {
        Self {
            guard,
            client,
            span: Span::none(),
        }
    }

    /// Sets the span deliveries are recorded under.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    async fn deliver(&self, target: &UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        let link = target.link.as_str();
        let mut url = target.link.clone();
        let mut one_click = target.one_click;

        for _ in 0..=MAX_REDIRECTS {
            let host = url.host_str().unwrap_or_default();
            require_safe(host, self.guard.check_url(&url).await)?;

            tracing::debug!(one_click, "requesting {url}");
            let response = self
                .request(&url, one_click)
                .send()
                .await
                .map_err(|e| UnsubscribeError::delivery(link, e))?;
            let status = response.status();

            if status.is_redirection() {
                let next = next_hop(&url, &response)
                    .map_err(|failure| UnsubscribeError::delivery(link, failure))?;
                tracing::debug!("{url} redirects to {next}");
                one_click &= matches!(
                    status,
                    StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
                );
                url = next;
                continue;
            }
            if status.is_success() {
                return Ok(());
            }
            return Err(UnsubscribeError::delivery(link, DeliveryFailure::Status(status)));
        }
        Err(UnsubscribeError::delivery(
            link,
            DeliveryFailure::TooManyRedirects(MAX_REDIRECTS),
        ))
    }

    fn request(&self, url: &Url, one_click: bool) -> reqwest::RequestBuilder {
        if one_click {
            self.client
                .post(url.clone())
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(ONE_CLICK_BODY)
        } else {
            self.client.get(url.clone())
        }
    }
}

/// Resolves the `Location` of a redirect against the current URL.
fn next_hop(current: &Url, response: &reqwest::Response) -> Result<Url, DeliveryFailure> {
    let location = response
        .headers()
        .get(LOCATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| DeliveryFailure::InvalidRedirect("missing Location".to_string()))?;
    let next = current
        .join(location)
        .map_err(|e| DeliveryFailure::InvalidRedirect(format!("{location:?}: {e}")))?;
    if !matches!(next.scheme(), "http" | "https") {
        return Err(DeliveryFailure::InvalidRedirect(format!(
            "{next}: unsupported scheme"
        )));
    }
    Ok(next)
}

#[async_trait]
impl Unsubscriber for WebHandler {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        self.deliver(&target).instrument(self.span.clone()).await
    }
}

impl fmt::Debug for WebHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebHandler")
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}
