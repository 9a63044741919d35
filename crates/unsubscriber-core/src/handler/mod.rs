//! Scheme handlers performing the outbound unsubscribe action.
//!
//! Each handler consults the [`HostGuard`](crate::HostGuard) before touching
//! the network and refuses the target when the guard does not answer
//! [`Safety::Safe`].

mod mailto;
mod web;

use crate::UnsubscribeError;
use crate::guard::{GuardError, Safety};

pub use mailto::{MailSender, MailtoHandler, OutgoingMail};
pub use web::{MAX_REDIRECTS, WebHandler};

/// Turns a guard verdict into the pipeline error for `host`.
fn require_safe(host: &str, verdict: Result<Safety, GuardError>) -> Result<(), UnsubscribeError> {
    verdict
        .and_then(Safety::into_result)
        .map_err(|reason| UnsubscribeError::UnsafeTarget {
            host: host.to_string(),
            reason,
        })
}
