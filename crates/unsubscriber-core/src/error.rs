//! Error types for per-target pipeline failures.

use thiserror::Error;
use tracing::Level;

use crate::guard::GuardError;

/// Errors produced while processing a single unsubscribe target.
///
/// All of these are recoverable: the target is skipped and the pipeline
/// carries on.
#[derive(Debug, Error)]
pub enum UnsubscribeError {
    /// The target's identity key was already processed.
    #[error("{key:?}: already processed")]
    Duplicate {
        /// The identity key that was seen before.
        key: String,
    },

    /// No handler is registered for the link scheme.
    #[error("scheme {scheme:?} is not supported")]
    UnsupportedScheme {
        /// The unmatched scheme.
        scheme: String,
    },

    /// The host-safety guard refused the target.
    #[error("unsafe target {host:?}: {reason}")]
    UnsafeTarget {
        /// Host (or mail domain) that was checked.
        host: String,
        /// Why it was refused.
        reason: GuardError,
    },

    /// The outbound action failed.
    #[error("{link}: {failure}")]
    Delivery {
        /// The link being delivered.
        link: String,
        /// What went wrong.
        failure: DeliveryFailure,
    },

    /// The dispatcher no longer accepts submissions.
    #[error("dispatcher is closed")]
    DispatcherClosed,
}

/// Reason a delivery failed.
#[derive(Debug, Error)]
pub enum DeliveryFailure {
    /// The server answered with a non-success status.
    #[error("server answered {0}")]
    Status(reqwest::StatusCode),

    /// The request could not be completed.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Too many redirects were returned.
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    /// A redirect carried no usable `Location`.
    #[error("invalid redirect: {0}")]
    InvalidRedirect(String),

    /// The link has no host to contact.
    #[error("link has no host")]
    MissingHost,

    /// The mailto link could not be turned into a message.
    #[error("invalid mailto link: {0}")]
    InvalidMailto(String),

    /// No sender address is available for a mailto unsubscription.
    #[error("no sender address configured and the message has no recipient")]
    NoSender,

    /// The mail submission failed.
    #[error("mail submission failed: {0}")]
    Mail(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl UnsubscribeError {
    pub(crate) fn delivery(link: impl Into<String>, failure: impl Into<DeliveryFailure>) -> Self {
        Self::Delivery {
            link: link.into(),
            failure: failure.into(),
        }
    }

    /// Returns true for the expected, already-processed rejection.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// Returns the severity at which this error should be logged.
    #[must_use]
    pub const fn level(&self) -> Level {
        match self {
            Self::Duplicate { .. } => Level::DEBUG,
            Self::UnsafeTarget { .. } => Level::WARN,
            Self::UnsupportedScheme { .. } | Self::Delivery { .. } | Self::DispatcherClosed => {
                Level::INFO
            }
        }
    }
}
