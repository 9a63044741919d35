//! `mailto:` unsubscribe links.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Span};

use super::require_safe;
use crate::guard::BoxError;
use crate::pipeline::Unsubscriber;
use crate::{DeliveryFailure, HostGuard, UnsubscribeError, UnsubscribeTarget};

/// Subject and body used when the link does not provide one.
const DEFAULT_TEXT: &str = "unsubscribe";

/// A message to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    /// Envelope and header sender.
    pub from: String,
    /// Recipient.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

/// Submits mail.
#[async_trait]
pub trait MailSender: Send + Sync {
    /// Sends one message.
    async fn send(&self, mail: OutgoingMail) -> Result<(), BoxError>;
}

/// Answers `mailto:` links by sending the requested message.
///
/// The recipient domain's mail exchangers must all be non-local.
pub struct MailtoHandler {
    guard: Arc<HostGuard>,
    sender: Arc<dyn MailSender>,
    from: Option<String>,
    span: Span,
}

impl MailtoHandler {
    /// Creates a handler. Without `from`, each target's source address is
    /// used as sender.
    #[must_use]
    pub fn new(guard: Arc<HostGuard>, sender: Arc<dyn MailSender>, from: Option<String>) -> Self {
        Self {
            guard,
            sender,
            from,
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
        let mail = self
            .compose(target)
            .map_err(|failure| UnsubscribeError::delivery(link, failure))?;

        let domain = mail.to.rsplit_once('@').map_or("", |(_, domain)| domain);
        require_safe(domain, self.guard.check_mx(domain).await)?;

        tracing::debug!("mailing {} as {}", mail.to, mail.from);
        self.sender
            .send(mail)
            .await
            .map_err(|e| UnsubscribeError::delivery(link, DeliveryFailure::Mail(e)))
    }

    fn compose(&self, target: &UnsubscribeTarget) -> Result<OutgoingMail, DeliveryFailure> {
        let to = target
            .mailto_address()
            .filter(|to| {
                to.split_once('@')
                    .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
            })
            .ok_or_else(|| DeliveryFailure::InvalidMailto(target.link.to_string()))?;

        let mut subject = None;
        let mut body = None;
        for (key, value) in target.link.query_pairs() {
            match key.to_ascii_lowercase().as_str() {
                "subject" => subject = Some(value.into_owned()),
                "body" => body = Some(value.into_owned()),
                _ => {}
            }
        }

        let from = self
            .from
            .clone()
            .or_else(|| target.source.clone())
            .ok_or(DeliveryFailure::NoSender)?;

        Ok(OutgoingMail {
            from,
            to,
            subject: subject.unwrap_or_else(|| DEFAULT_TEXT.to_string()),
            body: body.unwrap_or_else(|| DEFAULT_TEXT.to_string()),
        })
    }
}

#[async_trait]
impl Unsubscriber for MailtoHandler {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        self.deliver(&target).instrument(self.span.clone()).await
    }
}

impl fmt::Debug for MailtoHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailtoHandler")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use url::Url;

    use super::*;
    use crate::guard::testing::StubResolver;
    use crate::{Cidr, GuardError, RangeTable};

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<OutgoingMail>>,
        fail: bool,
    }

    #[async_trait]
    impl MailSender for Outbox {
        async fn send(&self, mail: OutgoingMail) -> Result<(), BoxError> {
            if self.fail {
                return Err("550 mailbox unavailable".into());
            }
            self.sent.lock().unwrap().push(mail);
            Ok(())
        }
    }

    fn guard() -> Arc<HostGuard> {
        let resolver = StubResolver::default()
            .mx("list.example.com", &["mx.list.example.com"])
            .host("mx.list.example.com", &["93.184.216.34"])
            .mx("corp.example", &["mx.corp.example"])
            .host("mx.corp.example", &["10.0.0.25"]);
        let table: RangeTable = ["10.0.0.0/8".parse::<Cidr>().unwrap()].into_iter().collect();
        Arc::new(HostGuard::new(table, Arc::new(resolver)))
    }

    fn target(link: &str) -> UnsubscribeTarget {
        UnsubscribeTarget::new("News", Url::parse(link).unwrap()).source("me@example.org")
    }

    #[tokio::test]
    async fn test_sends_requested_message() {
        let outbox = Arc::new(Outbox::default());
        let handler = MailtoHandler::new(guard(), outbox.clone(), None);

        handler
            .unsubscribe(target(
                "mailto:leave@list.example.com?subject=Remove%20me&body=please",
            ))
            .await
            .unwrap();

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(
            sent[0],
            OutgoingMail {
                from: "me@example.org".into(),
                to: "leave@list.example.com".into(),
                subject: "Remove me".into(),
                body: "please".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_recipient_is_percent_decoded() {
        let outbox = Arc::new(Outbox::default());
        let handler = MailtoHandler::new(guard(), outbox.clone(), None);

        handler
            .unsubscribe(target("mailto:unsub%2Babc@list.example.com"))
            .await
            .unwrap();
        handler
            .unsubscribe(target("mailto:unsub%40list.example.com"))
            .await
            .unwrap();

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent[0].to, "unsub+abc@list.example.com");
        assert_eq!(sent[1].to, "unsub@list.example.com");
    }

    #[tokio::test]
    async fn test_defaults_and_configured_sender() {
        let outbox = Arc::new(Outbox::default());
        let handler =
            MailtoHandler::new(guard(), outbox.clone(), Some("bot@example.org".into()));

        handler
            .unsubscribe(target("mailto:leave@list.example.com"))
            .await
            .unwrap();

        let sent = outbox.sent.lock().unwrap();
        assert_eq!(sent[0].from, "bot@example.org");
        assert_eq!(sent[0].subject, "unsubscribe");
        assert_eq!(sent[0].body, "unsubscribe");
    }

    #[tokio::test]
    async fn test_local_exchanger_is_unsafe() {
        let outbox = Arc::new(Outbox::default());
        let handler = MailtoHandler::new(guard(), outbox.clone(), None);

        let err = handler
            .unsubscribe(target("mailto:leave@corp.example"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UnsubscribeError::UnsafeTarget {
                reason: GuardError::LocalAddress(_),
                ref host,
            } if host == "corp.example"
        ));
        assert!(outbox.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_domain_is_unsafe() {
        let handler = MailtoHandler::new(guard(), Arc::new(Outbox::default()), None);
        let err = handler
            .unsubscribe(target("mailto:leave@nowhere.example"))
            .await
            .unwrap_err();
        assert!(matches!(err, UnsubscribeError::UnsafeTarget { .. }));
    }

    #[tokio::test]
    async fn test_missing_sender() {
        let handler = MailtoHandler::new(guard(), Arc::new(Outbox::default()), None);
        let link = Url::parse("mailto:leave@list.example.com").unwrap();
        let err = handler
            .unsubscribe(UnsubscribeTarget::new("News", link))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UnsubscribeError::Delivery {
                failure: DeliveryFailure::NoSender,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let handler = MailtoHandler::new(guard(), Arc::new(Outbox::default()), None);
        let err = handler
            .unsubscribe(target("mailto:nobody"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UnsubscribeError::Delivery {
                failure: DeliveryFailure::InvalidMailto(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submission_failure() {
        let outbox = Arc::new(Outbox {
            fail: true,
            ..Outbox::default()
        });
        let handler = MailtoHandler::new(guard(), outbox, None);
        let err = handler
            .unsubscribe(target("mailto:leave@list.example.com"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UnsubscribeError::Delivery {
                failure: DeliveryFailure::Mail(_),
                ..
            }
        ));
    }
}
