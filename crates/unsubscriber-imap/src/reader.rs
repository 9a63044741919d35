//! Mailbox scanning.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{Instrument, Span};
use unsubscriber_core::{ConnectionConfig, MailStream, Negotiator, UnsubscribeTarget};
use url::Url;

use crate::client::{Client, FetchedHeaders};
use crate::header::{Headers, decode_rfc2047, first_address, unsubscribe_links};
use crate::Result;

/// Capacity of the target channel.
pub const CHANNEL_CAPACITY: usize = 5;

/// Number of UIDs fetched per command.
pub const FETCH_BATCH: usize = 100;

/// Reads unsubscribe targets from one selected mailbox.
///
/// Construction selects the mailbox and searches it; both failures are fatal
/// to the caller. [`MailReader::stream`] then fetches in the background.
pub struct MailReader<S> {
    client: Client<S>,
    mailbox: String,
    uids: Vec<u32>,
}

impl MailReader<MailStream> {
    /// Connects with `negotiator` and opens `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection, login, select or search fails.
    pub async fn connect(
        negotiator: &Negotiator,
        config: &ConnectionConfig,
        mailbox: &str,
    ) -> Result<Self> {
        let client = negotiator.connect::<Client<MailStream>>(config).await?;
        Self::open(client, mailbox).await
    }
}

impl<S> MailReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Selects `mailbox` on an authenticated client and searches it.
    ///
    /// # Errors
    ///
    /// Returns an error if select or search fails.
    pub async fn open(mut client: Client<S>, mailbox: &str) -> Result<Self> {
        let exists = client.select(mailbox).await?;
        tracing::debug!("selected {mailbox:?} ({exists} messages)");
        let uids = client.search_unsubscribable().await?;
        tracing::info!(
            "{} messages in {mailbox:?} carry a List-Unsubscribe header",
            uids.len()
        );
        Ok(Self {
            client,
            mailbox: mailbox.to_string(),
            uids,
        })
    }

    /// Returns the number of candidate messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.uids.len()
    }

    /// Returns true if no message carries an unsubscribe header.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    /// Starts fetching and returns the target stream.
    ///
    /// The stream closes once every candidate was fetched, a fetch failed or
    /// the receiver was dropped. The session is logged out afterwards.
    #[must_use]
    pub fn stream(self, span: Span) -> mpsc::Receiver<UnsubscribeTarget> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(self.scan(tx).instrument(span));
        rx
    }

    async fn scan(mut self, tx: mpsc::Sender<UnsubscribeTarget>) {
        let uids = std::mem::take(&mut self.uids);
        'batches: for batch in uids.chunks(FETCH_BATCH) {
            let fetched = match self.client.fetch_headers(batch).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    tracing::warn!("fetching from {:?} failed: {e}", self.mailbox);
                    break;
                }
            };
            for message in &fetched {
                for target in targets(message) {
                    if tx.send(target).await.is_err() {
                        tracing::debug!("target stream dropped");
                        break 'batches;
                    }
                }
            }
        }
        drop(tx);

        if let Err(e) = self.client.logout().await {
            tracing::debug!("logout failed: {e}");
        }
        tracing::debug!("scan finished");
    }
}

/// Builds one target per unsubscribe link of a fetched message.
///
/// Unparsable links are skipped.
#[must_use]
pub fn targets(message: &FetchedHeaders) -> Vec<UnsubscribeTarget> {
    let headers = Headers::parse(&String::from_utf8_lossy(&message.raw));
    let subject = headers.get("Subject").map(decode).unwrap_or_default();
    let source = headers
        .get("To")
        .map(decode)
        .and_then(|to| first_address(&to));
    let message_id = headers.get("Message-ID").map(str::to_string);
    let one_click = headers
        .get_all("List-Unsubscribe-Post")
        .iter()
        .any(|value| value.eq_ignore_ascii_case("List-Unsubscribe=One-Click"));

    let mut targets = Vec::new();
    for value in headers.get_all("List-Unsubscribe") {
        for link in unsubscribe_links(value) {
            let link = match Url::parse(&link) {
                Ok(link) => link,
                Err(e) => {
                    tracing::debug!(uid = message.uid, "skipping link {link:?}: {e}");
                    continue;
                }
            };
            let is_web = matches!(link.scheme(), "http" | "https");
            let mut target =
                UnsubscribeTarget::new(subject.clone(), link).one_click(one_click && is_web);
            if let Some(source) = &source {
                target = target.source(source.clone());
            }
            if let Some(id) = &message_id {
                target = target.message_id(id.clone());
            }
            targets.push(target);
        }
    }
    if targets.is_empty() {
        tracing::debug!(uid = message.uid, "no usable unsubscribe link");
    }
    targets
}

/// Decodes a header value, keeping it raw when it cannot be decoded.
fn decode(value: &str) -> String {
    decode_rfc2047(value).unwrap_or_else(|e| {
        tracing::debug!("keeping raw header value: {e}");
        value.to_string()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn message(raw: &str) -> FetchedHeaders {
        FetchedHeaders {
            uid: 1,
            raw: raw.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_targets_from_headers() {
        let targets = targets(&message(
            "To: =?utf-8?q?J=C3=B6rg?= <jorg@example.com>\r\n\
             Subject: =?UTF-8?B?TmV3c2xldHRlcg==?=\r\n\
             Message-ID: <abc@list.example.com>\r\n\
             List-Unsubscribe: <mailto:leave@list.example.com?subject=stop>,\r\n <https://list.example.com/u/1>\r\n\
             List-Unsubscribe-Post: List-Unsubscribe=One-Click\r\n\r\n",
        ));
        assert_eq!(targets.len(), 2);

        let mail = &targets[0];
        assert_eq!(mail.scheme(), "mailto");
        assert_eq!(mail.subject, "Newsletter");
        assert_eq!(mail.source.as_deref(), Some("jorg@example.com"));
        assert_eq!(mail.message_id.as_deref(), Some("<abc@list.example.com>"));
        assert!(!mail.one_click);

        let web = &targets[1];
        assert_eq!(web.link.as_str(), "https://list.example.com/u/1");
        assert!(web.one_click);
    }

    #[test]
    fn test_bad_links_are_skipped() {
        let targets = targets(&message(
            "Subject: hi\r\nList-Unsubscribe: <not a url>, <https://ok.example/u>\r\n\r\n",
        ));
        assert_eq!(targets.len(), 1);
        assert!(targets[0].source.is_none());
    }

    #[test]
    fn test_undecodable_subject_is_kept_raw() {
        let targets = targets(&message(
            "Subject: =?x-unknown?B?SGk=?=\r\nList-Unsubscribe: <https://ok.example/u>\r\n\r\n",
        ));
        assert_eq!(targets[0].subject, "=?x-unknown?B?SGk=?=");
    }

    #[test]
    fn test_no_header_no_target() {
        assert!(targets(&message("Subject: hi\r\n\r\n")).is_empty());
    }
}
