//! Submission of unsubscribe messages.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use unsubscriber_core::{BoxError, ConnectionConfig, MailSender, MailStream, Negotiator, OutgoingMail};

use crate::client::Client;
use crate::error::Result;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Sends each message over its own SMTP session.
#[derive(Clone)]
pub struct SmtpSender {
    negotiator: Negotiator,
    config: ConnectionConfig,
}

impl SmtpSender {
    /// Creates a sender submitting through the server in `config`.
    #[must_use]
    pub const fn new(negotiator: Negotiator, config: ConnectionConfig) -> Self {
        Self { negotiator, config }
    }

    /// Runs one complete transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting fails or the server rejects any step.
    pub async fn submit(&self, mail: &OutgoingMail) -> Result<()> {
        let mut client = self
            .negotiator
            .connect::<Client<MailStream>>(&self.config)
            .await?;

        let message = format_message(mail, Utc::now(), &message_id(&mail.from));
        client.mail_from(&mail.from).await?;
        client.rcpt_to(&mail.to).await?;
        client.data(&message).await?;
        tracing::debug!("submitted message to {} via {}", mail.to, self.config.host);

        if let Err(e) = client.quit().await {
            tracing::debug!("QUIT failed: {e}");
        }
        Ok(())
    }
}

#[async_trait]
impl MailSender for SmtpSender {
    async fn send(&self, mail: OutgoingMail) -> std::result::Result<(), BoxError> {
        self.submit(&mail).await.map_err(Into::into)
    }
}

impl std::fmt::Debug for SmtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSender")
            .field("server", &self.config.to_string())
            .finish_non_exhaustive()
    }
}

/// Renders a plain-text RFC 5322 message.
///
/// Header values are stripped of line breaks; a non-ASCII subject is sent as
/// a base64 encoded word.
#[must_use]
pub fn format_message(mail: &OutgoingMail, date: DateTime<Utc>, message_id: &str) -> String {
    format!(
        "From: {}\r\n\
         To: {}\r\n\
         Subject: {}\r\n\
         Date: {}\r\n\
         Message-ID: {message_id}\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Transfer-Encoding: 8bit\r\n\r\n\
         {}",
        single_line(&mail.from),
        single_line(&mail.to),
        encode_header(&single_line(&mail.subject)),
        date.to_rfc2822(),
        mail.body,
    )
}

fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

fn encode_header(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }
    format!("=?utf-8?B?{}?=", STANDARD.encode(text.as_bytes()))
}

/// Generates a unique Message-ID in the sender's domain.
fn message_id(from: &str) -> String {
    let domain = from.rsplit_once('@').map_or("localhost", |(_, domain)| domain);
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!(
        "<{}.{seq}.unsubscriber@{domain}>",
        Utc::now().timestamp_micros()
    )
}
