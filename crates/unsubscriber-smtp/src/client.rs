//! SMTP command driver.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use unsubscriber_core::{MailClient, MailStream};

use crate::error::{Error, Result};
use crate::reply::{Reply, ReplyCode, is_last_reply_line, parse_reply};

/// Name announced in EHLO.
pub const CLIENT_NAME: &str = "localhost";

/// An SMTP connection.
pub struct Client<S> {
    stream: BufReader<S>,
    extensions: Vec<String>,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error unless the server greets with 220.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut client = Self::wrap(stream);
        client.read_reply().await?.expect_code(ReplyCode::SERVICE_READY)?;
        Ok(client)
    }

    /// Wraps a stream on which the greeting was already exchanged.
    fn wrap(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            extensions: Vec::new(),
        }
    }

    /// Sends EHLO and records the advertised extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects EHLO.
    pub async fn ehlo(&mut self, name: &str) -> Result<()> {
        let reply = self.command(&format!("EHLO {name}")).await?.expect_success()?;
        self.extensions = reply
            .message
            .iter()
            .skip(1)
            .map(|line| line.to_ascii_uppercase())
            .collect();
        Ok(())
    }

    /// Returns true if the server advertised `extension` in its EHLO reply.
    #[must_use]
    pub fn supports(&self, extension: &str) -> bool {
        self.extensions.iter().any(|line| {
            line.split_whitespace()
                .next()
                .is_some_and(|keyword| keyword.eq_ignore_ascii_case(extension))
        })
    }

    /// Issues STARTTLS and returns the raw stream for the TLS handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the server did not advertise or refused STARTTLS.
    pub async fn starttls(mut self) -> Result<S> {
        if !self.supports("STARTTLS") {
            return Err(Error::NotSupported("STARTTLS".into()));
        }
        self.command("STARTTLS")
            .await?
            .expect_code(ReplyCode::SERVICE_READY)?;
        Ok(self.stream.into_inner())
    }

    /// Authenticates with the PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the credentials.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<()> {
        let credentials = format!("\0{username}\0{password}");
        let encoded = STANDARD.encode(credentials.as_bytes());
        self.command_shown(&format!("AUTH PLAIN {encoded}"), "AUTH PLAIN xxx")
            .await?
            .expect_code(ReplyCode::AUTH_OK)?;
        Ok(())
    }

    /// Starts a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid address or a rejected sender.
    pub async fn mail_from(&mut self, from: &str) -> Result<()> {
        let from = path(from)?;
        self.command(&format!("MAIL FROM:<{from}>"))
            .await?
            .expect_success()?;
        Ok(())
    }

    /// Adds a recipient.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid address or a rejected recipient.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<()> {
        let to = path(to)?;
        self.command(&format!("RCPT TO:<{to}>"))
            .await?
            .expect_success()?;
        Ok(())
    }

    /// Sends the message content and completes the transaction.
    ///
    /// Line endings are normalized to CRLF, lines starting with `.` are
    /// stuffed and the terminating `.` line is added.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses DATA or rejects the message.
    pub async fn data(&mut self, message: &str) -> Result<()> {
        self.command("DATA").await?.expect_code(ReplyCode::START_DATA)?;

        let payload = dot_stuff(message);
        tracing::trace!("C: <{} bytes of message data>", payload.len());
        self.write(&payload).await?;
        self.read_reply().await?.expect_success()?;
        Ok(())
    }

    /// Sends QUIT and closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers with anything but 221 or 2xx.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.command("QUIT").await?;
        if reply.code != ReplyCode::CLOSING {
            reply.expect_success()?;
        }
        Ok(())
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        self.command_shown(line, line).await
    }

    async fn command_shown(&mut self, line: &str, shown: &str) -> Result<Reply> {
        tracing::trace!("C: {shown}");
        self.write(format!("{line}\r\n").as_bytes()).await?;
        self.read_reply().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::Protocol("connection closed".into()));
            }
            let line = line.trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            tracing::trace!("S: {line}");

            let is_last = is_last_reply_line(&line);
            lines.push(line);
            if is_last {
                break;
            }
        }
        parse_reply(&lines)
    }
}

/// Validates an address for use in a MAIL or RCPT path.
fn path(address: &str) -> Result<&str> {
    let address = address.trim();
    let valid = address
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
        && !address
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '<' | '>'));
    if valid {
        Ok(address)
    } else {
        Err(Error::InvalidAddress(address.to_string()))
    }
}

/// Normalizes line endings, stuffs leading dots and appends the end marker.
fn dot_stuff(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + 16);
    for line in message.lines() {
        if line.starts_with('.') {
            out.push(b'.');
        }
        out.extend_from_slice(line.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

#[async_trait]
impl MailClient for Client<MailStream> {
    type Session = Self;
    type Error = Error;

    async fn handshake(stream: MailStream, _host: &str) -> Result<Self> {
        let mut client = Self::from_stream(stream).await?;
        client.ehlo(CLIENT_NAME).await?;
        Ok(client)
    }

    async fn start_tls(self) -> Result<MailStream> {
        self.starttls().await
    }

    async fn resume(stream: MailStream, _host: &str) -> Result<Self> {
        let mut client = Self::wrap(stream);
        client.ehlo(CLIENT_NAME).await?;
        Ok(client)
    }

    async fn login(mut self, login: &str, password: &str) -> Result<Self> {
        self.auth_plain(login, password).await?;
        Ok(self)
    }

    fn anonymous(self) -> Self {
        self
    }
}
