//! Minimal IMAP command driver.
//!
//! Only the commands needed to scan one mailbox are implemented:
//! `STARTTLS`, `LOGIN`, `SELECT`, `UID SEARCH`, `UID FETCH` and `LOGOUT`.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use unsubscriber_core::{MailClient, MailStream};

use crate::framed::FramedStream;
use crate::{Error, Result};

/// Header fields fetched for every candidate message.
pub const FETCH_FIELDS: &str = "TO SUBJECT MESSAGE-ID LIST-UNSUBSCRIBE LIST-UNSUBSCRIBE-POST";

/// Raw header block of one fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedHeaders {
    /// Message UID.
    pub uid: u32,
    /// Header block as sent by the server.
    pub raw: Vec<u8>,
}

/// An IMAP connection.
pub struct Client<S> {
    stream: FramedStream<S>,
    tag: u32,
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the server says BYE or the greeting is malformed.
    pub async fn from_stream(stream: S) -> Result<Self> {
        let mut stream = FramedStream::new(stream);
        let greeting = stream.read_response().await?;
        let text = String::from_utf8_lossy(&greeting);
        let text = text.trim_end();
        if let Some(reason) = text.strip_prefix("* BYE") {
            return Err(Error::Bye(reason.trim().to_string()));
        }
        if !text.starts_with("* OK") && !text.starts_with("* PREAUTH") {
            return Err(Error::Protocol(format!("unexpected greeting: {text}")));
        }
        Ok(Self::from_framed(stream))
    }

    const fn from_framed(stream: FramedStream<S>) -> Self {
        Self { stream, tag: 0 }
    }

    fn next_tag(&mut self) -> String {
        self.tag = self.tag.wrapping_add(1);
        format!("A{:04}", self.tag)
    }

    /// Runs one command and returns the untagged responses.
    async fn command(&mut self, command: &str, shown: &str) -> Result<Vec<Vec<u8>>> {
        let tag = self.next_tag();
        let line = format!("{tag} {command}\r\n");
        self.stream
            .write_command(line.as_bytes(), &format!("{tag} {shown}"))
            .await?;

        let mut untagged = Vec::new();
        loop {
            let response = self.stream.read_response().await?;
            let Some(status) = response
                .strip_prefix(tag.as_bytes())
                .and_then(|rest| rest.strip_prefix(b" "))
            else {
                if response.starts_with(b"* BYE") && command != "LOGOUT" {
                    let text = String::from_utf8_lossy(&response[5..]).trim().to_string();
                    return Err(Error::Bye(text));
                }
                untagged.push(response);
                continue;
            };
            let status = String::from_utf8_lossy(status).trim_end().to_string();
            let (word, text) = status.split_once(' ').unwrap_or((status.as_str(), ""));
            return match word.to_ascii_uppercase().as_str() {
                "OK" => Ok(untagged),
                "NO" => Err(Error::No(text.to_string())),
                "BAD" => Err(Error::Bad(text.to_string())),
                _ => Err(Error::Protocol(format!("unexpected status: {status}"))),
            };
        }
    }

    /// Issues `STARTTLS` and returns the raw stream for the TLS handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the server refuses.
    pub async fn starttls(mut self) -> Result<S> {
        self.command("STARTTLS", "STARTTLS").await?;
        Ok(self.stream.into_inner())
    }

    /// Logs in with `LOGIN`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials are rejected.
    pub async fn login(&mut self, user: &str, password: &str) -> Result<()> {
        let command = format!("LOGIN {} {}", quote(user)?, quote(password)?);
        let shown = format!("LOGIN {} \"xxx\"", quote(user)?);
        self.command(&command, &shown).await?;
        Ok(())
    }

    /// Selects `mailbox` and returns its message count.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be selected.
    pub async fn select(&mut self, mailbox: &str) -> Result<u32> {
        let command = format!("SELECT {}", quote(mailbox)?);
        let responses = self.command(&command, &command).await?;
        Ok(responses
            .iter()
            .filter_map(|r| {
                let text = std::str::from_utf8(r).ok()?;
                let count = text.strip_prefix("* ")?.strip_suffix(" EXISTS\r\n")?;
                count.parse().ok()
            })
            .last()
            .unwrap_or(0))
    }

    /// Returns the UIDs of undeleted messages carrying a `List-Unsubscribe`
    /// header.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    pub async fn search_unsubscribable(&mut self) -> Result<Vec<u32>> {
        let command = "UID SEARCH NOT DELETED HEADER List-Unsubscribe \"\"";
        let responses = self.command(command, command).await?;
        let mut uids = Vec::new();
        for response in &responses {
            let text = String::from_utf8_lossy(response);
            let Some(numbers) = text.trim_end().strip_prefix("* SEARCH") else {
                continue;
            };
            for number in numbers.split_ascii_whitespace() {
                let uid = number
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad UID in SEARCH: {number:?}")))?;
                uids.push(uid);
            }
        }
        Ok(uids)
    }

    /// Fetches the unsubscribe-related header fields of `uids` without
    /// marking the messages as seen.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails.
    pub async fn fetch_headers(&mut self, uids: &[u32]) -> Result<Vec<FetchedHeaders>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let set = uids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let command = format!("UID FETCH {set} (UID BODY.PEEK[HEADER.FIELDS ({FETCH_FIELDS})])");
        let responses = self.command(&command, &command).await?;
        Ok(responses
            .iter()
            .filter_map(|response| parse_fetch(response))
            .collect())
    }

    /// Sends `LOGOUT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not acknowledge.
    pub async fn logout(mut self) -> Result<()> {
        match self.command("LOGOUT", "LOGOUT").await {
            Ok(_) | Err(Error::Bye(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Quotes a string argument.
fn quote(s: &str) -> Result<String> {
    if s.contains(['\r', '\n']) {
        return Err(Error::Protocol("argument contains a line break".to_string()));
    }
    Ok(format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")))
}

/// Extracts UID and header literal from a `* n FETCH (...)` response.
fn parse_fetch(response: &[u8]) -> Option<FetchedHeaders> {
    let head_end = response.windows(2).position(|w| w == b"\r\n")?;
    let head = std::str::from_utf8(&response[..head_end]).ok()?;
    let rest = head.strip_prefix("* ")?;
    let (_, items) = rest.split_once(" FETCH ")?;

    let (raw, trailer) = match items.rfind('{') {
        Some(open) if items.ends_with('}') => {
            let length: usize = items[open + 1..items.len() - 1].parse().ok()?;
            let start = head_end + 2;
            let raw = response.get(start..start + length)?.to_vec();
            let trailer = String::from_utf8_lossy(&response[start + length..]).to_string();
            (raw, trailer)
        }
        _ => (Vec::new(), String::new()),
    };

    let uid = find_uid(items).or_else(|| find_uid(&trailer))?;
    Some(FetchedHeaders { uid, raw })
}

fn find_uid(text: &str) -> Option<u32> {
    let mut words = text
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|w| !w.is_empty());
    while let Some(word) = words.next() {
        if word.eq_ignore_ascii_case("UID") {
            return words.next()?.parse().ok();
        }
    }
    None
}

#[async_trait]
impl MailClient for Client<MailStream> {
    type Session = Self;
    type Error = Error;

    async fn handshake(stream: MailStream, _host: &str) -> Result<Self> {
        Self::from_stream(stream).await
    }

    async fn start_tls(self) -> Result<MailStream> {
        self.starttls().await
    }

    async fn resume(stream: MailStream, _host: &str) -> Result<Self> {
        Ok(Self::from_framed(FramedStream::new(stream)))
    }

    async fn login(mut self, login: &str, password: &str) -> Result<Self> {
        Self::login(&mut self, login, password).await?;
        Ok(self)
    }

    fn anonymous(self) -> Self {
        self
    }
}
