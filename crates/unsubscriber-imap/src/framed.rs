//! Line framing for IMAP.
//!
//! Responses are CRLF-terminated lines that may embed literals announced as
//! `{n}` at the end of a line. A response is only complete once every
//! announced literal and the line after it have been read.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

const BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Maximum literal size. Only header fields are ever fetched.
const MAX_LITERAL_SIZE: usize = 16 * 1024 * 1024;

/// Buffered IMAP connection.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    write_buffer: BytesMut,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, stream),
            write_buffer: BytesMut::with_capacity(BUFFER_SIZE),
        }
    }

    /// Reads one complete response, literals included.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure, on EOF, or if a line or literal is
    /// oversized.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut response = Vec::new();
        loop {
            let line = self.read_line().await?;
            tracing::trace!("S: {}", String::from_utf8_lossy(&line).trim_end());
            response.extend_from_slice(&line);

            let Some(length) = parse_literal_length(&line) else {
                break;
            };
            if length > MAX_LITERAL_SIZE {
                return Err(Error::Protocol(format!(
                    "literal too large: {length} bytes (max {MAX_LITERAL_SIZE})"
                )));
            }
            let mut literal = vec![0u8; length];
            self.reader.read_exact(&mut literal).await?;
            response.extend_from_slice(&literal);
        }
        Ok(response)
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed",
                )));
            }

            let read = buf.len();
            let start = line.len();
            line.extend_from_slice(buf);

            // A CR may end one read and its LF start the next.
            let search_from = start.saturating_sub(1);
            if let Some(pos) = find_crlf(&line[search_from..]) {
                let end = search_from + pos + 2;
                self.reader.consume(end - start);
                line.truncate(end);
                return Ok(line);
            }
            self.reader.consume(read);

            if line.len() > MAX_LINE_LENGTH {
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes one command line. `shown` is what the trace log records.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub async fn write_command(&mut self, data: &[u8], shown: &str) -> Result<()> {
        tracing::trace!("C: {shown}");
        self.write_buffer.clear();
        self.write_buffer.extend_from_slice(data);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buffer).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Returns the inner stream.
    ///
    /// Buffered unread data is lost; only call this at a point where the
    /// server has nothing more to send, e.g. right after a STARTTLS reply.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a `{n}` or `{n+}` literal announcement at the end of a line.
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}
