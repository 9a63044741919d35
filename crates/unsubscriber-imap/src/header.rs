//! Message header parsing and decoding.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::{Error, Result};

/// Header fields of one message, keyed by lowercased name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Parses a raw header block, unfolding continuation lines.
    ///
    /// Lines without a colon are ignored; parsing stops at the first empty
    /// line.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut headers = Self::default();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = current.take() {
                headers.add(&name, value);
            }
            if let Some((name, value)) = line.split_once(':') {
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }
        if let Some((name, value)) = current {
            headers.add(&name, value);
        }
        headers
    }

    fn add(&mut self, name: &str, value: String) {
        self.fields
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.trim().to_string());
    }

    /// Gets the first value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Gets every value of a field, in order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.fields
            .get(&name.to_ascii_lowercase())
            .map(|values| values.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Returns true if no field was parsed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decodes RFC 2047 encoded words (`=?charset?B|Q?text?=`) in a header value.
///
/// Whitespace between adjacent encoded words is dropped. UTF-8, US-ASCII and
/// ISO-8859-1 are understood.
///
/// # Errors
///
/// Returns an error for malformed words, unknown encodings or charsets.
pub fn decode_rfc2047(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut after_word = false;

    while let Some(start) = rest.find("=?") {
        let (plain, candidate) = rest.split_at(start);
        let Some((word, consumed)) = split_encoded_word(candidate) else {
            out.push_str(plain);
            out.push_str("=?");
            rest = &candidate[2..];
            after_word = false;
            continue;
        };

        if !(after_word && plain.trim().is_empty()) {
            out.push_str(plain);
        }
        out.push_str(&decode_word(word)?);
        rest = &candidate[consumed..];
        after_word = true;
    }
    out.push_str(rest);
    Ok(out)
}

/// Splits `=?charset?enc?text?=` off the front; returns the inner part and the
/// number of bytes consumed.
fn split_encoded_word(s: &str) -> Option<(&str, usize)> {
    let inner = s.strip_prefix("=?")?;
    let mut marks = inner.match_indices('?').map(|(i, _)| i);
    let first = marks.next()?;
    let second = marks.next()?;
    if second != first + 2 {
        return None;
    }
    let end = inner[second + 1..].find("?=")? + second + 1;
    Some((&inner[..end], end + 4))
}

fn decode_word(word: &str) -> Result<String> {
    let mut parts = word.splitn(3, '?');
    let (Some(charset), Some(encoding), Some(payload)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::Decode(word.to_string()));
    };
    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => STANDARD
            .decode(payload)
            .map_err(|_| Error::Decode(word.to_string()))?,
        "Q" | "q" => decode_q(payload).ok_or_else(|| Error::Decode(word.to_string()))?,
        _ => return Err(Error::Decode(word.to_string())),
    };

    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" => {
            String::from_utf8(bytes).map_err(|_| Error::Decode(word.to_string()))
        }
        "iso-8859-1" | "latin1" => Ok(bytes.into_iter().map(char::from).collect()),
        _ => Err(Error::Decode(word.to_string())),
    }
}

/// Decodes the Q encoding: `_` is a space, `=XX` a hex byte.
fn decode_q(payload: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut bytes = payload.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'_' => out.push(b' '),
            b'=' => {
                let hi = char::from(bytes.next()?).to_digit(16)?;
                let lo = char::from(bytes.next()?).to_digit(16)?;
                out.push(u8::try_from(hi * 16 + lo).ok()?);
            }
            _ => out.push(b),
        }
    }
    Some(out)
}

/// Returns the first mailbox address in an address-list header value.
#[must_use]
pub fn first_address(value: &str) -> Option<String> {
    let value = value.trim();
    let address = match (value.find('<'), value.find('>')) {
        (Some(open), Some(close)) if open < close => &value[open + 1..close],
        _ => value.split(',').next().unwrap_or_default(),
    };
    let address = address.trim();
    address.contains('@').then(|| address.to_string())
}

/// Extracts every `<...>` entry of a `List-Unsubscribe` value.
#[must_use]
pub fn unsubscribe_links(value: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = value;
    while let Some(open) = rest.find('<') {
        let Some(len) = rest[open + 1..].find('>') else {
            break;
        };
        let inner = &rest[open + 1..open + 1 + len];
        // "<a <b>" keeps only the innermost entry
        let inner = inner.rsplit('<').next().unwrap_or(inner);
        let link: String = inner
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        if !link.is_empty() {
            links.push(link);
        }
        rest = &rest[open + 1 + len + 1..];
    }
    links
}
