//! The unit of work flowing through the pipeline.

use std::fmt;

use percent_encoding::percent_decode_str;
use url::Url;

/// One unsubscribe link extracted from one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeTarget {
    /// Recipient address of the source message (the subscribed address).
    pub source: Option<String>,
    /// Decoded subject of the source message.
    pub subject: String,
    /// The unsubscribe link.
    pub link: Url,
    /// `Message-ID` of the source message, if any.
    pub message_id: Option<String>,
    /// The message advertised RFC 8058 one-click unsubscription.
    pub one_click: bool,
}

impl UnsubscribeTarget {
    /// Creates a target with no source address, message id or one-click flag.
    #[must_use]
    pub fn new(subject: impl Into<String>, link: Url) -> Self {
        Self {
            source: None,
            subject: subject.into(),
            link,
            message_id: None,
            one_click: false,
        }
    }

    /// Sets the source address.
    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the message id.
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Marks the target as RFC 8058 one-click capable.
    #[must_use]
    pub const fn one_click(mut self, one_click: bool) -> Self {
        self.one_click = one_click;
        self
    }

    /// Returns the link scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.link.scheme()
    }

    /// Returns the percent-decoded address list of a `mailto:` link.
    fn mailto_path(&self) -> Option<String> {
        (self.link.scheme() == "mailto")
            .then(|| percent_decode_str(self.link.path()).decode_utf8_lossy().into_owned())
    }

    /// Returns the first recipient of a `mailto:` link, percent-decoded.
    #[must_use]
    pub fn mailto_address(&self) -> Option<String> {
        let encoded = self.link.path().split(',').next().unwrap_or_default();
        let address = percent_decode_str(encoded).decode_utf8_lossy();
        let address = address.trim();
        (self.link.scheme() == "mailto" && !address.is_empty()).then(|| address.to_string())
    }

    /// Returns the identity key used for deduplication.
    ///
    /// Network links are identified by their host; `mailto:` links by the
    /// decoded, lowercased address, ignoring any query. Links with neither
    /// fall back to the whole link text.
    #[must_use]
    pub fn identity_key(&self) -> String {
        if let Some(path) = self.mailto_path() {
            return path.to_lowercase();
        }
        self.link
            .host_str()
            .map_or_else(|| self.link.as_str().to_string(), str::to_ascii_lowercase)
    }
}

impl fmt::Display for UnsubscribeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.link, self.subject)
    }
}
