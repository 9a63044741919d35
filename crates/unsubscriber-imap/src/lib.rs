//! # unsubscriber-imap
//!
//! Scans an IMAP mailbox for messages carrying a `List-Unsubscribe` header
//! and streams one [`UnsubscribeTarget`](unsubscriber_core::UnsubscribeTarget)
//! per advertised link.
//!
//! ## Quick Start
//!
//! ```ignore
//! use unsubscriber_core::{ConnectionConfig, Negotiator, Security};
//! use unsubscriber_imap::MailReader;
//!
//! let config = ConnectionConfig::new("imap.example.com", 993, Security::Ssl)
//!     .credentials("me@example.com", "password");
//! let reader = MailReader::connect(&Negotiator::new()?, &config, "INBOX").await?;
//! let mut targets = reader.stream(tracing::info_span!("imap"));
//! while let Some(target) = targets.recv().await {
//!     println!("{target}");
//! }
//! ```
//!
//! Messages are fetched with `BODY.PEEK`, so scanning never marks anything
//! as seen.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
mod error;
mod framed;
pub mod header;
mod reader;

pub use client::{Client, FetchedHeaders};
pub use error::{Error, Result};
pub use reader::{CHANNEL_CAPACITY, FETCH_BATCH, MailReader, targets};
