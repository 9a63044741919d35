//! # unsubscriber-smtp
//!
//! Minimal SMTP submission client used to answer `mailto:` unsubscribe links.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use unsubscriber_core::{ConnectionConfig, MailtoHandler, Negotiator, Security};
//! use unsubscriber_smtp::SmtpSender;
//!
//! let config = ConnectionConfig::new("smtp.example.com", 465, Security::Ssl)
//!     .credentials("me@example.com", "password");
//! let sender = SmtpSender::new(Negotiator::new()?, config);
//! let mailto = MailtoHandler::new(guard, Arc::new(sender), Some("me@example.com".into()));
//! ```
//!
//! Every message travels over its own session: connect, EHLO, optional
//! STARTTLS and AUTH PLAIN, one transaction, QUIT.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod client;
mod error;
pub mod reply;
mod sender;

pub use client::{CLIENT_NAME, Client};
pub use error::{Error, Result};
pub use reply::{Reply, ReplyCode};
pub use sender::{SmtpSender, format_message};
