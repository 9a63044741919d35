//! Mail server connections.
//!
//! [`Negotiator`] opens a TCP connection, secures it according to the
//! configured [`Security`] mode and authenticates, driving any protocol that
//! implements [`MailClient`].

mod config;
mod negotiator;
mod stream;

pub use config::{ConnectionConfig, Credentials, Security};
pub use negotiator::{ConnectionError, MailClient, Negotiator, Stage};
pub use stream::{MailStream, create_tls_connector};
