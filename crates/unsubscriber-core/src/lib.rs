//! # unsubscriber-core
//!
//! The unsubscribe dispatch pipeline: every unsubscribe link extracted from a
//! mailbox is visited once, safely, to opt the user out.
//!
//! ## Pipeline
//!
//! Every stage implements the same [`Unsubscriber`] capability, so stages are
//! composed explicitly at startup, each one wrapping the next:
//!
//! ```text
//! ┌─────────────────┐   ┌──────────────────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Deduplicator    │ → │ Dispatcher (N tasks) │ → │ SchemeRouter │ → │ Web / Mailto   │
//! │ (single writer) │   │ handoff + join       │   │ scheme → h   │   │ handler        │
//! └─────────────────┘   └──────────────────────┘   └──────────────┘   └────────────────┘
//!                                                                            │
//!                                                                            ▼
//!                                                                    ┌────────────────┐
//!                                                                    │ HostGuard      │
//!                                                                    │ (prefix trie)  │
//!                                                                    └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use unsubscriber_core::{Deduplicator, Dispatcher, HostGuard, SchemeRouter, Unsubscriber, WebHandler};
//!
//! let guard = Arc::new(HostGuard::from_local_interfaces(true)?);
//! let web: Arc<dyn Unsubscriber> = Arc::new(WebHandler::new(guard, Duration::from_secs(10))?);
//! let router = SchemeRouter::builder()
//!     .route("http", web.clone())
//!     .route("https", web)
//!     .build();
//! let dispatcher = Arc::new(Dispatcher::new(Arc::new(router), 5, tracing::info_span!("dispatch")));
//! let dedup = Deduplicator::new(dispatcher.clone());
//!
//! while let Some(target) = targets.recv().await {
//!     if let Err(e) = dedup.unsubscribe(target).await {
//!         tracing::debug!("{e}");
//!     }
//! }
//! dispatcher.close().await;
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: Security-mode negotiation for mail sessions
//! - [`guard`]: Anti-SSRF host classification
//! - [`handler`]: Scheme handlers performing the outbound action
//! - [`pipeline`]: Deduplication, routing and concurrent dispatch

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod connection;
mod error;
pub mod guard;
pub mod handler;
pub mod pipeline;
mod target;

pub use connection::{
    ConnectionConfig, ConnectionError, Credentials, MailClient, MailStream, Negotiator, Security,
    Stage,
};
pub use error::{DeliveryFailure, UnsubscribeError};
pub use guard::{
    BoxError, Cidr, GuardError, GuardedResolver, HostGuard, RangeTable, Resolver, Safety,
    SystemResolver,
};
pub use handler::{MailSender, MailtoHandler, OutgoingMail, WebHandler};
pub use pipeline::{Deduplicator, Dispatcher, SchemeRouter, SchemeRouterBuilder, Unsubscriber};
pub use target::UnsubscribeTarget;
