//! Pipeline stages.
//!
//! Every stage and every handler implements [`Unsubscriber`], so a deployment
//! composes them by wrapping one in another.

mod dedup;
mod dispatcher;
mod router;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{UnsubscribeError, UnsubscribeTarget};

pub use dedup::Deduplicator;
pub use dispatcher::Dispatcher;
pub use router::{SchemeRouter, SchemeRouterBuilder};

/// Something that can act on an unsubscribe target.
#[async_trait]
pub trait Unsubscriber: Send + Sync {
    /// Processes one target.
    ///
    /// # Errors
    ///
    /// Returns an error if the target was rejected or its delivery failed.
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError>;
}

#[async_trait]
impl<T: Unsubscriber + ?Sized> Unsubscriber for Arc<T> {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        (**self).unsubscribe(target).await
    }
}
