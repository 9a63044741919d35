//! Routing by link scheme.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::Unsubscriber;
use crate::{UnsubscribeError, UnsubscribeTarget};

/// Hands each target to the handler registered for its link scheme.
pub struct SchemeRouter {
    routes: HashMap<String, Arc<dyn Unsubscriber>>,
}

impl SchemeRouter {
    /// Returns a builder.
    #[must_use]
    pub fn builder() -> SchemeRouterBuilder {
        SchemeRouterBuilder::default()
    }

    /// Returns true if a handler is registered for `scheme`.
    #[must_use]
    pub fn supports(&self, scheme: &str) -> bool {
        self.routes.contains_key(&scheme.to_ascii_lowercase())
    }

    /// Returns the registered schemes, sorted.
    #[must_use]
    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        schemes.sort_unstable();
        schemes
    }
}

#[async_trait]
impl Unsubscriber for SchemeRouter {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        let Some(handler) = self.routes.get(target.scheme()) else {
            return Err(UnsubscribeError::UnsupportedScheme {
                scheme: target.scheme().to_string(),
            });
        };
        handler.unsubscribe(target).await
    }
}

impl fmt::Debug for SchemeRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRouter")
            .field("schemes", &self.schemes())
            .finish()
    }
}

/// Builder for [`SchemeRouter`].
#[derive(Default)]
pub struct SchemeRouterBuilder {
    routes: HashMap<String, Arc<dyn Unsubscriber>>,
}

impl SchemeRouterBuilder {
    /// Registers `handler` for `scheme`, replacing any earlier registration.
    #[must_use]
    pub fn route(mut self, scheme: &str, handler: Arc<dyn Unsubscriber>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), handler);
        self
    }

    /// Builds the router.
    #[must_use]
    pub fn build(self) -> SchemeRouter {
        SchemeRouter {
            routes: self.routes,
        }
    }
}

impl fmt::Debug for SchemeRouterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRouterBuilder")
            .field("schemes", &self.routes.len())
            .finish()
    }
}
