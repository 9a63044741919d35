//! Rejection of targets whose identity was already processed.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::Unsubscriber;
use crate::{UnsubscribeError, UnsubscribeTarget};

/// Forwards each identity key at most once.
///
/// Keys are derived by [`UnsubscribeTarget::identity_key`]. The set of seen
/// keys only grows. The stage is meant to be driven by a single producer;
/// the lock only guards against misuse.
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
    inner: Arc<dyn Unsubscriber>,
}

impl Deduplicator {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Unsubscriber>) -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
            inner,
        }
    }

    /// Returns the number of distinct keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing was seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record(&self, key: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string())
    }
}

#[async_trait]
impl Unsubscriber for Deduplicator {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        let key = target.identity_key();
        if !self.record(&key) {
            return Err(UnsubscribeError::Duplicate { key });
        }
        self.inner.unsubscribe(target).await
    }
}

impl fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("seen", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use url::Url;

    use super::*;
    use crate::pipeline::testing::Recorder;

    fn target(link: &str) -> UnsubscribeTarget {
        UnsubscribeTarget::new("News", Url::parse(link).unwrap())
    }

    #[tokio::test]
    async fn test_second_occurrence_is_rejected() {
        let recorder = Arc::new(Recorder::default());
        let dedup = Deduplicator::new(recorder.clone());

        dedup
            .unsubscribe(target("https://list.example.com/u?a=1"))
            .await
            .unwrap();
        let err = dedup
            .unsubscribe(target("https://list.example.com/u?a=2"))
            .await
            .unwrap_err();

        assert!(err.is_duplicate());
        assert_eq!(recorder.links(), vec!["https://list.example.com/u?a=1"]);
        assert_eq!(dedup.len(), 1);
    }

    #[tokio::test]
    async fn test_either_order_forwards_one() {
        for (first, second) in [
            ("mailto:stop@list.example.com", "mailto:STOP@list.example.com?subject=x"),
            ("mailto:STOP@list.example.com?subject=x", "mailto:stop@list.example.com"),
        ] {
            let recorder = Arc::new(Recorder::default());
            let dedup = Deduplicator::new(recorder.clone());
            assert!(dedup.unsubscribe(target(first)).await.is_ok());
            assert!(dedup.unsubscribe(target(second)).await.unwrap_err().is_duplicate());
            assert_eq!(recorder.links(), vec![first.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_distinct_keys_pass() {
        let recorder = Arc::new(Recorder::default());
        let dedup = Deduplicator::new(recorder.clone());
        dedup.unsubscribe(target("https://a.example/u")).await.unwrap();
        dedup.unsubscribe(target("https://b.example/u")).await.unwrap();
        dedup.unsubscribe(target("mailto:a.example@x.example")).await.unwrap();
        assert_eq!(recorder.links().len(), 3);
    }

    #[tokio::test]
    async fn test_key_is_kept_when_delivery_fails() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let dedup = Deduplicator::new(recorder.clone());
        assert!(!dedup
            .unsubscribe(target("https://a.example/u"))
            .await
            .unwrap_err()
            .is_duplicate());
        assert!(dedup
            .unsubscribe(target("https://a.example/u"))
            .await
            .unwrap_err()
            .is_duplicate());
        assert_eq!(recorder.links().len(), 1);
    }
}
