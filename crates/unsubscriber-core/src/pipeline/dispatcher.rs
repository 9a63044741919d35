//! Fixed-size worker pool with synchronous handoff.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, Level, Span};

use super::Unsubscriber;
use crate::{UnsubscribeError, UnsubscribeTarget};

/// A target plus the acknowledgement sent once a worker has taken it.
type Job = (UnsubscribeTarget, oneshot::Sender<()>);

/// Runs the downstream stage on a pool of worker tasks.
///
/// [`Dispatcher::submit`] returns once a worker has accepted the target, so a
/// caller waits while every worker is busy. Outcomes are logged by the workers
/// and never reported back to the submitter. [`Dispatcher::close`] refuses
/// further submissions and waits until every accepted target is done.
pub struct Dispatcher {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl Dispatcher {
    /// Spawns `workers` tasks (at least one) feeding `inner`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(inner: Arc<dyn Unsubscriber>, workers: usize, span: Span) -> Self {
        let size = workers.max(1);
        let (sender, receiver) = mpsc::channel::<Job>(1);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..size)
            .map(|id| {
                let receiver = Arc::clone(&receiver);
                let inner = Arc::clone(&inner);
                let span = tracing::debug_span!(parent: &span, "worker", id);
                tokio::spawn(work(receiver, inner).instrument(span))
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            size,
        }
    }

    /// Returns the number of workers.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns true once [`Dispatcher::close`] was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Hands `target` to a worker, waiting until one accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`UnsubscribeError::DispatcherClosed`] after [`Dispatcher::close`].
    pub async fn submit(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(UnsubscribeError::DispatcherClosed)?;

        let (ack, accepted) = oneshot::channel();
        sender
            .send((target, ack))
            .await
            .map_err(|_| UnsubscribeError::DispatcherClosed)?;
        accepted
            .await
            .map_err(|_| UnsubscribeError::DispatcherClosed)
    }

    /// Stops accepting targets and waits for every worker to finish.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let handles =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("worker stopped abnormally: {e}");
            }
        }
        tracing::debug!("dispatcher closed");
    }
}

async fn work(receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>, inner: Arc<dyn Unsubscriber>) {
    tracing::debug!("started");
    loop {
        let job = receiver.lock().await.recv().await;
        let Some((target, ack)) = job else {
            break;
        };
        // The submitter may have given up waiting; the job is ours either way.
        let _ = ack.send(());

        let label = target.to_string();
        match inner.unsubscribe(target).await {
            Ok(()) => tracing::info!("unsubscribed: {label}"),
            Err(e) => log_failure(&label, &e),
        }
    }
    tracing::debug!("stopped");
}

fn log_failure(label: &str, err: &UnsubscribeError) {
    let level = err.level();
    if level == Level::WARN {
        tracing::warn!("{label}: {err}");
    } else if level == Level::DEBUG {
        tracing::debug!("{label}: {err}");
    } else {
        tracing::info!("{label}: {err}");
    }
}

#[async_trait]
impl Unsubscriber for Dispatcher {
    async fn unsubscribe(&self, target: UnsubscribeTarget) -> Result<(), UnsubscribeError> {
        self.submit(target).await
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("size", &self.size)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
