//! Pipeline wiring.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::info_span;
use unsubscriber_core::{
    Deduplicator, Dispatcher, HostGuard, MailtoHandler, Negotiator, SchemeRouter, UnsubscribeTarget,
    Unsubscriber, WebHandler,
};
use unsubscriber_imap::MailReader;
use unsubscriber_smtp::SmtpSender;

use crate::config::Config;

/// Outcome of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Targets handed to a worker.
    pub submitted: usize,
    /// Targets dropped as already processed.
    pub duplicates: usize,
    /// Targets refused before reaching a worker.
    pub refused: usize,
}

/// Scans the configured mailbox and unsubscribes from everything found.
///
/// # Errors
///
/// Returns an error if the guard cannot be built, or the mailbox cannot be
/// reached, authenticated against or opened. Per-target failures are only
/// logged.
pub async fn run(config: &Config) -> anyhow::Result<Summary> {
    let guard = Arc::new(
        HostGuard::from_local_interfaces(config.block_reserved_ranges)
            .context("could not build the local address table")?,
    );
    let negotiator = Negotiator::new().context("could not configure TLS")?;

    let imap = config.imap.connection();
    let mailbox = config.imap.mailbox.as_str();
    let reader = MailReader::connect(&negotiator, &imap, mailbox)
        .await
        .with_context(|| format!("could not open {mailbox:?} on {imap}"))?;

    let router = router(config, &guard, &negotiator)?;
    tracing::debug!("handling schemes {:?}", router.schemes());
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(router),
        config.workers,
        info_span!("dispatch"),
    ));
    let dedup = Deduplicator::new(dispatcher.clone());

    let targets = reader.stream(info_span!("scan", mailbox));
    let summary = drain(&dedup, targets).await;
    dispatcher.close().await;
    Ok(summary)
}

fn router(
    config: &Config,
    guard: &Arc<HostGuard>,
    negotiator: &Negotiator,
) -> anyhow::Result<SchemeRouter> {
    let web: Arc<dyn Unsubscriber> = Arc::new(
        WebHandler::new(Arc::clone(guard), config.http_timeout())
            .context("could not build the HTTP client")?
            .span(info_span!("web")),
    );
    let mut builder = SchemeRouter::builder()
        .route("http", Arc::clone(&web))
        .route("https", web);

    if let Some(smtp) = &config.smtp {
        let sender = SmtpSender::new(negotiator.clone(), smtp.connection());
        let mailto = MailtoHandler::new(Arc::clone(guard), Arc::new(sender), smtp.from.clone())
            .span(info_span!("mailto"));
        builder = builder.route("mailto", Arc::new(mailto));
    } else {
        tracing::info!("no smtp server configured, mailto links are skipped");
    }
    Ok(builder.build())
}

/// Feeds every target into `pipeline` in arrival order until the stream
/// closes.
pub async fn drain(
    pipeline: &dyn Unsubscriber,
    mut targets: mpsc::Receiver<UnsubscribeTarget>,
) -> Summary {
    let mut summary = Summary::default();
    while let Some(target) = targets.recv().await {
        match pipeline.unsubscribe(target).await {
            Ok(()) => summary.submitted += 1,
            Err(e) if e.is_duplicate() => {
                tracing::debug!("{e}");
                summary.duplicates += 1;
            }
            Err(e) => {
                tracing::warn!("{e}");
                summary.refused += 1;
            }
        }
    }
    summary
}
