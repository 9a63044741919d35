//! Logging setup.

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Joins the base level, the configured directives and `RUST_LOG` into one
/// filter. Later directives win.
fn directives(level: Level, logs: Option<&str>, env: Option<&str>) -> String {
    let mut parts = vec![level.to_string().to_ascii_lowercase()];
    parts.extend(
        [logs, env]
            .into_iter()
            .flatten()
            .flat_map(|d| d.split(','))
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
    );
    parts.join(",")
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if a directive does not parse.
pub fn init(level: Level, logs: Option<&str>, color: bool) -> anyhow::Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::try_new(directives(level, logs, env.as_deref()))
        .context("invalid log directives")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(color))
        .try_init()
        .context("logging already initialized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(directives(Level::WARN, None, None), "warn");
        assert_eq!(
            directives(
                Level::INFO,
                Some("unsubscriber_core=debug, unsubscriber_imap=trace"),
                Some("hyper=off")
            ),
            "info,unsubscriber_core=debug,unsubscriber_imap=trace,hyper=off"
        );
        assert_eq!(directives(Level::ERROR, Some(" , "), Some("")), "error");
    }

    #[test]
    fn test_directives_parse() {
        assert!(EnvFilter::try_new(directives(Level::DEBUG, Some("a=info"), None)).is_ok());
        assert!(EnvFilter::try_new(directives(Level::DEBUG, Some("a=loud"), None)).is_err());
    }
}
