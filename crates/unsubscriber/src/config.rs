//! JSON configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use unsubscriber_core::{ConnectionConfig, Security};

/// Default configuration file.
pub const DEFAULT_PATH: &str = "./unsubscriber.json";

/// Top-level configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Mailbox to scan.
    pub imap: ImapConfig,
    /// Submission server for `mailto:` links; without it they are skipped.
    pub smtp: Option<SmtpConfig>,
    /// Extra `EnvFilter` directives, e.g. `unsubscriber_core=debug`.
    pub logs: Option<String>,
    /// Number of concurrent deliveries.
    pub workers: usize,
    /// Per-request HTTP timeout.
    pub http_timeout_secs: u64,
    /// Block the reserved address ranges in addition to local interfaces.
    pub block_reserved_ranges: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            imap: ImapConfig::default(),
            smtp: None,
            logs: None,
            workers: 5,
            http_timeout_secs: 10,
            block_reserved_ranges: true,
        }
    }
}

impl Config {
    /// Loads the configuration at `path`.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or a required
    /// value is missing.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)
                .with_context(|| format!("invalid configuration in {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("could not read {}", path.display()));
            }
        };
        config
            .validate()
            .with_context(|| format!("incomplete configuration ({})", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.imap.host.trim().is_empty() {
            bail!("imap.host is not set");
        }
        if let Some(smtp) = &self.smtp
            && smtp.host.trim().is_empty()
        {
            bail!("smtp.host is not set");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be positive");
        }
        Ok(())
    }

    /// Returns the HTTP request timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// IMAP account.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImapConfig {
    /// Server name.
    pub host: String,
    /// Port; derived from `security` when absent.
    pub port: Option<u16>,
    /// Security mode.
    pub security: Security,
    /// Login name; empty means no login.
    pub login: String,
    /// Password.
    pub password: String,
    /// Mailbox to scan.
    pub mailbox: String,
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            security: Security::default(),
            login: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
        }
    }
}

impl ImapConfig {
    /// Builds the connection settings.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        let port = self
            .port
            .unwrap_or_else(|| self.security.default_imap_port());
        with_login(
            ConnectionConfig::new(&self.host, port, self.security),
            &self.login,
            &self.password,
        )
    }
}

/// SMTP submission account.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmtpConfig {
    /// Server name.
    pub host: String,
    /// Port; derived from `security` when absent.
    pub port: Option<u16>,
    /// Security mode.
    pub security: Security,
    /// Login name; empty means no login.
    pub login: String,
    /// Password.
    pub password: String,
    /// Sender address; defaults to the recipient of each scanned message.
    pub from: Option<String>,
}

impl SmtpConfig {
    /// Builds the connection settings.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        let port = self
            .port
            .unwrap_or_else(|| self.security.default_smtp_port());
        with_login(
            ConnectionConfig::new(&self.host, port, self.security),
            &self.login,
            &self.password,
        )
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.connection(), self.mailbox)
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (from {:?})", self.connection(), self.from)
    }
}

fn with_login(config: ConnectionConfig, login: &str, password: &str) -> ConnectionConfig {
    if login.is_empty() {
        config
    } else {
        config.credentials(login, password)
    }
}
