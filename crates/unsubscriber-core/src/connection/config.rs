//! Connection configuration types.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Connection security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum Security {
    /// No encryption. **Not recommended outside of testing.**
    PlainText,
    /// Start with plaintext, upgrade in-band with STARTTLS.
    StartTls,
    /// TLS from the start. **Recommended.**
    #[default]
    Ssl,
}

impl Security {
    /// Returns true if the mode expects the dedicated implicit-TLS port.
    #[must_use]
    pub const fn uses_secure_port(self) -> bool {
        matches!(self, Self::Ssl)
    }

    /// Returns the default IMAP port for this mode.
    #[must_use]
    pub const fn default_imap_port(self) -> u16 {
        if self.uses_secure_port() { 993 } else { 143 }
    }

    /// Returns the default SMTP port for this mode.
    #[must_use]
    pub const fn default_smtp_port(self) -> u16 {
        if self.uses_secure_port() { 465 } else { 25 }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PlainText => "plaintext",
            Self::StartTls => "starttls",
            Self::Ssl => "ssl",
        })
    }
}

impl FromStr for Security {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plaintext" => Ok(Self::PlainText),
            "starttls" | "tls" => Ok(Self::StartTls),
            "ssl" => Ok(Self::Ssl),
            _ => Err(format!("unknown connection security: {s:?}")),
        }
    }
}

impl TryFrom<String> for Security {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub login: String,
    /// Password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"xxx")
            .finish()
    }
}

/// Where and how to connect to a mail server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Security mode.
    pub security: Security,
    /// Credentials, if the server requires a login.
    pub credentials: Option<Credentials>,
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Creates a configuration without credentials.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, security: Security) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            credentials: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, login: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(login, password));
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(credentials) = &self.credentials {
            f.write_str(&credentials.login)?;
            if !credentials.password.is_empty() {
                f.write_str(":xxx")?;
            }
            f.write_str("@")?;
        }
        write!(f, "{}:{}/{}", self.host, self.port, self.security)
    }
}
