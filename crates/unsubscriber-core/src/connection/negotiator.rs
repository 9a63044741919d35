//! Connection establishment and security negotiation.
//!
//! Every connection walks the same states:
//!
//! ```text
//! start -> dialed -> secured -> ready
//!            |         |          |
//!            v         v          v
//!        dial failed  upgrade   auth failed
//!                     failed
//! ```
//!
//! For [`Security::PlainText`] the "secured" state is reached trivially.
//! For [`Security::Ssl`] the TLS handshake runs before any protocol bytes.
//! For [`Security::StartTls`] the protocol greeting is read in plaintext, the
//! upgrade command is issued, and the TLS handshake runs on the same socket.
//! A failed upgrade is fatal; the session never falls back to plaintext.

use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

use super::{ConnectionConfig, MailStream, Security, create_tls_connector};
use crate::guard::BoxError;

/// Stage of negotiation an error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Opening the socket and reading the greeting.
    Dial,
    /// Establishing TLS.
    Secure,
    /// Logging in.
    Authenticate,
}

/// Errors raised while establishing a session.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The TCP connection could not be opened.
    #[error("could not connect to {addr}: {source}")]
    Dial {
        /// Target address.
        addr: String,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TCP connection timed out.
    #[error("connecting to {addr} timed out after {after:?}")]
    Timeout {
        /// Target address.
        addr: String,
        /// Configured timeout.
        after: Duration,
    },

    /// The server greeting was rejected or malformed.
    #[error("handshake failed: {0}")]
    Handshake(#[source] BoxError),

    /// The TLS configuration could not be built.
    #[error("TLS configuration error: {0}")]
    TlsConfig(#[from] rustls::Error),

    /// The host is not a valid TLS server name.
    #[error("invalid server name {0:?}")]
    InvalidServerName(String),

    /// The TLS handshake failed.
    #[error("TLS handshake with {host} failed: {source}")]
    Tls {
        /// Server host.
        host: String,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server refused the in-band upgrade.
    #[error("STARTTLS failed: {0}")]
    Upgrade(#[source] BoxError),

    /// An upgrade was requested on an already encrypted stream.
    #[error("stream is already encrypted")]
    AlreadyEncrypted,

    /// Login was rejected.
    #[error("authentication failed: {0}")]
    Auth(#[source] BoxError),
}

impl ConnectionError {
    /// Returns the stage the connection failed in.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Dial { .. } | Self::Timeout { .. } | Self::Handshake(_) => Stage::Dial,
            Self::TlsConfig(_)
            | Self::InvalidServerName(_)
            | Self::Tls { .. }
            | Self::Upgrade(_)
            | Self::AlreadyEncrypted => Stage::Secure,
            Self::Auth(_) => Stage::Authenticate,
        }
    }
}

/// A mail protocol driver the [`Negotiator`] can bring up.
///
/// Implementations speak IMAP or SMTP over a [`MailStream`]; the negotiator
/// owns the socket and TLS handling.
#[async_trait]
pub trait MailClient: Sized + Send {
    /// Authenticated (or anonymous) session produced once ready.
    type Session: Send;
    /// Protocol error.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the server greeting on a fresh stream.
    async fn handshake(stream: MailStream, host: &str) -> Result<Self, Self::Error>;

    /// Issues the in-band upgrade command and hands back the raw stream.
    async fn start_tls(self) -> Result<MailStream, Self::Error>;

    /// Resumes the protocol on an upgraded stream. No greeting is expected.
    async fn resume(stream: MailStream, host: &str) -> Result<Self, Self::Error>;

    /// Logs in.
    async fn login(self, login: &str, password: &str) -> Result<Self::Session, Self::Error>;

    /// Returns the session without logging in.
    fn anonymous(self) -> Self::Session;
}

/// Establishes sessions according to a [`ConnectionConfig`].
#[derive(Clone)]
pub struct Negotiator {
    connector: TlsConnector,
}

impl Negotiator {
    /// Creates a negotiator trusting the web PKI roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn new() -> Result<Self, ConnectionError> {
        Ok(Self::with_connector(create_tls_connector()?))
    }

    /// Creates a negotiator with a custom TLS connector.
    #[must_use]
    pub const fn with_connector(connector: TlsConnector) -> Self {
        Self { connector }
    }

    /// Connects, secures and authenticates according to `config`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first stage that failed. No session
    /// is returned unless every stage succeeded.
    pub async fn connect<C: MailClient>(
        &self,
        config: &ConnectionConfig,
    ) -> Result<C::Session, ConnectionError> {
        let span = tracing::info_span!("connect", server = %config);
        self.negotiate::<C>(config).instrument(span).await
    }

    async fn negotiate<C: MailClient>(
        &self,
        config: &ConnectionConfig,
    ) -> Result<C::Session, ConnectionError> {
        let host = config.host.as_str();
        let tcp = Self::dial(config).await?;
        tracing::debug!("dialed");

        let client = match config.security {
            Security::PlainText => C::handshake(MailStream::Plain(tcp), host)
                .await
                .map_err(|e| ConnectionError::Handshake(Box::new(e)))?,
            Security::Ssl => {
                let stream = self.upgrade(MailStream::Plain(tcp), host).await?;
                C::handshake(stream, host)
                    .await
                    .map_err(|e| ConnectionError::Handshake(Box::new(e)))?
            }
            Security::StartTls => {
                let client = C::handshake(MailStream::Plain(tcp), host)
                    .await
                    .map_err(|e| ConnectionError::Handshake(Box::new(e)))?;
                let stream = client
                    .start_tls()
                    .await
                    .map_err(|e| ConnectionError::Upgrade(Box::new(e)))?;
                let stream = self.upgrade(stream, host).await?;
                C::resume(stream, host)
                    .await
                    .map_err(|e| ConnectionError::Upgrade(Box::new(e)))?
            }
        };
        tracing::debug!("secured");

        let session = match &config.credentials {
            Some(credentials) => client
                .login(&credentials.login, &credentials.password)
                .await
                .map_err(|e| ConnectionError::Auth(Box::new(e)))?,
            None => client.anonymous(),
        };
        tracing::debug!("ready");
        Ok(session)
    }

    async fn dial(config: &ConnectionConfig) -> Result<TcpStream, ConnectionError> {
        let addr = config.addr();
        let connect = TcpStream::connect((config.host.as_str(), config.port));
        match tokio::time::timeout(config.connect_timeout, connect).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(ConnectionError::Dial { addr, source }),
            Err(_) => Err(ConnectionError::Timeout {
                addr,
                after: config.connect_timeout,
            }),
        }
    }

    async fn upgrade(&self, stream: MailStream, host: &str) -> Result<MailStream, ConnectionError> {
        let MailStream::Plain(tcp) = stream else {
            return Err(ConnectionError::AlreadyEncrypted);
        };
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| ConnectionError::InvalidServerName(host.to_string()))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|source| ConnectionError::Tls {
                host: host.to_string(),
                source,
            })?;
        Ok(MailStream::Tls(Box::new(tls)))
    }
}

impl std::fmt::Debug for Negotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiator").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    use super::*;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct FakeError(&'static str);

    /// Behaviour switches shared with the fake client.
    #[derive(Debug, Default)]
    struct Script {
        refuse_start_tls: bool,
        refuse_login: bool,
        logged_in: AtomicBool,
        resumed: AtomicBool,
    }

    static SCRIPT: std::sync::Mutex<Option<Arc<Script>>> = std::sync::Mutex::new(None);

    fn script() -> Arc<Script> {
        SCRIPT.lock().unwrap().clone().unwrap_or_default()
    }

    /// Protocol driver that reads a one-line greeting.
    struct FakeClient {
        stream: MailStream,
        script: Arc<Script>,
    }

    #[derive(Debug)]
    struct FakeSession {
        login: Option<String>,
        tls: bool,
    }

    #[async_trait]
    impl MailClient for FakeClient {
        type Session = FakeSession;
        type Error = FakeError;

        async fn handshake(mut stream: MailStream, _host: &str) -> Result<Self, FakeError> {
            let mut buf = [0u8; 5];
            stream
                .read_exact(&mut buf)
                .await
                .map_err(|_| FakeError("no greeting"))?;
            if &buf != b"HELO\n" {
                return Err(FakeError("bad greeting"));
            }
            Ok(Self {
                stream,
                script: script(),
            })
        }

        async fn start_tls(self) -> Result<MailStream, FakeError> {
            if self.script.refuse_start_tls {
                return Err(FakeError("STARTTLS refused"));
            }
            Ok(self.stream)
        }

        async fn resume(stream: MailStream, _host: &str) -> Result<Self, FakeError> {
            let script = script();
            script.resumed.store(true, Ordering::SeqCst);
            Ok(Self { stream, script })
        }

        async fn login(self, login: &str, _password: &str) -> Result<FakeSession, FakeError> {
            if self.script.refuse_login {
                return Err(FakeError("bad password"));
            }
            self.script.logged_in.store(true, Ordering::SeqCst);
            Ok(FakeSession {
                login: Some(login.to_string()),
                tls: self.stream.is_tls(),
            })
        }

        fn anonymous(self) -> FakeSession {
            FakeSession {
                login: None,
                tls: self.stream.is_tls(),
            }
        }
    }

    /// Serves a greeting to one client. Anything the client sends afterwards
    /// is answered with plaintext, which a TLS client rejects.
    async fn greeting_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HELO\n").await.unwrap();
            let mut buf = [0u8; 512];
            if matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {
                let _ = socket.write_all(b"* OK not tls\r\n").await;
            }
        });
        port
    }

    /// Self-signed `localhost` acceptor and a negotiator trusting it.
    fn tls_pair() -> (TlsAcceptor, Negotiator) {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert: CertificateDer<'static> = cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let server = rustls::ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key)
            .unwrap();

        let mut roots = rustls::RootCertStore::empty();
        roots.add(cert).unwrap();
        let client = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();

        (
            TlsAcceptor::from(Arc::new(server)),
            Negotiator::with_connector(TlsConnector::from(Arc::new(client))),
        )
    }

    /// Serves one TLS client. With `starttls` the greeting is sent in
    /// plaintext before the handshake, otherwise inside the TLS session.
    async fn tls_server(acceptor: TlsAcceptor, starttls: bool) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            if starttls {
                socket.write_all(b"HELO\n").await.unwrap();
            }
            let mut tls = acceptor.accept(socket).await.unwrap();
            if !starttls {
                tls.write_all(b"HELO\n").await.unwrap();
            }
            let mut buf = [0u8; 512];
            while matches!(tls.read(&mut buf).await, Ok(n) if n > 0) {}
        });
        port
    }

    fn config(port: u16, security: Security) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", port, security)
            .connect_timeout(Duration::from_secs(5))
    }

    // Tests share the fake's script, so they run one at a time.
    static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn set_script(s: Script) -> Arc<Script> {
        let s = Arc::new(s);
        *SCRIPT.lock().unwrap() = Some(Arc::clone(&s));
        s
    }

    #[tokio::test]
    async fn test_plaintext_login() {
        let _serial = SERIAL.lock().await;
        let script = set_script(Script::default());
        let port = greeting_server().await;
        let negotiator = Negotiator::new().unwrap();

        let session = negotiator
            .connect::<FakeClient>(&config(port, Security::PlainText).credentials("me", "pw"))
            .await
            .unwrap();
        assert_eq!(session.login.as_deref(), Some("me"));
        assert!(!session.tls);
        assert!(script.logged_in.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_plaintext_anonymous() {
        let _serial = SERIAL.lock().await;
        set_script(Script::default());
        let port = greeting_server().await;
        let negotiator = Negotiator::new().unwrap();

        let session = negotiator
            .connect::<FakeClient>(&config(port, Security::PlainText))
            .await
            .unwrap();
        assert!(session.login.is_none());
    }

    #[tokio::test]
    async fn test_auth_failure() {
        let _serial = SERIAL.lock().await;
        set_script(Script {
            refuse_login: true,
            ..Script::default()
        });
        let port = greeting_server().await;
        let negotiator = Negotiator::new().unwrap();

        let err = negotiator
            .connect::<FakeClient>(&config(port, Security::PlainText).credentials("me", "bad"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Auth(_)));
        assert_eq!(err.stage(), Stage::Authenticate);
    }

    #[tokio::test]
    async fn test_ssl_session_is_encrypted() {
        let _serial = SERIAL.lock().await;
        let script = set_script(Script::default());
        let (acceptor, negotiator) = tls_pair();
        let port = tls_server(acceptor, false).await;

        let config = ConnectionConfig::new("localhost", port, Security::Ssl)
            .connect_timeout(Duration::from_secs(5))
            .credentials("me", "pw");
        let session = negotiator.connect::<FakeClient>(&config).await.unwrap();
        assert!(session.tls);
        assert_eq!(session.login.as_deref(), Some("me"));
        assert!(!script.resumed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_starttls_session_is_encrypted() {
        let _serial = SERIAL.lock().await;
        let script = set_script(Script::default());
        let (acceptor, negotiator) = tls_pair();
        let port = tls_server(acceptor, true).await;

        let config = ConnectionConfig::new("localhost", port, Security::StartTls)
            .connect_timeout(Duration::from_secs(5))
            .credentials("me", "pw");
        let session = negotiator.connect::<FakeClient>(&config).await.unwrap();
        assert!(session.tls);
        assert!(script.resumed.load(Ordering::SeqCst));
        assert!(script.logged_in.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_starttls_refused_is_fatal() {
        let _serial = SERIAL.lock().await;
        let script = set_script(Script {
            refuse_start_tls: true,
            ..Script::default()
        });
        let port = greeting_server().await;
        let negotiator = Negotiator::new().unwrap();

        let err = negotiator
            .connect::<FakeClient>(&config(port, Security::StartTls).credentials("me", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Upgrade(_)));
        assert_eq!(err.stage(), Stage::Secure);
        assert!(!script.logged_in.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_starttls_handshake_failure_is_fatal() {
        let _serial = SERIAL.lock().await;
        let script = set_script(Script::default());
        // The peer accepts the upgrade command but never speaks TLS.
        let port = greeting_server().await;
        let negotiator = Negotiator::new().unwrap();

        let err = negotiator
            .connect::<FakeClient>(&config(port, Security::StartTls).credentials("me", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Tls { .. }));
        assert_eq!(err.stage(), Stage::Secure);
        assert!(!script.logged_in.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_ssl_against_plaintext_peer() {
        let _serial = SERIAL.lock().await;
        set_script(Script::default());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        let negotiator = Negotiator::new().unwrap();

        let err = negotiator
            .connect::<FakeClient>(&config(port, Security::Ssl))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Tls { .. }));
    }

    #[tokio::test]
    async fn test_dial_failure() {
        let _serial = SERIAL.lock().await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let negotiator = Negotiator::new().unwrap();

        let err = negotiator
            .connect::<FakeClient>(&config(port, Security::PlainText))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Dial { .. }));
        assert_eq!(err.stage(), Stage::Dial);
    }

    #[test]
    fn test_stage_mapping() {
        assert_eq!(ConnectionError::AlreadyEncrypted.stage(), Stage::Secure);
        assert_eq!(
            ConnectionError::Handshake("x".into()).stage(),
            Stage::Dial
        );
    }
}
