//! Connection orchestration.
//!
//! [`RemoteClient`] owns the process-wide connection settings and opens one
//! fresh session per operation: optional SOCKS tunnel, per-task overrides,
//! connect, run the caller's work, and always end the session afterwards.

pub mod mounted;
pub mod options;
pub mod session;
pub mod socks;

use crate::backup::client_config::{ClientConfig, ProxyConfig, ServerOverride};
use crate::backup::connect::options::{ConnectOptions, ConnectParams};
use crate::backup::connect::session::{Connector, RemoteSession};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Whoever asks for a connection: used for log prefixes and to pick up
/// per-task server settings.
pub trait ConnectionRequester {
    fn identifier(&self) -> &str;

    fn server(&self) -> Option<&ServerOverride> {
        None
    }
}

static CLIENT_IDENTIFIER: &str = "[client]";

pub struct RemoteClient {
    options: ConnectOptions,
    proxy: Option<ProxyConfig>,
    connector: Arc<dyn Connector>,
    active_sessions: AtomicUsize,
}

impl RemoteClient {
    pub fn new(config: &ClientConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            options: ConnectOptions::from_config(config),
            proxy: config.active_proxy().cloned(),
            connector,
            active_sessions: AtomicUsize::new(0),
        }
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.options
    }

    /// Whether any session is open right now.
    pub fn is_connected(&self) -> bool {
        self.active_sessions.load(Ordering::Acquire) > 0
    }

    /// Opens a session, hands it to `on_connect` and ends it again.
    ///
    /// A refused connection comes back as [`Error::ConnectionRefused`]; the
    /// caller decides whether that is fatal. The session is ended whether
    /// `on_connect` succeeds, fails or panics.
    pub fn connect<T, F>(&self, task: Option<&dyn ConnectionRequester>, on_connect: F) -> Result<T>
    where
        F: FnOnce(&dyn RemoteSession) -> Result<T>,
    {
        let identifier = task.map(|t| t.identifier()).unwrap_or(CLIENT_IDENTIFIER);
        tracing::info!("{} Creating remote connection...", identifier);

        let options = match task.and_then(|t| t.server()) {
            Some(server) => self.options.with_override(server),
            None => self.options.clone(),
        };

        let tunnel = match &self.proxy {
            None => None,
            Some(proxy) => match socks::open_tunnel(proxy, options.host(), *options.port()) {
                Ok(stream) => {
                    tracing::info!(
                        "{} {} tunnel through {}:{} established",
                        identifier,
                        proxy.version,
                        proxy.host,
                        proxy.port
                    );
                    Some(stream)
                }
                Err(e) if proxy.required => {
                    tracing::error!("{} Required {} proxy unavailable", identifier, proxy.version);
                    return Err(refused(&options, e));
                }
                Err(e) => {
                    tracing::error!(
                        "{} Error encountered while connecting to {}, trying direct connection:\n{}",
                        identifier,
                        proxy.version,
                        e
                    );
                    None
                }
            },
        };

        let session = self
            .connector
            .connect(ConnectParams {
                options: options.clone(),
                tunnel,
            })
            .map_err(|e| {
                tracing::error!("{} Remote connection couldn't be established", identifier);
                refused(&options, e)
            })?;
        tracing::info!(
            "{} Remote connection established through method: {}",
            identifier,
            options.auth_type()
        );

        let guard = SessionGuard::open(&self.active_sessions, session, identifier);
        let result = on_connect(guard.session.as_ref());
        drop(guard);
        result
    }
}

fn refused(options: &ConnectOptions, error: Error) -> Error {
    Error::ConnectionRefused {
        host: options.host().clone(),
        port: *options.port(),
        error: Box::new(error),
    }
}

/// Ends the session and clears the connected state when dropped, which also
/// happens while unwinding.
struct SessionGuard<'a> {
    active_sessions: &'a AtomicUsize,
    session: Box<dyn RemoteSession>,
    identifier: &'a str,
}

impl<'a> SessionGuard<'a> {
    fn open(
        active_sessions: &'a AtomicUsize,
        session: Box<dyn RemoteSession>,
        identifier: &'a str,
    ) -> Self {
        active_sessions.fetch_add(1, Ordering::AcqRel);
        Self {
            active_sessions,
            session,
            identifier,
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        tracing::info!("{} Closing/ending remote connection...", self.identifier);
        if let Err(e) = self.session.end() {
            tracing::warn!("{} Ending remote connection failed: {}", self.identifier, e);
        }
        self.active_sessions.fetch_sub(1, Ordering::AcqRel);
        tracing::info!("{} Remote connection closed", self.identifier);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::client_config::{ProxyCommand, RemoteHost, SocksVersion};
    use crate::backup::connect::session::EntryKind;
    use std::net::TcpListener;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConnector {
        refuse: bool,
        hosts: Mutex<Vec<(String, bool)>>,
        ended: Arc<AtomicUsize>,
    }

    struct NullSession {
        ended: Arc<AtomicUsize>,
    }

    impl RemoteSession for NullSession {
        fn download_dir(&self, _remote: &str, _local: &Path) -> Result<()> {
            Ok(())
        }

        fn download_file(&self, _remote: &str, _local: &Path) -> Result<()> {
            Ok(())
        }

        fn exists(&self, _remote: &str) -> Result<Option<EntryKind>> {
            Ok(None)
        }

        fn end(&self) -> Result<()> {
            self.ended.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Connector for RecordingConnector {
        fn connect(&self, params: ConnectParams) -> Result<Box<dyn RemoteSession>> {
            self.hosts
                .lock()
                .unwrap()
                .push((params.options.host().clone(), params.tunnel.is_some()));
            if self.refuse {
                return Err(Error::Remote("authentication failed".into()));
            }
            Ok(Box::new(NullSession {
                ended: self.ended.clone(),
            }))
        }
    }

    struct Requester {
        server: Option<ServerOverride>,
    }

    impl ConnectionRequester for Requester {
        fn identifier(&self) -> &str {
            "[task #1]"
        }

        fn server(&self) -> Option<&ServerOverride> {
            self.server.as_ref()
        }
    }

    fn config(proxy: Option<ProxyConfig>) -> ClientConfig {
        let mut config: ClientConfig = serde_yml::from_str(
            "remote: { host: main.example.org, port: 22 }\nusername: main\npassword: pw\nmount-root: /\n",
        )
        .unwrap();
        config.proxy = proxy;
        config
    }

    fn client(connector: Arc<RecordingConnector>, proxy: Option<ProxyConfig>) -> RemoteClient {
        RemoteClient::new(&config(proxy), connector)
    }

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn proxy(required: bool) -> ProxyConfig {
        ProxyConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: closed_port(),
            version: SocksVersion::V5,
            command: ProxyCommand::Connect,
            required,
        }
    }

    #[test]
    fn test_session_ended_after_success() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), None);

        let value = client
            .connect(None, |_session| {
                assert!(client.is_connected());
                Ok(7)
            })
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(connector.ended.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_session_ended_after_failed_work() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), None);

        let result: Result<()> = client.connect(None, |_session| Err(Error::Remote("boom".into())));

        assert!(matches!(result, Err(Error::Remote(_))));
        assert_eq!(connector.ended.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_session_ended_when_work_panics() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), None);

        let result = catch_unwind(AssertUnwindSafe(|| {
            client.connect(None, |_session| -> Result<()> { panic!("work panicked") })
        }));

        assert!(result.is_err());
        assert_eq!(connector.ended.load(Ordering::SeqCst), 1);
        assert!(!client.is_connected());
    }

    #[test]
    fn test_refusal_reported() {
        let connector = Arc::new(RecordingConnector {
            refuse: true,
            ..Default::default()
        });
        let client = client(connector.clone(), None);

        let result = client.connect(None, |_session| Ok(()));

        match result {
            Err(Error::ConnectionRefused { host, port, .. }) => {
                assert_eq!(host, "main.example.org");
                assert_eq!(port, 22);
            }
            _ => panic!("Expected ConnectionRefused"),
        }
        assert_eq!(connector.ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_override_applies_to_one_connection_only() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), None);
        let requester = Requester {
            server: Some(ServerOverride {
                remote: RemoteHost {
                    host: "other.example.org".into(),
                    port: 2200,
                },
                username: "other".into(),
                password: None,
                private_key: None,
                passphrase: None,
                ssh_auth_sock: None,
            }),
        };

        client
            .connect(Some(&requester as &dyn ConnectionRequester), |_s| Ok(()))
            .unwrap();
        client.connect(None, |_s| Ok(())).unwrap();

        let hosts = connector.hosts.lock().unwrap();
        assert_eq!(hosts[0].0, "other.example.org");
        assert_eq!(hosts[1].0, "main.example.org");
        assert_eq!(client.options().host(), "main.example.org");
    }

    #[test]
    fn test_unreachable_optional_proxy_falls_through() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), Some(proxy(false)));

        client.connect(None, |_s| Ok(())).unwrap();

        assert_eq!(connector.hosts.lock().unwrap()[0], ("main.example.org".into(), false));
    }

    #[test]
    fn test_unreachable_required_proxy_refuses() {
        let connector = Arc::new(RecordingConnector::default());
        let client = client(connector.clone(), Some(proxy(true)));

        let result = client.connect(None, |_s| Ok(()));

        assert!(matches!(result, Err(Error::ConnectionRefused { .. })));
        assert!(connector.hosts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disabled_proxy_ignored() {
        let connector = Arc::new(RecordingConnector::default());
        let mut disabled = proxy(true);
        disabled.enabled = false;
        let client = client(connector.clone(), Some(disabled));

        assert!(client.connect(None, |_s| Ok(())).is_ok());
    }
}
