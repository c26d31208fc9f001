use crate::backup::client_config::{ClientConfig, ServerOverride};
use crate::backup::redacted::RedactedString;
use derive_more::Display;
use getset::Getters;
use std::net::TcpStream;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum AuthType {
    #[display("PASSWORD")]
    Password,
    #[display("PUBLICKEY")]
    PublicKey,
}

/// Connection settings for one remote host.
///
/// Values are immutable: a per-task override produces a new value instead of
/// changing the process-wide one.
#[derive(Clone, Debug, Getters, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct ConnectOptions {
    host: String,
    port: u16,
    username: String,
    private_key: Option<RedactedString>,
    password: Option<RedactedString>,
    passphrase: Option<RedactedString>,
    agent: Option<String>,
}

/// A private key, when present and non-empty, wins over a password.
fn select_credentials(
    private_key: Option<&RedactedString>,
    password: Option<&RedactedString>,
) -> (Option<RedactedString>, Option<RedactedString>) {
    match private_key.filter(|k| !k.is_empty()) {
        Some(key) => (Some(key.clone()), None),
        None => (None, password.cloned()),
    }
}

impl ConnectOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        let (private_key, password) =
            select_credentials(config.private_key.as_ref(), config.password.as_ref());
        Self {
            host: config.remote.host.clone(),
            port: config.remote.port,
            username: config.username.clone(),
            private_key,
            password,
            passphrase: config.passphrase.clone(),
            agent: config.ssh_auth_sock.clone(),
        }
    }

    /// Options for a single connection made on behalf of a task with its own
    /// server settings.
    ///
    /// An override that brings a password or a private key authenticates with
    /// those alone. Only an override without either inherits the process-wide
    /// key, password and passphrase.
    pub fn with_override(&self, server: &ServerOverride) -> Self {
        let own_key = server.private_key.as_ref().filter(|k| !k.is_empty());
        let (private_key, password, passphrase) = if own_key.is_some() || server.password.is_some() {
            let (key, password) = select_credentials(own_key, server.password.as_ref());
            (key, password, server.passphrase.clone())
        } else {
            (
                self.private_key.clone(),
                self.password.clone(),
                server.passphrase.clone().or_else(|| self.passphrase.clone()),
            )
        };
        Self {
            host: server.remote.host.clone(),
            port: server.remote.port,
            username: server.username.clone(),
            private_key,
            password,
            passphrase,
            agent: server.ssh_auth_sock.clone().or_else(|| self.agent.clone()),
        }
    }

    pub fn auth_type(&self) -> AuthType {
        if self.password.is_some() {
            AuthType::Password
        } else {
            AuthType::PublicKey
        }
    }
}

/// Everything a [`Connector`](crate::backup::connect::session::Connector)
/// needs for one connection: the merged options plus an already established
/// proxy tunnel, if any.
#[derive(Debug)]
pub struct ConnectParams {
    pub options: ConnectOptions,
    pub tunnel: Option<TcpStream>,
}
