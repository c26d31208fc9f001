use crate::backup::notifications::NotificationConfig;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::validate::{validate_dir_exist, validate_not_blank};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fs::File;
use std::path::{Path, PathBuf};
use validator::Validate;

pub static DEFAULT_CONFIG_PATH: &str = "./config/config.yaml";
static DEFAULT_BACKUPS_DIR: &str = "./backups";
static DEFAULT_SSH_PORT: u16 = 22;

/// Process-wide configuration, read once at startup.
///
/// Task definitions under `create-backups` stay raw YAML mappings here; each
/// one is checked field by field when its task is constructed so that errors
/// can name the offending task.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    #[validate(nested)]
    pub remote: RemoteHost,
    #[validate(custom(function = validate_not_blank))]
    pub username: String,
    pub password: Option<RedactedString>,
    pub private_key: Option<RedactedString>,
    pub passphrase: Option<RedactedString>,
    pub ssh_auth_sock: Option<String>,
    #[validate(nested)]
    pub proxy: Option<ProxyConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub notifications: NotificationConfig,
    #[validate(custom(function = validate_dir_exist))]
    pub mount_root: PathBuf,
    #[serde(default = "default_backups_dir")]
    pub backups_dir: PathBuf,
    #[serde(default)]
    pub create_backups: Vec<serde_yml::Mapping>,
}

fn default_backups_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BACKUPS_DIR)
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RemoteHost {
    #[validate(custom(function = validate_not_blank))]
    pub host: String,
    #[serde(default = "default_ssh_port")]
    #[validate(range(min = 1))]
    pub port: u16,
}

/// Per-task replacement for the process-wide server settings.
///
/// Credentials left out here fall back to the process-wide ones.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ServerOverride {
    #[validate(nested)]
    pub remote: RemoteHost,
    #[validate(custom(function = validate_not_blank))]
    pub username: String,
    pub password: Option<RedactedString>,
    pub private_key: Option<RedactedString>,
    pub passphrase: Option<RedactedString>,
    pub ssh_auth_sock: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Validate)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[validate(custom(function = validate_not_blank))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    #[serde(rename = "type")]
    pub version: SocksVersion,
    #[serde(default)]
    pub command: ProxyCommand,
    /// Refuse the connection when the tunnel cannot be opened instead of
    /// falling through to a direct attempt.
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, Display, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum SocksVersion {
    #[display("SOCKSv4")]
    V4,
    #[display("SOCKSv5")]
    V5,
}

impl TryFrom<u8> for SocksVersion {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            4 => Ok(SocksVersion::V4),
            5 => Ok(SocksVersion::V5),
            v => Err(format!("unsupported SOCKS version {v}, expected 4 or 5")),
        }
    }
}

impl From<SocksVersion> for u8 {
    fn from(value: SocksVersion) -> Self {
        match value {
            SocksVersion::V4 => 4,
            SocksVersion::V5 => 5,
        }
    }
}

#[derive(Clone, Copy, Default, Serialize, Deserialize, Debug, Display, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyCommand {
    #[default]
    #[display("connect")]
    Connect,
    #[display("bind")]
    Bind,
    #[display("associate")]
    Associate,
}

impl ClientConfig {
    /// Reads and validates the YAML configuration at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }

        let config = File::open(path)
            .map_err(Error::from)
            .and_then(|f| {
                serde_yml::from_reader::<_, ClientConfig>(f)
                    .map_err(Error::from)
                    .with_msg(format!("Parse YAML config failed: {:?}", path))
            })?;

        config
            .validate()
            .map_err(Error::from)
            .with_msg(format!("Config validation failed: {:?}", path))?;

        Ok(config)
    }

    /// Proxy settings, only when the proxy is switched on.
    pub fn active_proxy(&self) -> Option<&ProxyConfig> {
        self.proxy.as_ref().filter(|p| p.enabled)
    }
}
