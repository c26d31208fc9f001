use crate::backup::client_config::ServerOverride;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::task::registry::TaskRegistry;
use bon::Builder;
use derive_more::Display;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde_yml::{Mapping, Value};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use validator::Validate;

pub static DEFAULT_INTERVAL: Duration = Duration::from_secs(3600);
pub static DEFAULT_KEEP_LATEST: usize = 5;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum BackupType {
    /// The whole `origin` tree.
    Directory,
    /// Selected files and directories inside `origin`.
    Entries,
    /// Files changed since the last backup. Not implemented.
    Changed,
    /// Files listed by the user. Not implemented.
    List,
}

impl BackupType {
    pub const ALL: [BackupType; 4] = [
        BackupType::Directory,
        BackupType::Entries,
        BackupType::Changed,
        BackupType::List,
    ];

    pub fn from_name(name: &str) -> Option<BackupType> {
        Self::ALL.into_iter().find(|t| t.to_string() == name)
    }

    pub fn is_implemented(&self) -> bool {
        matches!(self, BackupType::Directory | BackupType::Entries)
    }

    pub fn implemented() -> impl Iterator<Item = BackupType> {
        Self::ALL.into_iter().filter(BackupType::is_implemented)
    }
}

/// Resolved settings of one `create-backups` entry.
#[derive(Clone, Debug, Builder)]
pub struct BackupTaskConfig {
    pub backup_type: BackupType,
    #[builder(into)]
    pub origin: String,
    #[builder(with = |path: PathBuf| normalize_destination(&path))]
    pub destination: PathBuf,
    #[builder(default = true)]
    pub compress: bool,
    #[builder(default = DEFAULT_INTERVAL)]
    pub interval: Duration,
    #[builder(default = DEFAULT_KEEP_LATEST)]
    pub keep_latest: usize,
    #[builder(default = true)]
    pub notifications: bool,
    #[builder(default = true)]
    pub enabled: bool,
    #[builder(default)]
    pub entries: Vec<String>,
    pub server: Option<ServerOverride>,
}

/// Lexically normalizes a destination so that `./backups/d1`,
/// `backups/d1/` and `backups/./d1` compare equal.
pub fn normalize_destination(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn field<'a>(raw: &'a Mapping, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn optional<T: DeserializeOwned>(
    index: usize,
    raw: &Mapping,
    key: &str,
    expected: &str,
) -> Result<Option<T>> {
    field(raw, key)
        .map(|v| {
            serde_yml::from_value::<T>(v.clone()).map_err(|_| {
                Error::task_validation(index, format!("parameter '{key}' to be of type {expected}"))
            })
        })
        .transpose()
}

fn required_string(index: usize, raw: &Mapping, key: &str) -> Result<String> {
    match field(raw, key) {
        Some(Value::String(s)) => Ok(s.clone()),
        _ => Err(Error::task_validation(
            index,
            format!("parameter '{key}' to be of type string"),
        )),
    }
}

impl BackupTaskConfig {
    /// Extracts and validates one raw `create-backups` mapping.
    ///
    /// Checks run in a fixed order and stop at the first violation: the
    /// backup type, `origin`/`destination`, destination uniqueness against
    /// `registry`, then the optional fields.
    pub fn from_mapping(index: usize, raw: &Mapping, registry: &TaskRegistry) -> Result<Self> {
        let type_name = field(raw, "type").and_then(Value::as_str);
        let backup_type = match type_name.and_then(BackupType::from_name) {
            Some(t) if t.is_implemented() => t,
            Some(t) => {
                return Err(Error::task_validation(
                    index,
                    format!(
                        "parameter 'type' to be an implemented backup type, {t} is not implemented yet\nExpected: {}",
                        BackupType::implemented().join(", ")
                    ),
                ))
            }
            None => {
                return Err(Error::task_validation(
                    index,
                    format!(
                        "parameter 'type' to be a valid backup type\nExpected: {}\nReceived: {}",
                        BackupType::ALL.iter().join(", "),
                        type_name.unwrap_or("<none>")
                    ),
                ))
            }
        };

        let origin = required_string(index, raw, "origin")?;
        let destination = normalize_destination(Path::new(&required_string(
            index,
            raw,
            "destination",
        )?));

        registry.check_unique_destination(index, &destination)?;

        let compress = optional::<bool>(index, raw, "compress", "boolean")?;
        let interval = optional::<u64>(index, raw, "interval", "number")?;
        let keep_latest = optional::<usize>(index, raw, "keep-latest", "number")?;
        let notifications = optional::<bool>(index, raw, "desktop-notifications", "boolean")?;
        let enabled = optional::<bool>(index, raw, "enabled", "boolean")?;

        if interval == Some(0) {
            return Err(Error::task_validation(
                index,
                "parameter 'interval' to be a positive number of seconds",
            ));
        }

        let entries = if backup_type == BackupType::Entries {
            let entries = optional::<Vec<String>>(index, raw, "entries", "list/array")?
                .filter(|e| !e.is_empty())
                .ok_or_else(|| {
                    Error::task_validation(index, "parameter 'entries' to be of type list/array")
                })?;
            if let Some(bad) = entries.iter().find(|e| !is_relative_entry(e)) {
                return Err(Error::task_validation(
                    index,
                    format!("parameter 'entries' to hold paths relative to origin, got {bad:?}"),
                ));
            }
            entries
        } else {
            Vec::new()
        };

        let server = optional::<ServerOverride>(index, raw, "server", "server mapping")?;
        if let Some(server) = &server {
            server.validate().map_err(|e| {
                Error::task_validation(index, format!("parameter 'server' to be valid:\n{e}"))
            })?;
        }

        Ok(BackupTaskConfig {
            backup_type,
            origin,
            destination,
            compress: compress.unwrap_or(true),
            interval: interval.map(Duration::from_secs).unwrap_or(DEFAULT_INTERVAL),
            keep_latest: keep_latest.unwrap_or(DEFAULT_KEEP_LATEST),
            notifications: notifications.unwrap_or(true),
            enabled: enabled.unwrap_or(true),
            entries,
            server,
        })
    }
}

/// Entries stay inside the snapshot: no absolute paths, no `..`.
pub fn is_relative_entry(entry: &str) -> bool {
    !entry.is_empty()
        && Path::new(entry)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
