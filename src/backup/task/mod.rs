//! Backup tasks: one configured backup job each, with its own timer.
//!
//! A run stages a snapshot directory named after the run's start time,
//! downloads into it over a fresh remote session, then (after the session is
//! closed) compresses it and applies keep-latest retention to the
//! destination. Only a successful run advances the run counter and the next
//! due time; a failed run is logged and retried on the next tick.

pub mod config;
pub mod directory;
pub mod entries;
pub mod registry;

use crate::backup::compress::compress_snapshot;
use crate::backup::connect::session::RemoteSession;
use crate::backup::connect::{ConnectionRequester, RemoteClient};
use crate::backup::client_config::ServerOverride;
use crate::backup::human_time::human_duration;
use crate::backup::notifications::{self, NotificationConfig};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::retention::RetentionPolicy;
use crate::backup::snapshot::{snapshot_name, stage_snapshot};
use crate::backup::task::config::{BackupTaskConfig, BackupType};
use crate::backup::task::directory::DirectoryTransfer;
use crate::backup::task::entries::EntriesTransfer;
use chrono::{DateTime, Local, TimeDelta};
use derive_more::Display;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Fills a staged snapshot directory from an open session.
pub trait Transfer: Send + Sync {
    fn transfer(&self, task: &BackupTask, session: &dyn RemoteSession, staging: &Path) -> Result<()>;
}

#[derive(Clone, Debug)]
pub enum TaskVariant {
    Directory(DirectoryTransfer),
    Entries(EntriesTransfer),
}

impl TaskVariant {
    pub fn as_transfer(&self) -> &dyn Transfer {
        match self {
            TaskVariant::Directory(t) => t,
            TaskVariant::Entries(t) => t,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum TaskState {
    #[display("constructed")]
    Constructed,
    #[display("scheduled")]
    Scheduled,
    #[display("running")]
    Running,
    #[display("disabled")]
    Disabled,
    #[display("stopped")]
    Stopped,
}

pub struct BackupTask {
    index: usize,
    identifier: String,
    config: BackupTaskConfig,
    variant: TaskVariant,
    retention: RetentionPolicy,
    client: Arc<RemoteClient>,
    notifier: Arc<NotificationConfig>,
    runs: AtomicU64,
    next_run_at: RwLock<Option<DateTime<Local>>>,
    state: RwLock<TaskState>,
}

impl fmt::Debug for BackupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupTask")
            .field("identifier", &self.identifier)
            .field("config", &self.config)
            .field("runs", &self.runs())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionRequester for BackupTask {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn server(&self) -> Option<&ServerOverride> {
        self.config.server.as_ref()
    }
}

impl BackupTask {
    pub fn new(
        index: usize,
        config: BackupTaskConfig,
        client: Arc<RemoteClient>,
        notifier: Arc<NotificationConfig>,
    ) -> Result<Self> {
        let variant = match config.backup_type {
            BackupType::Directory => TaskVariant::Directory(DirectoryTransfer),
            BackupType::Entries if config.entries.is_empty() => {
                return Err(Error::task_validation(
                    index,
                    "parameter 'entries' to be of type list/array",
                ))
            }
            BackupType::Entries => {
                TaskVariant::Entries(EntriesTransfer::new(config.entries.clone()))
            }
            t @ (BackupType::Changed | BackupType::List) => {
                return Err(Error::task_validation(
                    index,
                    format!("parameter 'type' to be an implemented backup type, {t} is not implemented yet"),
                ))
            }
        };
        let retention = RetentionPolicy::builder()
            .keep_latest(config.keep_latest)
            .compress(config.compress)
            .build();

        Ok(Self {
            index,
            identifier: format!("[task #{}]", index + 1),
            config,
            variant,
            retention,
            client,
            notifier,
            runs: AtomicU64::new(0),
            next_run_at: RwLock::new(None),
            state: RwLock::new(TaskState::Constructed),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn config(&self) -> &BackupTaskConfig {
        &self.config
    }

    pub fn variant(&self) -> &TaskVariant {
        &self.variant
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    /// Number of successful runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Acquire)
    }

    /// When the next run is due, known after the first successful run.
    pub fn next_run_at(&self) -> Option<DateTime<Local>> {
        *self
            .next_run_at
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TaskState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: TaskState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn notify<D: fmt::Display>(&self, msg: D) {
        if self.config.notifications {
            notifications::dispatch(&self.notifier, &self.identifier, msg.to_string());
        }
    }

    /// Performs one backup run for a snapshot taken at `now`.
    ///
    /// Errors are logged here; the return value says whether the run
    /// succeeded.
    pub fn run(&self, now: DateTime<Local>) -> bool {
        match self.try_run(now) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    "{} Error encountered while performing {} backup task:\n{}",
                    self.identifier,
                    self.config.backup_type,
                    indent::indent_all_with("  ", e.to_string())
                );
                false
            }
        }
    }

    fn try_run(&self, now: DateTime<Local>) -> Result<usize> {
        let destination = &self.config.destination;
        let reused = destination.join(snapshot_name(&now)).exists();
        let staging = stage_snapshot(destination, &now)?;

        let transferred = self
            .client
            .connect(Some(self as &dyn ConnectionRequester), |session| {
                self.variant.as_transfer().transfer(self, session, &staging)
            });
        if let Err(e) = transferred {
            if !reused {
                discard_staging(&self.identifier, &staging);
            }
            return Err(e);
        }

        if self.config.compress {
            let archive = compress_snapshot(&self.identifier, &staging)?;
            self.notify(format!(
                "Finished compressing backup of task #{} to {:?}",
                self.index + 1,
                archive
            ));
        }

        let deleted = self.keep_latest_backups()?;
        Ok(deleted)
    }

    /// Applies retention to the destination and returns how many backups
    /// were removed.
    pub fn keep_latest_backups(&self) -> Result<usize> {
        if !self.retention.is_enabled() {
            return Ok(0);
        }

        let deleted = self.retention.apply(&self.config.destination)?.len();
        if deleted > 0 {
            tracing::info!(
                "{} Removed {} backup(s) beyond keep-latest {}",
                self.identifier,
                deleted,
                self.config.keep_latest
            );
            self.notify(format!(
                "Cleaned {} old backup(s) of task #{}",
                deleted,
                self.index + 1
            ));
        }
        Ok(deleted)
    }

    fn record_success(&self) -> u64 {
        let runs = self.runs.fetch_add(1, Ordering::AcqRel) + 1;
        let next = TimeDelta::from_std(self.config.interval)
            .ok()
            .and_then(|d| Local::now().checked_add_signed(d));
        *self
            .next_run_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next;
        runs
    }

    /// One run with notifications and bookkeeping. Blocks the calling
    /// thread.
    pub fn execute_blocking(&self, now: DateTime<Local>) -> bool {
        self.set_state(TaskState::Running);
        tracing::info!("{} Starting run #{}", self.identifier, self.runs() + 1);
        self.notify(format!(
            "Starting backup task #{}: {} backup of {} to {:?}",
            self.index + 1,
            self.config.backup_type,
            self.config.origin,
            self.config.destination
        ));

        let success = self.run(now);
        if success {
            let runs = self.record_success();
            tracing::info!(
                "{} Finished run #{} - next run in {}",
                self.identifier,
                runs,
                human_duration(self.config.interval)
            );
            self.notify(format!("Finished backup task #{}", self.index + 1));
        }

        self.set_state(TaskState::Scheduled);
        success
    }

    /// Runs [`BackupTask::execute_blocking`] on the blocking pool.
    pub async fn execute(self: Arc<Self>, now: DateTime<Local>) -> bool {
        let task = self.clone();
        match tokio::task::spawn_blocking(move || task.execute_blocking(now)).await {
            Ok(success) => success,
            Err(e) => {
                tracing::error!(
                    "{} Run aborted:\n{}",
                    self.identifier,
                    indent::indent_all_with("  ", Error::from(e).to_string())
                );
                self.set_state(TaskState::Scheduled);
                false
            }
        }
    }

    /// Performs the initial run and starts the repeating timer.
    ///
    /// Returns `None` for a disabled task. The timer ticks `interval` after
    /// each attempt finished, whatever its outcome, until `cancel` fires.
    pub async fn schedule(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("{} disabled, not scheduling", self.identifier);
            self.set_state(TaskState::Disabled);
            return None;
        }

        self.set_state(TaskState::Scheduled);
        tracing::info!(
            "{} scheduled every {}",
            self.identifier,
            human_duration(self.config.interval)
        );
        self.clone().execute(Local::now()).await;

        let task = self;
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(task.config.interval) => {
                        task.clone().execute(Local::now()).await;
                    }
                }
            }
            task.set_state(TaskState::Stopped);
            tracing::info!("{} timer stopped", task.identifier);
        }))
    }
}

fn discard_staging(identifier: &str, staging: &Path) {
    if let Err(e) = std::fs::remove_dir_all(staging) {
        tracing::warn!(
            "{} Could not remove staging directory {:?}: {}",
            identifier,
            staging,
            e
        );
    }
}
