use crate::backup::connect::session::{EntryKind, RemoteSession};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::task::{BackupTask, Transfer};
use itertools::Itertools;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// Downloads a fixed list of files and directories below `origin`.
///
/// Entries that are missing on the remote are left out of the snapshot; the
/// warning about them is only logged on a task's first run. Symbolic links
/// are skipped. A failed entry is logged and omitted, the remaining entries
/// still make up the snapshot.
#[derive(Clone, Debug)]
pub struct EntriesTransfer {
    entries: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PresentEntry {
    pub entry: String,
    pub remote: String,
    pub kind: EntryKind,
}

/// Outcome of checking every configured entry on the remote.
#[derive(Clone, Debug, Default)]
pub struct EntryReport {
    pub present: Vec<PresentEntry>,
    pub missing: Vec<String>,
    pub failed: Vec<String>,
    /// Missing entries a warning was logged for.
    pub warned: Vec<String>,
}

pub fn remote_entry_path(origin: &str, entry: &str) -> String {
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        entry.trim_start_matches("./")
    )
}

impl EntriesTransfer {
    pub fn new(entries: Vec<String>) -> Self {
        Self { entries }
    }

    pub fn check_entries(&self, task: &BackupTask, session: &dyn RemoteSession) -> EntryReport {
        let origin = &task.config().origin;
        let first_run = task.runs() == 0;

        let results = self
            .entries
            .par_iter()
            .map(|entry| {
                let remote = remote_entry_path(origin, entry);
                let kind = session.exists(&remote);
                (entry.clone(), remote, kind)
            })
            .collect::<Vec<_>>();

        let mut report = EntryReport::default();
        for (entry, remote, kind) in results {
            match kind {
                Ok(Some(kind)) => report.present.push(PresentEntry {
                    entry,
                    remote,
                    kind,
                }),
                Ok(None) => {
                    if first_run {
                        tracing::warn!(
                            "{} Skipping non-existent entry {}",
                            task.identifier(),
                            remote
                        );
                        report.warned.push(remote.clone());
                    }
                    report.missing.push(remote);
                }
                Err(e) => {
                    tracing::error!(
                        "{} Could not check entry {} on the remote:\n{}",
                        task.identifier(),
                        remote,
                        indent::indent_all_with("  ", e.to_string())
                    );
                    report.failed.push(remote);
                }
            }
        }
        report
    }
}

fn download_entry(session: &dyn RemoteSession, present: &PresentEntry, local: &Path) -> Result<()> {
    match present.kind {
        EntryKind::Directory => {
            std::fs::create_dir_all(local)
                .map_err(Error::from)
                .with_msg(format!("Creating {:?} failed", local))?;
            session.download_dir(&present.remote, local)
        }
        EntryKind::File => {
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            session.download_file(&present.remote, local)
        }
        EntryKind::Symlink => Ok(()),
    }
}

impl Transfer for EntriesTransfer {
    fn transfer(&self, task: &BackupTask, session: &dyn RemoteSession, staging: &Path) -> Result<()> {
        let report = self.check_entries(task, session);
        let (links, downloads): (Vec<_>, Vec<_>) = report
            .present
            .into_iter()
            .partition(|p| p.kind == EntryKind::Symlink);
        for link in links {
            tracing::debug!(
                "{} Skipping symbolic link {}, links are not backed up",
                task.identifier(),
                link.remote
            );
        }

        let results = downloads
            .into_par_iter()
            .map(|present| {
                let local: PathBuf = staging.join(&present.entry);
                let res = download_entry(session, &present, &local);
                (present, res)
            })
            .collect::<Vec<_>>();

        let (done, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|(_, r)| r.is_ok());
        for (present, res) in failed {
            if let Err(e) = res {
                tracing::error!(
                    "{} Download of {} {} failed, leaving it out of this snapshot:\n{}",
                    task.identifier(),
                    present.kind,
                    present.remote,
                    indent::indent_all_with("  ", Error::transfer(present.remote.as_str(), e).to_string())
                );
            }
        }
        tracing::info!(
            "{} downloaded {} of {} entries: {}",
            task.identifier(),
            done.len(),
            self.entries.len(),
            done.iter().map(|(p, _)| p.entry.as_str()).join(", ")
        );
        Ok(())
    }
}
