use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::WithMsg;
use crate::backup::snapshot::is_archive;
use bon::Builder;
use getset::CopyGetters;
use itertools::Itertools;
use std::cmp::Reverse;
use std::fs::read_dir;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Keep-latest retention for one destination folder.
///
/// Only entries of the current format take part in a decision: `.tgz`
/// archives when `compress` is set, everything else otherwise. Once more
/// than `keep_latest` of them exist, the list is sorted newest first and
/// everything from index `keep_latest - 1` on is deleted, leaving
/// `keep_latest - 1` entries behind.
#[derive(Clone, Copy, Debug, Builder, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct RetentionPolicy {
    keep_latest: usize,
    compress: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetentionCandidate {
    pub path: PathBuf,
    pub created: SystemTime,
}

impl RetentionPolicy {
    pub fn is_enabled(&self) -> bool {
        self.keep_latest > 0
    }

    fn matches_format(&self, path: &Path) -> bool {
        is_archive(path) == self.compress
    }

    /// Immediate children of `dir` that this policy counts.
    pub fn candidates(&self, dir: &Path) -> Result<Vec<RetentionCandidate>> {
        read_dir(dir)
            .map_err(Error::from)
            .with_msg(format!("Cannot list destination {:?}", dir))?
            .filter_map(|r| r.ok())
            .map(|e| e.path())
            .filter(|p| self.matches_format(p))
            .map(|path| -> Result<RetentionCandidate> {
                let metadata = std::fs::symlink_metadata(&path)?;
                let created = metadata.created().or_else(|_| metadata.modified())?;
                Ok(RetentionCandidate { path, created })
            })
            .collect()
    }

    /// Picks the entries to delete, newest first ordering, ties broken by
    /// name (snapshot names sort chronologically).
    pub fn select_for_deletion(
        &self,
        candidates: Vec<RetentionCandidate>,
    ) -> Vec<RetentionCandidate> {
        if !self.is_enabled() || candidates.len() <= self.keep_latest {
            return Vec::new();
        }

        let mut sorted = candidates
            .into_iter()
            .sorted_by_key(|c| Reverse((c.created, c.path.file_name().map(|n| n.to_os_string()))))
            .collect_vec();
        sorted.split_off(self.keep_latest - 1)
    }

    /// Applies the policy to `dir` and returns the removed paths.
    pub fn apply(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }

        let to_delete = self.select_for_deletion(self.candidates(dir)?);
        let mut errors = Vec::new();
        let mut deleted = Vec::with_capacity(to_delete.len());
        for candidate in to_delete {
            tracing::info!("Removing out of retention backup {:?}", candidate.path);
            let res = if candidate.path.is_dir() {
                std::fs::remove_dir_all(&candidate.path)
            } else {
                std::fs::remove_file(&candidate.path)
            };
            match res {
                Ok(_) => deleted.push(candidate.path),
                Err(e) => errors.push(
                    Error::from(e).with_msg(format!("Cannot remove {:?}", candidate.path)),
                ),
            }
        }
        convert_error_vec(errors)?;

        Ok(deleted)
    }
}
