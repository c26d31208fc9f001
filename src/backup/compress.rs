//! Snapshot compression and crash recovery.
//!
//! A staging directory is streamed into `<staging>.tgz.tmp` through tar and
//! gzip. Only after the stream is closed is the temporary renamed to
//! `<staging>.tgz` and the staging directory removed. A failed stream leaves
//! the staging directory untouched.

use crate::backup::finish::Finish;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::snapshot::{archive_path, with_suffix};
use flate2::write::GzEncoder;
use flate2::Compression;
use function_name::named;
use itertools::Itertools;
use std::fs::{read_dir, File};
use std::io::{BufWriter, ErrorKind, IntoInnerError};
use std::path::{Path, PathBuf};

static TMP_EXT: &str = "tmp";

/// Archives `staging` into `<staging>.tgz`, removes `staging` and then clears
/// empty directories left next to it by interrupted earlier runs.
#[named]
pub fn compress_snapshot(identifier: &str, staging: &Path) -> Result<PathBuf> {
    let archive = archive_path(staging);
    let tmp = with_suffix(&archive, TMP_EXT);
    tracing::info!("{} compressing {:?} to {:?}", identifier, staging, archive);

    if let Err(mut e) = write_archive(staging, &tmp).and_then(|_| {
        std::fs::rename(&tmp, &archive)
            .map_err(Error::from)
            .with_msg(format!("Renaming {:?} to {:?} failed", tmp, archive))
    }) {
        match std::fs::remove_file(&tmp) {
            Err(e2) if e2.kind() != ErrorKind::NotFound => e = e.chain(e2.into()),
            _ => {}
        }
        return Err(Error::CompressionStream {
            path: staging.to_path_buf(),
            error: Box::new(e),
        });
    }
    tracing::info!("{} finished compressing", identifier);

    tracing::info!("{} deleting original @ {:?}...", identifier, staging);
    std::fs::remove_dir_all(staging)
        .map_err(Error::from)
        .with_debug_object_and_fn_name(staging.to_path_buf(), function_path!())?;
    tracing::info!("{} deleted {:?}", identifier, staging);

    if let Some(parent) = staging.parent() {
        clean_empty_folders(identifier, parent);
    }

    Ok(archive)
}

fn write_archive(staging: &Path, target: &Path) -> Result<()> {
    let file = File::create(target)?;
    let mut builder = tar::Builder::new(GzEncoder::new(
        BufWriter::new(file),
        Compression::default(),
    ));
    builder.follow_symlinks(false);
    builder.append_dir_all("", staging)?;

    let encoder = Finish::finish(builder)?;
    Finish::finish(encoder)?
        .into_inner()
        .map_err(IntoInnerError::into_error)?
        .sync_all()?;

    Ok(())
}

/// Removes every empty directory directly inside `dir` and returns the ones
/// actually removed.
///
/// When the process dies between the end of a download and the end of
/// compression, the staging directory can stay behind. Non-empty directories
/// are never touched; `remove_dir` refuses them even if one fills up between
/// the check and the removal. Failures are logged and skipped, the archive
/// is already in place by the time this runs.
pub fn clean_empty_folders(identifier: &str, dir: &Path) -> Vec<PathBuf> {
    clean_empty_folders_with(identifier, dir, |path| std::fs::remove_dir(path))
}

fn clean_empty_folders_with<F>(identifier: &str, dir: &Path, remove: F) -> Vec<PathBuf>
where
    F: Fn(&Path) -> std::io::Result<()>,
{
    let entries = match read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                "{} Skipping empty folder cleanup, cannot list {:?}: {}",
                identifier,
                dir,
                e
            );
            return Vec::new();
        }
    };
    let empty = entries
        .filter_map(|r| r.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| is_empty_dir(p))
        .collect_vec();

    if empty.is_empty() {
        return empty;
    }

    tracing::info!(
        "{} Found a total of {} empty folders that weren't properly removed. This can happen when the application goes offline in the middle of a task. Cleaning up...",
        identifier,
        empty.len()
    );
    let removed = empty
        .into_iter()
        .filter(|path| match remove(path) {
            Ok(()) => {
                tracing::info!("{} Removed empty directory {:?}", identifier, path);
                true
            }
            Err(e) => {
                tracing::warn!(
                    "{} Could not remove empty directory {:?}: {}",
                    identifier,
                    path,
                    e
                );
                false
            }
        })
        .collect_vec();
    tracing::info!("{} Finished empty folder cleanup", identifier);

    removed
}

fn is_empty_dir(path: &Path) -> bool {
    read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
