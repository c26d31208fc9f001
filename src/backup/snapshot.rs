//! Snapshot naming and staging.
//!
//! Every execution stages `<destination>/<YYYY-MM-DD-HH-mm-ss>` before the
//! transfer starts. Compression later replaces that directory with
//! `<name>.tgz`.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use chrono::{DateTime, TimeZone};
use std::ffi::OsString;
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub static SNAPSHOT_TIME_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";
pub static ARCHIVE_EXT: &str = "tgz";

pub fn snapshot_name<Tz: TimeZone>(dt: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    dt.format(SNAPSHOT_TIME_FORMAT).to_string()
}

/// Creates the destination folder and the staging directory for `dt`.
///
/// An already existing staging directory is reused.
pub fn stage_snapshot<Tz: TimeZone>(destination: &Path, dt: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz::Offset: Display,
{
    let staging = destination.join(snapshot_name(dt));
    std::fs::create_dir_all(&staging)
        .map_err(Error::from)
        .with_msg(format!("Cannot stage snapshot directory {:?}", staging))?;
    Ok(staging)
}

/// `<staging>.tgz`, next to the staging directory.
pub fn archive_path(staging: &Path) -> PathBuf {
    with_suffix(staging, ARCHIVE_EXT)
}

pub fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

pub fn is_archive(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{ARCHIVE_EXT}")))
}
