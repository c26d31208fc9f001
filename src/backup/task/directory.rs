use crate::backup::connect::session::RemoteSession;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::task::{BackupTask, Transfer};
use std::path::Path;

/// Downloads the whole `origin` tree into the snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectoryTransfer;

impl Transfer for DirectoryTransfer {
    fn transfer(&self, task: &BackupTask, session: &dyn RemoteSession, staging: &Path) -> Result<()> {
        let origin = &task.config().origin;
        tracing::info!("{} downloading {} to {:?}", task.identifier(), origin, staging);
        session
            .download_dir(origin, staging)
            .map_err(|e| Error::transfer(origin.as_str(), e))?;
        tracing::info!("{} download of {} complete", task.identifier(), origin);
        Ok(())
    }
}
