use crate::backup::connect::options::ConnectParams;
use crate::backup::result_error::result::Result;
use derive_more::Display;
use std::path::Path;

/// Kind of a remote path, as reported by [`RemoteSession::exists`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum EntryKind {
    #[display("directory")]
    Directory,
    #[display("file")]
    File,
    #[display("symlink")]
    Symlink,
}

/// One authenticated remote connection.
///
/// Sessions are opened per operation and never shared between operations.
/// Methods take `&self` so that several transfers can run on one session at
/// the same time.
pub trait RemoteSession: Send + Sync {
    /// Downloads the `remote` tree recursively into the existing `local`
    /// directory.
    fn download_dir(&self, remote: &str, local: &Path) -> Result<()>;

    fn download_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// `None` when nothing exists at `remote`.
    fn exists(&self, remote: &str) -> Result<Option<EntryKind>>;

    fn end(&self) -> Result<()>;
}

/// Opens remote sessions.
pub trait Connector: Send + Sync {
    fn connect(&self, params: ConnectParams) -> Result<Box<dyn RemoteSession>>;
}
