//! Connector for a remote filesystem that is reachable through a local mount
//! (sshfs, NFS, a synced folder, ...).
//!
//! Remote absolute paths are resolved below the mount root, so the remote
//! `/home/app/data` is read from `<root>/home/app/data`.

use crate::backup::connect::options::ConnectParams;
use crate::backup::connect::session::{Connector, EntryKind, RemoteSession};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use walkdir::WalkDir;

#[derive(Clone, Debug)]
pub struct MountedConnector {
    root: PathBuf,
}

impl MountedConnector {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

impl Connector for MountedConnector {
    fn connect(&self, params: ConnectParams) -> Result<Box<dyn RemoteSession>> {
        if !self.root.is_dir() {
            return Err(Error::Remote(format!(
                "mount root {:?} for {}:{} is not available",
                self.root,
                params.options.host(),
                params.options.port()
            )));
        }
        if params.tunnel.is_some() {
            tracing::debug!("Mounted connector does not use the proxy tunnel, dropping it");
        }
        tracing::debug!(
            "Opening mounted session {}@{}:{} at {:?}",
            params.options.username(),
            params.options.host(),
            params.options.port(),
            self.root
        );

        Ok(Box::new(MountedSession {
            root: self.root.clone(),
            ended: AtomicBool::new(false),
        }))
    }
}

pub struct MountedSession {
    root: PathBuf,
    ended: AtomicBool,
}

impl MountedSession {
    fn resolve(&self, remote: &str) -> Result<PathBuf> {
        if self.ended.load(Ordering::Acquire) {
            return Err(Error::Remote("session already ended".into()));
        }

        let relative = Path::new(remote.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Remote(format!(
                "remote path {remote:?} escapes the mount root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl RemoteSession for MountedSession {
    fn download_dir(&self, remote: &str, local: &Path) -> Result<()> {
        let src = self.resolve(remote)?;
        if !src.is_dir() {
            return Err(Error::Remote(format!("{remote:?} is not a directory")));
        }

        for entry in WalkDir::new(&src).follow_links(false).min_depth(1) {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(&src)
                .map_err(|e| Error::Remote(e.to_string()))?;
            let target = local.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                std::fs::create_dir_all(&target)?;
            } else if file_type.is_file() {
                std::fs::copy(entry.path(), &target)
                    .map_err(Error::from)
                    .with_msg(format!("Copy {:?} to {:?} failed", entry.path(), target))?;
            } else {
                tracing::debug!("Skipping {:?}, not a regular file", entry.path());
            }
        }

        Ok(())
    }

    fn download_file(&self, remote: &str, local: &Path) -> Result<()> {
        let src = self.resolve(remote)?;
        std::fs::copy(&src, local)
            .map_err(Error::from)
            .with_msg(format!("Copy {:?} to {:?} failed", src, local))?;
        Ok(())
    }

    fn exists(&self, remote: &str) -> Result<Option<EntryKind>> {
        let path = self.resolve(remote)?;
        match std::fs::symlink_metadata(&path) {
            Ok(md) if md.file_type().is_symlink() => Ok(Some(EntryKind::Symlink)),
            Ok(md) if md.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn end(&self) -> Result<()> {
        self.ended.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::connect::options::ConnectOptions;
    use tempfile::TempDir;

    fn params() -> ConnectParams {
        let config = serde_yml::from_str(
            "remote: { host: example.org }\nusername: backup\nmount-root: /\n",
        )
        .unwrap();
        ConnectParams {
            options: ConnectOptions::from_config(&config),
            tunnel: None,
        }
    }

    fn remote_tree() -> TempDir {
        let root = TempDir::new().unwrap();
        let data = root.path().join("remote/data");
        std::fs::create_dir_all(data.join("sub")).unwrap();
        std::fs::write(data.join("a.txt"), "a").unwrap();
        std::fs::write(data.join("sub/b.txt"), "b").unwrap();
        root
    }

    #[test]
    fn test_download_dir_recursive() {
        let root = remote_tree();
        let local = TempDir::new().unwrap();
        let session = MountedConnector::new(root.path()).connect(params()).unwrap();

        session.download_dir("/remote/data", local.path()).unwrap();

        assert_eq!(std::fs::read_to_string(local.path().join("a.txt")).unwrap(), "a");
        assert_eq!(std::fs::read_to_string(local.path().join("sub/b.txt")).unwrap(), "b");
    }

    #[test]
    fn test_exists_kinds() {
        let root = remote_tree();
        let session = MountedConnector::new(root.path()).connect(params()).unwrap();

        assert_eq!(session.exists("/remote/data").unwrap(), Some(EntryKind::Directory));
        assert_eq!(session.exists("/remote/data/a.txt").unwrap(), Some(EntryKind::File));
        assert_eq!(session.exists("/remote/data/missing").unwrap(), None);

        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(
                root.path().join("remote/data/a.txt"),
                root.path().join("remote/data/link"),
            )
            .unwrap();
            assert_eq!(session.exists("/remote/data/link").unwrap(), Some(EntryKind::Symlink));
        }
    }

    #[test]
    fn test_parent_components_rejected() {
        let root = remote_tree();
        let session = MountedConnector::new(root.path()).connect(params()).unwrap();

        assert!(session.exists("/remote/../../etc/passwd").is_err());
    }

    #[test]
    fn test_ended_session_refuses_work() {
        let root = remote_tree();
        let local = TempDir::new().unwrap();
        let session = MountedConnector::new(root.path()).connect(params()).unwrap();

        session.end().unwrap();

        assert!(session
            .download_file("/remote/data/a.txt", &local.path().join("a.txt"))
            .is_err());
    }

    #[test]
    fn test_missing_mount_root_refuses() {
        let root = TempDir::new().unwrap();
        let connector = MountedConnector::new(root.path().join("not-mounted"));

        assert!(connector.connect(params()).is_err());
    }
}
