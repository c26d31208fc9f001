//! Process-level wiring: the shared client, the task registry and the timers.

use crate::backup::client_config::ClientConfig;
use crate::backup::connect::session::Connector;
use crate::backup::connect::RemoteClient;
use crate::backup::notifications::NotificationConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use crate::backup::task::registry::TaskRegistry;
use crate::backup::task::BackupTask;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Pause between the initial runs of consecutive tasks.
pub static START_STAGGER: Duration = Duration::from_millis(350);
/// How long shutdown waits, in total, for in-flight runs to finish.
pub static SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Engine {
    client: Arc<RemoteClient>,
    registry: TaskRegistry,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    stagger: Duration,
    shutdown_grace: Duration,
}

impl Engine {
    /// Builds every configured task, in order. The first invalid task
    /// definition aborts construction.
    pub fn new(config: &ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        std::fs::create_dir_all(&config.backups_dir)
            .map_err(Error::from)
            .with_msg(format!("Cannot prepare backups dir {:?}", config.backups_dir))?;

        let client = Arc::new(RemoteClient::new(config, connector));
        let notifier: Arc<NotificationConfig> = Arc::new(config.notifications.clone());
        let mut registry = TaskRegistry::default();
        for raw in &config.create_backups {
            registry.register_raw(raw, client.clone(), notifier.clone())?;
        }
        if registry.is_empty() {
            tracing::warn!("No create-backup tasks configured, nothing will be backed up");
        } else {
            tracing::info!("Initialized {} create-backup task(s)", registry.len());
        }

        Ok(Self {
            client,
            registry,
            cancel: CancellationToken::new(),
            handles: Vec::new(),
            stagger: START_STAGGER,
            shutdown_grace: SHUTDOWN_GRACE,
        })
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn client(&self) -> &Arc<RemoteClient> {
        &self.client
    }

    pub fn tasks(&self) -> &[Arc<BackupTask>] {
        self.registry.tasks()
    }

    /// Opens and closes one session with the process-wide settings.
    pub async fn check_connection(&self) -> Result<()> {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || client.connect(None, |_session| Ok(()))).await?
    }

    /// Runs each enabled task once, in configuration order, then leaves its
    /// timer running.
    pub async fn start(&mut self) {
        for task in self.registry.tasks() {
            if self.cancel.is_cancelled() {
                break;
            }
            if let Some(handle) = task.clone().schedule(self.cancel.child_token()).await {
                self.handles.push(handle);
                tokio::time::sleep(self.stagger).await;
            }
        }
        tracing::info!("{} task timer(s) running", self.handles.len());
    }

    /// Stops every timer and waits for in-flight runs until the shutdown
    /// grace period, shared by all timers, runs out.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.shutdown_grace;
        let mut lingering = 0;
        for handle in self.handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Task timer ended abnormally: {}", Error::from(e)),
                Err(_) => lingering += 1,
            }
        }
        if lingering > 0 {
            tracing::warn!(
                "{} task timer(s) did not stop within {:?}",
                lingering,
                self.shutdown_grace
            );
        } else {
            tracing::info!("All task timers stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::connect::mounted::MountedConnector;
    use crate::backup::connect::options::ConnectParams;
    use crate::backup::connect::session::RemoteSession;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Lets the first `fast` connections through, then hangs for `stall`
    /// before refusing.
    struct StallingConnector {
        inner: MountedConnector,
        fast: usize,
        stall: Duration,
        attempts: AtomicUsize,
    }

    impl Connector for StallingConnector {
        fn connect(&self, params: ConnectParams) -> Result<Box<dyn RemoteSession>> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fast {
                return self.inner.connect(params);
            }
            std::thread::sleep(self.stall);
            Err(Error::Remote("connection timed out".into()))
        }
    }

    fn config(mount: &std::path::Path, backups: &std::path::Path, tasks: &str) -> ClientConfig {
        serde_yml::from_str(&format!(
            "remote: {{ host: example.org }}\nusername: backup\nmount-root: {}\nbackups-dir: {}\ncreate-backups:\n{}",
            mount.display(),
            backups.display(),
            tasks
        ))
        .unwrap()
    }

    #[test]
    fn test_new_registers_tasks_in_order() {
        let temp = TempDir::new().unwrap();
        let backups = temp.path().join("backups");
        let config = config(
            temp.path(),
            &backups,
            &format!(
                "  - {{ type: Directory, origin: /a, destination: {0}/d1 }}\n  - {{ type: Entries, origin: /b, destination: {0}/d2, entries: [x] }}\n",
                backups.display()
            ),
        );

        let engine = Engine::new(&config, Arc::new(MountedConnector::new(temp.path()))).unwrap();

        assert!(backups.is_dir());
        assert_eq!(engine.tasks().len(), 2);
        assert_eq!(engine.tasks()[1].identifier(), "[task #2]");
    }

    #[test]
    fn test_invalid_task_aborts_construction() {
        let temp = TempDir::new().unwrap();
        let config = config(
            temp.path(),
            &temp.path().join("backups"),
            "  - { type: Directory, origin: /a, destination: d1 }\n  - { type: Changed, origin: /a, destination: d2 }\n",
        );

        let result = Engine::new(&config, Arc::new(MountedConnector::new(temp.path())));

        assert!(matches!(result, Err(Error::TaskValidation { index: 1, .. })));
    }

    #[test]
    fn test_backups_dir_that_is_a_file_rejected() {
        let temp = TempDir::new().unwrap();
        let backups = temp.path().join("backups");
        std::fs::write(&backups, "not a directory").unwrap();
        let config = config(temp.path(), &backups, "  []\n");

        let result = Engine::new(&config, Arc::new(MountedConnector::new(temp.path())));

        match result {
            Err(Error::WithMsg { msg, error }) => {
                assert!(msg.starts_with("Cannot prepare backups dir"));
                assert!(matches!(*error, Error::Io(_)));
            }
            _ => panic!("Expected io error with message"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_grace_shared_by_all_timers() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("remote/data")).unwrap();
        std::fs::write(temp.path().join("remote/data/a.txt"), "a").unwrap();
        let backups = temp.path().join("backups");
        let config = config(
            temp.path(),
            &backups,
            &format!(
                "  - {{ type: Directory, origin: /remote/data, destination: {0}/d1, interval: 1 }}\n  - {{ type: Directory, origin: /remote/data, destination: {0}/d2, interval: 1 }}\n",
                backups.display()
            ),
        );
        let connector = Arc::new(StallingConnector {
            inner: MountedConnector::new(temp.path()),
            fast: 2,
            stall: Duration::from_secs(3),
            attempts: AtomicUsize::new(0),
        });
        let mut engine = Engine::new(&config, connector.clone())
            .unwrap()
            .with_stagger(Duration::from_millis(10))
            .with_shutdown_grace(Duration::from_secs(1));

        engine.start().await;
        // both timers tick into a stalled connection
        tokio::time::timeout(Duration::from_secs(5), async {
            while connector.attempts.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let started = std::time::Instant::now();
        engine.shutdown().await;

        assert!(started.elapsed() < Duration::from_millis(1800));
    }

    #[tokio::test]
    async fn test_check_connection() {
        let temp = TempDir::new().unwrap();
        let config = config(temp.path(), &temp.path().join("backups"), "  []\n");

        let up = Engine::new(&config, Arc::new(MountedConnector::new(temp.path()))).unwrap();
        assert!(up.check_connection().await.is_ok());

        let down = Engine::new(
            &config,
            Arc::new(MountedConnector::new(temp.path().join("unmounted"))),
        )
        .unwrap();
        assert!(matches!(
            down.check_connection().await,
            Err(Error::ConnectionRefused { .. })
        ));
    }
}
