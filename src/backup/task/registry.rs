use crate::backup::connect::RemoteClient;
use crate::backup::notifications::NotificationConfig;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::task::config::{normalize_destination, BackupTaskConfig};
use crate::backup::task::BackupTask;
use serde_yml::Mapping;
use std::path::Path;
use std::sync::Arc;

/// Every constructed task, in configuration order.
///
/// A task's index is its position here, assigned before its configuration is
/// validated so that errors can name it.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<BackupTask>>,
}

impl TaskRegistry {
    pub fn next_index(&self) -> usize {
        self.tasks.len()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Arc<BackupTask>] {
        &self.tasks
    }

    pub fn check_unique_destination(&self, index: usize, destination: &Path) -> Result<()> {
        let destination = normalize_destination(destination);
        match self
            .tasks
            .iter()
            .find(|t| t.config().destination == destination)
        {
            Some(other) => Err(Error::task_validation(
                index,
                format!(
                    "parameter 'destination' to be unique, {:?} is already used by {}",
                    destination,
                    other.identifier()
                ),
            )),
            None => Ok(()),
        }
    }

    /// Validates one raw `create-backups` entry and registers its task.
    pub fn register_raw(
        &mut self,
        raw: &Mapping,
        client: Arc<RemoteClient>,
        notifier: Arc<NotificationConfig>,
    ) -> Result<Arc<BackupTask>> {
        let config = BackupTaskConfig::from_mapping(self.next_index(), raw, self)?;
        self.register(config, client, notifier)
    }

    pub fn register(
        &mut self,
        config: BackupTaskConfig,
        client: Arc<RemoteClient>,
        notifier: Arc<NotificationConfig>,
    ) -> Result<Arc<BackupTask>> {
        let index = self.next_index();
        self.check_unique_destination(index, &config.destination)?;

        let task = Arc::new(BackupTask::new(index, config, client, notifier)?);
        tracing::debug!(
            "{} registered {} backup of {} to {:?}",
            task.identifier(),
            task.config().backup_type,
            task.config().origin,
            task.config().destination
        );
        self.tasks.push(task.clone());
        Ok(task)
    }
}
