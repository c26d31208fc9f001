//! Fire-and-forget notifications about task progress.
//!
//! Delivery failures are logged and never fail a backup run.

use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::result_error::result::Result;
use derive_more::From;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use validator::{Validate, ValidationErrors};

pub mod smtp;

pub static NOTIFICATION_TITLE: &str = "Backup Manager";

#[derive(Clone, Default, From, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum NotificationConfig {
    /// Write notifications into the process log.
    #[default]
    Log,
    Smtp(SmtpNotificationConfig),
}

impl Validate for NotificationConfig {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Self::Log => Ok(()),
            Self::Smtp(inner) => inner.validate(),
        }
    }
}

impl Notification for NotificationConfig {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        match self {
            Self::Log => {
                tracing::info!("[{}] {}", topic, msg);
                Ok(())
            }
            Self::Smtp(inner) => inner.send(topic, msg),
        }
    }
}

pub trait Notification {
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()>;
}

/// Sends `msg` under [`NOTIFICATION_TITLE`] without holding up the caller.
///
/// SMTP delivery moves to the blocking pool when a tokio runtime is
/// available, and the returned handle tracks it. Log notifications, and any
/// send outside a runtime, happen inline.
pub fn dispatch(
    notifier: &Arc<NotificationConfig>,
    identifier: &str,
    msg: String,
) -> Option<JoinHandle<()>> {
    let inline = matches!(**notifier, NotificationConfig::Log);
    let notifier = notifier.clone();
    let identifier = identifier.to_string();
    let send = move || {
        if let Err(e) = notifier.send(NOTIFICATION_TITLE, &msg) {
            tracing::warn!("{} Sending notification failed:\n{}", identifier, e);
        }
    };

    match tokio::runtime::Handle::try_current() {
        Ok(handle) if !inline => Some(handle.spawn_blocking(send)),
        _ => {
            send();
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_log() {
        let config: NotificationConfig = serde_yml::from_str("type: log").unwrap();
        assert!(matches!(config, NotificationConfig::Log));
        assert!(matches!(NotificationConfig::default(), NotificationConfig::Log));
    }

    #[test]
    fn test_log_notification_never_fails() {
        assert!(NotificationConfig::Log.send(NOTIFICATION_TITLE, "hello").is_ok());
    }

    fn unreachable_smtp() -> Arc<NotificationConfig> {
        Arc::new(NotificationConfig::Smtp(
            serde_yml::from_str(
                "host: 127.0.0.1\nsmtp_mode: Unsecured\nfrom: backup@example.com\nto: [admin@example.com]\nusername: backup\npassword: secret\n",
            )
            .unwrap(),
        ))
    }

    #[test]
    fn test_dispatch_without_runtime_sends_inline() {
        assert!(dispatch(&unreachable_smtp(), "[task #1]", "done".into()).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_offloads_smtp() {
        let handle = dispatch(&unreachable_smtp(), "[task #1]", "done".into());

        // delivery failure is logged on the blocking pool, not returned
        handle.expect("smtp send should be offloaded").await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatch_logs_inline() {
        let notifier = Arc::new(NotificationConfig::Log);
        assert!(dispatch(&notifier, "[task #1]", "done".into()).is_none());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_yml::from_str::<NotificationConfig>("type: desktop");
        assert!(result.is_err());
    }
}
