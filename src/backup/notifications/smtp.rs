use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use validator::Validate;

/// Configuration for SMTP email notifications
///
/// Supports SSL, StartTLS, and unsecured connections. The password is kept
/// in a `RedactedString` so it never reaches the log.
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[builder(into)]
    host: String,
    #[builder(into)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    #[builder(into)]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[builder(into)]
    password: RedactedString,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    StartTls,
}

impl Notification for SmtpNotificationConfig {
    #[named]
    fn send<D1: Display, D2: Display>(&self, topic: D1, msg: D2) -> Result<()> {
        tracing::debug!(
            "Sending smtp notification from {:?} to {:?}",
            self.from,
            self.to
        );
        let email = self
            .to
            .iter()
            .fold(Message::builder(), |email, send_to| email.to(send_to.clone()))
            .from(self.from.clone())
            .subject(format!("{}", topic))
            .header(ContentType::TEXT_PLAIN)
            .body(format!("{}", msg))
            .map_err(Error::from)
            .with_msg(format!(
                "Fail to build notification email from {:?} to {:?}",
                self.from, self.to
            ))
            .with_debug_object_and_fn_name(self.host.clone(), function_path!())?;

        let creds = Credentials::new(self.username.clone(), self.password.inner().to_string());

        let mailer = match self.smtp_mode {
            SmtpMode::Unsecured => Ok(SmtpTransport::builder_dangerous(self.host.as_str())),
            SmtpMode::Ssl => SmtpTransport::relay(self.host.as_str()),
            SmtpMode::StartTls => SmtpTransport::starttls_relay(self.host.as_str()),
        }
        .map_err(Error::from)
        .with_msg(format!(
            "Failed to build smtp client for host: {:?} with mode {:?}",
            self.host, self.smtp_mode
        ))?
        .credentials(creds)
        .build();

        let response = mailer
            .send(&email)
            .map_err(Error::from)
            .with_debug_object_and_fn_name(self.host.clone(), function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            let errors = response
                .message()
                .map(|m| Error::SmtpSend(m.to_owned()))
                .collect_vec();
            Err(errors.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: String, to: Vec<Mailbox>) -> SmtpNotificationConfig {
        SmtpNotificationConfig::builder()
            .host(host)
            .smtp_mode(SmtpMode::Unsecured)
            .from("backup@example.com".parse::<Mailbox>().unwrap())
            .to(to)
            .username("testuser")
            .password(RedactedString::from("testpass"))
            .build()
    }

    #[test]
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    fn test_smtp_notification_send() {
        if std::env::var("CI").is_ok() {
            return;
        }

        let server = maik::MockServer::builder().no_verify_credentials().build();
        let config = config(
            format!("{}:{}", server.host(), server.port()),
            vec!["admin@example.com".parse::<Mailbox>().unwrap()],
        );

        server.start();
        std::thread::sleep(std::time::Duration::from_millis(100));

        let result = config.send("Backup Manager", "[task #1] Finished backup task");

        std::thread::sleep(std::time::Duration::from_millis(200));

        if result.is_ok() {
            let assertion = maik::MailAssertion::new()
                .recipients_are(["admin@example.com"])
                .body_is("[task #1] Finished backup task");
            assert!(server.assert(assertion));
        }
    }

    #[test]
    fn test_smtp_notification_validation() {
        let valid = config(
            "smtp.example.com".into(),
            vec!["admin@example.com".parse::<Mailbox>().unwrap()],
        );
        assert!(valid.validate().is_ok());

        let invalid = config("smtp.example.com".into(), vec![]);
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_smtp_config_from_yaml() {
        let yaml = r#"
host: smtp.example.com
smtp_mode: StartTls
from: backup@example.com
to: [admin@example.com]
username: backup
password: app-password
"#;
        let config: SmtpNotificationConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.smtp_mode(), &SmtpMode::StartTls);
        assert_eq!(config.to().len(), 1);
        assert_eq!(config.password().inner(), "app-password");
    }
}
