//! Turning feed items into email.
//!
//! [`Notifier`] renders one MIME message per recipient from the
//! [`Template`] and hands it to the [`Transport`] chosen at construction:
//!
//! 1. SMTP, when `SMTP_HOST`, `SMTP_USERNAME` and `SMTP_PASSWORD` are all set.
//! 2. The local mail agent (`/usr/sbin/sendmail`) otherwise.

mod delivery;
mod template;

pub use delivery::{DeliveryError, SendmailTransport, SmtpTransport, Strategy, Transport};
pub use template::{to_quoted_printable, Context, Template, TemplateError};

use crate::config::MailConfig;
use crate::feed::{Feed, FeedItem};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Empty recipient address, did you not set up a recipient?")]
    NoRecipients,

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("Failed to send to {recipient}: {source}")]
    Delivery {
        recipient: String,
        #[source]
        source: DeliveryError,
    },

    #[error("Failed to set up mail transport: {0}")]
    Transport(#[source] DeliveryError),
}

/// Renders and sends notifications for feed items.
pub struct Notifier {
    template: Template,
    transport: Box<dyn Transport>,
}

impl Notifier {
    /// Load the template (or its override at `template_path`) and pick the
    /// delivery strategy from `mail`.
    pub fn from_config(template_path: &Path, mail: &MailConfig) -> Result<Self, EmailError> {
        let template = Template::load(template_path)?;
        let strategy = Strategy::select(mail);
        let transport = strategy.transport(mail).map_err(EmailError::Transport)?;
        tracing::debug!(strategy = ?strategy, "Selected mail delivery");
        Ok(Self::new(template, transport))
    }

    pub fn new(template: Template, transport: Box<dyn Transport>) -> Self {
        Self {
            template,
            transport,
        }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Render the message `item` would produce for `recipient`.
    pub fn compose(
        &self,
        feed: &Feed,
        item: &FeedItem,
        recipient: &str,
        text: &str,
        html: &str,
    ) -> Result<Vec<u8>, EmailError> {
        let context = Context::new(feed, item, recipient, text, html);
        Ok(self.template.render(&context)?)
    }

    /// Send `item` to every address in turn.
    ///
    /// Each recipient gets its own message with itself as sender. The first
    /// failure stops the batch; recipients after it are not attempted.
    pub async fn send(
        &self,
        feed: &Feed,
        item: &FeedItem,
        addresses: &[String],
        text: &str,
        html: &str,
    ) -> Result<(), EmailError> {
        if addresses.is_empty() {
            return Err(EmailError::NoRecipients);
        }

        for address in addresses {
            let message = self.compose(feed, item, address, text, html)?;
            self.transport
                .deliver(address, &message)
                .await
                .map_err(|source| EmailError::Delivery {
                    recipient: address.clone(),
                    source,
                })?;
            tracing::info!(
                recipient = %address,
                item = %item.title,
                transport = self.transport.name(),
                "Sent notification"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Records every delivery; fails for addresses listed in `reject`.
    #[derive(Clone, Default)]
    struct Recorder {
        sent: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        reject: Vec<String>,
    }

    #[async_trait]
    impl Transport for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn deliver(&self, recipient: &str, message: &[u8]) -> Result<(), DeliveryError> {
            if self.reject.iter().any(|r| r == recipient) {
                return Err(DeliveryError::InvalidAddress(recipient.to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), message.to_vec()));
            Ok(())
        }
    }

    fn sample() -> (Feed, FeedItem) {
        let item = FeedItem {
            title: "Release 1.0".into(),
            link: "https://example.com/release".into(),
            ..Default::default()
        };
        let feed = Feed {
            title: "Example".into(),
            link: "https://example.com/".into(),
            items: vec![item.clone()],
        };
        (feed, item)
    }

    fn addresses(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_recipients_rejected_before_io() {
        let recorder = Recorder::default();
        let notifier = Notifier::new(Template::embedded(), Box::new(recorder.clone()));
        let (feed, item) = sample();

        let err = notifier.send(&feed, &item, &[], "t", "h").await.unwrap_err();
        assert!(matches!(err, EmailError::NoRecipients));
        assert!(recorder.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_recipient_gets_own_message() {
        let recorder = Recorder::default();
        let notifier = Notifier::new(Template::embedded(), Box::new(recorder.clone()));
        let (feed, item) = sample();

        notifier
            .send(&feed, &item, &addresses(&["a@example.com", "b@example.com"]), "t", "h")
            .await
            .unwrap();

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "a@example.com");
        let body = String::from_utf8(sent[1].1.clone()).unwrap();
        assert!(body.starts_with("From: b@example.com\nTo: b@example.com\n"));
    }

    #[tokio::test]
    async fn test_first_failure_stops_batch() {
        let recorder = Recorder {
            reject: vec!["b@example.com".into()],
            ..Default::default()
        };
        let notifier = Notifier::new(Template::embedded(), Box::new(recorder.clone()));
        let (feed, item) = sample();

        let err = notifier
            .send(
                &feed,
                &item,
                &addresses(&["a@example.com", "b@example.com", "c@example.com"]),
                "t",
                "h",
            )
            .await
            .unwrap_err();

        match &err {
            EmailError::Delivery { recipient, .. } => assert_eq!(recipient, "b@example.com"),
            e => panic!("Expected Delivery error, got {:?}", e),
        }
        assert!(err.to_string().contains("b@example.com"));

        let sent = recorder.sent.lock().unwrap();
        let recipients: Vec<_> = sent.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(recipients, vec!["a@example.com"]);
    }

    #[cfg(unix)]
    mod strategy {
        use super::*;
        use crate::config::SmtpSettings;
        use pretty_assertions::assert_eq;
        use secrecy::SecretString;
        use std::os::unix::fs::PermissionsExt;

        /// A sendmail stand-in that records its arguments and input under `dir`.
        fn recording_agent(dir: &Path) -> std::path::PathBuf {
            let program = dir.join("sendmail");
            std::fs::write(
                &program,
                format!(
                    "#!/bin/sh\nprintf '%s\\n' \"$@\" > '{args}'\ncat > '{stdin}'\n",
                    args = dir.join("args").display(),
                    stdin = dir.join("stdin").display(),
                ),
            )
            .unwrap();
            std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
            program
        }

        fn mail(password: Option<&str>, sendmail_path: std::path::PathBuf) -> MailConfig {
            MailConfig {
                smtp: SmtpSettings {
                    host: Some("mail.example.com".into()),
                    port: None,
                    username: Some("bob".into()),
                    password: password.map(|p| SecretString::from(p.to_string())),
                },
                sendmail_path,
            }
        }

        #[tokio::test]
        async fn test_incomplete_smtp_settings_deliver_through_local_agent() {
            let dir = tempfile::tempdir().unwrap();
            let agent = recording_agent(dir.path());
            let notifier =
                Notifier::from_config(&dir.path().join("email.tmpl"), &mail(None, agent)).unwrap();
            assert_eq!(notifier.transport_name(), "sendmail");

            let (feed, item) = sample();
            notifier
                .send(&feed, &item, &addresses(&["me@example.com"]), "plain", "<p>rich</p>")
                .await
                .unwrap();

            assert_eq!(
                std::fs::read_to_string(dir.path().join("args")).unwrap(),
                "-i\n-f\nme@example.com\nme@example.com\n"
            );
            let message = std::fs::read_to_string(dir.path().join("stdin")).unwrap();
            assert!(message.starts_with("From: me@example.com\nTo: me@example.com\n"));
            assert!(message.contains("Subject: [rss2email] Release 1.0"));
        }

        #[tokio::test]
        async fn test_complete_smtp_settings_bypass_local_agent() {
            let dir = tempfile::tempdir().unwrap();
            let agent = recording_agent(dir.path());
            let notifier =
                Notifier::from_config(&dir.path().join("email.tmpl"), &mail(Some("hunter2"), agent))
                    .unwrap();

            assert_eq!(notifier.transport_name(), "smtp");
            assert!(!dir.path().join("args").exists());
        }
    }
}
