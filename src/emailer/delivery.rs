//! Getting a rendered message to its recipient.
//!
//! Two transports exist: SMTP submission via `lettre`, and handing the
//! message to a local mail agent (`sendmail -i -f <addr> <addr>`). Which one
//! is used is decided once, up front, by [`Strategy::select`]; a failing SMTP
//! send never falls back to sendmail.
use crate::config::{MailConfig, SmtpSettings};
use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Invalid recipient address {0:?}")]
    InvalidAddress(String),

    #[error("SMTP settings incomplete: host, username and password are required")]
    SmtpIncomplete,

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Failed to start {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to mail agent pipe: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("Waiting for mail agent to terminate failed: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Mail agent exited unsuccessfully: {0}")]
    Exit(ExitStatus),
}

/// Something that can put a complete message in front of one recipient.
///
/// The recipient doubles as envelope sender.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    async fn deliver(&self, recipient: &str, message: &[u8]) -> Result<(), DeliveryError>;
}

/// The two mutually exclusive ways of sending mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Smtp,
    Sendmail,
}

impl Strategy {
    /// SMTP when host, username and password are all configured, sendmail otherwise.
    pub fn select(mail: &MailConfig) -> Self {
        if mail.smtp.is_complete() {
            Strategy::Smtp
        } else {
            Strategy::Sendmail
        }
    }

    /// Construct the transport for this strategy.
    pub fn transport(self, mail: &MailConfig) -> Result<Box<dyn Transport>, DeliveryError> {
        Ok(match self {
            Strategy::Smtp => Box::new(SmtpTransport::new(&mail.smtp)?),
            Strategy::Sendmail => Box::new(SendmailTransport::new(mail.sendmail_path.clone())),
        })
    }
}

fn parse_address(recipient: &str) -> Result<Address, DeliveryError> {
    // A leading dash would be taken as an option by the mail agent.
    if recipient.starts_with('-') {
        return Err(DeliveryError::InvalidAddress(recipient.to_string()));
    }
    recipient
        .parse()
        .map_err(|_| DeliveryError::InvalidAddress(recipient.to_string()))
}

/// Rewrite every line ending as `ending`.
fn with_line_endings(message: &[u8], ending: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(message.len() + message.len() / 32);
    let mut i = 0;
    while i < message.len() {
        match message[i] {
            b'\r' if message.get(i + 1) == Some(&b'\n') => {
                out.extend_from_slice(ending);
                i += 2;
            }
            b'\n' => {
                out.extend_from_slice(ending);
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

// ============================================================================
// SMTP
// ============================================================================

/// SMTP submission with STARTTLS and PLAIN authentication.
pub struct SmtpTransport {
    inner: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpTransport {
    pub fn new(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        if !settings.is_complete() {
            return Err(DeliveryError::SmtpIncomplete);
        }
        let (Some(host), Some(username), Some(password)) = (
            settings.host.as_deref(),
            settings.username.as_deref(),
            settings.password.as_ref(),
        ) else {
            return Err(DeliveryError::SmtpIncomplete);
        };

        let inner = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            .port(settings.port())
            .credentials(Credentials::new(
                username.to_string(),
                password.expose_secret().to_string(),
            ))
            .authentication(vec![Mechanism::Plain])
            .build();

        Ok(Self {
            inner,
            host: format!("{}:{}", host, settings.port()),
        })
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, recipient: &str, message: &[u8]) -> Result<(), DeliveryError> {
        let address = parse_address(recipient)?;
        let envelope = Envelope::new(Some(address.clone()), vec![address])
            .map_err(|_| DeliveryError::InvalidAddress(recipient.to_string()))?;

        self.inner
            .send_raw(&envelope, &with_line_endings(message, b"\r\n"))
            .await?;

        tracing::debug!(recipient = %recipient, server = %self.host, "Delivered via SMTP");
        Ok(())
    }
}

// ============================================================================
// Local mail agent
// ============================================================================

/// Pipes the message into a sendmail-compatible program.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    program: PathBuf,
}

impl SendmailTransport {
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }
}

#[async_trait]
impl Transport for SendmailTransport {
    fn name(&self) -> &'static str {
        "sendmail"
    }

    async fn deliver(&self, recipient: &str, message: &[u8]) -> Result<(), DeliveryError> {
        parse_address(recipient)?;

        // kill_on_drop covers every early return below
        let mut child = Command::new(&self.program)
            .arg("-i")
            .arg("-f")
            .arg(recipient)
            .arg(recipient)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DeliveryError::Spawn {
                path: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let written = stdin.write_all(&with_line_endings(message, b"\n")).await;
            // Dropping the handle closes the pipe so the agent sees EOF.
            drop(stdin);
            if let Err(e) = written {
                tracing::warn!(recipient = %recipient, error = %e, "Failed to write to mail agent pipe");
                if let Err(kill_err) = child.kill().await {
                    tracing::warn!(error = %kill_err, "Failed to stop mail agent");
                }
                return Err(DeliveryError::Stdin(e));
            }
        }

        if let Some(mut stdout) = child.stdout.take() {
            let mut output = Vec::new();
            if let Err(e) = stdout.read_to_end(&mut output).await {
                tracing::warn!(recipient = %recipient, error = %e, "Error reading mail agent output");
            } else if !output.is_empty() {
                tracing::debug!(output = %String::from_utf8_lossy(&output).trim(), "Mail agent output");
            }
        }

        let status = child.wait().await.map_err(|e| {
            tracing::warn!(recipient = %recipient, error = %e, "Waiting for mail agent failed");
            DeliveryError::Wait(e)
        })?;
        if !status.success() {
            return Err(DeliveryError::Exit(status));
        }

        tracing::debug!(recipient = %recipient, program = %self.program.display(), "Handed to mail agent");
        Ok(())
    }
}
