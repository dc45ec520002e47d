//! Runtime configuration, resolved once at startup.
//!
//! Values come from the optional `~/.rss2email/config.toml` and the process
//! environment. `SMTP_*` environment variables take precedence over the file
//! and are only consulted when mail is about to be sent ([`Config::mail`]).
//! Nothing below this module reads the environment.
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Submission port used when `SMTP_PORT` is not set.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Local mail agent used when SMTP is not configured.
pub const DEFAULT_SENDMAIL: &str = "/usr/sbin/sendmail";

const STATE_DIR: &str = ".rss2email";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid SMTP_PORT value {0:?}")]
    InvalidPort(String),

    #[error("Unable to determine the home directory")]
    NoHome,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// On-disk shape of `config.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    feeds: Option<PathBuf>,
    template: Option<PathBuf>,
    sendmail: Option<PathBuf>,
    smtp: FileSmtp,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct FileSmtp {
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for FileSmtp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSmtp")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Settings for protocol-level (SMTP) delivery.
///
/// Custom Debug impl masks the password.
#[derive(Default)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

impl SmtpSettings {
    /// True when host, username and password are all present and non-empty.
    pub fn is_complete(&self) -> bool {
        let filled = |v: Option<&str>| v.is_some_and(|s| !s.is_empty());
        filled(self.host.as_deref())
            && filled(self.username.as_deref())
            && filled(self.password.as_ref().map(|p| p.expose_secret()))
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SMTP_PORT)
    }
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Everything the delivery layer needs to pick and drive a transport.
#[derive(Debug)]
pub struct MailConfig {
    pub smtp: SmtpSettings,
    pub sendmail_path: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp: SmtpSettings::default(),
            sendmail_path: PathBuf::from(DEFAULT_SENDMAIL),
        }
    }
}

/// Top-level application configuration.
///
/// Paths are resolved up front. Mail settings are resolved separately by
/// [`Config::mail`], so commands that never send mail are not affected by a
/// bad `SMTP_PORT`.
#[derive(Debug)]
pub struct Config {
    pub home: PathBuf,
    /// Subscription list, `~/.rss2email/feeds` by default.
    pub feeds_path: PathBuf,
    /// Template override, `~/.rss2email/email.tmpl` by default.
    pub template_path: PathBuf,
    /// Item keys already delivered.
    pub seen_path: PathBuf,
    pub sendmail_path: PathBuf,
    /// `[smtp]` table from the config file, before the environment is applied.
    file_smtp: FileSmtp,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Resolve configuration from the real process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve configuration using `env` as the source of environment values.
    ///
    /// The home directory is `HOME` when set and non-empty, otherwise the
    /// current user's record from the OS.
    pub fn resolve<F>(env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = env("HOME")
            .filter(|h| !h.is_empty())
            .map(PathBuf::from)
            .or_else(|| directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()))
            .ok_or(ConfigError::NoHome)?;

        let file = Self::load_file(&home.join(STATE_DIR).join("config.toml"))?;

        Ok(Self {
            feeds_path: file
                .feeds
                .unwrap_or_else(|| Self::state_file(&home, "feeds")),
            template_path: file
                .template
                .unwrap_or_else(|| Self::state_file(&home, "email.tmpl")),
            seen_path: Self::state_file(&home, "seen"),
            sendmail_path: file
                .sendmail
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SENDMAIL)),
            file_smtp: file.smtp,
            home,
        })
    }

    /// Default location of a file inside `~/.rss2email/`.
    pub fn state_file(home: &Path, name: &str) -> PathBuf {
        home.join(STATE_DIR).join(name)
    }

    /// Mail settings from the real process environment.
    pub fn mail_from_env(&self) -> Result<MailConfig, ConfigError> {
        self.mail(|key| std::env::var(key).ok())
    }

    /// Mail settings: `SMTP_*` values from `env` over the file's `[smtp]` table.
    /// Empty values count as unset.
    pub fn mail<F>(&self, env: F) -> Result<MailConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).filter(|v| !v.is_empty());
        let file = &self.file_smtp;

        let port = match var("SMTP_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidPort(raw.clone()))?,
            ),
            None => file.port,
        };

        let smtp = SmtpSettings {
            host: var("SMTP_HOST").or_else(|| file.host.clone()),
            port,
            username: var("SMTP_USERNAME").or_else(|| file.username.clone()),
            password: var("SMTP_PASSWORD")
                .or_else(|| file.password.clone())
                .map(SecretString::from),
        };

        Ok(MailConfig {
            smtp,
            sendmail_path: self.sendmail_path.clone(),
        })
    }

    /// Read `config.toml`.
    ///
    /// - Missing file → defaults
    /// - Empty file → defaults
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(FileConfig::default());
            }
            Err(e) => return Err(io_err(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(FileConfig::default());
            }
            Err(e) => return Err(io_err(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(FileConfig::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = ["feeds", "template", "sendmail", "smtp"];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: FileConfig = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
