use crate::feed::{Feed, FeedItem};
use crate::util::single_line;
use minijinja::Environment;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TEMPLATE_NAME: &str = "email.tmpl";
const DEFAULT_TEMPLATE: &str = include_str!("email.tmpl");

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template error: {0}")]
    Render(#[from] minijinja::Error),
}

/// Values available to the email template, one set per item and recipient.
///
/// Fields that the default template places in headers are collapsed onto a
/// single line. `rss_feed` and `rss_item` keep the values as parsed.
#[derive(Debug, Serialize)]
pub struct Context<'a> {
    /// Website link of the feed.
    pub feed: String,
    pub feed_title: String,
    pub to: String,
    pub from: String,
    /// Item title.
    pub subject: String,
    /// Item link.
    pub link: String,
    /// Quoted-printable plain-text body.
    pub text: String,
    /// Quoted-printable HTML body.
    pub html: String,
    /// Whole feed and item, for fields not mapped above.
    pub rss_feed: &'a Feed,
    pub rss_item: &'a FeedItem,
}

impl<'a> Context<'a> {
    /// Build the context for sending `item` to `recipient`.
    ///
    /// Both bodies are quoted-printable encoded here, unconditionally; the
    /// template must declare that transfer encoding. HTML entities in
    /// `html_body` are decoded first.
    pub fn new(
        feed: &'a Feed,
        item: &'a FeedItem,
        recipient: &str,
        text_body: &str,
        html_body: &str,
    ) -> Self {
        let recipient = single_line(recipient);
        Self {
            feed: single_line(&feed.link),
            feed_title: single_line(&feed.title),
            from: recipient.clone(),
            to: recipient,
            subject: single_line(&item.title),
            link: single_line(&item.link),
            text: to_quoted_printable(text_body),
            html: to_quoted_printable(&html_escape::decode_html_entities(html_body)),
            rss_feed: feed,
            rss_item: item,
        }
    }
}

/// Quoted-printable encode `s`, with line breaks normalised to CRLF first
/// so they survive as hard breaks.
pub fn to_quoted_printable(s: &str) -> String {
    let normalised = s.replace("\r\n", "\n").replace('\n', "\r\n");
    quoted_printable::encode_to_str(normalised)
}

/// The email template: the embedded default, or the user's override file.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
}

impl Template {
    pub fn embedded() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Use the file at `override_path` if it exists, the embedded default otherwise.
    ///
    /// An override that exists but cannot be read, or does not compile, is an
    /// error rather than a silent fallback.
    pub fn load(override_path: &Path) -> Result<Self, TemplateError> {
        let template = match std::fs::read_to_string(override_path) {
            Ok(source) => {
                tracing::debug!(path = %override_path.display(), "Using template override");
                Self { source }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::embedded(),
            Err(source) => {
                return Err(TemplateError::Read {
                    path: override_path.to_path_buf(),
                    source,
                })
            }
        };

        template.validate()?;
        Ok(template)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render a complete MIME message for `context`.
    pub fn render(&self, context: &Context<'_>) -> Result<Vec<u8>, TemplateError> {
        let env = environment();
        let rendered = env
            .template_from_named_str(TEMPLATE_NAME, &self.source)?
            .render(context)?;
        Ok(rendered.into_bytes())
    }

    fn validate(&self) -> Result<(), TemplateError> {
        environment().template_from_named_str(TEMPLATE_NAME, &self.source)?;
        Ok(())
    }
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.add_function("quoteprintable", |s: String| to_quoted_printable(&s));
    env.add_filter("quoteprintable", |s: String| to_quoted_printable(&s));
    env
}
