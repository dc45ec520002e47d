//! The subscription list.
//!
//! Feeds live in a plain text file, one URL per line. Blank lines and lines
//! starting with `#` are kept as comments attached to the URL that follows
//! them, so annotations written by hand survive add/delete cycles:
//!
//! ```text
//!
//! # Example Blog
//! https://blog.example.com/index.rss
//! ```
//!
//! Changes made through [`FeedList::add`] and [`FeedList::delete`] stay in
//! memory until [`FeedList::save`] is called.

mod stats;

pub use stats::describe;

use crate::feed::{FetchError, Fetcher};
use crate::util::single_line;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const COMMENT_MARKER: char = '#';

/// How many feeds are fetched at once when annotating with statistics.
const STATS_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum FeedListError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error writing to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{url}: not added, {source}")]
    NotAdded {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("{0:?}: not a feed URL")]
    InvalidUrl(String),
}

/// A feed URL plus the comment lines that preceded it in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    url: String,
    comments: Vec<String>,
}

/// A feed whose statistics could not be gathered during a verbose write.
#[derive(Debug)]
pub struct SoftError {
    pub url: String,
    pub error: FetchError,
}

/// Outcome of [`FeedList::write_all`]. The write itself succeeded; these are
/// the annotations that had to be left out.
#[derive(Debug, Default)]
pub struct WriteReport {
    pub soft_errors: Vec<SoftError>,
}

pub struct FeedList {
    path: PathBuf,
    entries: Vec<Entry>,
    /// Comments after the last URL.
    trailing: Vec<String>,
    fetcher: Fetcher,
}

impl FeedList {
    /// Load the list stored at `path`. A missing file yields an empty list.
    pub fn open(path: impl Into<PathBuf>, fetcher: Fetcher) -> Result<Self, FeedListError> {
        let path = path.into();

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No feed list found, starting empty");
                String::new()
            }
            Err(source) => return Err(FeedListError::Read { path, source }),
        };

        let (entries, trailing) = parse_entries(&content);
        tracing::debug!(path = %path.display(), feeds = entries.len(), "Loaded feed list");

        Ok(Self {
            path,
            entries,
            trailing,
            fetcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Subscribed URLs in file order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscribe to each of `urls` that is not already present.
    ///
    /// Every new URL is fetched once so its title can be recorded as a
    /// comment. A URL that cannot be fetched is left out and reported; the
    /// rest are still added. An empty result means everything succeeded.
    pub async fn add<S: AsRef<str>>(&mut self, urls: &[S]) -> Vec<FeedListError> {
        let mut seen: HashSet<String> = self.entries.iter().map(|e| e.url.clone()).collect();
        let mut errors = Vec::new();

        for url in urls {
            let url = url.as_ref().trim();
            if !is_storable(url) {
                errors.push(FeedListError::InvalidUrl(url.to_string()));
                continue;
            }
            if !seen.insert(url.to_string()) {
                tracing::debug!(url = %url, "Already subscribed");
                continue;
            }

            let feed = match self.fetcher.fetch_feed(url).await {
                Ok(feed) => feed,
                Err(source) => {
                    errors.push(FeedListError::NotAdded {
                        url: url.to_string(),
                        source,
                    });
                    continue;
                }
            };

            let mut comments = vec![String::new()];
            let title = single_line(&feed.title);
            if !title.is_empty() {
                comments.push(format!("{} {}", COMMENT_MARKER, title));
            }

            tracing::info!(url = %url, title = %title, "Subscribed");
            self.entries.push(Entry {
                url: url.to_string(),
                comments,
            });
        }

        errors
    }

    /// Remove `url`. Unknown URLs are ignored.
    pub fn delete(&mut self, url: &str) {
        self.entries.retain(|e| e.url != url);
    }

    /// Write the list back to its file, creating the parent directory if needed.
    ///
    /// The file is truncated and rewritten in place; a failure part-way
    /// through can leave it incomplete, and is reported as
    /// [`FeedListError::Write`].
    pub fn save(&self) -> Result<(), FeedListError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| FeedListError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let write_err = |source: std::io::Error| FeedListError::Write {
            path: self.path.clone(),
            source,
        };

        let file = std::fs::File::create(&self.path).map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        self.write_entries(&mut writer, &[]).map_err(write_err)?;
        writer.flush().map_err(write_err)?;

        tracing::debug!(path = %self.path.display(), feeds = self.entries.len(), "Saved feed list");
        Ok(())
    }

    /// Write every entry with its comments to `writer`.
    ///
    /// With `verbose`, each feed is fetched and a statistics comment such as
    /// `# 3 entries, aged 1-10 days` is placed just above its URL. Feeds that
    /// cannot be fetched simply get no statistics line; they are listed in the
    /// returned [`WriteReport`].
    pub async fn write_all<W: Write>(
        &self,
        writer: &mut W,
        verbose: bool,
    ) -> std::io::Result<WriteReport> {
        let mut report = WriteReport::default();
        let mut annotations = Vec::new();

        if verbose {
            let fetched: Vec<_> = stream::iter(self.entries.iter())
                .map(|entry| async move {
                    (
                        entry.url.as_str(),
                        self.fetcher.fetch_feed(&entry.url).await,
                    )
                })
                .buffered(STATS_CONCURRENCY)
                .collect()
                .await;

            let now = Utc::now();
            for (url, result) in fetched {
                match result {
                    Ok(feed) => annotations.push(Some(describe(&feed, now))),
                    Err(error) => {
                        tracing::warn!(url = %url, error = %error, "Skipping statistics for feed");
                        report.soft_errors.push(SoftError {
                            url: url.to_string(),
                            error,
                        });
                        annotations.push(None);
                    }
                }
            }
        }

        self.write_entries(writer, &annotations)?;
        Ok(report)
    }

    fn write_entries<W: Write>(
        &self,
        writer: &mut W,
        annotations: &[Option<String>],
    ) -> std::io::Result<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            for line in &entry.comments {
                writeln!(writer, "{}", line)?;
            }
            if let Some(Some(info)) = annotations.get(i) {
                writeln!(writer, "{} {}", COMMENT_MARKER, info)?;
            }
            writeln!(writer, "{}", entry.url)?;
        }
        for line in &self.trailing {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FeedList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedList")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// A URL can be stored only if it reads back as the same single record.
fn is_storable(url: &str) -> bool {
    !url.is_empty()
        && !url.starts_with(COMMENT_MARKER)
        && !url.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Split file content into entries. Later duplicates of a URL are dropped.
fn parse_entries(content: &str) -> (Vec<Entry>, Vec<String>) {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut comments = Vec::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with(COMMENT_MARKER) {
            comments.push(line.to_string());
            continue;
        }

        let entry = Entry {
            url: line.to_string(),
            comments: std::mem::take(&mut comments),
        };
        if seen.insert(entry.url.clone()) {
            entries.push(entry);
        }
    }

    (entries, comments)
}
