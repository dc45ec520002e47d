//! One poll cycle: fetch every subscribed feed, mail the items not seen before.
//!
//! Scheduling is left to the caller (cron, a systemd timer, ...). Which items
//! count as new is decided by a [`SeenStore`].
use crate::emailer::{EmailError, Notifier};
use crate::feed::{Feed, FetchError, Fetcher};
use crate::util::single_line;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

/// How many feeds are fetched at once.
const FETCH_CONCURRENCY: usize = 8;

/// Wrap width for the plain-text rendering of an item.
const TEXT_WIDTH: usize = 80;

/// Remembers which items have already been delivered.
pub trait SeenStore {
    fn is_seen(&self, key: &str) -> bool;
    fn mark_seen(&mut self, key: String);
    /// Forget every key for which `keep` returns false.
    fn retain<F: FnMut(&str) -> bool>(&mut self, keep: F);
}

/// In-memory store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySeen {
    keys: HashSet<String>,
}

impl SeenStore for MemorySeen {
    fn is_seen(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn mark_seen(&mut self, key: String) {
        self.keys.insert(key);
    }

    fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.keys.retain(|k| keep(k));
    }
}

/// Seen keys kept one per line in a text file.
#[derive(Debug)]
pub struct SeenFile {
    path: PathBuf,
    keys: HashSet<String>,
    order: Vec<String>,
}

impl SeenFile {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let mut store = Self {
            path,
            keys: HashSet::new(),
            order: Vec::new(),
        };
        for line in content.lines().filter(|l| !l.is_empty()) {
            store.mark_seen(line.to_string());
        }
        Ok(store)
    }

    /// Write all keys via a temporary file and rename, so a crash never
    /// leaves a truncated store behind.
    pub fn save(&self) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let result = (|| {
            let mut file = std::fs::File::create(&temp_path)?;
            for key in &self.order {
                writeln!(file, "{}", key)?;
            }
            file.sync_all()?;
            std::fs::rename(&temp_path, &self.path)
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
        }
        result
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SeenStore for SeenFile {
    fn is_seen(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn mark_seen(&mut self, key: String) {
        if self.keys.insert(key.clone()) {
            self.order.push(key);
        }
    }

    fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.order.retain(|k| keep(k));
        self.keys = self.order.iter().cloned().collect();
    }
}

/// What happened during [`run_once`].
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Items delivered to every recipient.
    pub sent: usize,
    /// Feeds that could not be fetched; they are retried next cycle.
    pub failed_feeds: Vec<(String, FetchError)>,
}

/// Key identifying `item_key` from the feed at `url`.
pub fn seen_key(url: &str, item_key: &str) -> String {
    format!("{}\t{}", url, single_line(item_key))
}

/// Plain-text rendering of an HTML body, wrapped for reading in a mail client.
pub fn plain_text(html: &str) -> String {
    html2text::from_read(html.as_bytes(), TEXT_WIDTH)
}

/// Fetch every feed in `urls` and mail each unseen item to `recipients`.
///
/// Feeds are fetched concurrently; `urls` is only read. Sending is
/// sequential. An item is marked seen only once it has been sent to every
/// recipient, and the first send failure ends the cycle.
///
/// After a complete cycle the store only keeps keys of items still present
/// in their feed. Keys of feeds that failed to fetch are kept as they were;
/// keys of feeds no longer in `urls` are dropped.
pub async fn run_once<S: SeenStore>(
    urls: &[String],
    fetcher: &Fetcher,
    seen: &mut S,
    notifier: &Notifier,
    recipients: &[String],
) -> Result<CycleReport, EmailError> {
    let mut report = CycleReport::default();
    let mut live: HashSet<String> = HashSet::new();

    let fetched: Vec<(&String, Result<Feed, FetchError>)> = stream::iter(urls)
        .map(|url| async move { (url, fetcher.fetch_feed(url).await) })
        .buffered(FETCH_CONCURRENCY)
        .collect()
        .await;

    for (url, result) in fetched {
        let feed = match result {
            Ok(feed) => feed,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Skipping feed this cycle");
                report.failed_feeds.push((url.clone(), e));
                continue;
            }
        };

        for item in &feed.items {
            let key = seen_key(url, &item.key());
            live.insert(key.clone());
            if seen.is_seen(&key) {
                continue;
            }

            let html = item.html();
            let text = plain_text(html);
            notifier.send(&feed, item, recipients, &text, html).await?;

            seen.mark_seen(key);
            report.sent += 1;
        }
    }

    let unreachable: HashSet<&str> = report
        .failed_feeds
        .iter()
        .map(|(url, _)| url.as_str())
        .collect();
    seen.retain(|key| {
        live.contains(key)
            || key
                .split_once('\t')
                .is_some_and(|(url, _)| unreachable.contains(url))
    });

    Ok(report)
}
