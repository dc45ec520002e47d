use chrono::{DateTime, Utc};
use feed_rs::model;
use feed_rs::parser;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A parsed RSS/Atom document, reduced to the fields notifications use.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Feed {
    pub title: String,
    /// Website link of the feed (not the feed's own URL).
    pub link: String,
    pub items: Vec<FeedItem>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedItem {
    /// Entry id as published by the feed; may be empty.
    pub id: String,
    pub title: String,
    pub link: String,
    /// Publish time, falling back to the entry's update time.
    pub published: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub content: Option<String>,
}

impl FeedItem {
    /// HTML body for notifications: full content if present, else the summary.
    pub fn html(&self) -> &str {
        self.content
            .as_deref()
            .or(self.summary.as_deref())
            .unwrap_or_default()
    }

    /// Stable identity used to remember which items were already delivered.
    ///
    /// The feed's own id when it has one, otherwise a SHA-256 over link,
    /// title and publish time.
    pub fn key(&self) -> String {
        let id = self.id.trim();
        if !id.is_empty() {
            return id.to_string();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.link.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.title.as_bytes());
        if let Some(published) = self.published {
            hasher.update(b"\n");
            hasher.update(published.timestamp().to_be_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<Feed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            FeedItem {
                id: entry.id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                link,
                published: entry.published.or(entry.updated),
                summary: entry.summary.map(|s| s.content),
                content: entry.content.and_then(|c| c.body),
            }
        })
        .collect();

    Ok(Feed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: site_link(&feed.links),
        items,
    })
}

/// Prefer the `alternate` (or rel-less) link; RSS `<link>` lands there too.
fn site_link(links: &[model::Link]) -> String {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}
