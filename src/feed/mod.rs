//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - HTTP GET with an identifying User-Agent and linear-delay retry
//! - [`parser`] - Adapter from `feed-rs` documents to the owned [`Feed`] model
//!
//! ```ignore
//! use rss2email::feed::Fetcher;
//!
//! let fetcher = Fetcher::new()?;
//! let feed = fetcher.fetch_feed("https://blog.example.com/index.rss").await?;
//! println!("{} has {} items", feed.title, feed.items.len());
//! ```

mod fetcher;
mod parser;

pub use fetcher::{FetchError, Fetcher, RetryPolicy, AGENT};
pub use parser::{parse_feed, Feed, FeedItem};
