//! Watch RSS/Atom feeds and deliver new items as email.
//!
//! - [`feedlist`] - The comment-preserving subscription file
//! - [`feed`] - Fetching (with retry) and parsing feeds
//! - [`emailer`] - Template rendering and SMTP/sendmail delivery
//! - [`poll`] - A single fetch-and-notify cycle
//! - [`config`] - Settings resolved once at startup

pub mod config;
pub mod emailer;
pub mod feed;
pub mod feedlist;
pub mod poll;
pub mod util;
