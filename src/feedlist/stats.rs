use crate::feed::Feed;
use chrono::{DateTime, Utc};

/// One-line summary of a feed, e.g. `"3 entries, aged 1-10 days"`.
///
/// Ages are whole days between each item's publish time and `now`. If any
/// item has no publish time the age range is dropped and only the count is
/// reported. An empty feed reports just `"0 entries"`.
pub fn describe(feed: &Feed, now: DateTime<Utc>) -> String {
    let count = feed.items.len();
    let noun = if count == 1 { "entry" } else { "entries" };
    let info = format!("{} {}", count, noun);

    let mut newest = i64::MAX;
    let mut oldest = i64::MIN;
    for item in &feed.items {
        let Some(published) = item.published else {
            return info;
        };
        let age = (now - published).num_days();
        newest = newest.min(age);
        oldest = oldest.max(age);
    }

    if count == 0 {
        return info;
    }
    format!("{}, aged {}-{} days", info, newest, oldest)
}
