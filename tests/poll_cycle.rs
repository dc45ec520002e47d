//! End-to-end poll cycle: mock feed server in, recorded mail out.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rss2email::emailer::{DeliveryError, Notifier, Template, Transport};
use rss2email::feed::{Fetcher, RetryPolicy};
use rss2email::poll::{self, MemorySeen, SeenFile, SeenStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Default)]
struct Outbox {
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl Outbox {
    fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for Outbox {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn deliver(&self, recipient: &str, message: &[u8]) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            String::from_utf8_lossy(message).into_owned(),
        ));
        Ok(())
    }
}

const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Example News</title>
  <link>https://news.example/</link>
  <item>
    <guid>post-1</guid>
    <title>First post</title>
    <link>https://news.example/1</link>
    <description>&lt;p&gt;Hello &amp;amp; welcome&lt;/p&gt;</description>
  </item>
  <item>
    <guid>post-2</guid>
    <title>Second post</title>
    <link>https://news.example/2</link>
    <description>Plain body</description>
  </item>
</channel></rss>"#;

fn fetcher() -> Fetcher {
    Fetcher::with_client(
        reqwest::Client::new(),
        RetryPolicy::new(2, Duration::from_millis(1)),
    )
}

async fn news_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_new_items_are_sent_once() {
    let server = news_server().await;
    let urls = vec![format!("{}/rss", server.uri())];
    let outbox = Outbox::default();
    let notifier = Notifier::new(Template::embedded(), Box::new(outbox.clone()));
    let recipients = vec!["me@example.com".to_string()];
    let mut seen = MemorySeen::default();

    let first = poll::run_once(&urls, &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    assert_eq!(first.sent, 2);
    assert!(first.failed_feeds.is_empty());

    let second = poll::run_once(&urls, &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    assert_eq!(second.sent, 0);

    let messages = outbox.messages();
    assert_eq!(messages.len(), 2);
    let (to, body) = &messages[0];
    assert_eq!(to, "me@example.com");
    assert!(body.contains("Subject: [rss2email] First post"));
    assert!(body.contains("X-RSS-Feed: "));
    assert!(body.contains("X-RSS-Feed-Title: Example News"));
    assert!(body.contains("Content-Type: multipart/alternative"));
}

#[tokio::test]
async fn test_failed_feed_does_not_stop_cycle() {
    let server = news_server().await;
    let gone = format!("{}/gone", server.uri());
    let urls = vec![gone.clone(), format!("{}/rss", server.uri())];
    let outbox = Outbox::default();
    let notifier = Notifier::new(Template::embedded(), Box::new(outbox.clone()));
    let mut seen = MemorySeen::default();

    let report = poll::run_once(
        &urls,
        &fetcher(),
        &mut seen,
        &notifier,
        &["me@example.com".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(report.sent, 2);
    assert_eq!(report.failed_feeds.len(), 1);
    assert_eq!(report.failed_feeds[0].0, gone);
}

#[tokio::test]
async fn test_no_recipients_marks_nothing_seen() {
    let server = news_server().await;
    let url = format!("{}/rss", server.uri());
    let notifier = Notifier::new(Template::embedded(), Box::new(Outbox::default()));
    let mut seen = MemorySeen::default();

    let result = poll::run_once(&[url.clone()], &fetcher(), &mut seen, &notifier, &[]).await;

    assert!(result.is_err());
    assert!(!seen.is_seen(&poll::seen_key(&url, "post-1")));

    let retry = poll::run_once(
        &[url],
        &fetcher(),
        &mut seen,
        &notifier,
        &["me@example.com".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(retry.sent, 2);
}

#[tokio::test]
async fn test_seen_file_persists_between_cycles() {
    let server = news_server().await;
    let urls = vec![format!("{}/rss", server.uri())];
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join(".rss2email").join("seen");
    let recipients = vec!["me@example.com".to_string()];

    let outbox = Outbox::default();
    let notifier = Notifier::new(Template::embedded(), Box::new(outbox.clone()));

    let mut seen = SeenFile::open(&state).unwrap();
    poll::run_once(&urls, &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    seen.save().unwrap();

    let mut reopened = SeenFile::open(&state).unwrap();
    let report = poll::run_once(&urls, &fetcher(), &mut reopened, &notifier, &recipients)
        .await
        .unwrap();

    assert_eq!(report.sent, 0);
    assert_eq!(outbox.messages().len(), 2);
}

#[tokio::test]
async fn test_items_gone_from_feed_are_forgotten() {
    let server = news_server().await;
    let url = format!("{}/rss", server.uri());
    let key = |id: &str| poll::seen_key(&url, id);
    let notifier = Notifier::new(Template::embedded(), Box::new(Outbox::default()));
    let recipients = vec!["me@example.com".to_string()];
    let mut seen = MemorySeen::default();
    seen.mark_seen(poll::seen_key("https://unsubscribed.example/rss", "old"));

    poll::run_once(&[url.clone()], &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    assert!(seen.is_seen(&key("post-1")));
    assert!(seen.is_seen(&key("post-2")));
    assert!(!seen.is_seen(&poll::seen_key("https://unsubscribed.example/rss", "old")));

    // The feed now only carries the second post.
    server.reset().await;
    let trimmed = FEED.replace(
        r#"<item>
    <guid>post-1</guid>
    <title>First post</title>
    <link>https://news.example/1</link>
    <description>&lt;p&gt;Hello &amp;amp; welcome&lt;/p&gt;</description>
  </item>"#,
        "",
    );
    assert_ne!(trimmed, FEED);
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(200).set_body_string(trimmed))
        .mount(&server)
        .await;

    let report = poll::run_once(&[url.clone()], &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    assert_eq!(report.sent, 0);
    assert!(!seen.is_seen(&key("post-1")));
    assert!(seen.is_seen(&key("post-2")));

    // An unreachable feed keeps what it had.
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/rss"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let report = poll::run_once(&[url.clone()], &fetcher(), &mut seen, &notifier, &recipients)
        .await
        .unwrap();
    assert_eq!(report.failed_feeds.len(), 1);
    assert!(seen.is_seen(&key("post-2")));
}
