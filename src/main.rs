use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rss2email::config::Config;
use rss2email::emailer::Notifier;
use rss2email::feed::Fetcher;
use rss2email::feedlist::FeedList;
use rss2email::poll::{self, SeenFile};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "rss2email",
    about = "Watch RSS/Atom feeds and deliver new items as email"
)]
struct Args {
    /// Feed list to use instead of ~/.rss2email/feeds
    #[arg(long, global = true, value_name = "FILE")]
    feeds: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to one or more feeds
    Add {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Unsubscribe from one or more feeds
    #[command(alias = "del")]
    Delete {
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Show subscribed feeds
    List {
        /// Print the whole file, annotated with live feed statistics
        #[arg(short, long)]
        verbose: bool,
    },

    /// Fetch every feed once and email the items not seen before
    Cron {
        /// Addresses to notify
        #[arg(required = true)]
        recipients: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(path) = args.feeds {
        config.feeds_path = path;
    }

    let fetcher = Fetcher::new().context("Failed to build HTTP client")?;
    let mut list = FeedList::open(&config.feeds_path, fetcher.clone())
        .context("Failed to load feed list")?;

    match args.command {
        Command::Add { urls } => {
            let errors = list.add(&urls).await;
            for e in &errors {
                eprintln!("{}", e);
            }
            list.save().context("Failed to save feed list")?;
            if !errors.is_empty() {
                anyhow::bail!("{} of {} feeds could not be added", errors.len(), urls.len());
            }
        }

        Command::Delete { urls } => {
            for url in &urls {
                list.delete(url);
            }
            list.save().context("Failed to save feed list")?;
        }

        Command::List { verbose: false } => {
            for url in list.entries() {
                println!("{}", url);
            }
        }

        Command::List { verbose: true } => {
            let mut out = Vec::new();
            let report = list
                .write_all(&mut out, true)
                .await
                .context("Failed to render feed list")?;
            print!("{}", String::from_utf8_lossy(&out));
            for soft in &report.soft_errors {
                eprintln!("# no statistics for {}: {}", soft.url, soft.error);
            }
        }

        Command::Cron { recipients } => {
            let mail = config
                .mail_from_env()
                .context("Failed to load mail settings")?;
            let notifier = Notifier::from_config(&config.template_path, &mail)
                .context("Failed to set up mailer")?;
            let mut seen = SeenFile::open(&config.seen_path).with_context(|| {
                format!("Failed to read state from {}", config.seen_path.display())
            })?;

            let result = poll::run_once(
                &list.entries(),
                &fetcher,
                &mut seen,
                &notifier,
                &recipients,
            )
            .await;

            // Persist what was delivered even if a later send failed.
            seen.save().with_context(|| {
                format!("Failed to write state to {}", seen.path().display())
            })?;

            let report = result.context("Failed to send notifications")?;
            for (url, e) in &report.failed_feeds {
                eprintln!("{}: {}", url, e);
            }
            tracing::info!(
                sent = report.sent,
                failed_feeds = report.failed_feeds.len(),
                transport = notifier.transport_name(),
                "Poll cycle complete"
            );
        }
    }

    Ok(())
}
