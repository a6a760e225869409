//! Feed cleaner CLI entry point.
//!
//! Runs a stored rule configuration over one fetched feed body, the way the
//! feed fetcher hook would.

use anyhow::{bail, Context, Result};
use clap::Parser;
use feed_cleaner::{CleanerError, FeedCleaner, Settings};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "feed-cleaner")]
#[command(
    author,
    version,
    about = "Rewrite fetched RSS/Atom feeds with regex, XPath and encoding rules"
)]
struct Args {
    /// Rules file path (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long, env = "FEED_CLEANER_CONFIG")]
    config: Option<PathBuf>,

    /// URL the feed was fetched from
    #[arg(short, long)]
    url: Option<String>,

    /// Feed body to clean (defaults to stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Where to write the cleaned feed (defaults to stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Feed identifier attached to log events
    #[arg(long, default_value = "0")]
    feed_id: String,

    /// Report notice-level diagnostics (extended logging)
    #[arg(long, env = "FEED_CLEANER_DEBUG")]
    debug: bool,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"[
  {
    "URL": "news.example.com",
    "type": "regex",
    "pattern": "/<img[^>]+tracking-pixel[^>]*>/i",
    "replacement": ""
  },
  {
    "URL_re": "/^https?:\\/\\/blog\\.example\\.(com|org)\\//",
    "type": "xpath_regex",
    "xpath": "//item/title",
    "pattern": "/^\\[Sponsored\\]\\s*/",
    "replacement": ""
  },
  {
    "URL": "legacy-cms.example.net",
    "type": "utf-8"
  }
]"#;
    println!("{}", example);
}

async fn load_cleaner(path: &Path, settings: Settings) -> Result<FeedCleaner> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let cleaner = if path.extension().is_some_and(|e| e == "yaml" || e == "yml") {
        FeedCleaner::from_yaml(&content, settings)?
    } else {
        FeedCleaner::from_json(&content, settings)?
    };
    Ok(cleaner)
}

async fn read_feed(input: Option<&Path>) -> Result<Vec<u8>> {
    match input {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read feed: {}", path.display())),
        None => {
            let mut body = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut body)
                .await
                .context("Failed to read feed from stdin")?;
            Ok(body)
        }
    }
}

async fn write_feed(output: Option<&Path>, body: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, body)
            .await
            .with_context(|| format!("Failed to write feed: {}", path.display())),
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(body)
                .await
                .context("Failed to write feed to stdout")?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout carries the feed
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    // Print example config if requested
    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let Some(config_path) = &args.config else {
        bail!("No configuration given (use --config or FEED_CLEANER_CONFIG)");
    };
    let settings = Settings { debug: args.debug };
    let cleaner = load_cleaner(config_path, settings).await?;

    // Validate only if requested
    if args.validate {
        return match cleaner.validate() {
            Ok(_) => Ok(()),
            Err(CleanerError::InvalidRules(problems)) => {
                for problem in &problems {
                    error!(config = %config_path.display(), "{}", problem);
                }
                bail!("{} problem(s) found in {}", problems.len(), config_path.display())
            }
            Err(e) => Err(e.into()),
        };
    }

    let Some(url) = &args.url else {
        bail!("--url is required to select the rules that apply");
    };

    let feed = read_feed(args.input.as_deref()).await?;
    info!(
        url = %url,
        feed_id = %args.feed_id,
        bytes = feed.len(),
        "Cleaning feed"
    );

    let cleaned = cleaner.hook_feed_fetched(&feed, url, &args.feed_id);

    write_feed(args.output.as_deref(), &cleaned).await?;
    info!(bytes = cleaned.len(), "Feed written");

    Ok(())
}
