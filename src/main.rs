use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use newsmill::cache::{CacheArbiter, DiskCache, ResponseHandle};
use newsmill::config::Config;
use newsmill::feed::{FeedSession, FetchSettings, SessionState, SourceRegistry};

/// Get the config directory path (~/.config/newsmill/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsmill"))
}

#[derive(Parser, Debug)]
#[command(
    name = "newsmill",
    about = "Scrape a news source into a normalized RSS 2.0 document"
)]
struct Args {
    /// Source id (see --list-sources)
    #[arg(required_unless_present = "list_sources")]
    source: Option<String>,

    /// Section within the source, or the feed URL for the generic `rss` source
    #[arg(long)]
    section: Option<String>,

    /// Maximum number of items to write
    #[arg(long, value_name = "N")]
    max_results: Option<usize>,

    /// Only include articles published after this RFC 3339 timestamp
    #[arg(long, value_name = "TIMESTAMP")]
    last_updated: Option<DateTime<Utc>>,

    /// Write items from the index only, without fetching article pages
    #[arg(long)]
    no_full_article: bool,

    /// Keep images in article bodies
    #[arg(long)]
    include_images: bool,

    /// Also store the source's icon in the disk cache
    #[arg(long)]
    cache_icon: bool,

    /// Config file (defaults to ~/.config/newsmill/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// List known sources and exit
    #[arg(long)]
    list_sources: bool,
}

impl Args {
    fn settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            section: self.section.clone(),
            last_updated: self.last_updated,
            max_results: self.max_results.unwrap_or(defaults.max_results),
            include_images: self.include_images,
            fetch_full_article: !self.no_full_article,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let mut registry = SourceRegistry::builtin();
    registry.extend(config.sources.iter().cloned());

    if args.list_sources {
        for source in registry.iter() {
            println!("{:<12} {}", source.id, source.name);
        }
        return Ok(());
    }

    let id = args.source.as_deref().unwrap_or_default();
    let source = registry
        .get(id)
        .cloned()
        .with_context(|| format!("Unknown source '{id}' (try --list-sources)"))?;
    let client = config.http_client()?;

    if args.cache_icon {
        cache_icon(&config, client.clone(), &source.id, source.icon_url.as_deref()).await;
    }

    let session = FeedSession::new(client, Arc::new(source), config.max_response_bytes);
    session.start(args.settings());

    let state = tokio::select! {
        state = session.wait() => state,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, canceling session");
            session.cancel();
            session.wait().await
        }
    };

    std::io::stdout()
        .write_all(&session.result())
        .context("Failed to write feed to stdout")?;

    match state {
        SessionState::Ready | SessionState::Canceled => Ok(()),
        _ => anyhow::bail!("{}", session.error_string()),
    }
}

async fn cache_icon(config: &Config, client: reqwest::Client, id: &str, icon_url: Option<&str>) {
    let (Some(root), Some(url)) = (&config.cache_dir, icon_url) else {
        tracing::warn!("--cache-icon needs cache_dir in the config and a source icon");
        return;
    };

    let arbiter = CacheArbiter::new(DiskCache::new(client, config.max_response_bytes));
    let (handle, pending) = ResponseHandle::channel();
    arbiter.get_cached_resource(root.join(id), url, handle);

    match pending.recv().await {
        Some(response) if response.is_success() => {
            tracing::info!(url = %url, bytes = response.body.len(), "Cached source icon");
        }
        _ => tracing::warn!(url = %url, "Failed to cache source icon"),
    }
}
