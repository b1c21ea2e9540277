use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::{Path, PathBuf};

use feedbook::config::{CacheBackend, Config};
use feedbook::pipeline::Converter;
use feedbook::preview;
use feedbook::storage::{KeyValueStore, MemoryStore, SqliteStore};
use feedbook::util::slugify;

/// Get the config directory path (~/.config/feedbook/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedbook"))
}

/// `explicit` if given, else `file_name` inside the config directory.
///
/// The config directory is only looked up when needed, so an explicit path
/// works without `HOME`.
fn path_or_config_default(
    explicit: Option<&Path>,
    file_name: &str,
    config_dir: impl FnOnce() -> Result<PathBuf>,
) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_dir()?.join(file_name)),
    }
}

/// Write `content` to `dst` via a temp file and rename, so `dst` is never
/// left half-written.
fn atomic_write(dst: &Path, content: &[u8]) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = dst.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut temp_file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions or disk space",
                temp_path.display()
            )
        })?;

    temp_file.write_all(content).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to write to temporary file '{}': disk may be full",
            temp_path.display()
        )
    })?;

    temp_file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to sync temporary file '{}' to disk", temp_path.display())
    })?;
    drop(temp_file);

    #[cfg(windows)]
    if dst.exists() {
        std::fs::remove_file(dst).with_context(|| {
            let _ = std::fs::remove_file(&temp_path);
            format!("Failed to remove existing '{}' before replace", dst.display())
        })?;
    }

    std::fs::rename(&temp_path, dst).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}': check permissions",
            temp_path.display(),
            dst.display()
        )
    })?;

    Ok(())
}

#[derive(Parser, Debug)]
#[command(name = "feedbook", about = "Convert an RSS feed into an EPUB book")]
struct Args {
    /// Feed URL (http:// is assumed when no scheme is given)
    url: String,

    /// Output file (defaults to the feed title with an .epub extension)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Config file (defaults to ~/.config/feedbook/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the feed's items as JSON instead of converting
    #[arg(long, conflicts_with = "preview")]
    list: bool,

    /// Print one sanitized item as JSON instead of converting
    #[arg(long, value_name = "INDEX")]
    preview: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path =
        path_or_config_default(args.config.as_deref(), "config.toml", get_config_dir)?;
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let client = reqwest::Client::builder()
        .user_agent(concat!("feedbook/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    match config.cache_backend {
        CacheBackend::Memory => {
            let store = MemoryStore::new(config.cache_capacity);
            let converter = Converter::from_config(client, store, &config);
            run(&args, &converter).await
        }
        CacheBackend::Sqlite => {
            let cache_path =
                path_or_config_default(config.cache_path.as_deref(), "cache.db", get_config_dir)?;
            if let Some(parent) = cache_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create cache directory {}", parent.display())
                })?;
            }
            let cache_path_str = cache_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in cache path"))?;

            let store = SqliteStore::open(cache_path_str)
                .await
                .with_context(|| format!("Failed to open cache at {}", cache_path.display()))?;
            match store.evict_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Evicted expired cache entries"),
                Err(e) => tracing::warn!(error = %e, "Failed to evict expired cache entries"),
            }

            let converter = Converter::from_config(client, store, &config);
            let result = run(&args, &converter).await;
            converter.cache().store().close().await;
            result
        }
    }
}

async fn run<S: KeyValueStore>(args: &Args, converter: &Converter<S>) -> Result<()> {
    if args.list || args.preview.is_some() {
        let feed = converter
            .feed(&args.url)
            .await
            .with_context(|| format!("Failed to load feed {}", args.url))?;

        let json = match args.preview {
            Some(index) => serde_json::to_string_pretty(&preview::preview_item(&feed, index)?)?,
            None => serde_json::to_string_pretty(&preview::list_items(&feed))?,
        };
        println!("{json}");
        return Ok(());
    }

    let output = match &args.output {
        Some(path) => path.clone(),
        None => {
            // Warms the cache, so the conversion below does not refetch
            let feed = converter
                .feed(&args.url)
                .await
                .with_context(|| format!("Failed to load feed {}", args.url))?;
            PathBuf::from(format!("{}.epub", slugify(&feed.title)))
        }
    };

    let bytes = converter
        .convert(&args.url)
        .await
        .with_context(|| format!("Failed to convert {}", args.url))?;
    atomic_write(&output, &bytes)?;

    println!("Wrote {} ({} bytes)", output.display(), bytes.len());
    Ok(())
}
