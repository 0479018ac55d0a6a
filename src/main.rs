use chrono::{DateTime, Duration, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use postcache::blog::{CachedBlogClient, Post, PostDraft};
use postcache::cache::{CacheResult, CacheSource};
use postcache::config::Config;

#[derive(Parser, Debug)]
#[command(name = "postcache")]
#[command(about = "Offline-friendly command line client for a blog backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/postcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List posts
  List {
    /// Bypass stored results and refetch
    #[arg(long)]
    reload: bool,
    /// Fetch bodies too, not just metadata
    #[arg(long)]
    full: bool,
  },
  /// Show a single post
  Show {
    slug: String,
    #[arg(long)]
    reload: bool,
    /// Print the post as markdown with frontmatter
    #[arg(long)]
    raw: bool,
  },
  /// Create or update a post from a markdown file with frontmatter
  Publish {
    file: PathBuf,
    /// Slug to publish under (default: frontmatter `slug`, then file name)
    #[arg(long)]
    slug: Option<String>,
  },
  /// Delete a post
  Delete { slug: String },
  /// Show what is stored locally
  Status,
  /// Drop everything stored locally
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _guard = init_tracing(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let client = CachedBlogClient::new(&config)?;

  match args.command {
    Command::List { reload, full } => {
      let reload = u64::from(reload);
      let result = if full {
        client.list_posts(reload).await?
      } else {
        client.list_metadata(reload).await?
      };
      print_banner(&result);
      for post in &result.data {
        print_summary(post);
      }
    }
    Command::Show { slug, reload, raw } => {
      let result = client.get_post(&slug, u64::from(reload)).await?;
      print_banner(&result);
      if raw {
        print!("{}", result.data.to_markdown());
      } else {
        print_post(&result.data);
      }
    }
    Command::Publish { file, slug } => {
      let draft = read_draft(&file, slug)?;
      let post = client.publish(&draft).await?;
      println!(
        "Published {} (updated {})",
        post.slug(),
        post.metadata.updated_at.format("%Y-%m-%d %H:%M")
      );
    }
    Command::Delete { slug } => {
      client.delete_post(&slug).await?;
      println!("Deleted {}", slug);
    }
    Command::Status => {
      let status = client.status();
      println!("posts:    {} ({} with body)", status.records, status.complete);
      match status.written_at {
        Some(at) => println!(
          "written:  {} ({} ago)",
          at.format("%Y-%m-%d %H:%M:%S UTC"),
          format_age(status.age)
        ),
        None => println!("written:  never"),
      }
      println!("ttl:      {}", format_age(status.ttl));
      println!("policy:   {:?}", status.policy);
    }
    Command::Clear => {
      client.clear_cache();
      println!("Cache cleared");
    }
  }

  Ok(())
}

/// Log to a daily file in the data directory, and to stderr with `--verbose`.
fn init_tracing(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("postcache")
    .join("logs");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "postcache.log"));

  // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
  let default_filter = if verbose { "postcache=debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .init();

  Ok(guard)
}

fn read_draft(file: &Path, slug: Option<String>) -> Result<PostDraft> {
  let raw = std::fs::read_to_string(file)
    .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
  let stem = file.file_stem().and_then(|s| s.to_str());

  let draft = PostDraft::from_markdown(&raw, stem)?;
  match slug {
    Some(slug) => Ok(draft.with_slug(slug)?),
    None => Ok(draft),
  }
}

fn print_banner<T>(result: &CacheResult<T>) {
  if let Some(banner) = banner(result.source, result.cached_at, Utc::now()) {
    println!("{}", banner);
  }
}

/// Marker for data that did not come straight from the network.
fn banner(
  source: CacheSource,
  cached_at: Option<DateTime<Utc>>,
  now: DateTime<Utc>,
) -> Option<String> {
  let age = cached_at.map(|at| format_age(now - at)).unwrap_or_else(|| "?".to_string());
  match source {
    CacheSource::Network => None,
    CacheSource::Cache => Some(format!("[cached {} ago]", age)),
    CacheSource::Offline => Some(format!("[OFFLINE] network unavailable, showing data cached {} ago", age)),
  }
}

fn format_age(age: Duration) -> String {
  let secs = age.num_seconds().max(0);
  match secs {
    0..=59 => format!("{}s", secs),
    60..=3599 => format!("{}m", secs / 60),
    3600..=86_399 => format!("{}h {}m", secs / 3600, secs % 3600 / 60),
    _ => format!("{}d", secs / 86_400),
  }
}

fn print_summary(post: &Post) {
  let meta = &post.metadata;
  println!(
    "{:<32} {}  {}{}",
    meta.slug,
    meta.updated_at.format("%Y-%m-%d"),
    meta.title,
    meta
      .category
      .as_deref()
      .map(|c| format!(" [{}]", c))
      .unwrap_or_default()
  );
}

fn print_post(post: &Post) {
  let meta = &post.metadata;
  println!("{}", meta.title);
  println!(
    "created {}  updated {}",
    meta.created_at.format("%Y-%m-%d"),
    meta.updated_at.format("%Y-%m-%d %H:%M")
  );
  if let Some(ref author) = meta.author {
    println!("by {}", author);
  }
  println!();
  match post.content {
    Some(ref content) => println!("{}", content),
    None => println!("(no body stored)"),
  }
}
