//! CLI binary for pagecast.
//!
//! A thin shim over the library crate: maps flags to `IngestConfig` /
//! `StorageConfig`, wires the JSON-file catalog and session stores, and prints
//! results.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagecast::reader::{
    resolve, Control, HttpPageFetcher, LoadStatus, PageFetcher, SwipeDirection,
};
use pagecast::{
    BlobStore, CatalogManifestSource, EpisodeMetadata, EpisodeRepository, HttpBlobStore,
    HttpManifestSource, IngestConfig, IngestProgressCallback, IngestState, JsonFileEpisodeRepository,
    JsonFileSessionStore, ManifestSource, MemoryBlobStore, MemoryEpisodeRepository, OutputFormat,
    PlayableManifest, ProgressCallback, Publisher, ReaderDriver, ReaderEvent, ReaderView,
    ReadingSessionStore, Stage, StorageConfig,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders pipeline states as a spinner that turns into a `k/N` bar during
/// the page stages, with one log line per retry or failed page.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(Self::spinner_style());
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS)
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }

    fn page_stage(&self, prefix: &'static str, done: usize, total: usize) {
        if done == 0 {
            self.bar.set_style(Self::bar_style());
            self.bar.set_length(total as u64);
            self.bar.set_prefix(prefix);
        }
        self.bar.set_position(done as u64);
    }

    fn spinner(&self, prefix: &'static str, msg: &str) {
        self.bar.set_style(Self::spinner_style());
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg.to_string());
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_state_change(&self, state: &IngestState) {
        match state {
            IngestState::Pending => self.spinner("Preparing", "validating input…"),
            IngestState::Rasterizing => self.spinner("Rendering", "rasterising pages…"),
            IngestState::Transcoding { done, total } => {
                self.page_stage("Encoding", *done, *total)
            }
            IngestState::Uploading { done, total } => {
                self.page_stage("Uploading", *done, *total)
            }
            IngestState::BuildingManifest => self.spinner("Manifest", "building…"),
            IngestState::PublishingManifest => self.spinner("Manifest", "uploading…"),
            IngestState::Completed => self.bar.finish_and_clear(),
            IngestState::Failed { stage, .. } => {
                self.bar.finish_and_clear();
                eprintln!("{} {} failed", red("✘"), bold(&stage.to_string()));
            }
        }
    }

    fn on_page_retry(&self, stage: Stage, page_num: usize, attempt: u32, error: &str) {
        let what = if page_num == 0 {
            "manifest".to_string()
        } else {
            format!("page {page_num}")
        };
        self.bar.println(format!(
            "  {} {} {}  {}",
            cyan("↻"),
            stage,
            what,
            dim(&format!("retry {attempt}: {}", truncate(error, 80))),
        ));
    }

    fn on_page_error(&self, stage: Stage, page_num: usize, total: usize, error: &str) {
        self.bar.println(format!(
            "  {} {} page {:>3}/{:<3}  {}",
            red("✗"),
            stage,
            page_num,
            total,
            red(&truncate(error, 80)),
        ));
    }
}

/// Truncate very long error messages to keep output tidy.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Publish a chapter (id generated as ep-<unix millis>-<hex>)
  pagecast publish chapter-1.pdf --title "Chapter 1" --tags action,drama

  # Try the pipeline without uploading anything
  pagecast publish chapter-1.pdf --title "Chapter 1" --dry-run

  # Catalog
  pagecast list
  pagecast list --category drama
  pagecast categories
  pagecast show ep-1718000000000-3f9a1c
  pagecast delete ep-1718000000000-3f9a1c

  # Read in the terminal: n/p next/previous, l/r tap left/right, + like, b bookmark, q quit
  pagecast read ep-1718000000000-3f9a1c

ENVIRONMENT VARIABLES:
  PAGECAST_STORAGE_URL      Upload endpoint of the blob store
  PAGECAST_STORAGE_API_KEY  Sent as X-API-Key
  PAGECAST_STORAGE_TIMEOUT  HTTP timeout in seconds (default 30)
  PAGECAST_PDFIUM_PATH      Path to libpdfium (file or directory)
  PAGECAST_CATALOG          Catalog JSON file
  PAGECAST_SESSIONS         Reading-progress JSON file
"#;

/// Publish PDFs as paginated image episodes and read them back.
#[derive(Parser, Debug)]
#[command(
    name = "pagecast",
    version,
    about = "Publish PDFs as paginated image episodes and read them back",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Episode catalog file.
    #[arg(long, global = true, env = "PAGECAST_CATALOG", default_value = "pagecast-catalog.json")]
    catalog: PathBuf,

    /// Reading-progress file.
    #[arg(long, global = true, env = "PAGECAST_SESSIONS", default_value = "pagecast-sessions.json")]
    sessions: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PAGECAST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PAGECAST_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rasterise, transcode and upload a PDF, then record the episode.
    Publish(PublishArgs),
    /// List episodes, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
        /// Only published episodes, as readers see them.
        #[arg(long)]
        published: bool,
        /// Only episodes in this category (implies --published).
        #[arg(long)]
        category: Option<String>,
    },
    /// List the categories of published episodes.
    Categories,
    /// Resolve an episode's manifest and print it as JSON.
    Show {
        episode_id: String,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Remove an episode from the catalog (stored assets are kept).
    Delete { episode_id: String },
    /// Read an episode page by page from the terminal.
    Read {
        episode_id: String,
        #[command(flatten)]
        remote: RemoteArgs,
    },
}

#[derive(Args, Debug)]
struct RemoteArgs {
    /// Resolve through `GET {base}/{id}/mpd` instead of the local catalog.
    #[arg(long, env = "PAGECAST_API_URL")]
    remote: Option<String>,

    /// HTTP timeout in seconds for manifest and page fetches.
    #[arg(long, env = "PAGECAST_STORAGE_TIMEOUT", default_value_t = 30)]
    fetch_timeout: u64,
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// PDF file to publish.
    pdf: PathBuf,

    /// Episode title.
    #[arg(long)]
    title: String,

    /// Episode id; generated as ep-<unix millis>-<hex> when omitted.
    #[arg(long)]
    episode_id: Option<String>,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long, default_value = "")]
    category: String,

    /// Comma-separated tags.
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Estimated reading time in minutes.
    #[arg(long, default_value_t = 5)]
    reading_time: u32,

    /// Run the whole pipeline against an in-memory store and catalog.
    #[arg(long)]
    dry_run: bool,

    /// Blob store upload endpoint.
    #[arg(long, env = "PAGECAST_STORAGE_URL")]
    storage_url: Option<String>,

    /// Blob store API key.
    #[arg(long, env = "PAGECAST_STORAGE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Blob store HTTP timeout in seconds.
    #[arg(long, env = "PAGECAST_STORAGE_TIMEOUT", default_value_t = 30)]
    storage_timeout: u64,

    /// Reject documents with more pages than this.
    #[arg(long, env = "PAGECAST_MAX_PAGES", default_value_t = 200)]
    max_pages: usize,

    /// Longest edge of delivered images, in pixels.
    #[arg(long, env = "PAGECAST_MAX_EDGE", default_value_t = 1600)]
    max_edge: u32,

    /// Encoder quality (1–100).
    #[arg(long, env = "PAGECAST_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Delivered image format.
    #[arg(long, env = "PAGECAST_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// Concurrent transcode/upload operations.
    #[arg(short, long, env = "PAGECAST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per page after the first failure.
    #[arg(long, env = "PAGECAST_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Limit for a single upload attempt, in seconds.
    #[arg(long, env = "PAGECAST_UPLOAD_TIMEOUT", default_value_t = 30)]
    upload_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PAGECAST_PDF_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to libpdfium (file or directory).
    #[arg(long, env = "PAGECAST_PDFIUM_PATH")]
    pdfium_path: Option<PathBuf>,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Print the publish output as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    WebpLossless,
    Png,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => OutputFormat::Jpeg,
            FormatArg::WebpLossless => OutputFormat::WebpLossless,
            FormatArg::Png => OutputFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar covers what a publish run needs to say; library INFO
    // logs would only interleave with it.
    let bar_active = matches!(&cli.command, Command::Publish(p) if !p.no_progress && !p.json);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let catalog = Arc::new(JsonFileEpisodeRepository::new(&cli.catalog));

    match &cli.command {
        Command::Publish(args) => publish(&cli, args, catalog).await,
        Command::List {
            json,
            published,
            category,
        } => {
            let filter = (*published || category.is_some()).then_some(category.as_deref());
            list(catalog.as_ref(), *json, filter).await
        }
        Command::Categories => {
            for category in catalog.categories().await.context("Failed to read catalog")? {
                println!("{category}");
            }
            Ok(())
        }
        Command::Show { episode_id, remote } => {
            let manifest = resolve_manifest(catalog, episode_id, remote).await?;
            let json = serde_json::to_string_pretty(manifest.manifest())
                .context("Failed to serialise manifest")?;
            println!("{json}");
            Ok(())
        }
        Command::Delete { episode_id } => {
            let removed = catalog
                .delete(episode_id)
                .await
                .with_context(|| format!("Failed to delete '{episode_id}'"))?;
            if !cli.quiet {
                eprintln!(
                    "{} Deleted {} {}",
                    green("✔"),
                    bold(&removed.episode_id),
                    dim(&format!("({})", removed.metadata.title))
                );
            }
            Ok(())
        }
        Command::Read { episode_id, remote } => read(&cli, catalog, episode_id, remote).await,
    }
}

async fn publish(
    cli: &Cli,
    args: &PublishArgs,
    catalog: Arc<JsonFileEpisodeRepository>,
) -> Result<()> {
    let document = tokio::fs::read(&args.pdf)
        .await
        .with_context(|| format!("Failed to read {:?}", args.pdf))?;

    let progress: Option<ProgressCallback> = if !cli.quiet && !args.no_progress && !args.json {
        Some(CliProgressCallback::new() as Arc<dyn IngestProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress)?;

    let (store, repository): (Arc<dyn BlobStore>, Arc<dyn EpisodeRepository>) = if args.dry_run {
        (
            Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStore>,
            Arc::new(MemoryEpisodeRepository::new()) as Arc<dyn EpisodeRepository>,
        )
    } else {
        let Some(ref endpoint) = args.storage_url else {
            bail!("No blob store configured: pass --storage-url or set PAGECAST_STORAGE_URL (or use --dry-run)");
        };
        let mut storage = StorageConfig::new(endpoint).with_timeout_secs(args.storage_timeout);
        if let Some(ref key) = args.api_key {
            storage = storage.with_api_key(key);
        }
        let store = HttpBlobStore::new(storage).context("Failed to set up blob store client")?;
        (Arc::new(store) as Arc<dyn BlobStore>, catalog as Arc<dyn EpisodeRepository>)
    };

    let metadata = EpisodeMetadata::new(&args.title)
        .with_description(&args.description)
        .with_category(&args.category)
        .with_tags(&args.tags)
        .with_reading_time(args.reading_time);

    let publisher = Publisher::with_pdfium(config, store, repository);
    let output = publisher
        .publish(&document, metadata, args.episode_id.clone())
        .await
        .context("Publishing failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        eprintln!(
            "{} {} published: {} pages  {}ms{}",
            green("✔"),
            bold(&output.episode.episode_id),
            output.stats.total_pages,
            output.stats.total_duration_ms,
            if args.dry_run { dim("  (dry run)") } else { String::new() },
        );
        eprintln!(
            "   {} bytes uploaded  /  {} retries",
            dim(&output.stats.bytes_uploaded.to_string()),
            dim(&output.stats.retries.to_string()),
        );
        println!("{}", output.manifest_url);
    }
    Ok(())
}

/// Map CLI args to `IngestConfig`.
fn build_config(args: &PublishArgs, progress: Option<ProgressCallback>) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .max_pages(args.max_pages)
        .max_edge_px(args.max_edge)
        .quality(args.quality)
        .format(args.format.into())
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .upload_timeout_secs(args.upload_timeout);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd);
    }
    if let Some(ref path) = args.pdfium_path {
        builder = builder.pdfium_library_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// `published` is `None` for the full catalog, `Some(category)` for the
/// reader-facing listing.
async fn list(
    catalog: &dyn EpisodeRepository,
    json: bool,
    published: Option<Option<&str>>,
) -> Result<()> {
    let episodes = match published {
        Some(category) => catalog.list_published(category).await,
        None => catalog.list().await,
    }
    .context("Failed to read catalog")?;
    if json {
        let out = serde_json::to_string_pretty(&episodes).context("Failed to serialise catalog")?;
        println!("{out}");
        return Ok(());
    }
    if episodes.is_empty() {
        eprintln!("{}", dim("No episodes published yet."));
        return Ok(());
    }
    for ep in episodes {
        println!(
            "{:<24} {:>4} pages  {}  {}",
            ep.episode_id,
            ep.page_count,
            dim(&ep.created_at.format("%Y-%m-%d %H:%M").to_string()),
            ep.metadata.title,
        );
    }
    Ok(())
}

async fn resolve_manifest(
    catalog: Arc<JsonFileEpisodeRepository>,
    episode_id: &str,
    remote: &RemoteArgs,
) -> Result<PlayableManifest> {
    let source: Box<dyn ManifestSource> = match remote.remote {
        Some(ref base) => Box::new(
            HttpManifestSource::new(base, remote.fetch_timeout)
                .context("Failed to set up HTTP client")?,
        ),
        None => {
            let storage = StorageConfig::from_env()
                .unwrap_or_else(|| StorageConfig::new(""))
                .with_timeout_secs(remote.fetch_timeout);
            let store = HttpBlobStore::new(storage).context("Failed to set up HTTP client")?;
            Box::new(CatalogManifestSource::new(catalog, Arc::new(store)))
        }
    };
    let manifest = resolve(source.as_ref(), episode_id)
        .await
        .with_context(|| format!("Cannot open episode '{episode_id}'"))?;
    Ok(manifest)
}

async fn read(
    cli: &Cli,
    catalog: Arc<JsonFileEpisodeRepository>,
    episode_id: &str,
    remote: &RemoteArgs,
) -> Result<()> {
    let manifest = resolve_manifest(catalog, episode_id, remote).await?;
    let fetcher: Arc<dyn PageFetcher> = Arc::new(
        HttpPageFetcher::new(remote.fetch_timeout).context("Failed to set up HTTP client")?,
    );
    let sessions = Arc::new(JsonFileSessionStore::new(&cli.sessions));
    let episode_id = manifest.episode_id().to_string();

    let mut driver = ReaderDriver::open(manifest, sessions.clone(), fetcher);
    eprintln!(
        "{} {}  {}",
        cyan("◆"),
        bold(driver.engine().manifest().title()),
        dim("n/p: next/previous  l/r: tap left/right  +: like  b: bookmark  q: quit"),
    );
    driver.wait_current().await;
    print_view(&driver.view());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let event = match line.trim() {
            "n" | "" => ReaderEvent::Control(Control::Next),
            "p" => ReaderEvent::Control(Control::Previous),
            "l" => ReaderEvent::Tap { x: 0.25, width: 1.0 },
            "r" => ReaderEvent::Tap { x: 0.75, width: 1.0 },
            "<" => ReaderEvent::Swipe(SwipeDirection::Right),
            ">" => ReaderEvent::Swipe(SwipeDirection::Left),
            "q" => break,
            "+" => {
                let liked = sessions
                    .toggle_liked(&episode_id)
                    .context("Failed to save like")?;
                eprintln!("{}", dim(if liked { "liked" } else { "unliked" }));
                continue;
            }
            "b" => {
                let marked = sessions
                    .toggle_bookmarked(&episode_id)
                    .context("Failed to save bookmark")?;
                eprintln!("{}", dim(if marked { "bookmarked" } else { "bookmark removed" }));
                continue;
            }
            other => {
                eprintln!("{}", dim(&format!("unknown command '{other}'")));
                continue;
            }
        };
        let before = driver.view().index;
        driver.handle(event);
        driver.poll_completions();
        if driver.view().index == before {
            eprintln!("{}", dim("(no more pages that way)"));
            continue;
        }
        driver.wait_current().await;
        print_view(&driver.view());
    }
    Ok(())
}

fn print_view(view: &ReaderView) {
    let marker = match view.status {
        LoadStatus::Loaded => green("●"),
        LoadStatus::Failed => red("●"),
        _ => dim("○"),
    };
    println!(
        "{} {:>9}  {:>3.0}%  {}",
        marker,
        view.label,
        view.progress * 100.0,
        view.current_url
    );
    if let Some(ref err) = view.error {
        println!("  {}", red(&truncate(err, 100)));
    }
}
