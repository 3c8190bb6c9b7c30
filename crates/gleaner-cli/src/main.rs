use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gleaner_client::{ScraperExtractor, StrategyFetcher, rewrite_for_embedding};
use gleaner_core::models::{ExtractionMode, ProxyMode, ResourceClass, ScrapeOptions, Selector};
use gleaner_core::traits::{Fetcher, NullStore, RecordStore};
use gleaner_core::{
    CreateScrapeJobRequest, DiscoveryOptions, EngineConfig, ExportFormat, ExportOptions, JobStatus,
    Orchestrator, ScrapePipeline, TracingReporter, export_dataset,
};
use gleaner_db::{Database, DatabaseConfig, RecordRepository};

#[derive(Parser)]
#[command(name = "gleaner", version, about = "Scrape orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Fetch options shared by `scrape` and `discover`.
#[derive(clap::Args)]
struct FetchArgs {
    /// Render pages in headless Chromium (requires the `browser` feature)
    #[arg(long, default_value_t = false)]
    javascript: bool,

    /// Proxy: "none", "auto" (rotate GLEANER_PROXIES) or an explicit address
    #[arg(long, default_value = "none")]
    proxy: String,

    /// Explicit User-Agent (rotated when omitted)
    #[arg(long, env = "GLEANER_USER_AGENT")]
    user_agent: Option<String>,

    /// Request timeout in milliseconds (defaults to GLEANER_DEFAULT_TIMEOUT_MS)
    #[arg(long)]
    timeout: Option<u64>,

    /// Base pre-request delay in seconds, jittered
    #[arg(long)]
    delay: Option<f64>,

    /// Extra request header, as NAME=VALUE (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE")]
    headers: Vec<String>,

    /// Cookie, as NAME=VALUE (repeatable)
    #[arg(long = "cookie", value_name = "NAME=VALUE")]
    cookies: Vec<String>,

    /// Do not follow HTTP redirects
    #[arg(long, default_value_t = false)]
    no_redirects: bool,

    /// CSS selector to wait for before reading a rendered page
    #[arg(long)]
    wait_for: Option<String>,

    /// Block images, stylesheets and fonts in the browser
    #[arg(long, default_value_t = false)]
    block_assets: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scrape job through the orchestrator
    Scrape {
        /// Target URL to scrape
        #[arg(short, long)]
        url: String,

        /// Text field as [NAME=]CSS (repeatable)
        #[arg(short, long = "field", value_name = "[NAME=]CSS")]
        fields: Vec<String>,

        /// Text-list field as [NAME=]CSS (repeatable)
        #[arg(short, long = "list", value_name = "[NAME=]CSS")]
        lists: Vec<String>,

        /// JSON file holding a full selector array
        #[arg(long)]
        selectors: Option<PathBuf>,

        /// Extraction mode: raw, cleaned, semantic or vectorized
        #[arg(short, long, default_value = "raw", value_parser = parse_mode)]
        mode: ExtractionMode,

        /// Follow this "next page" selector
        #[arg(long)]
        paginate: Option<String>,

        /// Page limit when paginating
        #[arg(long, default_value_t = 5)]
        max_pages: u32,

        /// Output format: json, csv, sql or vector
        #[arg(long, default_value = "json")]
        format: ExportFormat,

        /// Persist the outcome (requires DATABASE_URL)
        #[arg(long, default_value_t = false)]
        save: bool,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Breadth-first URL discovery from a seed
    Discover {
        /// Seed URL
        #[arg(short, long)]
        url: String,

        #[arg(long, default_value_t = 2)]
        max_depth: u32,

        #[arg(long, default_value_t = 100)]
        max_urls: usize,

        /// Keep only links matching one of these regular expressions (repeatable)
        #[arg(long = "include")]
        include_patterns: Vec<String>,

        /// Follow links to other origins
        #[arg(long, default_value_t = false)]
        cross_origin: bool,

        #[command(flatten)]
        fetch: FetchArgs,
    },

    /// Convert a JSON record or record array to another format
    Export {
        /// Input JSON file ("-" for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Output format: json, csv, sql or vector
        #[arg(short, long)]
        format: ExportFormat,

        /// Table name for SQL output
        #[arg(long, default_value = "scraped_data")]
        table: String,

        /// Single-line JSON output
        #[arg(long, default_value_t = false)]
        compact: bool,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite a page so it can be embedded in an iframe
    Rewrite {
        /// Fetch and rewrite this URL
        #[arg(short, long, conflicts_with = "file")]
        url: Option<String>,

        /// Rewrite a local HTML file instead
        #[arg(long, requires = "origin")]
        file: Option<PathBuf>,

        /// Origin the local file was served from
        #[arg(long)]
        origin: Option<String>,
    },

    /// Inspect persisted records (requires DATABASE_URL)
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List the most recent records
    List {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one record
    Get { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gleaner=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;

    match cli.command {
        Commands::Scrape {
            url,
            fields,
            lists,
            selectors,
            mode,
            paginate,
            max_pages,
            format,
            save,
            fetch,
        } => {
            let selectors = build_selectors(&fields, &lists, selectors.as_deref())?;
            let mut options = fetch_options(&config, &fetch)?;
            options.extraction_mode = mode;
            if let Some(next) = paginate {
                options.pagination = true;
                options.pagination_selector = Some(next);
                options.max_pages = max_pages;
            }
            let request = CreateScrapeJobRequest::new(url, selectors).with_options(options);
            let export = ExportOptions {
                embedding_dimensions: config.embedding_dimensions,
                ..Default::default()
            };

            if save {
                let repo = connect_db().await?;
                cmd_scrape(&config, request, repo, format, &export).await?;
            } else {
                cmd_scrape(&config, request, NullStore, format, &export).await?;
            }
        }
        Commands::Discover {
            url,
            max_depth,
            max_urls,
            include_patterns,
            cross_origin,
            fetch,
        } => {
            let discovery = DiscoveryOptions {
                max_depth,
                max_urls,
                include_patterns,
                same_origin: !cross_origin,
                options: fetch_options(&config, &fetch)?,
            };
            cmd_discover(&config, &url, &discovery).await?;
        }
        Commands::Export {
            input,
            format,
            table,
            compact,
            output,
        } => {
            let options = ExportOptions {
                pretty: !compact,
                table_name: table,
                embedding_dimensions: config.embedding_dimensions,
            };
            cmd_export(&input, format, &options, output.as_deref())?;
        }
        Commands::Rewrite { url, file, origin } => {
            cmd_rewrite(&config, url, file, origin).await?;
        }
        Commands::Records { action } => {
            let repo = connect_db().await?;
            match action {
                RecordsAction::List { limit } => cmd_records_list(&repo, limit).await?,
                RecordsAction::Get { id } => cmd_records_get(&repo, id).await?,
            }
        }
    }

    Ok(())
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<RecordRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.record_repo())
}

fn parse_mode(raw: &str) -> Result<ExtractionMode, String> {
    serde_json::from_value(serde_json::Value::String(raw.to_lowercase()))
        .map_err(|_| format!("unknown extraction mode '{raw}'"))
}

/// Split `NAME=VALUE`.
fn parse_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("Expected NAME=VALUE, got '{raw}'"),
    }
}

/// Parse `[NAME=]CSS`. A prefix only counts as a name when it is a plain
/// identifier, so attribute selectors like `a[rel=next]` stay intact.
fn parse_field(raw: &str) -> (Option<String>, String) {
    if let Some((name, css)) = raw.split_once('=')
        && !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return (Some(name.to_string()), css.to_string());
    }
    (None, raw.to_string())
}

fn build_selectors(fields: &[String], lists: &[String], file: Option<&Path>) -> Result<Vec<Selector>> {
    let mut selectors = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read selector file: {}", path.display()))?;
            serde_json::from_str::<Vec<Selector>>(&raw).context("Invalid selector file")?
        }
        None => Vec::new(),
    };

    for (raw, list) in fields
        .iter()
        .map(|f| (f, false))
        .chain(lists.iter().map(|l| (l, true)))
    {
        let (name, css) = parse_field(raw);
        let selector = if list {
            Selector::list(css)
        } else {
            Selector::text(css)
        };
        selectors.push(match name {
            Some(name) => selector.named(name),
            None => selector,
        });
    }
    Ok(selectors)
}

fn fetch_options(config: &EngineConfig, args: &FetchArgs) -> Result<ScrapeOptions> {
    let mut options = config.default_options();
    options.javascript = args.javascript;
    options.proxy = ProxyMode::from(args.proxy.clone());
    options.user_agent = args.user_agent.clone();
    if let Some(timeout) = args.timeout {
        options.timeout = timeout;
    }
    options.delay = args.delay;
    options.follow_redirects = !args.no_redirects;
    options.wait_for_selector = args.wait_for.clone();
    for header in &args.headers {
        let (name, value) = parse_pair(header)?;
        options.headers.insert(name, value);
    }
    for cookie in &args.cookies {
        let (name, value) = parse_pair(cookie)?;
        options.cookies.insert(name, value);
    }
    if args.block_assets {
        options.block_resources = vec![
            ResourceClass::Image,
            ResourceClass::Stylesheet,
            ResourceClass::Font,
        ];
    }
    options.validate()?;
    Ok(options)
}

async fn cmd_scrape<S: RecordStore>(
    config: &EngineConfig,
    request: CreateScrapeJobRequest,
    store: S,
    format: ExportFormat,
    export: &ExportOptions,
) -> Result<()> {
    let fetcher = StrategyFetcher::from_config(config);
    let pipeline = ScrapePipeline::new(fetcher.clone(), ScraperExtractor::new());
    let orchestrator = Orchestrator::new(pipeline, store);

    let id = orchestrator
        .submit(request)?;
    orchestrator.drain(&TracingReporter).await;
    fetcher.shutdown().await;

    let job = orchestrator
        .get_job(id)
        .context("Submitted job disappeared")?;
    if let Some(record_id) = job.record_id {
        tracing::info!(%record_id, "Outcome saved");
    }

    match (job.status, job.result) {
        (JobStatus::Completed, Some(record)) => {
            let data = serde_json::to_value(&record)?;
            let out = export_dataset(&data, format, export)?;
            println!("{out}");
            Ok(())
        }
        (status, _) => bail!(
            "Job {id} ended {status} after {} retries: {}",
            job.retry_count,
            job.error.unwrap_or_else(|| "unknown error".into())
        ),
    }
}

async fn cmd_discover(config: &EngineConfig, seed: &str, discovery: &DiscoveryOptions) -> Result<()> {
    let fetcher = StrategyFetcher::from_config(config);
    let pipeline = ScrapePipeline::new(fetcher.clone(), ScraperExtractor::new());

    let result = pipeline.crawler().discover(seed, discovery).await;
    fetcher.shutdown().await;

    for url in result? {
        println!("{url}");
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<serde_json::Value> {
    let raw = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    };
    serde_json::from_str(&raw).context("Input is not valid JSON")
}

fn cmd_export(
    input: &Path,
    format: ExportFormat,
    options: &ExportOptions,
    output: Option<&Path>,
) -> Result<()> {
    let data = read_input(input)?;
    let out = export_dataset(&data, format, options)?;
    match output {
        Some(path) => {
            std::fs::write(path, out)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), %format, "Export written");
        }
        None => println!("{out}"),
    }
    Ok(())
}

async fn cmd_rewrite(
    config: &EngineConfig,
    url: Option<String>,
    file: Option<PathBuf>,
    origin: Option<String>,
) -> Result<()> {
    let (html, origin) = match (url, file) {
        (Some(url), _) => {
            let fetcher = StrategyFetcher::from_config(config);
            let page = fetcher
                .fetch(&url, &config.default_options())
                .await?;
            (page.html, page.url)
        }
        (None, Some(path)) => {
            let html = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            (html, origin.context("--origin is required with --file")?)
        }
        (None, None) => bail!("Either --url or --file is required"),
    };

    let rewritten = rewrite_for_embedding(&html, &origin)?;
    println!("{rewritten}");
    Ok(())
}

async fn cmd_records_list(repo: &RecordRepository, limit: usize) -> Result<()> {
    let records = repo.list(limit).await?;

    if records.is_empty() {
        println!("No records found");
        return Ok(());
    }

    for record in &records {
        println!(
            "  {}  {} [{}] {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.id,
            record.payload["status"].as_str().unwrap_or("?"),
            record.payload["url"].as_str().unwrap_or(""),
        );
    }

    println!("\nTotal: {} records", records.len());
    Ok(())
}

async fn cmd_records_get(repo: &RecordRepository, id: Uuid) -> Result<()> {
    let record = repo
        .get(id)
        .await?
        .with_context(|| format!("Record {id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
