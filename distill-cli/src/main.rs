use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use distill_api::{parse, AllContentSectionsResponse, ApiClient, ReqwestTransport};
use distill_cache::{CacheController, SqliteStore};
use distill_core::{EngineContext, ReaderSession, ReadingMode, SystemClock};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use url::Url;

mod config;
mod replay;

use config::FileConfig;

#[derive(Debug, Parser)]
#[command(
    name = "distill",
    version,
    about = "Cached client and reading-session replayer for condensed books"
)]
struct Args {
    /// Config file to use instead of the platform default
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the content API
    #[arg(long, global = true, env = "DISTILL_BASE_URL")]
    base_url: Option<String>,

    /// Bearer token sent with every request
    #[arg(long, global = true, env = "DISTILL_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Path of the cache database
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the books in the library
    Books,
    /// Show one book
    Book { id: String },
    /// Show the condensed sections of a book
    Sections { book: String },
    /// Fetch the condensed content of one section, waiting for it if needed
    Condensed { book: String, section: usize },
    /// Record the reading position of a book
    Progress { book: String, page: u32 },
    /// Record today's check-in
    CheckIn,
    /// Show the most recent check-ins
    CheckIns {
        #[arg(default_value_t = 7)]
        n: u32,
    },
    /// Read or write local settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Maintain the local cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Replay recorded layout events through a reader session
    Replay {
        book: String,
        /// JSON lines of `{at_ms, viewport_height, mode?, units}`
        events: PathBuf,
        /// Section list to use instead of asking the API
        #[arg(long)]
        sections: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = ModeArg::Condensed)]
        mode: ModeArg,
        /// Skip content downloads and progress writes
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    Set {
        key: String,
        /// JSON value; anything that is not valid JSON is stored as a string
        value: String,
        #[arg(long)]
        ttl_ms: Option<u64>,
    },
    Get {
        key: String,
    },
    Remove {
        key: String,
    },
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// Drop every entry
    Clear,
    /// Drop expired entries
    Purge,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Original,
    Condensed,
}

impl From<ModeArg> for ReadingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Original => ReadingMode::Original,
            ModeArg::Condensed => ReadingMode::Condensed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("dev", "distill", "distill")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let file_config = FileConfig::load(args.config.as_deref(), &project_dirs)?;

    let cache_path = match args.cache.clone().or_else(|| file_config.cache.path.clone()) {
        Some(path) => path,
        None => project_dirs.data_local_dir().join("cache.db"),
    };
    if let Some(parent) = cache_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create cache directory {:?}", parent))?;
    }
    let store = SqliteStore::open(&cache_path)
        .await
        .with_context(|| format!("failed to open cache {:?}", cache_path))?;
    let cache = Arc::new(CacheController::new(
        Arc::new(store.clone()),
        Arc::new(SystemClock),
    ));

    let base_url = args
        .base_url
        .clone()
        .unwrap_or_else(|| file_config.api.base_url.clone());
    let base = Url::parse(&base_url).with_context(|| format!("invalid base URL {:?}", base_url))?;
    let token = args.token.clone().or_else(|| file_config.api.token.clone());
    let transport = ReqwestTransport::new(base, token, file_config.api.timeout())?;
    let client = Arc::new(ApiClient::new(
        Arc::new(transport),
        cache,
        file_config.engine.clone(),
    ));

    let result = run(args.command, &client, &file_config).await;
    store.close().await;
    result
}

async fn run(command: Command, client: &Arc<ApiClient>, file_config: &FileConfig) -> Result<()> {
    match command {
        Command::Books => print_json(&client.list_books().await?),
        Command::Book { id } => print_json(&client.get_book(&id).await?),
        Command::Sections { book } => print_json(&client.load_document(&book).await?),
        Command::Condensed { book, section } => {
            let document = client.load_document(&book).await?;
            let section = document
                .section(section)
                .ok_or_else(|| anyhow!("book {} has no section {}", book, section))?;
            let content = client
                .get_distilled_content(&book, section.start_page, section.end_page)
                .await?;
            print_json(&content)
        }
        Command::Progress { book, page } => {
            client.set_book_progress(&book, page).await?;
            info!(%book, page, "recorded progress");
            Ok(())
        }
        Command::CheckIn => print_json(&client.save_check_in().await?),
        Command::CheckIns { n } => print_json(&client.last_check_ins(n).await?),
        Command::Config { action } => run_config(action, client).await,
        Command::Cache { action } => match action {
            CacheAction::Clear => {
                client.clear_cache().await?;
                info!("cache cleared");
                Ok(())
            }
            CacheAction::Purge => {
                let purged = client.purge_cache().await?;
                print_json(&serde_json::json!({ "purged": purged }))
            }
        },
        Command::Replay {
            book,
            events,
            sections,
            mode,
            dry_run,
        } => {
            let document = match sections {
                Some(path) => read_sections(&path)?.to_document(&book),
                None => client.load_document(&book).await?,
            };
            let context = if dry_run {
                let dry = Arc::new(replay::DryRun);
                EngineContext::new(file_config.engine.clone(), dry.clone(), dry)
            } else {
                EngineContext::new(file_config.engine.clone(), client.clone(), client.clone())
            };
            let events = replay::read_events(&events)?;
            let mut session = ReaderSession::new(&context, document, mode.into())?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            replay::run(&mut session, &events, &mut out).await
        }
    }
}

async fn run_config(action: ConfigAction, client: &ApiClient) -> Result<()> {
    match action {
        ConfigAction::Set { key, value, ttl_ms } => {
            let value = serde_json::from_str::<Value>(&value).unwrap_or(Value::String(value));
            client
                .set_app_config(&key, &value, ttl_ms.map(Duration::from_millis))
                .await?;
            Ok(())
        }
        ConfigAction::Get { key } => {
            let value = client.get_app_config(&key).await?;
            if value.is_none() {
                warn!(key = %key, "no stored value");
            }
            print_json(&value.unwrap_or(Value::Null))
        }
        ConfigAction::Remove { key } => {
            client.remove_app_config(&key).await?;
            Ok(())
        }
    }
}

fn read_sections(path: &Path) -> Result<AllContentSectionsResponse> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read sections file {:?}", path))?;
    parse(&raw).with_context(|| format!("invalid sections file {:?}", path))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "distill.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
