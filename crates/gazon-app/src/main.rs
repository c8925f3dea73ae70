//! Gazon - headless app shell
//!
//! Registers the offline worker for the configured scope, wires the page
//! router through it and renders the start page into an in-memory document.

mod shell;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use gazon_common::{init_logging, AppConfig, LogConfig};
use gazon_router::NavigationOutcome;
use tracing::{info, warn};

use shell::Shell;

/// Environment variable pointing at a config file.
const CONFIG_ENV: &str = "GAZON_CONFIG";

#[derive(Debug, Parser)]
#[command(name = "gazon", about = "Headless Gazon app shell", version)]
struct Args {
    /// Config file (defaults to $GAZON_CONFIG, then the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to open instead of the start page
    #[arg(long)]
    route: Option<String>,

    /// Start without network access
    #[arg(long)]
    offline: bool,

    /// Drop every cache before opening the page
    #[arg(long)]
    clear_cache: bool,
}

/// Config from `--config`, then `GAZON_CONFIG`, then the default location if
/// it exists, else built-in defaults.
fn load_config(explicit: Option<&Path>) -> anyhow::Result<AppConfig> {
    let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    let path = match (explicit, from_env) {
        (Some(path), _) => Some(path.to_path_buf()),
        (None, Some(path)) => Some(path),
        (None, None) => Some(AppConfig::default_path()).filter(|path| path.exists()),
    };

    match path {
        Some(path) => AppConfig::load(&path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(AppConfig::default()),
    }
}

fn log_config(config: &AppConfig) -> LogConfig {
    let mut log = LogConfig::from_level_name(&config.logging.level)
        .with_format(config.logging.format);
    if let Some(filter) = &config.logging.filter {
        log = log.with_filter(filter.clone());
    }
    log
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_logging(log_config(&config))?;

    info!(
        version = %config.cache.version,
        scope = %config.cache.scope,
        "Starting de Gazon App"
    );

    let shell = Shell::start(&config, args.offline).await?;
    info!(status = %shell.connection_status(), "Connection");

    if args.clear_cache {
        if let Err(e) = shell.clear_caches().await {
            warn!(error = %e, "Cache reset incomplete");
        }
    }

    let mut outcome = match args.route.as_deref() {
        Some(page) => shell.open_page(page).await,
        None => NavigationOutcome::NotRegistered,
    };
    if matches!(outcome, NavigationOutcome::NotRegistered) {
        outcome = shell.open(shell.start_route().await).await;
    }
    info!(loaded = outcome.is_loaded(), "Start page rendered");

    println!("{}", shell.content());
    shell.shutdown().await;
    Ok(())
}
