use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use tokio_util::sync::CancellationToken;

use treewatch::Settings;
use treewatch::extract::ExtractorRegistry;
use treewatch::store::fs::FsStore;
use treewatch::watcher::{InstallWatcher, JsonLinesInstaller};

#[derive(Parser)]
#[command(name = "treewatch")]
#[command(version, about = "Watch content tree folders and report installable resources")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Config,

    /// Scan every configured folder once and print the resources found
    Scan {
        /// Directory mapped onto the tree root (overrides config)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// Watch configured folders and print changes until interrupted
    Watch {
        /// Directory mapped onto the tree root (overrides config)
        #[arg(short, long)]
        root: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // For non-init commands, check if project is initialized
    if !matches!(cli.command, Commands::Init { .. }) {
        if let Err(warning) = Settings::check_init() {
            eprintln!("Warning: {warning}");
            eprintln!("Using default configuration for now.");
        }
    }

    let mut config = Settings::load().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    treewatch::logging::init_with_config(&config.logging);

    let outcome = match cli.command {
        Commands::Init { force } => init(force),
        Commands::Config => show_config(&config),
        Commands::Scan { root } => {
            if let Some(root) = root {
                config.store.root = root;
            }
            scan_once(&config).await
        }
        Commands::Watch { root } => {
            if let Some(root) = root {
                config.store.root = root;
            }
            watch(&config).await
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init(force: bool) -> Result<()> {
    let path = Settings::init_config_file(force).map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(())
}

fn show_config(config: &Settings) -> Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    let toml_str = toml::to_string_pretty(config).context("cannot render configuration")?;
    println!("{toml_str}");
    Ok(())
}

/// Assemble a watcher over the filesystem store from settings.
fn build_watcher(config: &Settings) -> Result<InstallWatcher> {
    let store = FsStore::open(&config.store.root)
        .with_context(|| format!("cannot open store at {}", config.store.root.display()))?;
    let extractors = ExtractorRegistry::from_config(&config.extractors)?;

    let mut builder = InstallWatcher::builder()
        .store(Arc::new(store))
        .installer(Arc::new(JsonLinesInstaller::stdout()))
        .extractors(extractors)
        .debounce_ms(config.scheduler.debounce_ms, config.scheduler.max_delay_ms)
        .tick_ms(config.scheduler.tick_ms);

    for folder in &config.folders {
        builder = builder.folder(folder.clone());
    }

    if config.discovery.enabled {
        let pattern = Regex::new(&config.discovery.folder_pattern).with_context(|| {
            format!("invalid folder pattern {:?}", config.discovery.folder_pattern)
        })?;
        builder = builder.discovery(
            config.discovery.roots.clone(),
            pattern,
            config.url_scheme.clone(),
        );
    }

    Ok(builder.build()?)
}

async fn scan_once(config: &Settings) -> Result<()> {
    let mut watcher = build_watcher(config)?;
    watcher.refresh_folders();
    let summary = watcher.scan_pending().await;
    eprintln!(
        "Scanned {} folder(s): {} added, {} removed, {} failed",
        summary.scanned, summary.added, summary.removed, summary.failed
    );
    if summary.failed > 0 {
        anyhow::bail!("{} folder(s) could not be scanned", summary.failed);
    }
    Ok(())
}

async fn watch(config: &Settings) -> Result<()> {
    let watcher = build_watcher(config)?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down...");
        }
        shutdown.cancel();
    });

    watcher.run(cancel).await?;
    Ok(())
}
