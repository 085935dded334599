//! preview-sync - drive the preview cache against a file server
//!
//! Opens folders the way a folder view would and reports what the sync
//! layer fetched, evicted or left cached.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use fileserver_preview_sync::api::FolderId;
use fileserver_preview_sync::{
    Config, DiskStore, FolderSession, FolderSnapshotCache, KeyValueStore, PreviewCache,
    PreviewSource, ServerClient,
};

/// CLI command
#[derive(Debug)]
enum Command {
    /// Load a folder and reconcile its previews
    Open { folder_id: FolderId },
    /// Drop cached previews and snapshots of a folder
    Invalidate { folder_id: FolderId, recursive: bool },
    /// Show cache and server status
    Stats,
    /// Show help
    Help,
}

fn print_help() {
    eprintln!(
        r#"preview-sync - File server preview cache

USAGE:
    preview-sync open <folder_id>
    preview-sync invalidate <folder_id> [--recursive]
    preview-sync stats
    preview-sync help

COMMANDS:
    open        Load folder metadata and bring its cached previews up to date
    invalidate  Forget the folder's previews and snapshot; the next open refills it.
                With --recursive, subfolders are forgotten too
    stats       Show cache location, entry count and server status
    help        Show this help message

ENVIRONMENT:
    PREVIEW_SYNC_CONFIG   Path of the JSON config file
    FILE_SERVER_ADDRESS   Server address (overrides the config file)
    FILE_SERVER_USERNAME  Username (overrides the config file)
    FILE_SERVER_PASSWORD  Password (overrides the config file)
    RUST_LOG              Log level (trace, debug, info, warn, error)
"#
    );
}

fn parse_folder_id(arg: Option<&String>, usage: &str) -> Result<FolderId> {
    let arg = arg.ok_or_else(|| anyhow!("Usage: {}", usage))?;
    arg.parse()
        .with_context(|| format!("Invalid folder id: {}", arg))
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "open" => Ok(Command::Open {
            folder_id: parse_folder_id(args.get(2), "preview-sync open <folder_id>")?,
        }),
        "invalidate" => Ok(Command::Invalidate {
            folder_id: parse_folder_id(
                args.get(2),
                "preview-sync invalidate <folder_id> [--recursive]",
            )?,
            recursive: args.iter().skip(3).any(|a| a == "--recursive" || a == "-r"),
        }),
        "stats" => Ok(Command::Stats),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            Ok(Command::Help)
        }
    }
}

/// Everything a command needs, wired from configuration
struct App {
    client: Arc<ServerClient>,
    store: Arc<DiskStore>,
    snapshots: Arc<FolderSnapshotCache>,
    session: FolderSession,
}

impl App {
    fn new(config: &Config) -> Result<Self> {
        let store = Arc::new(match &config.cache_dir {
            Some(dir) => DiskStore::open(dir.clone())?,
            None => DiskStore::new()?,
        });
        let client = Arc::new(ServerClient::new(config)?);

        let kv: Arc<dyn KeyValueStore> = store.clone();
        let previews = Arc::new(PreviewCache::new(kv.clone()));
        let snapshots = Arc::new(FolderSnapshotCache::new(kv, previews.clone()));
        let source: Arc<dyn PreviewSource> = client.clone();
        let session = FolderSession::new(
            previews,
            snapshots.clone(),
            source,
            config.sync_settings(),
        );

        Ok(Self {
            client,
            store,
            snapshots,
            session,
        })
    }

    async fn open(&self, folder_id: FolderId) -> Result<()> {
        let opened = self.session.open(folder_id).await?;
        let folder = opened.folder.clone();
        println!(
            "{} ({}): {} files, {} subfolders",
            folder.name,
            folder.id,
            folder.files.len(),
            folder.subfolders.len()
        );

        let report = opened.wait().await?;
        println!(
            "Reconciled ({}): {} fetched, {} without preview, {} failed, {} evicted",
            report.strategy,
            report.fetched.len(),
            report.missing.len(),
            report.failed.len(),
            report.evicted.len()
        );
        if report.is_partial() {
            warn!(folder_id = folder_id, failed = ?report.failed, "Some previews are unavailable");
        }

        let previews = self.session.previews(&folder).await;
        println!("{} of {} previews cached", previews.len(), folder.files.len());

        self.session.log_metrics();
        Ok(())
    }

    async fn invalidate(&self, folder_id: FolderId, recursive: bool) -> Result<()> {
        let folder = match self.snapshots.get(folder_id).await {
            Some(folder) => folder,
            None => self
                .client
                .fetch_folder_metadata(folder_id)
                .await
                .with_context(|| format!("Folder {} is not cached and could not be fetched", folder_id))?,
        };

        if recursive {
            self.snapshots.delete(&folder).await;
        } else {
            self.session.policy().invalidate_folder(&folder).await;
        }
        println!("Invalidated folder {}", folder_id);
        Ok(())
    }

    async fn stats(&self, config: &Config) -> Result<()> {
        println!("Cache directory: {}", self.store.root().display());
        println!("Cached entries:  {}", self.store.entry_count());
        println!("Server:          {}", config.address);

        let pattern = config.version_pattern()?;
        match self.client.is_compatible(&pattern).await {
            Ok(true) => println!("Version:         compatible with {}", pattern),
            Ok(false) => println!("Version:         NOT compatible with {}", pattern),
            Err(e) => println!("Version:         unknown ({})", e),
        }

        println!("Health:          {}", self.client.health_status());
        let errors = self.client.recent_errors();
        if !errors.is_empty() {
            println!("Recent errors:");
            for entry in errors {
                println!(
                    "  [{}] {} {}: {}",
                    entry.timestamp, entry.operation, entry.path, entry.error
                );
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let log_level = env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command
    let command = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    };

    if let Command::Help = command {
        print_help();
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let app = App::new(&config)?;

    let result = match command {
        Command::Open { folder_id } => {
            info!(folder_id = folder_id, "Opening folder");
            app.open(folder_id).await
        }
        Command::Invalidate {
            folder_id,
            recursive,
        } => app.invalidate(folder_id, recursive).await,
        Command::Stats => app.stats(&config).await,
        Command::Help => Ok(()),
    };

    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }
    result
}
