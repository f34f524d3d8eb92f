//! SubSync CLI - Command line interface for the status cache.
//!
//! This tool imports captured working-copy status into a workspace's status
//! cache, inspects and purges cached entries, and reports sync verdicts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use subsync_common::{RepositoryLocationId, ResourcePath};
use subsync_storage::LocalResourceTree;
use subsync_sync::{
    CacheConfig, ClientRegistry, LocalResourceStatus, RepositoryLocation, RevisionIdentity,
    RevisionNumber, SnapshotClient, StatusCacheManager, StatusFetcher,
};

#[derive(Parser)]
#[command(name = "subsync")]
#[command(about = "SubSync - Version-control status cache")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Workspace directory.
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Directory holding cached sync info (default: <workspace>/.subsync).
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Cache configuration file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Repository location identifier.
    #[arg(short, long, default_value = "default")]
    location: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import status records from a JSON snapshot into the cache.
    Import {
        /// Snapshot file: a JSON array of raw status records.
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Workspace path the snapshot was taken for.
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Repository root URL.
        #[arg(short, long, default_value = "file:///repository")]
        repository: Url,

        /// Include descendants.
        #[arg(long)]
        recursive: bool,

        /// Include unmodified resources.
        #[arg(long)]
        all: bool,
    },

    /// Show the cached status of a resource.
    Status {
        /// Workspace path.
        path: String,

        /// List every cached entry below the path.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Remove cached statuses.
    Purge {
        /// Workspace path.
        path: String,

        /// Also remove everything below the path.
        #[arg(long)]
        deep: bool,
    },

    /// Reconcile the cached status against a remote revision.
    Verdict {
        /// Workspace path.
        path: String,

        /// Last-changed revision of the remote resource (default: the base).
        #[arg(long)]
        remote_revision: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;
    let state_dir = cli
        .state_dir
        .clone()
        .unwrap_or_else(|| cli.workspace.join(".subsync"));
    let tree = LocalResourceTree::new(&cli.workspace, &state_dir)
        .with_context(|| format!("Failed to open state directory {}", state_dir.display()))?;
    let manager = StatusCacheManager::create(Arc::new(tree), config)
        .context("Failed to create status cache")?;

    let result = match cli.command {
        Commands::Import {
            snapshot,
            path,
            repository,
            recursive,
            all,
        } => {
            cmd_import(
                &manager,
                &cli.location,
                repository,
                &snapshot,
                &path,
                recursive,
                all,
            )
            .await
        }

        Commands::Status { path, recursive } => cmd_status(&manager, &path, recursive),

        Commands::Purge { path, deep } => cmd_purge(&manager, &path, deep),

        Commands::Verdict {
            path,
            remote_revision,
        } => cmd_verdict(&manager, &cli.location, &path, remote_revision),
    };

    let report = manager.shutdown();
    if report.remaining > 0 {
        warn!("{} cache writes could not be flushed", report.remaining);
    }
    result
}

/// Install the global subscriber: `RUST_LOG` if set, otherwise INFO or DEBUG.
fn init_logging(verbose: bool) -> Result<()> {
    let builder = FmtSubscriber::builder().with_target(false).compact();

    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        let subscriber = builder.with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Read the cache configuration from `path`, or from the user config
/// directory when present, falling back to defaults.
fn load_config(path: Option<&Path>) -> Result<CacheConfig> {
    let path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => dirs::config_dir()
            .map(|dir| dir.join("subsync").join("config.json"))
            .filter(|candidate| candidate.is_file()),
    };

    match path {
        Some(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            CacheConfig::from_json(&json)
                .with_context(|| format!("Invalid config {}", path.display()))
        }
        None => Ok(CacheConfig::default()),
    }
}

fn parse_path(path: &str) -> Result<ResourcePath> {
    ResourcePath::parse(path).with_context(|| format!("Invalid workspace path: {}", path))
}

fn format_status(status: &LocalResourceStatus) -> String {
    let state = format!("{:?}", status.version_state()).to_lowercase();
    let revision = status
        .revision
        .map(|r| format!(" @{}", r))
        .unwrap_or_default();
    format!("{:<12} {}{}", state, status.path, revision)
}

/// Import a status snapshot.
async fn cmd_import(
    manager: &Arc<StatusCacheManager>,
    location: &str,
    repository: Url,
    snapshot: &Path,
    path: &str,
    recursive: bool,
    all: bool,
) -> Result<()> {
    let path = parse_path(path)?;
    info!("Importing {} for {}", snapshot.display(), path);

    let client = SnapshotClient::load(snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    let location = RepositoryLocation::new(
        RepositoryLocationId::new(location).context("Invalid location")?,
        repository,
    );

    let mut registry = ClientRegistry::new();
    registry
        .register(location.id().clone(), Arc::new(client))
        .context("Failed to register client")?;
    let fetcher = StatusFetcher::new(manager.clone(), Arc::new(registry));

    let cancel = manager.cancellation_token();
    let statuses = fetcher
        .fetch(&location, &path, recursive, all, &cancel)
        .await
        .context("Failed to import status")?;

    println!("Imported {} statuses under {}", statuses.len(), path);
    for status in &statuses {
        println!("  {}", format_status(status));
    }
    Ok(())
}

/// Print cached statuses.
fn cmd_status(manager: &StatusCacheManager, path: &str, recursive: bool) -> Result<()> {
    let path = parse_path(path)?;
    let cache = manager.status_cache();

    let paths = if recursive {
        cache
            .cached_paths(&path)
            .context("Failed to list cached statuses")?
    } else {
        vec![path.clone()]
    };

    let mut found = 0;
    for path in &paths {
        if let Some(status) = cache.get_status(path) {
            println!("{}", format_status(&status));
            found += 1;
        }
    }
    if found == 0 {
        println!("No cached status for {}", path);
    }
    Ok(())
}

/// Remove cached statuses.
fn cmd_purge(manager: &StatusCacheManager, path: &str, deep: bool) -> Result<()> {
    let path = parse_path(path)?;
    manager
        .status_cache()
        .purge_cache(&path, deep)
        .context("Failed to purge cache")?;
    println!(
        "Purged {}{}",
        path,
        if deep { " and everything below it" } else { "" }
    );
    Ok(())
}

/// Print the sync verdict of a resource.
fn cmd_verdict(
    manager: &StatusCacheManager,
    location: &str,
    path: &str,
    remote_revision: Option<u64>,
) -> Result<()> {
    let path = parse_path(path)?;
    let location = RepositoryLocationId::new(location).context("Invalid location")?;

    let local = manager.status_cache().get_status(&path);
    let base = local.as_ref().and_then(|s| s.base_identity(&location));
    let remote = match remote_revision {
        Some(revision) => local.as_ref().and_then(|s| s.url.as_ref()).map(|url| {
            RevisionIdentity::new(
                location.clone(),
                url.as_str(),
                Some(RevisionNumber::new(revision)),
            )
        }),
        None => base.clone(),
    };

    let verdict = manager
        .reconciler()
        .reconcile(local.as_ref(), remote.as_ref(), base.as_ref());
    println!("{} {}", verdict, path);
    Ok(())
}
