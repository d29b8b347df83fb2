use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};

use storage_core::{FileIdentity, GrantMode, Storage, StorageConfig};
use storage_host::Device;
use storage_platform::media::MediaCollection;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "android-fs")]
#[command(about = "Uniform file handles over raw paths, media records and document trees")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(long, env = "ANDROID_FS_CONFIG_PATH", global = true)]
    config_path: Option<PathBuf>,

    /// Device state file (overrides the config file)
    #[arg(long, env = "ANDROID_FS_STATE", global = true)]
    state: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "ANDROID_FS_LOG_LEVEL", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// An identity on the command line: a JSON identity, a URI, or a local path
#[derive(clap::Args, Debug, Clone)]
pub struct Target {
    target: String,

    /// Owning tree URI of the target
    #[arg(long)]
    tree: Option<String>,
}

impl Target {
    pub fn identity(&self) -> Result<FileIdentity> {
        parse_identity(&self.target, self.tree.as_deref())
    }
}

pub fn parse_identity(target: &str, tree: Option<&str>) -> Result<FileIdentity> {
    let identity = if target.trim_start().starts_with('{') {
        FileIdentity::from_json_str(target).context("invalid identity JSON")?
    } else if target.contains("://") {
        FileIdentity::new(target)
    } else {
        FileIdentity::from_path(target)
    };
    Ok(match tree {
        Some(tree) => FileIdentity::with_tree(identity.uri(), tree),
        None => identity,
    })
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show which controller owns an identity
    Resolve(Target),
    /// Print the display name
    Name(Target),
    /// Print the MIME type (null for directories)
    Mime(Target),
    /// List the children of a directory
    Ls(Target),
    /// Create an empty file below a directory, making missing directories
    Create {
        #[command(flatten)]
        dir: Target,
        /// Relative path of the new file, e.g. a/b/c.txt
        path: String,
        /// MIME type (guessed from the extension if omitted)
        #[arg(long)]
        mime: Option<String>,
    },
    /// Delete a file
    Rm(Target),
    /// Delete an empty directory
    Rmdir(Target),
    /// Delete a directory and everything below it
    RmAll(Target),
    /// Write the contents of a file to stdout or --output
    Read {
        #[command(flatten)]
        file: Target,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Replace the contents of an existing file with --data or the contents of --input
    Write {
        #[command(flatten)]
        file: Target,
        #[arg(long, conflicts_with = "input")]
        data: Option<String>,
        #[arg(long)]
        input: Option<PathBuf>,
        /// Add to the end of the file instead of replacing it
        #[arg(long)]
        append: bool,
    },
    /// Print kind, size and last-modified time
    Stat(Target),
    /// Copy the contents of one file over another
    Copy {
        from: String,
        to: String,
        #[arg(long)]
        from_tree: Option<String>,
        #[arg(long)]
        to_tree: Option<String>,
    },
    /// Render a PNG thumbnail
    Thumbnail {
        #[command(flatten)]
        file: Target,
        /// Bounding box edge in pixels (config default if omitted)
        #[arg(long)]
        size: Option<u32>,
        #[arg(long)]
        output: PathBuf,
    },
    /// Pick a directory on the emulated device, e.g. primary:Download
    PickDir { document_id: String },
    /// Add a media record on the emulated device and grant access to it
    PickMedia {
        #[arg(value_enum)]
        collection: CollectionArg,
        name: String,
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[arg(long, default_value = "")]
        relative_path: String,
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Manage persisted grants
    Grants {
        #[command(subcommand)]
        command: GrantCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum GrantCommands {
    /// List every persisted grant
    List,
    /// Check a grant
    Check {
        #[command(flatten)]
        target: Target,
        #[arg(long, value_enum, default_value = "read-write")]
        mode: ModeArg,
    },
    /// Persist read and write access
    Take(Target),
    /// Release a persisted grant
    Release(Target),
    /// Release every persisted grant
    ReleaseAll,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ModeArg {
    Read,
    Write,
    ReadWrite,
}

impl From<ModeArg> for GrantMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Read => GrantMode::Read,
            ModeArg::Write => GrantMode::Write,
            ModeArg::ReadWrite => GrantMode::ReadAndWrite,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum CollectionArg {
    Images,
    Video,
    Audio,
    Files,
}

impl From<CollectionArg> for MediaCollection {
    fn from(collection: CollectionArg) -> Self {
        match collection {
            CollectionArg::Images => MediaCollection::Images,
            CollectionArg::Video => MediaCollection::Video,
            CollectionArg::Audio => MediaCollection::Audio,
            CollectionArg::Files => MediaCollection::Files,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("android-fs v{} starting", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = cli
        .config_path
        .clone()
        .unwrap_or_else(StorageConfig::default_path);

    let config = if config_path.exists() {
        info!("loading config from {}", config_path.display());
        StorageConfig::load(&config_path)?
    } else {
        debug!("no config at {}, using defaults", config_path.display());
        StorageConfig::default()
    };

    // CLI args override config file
    let state_path = cli.state.clone().unwrap_or_else(|| config.state_path());

    let device = if state_path.exists() {
        Device::load(&state_path)?
    } else {
        info!("no device state at {}, starting empty", state_path.display());
        Device::new()?
    };

    let storage = Storage::new(
        device.documents.clone(),
        device.media.clone(),
        device.grants.clone(),
        &config,
    );

    // Storage calls may block on I/O; keep them off the runtime threads
    let worker_device = device.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        commands::run(cli.command, &storage, &worker_device)
    })
    .await
    .context("storage task panicked")??;

    device
        .save(&state_path)
        .with_context(|| format!("failed to save device state to {}", state_path.display()))?;

    outcome.print()
}
