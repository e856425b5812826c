use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the blockmirror binary.
#[derive(Debug, Parser)]
#[command(
    name = "blockmirror",
    version,
    about = "Mirror a Notion database into a local staleness-aware cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "BLOCKMIRROR_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Walk a collection and bring the cache up to date.
    Sync(SyncArgs),
    /// Delete every cached entry and the metadata record.
    Purge(CacheArgs),
    /// Print what the durable cache currently holds.
    Status(CacheArgs),
}

impl Default for Command {
    fn default() -> Self {
        Self::Sync(SyncArgs::default())
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct SyncArgs {
    /// Collection to mirror; falls back to `remote.collection_id`.
    #[arg(long = "collection", value_name = "ID")]
    pub collection: Option<String>,

    /// Override the number of block listings fetched concurrently.
    #[arg(long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<u32>,

    /// Serve page listings persisted by a previous run without refetching.
    #[arg(
        long = "reuse-persisted-lists",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub reuse_persisted_lists: Option<bool>,

    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub overrides: CommonOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the cache directory.
    #[arg(long = "cache-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}
