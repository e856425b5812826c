//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{CacheArgs, CliArgs, Command, CommonOverrides, SyncArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "blockmirror";
const DEFAULT_BASE_URL: &str = "https://api.notion.com/";
const DEFAULT_API_VERSION: &str = "2022-06-28";
const DEFAULT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PAGE_SIZE: u32 = 100;
const MAX_PAGE_SIZE: u32 = 100;
const DEFAULT_CACHE_DIR: &str = ".blockmirror/notion-cache";
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1_000;
const DEFAULT_SYNC_CONCURRENCY: u32 = 3;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub remote: RemoteSettings,
    pub cache: CacheSettings,
    pub sync: SyncSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    /// Always ends in `/` so endpoint paths can be joined onto it.
    pub base_url: Url,
    pub token: Option<String>,
    pub api_version: String,
    pub timeout: Duration,
    pub page_size: u32,
    pub collection_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub persist: bool,
    pub reuse_persisted_lists: bool,
    pub retries: u32,
    pub retry_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub concurrency: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("BLOCKMIRROR").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Sync(args)) => raw.apply_sync_overrides(args),
        Some(Command::Purge(args)) | Some(Command::Status(args)) => {
            raw.apply_common_overrides(&args.overrides)
        }
        None => raw.apply_sync_overrides(&SyncArgs::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    remote: RawRemoteSettings,
    cache: RawCacheSettings,
    sync: RawSyncSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_sync_overrides(&mut self, args: &SyncArgs) {
        if let Some(collection) = args.collection.as_ref() {
            self.remote.collection_id = Some(collection.clone());
        }
        if let Some(concurrency) = args.concurrency {
            self.sync.concurrency = Some(concurrency);
        }
        if let Some(reuse) = args.reuse_persisted_lists {
            self.cache.reuse_persisted_lists = Some(reuse);
        }

        self.apply_common_overrides(&args.overrides);
    }

    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(directory) = overrides.cache_dir.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            remote,
            cache,
            sync,
            logging,
        } = raw;

        let remote = build_remote_settings(remote)?;
        let cache = build_cache_settings(cache)?;
        let sync = build_sync_settings(sync)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            remote,
            cache,
            sync,
            logging,
        })
    }
}

fn build_remote_settings(remote: RawRemoteSettings) -> Result<RemoteSettings, LoadError> {
    let raw_url = remote
        .base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    let mut base_url = Url::parse(raw_url.trim())
        .map_err(|err| LoadError::invalid("remote.base_url", format!("failed to parse: {err}")))?;
    if base_url.cannot_be_a_base() {
        return Err(LoadError::invalid(
            "remote.base_url",
            "must be an absolute http(s) URL",
        ));
    }
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    let api_version = remote
        .api_version
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());
    if api_version.trim().is_empty() {
        return Err(LoadError::invalid(
            "remote.api_version",
            "must not be empty",
        ));
    }

    let timeout_ms = remote.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "remote.timeout_ms",
            "must be greater than zero",
        ));
    }

    let page_size = remote.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(LoadError::invalid(
            "remote.page_size",
            format!("must be between 1 and {MAX_PAGE_SIZE}"),
        ));
    }

    Ok(RemoteSettings {
        base_url,
        token: non_empty(remote.token),
        api_version,
        timeout: Duration::from_millis(timeout_ms),
        page_size,
        collection_id: non_empty(remote.collection_id),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    Ok(CacheSettings {
        directory,
        persist: cache.persist.unwrap_or(true),
        reuse_persisted_lists: cache.reuse_persisted_lists.unwrap_or(false),
        retries: cache.retries.unwrap_or(DEFAULT_RETRIES),
        retry_backoff: Duration::from_millis(
            cache.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
        ),
    })
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let concurrency = sync.concurrency.unwrap_or(DEFAULT_SYNC_CONCURRENCY);
    Ok(SyncSettings {
        concurrency: non_zero_u32(concurrency.into(), "sync.concurrency")?,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRemoteSettings {
    base_url: Option<String>,
    token: Option<String>,
    api_version: Option<String>,
    timeout_ms: Option<u64>,
    page_size: Option<u32>,
    collection_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    persist: Option<bool>,
    reuse_persisted_lists: Option<bool>,
    retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    concurrency: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
