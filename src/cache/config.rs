//! Cache configuration.
//!
//! Built from the `[cache]` section of `blockmirror.toml`.

use std::path::PathBuf;
use std::time::Duration;

use crate::application::paging::RetryPolicy;

const DEFAULT_DIRECTORY: &str = ".blockmirror/notion-cache";
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory of the durable mirror.
    pub directory: PathBuf,
    /// Mirror to disk; when false the cache lives for one process only.
    pub persist: bool,
    /// Serve page lists and collection metadata rehydrated from a previous
    /// run without asking upstream first.
    pub reuse_persisted_lists: bool,
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            persist: true,
            reuse_persisted_lists: false,
            retry: RetryPolicy {
                retries: DEFAULT_RETRIES,
                backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            },
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            directory: settings.directory.clone(),
            persist: settings.persist,
            reuse_persisted_lists: settings.reuse_persisted_lists,
            retry: RetryPolicy {
                retries: settings.retries,
                backoff: settings.retry_backoff,
            },
        }
    }
}

impl CacheConfig {
    /// Durable cache rooted at `directory`, retrying without delay.
    pub fn durable(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            retry: RetryPolicy::immediate(DEFAULT_RETRIES),
            ..Default::default()
        }
    }

    /// Process-local cache with no durable mirror.
    pub fn in_memory() -> Self {
        Self {
            persist: false,
            retry: RetryPolicy::immediate(DEFAULT_RETRIES),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.directory, PathBuf::from(".blockmirror/notion-cache"));
        assert!(config.persist);
        assert!(!config.reuse_persisted_lists);
        assert_eq!(config.retry.retries, 2);
        assert_eq!(config.retry.backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_profiles_do_not_sleep() {
        assert_eq!(CacheConfig::durable("/tmp/x").retry.backoff, Duration::ZERO);
        assert!(!CacheConfig::in_memory().persist);
    }
}
