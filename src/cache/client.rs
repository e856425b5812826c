//! Cache-aware facade over a [`ContentSource`].
//!
//! Every read goes through the same path:
//!
//! 1. wait for the per-entry flight gate;
//! 2. serve the stored entry when it is still fresh;
//! 3. otherwise fetch upstream, record ownership and freshness, write the
//!    entry, then rewrite the metadata record.
//!
//! Page listings are the only source of authoritative edit times. They are
//! fetched once per process (see [`CacheClient::refresh_pages`] to force
//! another round trip).

use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::application::paging::{FetchError, PagedFetcher};
use crate::application::remote::ContentSource;
use crate::domain::{BlockList, Collection, NodeId, PageList, Timestamp};

use super::config::CacheConfig;
use super::durable::{DurableError, DurableMirror, MetadataRecord};
use super::flight::SingleFlight;
use super::freshness::FreshnessOracle;
use super::keys::{EntryKey, EntryKind};
use super::lock::{read, write};
use super::ownership::{OwnershipIndex, Root};
use super::store::{CacheStore, StoreCounts};

pub(crate) const METRIC_CACHE_HIT_TOTAL: &str = "blockmirror_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS_TOTAL: &str = "blockmirror_cache_miss_total";
pub(crate) const METRIC_CACHE_PERSIST_MS: &str = "blockmirror_cache_persist_ms";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache read issued before load_cache()")]
    NotLoaded,
    #[error("cache client is closed")]
    Closed,
    #[error("{operation} for `{id}` failed: {source}")]
    Fetch {
        operation: &'static str,
        id: NodeId,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Storage(#[from] DurableError),
}

impl CacheError {
    fn fetch(operation: &'static str, id: &NodeId, source: FetchError) -> Self {
        Self::Fetch {
            operation,
            id: id.clone(),
            source,
        }
    }

    /// The upstream failure behind this error, if any.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::Fetch { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Point-in-time view of the engine, for status reporting.
#[derive(Debug, Clone, Default)]
pub struct CacheStatus {
    pub entries: StoreCounts,
    pub parents: usize,
    pub authoritative: usize,
    pub stamped: usize,
    pub stats: CacheStats,
}

pub struct CacheClient<S> {
    source: Arc<S>,
    fetcher: PagedFetcher,
    config: CacheConfig,
    store: CacheStore,
    // Lock order: ownership before freshness.
    ownership: RwLock<OwnershipIndex>,
    freshness: RwLock<FreshnessOracle>,
    flights: SingleFlight,
    metadata_lock: Mutex<()>,
    loaded: OnceCell<()>,
    closed: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: ContentSource> CacheClient<S> {
    pub fn new(source: Arc<S>, config: CacheConfig) -> Self {
        let store = if config.persist {
            CacheStore::durable(DurableMirror::new(&config.directory))
        } else {
            CacheStore::in_memory()
        };

        Self {
            source,
            fetcher: PagedFetcher::new(config.retry),
            config,
            store,
            ownership: RwLock::new(OwnershipIndex::new()),
            freshness: RwLock::new(FreshnessOracle::new()),
            flights: SingleFlight::new(),
            metadata_lock: Mutex::new(()),
            loaded: OnceCell::new(),
            closed: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Rehydrate from the durable mirror. Must complete before any read.
    ///
    /// Idempotent: concurrent and repeated calls share one load.
    pub async fn load_cache(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        self.loaded.get_or_try_init(|| self.rehydrate()).await?;
        Ok(())
    }

    async fn rehydrate(&self) -> Result<(), CacheError> {
        let rehydrated = self
            .store
            .load_from_durable_storage(self.config.reuse_persisted_lists)
            .await?;

        let Some(metadata) = rehydrated.metadata else {
            info!(
                op = "cache::load",
                result = "cold",
                persist = self.config.persist,
                "Starting with an empty cache"
            );
            return Ok(());
        };

        let parents = metadata.parents.len();
        let stamps = metadata.cached_as_of.len();
        *write(&self.ownership, "cache::load") = OwnershipIndex::from_parents(metadata.parents);
        {
            let mut oracle = write(&self.freshness, "cache::load");
            oracle.restore_cached(metadata.cached_as_of);
            for (page, edited) in rehydrated.authoritative {
                oracle.record_authoritative(page, edited);
            }
        }

        info!(
            op = "cache::load",
            result = "warm",
            entries = rehydrated.entries,
            skipped = rehydrated.skipped,
            parents,
            stamps,
            directory = %self.config.directory.display(),
            "Loaded cache"
        );
        Ok(())
    }

    /// Every page of `collection`, served from the cache after the first
    /// successful listing.
    pub async fn list_pages(&self, collection: &NodeId) -> Result<PageList, CacheError> {
        self.ensure_ready()?;
        let key = EntryKey::pages(collection);
        let _flight = self.flights.acquire(&key).await;

        if let Some(list) = self.store.get_page_list(collection) {
            self.record_hit(&key);
            return Ok(list);
        }
        self.fetch_pages(&key, collection).await
    }

    /// Re-list `collection` upstream, updating every page's edit time.
    pub async fn refresh_pages(&self, collection: &NodeId) -> Result<PageList, CacheError> {
        self.ensure_ready()?;
        let key = EntryKey::pages(collection);
        let _flight = self.flights.acquire(&key).await;
        self.fetch_pages(&key, collection).await
    }

    async fn fetch_pages(
        &self,
        key: &EntryKey,
        collection: &NodeId,
    ) -> Result<PageList, CacheError> {
        self.record_miss(key);
        let source = &self.source;
        let results = self
            .fetcher
            .fetch_all(|cursor| async move { source.list_pages(collection, cursor.as_deref()).await })
            .await
            .map_err(|err| CacheError::fetch("list_pages", collection, err))?;

        let list = PageList::complete(results);
        self.store.put_page_list(collection, list.clone()).await?;
        {
            let mut oracle = write(&self.freshness, "cache::list_pages");
            for page in &list.results {
                if let Some(edited) = page.last_edited_time {
                    oracle.record_authoritative(page.id.clone(), edited);
                }
            }
        }
        self.persist_metadata().await?;

        debug!(
            op = "cache::list_pages",
            result = "fetched",
            collection = %collection,
            pages = list.results.len(),
            "Listed pages upstream"
        );
        Ok(list)
    }

    /// One cursor page of `node`'s children.
    ///
    /// Served from the cache only while the owning page's edit time equals
    /// the stamp recorded when this node was last fetched.
    pub async fn list_block_children(
        &self,
        node: &NodeId,
        cursor: Option<&str>,
    ) -> Result<BlockList, CacheError> {
        self.ensure_ready()?;
        // An empty cursor asks for the first page.
        let cursor = cursor.filter(|cursor| !cursor.is_empty());
        let key = EntryKey::blocks(node, cursor);
        let _flight = self.flights.acquire(&key).await;

        if self.is_fresh(node)
            && let Some(list) = self.store.get_block_children(node, cursor)
        {
            self.record_hit(&key);
            return Ok(list);
        }

        self.record_miss(&key);
        // Stamp with the root's edit time as of the request.
        let stamp = {
            let ownership = read(&self.ownership, "cache::list_block_children");
            read(&self.freshness, "cache::list_block_children").authoritative_for(node, &ownership)
        };

        let source = &self.source;
        let list = self
            .fetcher
            .fetch_one(|| async move { source.list_block_children(node, cursor).await })
            .await
            .map_err(|err| CacheError::fetch("list_block_children", node, err))?;

        let current = {
            let mut ownership = write(&self.ownership, "cache::list_block_children");
            for child in list.results.iter().filter(|block| block.has_children) {
                ownership.record_child(child.id.clone(), node.clone());
            }
            read(&self.freshness, "cache::list_block_children").authoritative_for(node, &ownership)
        };
        if current != stamp {
            debug!(
                op = "cache::list_block_children",
                result = "edited_in_flight",
                node = %node,
                "Root edit time changed during the fetch; keeping the older stamp"
            );
        }

        self.store
            .put_block_children(node, cursor, list.clone())
            .await?;

        let previous = read(&self.freshness, "cache::list_block_children").cached_as_of(node);
        if previous != stamp {
            let superseded = self.store.supersede_cursors(node, cursor).await?;
            if superseded > 0 {
                debug!(
                    op = "cache::list_block_children",
                    result = "superseded",
                    node = %node,
                    superseded,
                    "Dropped cursor pages fetched under an older stamp"
                );
            }
        }
        self.stamp(node, stamp);
        self.persist_metadata().await?;

        debug!(
            op = "cache::list_block_children",
            result = "fetched",
            node = %node,
            cursor = cursor.unwrap_or(""),
            children = list.results.len(),
            stamped = stamp.is_some(),
            "Listed block children upstream"
        );
        Ok(list)
    }

    /// Collection metadata. Cached with the same lifetime as page listings.
    pub async fn retrieve_collection(&self, collection: &NodeId) -> Result<Collection, CacheError> {
        self.ensure_ready()?;
        let key = EntryKey::collection(collection);
        let _flight = self.flights.acquire(&key).await;

        if let Some(value) = self.store.get_collection(collection) {
            self.record_hit(&key);
            return Ok(value);
        }

        self.record_miss(&key);
        let source = &self.source;
        let value = self
            .fetcher
            .fetch_one(|| async move { source.retrieve_collection(collection).await })
            .await
            .map_err(|err| CacheError::fetch("retrieve_collection", collection, err))?;

        self.store.put_collection(collection, value.clone()).await?;
        self.persist_metadata().await?;
        Ok(value)
    }

    /// Forget everything, in memory and on disk.
    pub async fn purge_cache(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        let _metadata = self.metadata_lock.lock().await;
        write(&self.ownership, "cache::purge").clear();
        write(&self.freshness, "cache::purge").clear();
        self.store.purge().await?;

        info!(
            op = "cache::purge",
            result = "ok",
            directory = %self.config.directory.display(),
            "Purged cache"
        );
        Ok(())
    }

    /// Flush metadata and refuse further reads.
    pub async fn close(&self) -> Result<(), CacheError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.loaded.initialized() {
            self.persist_metadata().await?;
        }
        let stats = self.stats();
        info!(
            op = "cache::close",
            result = "ok",
            hits = stats.hits,
            misses = stats.misses,
            "Closed cache"
        );
        Ok(())
    }

    /// Whether a stored children listing of `node` may be served.
    pub fn is_fresh(&self, node: &NodeId) -> bool {
        let ownership = read(&self.ownership, "cache::is_fresh");
        read(&self.freshness, "cache::is_fresh").is_valid(node, &ownership)
    }

    pub fn cached_as_of(&self, node: &NodeId) -> Option<Timestamp> {
        read(&self.freshness, "cache::cached_as_of").cached_as_of(node)
    }

    pub fn last_edited(&self, page: &NodeId) -> Option<Timestamp> {
        read(&self.freshness, "cache::last_edited").authoritative(page)
    }

    pub fn root_of(&self, node: &NodeId) -> Root {
        read(&self.ownership, "cache::root_of").find_root(node)
    }

    pub fn parent_of(&self, node: &NodeId) -> Option<NodeId> {
        read(&self.ownership, "cache::parent_of")
            .parent_of(node)
            .cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn status(&self) -> CacheStatus {
        let parents = read(&self.ownership, "cache::status").len();
        let (authoritative, stamped) = {
            let oracle = read(&self.freshness, "cache::status");
            (oracle.authoritative_len(), oracle.cached_len())
        };
        CacheStatus {
            entries: self.store.counts(),
            parents,
            authoritative,
            stamped,
            stats: self.stats(),
        }
    }

    fn ensure_ready(&self) -> Result<(), CacheError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed);
        }
        if !self.loaded.initialized() {
            return Err(CacheError::NotLoaded);
        }
        Ok(())
    }

    fn stamp(&self, node: &NodeId, stamp: Option<Timestamp>) {
        let mut oracle = write(&self.freshness, "cache::stamp");
        match stamp {
            Some(stamp) => {
                oracle.record_cached(node.clone(), stamp);
            }
            None => {
                oracle.forget_cached(node);
            }
        }
    }

    async fn persist_metadata(&self) -> Result<(), DurableError> {
        if self.store.mirror().is_none() {
            return Ok(());
        }

        let _metadata = self.metadata_lock.lock().await;
        let parents = read(&self.ownership, "cache::persist_metadata").snapshot();
        let cached_as_of = read(&self.freshness, "cache::persist_metadata").cached_snapshot();
        let record = MetadataRecord {
            cached_as_of,
            parents,
        };

        let started = Instant::now();
        self.store.persist_metadata(&record).await?;
        histogram!(METRIC_CACHE_PERSIST_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        Ok(())
    }

    fn record_hit(&self, key: &EntryKey) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_HIT_TOTAL, "kind" => key.kind.as_str()).increment(1);
        debug!(op = "cache::read", result = "hit", entry = %key, "Cache hit");
    }

    fn record_miss(&self, key: &EntryKey) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_CACHE_MISS_TOTAL, "kind" => key.kind.as_str()).increment(1);
        if key.kind != EntryKind::Pages {
            debug!(op = "cache::read", result = "miss", entry = %key, "Cache miss");
        }
    }
}
