//! In-memory cache entries and their durable mirror.
//!
//! The store holds bodies only. Whether an entry may be served is decided by
//! the caller through the ownership index and freshness oracle.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use metrics::counter;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::domain::{BlockList, Collection, NodeId, PageList, Timestamp};

use super::durable::{
    DurableError, DurableMirror, METRIC_CACHE_CORRUPT_TOTAL, MetadataRecord, MetadataState,
};
use super::keys::{EntryKey, EntryKind};
use super::lock::{read, write};

/// What [`CacheStore::load_from_durable_storage`] recovered.
#[derive(Debug, Default)]
pub struct Rehydrated {
    /// `None` when the metadata record was missing or unparsable.
    pub metadata: Option<MetadataRecord>,
    /// Page edit times carried by persisted page listings.
    pub authoritative: Vec<(NodeId, Timestamp)>,
    pub entries: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub page_lists: usize,
    pub block_entries: usize,
    pub collections: usize,
}

pub struct CacheStore {
    page_lists: RwLock<HashMap<NodeId, PageList>>,
    // node → cursor → one page of children
    block_children: RwLock<HashMap<NodeId, BTreeMap<Option<String>, BlockList>>>,
    collections: RwLock<HashMap<NodeId, Collection>>,
    mirror: Option<DurableMirror>,
}

impl CacheStore {
    pub fn in_memory() -> Self {
        Self::build(None)
    }

    pub fn durable(mirror: DurableMirror) -> Self {
        Self::build(Some(mirror))
    }

    fn build(mirror: Option<DurableMirror>) -> Self {
        Self {
            page_lists: RwLock::new(HashMap::new()),
            block_children: RwLock::new(HashMap::new()),
            collections: RwLock::new(HashMap::new()),
            mirror,
        }
    }

    pub fn mirror(&self) -> Option<&DurableMirror> {
        self.mirror.as_ref()
    }

    pub fn get_page_list(&self, collection: &NodeId) -> Option<PageList> {
        read(&self.page_lists, "store::get_page_list")
            .get(collection)
            .cloned()
    }

    pub async fn put_page_list(
        &self,
        collection: &NodeId,
        list: PageList,
    ) -> Result<(), DurableError> {
        if let Some(mirror) = &self.mirror {
            mirror.write_entry(&EntryKey::pages(collection), &list).await?;
        }
        write(&self.page_lists, "store::put_page_list").insert(collection.clone(), list);
        Ok(())
    }

    pub fn get_block_children(&self, node: &NodeId, cursor: Option<&str>) -> Option<BlockList> {
        read(&self.block_children, "store::get_block_children")
            .get(node)
            .and_then(|pages| pages.get(&cursor.map(str::to_string)))
            .cloned()
    }

    pub async fn put_block_children(
        &self,
        node: &NodeId,
        cursor: Option<&str>,
        list: BlockList,
    ) -> Result<(), DurableError> {
        if let Some(mirror) = &self.mirror {
            mirror
                .write_entry(&EntryKey::blocks(node, cursor), &list)
                .await?;
        }
        write(&self.block_children, "store::put_block_children")
            .entry(node.clone())
            .or_default()
            .insert(cursor.map(str::to_string), list);
        Ok(())
    }

    /// Drop every cursor page of `node` except `keep`, in memory and on disk.
    pub async fn supersede_cursors(
        &self,
        node: &NodeId,
        keep: Option<&str>,
    ) -> Result<usize, DurableError> {
        let keep = keep.map(str::to_string);
        let removed: Vec<Option<String>> = {
            let mut guard = write(&self.block_children, "store::supersede_cursors");
            match guard.get_mut(node) {
                Some(pages) => {
                    let stale: Vec<_> = pages.keys().filter(|c| **c != keep).cloned().collect();
                    for cursor in &stale {
                        pages.remove(cursor);
                    }
                    stale
                }
                None => Vec::new(),
            }
        };

        if let Some(mirror) = &self.mirror {
            for cursor in &removed {
                mirror
                    .remove_entry(&EntryKey::blocks(node, cursor.as_deref()))
                    .await?;
            }
        }
        Ok(removed.len())
    }

    pub fn get_collection(&self, collection: &NodeId) -> Option<Collection> {
        read(&self.collections, "store::get_collection")
            .get(collection)
            .cloned()
    }

    pub async fn put_collection(
        &self,
        collection: &NodeId,
        value: Collection,
    ) -> Result<(), DurableError> {
        if let Some(mirror) = &self.mirror {
            mirror
                .write_entry(&EntryKey::collection(collection), &value)
                .await?;
        }
        write(&self.collections, "store::put_collection").insert(collection.clone(), value);
        Ok(())
    }

    pub async fn persist_metadata(&self, record: &MetadataRecord) -> Result<(), DurableError> {
        match &self.mirror {
            Some(mirror) => mirror.write_metadata(record).await,
            None => Ok(()),
        }
    }

    /// Read the durable mirror into memory.
    ///
    /// Nothing is loaded unless the metadata record is usable. Page listings
    /// always contribute their edit times; their bodies (and collection
    /// metadata) are only kept when `reuse_lists` is set. Entries that fail
    /// to decode are skipped.
    pub async fn load_from_durable_storage(
        &self,
        reuse_lists: bool,
    ) -> Result<Rehydrated, DurableError> {
        let Some(mirror) = &self.mirror else {
            return Ok(Rehydrated::default());
        };

        let snapshot = mirror.load().await?;
        let metadata = match snapshot.metadata {
            MetadataState::Loaded(record) => record,
            MetadataState::Missing | MetadataState::Corrupt => return Ok(Rehydrated::default()),
        };

        let mut rehydrated = Rehydrated::default();
        for (key, bytes) in snapshot.entries {
            let loaded = match key.kind {
                EntryKind::Pages => decode::<PageList>(&key, &bytes).map(|list| {
                    rehydrated.authoritative.extend(
                        list.results
                            .iter()
                            .filter_map(|page| Some((page.id.clone(), page.last_edited_time?))),
                    );
                    if reuse_lists {
                        write(&self.page_lists, "store::load").insert(key.id.clone(), list);
                    }
                }),
                EntryKind::Blocks => decode::<BlockList>(&key, &bytes).map(|list| {
                    write(&self.block_children, "store::load")
                        .entry(key.id.clone())
                        .or_default()
                        .insert(key.cursor.clone(), list);
                }),
                EntryKind::Collection => decode::<Collection>(&key, &bytes).map(|value| {
                    if reuse_lists {
                        write(&self.collections, "store::load").insert(key.id.clone(), value);
                    }
                }),
            };
            match loaded {
                Some(()) => rehydrated.entries += 1,
                None => rehydrated.skipped += 1,
            }
        }

        info!(
            op = "store::load",
            result = "ok",
            entries = rehydrated.entries,
            skipped = rehydrated.skipped,
            stamps = metadata.cached_as_of.len(),
            parents = metadata.parents.len(),
            "Rehydrated cache from disk"
        );
        rehydrated.metadata = Some(metadata);
        Ok(rehydrated)
    }

    /// Empty memory and the durable directory.
    pub async fn purge(&self) -> Result<(), DurableError> {
        self.clear_memory();
        match &self.mirror {
            Some(mirror) => mirror.purge().await,
            None => Ok(()),
        }
    }

    pub fn clear_memory(&self) {
        write(&self.page_lists, "store::clear").clear();
        write(&self.block_children, "store::clear").clear();
        write(&self.collections, "store::clear").clear();
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            page_lists: read(&self.page_lists, "store::counts").len(),
            block_entries: read(&self.block_children, "store::counts")
                .values()
                .map(BTreeMap::len)
                .sum(),
            collections: read(&self.collections, "store::counts").len(),
        }
    }
}

fn decode<T: DeserializeOwned>(key: &EntryKey, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(
                op = "store::load",
                result = "corrupt",
                entry = %key,
                error = %err,
                "Skipping corrupt cache record"
            );
            counter!(METRIC_CACHE_CORRUPT_TOTAL).increment(1);
            None
        }
    }
}
