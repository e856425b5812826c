//! Walks a whole collection through the cache.
//!
//! A sync lists every page, then visits each page's block tree breadth-first,
//! descending only into blocks that report children. Pages are processed
//! concurrently; the blocks of one page are listed in order.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use futures::{TryStreamExt, stream};
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{CacheClient, CacheError};
use crate::domain::NodeId;

use super::remote::ContentSource;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("failed to retrieve collection `{collection}`: {source}")]
    Collection {
        collection: NodeId,
        #[source]
        source: CacheError,
    },
    #[error("failed to list pages of collection `{collection}`: {source}")]
    Listing {
        collection: NodeId,
        #[source]
        source: CacheError,
    },
    #[error("failed to mirror page `{page}`: {source}")]
    Page {
        page: NodeId,
        #[source]
        source: CacheError,
    },
    #[error("failed to close the cache: {0}")]
    Close(#[source] CacheError),
}

/// Outcome of one [`SiteMirror::sync`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorReport {
    pub collection: NodeId,
    pub title: Option<String>,
    pub pages: usize,
    /// Every block listed under any page, nested ones included.
    pub blocks: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct SiteMirror<S> {
    cache: Arc<CacheClient<S>>,
    concurrency: usize,
}

impl<S: ContentSource> SiteMirror<S> {
    pub fn new(cache: Arc<CacheClient<S>>, concurrency: usize) -> Self {
        Self {
            cache,
            concurrency: concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &Arc<CacheClient<S>> {
        &self.cache
    }

    pub async fn sync(&self, collection: &NodeId) -> Result<MirrorReport, MirrorError> {
        let started = Instant::now();
        let before = self.cache.stats();

        let metadata = self
            .cache
            .retrieve_collection(collection)
            .await
            .map_err(|source| MirrorError::Collection {
                collection: collection.clone(),
                source,
            })?;
        let pages = self
            .cache
            .list_pages(collection)
            .await
            .map_err(|source| MirrorError::Listing {
                collection: collection.clone(),
                source,
            })?;

        let page_count = pages.results.len();
        let blocks = AtomicUsize::new(0);
        stream::iter(pages.results.into_iter().map(Ok::<_, MirrorError>))
            .try_for_each_concurrent(Some(self.concurrency), |page| {
                let blocks = &blocks;
                async move {
                    let listed = self
                        .walk_page(&page.id)
                        .await
                        .map_err(|source| MirrorError::Page {
                            page: page.id.clone(),
                            source,
                        })?;
                    blocks.fetch_add(listed, Ordering::Relaxed);
                    Ok::<(), MirrorError>(())
                }
            })
            .await?;

        let after = self.cache.stats();
        let report = MirrorReport {
            collection: collection.clone(),
            title: metadata.title(),
            pages: page_count,
            blocks: blocks.load(Ordering::Relaxed),
            cache_hits: after.hits.saturating_sub(before.hits),
            cache_misses: after.misses.saturating_sub(before.misses),
        };

        info!(
            op = "mirror::sync",
            result = "ok",
            collection = %collection,
            pages = report.pages,
            blocks = report.blocks,
            hits = report.cache_hits,
            misses = report.cache_misses,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Mirrored collection"
        );
        Ok(report)
    }

    /// Run [`SiteMirror::sync`], then close the cache.
    ///
    /// The cache is closed even when the sync fails, and the sync's error is
    /// the one returned.
    pub async fn sync_and_close(&self, collection: &NodeId) -> Result<MirrorReport, MirrorError> {
        let outcome = self.sync(collection).await;
        let closed = self.cache.close().await;

        match outcome {
            Ok(report) => {
                closed.map_err(MirrorError::Close)?;
                Ok(report)
            }
            Err(err) => {
                if let Err(close_err) = closed {
                    warn!(
                        op = "mirror::sync_and_close",
                        result = "close_failed",
                        collection = %collection,
                        error = %close_err,
                        "Failed to close the cache after a failed sync"
                    );
                }
                Err(err)
            }
        }
    }

    /// List every block under `page`. Returns how many were listed.
    async fn walk_page(&self, page: &NodeId) -> Result<usize, CacheError> {
        let mut queue = VecDeque::from([page.clone()]);
        let mut visited = HashSet::from([page.clone()]);
        let mut listed = 0;

        while let Some(node) = queue.pop_front() {
            let mut cursor: Option<String> = None;
            let mut seen_cursors = HashSet::new();

            loop {
                let children = self
                    .cache
                    .list_block_children(&node, cursor.as_deref())
                    .await?;
                listed += children.results.len();

                for child in children.results.iter().filter(|block| block.has_children) {
                    if visited.insert(child.id.clone()) {
                        queue.push_back(child.id.clone());
                    }
                }

                match children.continuation() {
                    Some(next) if seen_cursors.insert(next.to_string()) => {
                        cursor = Some(next.to_string());
                    }
                    Some(next) => {
                        warn!(
                            op = "mirror::walk_page",
                            result = "cursor_loop",
                            node = %node,
                            cursor = next,
                            "Upstream repeated a cursor; stopping pagination"
                        );
                        break;
                    }
                    None => break,
                }
            }
        }

        Ok(listed)
    }
}
