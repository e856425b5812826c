//! Scripted upstream shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use blockmirror::application::remote::{ContentSource, RemoteError};
use blockmirror::domain::{BlockList, Collection, NodeId, PageList};
use serde_json::{Value, json};

pub const T1: &str = "2021-01-01T00:00:00.000Z";
pub const T2: &str = "2021-01-01T00:00:01.000Z";

#[derive(Default)]
struct Script {
    pages: Vec<Value>,
    page_chunk: usize,
    children: HashMap<String, Vec<Value>>,
    child_chunk: usize,
    failures: HashMap<String, RemoteError>,
}

/// In-memory content tree with per-call counters.
#[derive(Default)]
pub struct StubSource {
    script: Mutex<Script>,
    delay: Duration,
    block_delay: Duration,
    page_calls: AtomicUsize,
    block_calls: AtomicUsize,
    collection_calls: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Default::default()
        })
    }

    /// Children listings read the script first, then wait `delay` before
    /// answering, so edits made meanwhile are not in the response.
    pub fn with_block_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            block_delay: delay,
            ..Default::default()
        })
    }

    /// Insert or update a page with the given edit time.
    pub fn set_page(&self, id: &str, edited: &str) {
        let mut script = self.script.lock().expect("script");
        let page = json!({
            "object": "page",
            "id": id,
            "last_edited_time": edited,
            "properties": {"Name": {"title": [{"plain_text": id}]}}
        });
        match script.pages.iter_mut().find(|existing| existing["id"] == id) {
            Some(existing) => *existing = page,
            None => script.pages.push(page),
        }
    }

    pub fn set_children(&self, node: &str, children: &[(&str, bool)]) {
        let blocks = children
            .iter()
            .map(|(id, has_children)| {
                json!({
                    "object": "block",
                    "id": id,
                    "type": "paragraph",
                    "has_children": has_children,
                    "paragraph": {"rich_text": [{"plain_text": format!("text of {id}")}]}
                })
            })
            .collect();
        self.script
            .lock()
            .expect("script")
            .children
            .insert(node.to_string(), blocks);
    }

    /// Serve page listings `size` results at a time.
    pub fn paginate_pages(&self, size: usize) {
        self.script.lock().expect("script").page_chunk = size;
    }

    /// Serve children listings `size` results at a time.
    pub fn paginate_children(&self, size: usize) {
        self.script.lock().expect("script").child_chunk = size;
    }

    pub fn fail(&self, id: &str, error: RemoteError) {
        self.script
            .lock()
            .expect("script")
            .failures
            .insert(id.to_string(), error);
    }

    pub fn heal(&self, id: &str) {
        self.script.lock().expect("script").failures.remove(id);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn block_calls(&self) -> usize {
        self.block_calls.load(Ordering::SeqCst)
    }

    pub fn collection_calls(&self) -> usize {
        self.collection_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.page_calls() + self.block_calls() + self.collection_calls()
    }

    fn failure(&self, id: &str) -> Option<RemoteError> {
        self.script.lock().expect("script").failures.get(id).cloned()
    }

    async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

fn slice(all: &[Value], chunk: usize, cursor: Option<&str>) -> Value {
    let start = cursor
        .and_then(|cursor| cursor.strip_prefix("c"))
        .and_then(|index| index.parse::<usize>().ok())
        .unwrap_or(0);
    let end = if chunk == 0 {
        all.len()
    } else {
        (start + chunk).min(all.len())
    };
    let has_more = end < all.len();
    let results = all[start.min(end)..end].to_vec();

    json!({
        "object": "list",
        "results": results,
        "has_more": has_more,
        "next_cursor": has_more.then(|| format!("c{end}")),
    })
}

#[async_trait]
impl ContentSource for StubSource {
    async fn list_pages(
        &self,
        collection: &NodeId,
        cursor: Option<&str>,
    ) -> Result<PageList, RemoteError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.failure(collection.as_str()) {
            return Err(error);
        }
        let body = {
            let script = self.script.lock().expect("script");
            slice(&script.pages, script.page_chunk, cursor)
        };
        Ok(serde_json::from_value(body).expect("page list"))
    }

    async fn list_block_children(
        &self,
        node: &NodeId,
        cursor: Option<&str>,
    ) -> Result<BlockList, RemoteError> {
        self.block_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.failure(node.as_str()) {
            return Err(error);
        }
        let body = {
            let script = self.script.lock().expect("script");
            let children = script
                .children
                .get(node.as_str())
                .cloned()
                .unwrap_or_default();
            slice(&children, script.child_chunk, cursor)
        };
        if !self.block_delay.is_zero() {
            tokio::time::sleep(self.block_delay).await;
        }
        Ok(serde_json::from_value(body).expect("block list"))
    }

    async fn retrieve_collection(&self, collection: &NodeId) -> Result<Collection, RemoteError> {
        self.collection_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(error) = self.failure(collection.as_str()) {
            return Err(error);
        }
        Ok(serde_json::from_value(json!({
            "object": "database",
            "id": collection,
            "title": [{"plain_text": "Site "}, {"plain_text": "content"}]
        }))
        .expect("collection"))
    }
}

pub fn id(value: &str) -> NodeId {
    NodeId::from(value)
}
