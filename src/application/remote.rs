//! The upstream content API, seen through the three read calls the cache
//! intercepts.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{BlockList, Collection, NodeId, PageList};

/// Failure of a single upstream call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request itself was rejected (4xx). Never retried.
    #[error("upstream rejected the request with status {status}: {message}")]
    Client { status: u16, message: String },
    /// Network or server-side failure. Retried within the budget.
    #[error("upstream call failed{}: {message}", status_suffix(.status))]
    Transient {
        status: Option<u16>,
        message: String,
    },
}

impl RemoteError {
    pub fn client(status: u16, message: impl Into<String>) -> Self {
        Self::Client {
            status,
            message: message.into(),
        }
    }

    pub fn transient(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Transient {
            status,
            message: message.into(),
        }
    }

    /// Classify an HTTP status into the retry taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if (400..500).contains(&status) {
            Self::client(status, message)
        } else {
            Self::transient(Some(status), message)
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Client { .. })
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|status| format!(" with status {status}"))
        .unwrap_or_default()
}

/// Read contract of the upstream content store.
///
/// Implemented by the HTTP adapter in `infra::notion` and by test stubs.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// One page of the pages in `collection`, starting at `cursor`.
    async fn list_pages(
        &self,
        collection: &NodeId,
        cursor: Option<&str>,
    ) -> Result<PageList, RemoteError>;

    /// One page of the direct children of `node`, starting at `cursor`.
    async fn list_block_children(
        &self,
        node: &NodeId,
        cursor: Option<&str>,
    ) -> Result<BlockList, RemoteError>;

    async fn retrieve_collection(&self, collection: &NodeId) -> Result<Collection, RemoteError>;
}
