//! Cache entry keys and their durable file names.
//!
//! A key is `(kind, id, cursor)`. Its file name is
//! `{kind}.{b64(id)}[.{b64(cursor)}].json`, with URL-safe unpadded base64 so
//! that ids and cursors of any shape map to a single path component.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

use crate::domain::NodeId;

/// Name of the record holding the ownership index and cache stamps.
pub const META_FILE: &str = "meta.json";

const EXTENSION: &str = ".json";

/// The request class a cache entry answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// Full accumulated page listing of a collection.
    Pages,
    /// One cursor page of a node's children.
    Blocks,
    /// Collection metadata.
    Collection,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pages => "pages",
            Self::Blocks => "blocks",
            Self::Collection => "collection",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pages" => Some(Self::Pages),
            "blocks" => Some(Self::Blocks),
            "collection" => Some(Self::Collection),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub kind: EntryKind,
    pub id: NodeId,
    pub cursor: Option<String>,
}

impl EntryKey {
    pub fn pages(collection: &NodeId) -> Self {
        Self {
            kind: EntryKind::Pages,
            id: collection.clone(),
            cursor: None,
        }
    }

    /// An empty cursor is the same request as no cursor.
    pub fn blocks(node: &NodeId, cursor: Option<&str>) -> Self {
        Self {
            kind: EntryKind::Blocks,
            id: node.clone(),
            cursor: cursor.filter(|cursor| !cursor.is_empty()).map(str::to_string),
        }
    }

    pub fn collection(collection: &NodeId) -> Self {
        Self {
            kind: EntryKind::Collection,
            id: collection.clone(),
            cursor: None,
        }
    }

    pub fn file_name(&self) -> String {
        let id = URL_SAFE_NO_PAD.encode(self.id.as_str());
        match &self.cursor {
            Some(cursor) => format!(
                "{}.{id}.{}{EXTENSION}",
                self.kind,
                URL_SAFE_NO_PAD.encode(cursor)
            ),
            None => format!("{}.{id}{EXTENSION}", self.kind),
        }
    }

    /// Inverse of [`EntryKey::file_name`]. Returns `None` for anything that
    /// does not follow the naming scheme, including [`META_FILE`].
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(EXTENSION)?;
        let mut parts = stem.split('.');

        let kind = EntryKind::parse(parts.next()?)?;
        let id = decode_component(parts.next()?)?;
        let cursor = match parts.next() {
            Some(encoded) => Some(decode_component(encoded)?),
            None => None,
        };
        if parts.next().is_some() {
            return None;
        }
        if cursor.is_some() && kind != EntryKind::Blocks {
            return None;
        }

        Some(Self {
            kind,
            id: NodeId::new(id),
            cursor,
        })
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cursor {
            Some(cursor) => write!(f, "{}:{}@{cursor}", self.kind, self.id),
            None => write!(f, "{}:{}", self.kind, self.id),
        }
    }
}

fn decode_component(encoded: &str) -> Option<String> {
    if encoded.is_empty() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    String::from_utf8(bytes).ok()
}
