//! Wire shapes of the upstream content API.
//!
//! Only the fields the cache reasons about are typed. Everything else rides
//! along in `extra` so a cached response is the same JSON value that was
//! fetched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{NodeId, Timestamp};

/// One page of a cursor-paginated list call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub results: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<T> ListResponse<T> {
    /// A terminal response holding `results` and nothing more to fetch.
    pub fn complete(results: Vec<T>) -> Self {
        Self {
            results,
            has_more: false,
            next_cursor: None,
            extra: Map::new(),
        }
    }

    /// The cursor to request next, if pagination should continue.
    pub fn continuation(&self) -> Option<&str> {
        if self.has_more {
            self.next_cursor.as_deref()
        } else {
            None
        }
    }
}

pub type PageList = ListResponse<Page>;
pub type BlockList = ListResponse<Block>;

/// A top-level entry of a collection. Pages are the roots of block trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_edited_time: Option<Timestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: NodeId,
    #[serde(default)]
    pub has_children: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Collection (database) metadata returned by `retrieve_collection`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: NodeId,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Collection {
    /// Plain-text title, when the upstream shape carries one.
    pub fn title(&self) -> Option<String> {
        let parts = self.extra.get("title")?.as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|part| part.get("plain_text").and_then(Value::as_str))
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let raw = json!({
            "object": "list",
            "type": "block",
            "block": {},
            "has_more": false,
            "next_cursor": null,
            "results": [{
                "id": "blockId",
                "object": "block",
                "type": "paragraph",
                "has_children": true,
                "paragraph": {"rich_text": [{"plain_text": "Hello"}]}
            }]
        });

        let parsed: BlockList = serde_json::from_value(raw.clone()).expect("parse");
        assert!(parsed.results[0].has_children);
        assert_eq!(serde_json::to_value(&parsed).expect("serialize"), raw);
    }

    #[test]
    fn continuation_requires_has_more() {
        let mut list: PageList = ListResponse::complete(Vec::new());
        list.next_cursor = Some("c1".to_string());
        assert_eq!(list.continuation(), None);

        list.has_more = true;
        assert_eq!(list.continuation(), Some("c1"));

        list.next_cursor = None;
        assert_eq!(list.continuation(), None);
    }

    #[test]
    fn page_without_edit_time_is_accepted() {
        let page: Page = serde_json::from_value(json!({"id": "p", "object": "page"}))
            .expect("partial page");
        assert!(page.last_edited_time.is_none());
    }

    #[test]
    fn collection_title_joins_rich_text() {
        let collection: Collection = serde_json::from_value(json!({
            "id": "db",
            "title": [{"plain_text": "My "}, {"plain_text": "Blog"}]
        }))
        .expect("collection");
        assert_eq!(collection.title().as_deref(), Some("My Blog"));
    }
}
