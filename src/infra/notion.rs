//! HTTP adapter for the Notion public API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::application::remote::{ContentSource, RemoteError};
use crate::config::RemoteSettings;
use crate::domain::{BlockList, Collection, NodeId, PageList};

use super::error::InfraError;

const NOTION_VERSION_HEADER: &str = "Notion-Version";

#[derive(Clone, Debug)]
pub struct HttpContentSource {
    client: Client,
    base: Url,
    token: String,
    api_version: String,
    page_size: u32,
}

impl HttpContentSource {
    pub fn new(settings: &RemoteSettings) -> Result<Self, InfraError> {
        let token = settings.token.clone().ok_or_else(|| {
            InfraError::configuration("remote.token is required to reach the content API")
        })?;
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(settings.timeout)
            .build()
            .map_err(|err| InfraError::http(err.to_string()))?;

        Ok(Self {
            client,
            base: settings.base_url.clone(),
            token,
            api_version: settings.api_version.clone(),
            page_size: settings.page_size,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("blockmirror/", env!("CARGO_PKG_VERSION"))
    }

    /// `base` followed by `segments`, each percent-encoded as one segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RemoteError::client(400, format!("base url `{}` cannot take a path", self.base))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(NOTION_VERSION_HEADER, self.api_version.as_str())
    }

    async fn send<T: DeserializeOwned>(
        &self,
        op: &'static str,
        request: RequestBuilder,
    ) -> Result<T, RemoteError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| RemoteError::transient(None, err.to_string()))?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| RemoteError::transient(Some(status.as_u16()), err.to_string()))?;

        debug!(
            op,
            result = if status.is_success() { "ok" } else { "error" },
            status = status.as_u16(),
            bytes = bytes.len(),
            "Upstream response"
        );

        if !status.is_success() {
            return Err(RemoteError::from_status(
                status.as_u16(),
                error_message(&bytes),
            ));
        }
        serde_json::from_slice(&bytes).map_err(|err| {
            RemoteError::transient(
                Some(status.as_u16()),
                format!("failed to parse body: {err}"),
            )
        })
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn list_pages(
        &self,
        collection: &NodeId,
        cursor: Option<&str>,
    ) -> Result<PageList, RemoteError> {
        let url = self.endpoint(&["v1", "databases", collection.as_str(), "query"])?;
        let mut body = Map::new();
        body.insert("page_size".into(), json!(self.page_size));
        if let Some(cursor) = cursor {
            body.insert("start_cursor".into(), json!(cursor));
        }

        self.send("notion::list_pages", self.client.post(url).json(&body))
            .await
    }

    async fn list_block_children(
        &self,
        node: &NodeId,
        cursor: Option<&str>,
    ) -> Result<BlockList, RemoteError> {
        let mut url = self.endpoint(&["v1", "blocks", node.as_str(), "children"])?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("page_size", &self.page_size.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("start_cursor", cursor);
            }
        }

        self.send("notion::list_block_children", self.client.get(url))
            .await
    }

    async fn retrieve_collection(&self, collection: &NodeId) -> Result<Collection, RemoteError> {
        let url = self.endpoint(&["v1", "databases", collection.as_str()])?;
        self.send("notion::retrieve_collection", self.client.get(url))
            .await
    }
}

/// The `message` of an upstream error body, or the raw body.
fn error_message(bytes: &[u8]) -> String {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|body| body.get("message")?.as_str().map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(base_url: &str) -> HttpContentSource {
        HttpContentSource::new(&RemoteSettings {
            base_url: Url::parse(base_url).expect("base url"),
            token: Some("token".into()),
            api_version: "2022-06-28".into(),
            timeout: std::time::Duration::from_secs(5),
            page_size: 100,
            collection_id: None,
        })
        .expect("source")
    }

    #[test]
    fn ids_are_encoded_as_single_path_segments() {
        let source = source("https://api.notion.com/");
        let url = source
            .endpoint(&["v1", "blocks", "a/b?c#d", "children"])
            .expect("url");

        assert_eq!(
            url.as_str(),
            "https://api.notion.com/v1/blocks/a%2Fb%3Fc%23d/children"
        );
        assert_eq!(url.query(), None);
    }

    #[test]
    fn endpoints_keep_the_base_path() {
        let source = source("https://proxy.example/notion/");
        let url = source.endpoint(&["v1", "databases", "db"]).expect("url");
        assert_eq!(url.as_str(), "https://proxy.example/notion/v1/databases/db");
    }

    #[test]
    fn error_message_prefers_the_json_message() {
        let body = br#"{"object":"error","status":404,"code":"object_not_found","message":"Could not find block"}"#;
        assert_eq!(error_message(body), "Could not find block");
        assert_eq!(error_message(b"gateway timeout"), "gateway timeout");
    }
}
