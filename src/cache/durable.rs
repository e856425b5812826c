//! On-disk mirror of the cache.
//!
//! One JSON record per cache entry plus [`META_FILE`]. Records are written to
//! a temporary file in the same directory and renamed into place, so a
//! previously valid record is never left half-overwritten.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{NodeId, Timestamp};

use super::keys::{EntryKey, META_FILE};

pub(crate) const METRIC_CACHE_CORRUPT_TOTAL: &str = "blockmirror_cache_corrupt_total";

#[derive(Debug, Error)]
pub enum DurableError {
    #[error("cache i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode cache record {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cache writer task aborted: {0}")]
    Task(String),
}

impl DurableError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Contents of [`META_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub cached_as_of: BTreeMap<NodeId, Timestamp>,
    pub parents: BTreeMap<NodeId, NodeId>,
}

#[derive(Debug)]
pub enum MetadataState {
    Missing,
    Corrupt,
    Loaded(MetadataRecord),
}

/// Everything read back from the directory. Entry bodies are left raw so the
/// caller can decode them per kind.
#[derive(Debug)]
pub struct MirrorSnapshot {
    pub metadata: MetadataState,
    pub entries: Vec<(EntryKey, Vec<u8>)>,
}

#[derive(Debug, Clone)]
pub struct DurableMirror {
    directory: PathBuf,
}

impl DurableMirror {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn entry_path(&self, key: &EntryKey) -> PathBuf {
        self.directory.join(key.file_name())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.directory.join(META_FILE)
    }

    pub async fn write_entry<T: Serialize>(
        &self,
        key: &EntryKey,
        value: &T,
    ) -> Result<(), DurableError> {
        self.write_json(self.entry_path(key), value).await
    }

    pub async fn write_metadata(&self, record: &MetadataRecord) -> Result<(), DurableError> {
        self.write_json(self.metadata_path(), record).await
    }

    /// Remove an entry record. A record that is already gone is not an error.
    pub async fn remove_entry(&self, key: &EntryKey) -> Result<(), DurableError> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DurableError::io(&path, err)),
        }
    }

    /// Read the metadata record and, only if it is usable, every entry record.
    ///
    /// A missing directory reads as an empty mirror. Files that do not follow
    /// the entry naming scheme are ignored.
    pub async fn load(&self) -> Result<MirrorSnapshot, DurableError> {
        let metadata = self.read_metadata().await;
        if !matches!(metadata, MetadataState::Loaded(_)) {
            return Ok(MirrorSnapshot {
                metadata,
                entries: Vec::new(),
            });
        }

        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(MirrorSnapshot {
                    metadata,
                    entries,
                });
            }
            Err(err) => return Err(DurableError::io(&self.directory, err)),
        };

        while let Some(item) = dir
            .next_entry()
            .await
            .map_err(|err| DurableError::io(&self.directory, err))?
        {
            let name = item.file_name();
            let Some(key) = name.to_str().and_then(EntryKey::parse_file_name) else {
                continue;
            };
            let path = item.path();
            match tokio::fs::read(&path).await {
                Ok(bytes) => entries.push((key, bytes)),
                Err(err) => {
                    warn!(
                        op = "durable::load",
                        result = "unreadable",
                        path = %path.display(),
                        error = %err,
                        "Skipping unreadable cache record"
                    );
                    counter!(METRIC_CACHE_CORRUPT_TOTAL).increment(1);
                }
            }
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(MirrorSnapshot { metadata, entries })
    }

    /// Delete every record and leave an empty directory behind.
    pub async fn purge(&self) -> Result<(), DurableError> {
        match tokio::fs::remove_dir_all(&self.directory).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(DurableError::io(&self.directory, err)),
        }
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|err| DurableError::io(&self.directory, err))
    }

    async fn read_metadata(&self) -> MetadataState {
        let path = self.metadata_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(
                    op = "durable::read_metadata",
                    result = "missing",
                    path = %path.display(),
                    "No cache metadata; starting cold"
                );
                return MetadataState::Missing;
            }
            Err(err) => {
                warn!(
                    op = "durable::read_metadata",
                    result = "unreadable",
                    path = %path.display(),
                    error = %err,
                    "Cache metadata is unreadable; treating the whole cache as empty"
                );
                counter!(METRIC_CACHE_CORRUPT_TOTAL).increment(1);
                return MetadataState::Corrupt;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => MetadataState::Loaded(record),
            Err(err) => {
                warn!(
                    op = "durable::read_metadata",
                    result = "corrupt",
                    path = %path.display(),
                    error = %err,
                    "Cache metadata is unparsable; treating the whole cache as empty"
                );
                counter!(METRIC_CACHE_CORRUPT_TOTAL).increment(1);
                MetadataState::Corrupt
            }
        }
    }

    async fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> Result<(), DurableError> {
        let bytes = serde_json::to_vec(value).map_err(|source| DurableError::Encode {
            path: path.clone(),
            source,
        })?;
        let directory = self.directory.clone();

        tokio::task::spawn_blocking(move || write_atomically(&directory, &path, &bytes))
            .await
            .map_err(|err| DurableError::Task(err.to_string()))?
    }
}

fn write_atomically(directory: &Path, path: &Path, bytes: &[u8]) -> Result<(), DurableError> {
    std::fs::create_dir_all(directory).map_err(|err| DurableError::io(directory, err))?;

    let mut file = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(directory)
        .map_err(|err| DurableError::io(directory, err))?;
    file.write_all(bytes)
        .and_then(|()| file.flush())
        .map_err(|err| DurableError::io(file.path(), err))?;
    file.persist(path)
        .map_err(|err| DurableError::io(path, err.error))?;

    debug!(
        op = "durable::write",
        result = "ok",
        path = %path.display(),
        bytes = bytes.len(),
        "Wrote cache record"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    fn sample_metadata() -> MetadataRecord {
        MetadataRecord {
            cached_as_of: BTreeMap::from([(
                NodeId::from("pageId"),
                Timestamp::parse("2021-01-01T00:00:00.000Z").expect("ts"),
            )]),
            parents: BTreeMap::from([(NodeId::from("blockId"), NodeId::from("pageId"))]),
        }
    }

    #[tokio::test]
    async fn metadata_round_trips_through_disk() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path().join("cache"));

        mirror
            .write_metadata(&sample_metadata())
            .await
            .expect("write metadata");

        let raw: serde_json::Value = serde_json::from_slice(
            &std::fs::read(mirror.metadata_path()).expect("read meta"),
        )
        .expect("json");
        assert_eq!(
            raw,
            json!({
                "cached_as_of": {"pageId": "2021-01-01T00:00:00Z"},
                "parents": {"blockId": "pageId"}
            })
        );

        let snapshot = mirror.load().await.expect("load");
        match snapshot.metadata {
            MetadataState::Loaded(record) => assert_eq!(record, sample_metadata()),
            other => panic!("unexpected metadata state: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_directory_loads_as_missing() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path().join("absent"));

        let snapshot = mirror.load().await.expect("load");
        assert!(matches!(snapshot.metadata, MetadataState::Missing));
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn corrupt_metadata_skips_every_entry() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path());
        let key = EntryKey::blocks(&NodeId::from("pageId"), None);
        mirror
            .write_entry(&key, &json!({"results": []}))
            .await
            .expect("write entry");
        std::fs::write(mirror.metadata_path(), b"{not json").expect("corrupt meta");

        let snapshot = mirror.load().await.expect("load");
        assert!(matches!(snapshot.metadata, MetadataState::Corrupt));
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn unreadable_metadata_loads_as_corrupt() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path());
        let key = EntryKey::blocks(&NodeId::from("pageId"), None);
        mirror
            .write_entry(&key, &json!({"results": []}))
            .await
            .expect("write entry");
        std::fs::create_dir(mirror.metadata_path()).expect("meta as directory");

        let snapshot = mirror.load().await.expect("load");
        assert!(matches!(snapshot.metadata, MetadataState::Corrupt));
        assert!(snapshot.entries.is_empty());
    }

    #[tokio::test]
    async fn unrelated_files_are_ignored() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path());
        mirror
            .write_metadata(&MetadataRecord::default())
            .await
            .expect("write meta");
        let key = EntryKey::blocks(&NodeId::from("pageId"), Some("c1"));
        mirror
            .write_entry(&key, &json!({"results": []}))
            .await
            .expect("write entry");
        std::fs::write(dir.path().join("notes.txt"), b"hello").expect("unrelated");
        std::fs::write(dir.path().join("blocks-legacy.json"), b"{}").expect("legacy");

        let snapshot = mirror.load().await.expect("load");
        let keys: Vec<_> = snapshot.entries.iter().map(|(key, _)| key.clone()).collect();
        assert_eq!(keys, vec![key]);
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_record_and_leaves_no_temp_files() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path());
        let key = EntryKey::pages(&NodeId::from("db"));

        mirror
            .write_entry(&key, &json!({"results": [1, 2, 3, 4, 5, 6]}))
            .await
            .expect("first write");
        mirror
            .write_entry(&key, &json!({"results": [1]}))
            .await
            .expect("second write");

        let stored: serde_json::Value =
            serde_json::from_slice(&std::fs::read(mirror.entry_path(&key)).expect("read"))
                .expect("well-formed");
        assert_eq!(stored, json!({"results": [1]}));

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("list")
            .map(|item| item.expect("entry").file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[tokio::test]
    async fn purge_empties_the_directory_and_remove_tolerates_absence() {
        let dir = TempDir::new().expect("temp dir");
        let mirror = DurableMirror::new(dir.path().join("cache"));
        let key = EntryKey::collection(&NodeId::from("db"));
        mirror.write_entry(&key, &json!({"id": "db"})).await.expect("write");

        mirror.purge().await.expect("purge");
        assert!(mirror.directory().exists());
        assert_eq!(std::fs::read_dir(mirror.directory()).expect("list").count(), 0);

        mirror.remove_entry(&key).await.expect("already gone");
    }
}
