mod support;

use std::collections::HashSet;
use std::sync::Arc;

use blockmirror::application::remote::RemoteError;
use blockmirror::cache::{CacheClient, CacheConfig, EntryKey};
use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;

use support::{StubSource, T1, id};

#[tokio::test]
async fn cache_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let dir = TempDir::new().expect("temp dir");
    let source = StubSource::new();
    source.set_page("P", T1);
    source.set_children("P", &[("b1", false)]);

    // miss, hit and persist latency
    let first = CacheClient::new(Arc::clone(&source), CacheConfig::durable(dir.path()));
    first.load_cache().await.expect("load");
    first.list_pages(&id("db")).await.expect("pages");
    first.list_block_children(&id("P"), None).await.expect("miss");
    first.list_block_children(&id("P"), None).await.expect("hit");
    first.close().await.expect("close");

    // corrupt record on the next load
    std::fs::write(
        dir.path().join(EntryKey::blocks(&id("P"), None).file_name()),
        b"not json",
    )
    .expect("corrupt entry");
    let second = CacheClient::new(Arc::clone(&source), CacheConfig::durable(dir.path()));
    second.load_cache().await.expect("reload");

    // retries
    source.fail("P", RemoteError::transient(Some(500), "boom"));
    assert!(second.list_block_children(&id("P"), None).await.is_err());

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "blockmirror_cache_hit_total",
        "blockmirror_cache_miss_total",
        "blockmirror_cache_persist_ms",
        "blockmirror_cache_corrupt_total",
        "blockmirror_remote_retry_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
