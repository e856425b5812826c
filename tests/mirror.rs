mod support;

use std::sync::Arc;

use blockmirror::application::mirror::{MirrorError, SiteMirror};
use blockmirror::application::remote::RemoteError;
use blockmirror::cache::{CacheClient, CacheConfig, CacheError, META_FILE};
use tempfile::TempDir;

use support::{StubSource, T1, T2, id};

fn blog(source: &StubSource) {
    source.set_page("intro", T1);
    source.set_page("guide", T1);
    source.set_children("intro", &[("i1", false), ("i2", false)]);
    source.set_children("guide", &[("g1", true), ("g2", false)]);
    source.set_children("g1", &[("g1a", true)]);
    source.set_children("g1a", &[("g1a1", false)]);
}

async fn mirror(source: &Arc<StubSource>, config: CacheConfig) -> SiteMirror<StubSource> {
    let cache = Arc::new(CacheClient::new(Arc::clone(source), config));
    cache.load_cache().await.expect("load cache");
    SiteMirror::new(cache, 2)
}

#[tokio::test]
async fn sync_walks_every_nested_block() {
    let source = StubSource::new();
    blog(&source);
    let site = mirror(&source, CacheConfig::in_memory()).await;

    let report = site.sync(&id("db")).await.expect("sync");

    assert_eq!(report.title.as_deref(), Some("Site content"));
    assert_eq!(report.pages, 2);
    assert_eq!(report.blocks, 6);
    assert_eq!(report.cache_hits, 0);
    // collection, pages, then intro, guide, g1, g1a
    assert_eq!(report.cache_misses, 6);
    assert_eq!(source.block_calls(), 4);
}

#[tokio::test]
async fn second_sync_is_served_from_the_cache() {
    let source = StubSource::new();
    blog(&source);
    let site = mirror(&source, CacheConfig::in_memory()).await;
    site.sync(&id("db")).await.expect("first sync");
    let calls = source.total_calls();

    let report = site.sync(&id("db")).await.expect("second sync");

    assert_eq!(source.total_calls(), calls);
    assert_eq!(report.cache_misses, 0);
    assert_eq!(report.cache_hits, 6);
    assert_eq!(report.blocks, 6);
}

#[tokio::test]
async fn restart_only_refetches_edited_pages() {
    let dir = TempDir::new().expect("temp dir");

    let first_source = StubSource::new();
    blog(&first_source);
    let first = mirror(&first_source, CacheConfig::durable(dir.path())).await;
    first.sync(&id("db")).await.expect("first sync");
    first.cache().close().await.expect("close");

    let second_source = StubSource::new();
    blog(&second_source);
    second_source.set_page("guide", T2);
    let second = mirror(&second_source, CacheConfig::durable(dir.path())).await;
    let report = second.sync(&id("db")).await.expect("second sync");

    assert_eq!(report.blocks, 6);
    assert_eq!(second_source.page_calls(), 1);
    assert_eq!(second_source.collection_calls(), 1);
    // guide, g1, g1a; intro is unchanged
    assert_eq!(second_source.block_calls(), 3);
}

#[tokio::test]
async fn failing_page_is_named_in_the_error() {
    let source = StubSource::new();
    blog(&source);
    source.fail("guide", RemoteError::client(403, "restricted"));
    let site = mirror(&source, CacheConfig::in_memory()).await;

    let err = site.sync(&id("db")).await.expect_err("forbidden page");

    match err {
        MirrorError::Page { page, source } => {
            assert_eq!(page, id("guide"));
            assert!(source.fetch_error().is_some_and(|fetch| fetch.is_client_error()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn paginated_children_are_all_walked() {
    let source = StubSource::new();
    source.set_page("long", T1);
    source.set_children(
        "long",
        &[("l1", false), ("l2", true), ("l3", false), ("l4", false), ("l5", false)],
    );
    source.set_children("l2", &[("l2a", false)]);
    source.paginate_children(2);
    let site = mirror(&source, CacheConfig::in_memory()).await;

    let report = site.sync(&id("db")).await.expect("sync");

    assert_eq!(report.blocks, 6);
    // three cursor pages of `long`, one of `l2`
    assert_eq!(source.block_calls(), 4);
}

#[tokio::test]
async fn sync_failure_outranks_a_failed_close() {
    let dir = TempDir::new().expect("temp dir");
    // metadata can be neither read nor replaced
    std::fs::create_dir(dir.path().join(META_FILE)).expect("meta as directory");
    let source = StubSource::new();
    blog(&source);
    let site = mirror(&source, CacheConfig::durable(dir.path())).await;

    let err = site.sync_and_close(&id("db")).await.expect_err("sync fails");

    assert!(
        matches!(
            err,
            MirrorError::Collection {
                source: CacheError::Storage(_),
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
    assert!(matches!(
        site.cache().list_pages(&id("db")).await,
        Err(CacheError::Closed)
    ));
}

#[tokio::test]
async fn sync_and_close_returns_the_report() {
    let source = StubSource::new();
    blog(&source);
    let site = mirror(&source, CacheConfig::in_memory()).await;

    let report = site.sync_and_close(&id("db")).await.expect("sync");

    assert_eq!(report.pages, 2);
    assert!(matches!(
        site.cache().retrieve_collection(&id("db")).await,
        Err(CacheError::Closed)
    ));
}
