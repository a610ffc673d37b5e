use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common_redis::MemoryClient;
use crawl_dedup::{
    ContentRecord, DedupCache, DedupConfig, DedupEngine, DedupError, DuplicateType, IndexStore,
    MemoryIndexStore,
};

fn engine_with(index: Arc<dyn IndexStore>, config: DedupConfig) -> DedupEngine {
    let cache = Arc::new(DedupCache::new(
        Arc::new(MemoryClient::new()),
        config.clone(),
    ));
    DedupEngine::new(cache, index, config)
}

fn engine() -> (DedupEngine, Arc<MemoryIndexStore>) {
    let index = Arc::new(MemoryIndexStore::new());
    (
        engine_with(index.clone(), DedupConfig::default()),
        index,
    )
}

fn record(
    id: &str,
    url: &str,
    title: &str,
    content: &str,
    age_hours: i64,
) -> ContentRecord {
    ContentRecord {
        id: id.to_string(),
        url: url.to_string(),
        title: title.to_string(),
        platform: "weibo".to_string(),
        author: "author".to_string(),
        content: content.to_string(),
        published_at: None,
        content_hash: crawl_dedup::content_hash(title, content),
        tags: vec![],
        created_at: Utc::now() - chrono::Duration::hours(age_hours),
    }
}

#[tokio::test]
async fn test_fresh_content_passes_all_layers() {
    let (engine, _index) = engine();
    let verdict = engine
        .check_duplicate(
            "t1",
            "https://a.test/post/1",
            "hello world",
            "Hello",
            "weibo",
            "https://weibo.test/u/1",
        )
        .await;
    assert!(!verdict.is_duplicate);
    assert_eq!(verdict.duplicate_type, DuplicateType::NoDuplicate);
}

#[tokio::test]
async fn test_recheck_after_pass_is_a_duplicate() {
    let (engine, _index) = engine();
    let first = engine
        .check_duplicate(
            "t1",
            "https://a.test/post/1",
            "hello world",
            "Hello",
            "",
            "",
        )
        .await;
    assert!(!first.is_duplicate);

    // Immediately re-checking the same capture must hit one of the identity
    // layers (the hash cache catches it even before the sink has stored it).
    let second = engine
        .check_duplicate(
            "t1",
            "https://a.test/post/1",
            "hello world",
            "Hello",
            "",
            "",
        )
        .await;
    assert!(second.is_duplicate);
    assert!(matches!(
        second.duplicate_type,
        DuplicateType::ContentHash | DuplicateType::Url | DuplicateType::Title
    ));
}

#[tokio::test]
async fn test_url_duplicate_after_volatile_param_normalization() {
    let (engine, index) = engine();

    // First capture stored by the sink.
    index
        .append(record(
            "c1",
            "https://a.test/x",
            "H",
            "hello world",
            0,
        ))
        .unwrap();

    // Prime the bloom filter with the first URL form.
    let first = engine
        .check_duplicate("t1", "https://a.test/x?ts=1", "unrelated body", "Other", "", "")
        .await;
    // The index already holds the normalized URL, so even the first call is
    // a duplicate (time-window or URL depending on bloom state).
    assert!(first.is_duplicate);

    let second = engine
        .check_duplicate("t2", "https://a.test/x?ts=2", "hello world", "H", "", "")
        .await;
    assert!(second.is_duplicate);
    assert_eq!(second.duplicate_type, DuplicateType::Url);
    assert_eq!(second.duplicate_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_title_duplicate_same_platform_within_window() {
    let (engine, index) = engine();
    index
        .append(record(
            "c1",
            "https://a.test/first",
            "Breaking News",
            "original body text",
            2,
        ))
        .unwrap();

    // Distinct URL and content, same title and platform, inside 24h.
    let verdict = engine
        .check_duplicate(
            "t1",
            "https://b.test/second",
            "a completely different body",
            "Breaking News",
            "weibo",
            "",
        )
        .await;
    assert!(verdict.is_duplicate);
    assert_eq!(verdict.duplicate_type, DuplicateType::Title);
    assert_eq!(verdict.duplicate_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_title_outside_window_is_not_a_duplicate() {
    let (engine, index) = engine();
    index
        .append(record(
            "c1",
            "https://a.test/first",
            "Old News",
            "original body",
            48,
        ))
        .unwrap();

    let verdict = engine
        .check_duplicate(
            "t1",
            "https://b.test/second",
            "short",
            "Old News",
            "weibo",
            "",
        )
        .await;
    assert!(!verdict.is_duplicate);
}

#[tokio::test]
async fn test_semantic_duplicate_on_near_identical_text() {
    let (engine, index) = engine();
    let body = "The quick brown fox jumps over the lazy dog while the band plays on and the crowd cheers loudly";
    index
        .append(record("c1", "https://a.test/orig", "Original", body, 1))
        .unwrap();

    let near = "The quick brown fox jumps over the lazy cat while the band plays on and the crowd cheers loudly";
    let verdict = engine
        .check_duplicate("t1", "https://b.test/copy", near, "Copied", "", "")
        .await;
    assert!(verdict.is_duplicate);
    assert_eq!(verdict.duplicate_type, DuplicateType::Semantic);
    assert!(verdict.similarity.unwrap() >= 0.85);
    assert_eq!(verdict.duplicate_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn test_short_content_skips_semantic_layer() {
    let (engine, index) = engine();
    index
        .append(record("c1", "https://a.test/orig", "Original", "tiny body", 1))
        .unwrap();

    let verdict = engine
        .check_duplicate("t1", "https://b.test/copy", "tiny body!", "Other", "", "")
        .await;
    // Hash differs, similarity would be high, but the content is under the
    // semantic minimum length.
    assert!(!verdict.is_duplicate);
}

#[tokio::test]
async fn test_time_window_duplicate_for_known_url() {
    let (engine, index) = engine();
    index
        .append(record(
            "c1",
            "https://a.test/x",
            "Some Title",
            "some body",
            2,
        ))
        .unwrap();

    // Bloom has never seen this URL, so the URL layer passes; the
    // time-window layer still catches the recent index record.
    let verdict = engine
        .check_duplicate("t1", "https://a.test/x", "different body", "Another", "", "")
        .await;
    assert!(verdict.is_duplicate);
    assert_eq!(verdict.duplicate_type, DuplicateType::TimeWindow);
}

#[tokio::test]
async fn test_task_claim_blocks_second_submission_until_released() {
    let (engine, _index) = engine();

    let first = engine
        .check_duplicate(
            "t1",
            "https://a.test/1",
            "first body",
            "First",
            "weibo",
            "https://weibo.test/u/9",
        )
        .await;
    assert!(!first.is_duplicate);

    let second = engine
        .check_duplicate(
            "t2",
            "https://a.test/2",
            "second body",
            "Second",
            "weibo",
            "https://weibo.test/u/9",
        )
        .await;
    assert!(second.is_duplicate);
    assert_eq!(second.duplicate_type, DuplicateType::Task);
    assert_eq!(second.duplicate_id.as_deref(), Some("t1"));

    // Terminal state releases the claim; the re-crawl goes through.
    engine
        .release_task("weibo", "https://weibo.test/u/9")
        .await
        .unwrap();
    let third = engine
        .check_duplicate(
            "t3",
            "https://a.test/3",
            "third body",
            "Third",
            "weibo",
            "https://weibo.test/u/9",
        )
        .await;
    assert!(!third.is_duplicate);
}

#[tokio::test]
async fn test_same_task_does_not_block_itself() {
    let (engine, _index) = engine();
    let first = engine
        .check_duplicate("t1", "https://a.test/1", "body one", "One", "weibo", "creator")
        .await;
    assert!(!first.is_duplicate);

    // The claim belongs to t1; t1's later captures are not task duplicates.
    let again = engine
        .check_duplicate("t1", "https://a.test/2", "body two", "Two", "weibo", "creator")
        .await;
    assert_ne!(again.duplicate_type, DuplicateType::Task);
}

/// Index store that fails every lookup, for the fail-open contract.
struct BrokenIndex;

#[async_trait]
impl IndexStore for BrokenIndex {
    async fn bootstrap(&self) -> Result<(), DedupError> {
        Ok(())
    }
    async fn content_by_hash(&self, _: &str) -> Result<Option<ContentRecord>, DedupError> {
        Err(DedupError::Index(sqlx::Error::PoolClosed))
    }
    async fn content_by_url(&self, _: &str) -> Result<Option<ContentRecord>, DedupError> {
        Err(DedupError::Index(sqlx::Error::PoolClosed))
    }
    async fn content_by_url_since(
        &self,
        _: &str,
        _: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        Err(DedupError::Index(sqlx::Error::PoolClosed))
    }
    async fn content_by_title_platform_since(
        &self,
        _: &str,
        _: &str,
        _: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        Err(DedupError::Index(sqlx::Error::PoolClosed))
    }
    async fn recent_contents(
        &self,
        _: usize,
        _: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>, DedupError> {
        Err(DedupError::Index(sqlx::Error::PoolClosed))
    }
}

#[tokio::test]
async fn test_engine_fails_open_when_index_is_down() {
    let engine = engine_with(Arc::new(BrokenIndex), DedupConfig::default());
    let verdict = engine
        .check_duplicate(
            "t1",
            "https://a.test/post",
            "a body long enough to reach the semantic layer without being skipped early on",
            "Title",
            "weibo",
            "creator",
        )
        .await;
    // Every index-backed layer errored, which counts as a pass.
    assert!(!verdict.is_duplicate);
    assert!(engine.metrics().layer_errors > 0);
}

#[tokio::test]
async fn test_engine_metrics_count_by_type() {
    let (engine, _index) = engine();
    drop(
        engine
            .check_duplicate("t1", "https://a.test/1", "hello world", "T", "", "")
            .await,
    );
    drop(
        engine
            .check_duplicate("t1", "https://a.test/1", "hello world", "T", "", "")
            .await,
    );

    let metrics = engine.metrics();
    assert_eq!(metrics.total_checks, 2);
    assert_eq!(metrics.duplicates_found, 1);
    assert!(metrics.duplicate_rate() > 0.0);
}

#[tokio::test]
async fn test_context_snapshot_persistence_roundtrip() {
    let (engine, _index) = engine();
    drop(
        engine
            .check_duplicate("t1", "https://a.test/1", "hello world", "T", "", "")
            .await,
    );

    assert_eq!(engine.persist_contexts().await.unwrap(), 1);
    engine.cleanup_context("t1").await.unwrap();
    assert_eq!(engine.active_contexts(), 0);

    // Rehydration restores the persisted counters.
    assert!(engine.hydrate_context("t1").await.unwrap());
    let stats = engine.statistics("t1").unwrap();
    assert_eq!(stats["stats"]["total_checked"], 1);
}
