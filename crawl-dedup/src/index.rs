use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::error::DedupError;
use crate::types::ContentRecord;

/// The index-store lookups the dedup layers need. The backing collection is
/// append-only from this crate's perspective; writes happen in the storage
/// sink.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create the collection and its secondary indexes if missing. Runs once
    /// at startup; existing indexes are left alone.
    async fn bootstrap(&self) -> Result<(), DedupError>;

    async fn content_by_hash(&self, hash: &str) -> Result<Option<ContentRecord>, DedupError>;
    async fn content_by_url(&self, url: &str) -> Result<Option<ContentRecord>, DedupError>;
    async fn content_by_url_since(
        &self,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError>;
    async fn content_by_title_platform_since(
        &self,
        title: &str,
        platform: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError>;
    /// Latest contents created at or after `since`, newest first.
    async fn recent_contents(
        &self,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>, DedupError>;
}

const BOOTSTRAP_STATEMENTS: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS contents (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    title TEXT NOT NULL DEFAULT '',
    platform TEXT NOT NULL DEFAULT '',
    author TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    published_at TIMESTAMPTZ,
    content_hash TEXT NOT NULL,
    tags TEXT[] NOT NULL DEFAULT '{}',
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS contents_content_hash_idx ON contents (content_hash)",
    "CREATE INDEX IF NOT EXISTS contents_title_platform_created_idx ON contents (title, platform, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS contents_url_idx ON contents (url)",
    "CREATE INDEX IF NOT EXISTS contents_created_idx ON contents (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS contents_platform_created_idx ON contents (platform, created_at DESC)",
];

const CONTENT_COLUMNS: &str =
    "id, url, title, platform, author, content, published_at, content_hash, tags, created_at";

pub struct PgIndexStore {
    pool: PgPool,
}

impl PgIndexStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexStore for PgIndexStore {
    async fn bootstrap(&self) -> Result<(), DedupError> {
        for statement in BOOTSTRAP_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("content index bootstrap complete");
        Ok(())
    }

    async fn content_by_hash(&self, hash: &str) -> Result<Option<ContentRecord>, DedupError> {
        let row = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE content_hash = $1 LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn content_by_url(&self, url: &str) -> Result<Option<ContentRecord>, DedupError> {
        let row = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents WHERE url = $1 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn content_by_url_since(
        &self,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        let row = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents \
             WHERE url = $1 AND created_at >= $2 ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(url)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn content_by_title_platform_since(
        &self,
        title: &str,
        platform: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        let row = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents \
             WHERE title = $1 AND platform = $2 AND created_at >= $3 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(title)
        .bind(platform)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn recent_contents(
        &self,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>, DedupError> {
        let rows = sqlx::query_as::<_, ContentRecord>(&format!(
            "SELECT {CONTENT_COLUMNS} FROM contents \
             WHERE created_at >= $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// In-memory index store for unit tests and the worker's memory sink.
#[derive(Default)]
pub struct MemoryIndexStore {
    records: Mutex<Vec<ContentRecord>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ContentRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a record, rejecting duplicates on `content_hash` the way the
    /// real collection's unique index does.
    pub fn append(&self, record: ContentRecord) -> Result<String, String> {
        let mut records = self.lock();
        if records.iter().any(|r| r.content_hash == record.content_hash) {
            return Err(format!("duplicate content_hash {}", record.content_hash));
        }
        let id = record.id.clone();
        records.push(record);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn bootstrap(&self) -> Result<(), DedupError> {
        Ok(())
    }

    async fn content_by_hash(&self, hash: &str) -> Result<Option<ContentRecord>, DedupError> {
        Ok(self.lock().iter().find(|r| r.content_hash == hash).cloned())
    }

    async fn content_by_url(&self, url: &str) -> Result<Option<ContentRecord>, DedupError> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.url == url)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn content_by_url_since(
        &self,
        url: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.url == url && r.created_at >= since)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn content_by_title_platform_since(
        &self,
        title: &str,
        platform: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<ContentRecord>, DedupError> {
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.title == title && r.platform == platform && r.created_at >= since)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn recent_contents(
        &self,
        limit: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>, DedupError> {
        let mut recent: Vec<ContentRecord> = self
            .lock()
            .iter()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit);
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, url: &str, hash: &str, age_hours: i64) -> ContentRecord {
        ContentRecord {
            id: id.to_string(),
            url: url.to_string(),
            title: format!("title {id}"),
            platform: "weibo".to_string(),
            author: "a".to_string(),
            content: "body".to_string(),
            published_at: None,
            content_hash: hash.to_string(),
            tags: vec![],
            created_at: Utc::now() - chrono::Duration::hours(age_hours),
        }
    }

    #[tokio::test]
    async fn test_memory_store_rejects_duplicate_hash() {
        let store = MemoryIndexStore::new();
        store.append(record("a", "https://a.test", "h1", 0)).unwrap();
        assert!(store.append(record("b", "https://b.test", "h1", 0)).is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_lookups() {
        let store = MemoryIndexStore::new();
        store.append(record("a", "https://a.test", "h1", 48)).unwrap();
        store.append(record("b", "https://a.test", "h2", 1)).unwrap();

        let by_hash = store.content_by_hash("h2").await.unwrap().unwrap();
        assert_eq!(by_hash.id, "b");

        // Latest record for the URL wins.
        let by_url = store.content_by_url("https://a.test").await.unwrap().unwrap();
        assert_eq!(by_url.id, "b");

        // Window excludes the 48h-old record.
        let since = Utc::now() - chrono::Duration::hours(24);
        let windowed = store
            .content_by_url_since("https://a.test", since)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(windowed.id, "b");

        let recent = store.recent_contents(10, since).await.unwrap();
        assert_eq!(recent.len(), 1);
    }
}
