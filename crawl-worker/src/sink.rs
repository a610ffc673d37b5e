use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

use crawl_dedup::{ContentRecord, IndexStore, MemoryIndexStore};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("sink rejected record: {0}")]
    Rejected(String),
}

/// Append-only content storage. Appends are idempotent on `content_hash`:
/// re-appending an existing record yields the stored record's id.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn append(&self, record: &ContentRecord) -> Result<String, SinkError>;
}

pub struct PgStorageSink {
    pool: PgPool,
}

impl PgStorageSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageSink for PgStorageSink {
    async fn append(&self, record: &ContentRecord) -> Result<String, SinkError> {
        let inserted: Option<(String,)> = sqlx::query_as(
            "INSERT INTO contents \
             (id, url, title, platform, author, content, published_at, content_hash, tags, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (content_hash) DO NOTHING \
             RETURNING id",
        )
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.title)
        .bind(&record.platform)
        .bind(&record.author)
        .bind(&record.content)
        .bind(record.published_at)
        .bind(&record.content_hash)
        .bind(&record.tags)
        .bind(record.created_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok(id);
        }

        // The unique index on content_hash fired: hand back the existing id.
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT id FROM contents WHERE content_hash = $1")
                .bind(&record.content_hash)
                .fetch_optional(&self.pool)
                .await?;
        existing.map(|(id,)| id).ok_or_else(|| {
            SinkError::Rejected(format!(
                "conflict on content_hash {} but no stored row",
                record.content_hash
            ))
        })
    }
}

/// Sink over the in-memory index store, for tests: appended records become
/// visible to the dedup index lookups immediately.
pub struct MemorySink {
    index: Arc<MemoryIndexStore>,
}

impl MemorySink {
    pub fn new(index: Arc<MemoryIndexStore>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl StorageSink for MemorySink {
    async fn append(&self, record: &ContentRecord) -> Result<String, SinkError> {
        match self.index.append(record.clone()) {
            Ok(id) => Ok(id),
            Err(_) => {
                // Idempotent on content_hash, like the real collection.
                let existing = self
                    .index
                    .content_by_hash(&record.content_hash)
                    .await
                    .map_err(|e| SinkError::Rejected(e.to_string()))?;
                existing
                    .map(|r| r.id)
                    .ok_or_else(|| SinkError::Rejected("duplicate hash with no record".into()))
            }
        }
    }
}
