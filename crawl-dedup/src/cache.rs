use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::debug;

use common_redis::{Client, CustomRedisError};

use crate::bloom::BloomFilter;
use crate::config::DedupConfig;
use crate::context::ContextSnapshot;
use crate::error::DedupError;

/// Task-level claim stored under `task:{platform}:{creator_url}`. While a
/// claim with status pending/running exists, submissions for the same
/// creator are task-level duplicates. Terminal task states release it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskClaim {
    pub task_id: String,
    pub status: String,
    pub platform: String,
    pub creator_url: String,
    pub created_at: DateTime<Utc>,
}

impl TaskClaim {
    pub fn is_active(&self) -> bool {
        matches!(self.status.as_str(), "pending" | "running")
    }
}

/// Cached positive content-hash lookup, stored under `content_hash:{h}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedHash {
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub bloom_hits: u64,
    pub bloom_misses: u64,
    pub errors: u64,
}

/// The dedup engine's view of the cache store: the URL Bloom filter, the
/// short-TTL content-hash and task-claim caches, and context snapshots.
pub struct DedupCache {
    client: Arc<dyn Client + Send + Sync>,
    config: DedupConfig,
    bloom: BloomFilter,
    stats: Mutex<CacheStats>,
}

impl DedupCache {
    pub fn new(client: Arc<dyn Client + Send + Sync>, config: DedupConfig) -> Self {
        let bloom = BloomFilter::new(config.bloom_capacity, config.bloom_error_rate);
        Self {
            client,
            config,
            bloom,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    fn client(&self) -> &(dyn Client + Send + Sync) {
        self.client.as_ref()
    }

    fn record_hit(&self, hit: bool) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if hit {
            stats.cache_hits += 1;
        } else {
            stats.cache_misses += 1;
        }
    }

    fn record_error(&self) {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).errors += 1;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn task_claim(&self, key: &str) -> Result<Option<TaskClaim>, DedupError> {
        match self.client().get(key.to_string()).await {
            Ok(json) => {
                self.record_hit(true);
                Ok(Some(serde_json::from_str(&json)?))
            }
            Err(CustomRedisError::NotFound) => {
                self.record_hit(false);
                Ok(None)
            }
            Err(e) => {
                self.record_error();
                Err(e.into())
            }
        }
    }

    pub async fn set_task_claim(&self, key: &str, claim: &TaskClaim) -> Result<(), DedupError> {
        self.client()
            .setex(
                key.to_string(),
                serde_json::to_string(claim)?,
                self.config.task_claim_ttl_secs,
            )
            .await?;
        Ok(())
    }

    pub async fn release_task_claim(&self, key: &str) -> Result<(), DedupError> {
        self.client().del(key.to_string()).await?;
        debug!(key, "released task claim");
        Ok(())
    }

    fn hash_key(hash: &str) -> String {
        format!("content_hash:{hash}")
    }

    pub async fn content_hash(&self, hash: &str) -> Result<Option<CachedHash>, DedupError> {
        match self.client().get(Self::hash_key(hash)).await {
            Ok(json) => {
                self.record_hit(true);
                Ok(Some(serde_json::from_str(&json)?))
            }
            Err(CustomRedisError::NotFound) => {
                self.record_hit(false);
                Ok(None)
            }
            Err(e) => {
                self.record_error();
                Err(e.into())
            }
        }
    }

    pub async fn set_content_hash(&self, hash: &str, entry: &CachedHash) -> Result<(), DedupError> {
        self.client()
            .setex(
                Self::hash_key(hash),
                serde_json::to_string(entry)?,
                self.config.content_hash_ttl_secs,
            )
            .await?;
        Ok(())
    }

    pub async fn bloom_contains(&self, url: &str) -> Result<bool, DedupError> {
        let result = self.bloom.contains(self.client(), url).await;
        match result {
            Ok(hit) => {
                let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                if hit {
                    stats.bloom_hits += 1;
                } else {
                    stats.bloom_misses += 1;
                }
                Ok(hit)
            }
            Err(e) => {
                self.record_error();
                Err(e.into())
            }
        }
    }

    pub async fn bloom_add(&self, url: &str) -> Result<(), DedupError> {
        self.bloom.add_item(self.client(), url).await?;
        Ok(())
    }

    fn context_key(task_id: &str) -> String {
        format!("context:{task_id}")
    }

    pub async fn context_snapshot(
        &self,
        task_id: &str,
    ) -> Result<Option<ContextSnapshot>, DedupError> {
        match self.client().get(Self::context_key(task_id)).await {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(CustomRedisError::NotFound) => Ok(None),
            Err(e) => {
                self.record_error();
                Err(e.into())
            }
        }
    }

    pub async fn set_context_snapshot(&self, snapshot: &ContextSnapshot) -> Result<(), DedupError> {
        self.client()
            .setex(
                Self::context_key(&snapshot.task_id),
                serde_json::to_string(snapshot)?,
                self.config.context_ttl_secs,
            )
            .await?;
        Ok(())
    }

    pub async fn delete_context_snapshot(&self, task_id: &str) -> Result<(), DedupError> {
        self.client().del(Self::context_key(task_id)).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> bool {
        if self.client().ping().await.is_err() {
            return false;
        }
        let key = "health_check:dedup".to_string();
        let ok = self
            .client()
            .setex(key.clone(), "ok".to_string(), 10)
            .await
            .is_ok()
            && matches!(self.client().get(key.clone()).await.as_deref(), Ok("ok"));
        drop(self.client().del(key).await);
        ok
    }
}
