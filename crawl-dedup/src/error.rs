use thiserror::Error;

use common_redis::CustomRedisError;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("cache store error: {0}")]
    Cache(#[from] CustomRedisError),
    #[error("index store error: {0}")]
    Index(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
