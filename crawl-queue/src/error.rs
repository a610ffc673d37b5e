use thiserror::Error;

use common_redis::CustomRedisError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("cache store error: {0}")]
    Cache(#[from] CustomRedisError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("unknown task: {0}")]
    UnknownTask(String),
}
