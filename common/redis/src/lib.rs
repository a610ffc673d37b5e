use async_trait::async_trait;
use thiserror::Error;

mod client;
mod memory;
mod pipeline;

pub use client::RedisClient;
pub use memory::MemoryClient;
pub use pipeline::{ClientPipelineExt, Pipeline, PipelineCommand, PipelineResult};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Redis error: {0}")]
    Other(String),
    #[error("Timeout error")]
    Timeout,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Other(err.to_string())
        }
    }
}

impl From<std::string::FromUtf8Error> for CustomRedisError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        CustomRedisError::ParseError(err.to_string())
    }
}

/// The cache-store operations the orchestration plane relies on. All values
/// are UTF-8 strings (JSON on the wire); binary state only exists behind the
/// bit operations used by the Bloom filter.
///
/// Every component takes an `Arc<dyn Client + Send + Sync>`, so tests can
/// swap in [`MemoryClient`] without touching the code under test.
#[async_trait]
pub trait Client {
    async fn ping(&self) -> Result<(), CustomRedisError>;
    async fn info(&self, section: &str) -> Result<String, CustomRedisError>;

    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError>;
    async fn set_nx_ex(&self, k: String, v: String, seconds: u64)
        -> Result<bool, CustomRedisError>;
    async fn del(&self, k: String) -> Result<(), CustomRedisError>;
    async fn exists(&self, k: String) -> Result<bool, CustomRedisError>;
    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError>;
    async fn keys(&self, pattern: String) -> Result<Vec<String>, CustomRedisError>;

    async fn hset(&self, k: String, field: String, v: String) -> Result<(), CustomRedisError>;
    async fn hget(&self, k: String, field: String) -> Result<String, CustomRedisError>;
    async fn hdel(&self, k: String, field: String) -> Result<bool, CustomRedisError>;
    async fn hgetall(&self, k: String) -> Result<Vec<(String, String)>, CustomRedisError>;
    async fn hlen(&self, k: String) -> Result<u64, CustomRedisError>;

    async fn setbit(&self, k: String, offset: u64, value: bool) -> Result<(), CustomRedisError>;
    async fn getbit(&self, k: String, offset: u64) -> Result<bool, CustomRedisError>;

    async fn zadd(&self, k: String, member: String, score: f64) -> Result<(), CustomRedisError>;
    async fn zrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError>;
    async fn zrevrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError>;
    async fn zpopmin(
        &self,
        k: String,
        count: usize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError>;
    async fn zrem(&self, k: String, member: String) -> Result<bool, CustomRedisError>;
    async fn zcard(&self, k: String) -> Result<u64, CustomRedisError>;

    async fn lpush(&self, k: String, v: String) -> Result<u64, CustomRedisError>;
    async fn llen(&self, k: String) -> Result<u64, CustomRedisError>;
    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError>;
    async fn ltrim(&self, k: String, start: isize, stop: isize) -> Result<(), CustomRedisError>;

    /// Execute a MULTI/EXEC pipeline. Results come back in command order.
    async fn execute_pipeline(
        &self,
        commands: Vec<PipelineCommand>,
    ) -> Result<Vec<Result<PipelineResult, CustomRedisError>>, CustomRedisError>;
}
