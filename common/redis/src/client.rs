use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisError};
use std::time::Duration;

use crate::pipeline::{PipelineCommand, PipelineResult};
use crate::{Client, CustomRedisError};

#[derive(Clone)]
pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Connect with no response/connection timeouts (blocks indefinitely).
    pub async fn new(addr: String) -> Result<RedisClient, CustomRedisError> {
        Self::with_timeouts(addr, None, None).await
    }

    /// Connect with optional response and connection timeouts. `None` means
    /// no timeout; `Some(Duration::ZERO)` is rejected.
    pub async fn with_timeouts(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        for (name, timeout) in [
            ("response", response_timeout),
            ("connection", connection_timeout),
        ] {
            if matches!(timeout, Some(t) if t.is_zero()) {
                return Err(CustomRedisError::InvalidConfiguration(format!(
                    "redis {name} timeout cannot be Duration::ZERO - use None for no timeout"
                )));
            }
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn ping(&self) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        redis::cmd("PING").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn info(&self, section: &str) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let info: String = redis::cmd("INFO")
            .arg(section)
            .query_async(&mut conn)
            .await?;
        Ok(info)
    }

    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.get(k).await?;
        result.ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(k, v).await?;
        Ok(())
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(k, v, seconds).await?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();

        // SET with both NX and EX options: Some("OK") when set, Nil when the
        // key already existed.
        let result: Result<Option<String>, RedisError> = redis::cmd("SET")
            .arg(&k)
            .arg(&v)
            .arg("EX")
            .arg(seconds)
            .arg("NX")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(k).await?;
        Ok(())
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: bool = conn.exists(k).await?;
        Ok(result)
    }

    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: bool = conn.expire(k, seconds as i64).await?;
        Ok(result)
    }

    async fn keys(&self, pattern: String) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<String> = conn.keys(pattern).await?;
        Ok(result)
    }

    async fn hset(&self, k: String, field: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.hset::<_, _, _, ()>(k, field, v).await?;
        Ok(())
    }

    async fn hget(&self, k: String, field: String) -> Result<String, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Option<String> = conn.hget(k, field).await?;
        result.ok_or(CustomRedisError::NotFound)
    }

    async fn hdel(&self, k: String, field: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.hdel(k, field).await?;
        Ok(removed > 0)
    }

    async fn hgetall(&self, k: String) -> Result<Vec<(String, String)>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<(String, String)> = conn.hgetall(k).await?;
        Ok(result)
    }

    async fn hlen(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: u64 = conn.hlen(k).await?;
        Ok(result)
    }

    async fn setbit(&self, k: String, offset: u64, value: bool) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.setbit::<_, ()>(k, offset as usize, value).await?;
        Ok(())
    }

    async fn getbit(&self, k: String, offset: u64) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: bool = conn.getbit(k, offset as usize).await?;
        Ok(result)
    }

    async fn zadd(&self, k: String, member: String, score: f64) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.zadd::<_, _, _, ()>(k, member, score).await?;
        Ok(())
    }

    async fn zrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<(String, f64)> = conn.zrange_withscores(k, start, stop).await?;
        Ok(result)
    }

    async fn zrevrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<(String, f64)> = conn.zrevrange_withscores(k, start, stop).await?;
        Ok(result)
    }

    async fn zpopmin(
        &self,
        k: String,
        count: usize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<(String, f64)> = conn.zpopmin(k, count as isize).await?;
        Ok(result)
    }

    async fn zrem(&self, k: String, member: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.zrem(k, member).await?;
        Ok(removed > 0)
    }

    async fn zcard(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: u64 = conn.zcard(k).await?;
        Ok(result)
    }

    async fn lpush(&self, k: String, v: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.lpush(k, v).await?;
        Ok(len)
    }

    async fn llen(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: u64 = conn.llen(k).await?;
        Ok(result)
    }

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection.clone();
        let result: Vec<String> = conn.lrange(k, start, stop).await?;
        Ok(result)
    }

    async fn ltrim(&self, k: String, start: isize, stop: isize) -> Result<(), CustomRedisError> {
        let mut conn = self.connection.clone();
        conn.ltrim::<_, ()>(k, start, stop).await?;
        Ok(())
    }

    async fn execute_pipeline(
        &self,
        commands: Vec<PipelineCommand>,
    ) -> Result<Vec<Result<PipelineResult, CustomRedisError>>, CustomRedisError> {
        let mut pipe = redis::pipe();
        pipe.atomic();

        for cmd in &commands {
            match cmd {
                PipelineCommand::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value);
                }
                PipelineCommand::SetEx {
                    key,
                    value,
                    seconds,
                } => {
                    pipe.cmd("SETEX").arg(key).arg(*seconds).arg(value);
                }
                PipelineCommand::Del { key } => {
                    pipe.cmd("DEL").arg(key);
                }
                PipelineCommand::Expire { key, seconds } => {
                    pipe.cmd("EXPIRE").arg(key).arg(*seconds);
                }
                PipelineCommand::HSet { key, field, value } => {
                    pipe.cmd("HSET").arg(key).arg(field).arg(value);
                }
                PipelineCommand::HDel { key, field } => {
                    pipe.cmd("HDEL").arg(key).arg(field);
                }
                PipelineCommand::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(*score).arg(member);
                }
                PipelineCommand::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(key).arg(member);
                }
                PipelineCommand::LPush { key, value } => {
                    pipe.cmd("LPUSH").arg(key).arg(value);
                }
                PipelineCommand::LTrim { key, start, stop } => {
                    pipe.cmd("LTRIM").arg(key).arg(*start).arg(*stop);
                }
                PipelineCommand::SetBit { key, offset, value } => {
                    pipe.cmd("SETBIT").arg(key).arg(*offset).arg(*value as u8);
                }
                PipelineCommand::GetBit { key, offset } => {
                    pipe.cmd("GETBIT").arg(key).arg(*offset);
                }
            }
        }

        let mut conn = self.connection.clone();
        let raw_results: Vec<redis::Value> = pipe.query_async(&mut conn).await?;

        let results = raw_results
            .into_iter()
            .zip(commands.iter())
            .map(|(raw, cmd)| process_pipeline_result(raw, cmd))
            .collect();

        Ok(results)
    }
}

fn process_pipeline_result(
    raw: redis::Value,
    command: &PipelineCommand,
) -> Result<PipelineResult, CustomRedisError> {
    match command {
        PipelineCommand::Set { .. }
        | PipelineCommand::SetEx { .. }
        | PipelineCommand::HSet { .. }
        | PipelineCommand::ZAdd { .. }
        | PipelineCommand::LTrim { .. }
        | PipelineCommand::SetBit { .. } => Ok(PipelineResult::Ok),
        PipelineCommand::Del { .. }
        | PipelineCommand::HDel { .. }
        | PipelineCommand::ZRem { .. }
        | PipelineCommand::LPush { .. } => {
            let n: i64 = redis::from_redis_value(&raw)?;
            Ok(PipelineResult::Int(n))
        }
        PipelineCommand::Expire { .. } | PipelineCommand::GetBit { .. } => {
            let n: i64 = redis::from_redis_value(&raw)?;
            Ok(PipelineResult::Bool(n != 0))
        }
    }
}
