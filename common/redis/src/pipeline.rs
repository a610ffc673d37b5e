use crate::{Client, CustomRedisError};

/// A single command in a MULTI/EXEC pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCommand {
    Set { key: String, value: String },
    SetEx { key: String, value: String, seconds: u64 },
    Del { key: String },
    Expire { key: String, seconds: u64 },
    HSet { key: String, field: String, value: String },
    HDel { key: String, field: String },
    ZAdd { key: String, member: String, score: f64 },
    ZRem { key: String, member: String },
    LPush { key: String, value: String },
    LTrim { key: String, start: isize, stop: isize },
    SetBit { key: String, offset: u64, value: bool },
    GetBit { key: String, offset: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineResult {
    Ok,
    Bool(bool),
    Int(i64),
}

/// Fluent builder over [`Client::execute_pipeline`].
pub struct Pipeline<'c> {
    client: &'c (dyn Client + Send + Sync),
    commands: Vec<PipelineCommand>,
}

impl<'c> Pipeline<'c> {
    pub fn new(client: &'c (dyn Client + Send + Sync)) -> Self {
        Self {
            client,
            commands: Vec::new(),
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn setex(mut self, key: impl Into<String>, value: impl Into<String>, seconds: u64) -> Self {
        self.commands.push(PipelineCommand::SetEx {
            key: key.into(),
            value: value.into(),
            seconds,
        });
        self
    }

    pub fn del(mut self, key: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::Del { key: key.into() });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, seconds: u64) -> Self {
        self.commands.push(PipelineCommand::Expire {
            key: key.into(),
            seconds,
        });
        self
    }

    pub fn hset(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.commands.push(PipelineCommand::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn hdel(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::HDel {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    pub fn zadd(mut self, key: impl Into<String>, member: impl Into<String>, score: f64) -> Self {
        self.commands.push(PipelineCommand::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn zrem(mut self, key: impl Into<String>, member: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::ZRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn lpush(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.commands.push(PipelineCommand::LPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn ltrim(mut self, key: impl Into<String>, start: isize, stop: isize) -> Self {
        self.commands.push(PipelineCommand::LTrim {
            key: key.into(),
            start,
            stop,
        });
        self
    }

    pub fn setbit(mut self, key: impl Into<String>, offset: u64, value: bool) -> Self {
        self.commands.push(PipelineCommand::SetBit {
            key: key.into(),
            offset,
            value,
        });
        self
    }

    pub fn getbit(mut self, key: impl Into<String>, offset: u64) -> Self {
        self.commands.push(PipelineCommand::GetBit {
            key: key.into(),
            offset,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub async fn execute(
        self,
    ) -> Result<Vec<Result<PipelineResult, CustomRedisError>>, CustomRedisError> {
        if self.commands.is_empty() {
            return Ok(vec![]);
        }
        self.client.execute_pipeline(self.commands).await
    }
}

pub trait ClientPipelineExt: Client + Send + Sync + Sized {
    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }
}

impl<T: Client + Send + Sync + Sized> ClientPipelineExt for T {}

impl dyn Client + Send + Sync {
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self)
    }
}
