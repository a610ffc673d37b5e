use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::pipeline::{PipelineCommand, PipelineResult};
use crate::{Client, CustomRedisError};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Zset(Vec<(String, f64)>),
    List(VecDeque<String>),
    Bits(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

/// An in-memory implementation of the cache-store [`Client`] contract.
///
/// Unit tests drive real sequences of queue and dedup operations against it,
/// so it keeps actual state (strings, hashes, sorted sets, lists, bitsets)
/// rather than canned per-key return values. TTLs are honored lazily on
/// access; `force_expire` lets tests simulate a key timing out.
#[derive(Clone, Default)]
pub struct MemoryClient {
    state: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop a key immediately, as if its TTL elapsed.
    pub fn force_expire(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Number of live keys, for test assertions.
    pub fn key_count(&self) -> usize {
        let mut state = self.lock();
        state.retain(|_, entry| !entry.is_expired());
        state.len()
    }

    fn prune(state: &mut HashMap<String, Entry>, key: &str) {
        if state.get(key).is_some_and(Entry::is_expired) {
            state.remove(key);
        }
    }

    fn apply(
        state: &mut HashMap<String, Entry>,
        cmd: &PipelineCommand,
    ) -> Result<PipelineResult, CustomRedisError> {
        match cmd {
            PipelineCommand::Set { key, value } => {
                state.insert(key.clone(), Entry::new(Value::Str(value.clone())));
                Ok(PipelineResult::Ok)
            }
            PipelineCommand::SetEx {
                key,
                value,
                seconds,
            } => {
                let mut entry = Entry::new(Value::Str(value.clone()));
                entry.expires_at = Some(Instant::now() + Duration::from_secs(*seconds));
                state.insert(key.clone(), entry);
                Ok(PipelineResult::Ok)
            }
            PipelineCommand::Del { key } => {
                let removed = state.remove(key).is_some();
                Ok(PipelineResult::Int(removed as i64))
            }
            PipelineCommand::Expire { key, seconds } => {
                Self::prune(state, key);
                match state.get_mut(key) {
                    Some(entry) => {
                        entry.expires_at = Some(Instant::now() + Duration::from_secs(*seconds));
                        Ok(PipelineResult::Bool(true))
                    }
                    None => Ok(PipelineResult::Bool(false)),
                }
            }
            PipelineCommand::HSet { key, field, value } => {
                Self::prune(state, key);
                let entry = state
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
                match &mut entry.value {
                    Value::Hash(map) => {
                        map.insert(field.clone(), value.clone());
                        Ok(PipelineResult::Ok)
                    }
                    _ => Err(CustomRedisError::Other("wrong type for HSET".into())),
                }
            }
            PipelineCommand::HDel { key, field } => {
                Self::prune(state, key);
                let removed = match state.get_mut(key) {
                    Some(Entry {
                        value: Value::Hash(map),
                        ..
                    }) => map.remove(field).is_some(),
                    _ => false,
                };
                Ok(PipelineResult::Int(removed as i64))
            }
            PipelineCommand::ZAdd { key, member, score } => {
                Self::prune(state, key);
                let entry = state
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Zset(Vec::new())));
                match &mut entry.value {
                    Value::Zset(members) => {
                        members.retain(|(m, _)| m != member);
                        members.push((member.clone(), *score));
                        Ok(PipelineResult::Ok)
                    }
                    _ => Err(CustomRedisError::Other("wrong type for ZADD".into())),
                }
            }
            PipelineCommand::ZRem { key, member } => {
                Self::prune(state, key);
                let removed = match state.get_mut(key) {
                    Some(Entry {
                        value: Value::Zset(members),
                        ..
                    }) => {
                        let before = members.len();
                        members.retain(|(m, _)| m != member);
                        before != members.len()
                    }
                    _ => false,
                };
                Ok(PipelineResult::Int(removed as i64))
            }
            PipelineCommand::LPush { key, value } => {
                Self::prune(state, key);
                let entry = state
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
                match &mut entry.value {
                    Value::List(items) => {
                        items.push_front(value.clone());
                        Ok(PipelineResult::Int(items.len() as i64))
                    }
                    _ => Err(CustomRedisError::Other("wrong type for LPUSH".into())),
                }
            }
            PipelineCommand::LTrim { key, start, stop } => {
                Self::prune(state, key);
                if let Some(Entry {
                    value: Value::List(items),
                    ..
                }) = state.get_mut(key)
                {
                    let (from, to) = normalize_range(*start, *stop, items.len());
                    let kept: VecDeque<String> = items
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| *i >= from && *i <= to)
                        .map(|(_, v)| v.clone())
                        .collect();
                    *items = kept;
                }
                Ok(PipelineResult::Ok)
            }
            PipelineCommand::SetBit { key, offset, value } => {
                Self::prune(state, key);
                let entry = state
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Bits(Vec::new())));
                match &mut entry.value {
                    Value::Bits(bits) => {
                        let byte = (*offset / 8) as usize;
                        if bits.len() <= byte {
                            bits.resize(byte + 1, 0);
                        }
                        let mask = 1u8 << (7 - (*offset % 8));
                        if *value {
                            bits[byte] |= mask;
                        } else {
                            bits[byte] &= !mask;
                        }
                        Ok(PipelineResult::Ok)
                    }
                    _ => Err(CustomRedisError::Other("wrong type for SETBIT".into())),
                }
            }
            PipelineCommand::GetBit { key, offset } => {
                Self::prune(state, key);
                let bit = match state.get(key) {
                    Some(Entry {
                        value: Value::Bits(bits),
                        ..
                    }) => {
                        let byte = (*offset / 8) as usize;
                        bits.get(byte)
                            .is_some_and(|b| b & (1u8 << (7 - (*offset % 8))) != 0)
                    }
                    _ => false,
                };
                Ok(PipelineResult::Bool(bit))
            }
        }
    }
}

/// Translate redis-style inclusive start/stop (negative = from the end) into
/// inclusive vector indexes.
fn normalize_range(start: isize, stop: isize, len: usize) -> (usize, usize) {
    let len = len as isize;
    let from = if start < 0 { len + start } else { start }.max(0) as usize;
    let to = if stop < 0 { len + stop } else { stop }.min(len - 1);
    if to < 0 {
        (1, 0) // empty
    } else {
        (from, to as usize)
    }
}

fn glob_match(pattern: &str, key: &str) -> bool {
    // Supports only the '*' wildcard, which is all the orchestration plane
    // uses for KEYS.
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }
    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

fn sorted_members(members: &[(String, f64)]) -> Vec<(String, f64)> {
    let mut sorted = members.to_vec();
    sorted.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    sorted
}

#[async_trait]
impl Client for MemoryClient {
    async fn ping(&self) -> Result<(), CustomRedisError> {
        Ok(())
    }

    async fn info(&self, _section: &str) -> Result<String, CustomRedisError> {
        Ok(format!("# memory\nkeys:{}\n", self.key_count()))
    }

    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Str(v),
                ..
            }) => Ok(v.clone()),
            Some(_) => Err(CustomRedisError::Other("wrong type for GET".into())),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(&mut state, &PipelineCommand::Set { key: k, value: v })?;
        Ok(())
    }

    async fn setex(&self, k: String, v: String, seconds: u64) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(
            &mut state,
            &PipelineCommand::SetEx {
                key: k,
                value: v,
                seconds,
            },
        )?;
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        k: String,
        v: String,
        seconds: u64,
    ) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        if state.contains_key(&k) {
            return Ok(false);
        }
        Self::apply(
            &mut state,
            &PipelineCommand::SetEx {
                key: k,
                value: v,
                seconds,
            },
        )?;
        Ok(true)
    }

    async fn del(&self, k: String) -> Result<(), CustomRedisError> {
        self.lock().remove(&k);
        Ok(())
    }

    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        Ok(state.contains_key(&k))
    }

    async fn expire(&self, k: String, seconds: u64) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        match Self::apply(&mut state, &PipelineCommand::Expire { key: k, seconds })? {
            PipelineResult::Bool(b) => Ok(b),
            _ => Ok(false),
        }
    }

    async fn keys(&self, pattern: String) -> Result<Vec<String>, CustomRedisError> {
        let mut state = self.lock();
        state.retain(|_, entry| !entry.is_expired());
        Ok(state
            .keys()
            .filter(|k| glob_match(&pattern, k))
            .cloned()
            .collect())
    }

    async fn hset(&self, k: String, field: String, v: String) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(
            &mut state,
            &PipelineCommand::HSet {
                key: k,
                field,
                value: v,
            },
        )?;
        Ok(())
    }

    async fn hget(&self, k: String, field: String) -> Result<String, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => map.get(&field).cloned().ok_or(CustomRedisError::NotFound),
            Some(_) => Err(CustomRedisError::Other("wrong type for HGET".into())),
            None => Err(CustomRedisError::NotFound),
        }
    }

    async fn hdel(&self, k: String, field: String) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        match Self::apply(&mut state, &PipelineCommand::HDel { key: k, field })? {
            PipelineResult::Int(n) => Ok(n > 0),
            _ => Ok(false),
        }
    }

    async fn hgetall(&self, k: String) -> Result<Vec<(String, String)>, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.iter().map(|(f, v)| (f.clone(), v.clone())).collect()),
            Some(_) => Err(CustomRedisError::Other("wrong type for HGETALL".into())),
            None => Ok(vec![]),
        }
    }

    async fn hlen(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.len() as u64),
            _ => Ok(0),
        }
    }

    async fn setbit(&self, k: String, offset: u64, value: bool) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(
            &mut state,
            &PipelineCommand::SetBit {
                key: k,
                offset,
                value,
            },
        )?;
        Ok(())
    }

    async fn getbit(&self, k: String, offset: u64) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        match Self::apply(&mut state, &PipelineCommand::GetBit { key: k, offset })? {
            PipelineResult::Bool(b) => Ok(b),
            _ => Ok(false),
        }
    }

    async fn zadd(&self, k: String, member: String, score: f64) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(
            &mut state,
            &PipelineCommand::ZAdd {
                key: k,
                member,
                score,
            },
        )?;
        Ok(())
    }

    async fn zrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => {
                let sorted = sorted_members(members);
                let (from, to) = normalize_range(start, stop, sorted.len());
                if from > to || from >= sorted.len() {
                    return Ok(vec![]);
                }
                Ok(sorted[from..=to.min(sorted.len() - 1)].to_vec())
            }
            _ => Ok(vec![]),
        }
    }

    async fn zrevrange_with_scores(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => {
                let mut sorted = sorted_members(members);
                sorted.reverse();
                let (from, to) = normalize_range(start, stop, sorted.len());
                if from > to || from >= sorted.len() {
                    return Ok(vec![]);
                }
                Ok(sorted[from..=to.min(sorted.len() - 1)].to_vec())
            }
            _ => Ok(vec![]),
        }
    }

    async fn zpopmin(
        &self,
        k: String,
        count: usize,
    ) -> Result<Vec<(String, f64)>, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get_mut(&k) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => {
                let sorted = sorted_members(members);
                let popped: Vec<(String, f64)> = sorted.into_iter().take(count).collect();
                for (member, _) in &popped {
                    members.retain(|(m, _)| m != member);
                }
                Ok(popped)
            }
            _ => Ok(vec![]),
        }
    }

    async fn zrem(&self, k: String, member: String) -> Result<bool, CustomRedisError> {
        let mut state = self.lock();
        match Self::apply(&mut state, &PipelineCommand::ZRem { key: k, member })? {
            PipelineResult::Int(n) => Ok(n > 0),
            _ => Ok(false),
        }
    }

    async fn zcard(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::Zset(members),
                ..
            }) => Ok(members.len() as u64),
            _ => Ok(0),
        }
    }

    async fn lpush(&self, k: String, v: String) -> Result<u64, CustomRedisError> {
        let mut state = self.lock();
        match Self::apply(&mut state, &PipelineCommand::LPush { key: k, value: v })? {
            PipelineResult::Int(n) => Ok(n as u64),
            _ => Ok(0),
        }
    }

    async fn llen(&self, k: String) -> Result<u64, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.len() as u64),
            _ => Ok(0),
        }
    }

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut state = self.lock();
        Self::prune(&mut state, &k);
        match state.get(&k) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => {
                let (from, to) = normalize_range(start, stop, items.len());
                if from > to || from >= items.len() {
                    return Ok(vec![]);
                }
                Ok(items
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i >= from && *i <= to)
                    .map(|(_, v)| v.clone())
                    .collect())
            }
            _ => Ok(vec![]),
        }
    }

    async fn ltrim(&self, k: String, start: isize, stop: isize) -> Result<(), CustomRedisError> {
        let mut state = self.lock();
        Self::apply(&mut state, &PipelineCommand::LTrim { key: k, start, stop })?;
        Ok(())
    }

    async fn execute_pipeline(
        &self,
        commands: Vec<PipelineCommand>,
    ) -> Result<Vec<Result<PipelineResult, CustomRedisError>>, CustomRedisError> {
        let mut state = self.lock();
        Ok(commands
            .iter()
            .map(|cmd| Self::apply(&mut state, cmd))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_roundtrip_and_not_found() {
        let client = MemoryClient::new();
        assert_eq!(
            client.get("missing".to_string()).await,
            Err(CustomRedisError::NotFound)
        );
        client
            .set("k".to_string(), "v".to_string())
            .await
            .unwrap();
        assert_eq!(client.get("k".to_string()).await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_set_nx_ex_only_sets_once() {
        let client = MemoryClient::new();
        assert!(client
            .set_nx_ex("k".to_string(), "first".to_string(), 60)
            .await
            .unwrap());
        assert!(!client
            .set_nx_ex("k".to_string(), "second".to_string(), 60)
            .await
            .unwrap());
        assert_eq!(client.get("k".to_string()).await.unwrap(), "first");
    }

    #[tokio::test]
    async fn test_zset_orders_by_score_then_member() {
        let client = MemoryClient::new();
        let key = "z".to_string();
        client.zadd(key.clone(), "b".into(), 2.0).await.unwrap();
        client.zadd(key.clone(), "a".into(), 1.0).await.unwrap();
        client.zadd(key.clone(), "c".into(), 1.0).await.unwrap();

        let popped = client.zpopmin(key.clone(), 2).await.unwrap();
        let members: Vec<&str> = popped.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "c"]);
        assert_eq!(client.zcard(key).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zadd_replaces_existing_member() {
        let client = MemoryClient::new();
        let key = "z".to_string();
        client.zadd(key.clone(), "a".into(), 5.0).await.unwrap();
        client.zadd(key.clone(), "a".into(), 1.0).await.unwrap();
        assert_eq!(client.zcard(key.clone()).await.unwrap(), 1);
        let popped = client.zpopmin(key, 1).await.unwrap();
        assert_eq!(popped[0].1, 1.0);
    }

    #[tokio::test]
    async fn test_bit_operations() {
        let client = MemoryClient::new();
        let key = "bits".to_string();
        assert!(!client.getbit(key.clone(), 42).await.unwrap());
        client.setbit(key.clone(), 42, true).await.unwrap();
        assert!(client.getbit(key.clone(), 42).await.unwrap());
        assert!(!client.getbit(key.clone(), 41).await.unwrap());
        client.setbit(key.clone(), 42, false).await.unwrap();
        assert!(!client.getbit(key, 42).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_push_trim() {
        let client = MemoryClient::new();
        let key = "l".to_string();
        for i in 0..5 {
            client.lpush(key.clone(), format!("v{i}")).await.unwrap();
        }
        client.ltrim(key.clone(), 0, 2).await.unwrap();
        assert_eq!(client.llen(key.clone()).await.unwrap(), 3);
        let items = client.lrange(key, 0, -1).await.unwrap();
        assert_eq!(items, vec!["v4", "v3", "v2"]);
    }

    #[tokio::test]
    async fn test_keys_glob() {
        let client = MemoryClient::new();
        client.set("crawl:a".into(), "1".into()).await.unwrap();
        client.set("crawl:b".into(), "1".into()).await.unwrap();
        client.set("other".into(), "1".into()).await.unwrap();
        let mut keys = client.keys("crawl:*".into()).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["crawl:a", "crawl:b"]);
    }

    #[tokio::test]
    async fn test_force_expire_drops_key() {
        let client = MemoryClient::new();
        client
            .setex("hb".to_string(), "1".to_string(), 60)
            .await
            .unwrap();
        assert!(client.exists("hb".to_string()).await.unwrap());
        client.force_expire("hb");
        assert!(!client.exists("hb".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_pipeline_is_applied_in_order() {
        let client = MemoryClient::new();
        let results = client
            .execute_pipeline(vec![
                PipelineCommand::ZAdd {
                    key: "q".into(),
                    member: "t1".into(),
                    score: 3.0,
                },
                PipelineCommand::HSet {
                    key: "status".into(),
                    field: "t1".into(),
                    value: "queued".into(),
                },
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(client.zcard("q".to_string()).await.unwrap(), 1);
        assert_eq!(
            client
                .hget("status".to_string(), "t1".to_string())
                .await
                .unwrap(),
            "queued"
        );
    }
}
