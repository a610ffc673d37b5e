use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

/// A set that remembers insertion order, so eviction can be FIFO.
#[derive(Debug, Default)]
struct OrderedSet {
    items: HashSet<String>,
    order: VecDeque<String>,
}

impl OrderedSet {
    fn insert(&mut self, value: String) -> bool {
        if self.items.contains(&value) {
            return false;
        }
        self.items.insert(value.clone());
        self.order.push_back(value);
        true
    }

    fn contains(&self, value: &str) -> bool {
        self.items.contains(value)
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// Remove up to `count` of the oldest entries; returns how many went.
    fn evict_oldest(&mut self, count: usize) -> usize {
        let mut evicted = 0;
        while evicted < count {
            match self.order.pop_front() {
                Some(item) => {
                    self.items.remove(&item);
                    evicted += 1;
                }
                None => break,
            }
        }
        evicted
    }

    fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextStats {
    pub total_checked: u64,
    pub duplicates_found: u64,
    pub task_duplicates: u64,
    pub url_duplicates: u64,
    pub content_duplicates: u64,
    pub title_duplicates: u64,
    pub semantic_duplicates: u64,
    pub time_window_duplicates: u64,
}

impl ContextStats {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checked == 0 {
            return 0.0;
        }
        self.duplicates_found as f64 / self.total_checked as f64
    }
}

/// Persistable snapshot of a context, written to `context:{task}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSnapshot {
    #[serde(default = "ContextSnapshot::default_version")]
    pub version: u16,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub stats: ContextStats,
    pub memory_usage: HashMap<String, usize>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

impl ContextSnapshot {
    fn default_version() -> u16 {
        1
    }
}

#[derive(Debug, Default)]
struct ContextState {
    urls: OrderedSet,
    hashes: OrderedSet,
    titles: OrderedSet,
    stats: ContextStats,
    latencies: HashMap<String, VecDeque<f64>>,
    last_activity: Option<DateTime<Utc>>,
    error_count: u64,
    last_error: Option<String>,
}

const LATENCY_SAMPLES_PER_OP: usize = 100;

/// Per-task deduplication state: bounded sets of what this task has already
/// seen, duplicate counters, and per-operation latency samples.
///
/// The lock is a plain sync mutex and is never held across I/O.
#[derive(Debug)]
pub struct DedupContext {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    max_memory_items: usize,
    state: Mutex<ContextState>,
}

impl DedupContext {
    pub fn new(task_id: impl Into<String>, max_memory_items: usize) -> Self {
        let task_id = task_id.into();
        debug!(%task_id, "created dedup context");
        Self {
            task_id,
            created_at: Utc::now(),
            max_memory_items,
            state: Mutex::new(ContextState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn add_processed_url(&self, url: &str) -> bool {
        let mut state = self.lock();
        let added = state.urls.insert(url.to_string());
        state.last_activity = Some(Utc::now());
        Self::manage_memory(&mut state, self.max_memory_items, &self.task_id);
        added
    }

    pub fn add_content_hash(&self, hash: &str) -> bool {
        let mut state = self.lock();
        let added = state.hashes.insert(hash.to_string());
        state.last_activity = Some(Utc::now());
        Self::manage_memory(&mut state, self.max_memory_items, &self.task_id);
        added
    }

    /// Titles shorter than 3 characters are ignored (too generic to dedup).
    pub fn add_processed_title(&self, title: &str) -> bool {
        let normalized = title.trim().to_lowercase();
        if normalized.chars().count() < 3 {
            return true;
        }
        let mut state = self.lock();
        let added = state.titles.insert(normalized);
        state.last_activity = Some(Utc::now());
        Self::manage_memory(&mut state, self.max_memory_items, &self.task_id);
        added
    }

    pub fn is_url_processed(&self, url: &str) -> bool {
        self.lock().urls.contains(url)
    }

    pub fn is_content_hash_processed(&self, hash: &str) -> bool {
        self.lock().hashes.contains(hash)
    }

    pub fn is_title_processed(&self, title: &str) -> bool {
        let normalized = title.trim().to_lowercase();
        if normalized.chars().count() < 3 {
            return false;
        }
        self.lock().titles.contains(&normalized)
    }

    pub fn update_stats(&self, duplicate_type: Option<crate::types::DuplicateType>) {
        use crate::types::DuplicateType;

        let mut state = self.lock();
        state.stats.total_checked += 1;
        match duplicate_type {
            None | Some(DuplicateType::NoDuplicate) => {}
            Some(duplicate_type) => {
                state.stats.duplicates_found += 1;
                match duplicate_type {
                    DuplicateType::Task => state.stats.task_duplicates += 1,
                    DuplicateType::Url => state.stats.url_duplicates += 1,
                    DuplicateType::ContentHash => state.stats.content_duplicates += 1,
                    DuplicateType::Title => state.stats.title_duplicates += 1,
                    DuplicateType::Semantic => state.stats.semantic_duplicates += 1,
                    DuplicateType::TimeWindow => state.stats.time_window_duplicates += 1,
                    DuplicateType::NoDuplicate => {}
                }
            }
        }
        state.last_activity = Some(Utc::now());
    }

    /// Keep the most recent `LATENCY_SAMPLES_PER_OP` samples per operation.
    pub fn record_latency(&self, operation: &str, duration_ms: f64) {
        let mut state = self.lock();
        let samples = state.latencies.entry(operation.to_string()).or_default();
        samples.push_back(duration_ms);
        while samples.len() > LATENCY_SAMPLES_PER_OP {
            samples.pop_front();
        }
    }

    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(task_id = %self.task_id, "dedup context error: {message}");
        let mut state = self.lock();
        state.error_count += 1;
        state.last_error = Some(message);
    }

    pub fn memory_usage(&self) -> HashMap<String, usize> {
        let state = self.lock();
        let mut usage = HashMap::new();
        usage.insert("processed_urls".to_string(), state.urls.len());
        usage.insert("content_hashes".to_string(), state.hashes.len());
        usage.insert("processed_titles".to_string(), state.titles.len());
        usage.insert(
            "total_items".to_string(),
            state.urls.len() + state.hashes.len() + state.titles.len(),
        );
        usage
    }

    pub fn stats(&self) -> ContextStats {
        self.lock().stats.clone()
    }

    /// min/avg/max/count per recorded operation.
    pub fn latency_summary(&self) -> HashMap<String, (f64, f64, f64, usize)> {
        let state = self.lock();
        state
            .latencies
            .iter()
            .filter(|(_, samples)| !samples.is_empty())
            .map(|(op, samples)| {
                let count = samples.len();
                let sum: f64 = samples.iter().sum();
                let min = samples.iter().cloned().fold(f64::INFINITY, f64::min);
                let max = samples.iter().cloned().fold(0.0f64, f64::max);
                (op.clone(), (min, sum / count as f64, max, count))
            })
            .collect()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.lock();
        ContextSnapshot {
            version: 1,
            task_id: self.task_id.clone(),
            created_at: self.created_at,
            last_activity: state.last_activity,
            stats: state.stats.clone(),
            memory_usage: {
                let mut usage = HashMap::new();
                usage.insert("processed_urls".to_string(), state.urls.len());
                usage.insert("content_hashes".to_string(), state.hashes.len());
                usage.insert("processed_titles".to_string(), state.titles.len());
                usage
            },
            error_count: state.error_count,
            last_error: state.last_error.clone(),
        }
    }

    /// Rehydrate counters from a persisted snapshot. The in-memory sets are
    /// not restored; they refill as the task progresses.
    pub fn restore(&self, snapshot: &ContextSnapshot) {
        let mut state = self.lock();
        state.stats = snapshot.stats.clone();
        state.error_count = snapshot.error_count;
        state.last_error = snapshot.last_error.clone();
        state.last_activity = snapshot.last_activity;
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.urls.clear();
        state.hashes.clear();
        state.titles.clear();
        state.latencies.clear();
    }

    /// When the summed set size exceeds the cap, evict down to 80% of it,
    /// oldest first, URLs then titles then hashes. Hashes are the last
    /// defense against duplicates and are retained longest.
    fn manage_memory(state: &mut ContextState, max_items: usize, task_id: &str) {
        let total = state.urls.len() + state.hashes.len() + state.titles.len();
        if total <= max_items {
            return;
        }
        let target = (max_items as f64 * 0.8) as usize;
        let mut to_evict = total - target;

        to_evict -= state.urls.evict_oldest(to_evict);
        if to_evict > 0 {
            to_evict -= state.titles.evict_oldest(to_evict);
        }
        if to_evict > 0 {
            state.hashes.evict_oldest(to_evict);
        }
        warn!(
            task_id,
            remaining = state.urls.len() + state.hashes.len() + state.titles.len(),
            "dedup context memory cap reached, evicted oldest entries"
        );
    }
}
