use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CachedHash, DedupCache, TaskClaim};
use crate::config::DedupConfig;
use crate::context::{ContextSnapshot, DedupContext};
use crate::error::DedupError;
use crate::hashing::{content_hash, text_similarity};
use crate::index::IndexStore;
use crate::normalize::normalize_url;
use crate::types::{DuplicateType, DuplicateVerdict};

const LAYER_DURATION_HISTOGRAM: &str = "crawl_dedup_layer_duration_ms";
const CHECK_DURATION_HISTOGRAM: &str = "crawl_dedup_check_duration_ms";
const VERDICT_COUNTER: &str = "crawl_dedup_verdicts_total";

#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetrics {
    pub total_checks: u64,
    pub duplicates_found: u64,
    pub layer_errors: u64,
    pub by_type: HashMap<String, u64>,
}

impl EngineMetrics {
    pub fn duplicate_rate(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.duplicates_found as f64 / self.total_checks as f64
    }
}

/// The five-stage duplicate classifier. Layers run in order and the first
/// hit short-circuits; a layer that faults is logged, counted and treated as
/// a pass, so the engine never fails closed on its own errors (the bias is
/// toward crawling rather than silently dropping content).
pub struct DedupEngine {
    cache: Arc<DedupCache>,
    index: Arc<dyn IndexStore>,
    config: DedupConfig,
    contexts: Mutex<HashMap<String, Arc<DedupContext>>>,
    metrics: Mutex<EngineMetrics>,
}

impl DedupEngine {
    pub fn new(cache: Arc<DedupCache>, index: Arc<dyn IndexStore>, config: DedupConfig) -> Self {
        Self {
            cache,
            index,
            config,
            contexts: Mutex::new(HashMap::new()),
            metrics: Mutex::new(EngineMetrics::default()),
        }
    }

    fn lock_contexts(&self) -> MutexGuard<'_, HashMap<String, Arc<DedupContext>>> {
        match self.contexts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_metrics(&self) -> MutexGuard<'_, EngineMetrics> {
        match self.metrics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get or create the per-task context.
    pub fn context(&self, task_id: &str) -> Arc<DedupContext> {
        self.lock_contexts()
            .entry(task_id.to_string())
            .or_insert_with(|| {
                Arc::new(DedupContext::new(task_id, self.config.max_context_items))
            })
            .clone()
    }

    /// Try to rehydrate a context's counters from its persisted snapshot.
    pub async fn hydrate_context(&self, task_id: &str) -> Result<bool, DedupError> {
        let context = self.context(task_id);
        match self.cache.context_snapshot(task_id).await? {
            Some(snapshot) => {
                context.restore(&snapshot);
                debug!(task_id, "restored dedup context from cache");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Full duplicate check for a capture. Returns `NO_DUPLICATE` only after
    /// every layer passed, in which case the capture is recorded in the
    /// task's context and the hash cache.
    pub async fn check_duplicate(
        &self,
        task_id: &str,
        url: &str,
        content: &str,
        title: &str,
        platform: &str,
        creator_url: &str,
    ) -> DuplicateVerdict {
        let context = self.context(task_id);
        let timing = common_metrics::timing_guard(CHECK_DURATION_HISTOGRAM, &[]);

        let verdict = self
            .run_layers(
                context.as_ref(),
                url,
                content,
                title,
                platform,
                creator_url,
                task_id,
            )
            .await;

        context.update_stats(verdict.is_duplicate.then_some(verdict.duplicate_type));
        {
            let mut metrics = self.lock_metrics();
            metrics.total_checks += 1;
            if verdict.is_duplicate {
                metrics.duplicates_found += 1;
            }
            *metrics
                .by_type
                .entry(verdict.duplicate_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        common_metrics::inc(
            VERDICT_COUNTER,
            &[(
                "verdict".to_string(),
                verdict.duplicate_type.as_str().to_string(),
            )],
            1,
        );
        timing.label("verdict", verdict.duplicate_type.as_str()).fin();
        verdict
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_layers(
        &self,
        context: &DedupContext,
        url: &str,
        content: &str,
        title: &str,
        platform: &str,
        creator_url: &str,
        task_id: &str,
    ) -> DuplicateVerdict {
        let normalized_url = normalize_url(url);

        let started = Instant::now();
        let outcome = self.check_task_level(task_id, platform, creator_url).await;
        if let Some(verdict) = self.settle_layer(context, task_id, "task_check", started, outcome) {
            return verdict;
        }

        let started = Instant::now();
        let outcome = self.check_url_level(&normalized_url).await;
        if let Some(verdict) = self.settle_layer(context, task_id, "url_check", started, outcome) {
            return verdict;
        }

        let started = Instant::now();
        let outcome = self.check_content_hash(content, title).await;
        if let Some(verdict) =
            self.settle_layer(context, task_id, "content_hash_check", started, outcome)
        {
            return verdict;
        }

        let started = Instant::now();
        let outcome = self.check_title_window(title, platform).await;
        if let Some(verdict) = self.settle_layer(context, task_id, "title_check", started, outcome)
        {
            return verdict;
        }

        let started = Instant::now();
        let outcome = self.check_semantic(content).await;
        if let Some(verdict) =
            self.settle_layer(context, task_id, "semantic_check", started, outcome)
        {
            return verdict;
        }

        let started = Instant::now();
        let outcome = self.check_time_window(&normalized_url).await;
        if let Some(verdict) =
            self.settle_layer(context, task_id, "time_window_check", started, outcome)
        {
            return verdict;
        }

        if let Err(e) = self
            .record_content(context, &normalized_url, content, title)
            .await
        {
            warn!(task_id, "failed to record fresh content: {e}");
            context.record_error(format!("record_content: {e}"));
        }
        DuplicateVerdict::fresh("passed all duplicate checks")
    }

    /// Record a layer's latency and outcome. Layer errors count as a pass.
    fn settle_layer(
        &self,
        context: &DedupContext,
        task_id: &str,
        name: &'static str,
        started: Instant,
        outcome: Result<Option<DuplicateVerdict>, DedupError>,
    ) -> Option<DuplicateVerdict> {
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        context.record_latency(name, elapsed_ms);
        common_metrics::histogram(
            LAYER_DURATION_HISTOGRAM,
            &[("layer".to_string(), name.to_string())],
            elapsed_ms,
        );

        match outcome {
            Ok(Some(verdict)) => {
                debug!(
                    task_id,
                    layer = name,
                    duplicate_type = verdict.duplicate_type.as_str(),
                    "duplicate detected"
                );
                Some(verdict)
            }
            Ok(None) => None,
            Err(e) => {
                // A faulting layer passes; the engine never fails closed.
                warn!(task_id, layer = name, "dedup layer error, treating as pass: {e}");
                context.record_error(format!("{name}: {e}"));
                self.lock_metrics().layer_errors += 1;
                None
            }
        }
    }

    /// Layer 1: an active task claim for the same (platform, creator) means
    /// this submission duplicates a running or pending task. Otherwise the
    /// key is claimed for this task.
    async fn check_task_level(
        &self,
        task_id: &str,
        platform: &str,
        creator_url: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if platform.is_empty() || creator_url.is_empty() {
            return Ok(None);
        }
        let key = format!("task:{platform}:{creator_url}");

        if let Some(claim) = self.cache.task_claim(&key).await? {
            if claim.is_active() && claim.task_id != task_id {
                return Ok(Some(DuplicateVerdict::duplicate(
                    DuplicateType::Task,
                    1.0,
                    Some(claim.task_id.clone()),
                    format!("an equivalent {} task already exists", claim.status),
                )));
            }
        }

        self.cache
            .set_task_claim(
                &key,
                &TaskClaim {
                    task_id: task_id.to_string(),
                    status: "running".to_string(),
                    platform: platform.to_string(),
                    creator_url: creator_url.to_string(),
                    created_at: Utc::now(),
                },
            )
            .await?;
        Ok(None)
    }

    /// Layer 2: Bloom probe on the normalized URL, confirmed against the
    /// index store on a hit. Misses are added to the filter.
    async fn check_url_level(
        &self,
        normalized_url: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if normalized_url.is_empty() {
            return Ok(None);
        }

        if self.cache.bloom_contains(normalized_url).await? {
            if let Some(existing) = self.index.content_by_url(normalized_url).await? {
                return Ok(Some(DuplicateVerdict::duplicate(
                    DuplicateType::Url,
                    1.0,
                    Some(existing.id),
                    format!("url already captured: {normalized_url}"),
                )));
            }
        }

        self.cache.bloom_add(normalized_url).await?;
        Ok(None)
    }

    /// Layer 3: exact content identity via SHA-256, checked against the
    /// short-TTL cache first and then the index. Index hits are cached.
    async fn check_content_hash(
        &self,
        content: &str,
        title: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if content.is_empty() {
            return Ok(None);
        }
        let hash = content_hash(title, content);

        if let Some(cached) = self.cache.content_hash(&hash).await? {
            return Ok(Some(DuplicateVerdict::duplicate(
                DuplicateType::ContentHash,
                1.0,
                cached.content_id,
                format!("content hash already seen: {}...", &hash[..16]),
            )));
        }

        if let Some(existing) = self.index.content_by_hash(&hash).await? {
            self.cache
                .set_content_hash(
                    &hash,
                    &CachedHash {
                        content_id: Some(existing.id.clone()),
                        url: Some(existing.url.clone()),
                        created_at: Utc::now(),
                    },
                )
                .await?;
            return Ok(Some(DuplicateVerdict::duplicate(
                DuplicateType::ContentHash,
                1.0,
                Some(existing.id),
                format!("content hash already stored: {}...", &hash[..16]),
            )));
        }
        Ok(None)
    }

    /// Layer 4: same title on the same platform inside the dedup window.
    async fn check_title_window(
        &self,
        title: &str,
        platform: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if title.is_empty() || platform.is_empty() {
            return Ok(None);
        }
        let since = Utc::now() - chrono::Duration::hours(self.config.time_window_hours);
        if let Some(existing) = self
            .index
            .content_by_title_platform_since(title, platform, since)
            .await?
        {
            return Ok(Some(DuplicateVerdict::duplicate(
                DuplicateType::Title,
                1.0,
                Some(existing.id),
                format!(
                    "same title on {platform} within {}h window",
                    self.config.time_window_hours
                ),
            )));
        }
        Ok(None)
    }

    /// Layer 5: near-duplicate text against recent captures. Short contents
    /// are skipped; the scan window is 7x the base window.
    async fn check_semantic(
        &self,
        content: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if content.trim().chars().count() < self.config.min_semantic_length {
            return Ok(None);
        }

        let since = Utc::now() - chrono::Duration::hours(self.config.time_window_hours * 7);
        let candidates = self
            .index
            .recent_contents(self.config.semantic_candidate_limit, since)
            .await?;

        let mut max_similarity = 0.0f64;
        let mut most_similar: Option<String> = None;
        for candidate in &candidates {
            let similarity = text_similarity(content, &candidate.content);
            if similarity > max_similarity {
                max_similarity = similarity;
                most_similar = Some(candidate.id.clone());
            }
        }

        if max_similarity >= self.config.similarity_threshold {
            let mut verdict = DuplicateVerdict::duplicate(
                DuplicateType::Semantic,
                max_similarity,
                most_similar,
                format!("similarity {max_similarity:.2} above threshold"),
            );
            verdict.similarity = Some(max_similarity);
            return Ok(Some(verdict));
        }
        Ok(None)
    }

    /// Layer 6: any record for this URL newer than the window.
    async fn check_time_window(
        &self,
        normalized_url: &str,
    ) -> Result<Option<DuplicateVerdict>, DedupError> {
        if normalized_url.is_empty() {
            return Ok(None);
        }
        let since = Utc::now() - chrono::Duration::hours(self.config.time_window_hours);
        if let Some(existing) = self
            .index
            .content_by_url_since(normalized_url, since)
            .await?
        {
            return Ok(Some(DuplicateVerdict::duplicate(
                DuplicateType::TimeWindow,
                1.0,
                Some(existing.id),
                format!(
                    "url captured within the last {}h",
                    self.config.time_window_hours
                ),
            )));
        }
        Ok(None)
    }

    async fn record_content(
        &self,
        context: &DedupContext,
        normalized_url: &str,
        content: &str,
        title: &str,
    ) -> Result<(), DedupError> {
        let hash = content_hash(title, content);
        context.add_processed_url(normalized_url);
        context.add_content_hash(&hash);
        context.add_processed_title(title);

        self.cache
            .set_content_hash(
                &hash,
                &CachedHash {
                    content_id: None,
                    url: Some(normalized_url.to_string()),
                    created_at: Utc::now(),
                },
            )
            .await
    }

    /// Release the task-level claim for a creator. Called when the owning
    /// task reaches a terminal state, so legitimate re-crawls are not locked
    /// out for the claim TTL.
    pub async fn release_task(&self, platform: &str, creator_url: &str) -> Result<(), DedupError> {
        if platform.is_empty() || creator_url.is_empty() {
            return Ok(());
        }
        self.cache
            .release_task_claim(&format!("task:{platform}:{creator_url}"))
            .await
    }

    /// Persist a context's snapshot and drop it from memory.
    pub async fn cleanup_context(&self, task_id: &str) -> Result<(), DedupError> {
        let context = self.lock_contexts().remove(task_id);
        if let Some(context) = context {
            self.cache.set_context_snapshot(&context.snapshot()).await?;
            context.clear();
        }
        Ok(())
    }

    /// Flush every live context snapshot to the cache store. Run on an
    /// interval by the context persister and once at shutdown.
    pub async fn persist_contexts(&self) -> Result<usize, DedupError> {
        let snapshots: Vec<ContextSnapshot> = self
            .lock_contexts()
            .values()
            .map(|context| context.snapshot())
            .collect();
        let count = snapshots.len();
        for snapshot in snapshots {
            self.cache.set_context_snapshot(&snapshot).await?;
        }
        Ok(count)
    }

    pub fn statistics(&self, task_id: &str) -> Option<serde_json::Value> {
        let context = self.lock_contexts().get(task_id).cloned()?;
        Some(serde_json::json!({
            "task_id": task_id,
            "stats": context.stats(),
            "memory_usage": context.memory_usage(),
            "latencies": context
                .latency_summary()
                .into_iter()
                .map(|(op, (min, avg, max, count))| {
                    (op, serde_json::json!({
                        "min_ms": min, "avg_ms": avg, "max_ms": max, "count": count,
                    }))
                })
                .collect::<HashMap<_, _>>(),
        }))
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.lock_metrics().clone()
    }

    pub fn active_contexts(&self) -> usize {
        self.lock_contexts().len()
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }
}
