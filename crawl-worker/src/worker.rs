use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crawl_dedup::{content_hash, normalize_url, ContentRecord, DedupEngine};
use crawl_queue::{PriorityQueue, QueueTask};
use crawl_recovery::{ErrorContext, RecoveryAction, RecoveryManager};
use crawl_scheduler::Scheduler;

use crate::fetch::{FetchError, FetchedContent, Fetcher};
use crate::sink::StorageSink;

const TASKS_PROCESSED_COUNTER: &str = "crawl_worker_tasks_processed_total";
const TASK_DURATION_HISTOGRAM: &str = "crawl_worker_task_duration_ms";
const DUPLICATES_COUNTER: &str = "crawl_worker_duplicates_total";

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Max concurrent tasks this worker advertises to the scheduler.
    pub capacity: u32,
    /// Hard cap on one task execution.
    pub task_timeout: Duration,
    /// How long an idle loop waits before re-polling the queue.
    pub poll_interval: Duration,
    /// Heartbeat refresh period; must stay under the 60s key TTL.
    pub heartbeat_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            capacity: 4,
            task_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Everything a fetch loop needs, shared across the pool.
pub(crate) struct Shared {
    pub queue: PriorityQueue,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<DedupEngine>,
    pub recovery: Arc<RecoveryManager>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn StorageSink>,
    pub settings: WorkerSettings,
}

/// One fetch loop: dequeue -> fetch -> dedup -> sink/ack, with failures
/// routed through the recovery engine. Steps inside the loop are strictly
/// sequential.
pub(crate) struct CrawlWorker {
    pub id: String,
    shared: Arc<Shared>,
    notify: Arc<Notify>,
    busy: Arc<AtomicBool>,
    token: CancellationToken,
}

impl CrawlWorker {
    pub(crate) fn new(
        id: String,
        shared: Arc<Shared>,
        notify: Arc<Notify>,
        busy: Arc<AtomicBool>,
        token: CancellationToken,
    ) -> Self {
        Self {
            id,
            shared,
            notify,
            busy,
            token,
        }
    }

    pub(crate) async fn run(self) {
        info!(worker_id = %self.id, "worker loop starting");
        self.shared
            .scheduler
            .register_worker(&self.id, self.shared.settings.capacity);
        if let Err(e) = self.shared.queue.register_worker(&self.id).await {
            warn!(worker_id = %self.id, "initial worker registration failed: {e}");
        }

        // Secondary heartbeat timer, so a long fetch cannot starve the key.
        let heartbeat_token = self.token.child_token();
        let heartbeat_queue = self.shared.queue.clone();
        let heartbeat_id = self.id.clone();
        let heartbeat_interval = self.shared.settings.heartbeat_interval;
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = heartbeat_queue.heartbeat(&heartbeat_id).await {
                            warn!(worker_id = %heartbeat_id, "heartbeat refresh failed: {e}");
                        }
                    }
                }
            }
        });

        while !self.token.is_cancelled() {
            match self
                .shared
                .queue
                .dequeue(&self.id, None, Some(Duration::ZERO))
                .await
            {
                Ok(Some(task)) => {
                    self.busy.store(true, Ordering::SeqCst);
                    self.process_task(task).await;
                    self.busy.store(false, Ordering::SeqCst);
                }
                Ok(None) => {
                    // Idle: wait for the poll interval, an immediate-check
                    // wake-up, or shutdown, whichever comes first.
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = self.notify.notified() => {
                            debug!(worker_id = %self.id, "woken for immediate task check");
                        }
                        _ = tokio::time::sleep(self.shared.settings.poll_interval) => {}
                    }
                }
                Err(e) => {
                    warn!(worker_id = %self.id, "dequeue failed: {e}");
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                    }
                }
            }

            if let Err(e) = self.shared.queue.heartbeat(&self.id).await {
                warn!(worker_id = %self.id, "heartbeat refresh failed: {e}");
            }
        }

        heartbeat.abort();
        info!(worker_id = %self.id, "worker loop stopped");
    }

    async fn process_task(&self, task: QueueTask) {
        let started = Instant::now();
        let timing = common_metrics::timing_guard(TASK_DURATION_HISTOGRAM, &[]);
        debug!(worker_id = %self.id, task_id = %task.id, url = %task.url, "processing task");
        self.shared.scheduler.assign(&task.id, &self.id);

        let creator_url = task
            .payload
            .get("creator_url")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let timeout = self.shared.settings.task_timeout;
        let fetched: Result<FetchedContent, FetchError> =
            match tokio::time::timeout(timeout, self.shared.fetcher.fetch(&task, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::new(format!(
                    "timeout: task exceeded the {}s processing cap",
                    timeout.as_secs()
                ))),
            };

        match fetched {
            Ok(content) => {
                self.handle_content(&task, &creator_url, content, started)
                    .await;
                timing.label("outcome", "fetched").fin();
            }
            Err(e) => {
                self.handle_failure(&task, &creator_url, &e.message, e.status, started)
                    .await;
                timing.label("outcome", "failed").fin();
            }
        }
    }

    async fn handle_content(
        &self,
        task: &QueueTask,
        creator_url: &str,
        content: FetchedContent,
        started: Instant,
    ) {
        let verdict = self
            .shared
            .engine
            .check_duplicate(
                &task.id,
                &task.url,
                &content.content,
                &content.title,
                &task.platform,
                creator_url,
            )
            .await;

        if verdict.is_duplicate {
            let result = serde_json::json!({
                "duplicate": true,
                "duplicate_type": verdict.duplicate_type,
                "duplicate_id": verdict.duplicate_id,
                "reason": verdict.reason,
            });
            if let Err(e) = self.shared.queue.complete(&task.id, Some(result)).await {
                warn!(task_id = %task.id, "failed to ack duplicate: {e}");
            }
            self.finish(task, creator_url, true, started).await;
            common_metrics::inc(
                DUPLICATES_COUNTER,
                &[(
                    "type".to_string(),
                    verdict.duplicate_type.as_str().to_string(),
                )],
                1,
            );
            return;
        }

        let record = ContentRecord {
            id: Uuid::new_v4().to_string(),
            // Stored under the normalized URL so later URL-layer lookups
            // match regardless of volatile params on the original capture.
            url: normalize_url(&task.url),
            title: content.title.clone(),
            platform: task.platform.clone(),
            author: content.author.clone(),
            content: content.content.clone(),
            published_at: content.published_at,
            content_hash: content_hash(&content.title, &content.content),
            tags: task.tags.clone(),
            created_at: Utc::now(),
        };

        match self.shared.sink.append(&record).await {
            Ok(content_id) => {
                let result = serde_json::json!({ "content_id": content_id });
                if let Err(e) = self.shared.queue.complete(&task.id, Some(result)).await {
                    warn!(task_id = %task.id, "failed to ack completion: {e}");
                }
                self.finish(task, creator_url, true, started).await;
            }
            Err(e) => {
                self.handle_failure(
                    task,
                    creator_url,
                    &format!("database error storing content: {e}"),
                    None,
                    started,
                )
                .await;
            }
        }
    }

    async fn handle_failure(
        &self,
        task: &QueueTask,
        creator_url: &str,
        message: &str,
        status: Option<u16>,
        started: Instant,
    ) {
        let context = ErrorContext {
            worker_id: Some(self.id.clone()),
            url: Some(task.url.clone()),
            platform: (!task.platform.is_empty()).then(|| task.platform.clone()),
            session_id: task.session_id.clone(),
            response_status: status,
            attempt: task.retry_count,
        };
        let verdict = self.shared.recovery.handle_error(&task.id, message, &context);
        let retry = verdict.should_retry && verdict.action == RecoveryAction::RetryTask;

        debug!(
            task_id = %task.id,
            action = verdict.action.as_str(),
            retry,
            "recovery verdict for failed task"
        );

        if let Err(e) = self.shared.queue.fail(&task.id, message, retry).await {
            warn!(task_id = %task.id, "failed to record task failure: {e}");
        }

        let elapsed = started.elapsed().as_secs_f64();
        self.shared
            .scheduler
            .task_completed(&task.id, &self.id, false, elapsed);
        common_metrics::inc(
            TASKS_PROCESSED_COUNTER,
            &[("outcome".to_string(), "failed".to_string())],
            1,
        );

        if !retry {
            // Terminal: free the creator claim and persist the context.
            self.release(task, creator_url).await;
        }
    }

    /// Successful terminal path: scheduler bookkeeping, breaker reset, claim
    /// release.
    async fn finish(&self, task: &QueueTask, creator_url: &str, success: bool, started: Instant) {
        let elapsed = started.elapsed().as_secs_f64();
        self.shared
            .scheduler
            .task_completed(&task.id, &self.id, success, elapsed);
        self.shared
            .recovery
            .record_success(Some(&task.url), (!task.platform.is_empty()).then_some(task.platform.as_str()));
        common_metrics::inc(
            TASKS_PROCESSED_COUNTER,
            &[("outcome".to_string(), "completed".to_string())],
            1,
        );
        self.release(task, creator_url).await;
    }

    async fn release(&self, task: &QueueTask, creator_url: &str) {
        if let Err(e) = self
            .shared
            .engine
            .release_task(&task.platform, creator_url)
            .await
        {
            warn!(task_id = %task.id, "failed to release task claim: {e}");
        }
        if let Err(e) = self.shared.engine.cleanup_context(&task.id).await {
            warn!(task_id = %task.id, "failed to clean up dedup context: {e}");
        }
    }
}
