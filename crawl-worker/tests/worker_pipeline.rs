use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common_redis::MemoryClient;
use crawl_dedup::{DedupCache, DedupConfig, DedupEngine, IndexStore, MemoryIndexStore};
use crawl_queue::{PriorityQueue, QueueConfig, QueueTask, TaskPriority, TaskStatus};
use crawl_recovery::{RecoveryConfig, RecoveryManager};
use crawl_scheduler::{Scheduler, SchedulingConfig};
use crawl_worker::{
    FetchError, FetchedContent, Fetcher, MemorySink, WorkerManager, WorkerSettings,
};

/// Scripted fetcher: responds per-URL with content or an error.
#[derive(Default)]
struct StubFetcher {
    responses: Mutex<HashMap<String, Result<FetchedContent, FetchError>>>,
}

impl StubFetcher {
    fn ok(&self, url: &str, title: &str, content: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Ok(FetchedContent {
                title: title.to_string(),
                content: content.to_string(),
                ..FetchedContent::default()
            }),
        );
    }

    fn err(&self, url: &str, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(FetchError::new(message)));
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        task: &QueueTask,
        _timeout: Duration,
    ) -> Result<FetchedContent, FetchError> {
        self.responses
            .lock()
            .unwrap()
            .get(&task.url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::new("no scripted response")))
    }
}

struct Harness {
    queue: PriorityQueue,
    index: Arc<MemoryIndexStore>,
    fetcher: Arc<StubFetcher>,
    manager: Arc<WorkerManager>,
    scheduler: Arc<Scheduler>,
}

fn harness() -> Harness {
    let client = MemoryClient::new();
    let queue = PriorityQueue::new(
        Arc::new(client.clone()),
        QueueConfig {
            retry_delay_secs: 0.2,
            retry_backoff: 1.0,
            max_retry_delay_secs: 0.2,
            ..QueueConfig::default()
        },
    );

    let index = Arc::new(MemoryIndexStore::new());
    let index_store: Arc<dyn IndexStore> = index.clone();
    let cache = Arc::new(DedupCache::new(
        Arc::new(client),
        DedupConfig::default(),
    ));
    let engine = Arc::new(DedupEngine::new(
        cache,
        index_store,
        DedupConfig::default(),
    ));
    let scheduler = Arc::new(Scheduler::new(SchedulingConfig::default()));
    let recovery = Arc::new(RecoveryManager::new(RecoveryConfig {
        jitter_enabled: false,
        ..RecoveryConfig::default()
    }));
    let fetcher = Arc::new(StubFetcher::default());
    let sink = Arc::new(MemorySink::new(index.clone()));

    let manager = Arc::new(WorkerManager::new(
        queue.clone(),
        scheduler.clone(),
        engine,
        recovery,
        fetcher.clone(),
        sink,
        WorkerSettings {
            capacity: 2,
            task_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            heartbeat_interval: Duration::from_secs(10),
        },
    ));

    Harness {
        queue,
        index,
        fetcher,
        manager,
        scheduler,
    }
}

fn task(id: &str, url: &str) -> QueueTask {
    let mut task = QueueTask::new(id, url, "weibo", TaskPriority::Normal);
    task.max_retries = 2;
    task
}

async fn wait_for_status(
    queue: &PriorityQueue,
    task_id: &str,
    expected: TaskStatus,
) -> QueueTask {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(task) = queue.task(task_id).await.unwrap() {
            if task.status == expected {
                return task;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {task_id} never reached {expected:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fresh_content_flows_to_the_sink() {
    let harness = harness();
    harness.fetcher.ok(
        "https://a.test/post/1",
        "Fresh Post",
        "a fresh piece of content from the crawl",
    );
    harness.manager.start(1);

    harness
        .queue
        .enqueue(task("t1", "https://a.test/post/1"), None)
        .await
        .unwrap();

    let done = wait_for_status(&harness.queue, "t1", TaskStatus::Completed).await;
    let result = done.result.expect("completed task carries a result");
    assert!(result.get("content_id").is_some());
    assert_eq!(harness.index.len(), 1);

    harness.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_capture_is_acked_as_duplicate() {
    let harness = harness();
    harness.fetcher.ok(
        "https://a.test/x?ts=1",
        "Same Post",
        "identical content body for both captures",
    );
    harness.fetcher.ok(
        "https://a.test/x?ts=2",
        "Same Post",
        "identical content body for both captures",
    );
    harness.manager.start(1);

    harness
        .queue
        .enqueue(task("t1", "https://a.test/x?ts=1"), None)
        .await
        .unwrap();
    let first = wait_for_status(&harness.queue, "t1", TaskStatus::Completed).await;
    assert!(first.result.unwrap().get("content_id").is_some());

    harness
        .queue
        .enqueue(task("t2", "https://a.test/x?ts=2"), None)
        .await
        .unwrap();
    let second = wait_for_status(&harness.queue, "t2", TaskStatus::Completed).await;
    let result = second.result.unwrap();
    assert_eq!(result.get("duplicate"), Some(&serde_json::json!(true)));

    // Only the first capture reached storage.
    assert_eq!(harness.index.len(), 1);

    harness.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_persistent_failure_exhausts_retries_into_dead_letter() {
    let harness = harness();
    harness
        .fetcher
        .err("https://down.test/x", "network error: connection refused");
    harness.manager.start(1);

    harness
        .queue
        .enqueue(task("t1", "https://down.test/x"), None)
        .await
        .unwrap();

    let failed = wait_for_status(&harness.queue, "t1", TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 2);
    assert!(failed
        .last_error
        .as_deref()
        .unwrap()
        .contains("network error"));

    let dead = harness.queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.id, "t1");
    assert_eq!(harness.index.len(), 0);

    harness.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failure_recovers_on_retry() {
    let harness = harness();
    harness
        .fetcher
        .err("https://flaky.test/x", "network error: connection reset");
    harness.manager.start(1);

    harness
        .queue
        .enqueue(task("t1", "https://flaky.test/x"), None)
        .await
        .unwrap();

    // Let the first attempt fail, then heal the endpoint before the
    // delayed re-enqueue fires.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(task) = harness.queue.task("t1").await.unwrap() {
            if task.retry_count >= 1 {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task never entered its first retry"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    harness
        .fetcher
        .ok("https://flaky.test/x", "Recovered", "content after recovery");

    let done = wait_for_status(&harness.queue, "t1", TaskStatus::Completed).await;
    assert!(done.retry_count >= 1);
    assert_eq!(harness.index.len(), 1);

    harness.manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manager_scaling_and_idle_tracking() {
    let harness = harness();
    harness.manager.start(2);
    assert_eq!(harness.manager.worker_count(), 2);

    harness.manager.scale_to(4).await;
    assert_eq!(harness.manager.worker_count(), 4);

    harness.manager.scale_to(1).await;
    assert_eq!(harness.manager.worker_count(), 1);

    // Everyone is idle; an immediate check wakes them all.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.manager.idle_workers().len(), 1);
    assert_eq!(harness.manager.trigger_immediate_check(), 1);

    harness.manager.stop().await;
    assert_eq!(harness.manager.worker_count(), 0);
    assert!(!harness.manager.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_sees_worker_outcomes() {
    let harness = harness();
    harness.fetcher.ok(
        "https://a.test/ok",
        "Ok",
        "content that will be stored fine",
    );
    harness.manager.start(1);

    harness
        .queue
        .enqueue(task("t1", "https://a.test/ok"), None)
        .await
        .unwrap();
    wait_for_status(&harness.queue, "t1", TaskStatus::Completed).await;

    let stats = harness.scheduler.stats();
    assert_eq!(stats.successful_assignments, 1);
    assert_eq!(stats.failed_assignments, 0);

    harness.manager.stop().await;
}
