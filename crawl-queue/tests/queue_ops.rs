use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_redis::{Client, MemoryClient};
use crawl_queue::{
    PriorityQueue, QueueConfig, QueueStrategy, QueueTask, TaskPriority, TaskStatus,
};

fn queue_with(client: MemoryClient, config: QueueConfig) -> PriorityQueue {
    PriorityQueue::new(Arc::new(client), config)
}

fn task(id: &str, priority: TaskPriority, created_unix: i64) -> QueueTask {
    let mut task = QueueTask::new(id, format!("https://example.test/{id}"), "weibo", priority);
    task.created_at = DateTime::from_timestamp(created_unix, 0).unwrap();
    task
}

#[tokio::test]
async fn test_priority_first_ordering() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());

    queue
        .enqueue(task("a", TaskPriority::Normal, 100), None)
        .await
        .unwrap();
    queue
        .enqueue(task("b", TaskPriority::High, 200), None)
        .await
        .unwrap();
    queue
        .enqueue(task("c", TaskPriority::Normal, 50), None)
        .await
        .unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let task = queue
            .dequeue("w1", Some(QueueStrategy::PriorityFirst), Some(Duration::ZERO))
            .await
            .unwrap()
            .expect("expected a task");
        order.push(task.id.clone());
        queue.complete(&task.id, None).await.unwrap();
    }
    assert_eq!(order, vec!["b", "c", "a"]);
}

#[tokio::test]
async fn test_dequeue_marks_processing_and_records_assignment() {
    let client = MemoryClient::new();
    let queue = queue_with(client.clone(), QueueConfig::default());

    queue
        .enqueue(task("t1", TaskPriority::Normal, 100), None)
        .await
        .unwrap();
    let dequeued = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dequeued.status, TaskStatus::Processing);
    assert_eq!(dequeued.worker_id.as_deref(), Some("w1"));

    let status = queue.status().await.unwrap();
    assert_eq!(status.total_assignments, 1);
    assert_eq!(status.active_workers, 1);
    assert!(status.cache_connected);

    // Worker registry and heartbeat exist.
    assert!(client
        .exists("crawl_queue:worker:w1:heartbeat".to_string())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_complete_is_idempotent_per_task() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    queue
        .enqueue(task("t1", TaskPriority::Normal, 100), None)
        .await
        .unwrap();
    let t = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();

    queue.complete(&t.id, Some(serde_json::json!({"ok": true}))).await.unwrap();
    // A second completion must not flip anything.
    queue.complete(&t.id, None).await.unwrap();

    let stored = queue.task(&t.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result, Some(serde_json::json!({"ok": true})));
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_dead_letter_after_exhaustion() {
    let config = QueueConfig {
        max_retries: 2,
        retry_delay_secs: 0.05,
        retry_backoff: 2.0,
        ..QueueConfig::default()
    };
    let queue = queue_with(MemoryClient::new(), config);

    let mut t = task("t1", TaskPriority::Normal, 100);
    t.max_retries = 2;
    queue.enqueue(t, None).await.unwrap();

    // Two retryable failures, then the third attempt fails terminally.
    for attempt in 0..3u32 {
        let dequeued = queue
            .dequeue("w1", None, Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no task available on attempt {attempt}"));
        assert_eq!(dequeued.retry_count, attempt);
        queue.fail(&dequeued.id, "boom", true).await.unwrap();
    }

    let stored = queue.task("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.id, "t1");
    assert_eq!(dead[0].final_error, "boom");

    let status = queue.status().await.unwrap();
    assert_eq!(status.dead_letter_depth, 1);
}

#[tokio::test]
async fn test_fail_without_retry_goes_to_dead_letter() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    queue
        .enqueue(task("t1", TaskPriority::Low, 100), None)
        .await
        .unwrap();
    let t = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    queue.fail(&t.id, "auth challenge", false).await.unwrap();

    let stored = queue.task("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Failed);
    assert_eq!(queue.dead_letters(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_delayed_task_is_invisible_until_due() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    queue
        .enqueue(
            task("later", TaskPriority::Critical, 100),
            Some(Duration::from_secs(3600)),
        )
        .await
        .unwrap();

    let got = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(got.is_none(), "delayed task must not be visible yet");

    // Still queued, not lost.
    let status = queue.status().await.unwrap();
    assert_eq!(status.queue_depths.get("critical"), Some(&1));
}

#[tokio::test]
async fn test_worker_eviction_reassigns_in_flight_tasks() {
    let client = MemoryClient::new();
    let queue = queue_with(client.clone(), QueueConfig::default());

    queue
        .enqueue(task("t1", TaskPriority::Normal, 100), None)
        .await
        .unwrap();
    let t = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t.worker_id.as_deref(), Some("w1"));

    // Heartbeat expires, sweep reclaims.
    client.force_expire("crawl_queue:worker:w1:heartbeat");
    let evicted = queue.sweep_stale_workers().await.unwrap();
    assert_eq!(evicted, 1);

    let requeued = queue.task("t1").await.unwrap().unwrap();
    assert_eq!(requeued.status, TaskStatus::Queued);
    assert!(requeued.worker_id.is_none());

    // A different worker picks it up and completes it.
    let t2 = queue
        .dequeue("w2", None, Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(t2.id, "t1");
    queue.complete("t1", None).await.unwrap();

    // The evicted worker's late completion is ignored.
    queue.complete("t1", Some(serde_json::json!({"late": true}))).await.unwrap();
    let stored = queue.task("t1").await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert_eq!(stored.result, None);
}

#[tokio::test]
async fn test_corrupt_entry_goes_to_dead_letter_and_is_not_requeued() {
    let client = MemoryClient::new();
    let queue = queue_with(client.clone(), QueueConfig::default());

    // An id sitting in a bucket with no status snapshot is undecodable.
    client
        .zadd("crawl_queue:normal".to_string(), "ghost".to_string(), 1.0)
        .await
        .unwrap();

    let got = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(got.is_none());

    let dead = queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].task.id, "ghost");
    assert_eq!(
        queue.status().await.unwrap().queue_depths.get("normal"),
        Some(&0)
    );
}

#[tokio::test]
async fn test_expired_task_is_skipped() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    let mut t = task("old", TaskPriority::Normal, 100);
    t.expires_at = Some(Utc::now() - chrono::Duration::seconds(10));
    queue.enqueue(t, None).await.unwrap();

    let got = queue
        .dequeue("w1", None, Some(Duration::ZERO))
        .await
        .unwrap();
    assert!(got.is_none());
    assert_eq!(
        queue.task("old").await.unwrap().unwrap().status,
        TaskStatus::Expired
    );
}

#[tokio::test]
async fn test_fifo_and_lifo_pick_by_global_age() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    queue
        .enqueue(task("mid", TaskPriority::High, 150), None)
        .await
        .unwrap();
    queue
        .enqueue(task("oldest", TaskPriority::Batch, 50), None)
        .await
        .unwrap();
    queue
        .enqueue(task("newest", TaskPriority::Low, 500), None)
        .await
        .unwrap();

    let first = queue
        .dequeue("w1", Some(QueueStrategy::Fifo), Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.id, "oldest");

    let last = queue
        .dequeue("w1", Some(QueueStrategy::Lifo), Some(Duration::ZERO))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.id, "newest");
}

#[tokio::test]
async fn test_round_robin_rotates_buckets() {
    let queue = queue_with(MemoryClient::new(), QueueConfig::default());
    queue
        .enqueue(task("c1", TaskPriority::Critical, 100), None)
        .await
        .unwrap();
    queue
        .enqueue(task("n1", TaskPriority::Normal, 100), None)
        .await
        .unwrap();

    // Both tasks come out across two rotations, regardless of bucket.
    let mut seen = Vec::new();
    for _ in 0..2 {
        let t = queue
            .dequeue("w1", Some(QueueStrategy::RoundRobin), Some(Duration::ZERO))
            .await
            .unwrap()
            .unwrap();
        seen.push(t.id.clone());
        queue.complete(&t.id, None).await.unwrap();
    }
    seen.sort();
    assert_eq!(seen, vec!["c1", "n1"]);
}

#[tokio::test]
async fn test_metrics_snapshot_is_persisted_and_bounded() {
    let client = MemoryClient::new();
    let config = QueueConfig {
        metrics_history_limit: 3,
        ..QueueConfig::default()
    };
    let queue = queue_with(client.clone(), config);

    queue
        .enqueue(task("t1", TaskPriority::Normal, 100), None)
        .await
        .unwrap();
    for _ in 0..5 {
        queue.collect_metrics().await.unwrap();
    }
    assert_eq!(
        client.llen("crawl_queue:metrics".to_string()).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn test_queue_depth_matches_sorted_set_cardinality() {
    let client = MemoryClient::new();
    let queue = queue_with(client.clone(), QueueConfig::default());

    for i in 0..4 {
        queue
            .enqueue(task(&format!("t{i}"), TaskPriority::Batch, 100 + i), None)
            .await
            .unwrap();
    }
    let status = queue.status().await.unwrap();
    assert_eq!(status.queue_depths.get("batch"), Some(&4));
    assert_eq!(
        client.zcard("crawl_queue:batch".to_string()).await.unwrap(),
        4
    );
}
