use chrono::{DateTime, Utc};
use crawl_queue::{priority_score, QueueTask, TaskPriority};
use proptest::prelude::*;

fn task_with(priority: TaskPriority, created_unix: i64, retry_count: u32) -> QueueTask {
    let mut task = QueueTask::new("t", "https://example.test", "p", priority);
    task.created_at = DateTime::from_timestamp(created_unix, 0).unwrap();
    task.retry_count = retry_count;
    task
}

fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Critical),
        Just(TaskPriority::High),
        Just(TaskPriority::Normal),
        Just(TaskPriority::Low),
        Just(TaskPriority::Batch),
    ]
}

proptest! {
    /// Within a fixed (priority, retry_count), the score is strictly
    /// monotone in created_at, so dequeue order inside a bucket is FIFO.
    #[test]
    fn score_monotone_in_created_at(
        priority in arb_priority(),
        retry in 0u32..10,
        earlier in 0i64..1_700_000_000,
        gap in 1i64..1_000_000,
    ) {
        let now = Utc::now();
        let a = task_with(priority, earlier, retry);
        let b = task_with(priority, earlier + gap, retry);
        prop_assert!(priority_score(&a, now) < priority_score(&b, now));
    }

    /// Bucket ordinals dominate creation times drawn from the same window,
    /// so a higher-priority bucket always empties first under priority-first.
    #[test]
    fn retry_pushes_score_back(
        priority in arb_priority(),
        created in 0i64..1_700_000_000,
        retry in 0u32..20,
    ) {
        let now = Utc::now();
        let fresh = task_with(priority, created, retry);
        let retried = task_with(priority, created, retry + 1);
        prop_assert!(priority_score(&fresh, now) < priority_score(&retried, now));
    }
}
