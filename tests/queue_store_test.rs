mod common;

use std::collections::HashSet;
use std::sync::Arc;

use brood::adapters::sqlite::SqliteQueueStore;
use brood::application::TaskCoordinator;
use brood::domain::models::{Config, Task, TaskStatus, TaskSubmission};
use brood::domain::ports::{ManualClock, QueueStore, TaskFilter};
use chrono::{Duration, Utc};
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_concurrent_claims_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let pool = common::file_pool(&dir.path().join("queue.db")).await;
    let store = Arc::new(SqliteQueueStore::new(pool));

    let now = Utc::now();
    let mut submitted = HashSet::new();
    for i in 0..5 {
        let task = store
            .put(&Task::new(json!({ "n": i })).created_at_time(now))
            .await
            .unwrap();
        submitted.insert(task.id);
    }

    // 12 slots race for 5 ready tasks
    let handles: Vec<_> = (0..12)
        .map(|slot| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get_ready(1, now, &format!("slot-{slot}")).await.unwrap() })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.await.unwrap());
    }

    assert_eq!(claimed.len(), 5);
    let unique: HashSet<Uuid> = claimed.iter().map(|t| t.id).collect();
    assert_eq!(unique, submitted);

    for task in &claimed {
        let stored = store.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Claimed);
        assert_eq!(stored.claimed_by, task.claimed_by);
    }
}

#[tokio::test]
async fn test_single_slot_claims_by_priority_then_submission_order() {
    let (coordinator, _) = common::coordinator().await;

    let a = coordinator.submit(TaskSubmission::new(json!({"name": "A"})).with_priority(5)).await.unwrap();
    let b = coordinator.submit(TaskSubmission::new(json!({"name": "B"})).with_priority(9)).await.unwrap();
    let c = coordinator.submit(TaskSubmission::new(json!({"name": "C"})).with_priority(9)).await.unwrap();

    let mut order = Vec::new();
    for _ in 0..3 {
        let claimed = coordinator.claim(0, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);
        let task_id = claimed[0].id;
        coordinator.start(task_id).await.unwrap();
        coordinator.complete(task_id, json!({})).await.unwrap();
        order.push(task_id);
    }

    assert_eq!(order, vec![b, c, a]);
    assert!(coordinator.claim(0, 1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_higher_priority_always_claimed_first() {
    let (coordinator, _) = common::coordinator().await;

    let priorities = [3, -1, 7, 0, 7, 12, -5, 3];
    let mut expected = Vec::new();
    for (i, priority) in priorities.iter().enumerate() {
        let id = coordinator
            .submit(TaskSubmission::new(json!({ "i": i })).with_priority(*priority))
            .await
            .unwrap();
        expected.push((*priority, i, id));
    }
    // Descending priority, submission order within a priority
    expected.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

    let claimed = coordinator.claim(0, priorities.len()).await.unwrap();
    let ids: Vec<Uuid> = claimed.iter().map(|t| t.id).collect();
    let expected_ids: Vec<Uuid> = expected.iter().map(|(_, _, id)| *id).collect();
    assert_eq!(ids, expected_ids);
}

#[tokio::test]
async fn test_top_50_listing_over_10k_tasks_uses_index() {
    let store = common::memory_store().await;
    let now = Utc::now();

    for i in 0..10_000 {
        let task = Task::new(json!({ "i": i }))
            .with_priority(i % 97)
            .created_at_time(now);
        store.put(&task).await.unwrap();
    }

    let top = store.list(TaskFilter::default().page(50, 0)).await.unwrap();
    assert_eq!(top.len(), 50);
    assert_eq!(top[0].priority, 96);
    assert!(top.windows(2).all(|w| w[0].priority > w[1].priority
        || (w[0].priority == w[1].priority && w[0].seq < w[1].seq)));

    let unfiltered = store.explain_list_plan(&TaskFilter::default().page(50, 0)).await.unwrap();
    assert!(unfiltered.iter().any(|d| d.contains("idx_tasks_priority")), "{unfiltered:?}");
    assert!(!unfiltered.iter().any(|d| d.contains("TEMP B-TREE")), "{unfiltered:?}");

    let by_status = TaskFilter::by_status(TaskStatus::Pending).page(50, 0);
    let pending = store.list(by_status.clone()).await.unwrap();
    assert_eq!(pending.len(), 50);

    let plan = store.explain_list_plan(&by_status).await.unwrap();
    assert!(plan.iter().any(|d| d.contains("idx_tasks_status_priority")), "{plan:?}");
    assert!(!plan.iter().any(|d| d.contains("TEMP B-TREE")), "{plan:?}");
}

#[tokio::test]
async fn test_stale_task_is_recovered_exactly_once_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("brood.db");
    let config = Config::default();
    let clock = ManualClock::default();

    let task_id = {
        let pool = common::file_pool(&db_path).await;
        let coordinator = TaskCoordinator::new(Arc::new(SqliteQueueStore::new(pool.clone())), &config)
            .with_clock(Arc::new(clock.clone()));
        let task_id = coordinator.submit(TaskSubmission::new(json!({"job": "render"}))).await.unwrap();
        coordinator.claim(0, 1).await.unwrap();
        coordinator.start(task_id).await.unwrap();
        // Process dies without reporting
        pool.close().await;
        task_id
    };

    clock.advance(Duration::seconds(i64::try_from(config.recovery.stale_after_secs).unwrap() + 1));

    let pool = common::file_pool(&db_path).await;
    let coordinator = TaskCoordinator::new(Arc::new(SqliteQueueStore::new(pool)), &config)
        .with_clock(Arc::new(clock.clone()));

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    assert_eq!(coordinator.recover_stale().await.unwrap(), vec![task_id]);
    assert!(coordinator.recover_stale().await.unwrap().is_empty());

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert!(task.claimed_by.is_none());

    let counts = coordinator.count_by_status().await.unwrap();
    assert_eq!(counts.values().sum::<u64>(), 1);

    let reclaimed = coordinator.claim(1, 10).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, task_id);
}
