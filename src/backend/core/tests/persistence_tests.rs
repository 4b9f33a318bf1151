//! Integration tests for snapshot persistence of the cache and the queue.

use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use transflow_core::cache::{CacheConfig, CacheStore};
use transflow_core::config::Config;
use transflow_core::context::CoreContext;
use transflow_core::queue::{QueueConfig, TaskQueue, TaskStatus, TaskType};

fn cache_config(dir: &TempDir) -> CacheConfig {
    CacheConfig::builder()
        .ttl_seconds(600)
        .max_size(100)
        .cleanup_interval_ms(0)
        .persistence(dir.path().join("cache.json").to_string_lossy())
        .build()
}

fn queue_config(dir: &TempDir) -> QueueConfig {
    QueueConfig {
        process_interval_ms: 3_600_000,
        enable_persistence: true,
        persistence_path: dir.path().join("queue.json").to_string_lossy().into_owned(),
        ..Default::default()
    }
}

// ============================================================================
// Cache Snapshots
// ============================================================================

#[tokio::test]
async fn test_cache_survives_restart() {
    let dir = TempDir::new().unwrap();

    let cache = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    cache.set("translation:en-es:1", json!({"text": "Hola"})).unwrap();
    cache.set("translation:en-fr:1", json!({"text": "Bonjour"})).unwrap();
    cache.get("translation:en-es:1");
    cache.shutdown().await;

    let reloaded = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded.get("translation:en-fr:1"), Some(json!({"text": "Bonjour"})));

    let entry = reloaded.entry("translation:en-es:1").unwrap();
    assert!(entry.access_count >= 1);

    // Statistics start over.
    let stats = reloaded.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);

    reloaded.shutdown().await;
}

#[tokio::test]
async fn test_expired_entries_are_not_restored() {
    let dir = TempDir::new().unwrap();

    let cache = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    cache
        .set_with_ttl("short", json!(1), Duration::from_millis(20))
        .unwrap();
    cache.set("long", json!(2)).unwrap();
    cache.shutdown().await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let reloaded = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    assert!(!reloaded.has("short"));
    assert!(reloaded.has("long"));
    assert_eq!(reloaded.len(), 1);

    reloaded.shutdown().await;
}

#[tokio::test]
async fn test_compressed_entries_survive_restart() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig {
        enable_compression: true,
        compression_threshold_bytes: 64,
        ..cache_config(&dir)
    };
    let document = json!({ "body": "segment ".repeat(100) });

    let cache = CacheStore::<serde_json::Value>::new(config.clone()).await.unwrap();
    cache.set("doc", document.clone()).unwrap();
    cache.shutdown().await;

    let reloaded = CacheStore::<serde_json::Value>::new(config).await.unwrap();
    assert!(reloaded.entry("doc").unwrap().value.is_compressed());
    assert_eq!(reloaded.get("doc"), Some(document));

    reloaded.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_cache_snapshot_starts_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cache.json"), b"{ not json").unwrap();

    let cache = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    assert!(cache.is_empty());

    cache.set("k", json!(1)).unwrap();
    cache.shutdown().await;

    let reloaded = CacheStore::<serde_json::Value>::new(cache_config(&dir)).await.unwrap();
    assert_eq!(reloaded.get("k"), Some(json!(1)));
    reloaded.shutdown().await;
}

// ============================================================================
// Queue Snapshots
// ============================================================================

#[tokio::test]
async fn test_unwritable_snapshots_do_not_break_operations() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let cache = CacheStore::<serde_json::Value>::new(
        CacheConfig::builder()
            .cleanup_interval_ms(0)
            .persistence(blocker.join("cache.json").to_string_lossy())
            .build(),
    )
    .await
    .unwrap();
    cache.set("segment:1", json!("Hola")).unwrap();
    assert_eq!(cache.get("segment:1"), Some(json!("Hola")));

    let queue = TaskQueue::new(QueueConfig {
        process_interval_ms: 3_600_000,
        enable_persistence: true,
        persistence_path: blocker.join("queue.json").to_string_lossy().into_owned(),
        ..Default::default()
    })
    .await
    .unwrap();
    let id = queue.add_task(TaskType::Translation, 1, json!({"segment": "a"}));
    assert_eq!(queue.get_task_status(id).unwrap(), TaskStatus::Pending);

    tokio::time::timeout(Duration::from_secs(5), async {
        queue.shutdown().await;
        cache.shutdown().await;
    })
    .await
    .expect("shutdown hung on failed snapshot writes");

    assert!(blocker.is_file());
    assert!(!blocker.join("cache.json").exists());
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();

    let queue = TaskQueue::new(queue_config(&dir)).await.unwrap();
    let low = queue.add_task(TaskType::Translation, 1, json!({"segment": "a"}));
    let high = queue.add_task(TaskType::Review, 7, json!({"segment": "b"}));
    let cancelled = queue.add_task(TaskType::Validation, 3, json!(null));
    queue.cancel_task(cancelled).unwrap();
    queue.shutdown().await;

    let reloaded = TaskQueue::new(queue_config(&dir)).await.unwrap();
    let stats = reloaded.stats();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.cancelled, 1);

    let task = reloaded.get_task(high).unwrap();
    assert_eq!(task.priority, 7);
    assert_eq!(task.task_type, TaskType::Review);
    assert_eq!(task.payload, json!({"segment": "b"}));
    assert_eq!(reloaded.get_task_status(low).unwrap(), TaskStatus::Pending);
    assert_eq!(reloaded.get_task_status(cancelled).unwrap(), TaskStatus::Cancelled);

    reloaded.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_tasks_run_again_after_restart() {
    let dir = TempDir::new().unwrap();

    let queue = TaskQueue::new(queue_config(&dir)).await.unwrap();
    queue.register_handler(
        TaskType::Translation,
        transflow_core::queue::handler_fn(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }),
    );
    let id = queue.add_task(TaskType::Translation, 0, json!(null));
    assert_eq!(queue.process_pending(), 1);
    assert_eq!(queue.get_task_status(id).unwrap(), TaskStatus::Processing);
    queue.shutdown().await;

    let reloaded = TaskQueue::new(queue_config(&dir)).await.unwrap();
    assert_eq!(reloaded.get_task_status(id).unwrap(), TaskStatus::Pending);

    reloaded.register_handler(
        TaskType::Translation,
        transflow_core::queue::handler_fn(|_ctx| async { Ok(Some(json!("done"))) }),
    );
    assert_eq!(reloaded.process_pending(), 1);

    tokio::time::timeout(Duration::from_secs(5), async {
        while reloaded.get_task_status(id).unwrap() != TaskStatus::Completed {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    reloaded.shutdown().await;
}

// ============================================================================
// Full Context
// ============================================================================

#[tokio::test]
async fn test_monitor_metrics_survive_context_restart() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.cache = cache_config(&dir);
    config.queue = queue_config(&dir);

    let ctx = CoreContext::from_config(&config).await.unwrap();
    ctx.monitor.record_request(true, 250);
    ctx.monitor.record_task_completion(TaskType::QualityCheck, true, 40);
    ctx.shutdown().await;

    let ctx = CoreContext::from_config(&config).await.unwrap();
    let metrics = ctx.monitor.get_metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.average_processing_time, 250.0);
    assert_eq!(ctx.monitor.task_metrics(TaskType::QualityCheck).unwrap().count, 1);

    ctx.shutdown().await;
}
