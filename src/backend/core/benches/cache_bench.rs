//! Benchmarks for the cache store, key construction and the task queue.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::time::Duration;
use transflow_core::cache::{compression, content_hash, CacheConfig, CacheKey, CacheStore, KeyType};
use transflow_core::queue::{QueueConfig, TaskQueue, TaskType};

fn store_config(max_size: usize) -> CacheConfig {
    CacheConfig::builder().ttl_seconds(3600).max_size(max_size).cleanup_interval_ms(0).build()
}

fn bench_cache_key_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_key_construction");
    group.bench_function("simple", |b| { b.iter(|| black_box(CacheKey::new(KeyType::Review).with_segment("doc-123").build())); });
    group.bench_function("namespaced", |b| { b.iter(|| black_box(CacheKey::new(KeyType::Review).with_namespace("project-456").with_version(2).with_segments(["doc-789", "seg-4"]).build())); });
    group.bench_function("translation", |b| { b.iter(|| black_box(CacheKey::translation("The quick brown fox jumps over the lazy dog", "en", "de", "gpt-4o").build())); });
    group.bench_function("provider_response", |b| { b.iter(|| black_box(CacheKey::provider_response("anthropic", "claude", "Translate to French: good evening"))); });
    group.finish();
}

fn bench_content_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_hash");
    for len in [64usize, 1_024, 16_384] {
        let text = "a".repeat(len);
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &text, |b, t| { b.iter(|| black_box(content_hash([t.as_str(), "en", "es"]))); });
    }
    group.finish();
}

fn bench_cache_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_set");
    let rt = tokio::runtime::Runtime::new().unwrap();
    for cap in [100, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(cap), &cap, |b, &capacity| {
            let cache = rt.block_on(CacheStore::<serde_json::Value>::new(store_config(capacity))).unwrap();
            let mut i = 0u64;
            b.iter(|| { i += 1; cache.set(format!("key-{}", i % (capacity as u64 * 2)), json!({"text": "Hola"})).unwrap(); });
        });
    }
    group.finish();
}

fn bench_cache_get_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = rt.block_on(CacheStore::<serde_json::Value>::new(store_config(1_000))).unwrap();
    for i in 0..1_000 { cache.set(format!("key-{}", i), json!(i)).unwrap(); }
    let mut i = 0u64;
    c.bench_function("cache_get_hit", |b| { b.iter(|| { i += 1; black_box(cache.get(&format!("key-{}", i % 1_000))) }); });
}

fn bench_cache_get_miss(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = rt.block_on(CacheStore::<serde_json::Value>::new(store_config(1_000))).unwrap();
    c.bench_function("cache_get_miss", |b| { b.iter(|| black_box(cache.get("absent"))); });
}

fn bench_cache_cleanup(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    c.bench_function("cache_cleanup_evict_10pct", |b| {
        b.iter_batched(
            || {
                let cache = rt.block_on(CacheStore::<serde_json::Value>::new(store_config(1_000))).unwrap();
                for i in 0..1_100 { cache.set(format!("key-{}", i), json!(i)).unwrap(); }
                cache
            },
            |cache| black_box(cache.cleanup()),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_compression(c: &mut Criterion) {
    let mut group = c.benchmark_group("compression");
    let payload = serde_json::to_vec(&json!({ "text": "lorem ipsum dolor sit amet ".repeat(400) })).unwrap();
    let packed = compression::compress(&payload).unwrap();
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("compress", |b| { b.iter(|| black_box(compression::compress(&payload).unwrap())); });
    group.bench_function("decompress", |b| { b.iter(|| black_box(compression::decompress(&packed).unwrap())); });
    group.finish();
}

fn bench_queue_add_task(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = QueueConfig { process_interval_ms: 3_600_000, ..Default::default() };
    let queue = rt.block_on(TaskQueue::new(config)).unwrap();
    let mut priority = 0;
    c.bench_function("queue_add_task", |b| { b.iter(|| { priority = (priority + 1) % 10; black_box(queue.add_task(TaskType::Translation, priority, json!({"segment": 1}))) }); });
    rt.block_on(async { tokio::time::timeout(Duration::from_secs(1), queue.shutdown()).await.ok(); });
}

criterion_group!(benches, bench_cache_key_construction, bench_content_hash, bench_cache_set, bench_cache_get_hit, bench_cache_get_miss, bench_cache_cleanup, bench_compression, bench_queue_add_task);
criterion_main!(benches);
