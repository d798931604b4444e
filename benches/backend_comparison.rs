//! Backend performance comparison benchmarks
//!
//! Compares the memory and file backends through the manager for the hot
//! paths: point reads, writes, counters and bulk reads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use tempfile::TempDir;

use kura::cache::{
    BackendConfig, CacheManager, FileBackendConfig, ManagerConfig, MemoryBackendConfig,
};

fn managers() -> (TempDir, Vec<(&'static str, CacheManager)>) {
    let temp_dir = TempDir::new().unwrap();
    let memory = CacheManager::new(ManagerConfig {
        default_backend: None,
        backends: vec![BackendConfig::Memory(MemoryBackendConfig::named("memory"))],
    })
    .unwrap();
    let file = CacheManager::new(ManagerConfig {
        default_backend: None,
        backends: vec![BackendConfig::File(FileBackendConfig::new(
            "file",
            temp_dir.path(),
        ))],
    })
    .unwrap();
    (temp_dir, vec![("memory", memory), ("file", file)])
}

fn sample_value() -> serde_json::Value {
    json!({
        "id": 12345,
        "name": "benchmark user",
        "roles": ["reader", "writer"],
        "active": true,
    })
}

fn bench_get(c: &mut Criterion) {
    let (_dir, managers) = managers();
    let mut group = c.benchmark_group("backend_get");
    for (name, manager) in &managers {
        for i in 0..100 {
            manager
                .set(&format!("key-{}", i), sample_value(), None, None)
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(name), manager, |b, manager| {
            let mut counter = 0;
            b.iter(|| {
                let key = format!("key-{}", counter % 100);
                counter += 1;
                black_box(manager.get(black_box(&key), None).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_set(c: &mut Criterion) {
    let (_dir, managers) = managers();
    let mut group = c.benchmark_group("backend_set");
    for (name, manager) in &managers {
        group.bench_with_input(BenchmarkId::from_parameter(name), manager, |b, manager| {
            let value = sample_value();
            let mut counter = 0;
            b.iter(|| {
                let key = format!("key-{}", counter % 100);
                counter += 1;
                manager.set(&key, black_box(value.clone()), None, None).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_incr(c: &mut Criterion) {
    let (_dir, managers) = managers();
    let mut group = c.benchmark_group("backend_incr");
    for (name, manager) in &managers {
        group.bench_with_input(BenchmarkId::from_parameter(name), manager, |b, manager| {
            b.iter(|| black_box(manager.incr("counter", 1, None, None).unwrap()));
        });
    }
    group.finish();
}

fn bench_get_many(c: &mut Criterion) {
    let (_dir, managers) = managers();
    let keys: Vec<String> = (0..20).map(|i| format!("bulk-{}", i)).collect();
    let mut group = c.benchmark_group("backend_get_many_20");
    for (name, manager) in &managers {
        for key in &keys {
            manager.set(key, sample_value(), None, None).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(name), manager, |b, manager| {
            b.iter(|| black_box(manager.get_many(black_box(&keys), None).unwrap()));
        });
    }
    group.finish();
}

fn bench_async_get(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (_dir, managers) = managers();
    let mut group = c.benchmark_group("backend_async_get");
    for (name, manager) in &managers {
        manager.set("async-key", sample_value(), None, None).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(name), manager, |b, manager| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(manager.get_async("async-key", None).await.unwrap());
                })
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_get,
    bench_set,
    bench_incr,
    bench_get_many,
    bench_async_get
);
criterion_main!(benches);
