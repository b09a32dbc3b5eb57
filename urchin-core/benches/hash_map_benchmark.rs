//! Benchmarks for the lock-free hash map under concurrent load.
//!
//! Run with: cargo bench --package urchin-core --bench hash_map_benchmark

use criterion::Criterion;
use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use mimalloc::MiMalloc;
use std::sync::Arc;
use std::thread;

use urchin_core::{HashMapOptions, LockFreeHashMap};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// ============================================================================
// Concurrent disjoint inserts
// ============================================================================

fn concurrent_insert(thread_count: usize, keys_per_thread: usize) {
    let table: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let mut handles = vec![];

    for t in 0..thread_count {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let base = t * keys_per_thread;
            for key in base..base + keys_per_thread {
                table.insert(key, key);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(table.len(), thread_count * keys_per_thread);
}

// ============================================================================
// Read-heavy traffic over a warm table (9 lookups per mutation)
// ============================================================================

fn read_heavy(thread_count: usize, ops_per_thread: usize) {
    let table: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let key_range = 10_000;
    for key in 0..key_range {
        table.insert(key, key);
    }

    let mut handles = vec![];
    for t in 0..thread_count {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            for i in 0..ops_per_thread {
                let key = (t * ops_per_thread + i * 31) % key_range;
                if i % 10 == 0 {
                    if i % 20 == 0 {
                        table.remove(&key);
                    } else {
                        table.insert(key, key);
                    }
                } else {
                    let _ = black_box(table.contains(&key));
                }
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }
}

// ============================================================================
// Resize churn: bulk fills and drains that cross both load factors
// ============================================================================

fn resize_churn(thread_count: usize, keys_per_thread: usize) {
    let table: Arc<LockFreeHashMap<usize, usize>> =
        Arc::new(LockFreeHashMap::with_options(HashMapOptions {
            initial_buckets: 64,
            ..HashMapOptions::default()
        }));

    let mut handles = vec![];
    for t in 0..thread_count {
        let table = Arc::clone(&table);
        handles.push(thread::spawn(move || {
            let base = t * keys_per_thread;
            for key in base..base + keys_per_thread {
                table.insert(key, key);
            }
            for key in base..base + keys_per_thread {
                table.remove(&key);
            }
        }));
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(table.is_empty());
}

// ============================================================================
// Criterion benchmark groups
// ============================================================================

fn concurrent_insert_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_map_concurrent_insert");

    for thread_count in [1, 2, 4, 8, 16] {
        let bench_name = format!("lock_free_hash_map_{thread_count:0>2}_10000");
        group.bench_function(bench_name, |b| {
            b.iter(|| concurrent_insert(black_box(thread_count), black_box(10_000)))
        });
    }

    group.finish();
}

fn read_heavy_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_map_read_heavy");

    for thread_count in [1, 2, 4, 8, 16] {
        let bench_name = format!("lock_free_hash_map_{thread_count:0>2}_50000");
        group.bench_function(bench_name, |b| {
            b.iter(|| read_heavy(black_box(thread_count), black_box(50_000)))
        });
    }

    group.finish();
}

fn resize_churn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_map_resize_churn");

    for thread_count in [1, 2, 4, 8] {
        let bench_name = format!("lock_free_hash_map_{thread_count:0>2}_5000");
        group.bench_function(bench_name, |b| {
            b.iter(|| resize_churn(black_box(thread_count), black_box(5000)))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    concurrent_insert_benchmark,
    read_heavy_benchmark,
    resize_churn_benchmark
);
criterion_main!(benches);
