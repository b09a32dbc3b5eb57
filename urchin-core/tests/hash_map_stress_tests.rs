use std::sync::{Arc, Barrier};
use std::thread;

use rstest::rstest;
use urchin_core::{LockFreeHashMap, MIN_BUCKETS};

#[rstest]
#[case::two_operators(2, 1000)]
#[case::four_operators(4, 1000)]
#[case::eight_operators(8, 500)]
fn disjoint_inserts_lose_nothing(#[case] threads: usize, #[case] keys_per_thread: usize) {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let base = t * keys_per_thread;
                for key in base..base + keys_per_thread {
                    assert!(map.insert(key, key));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), threads * keys_per_thread);
    for key in 0..threads * keys_per_thread {
        assert!(map.contains(&key), "key {key} lost");
    }
}

#[test]
fn single_key_hammer_stays_consistent() {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let threads = 2;
    let ops_per_thread = 50_000;
    let key = 42;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    if i % 2 == 0 {
                        map.insert(key, t * 1_000_000 + i);
                    } else {
                        map.remove(&key);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // After quiescence the advisory count is exact and must agree with
    // membership.
    let len = map.len();
    assert!(len <= 1, "more than one live entry for a single key: {len}");
    assert_eq!(map.contains(&key), len == 1);
}

#[test]
fn thundering_herd_mixed_operations() {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let threads = 16;
    let ops_per_thread = 5000;
    let key_range = 1000;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..ops_per_thread {
                    let key = (t * ops_per_thread + i) % key_range;
                    match i % 3 {
                        0 => {
                            map.insert(key, key * 2);
                        }
                        1 => {
                            let _ = map.contains(&key);
                        }
                        2 => {
                            map.remove(&key);
                        }
                        _ => unreachable!(),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Count and membership converge once the herd is done.
    let mut present = 0;
    for key in 0..key_range {
        if map.contains(&key) {
            present += 1;
        }
    }
    assert_eq!(map.len(), present);
}

#[test]
fn random_churn_against_membership_oracle() {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let threads = 8;
    let ops_per_thread = 20_000;
    let key_range = 512;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let key = rand::random::<usize>() % key_range;
                    match rand::random::<usize>() % 3 {
                        0 => {
                            map.insert(key, key);
                        }
                        1 => {
                            map.remove(&key);
                        }
                        _ => {
                            let _ = map.contains(&key);
                        }
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let present = (0..key_range).filter(|key| map.contains(key)).count();
    assert_eq!(map.len(), present);
}

#[test]
fn concurrent_growth_and_drain() {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    let threads = 8;
    let keys_per_thread = 5000;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let base = t * keys_per_thread;
                for key in base..base + keys_per_thread {
                    assert!(map.insert(key, key));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = threads * keys_per_thread;
    assert_eq!(map.len(), total);
    assert!(
        map.bucket_count() >= 1024,
        "table failed to grow: {} buckets for {} keys",
        map.bucket_count(),
        total
    );

    // Drain it back down concurrently; every remove must succeed exactly
    // once because the ranges are disjoint.
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                let base = t * keys_per_thread;
                for key in base..base + keys_per_thread {
                    assert!(map.remove(&key), "remove {key} failed");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(map.len(), 0);
    assert!(map.is_empty());
    assert!(map.bucket_count() >= MIN_BUCKETS);
    for key in (0..total).step_by(997) {
        assert!(!map.contains(&key));
    }
}

#[test]
fn readers_run_through_resizes() {
    let map: Arc<LockFreeHashMap<usize, usize>> = Arc::new(LockFreeHashMap::new());
    for key in 0..256 {
        map.insert(key, key);
    }

    let writer = {
        let map = Arc::clone(&map);
        thread::spawn(move || {
            // Oscillate the table size with bulk inserts and removals of a
            // disjoint upper key range.
            for round in 0..20 {
                for key in 10_000..12_000 {
                    map.insert(key, round);
                }
                for key in 10_000..12_000 {
                    map.remove(&key);
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let map = Arc::clone(&map);
            thread::spawn(move || {
                for _ in 0..200 {
                    for key in 0..256 {
                        // The stable lower range must stay visible through
                        // every array swap.
                        assert!(map.contains(&key), "key {key} vanished during resize");
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(map.len(), 256);
}
