//! Hash-based collection implementations.

pub mod lock_free_hash_map;

pub use lock_free_hash_map::{
    HashMapOptions, LOWER_LOAD_FACTOR, LockFreeHashMap, MIN_BUCKETS, UPPER_LOAD_FACTOR,
};
