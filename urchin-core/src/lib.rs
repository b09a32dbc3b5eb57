//! # urchin-core
//!
//! A lock-free dynamic hash table with list-based buckets, after Michael's
//! "High Performance Dynamic Lock-Free Hash Tables and List-Based Sets".
//!
//! - `insert`, `remove`, and `contains` are safe to call from any number of
//!   threads; writers are lock-free, readers never block.
//! - Buckets are ordered singly-linked lists whose links are tagged
//!   references: pointer, 15-bit version tag, and deletion mark in one
//!   CAS-able 64-bit word.
//! - Removal is two-phase: logical deletion (mark), then cooperative
//!   physical unlink by whichever traversal gets there first.
//! - Unlinked nodes are reclaimed through the hazard-pointer domain in
//!   `urchin-reclaim`; replaced bucket arrays through its epoch limbo.
//! - The table resizes itself when the load factor crosses the configured
//!   thresholds, doubling or halving the bucket array (never below the
//!   initial size).

pub mod data_structures;

pub use data_structures::{HashMapOptions, LockFreeHashMap};
pub use data_structures::hash::{LOWER_LOAD_FACTOR, MIN_BUCKETS, UPPER_LOAD_FACTOR};
