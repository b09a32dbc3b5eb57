use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

use urchin_reclaim::{ReclaimDomain, ReclaimRecord, dealloc_boxed, local_record};

use crate::data_structures::internal::tagged_ptr::AtomicTaggedPtr;
use crate::data_structures::list::bucket_list::{BucketList, Node};

/// Default and minimum bucket count; halving never goes below it.
pub const MIN_BUCKETS: usize = 64;

/// Load factor above which the table doubles.
pub const UPPER_LOAD_FACTOR: f64 = 2.0;

/// Load factor below which the table halves. Kept 8x below the upper
/// threshold so drift in the advisory count cannot oscillate the table.
pub const LOWER_LOAD_FACTOR: f64 = 0.25;

/// Construction-time tuning for [`LockFreeHashMap`].
#[derive(Clone, Debug)]
pub struct HashMapOptions {
    /// Size of the first bucket array; also the floor for halving.
    pub initial_buckets: usize,
    /// Live-count / bucket-count ratio that triggers doubling.
    pub upper_load_factor: f64,
    /// Ratio that triggers halving.
    pub lower_load_factor: f64,
    /// Retired-list length that triggers a reclamation scan. `None` keeps
    /// the process-wide domain default of 2 x parallelism x hazard slots.
    pub retire_threshold: Option<usize>,
}

impl Default for HashMapOptions {
    fn default() -> Self {
        HashMapOptions {
            initial_buckets: MIN_BUCKETS,
            upper_load_factor: UPPER_LOAD_FACTOR,
            lower_load_factor: LOWER_LOAD_FACTOR,
            retire_threshold: None,
        }
    }
}

// A fixed-size array of bucket heads. Replaced wholesale on resize, never
// mutated structurally after construction.
struct BucketArray<K, V> {
    buckets: Box<[AtomicTaggedPtr<Node<K, V>>]>,
}

impl<K, V> BucketArray<K, V> {
    fn new(size: usize) -> Box<Self> {
        let buckets = (0..size).map(|_| AtomicTaggedPtr::null()).collect();
        Box::new(BucketArray { buckets })
    }

    fn size(&self) -> usize {
        self.buckets.len()
    }
}

impl<K, V> Drop for BucketArray<K, V> {
    // Frees every node still linked, marked or not. Runs only once the
    // array is unreachable: after the epoch limbo releases it, on discard
    // of a never-published rebuild, or on table drop.
    fn drop(&mut self) {
        for bucket in &self.buckets {
            let mut curr = bucket.load(Ordering::Relaxed).ptr();
            while !curr.is_null() {
                let node = unsafe { Box::from_raw(curr) };
                curr = node.next.load(Ordering::Relaxed).ptr();
            }
        }
    }
}

#[doc = r#"A lock-free dynamic hash table with list-based buckets.

Keys hash to a bucket of the current bucket array; each bucket is an
ordered singly-linked list whose `next` fields are tagged references
(pointer + version tag + deletion mark in one CAS-able word). Removal is
two-phase: a CAS sets the mark on the node's `next` (logical deletion, the
linearization point), and any later traversal CASes the predecessor past
the node (physical unlink). Unlinked nodes go through hazard-pointer
reclamation; replaced bucket arrays go through an epoch limbo.

The live count is advisory: it is maintained with relaxed increments and
may momentarily disagree with the true number of live nodes, but the two
converge in the absence of new mutations. Crossing the configured load
factors requests a resize; resizes are serialized by a flag, drain
in-flight mutators, rebuild into a fresh array with copied nodes, and swap
the directory pointer. Readers never block.

```ignore
let table: LockFreeHashMap<u64, String> = LockFreeHashMap::new();
assert!(table.insert(7, "seven".to_owned()));
assert!(table.contains(&7));
assert!(table.remove(&7));
```"#]
pub struct LockFreeHashMap<K, V, S = RandomState> {
    current: AtomicPtr<BucketArray<K, V>>,
    count: AtomicUsize,
    resizing: AtomicBool,
    // In-flight insert/remove operators; a resize drains this to zero
    // before rebuilding, so the old array is quiescent during the copy.
    active_mutators: AtomicUsize,
    min_buckets: usize,
    upper_load_factor: f64,
    lower_load_factor: f64,
    hasher: S,
}

// Raw node and array pointers are shared only under the hazard/epoch
// protocols; the key/value payloads cross threads by value.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Send for LockFreeHashMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send + Sync> Sync for LockFreeHashMap<K, V, S> {}

impl<K, V> LockFreeHashMap<K, V, RandomState>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }

    pub fn with_options(options: HashMapOptions) -> Self {
        Self::with_hasher_and_options(RandomState::new(), options)
    }
}

impl<K, V> Default for LockFreeHashMap<K, V, RandomState>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, S> LockFreeHashMap<K, V, S>
where
    K: Hash + Eq + Ord + Clone,
    V: Clone,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_and_options(hasher, HashMapOptions::default())
    }

    pub fn with_hasher_and_options(hasher: S, options: HashMapOptions) -> Self {
        if let Some(threshold) = options.retire_threshold {
            ReclaimDomain::global().set_retire_threshold(threshold);
        }

        let initial = options.initial_buckets.max(1);
        let array = Box::into_raw(BucketArray::new(initial));

        LockFreeHashMap {
            current: AtomicPtr::new(array),
            count: AtomicUsize::new(0),
            resizing: AtomicBool::new(false),
            active_mutators: AtomicUsize::new(0),
            min_buckets: initial,
            upper_load_factor: options.upper_load_factor,
            lower_load_factor: options.lower_load_factor,
            hasher,
        }
    }

    /// Insert `key` -> `value`. Returns true iff a new entry was created;
    /// false iff a live entry with the key already exists (the value is
    /// dropped in that case).
    pub fn insert(&self, key: K, value: V) -> bool {
        let domain = ReclaimDomain::global();
        let record = local_record();
        domain.pin(record);

        // Eager allocation: the node is built before the traversal and
        // released if the key turns out to be present.
        let node = Box::into_raw(Box::new(Node::new(key, value)));

        self.enter_mutator();
        let array_ptr = self.current.load(Ordering::SeqCst);
        let array = unsafe { &*array_ptr };
        let index = self.bucket_index(unsafe { &(*node).key }, array.size());
        let inserted = BucketList::new(&array.buckets[index]).insert_node(node, record, domain);
        self.exit_mutator();

        if inserted {
            let live = self.count.fetch_add(1, Ordering::Relaxed) + 1;
            if live as f64 / array.size() as f64 > self.upper_load_factor {
                self.try_resize(array_ptr, array.size() * 2, record, domain);
            }
        } else {
            // Key already present: release the unused allocation.
            unsafe { drop(Box::from_raw(node)) };
        }

        record.clear_all();
        domain.unpin(record);
        inserted
    }

    /// Remove the live entry with `key`. Returns true iff this operator's
    /// logical deletion succeeded; the physical unlink may be completed by
    /// any later traversal.
    pub fn remove(&self, key: &K) -> bool {
        let domain = ReclaimDomain::global();
        let record = local_record();
        domain.pin(record);

        self.enter_mutator();
        let array_ptr = self.current.load(Ordering::SeqCst);
        let array = unsafe { &*array_ptr };
        let index = self.bucket_index(key, array.size());
        let removed = BucketList::new(&array.buckets[index]).remove(key, record, domain);
        self.exit_mutator();

        if removed {
            let live = self.count.fetch_sub(1, Ordering::Relaxed) - 1;
            let size = array.size();
            if size > self.min_buckets && (live as f64 / size as f64) < self.lower_load_factor {
                self.try_resize(array_ptr, (size / 2).max(self.min_buckets), record, domain);
            }
        }

        record.clear_all();
        domain.unpin(record);
        removed
    }

    /// Membership query: true iff a live entry with `key` is observed.
    pub fn contains(&self, key: &K) -> bool {
        let domain = ReclaimDomain::global();
        let record = local_record();
        domain.pin(record);

        let array = unsafe { &*self.current.load(Ordering::SeqCst) };
        let index = self.bucket_index(key, array.size());
        let found = BucketList::new(&array.buckets[index]).find(key, record, domain);

        record.clear_all();
        domain.unpin(record);
        found
    }

    /// Advisory live-entry count.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the current bucket array.
    pub fn bucket_count(&self) -> usize {
        let domain = ReclaimDomain::global();
        let record = local_record();
        domain.pin(record);
        let size = unsafe { (*self.current.load(Ordering::SeqCst)).size() };
        domain.unpin(record);
        size
    }

    /// Advisory live count over the current bucket count.
    pub fn load_factor(&self) -> f64 {
        self.len() as f64 / self.bucket_count() as f64
    }

    fn bucket_index(&self, key: &K, size: usize) -> usize {
        self.hasher.hash_one(key) as usize % size
    }

    // Mutator section around insert/remove attempts. Entering waits out an
    // active rebuild; backing out closes the race where the flag is set
    // between the check and the increment.
    fn enter_mutator(&self) {
        loop {
            while self.resizing.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            self.active_mutators.fetch_add(1, Ordering::SeqCst);
            if !self.resizing.load(Ordering::SeqCst) {
                return;
            }
            self.active_mutators.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn exit_mutator(&self) {
        self.active_mutators.fetch_sub(1, Ordering::SeqCst);
    }

    // Rebuild the table at `new_size` buckets, if this operator wins the
    // resize flag and the trigger is not stale. Mutators are blocked for
    // the duration; readers keep traversing the old array and linearize
    // before the swap.
    fn try_resize(
        &self,
        old_array: *mut BucketArray<K, V>,
        new_size: usize,
        record: &ReclaimRecord,
        domain: &ReclaimDomain,
    ) {
        let new_size = new_size.max(self.min_buckets);

        if self
            .resizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Another operator is already resizing; the pending resize
            // will complete and a later trigger can retry.
            return;
        }

        // The trigger may be stale: a resize that completed between the
        // load-factor check and winning the flag already replaced the
        // array, or clamping left the size unchanged.
        let old_size = unsafe { (*old_array).size() };
        if self.current.load(Ordering::SeqCst) != old_array || new_size == old_size {
            self.resizing.store(false, Ordering::SeqCst);
            return;
        }

        tracing::debug!(old_size, new_size, "rebuilding bucket array");

        // Drain in-flight mutators; the old array is quiescent for the
        // copy except for readers unlinking marked nodes.
        while self.active_mutators.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
        }

        let new_array = Box::into_raw(BucketArray::new(new_size));
        unsafe {
            for bucket in &(*old_array).buckets {
                let live = BucketList::new(bucket).collect_live(record, domain);
                for (key, value) in live {
                    let index = self.bucket_index(&key, new_size);
                    let node = Box::into_raw(Box::new(Node::new(key, value)));
                    BucketList::new(&(*new_array).buckets[index]).insert_unpublished(node);
                }
            }
        }

        if self
            .current
            .compare_exchange(old_array, new_array, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            // Old array and its remaining nodes go to the epoch limbo;
            // in-flight readers pinned before the swap keep it alive.
            unsafe {
                domain.retire_array_with(old_array.cast(), dealloc_boxed::<BucketArray<K, V>>)
            };
            tracing::debug!(new_size, "bucket array swapped");
        } else {
            // Another resize replaced the array first; the rebuild was
            // never published and is discarded with its nodes.
            unsafe { drop(Box::from_raw(new_array)) };
            tracing::debug!(new_size, "bucket array rebuild discarded");
        }

        self.resizing.store(false, Ordering::SeqCst);
    }
}

impl<K, V, S> Drop for LockFreeHashMap<K, V, S> {
    fn drop(&mut self) {
        // Exclusive access: no operator can still be inside the table.
        // Retired nodes and limbo arrays drain through the domain.
        let array = self.current.load(Ordering::Relaxed);
        unsafe { drop(Box::from_raw(array)) };
    }
}
