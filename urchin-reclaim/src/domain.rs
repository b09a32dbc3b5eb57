use std::ptr::null_mut;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicUsize, Ordering};

use crate::epoch::{ArrayLimbo, QUIESCENT};

// Hazard slots hold full addresses in a usize; the tagged references in
// urchin-core additionally assume 48-bit canonical addresses.
const _: () = assert!(std::mem::size_of::<usize>() == 8);

/// Number of hazard slots each operator owns.
///
/// The bucket-list traversal needs exactly three live protections at a time:
/// the successor it is about to step to, the current node, and the node whose
/// `next` field serves as the predecessor slot.
pub const HAZARD_SLOTS: usize = 3;

/// Per-operator reclamation record.
///
/// Records are pushed onto a process-wide singly-linked list and are never
/// unlinked or freed. An operator that exits releases its record by clearing
/// the slots and dropping the `active` flag; a later operator may re-acquire
/// it instead of allocating a fresh one.
///
/// The hazard slots are written only by the owning operator and read by
/// reclaimers. `epoch` is the operator's pinned epoch for bucket-array
/// reclamation (quiescent while idle).
pub struct ReclaimRecord {
    hazards: [AtomicUsize; HAZARD_SLOTS],
    pub(crate) epoch: AtomicU64,
    active: AtomicBool,
    next: AtomicPtr<ReclaimRecord>,
}

impl ReclaimRecord {
    fn new() -> Self {
        ReclaimRecord {
            hazards: [const { AtomicUsize::new(0) }; HAZARD_SLOTS],
            epoch: AtomicU64::new(QUIESCENT),
            active: AtomicBool::new(true),
            next: AtomicPtr::new(null_mut()),
        }
    }

    /// Publish `addr` in hazard slot `slot`.
    ///
    /// The store is sequentially consistent: it must be ordered before the
    /// caller's validation re-read and visible to any scan snapshot that
    /// follows it in the single total order.
    #[inline]
    pub fn protect(&self, slot: usize, addr: usize) {
        self.hazards[slot].store(addr, Ordering::SeqCst);
    }

    /// Clear hazard slot `slot`.
    #[inline]
    pub fn clear(&self, slot: usize) {
        self.hazards[slot].store(0, Ordering::Release);
    }

    /// Clear every hazard slot.
    #[inline]
    pub fn clear_all(&self) {
        for slot in &self.hazards {
            slot.store(0, Ordering::Release);
        }
    }

    /// Release this record back to the domain for re-acquisition.
    fn release(&self) {
        self.clear_all();
        self.epoch.store(QUIESCENT, Ordering::Release);
        self.active.store(false, Ordering::Release);
    }
}

// A retired allocation awaiting reclamation. The cell is a side allocation:
// the retired object itself stays intact until its dealloc fn runs.
struct RetiredNode {
    ptr: *mut u8,
    dealloc: unsafe fn(*mut u8),
    next: *mut RetiredNode,
}

struct RetiredList {
    head: AtomicPtr<RetiredNode>,
    len: AtomicUsize,
}

impl RetiredList {
    const fn new() -> Self {
        RetiredList {
            head: AtomicPtr::new(null_mut()),
            len: AtomicUsize::new(0),
        }
    }

    // Push one cell and return the list length after the push.
    fn push(&self, node: Box<RetiredNode>) -> usize {
        let node = Box::into_raw(node);
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            // The cell is not shared until the CAS below publishes it.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed) + 1
    }

    // Detach the whole list for a scan pass.
    fn detach(&self) -> *mut RetiredNode {
        let head = self.head.swap(null_mut(), Ordering::Acquire);
        self.len.store(0, Ordering::Relaxed);
        head
    }
}

/// Process-wide reclamation domain: the record list, the retired list, and
/// the bucket-array limbo.
pub struct ReclaimDomain {
    records: AtomicPtr<ReclaimRecord>,
    retired: RetiredList,
    // 0 means "derive from available parallelism".
    retire_threshold: AtomicUsize,
    parallelism: AtomicUsize,
    pub(crate) limbo: ArrayLimbo,
}

static GLOBAL_DOMAIN: ReclaimDomain = ReclaimDomain::new();

thread_local! {
    static LOCAL_RECORD: LocalRecord = LocalRecord(GLOBAL_DOMAIN.acquire_record());
}

// Thread-local handle; releases the record when the thread exits.
struct LocalRecord(&'static ReclaimRecord);

impl Drop for LocalRecord {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// The calling operator's reclamation record, acquired from the global
/// domain on first use and released when the thread exits.
pub fn local_record() -> &'static ReclaimRecord {
    LOCAL_RECORD.with(|local| local.0)
}

impl ReclaimDomain {
    const fn new() -> Self {
        ReclaimDomain {
            records: AtomicPtr::new(null_mut()),
            retired: RetiredList::new(),
            retire_threshold: AtomicUsize::new(0),
            parallelism: AtomicUsize::new(0),
            limbo: ArrayLimbo::new(),
        }
    }

    /// The process-wide domain instance.
    pub fn global() -> &'static ReclaimDomain {
        &GLOBAL_DOMAIN
    }

    /// Acquire a record: re-use a released one if possible, otherwise
    /// allocate and push. The returned record is never freed.
    pub fn acquire_record(&self) -> &'static ReclaimRecord {
        let mut record = self.records.load(Ordering::Acquire);
        while !record.is_null() {
            let r = unsafe { &*record };
            if !r.active.load(Ordering::Relaxed)
                && r.active
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
            {
                return r;
            }
            record = r.next.load(Ordering::Acquire);
        }

        let record = Box::into_raw(Box::new(ReclaimRecord::new()));
        let mut head = self.records.load(Ordering::Relaxed);
        loop {
            // Not shared until the CAS below publishes it.
            unsafe { (*record).next.store(head, Ordering::Relaxed) };
            match self.records.compare_exchange_weak(
                head,
                record,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return unsafe { &*record },
                Err(actual) => head = actual,
            }
        }
    }

    /// Retire a `Box`-allocated object, freeing it via its `Drop` once no
    /// hazard slot publishes its address.
    ///
    /// # Safety
    /// - `ptr` must come from `Box::into_raw` and be retired exactly once.
    /// - `ptr` must already be unreachable from the shared structure: no
    ///   operator that has not yet published it may find it again.
    pub unsafe fn retire<T>(&self, ptr: *mut T) {
        unsafe { self.retire_with(ptr.cast(), dealloc_boxed::<T>) };
    }

    /// Retire an allocation with an explicit deallocation routine.
    ///
    /// # Safety
    /// Same contract as [`retire`](Self::retire), with `dealloc` the correct
    /// routine for `ptr`.
    pub unsafe fn retire_with(&self, ptr: *mut u8, dealloc: unsafe fn(*mut u8)) {
        let len = self.retired.push(Box::new(RetiredNode {
            ptr,
            dealloc,
            next: null_mut(),
        }));
        if len >= self.retire_threshold() {
            self.scan();
        }
    }

    /// Retired-list length that triggers a scan.
    pub fn retire_threshold(&self) -> usize {
        let configured = self.retire_threshold.load(Ordering::Relaxed);
        if configured != 0 {
            return configured;
        }
        2 * self.parallelism() * HAZARD_SLOTS
    }

    /// Override the scan trigger; `0` restores the default of
    /// `2 × parallelism × HAZARD_SLOTS`.
    pub fn set_retire_threshold(&self, threshold: usize) {
        self.retire_threshold.store(threshold, Ordering::Relaxed);
    }

    fn parallelism(&self) -> usize {
        let cached = self.parallelism.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.parallelism.store(threads, Ordering::Relaxed);
        threads
    }

    /// Current retired-list length (advisory).
    pub fn retired_len(&self) -> usize {
        self.retired.len.load(Ordering::Relaxed)
    }

    /// Snapshot every published hazard address, detach the retired list, and
    /// free every retired allocation whose address is not in the snapshot.
    /// Protected allocations are re-retired. Also collects the array limbo.
    pub fn scan(&self) {
        let mut protected = self.hazard_snapshot();
        protected.sort_unstable();

        let mut retired = self.retired.detach();
        let mut freed = 0usize;
        let mut kept = 0usize;

        while !retired.is_null() {
            let cell = unsafe { Box::from_raw(retired) };
            retired = cell.next;

            if protected.binary_search(&(cell.ptr as usize)).is_ok() {
                kept += 1;
                self.retired.push(cell);
            } else {
                freed += 1;
                unsafe { (cell.dealloc)(cell.ptr) };
            }
        }

        if freed != 0 || kept != 0 {
            tracing::trace!(freed, kept, "hazard scan");
        }

        self.collect_arrays();
    }

    // Acquire loads per the scan contract; the SeqCst publication store on
    // the operator side pairs with the detach that precedes this snapshot.
    fn hazard_snapshot(&self) -> Vec<usize> {
        let mut snapshot = Vec::new();
        let mut record = self.records.load(Ordering::Acquire);
        while !record.is_null() {
            let r = unsafe { &*record };
            for slot in &r.hazards {
                let addr = slot.load(Ordering::SeqCst);
                if addr != 0 {
                    snapshot.push(addr);
                }
            }
            record = r.next.load(Ordering::Acquire);
        }
        snapshot
    }

    /// Pin `record` to the current epoch. Must precede the operator's read
    /// of any epoch-protected pointer (the directory's bucket array).
    #[inline]
    pub fn pin(&self, record: &ReclaimRecord) {
        let epoch = self.limbo.global_epoch();
        record.epoch.store(epoch, Ordering::SeqCst);
    }

    /// Mark `record` quiescent: it no longer holds epoch-protected pointers.
    #[inline]
    pub fn unpin(&self, record: &ReclaimRecord) {
        record.epoch.store(QUIESCENT, Ordering::Release);
    }

    /// Retire a bucket array (or any epoch-protected allocation): stamped
    /// with the pre-bump global epoch, freed once every record is pinned at
    /// a later epoch or quiescent.
    ///
    /// # Safety
    /// - `ptr` must be unreachable for any operator that pins after the call
    ///   (the caller swapped it out of the shared location first).
    /// - `dealloc` must be the correct routine for `ptr`; retired once.
    pub unsafe fn retire_array_with(&self, ptr: *mut u8, dealloc: unsafe fn(*mut u8)) {
        unsafe { self.limbo.retire(ptr, dealloc) };
        self.collect_arrays();
    }

    /// Free limbo arrays whose epoch every record has moved past.
    pub fn collect_arrays(&self) {
        let min_pinned = self.min_pinned_epoch();
        self.limbo.collect(min_pinned);
    }

    fn min_pinned_epoch(&self) -> u64 {
        let mut min = QUIESCENT;
        let mut record = self.records.load(Ordering::Acquire);
        while !record.is_null() {
            let r = unsafe { &*record };
            let pinned = r.epoch.load(Ordering::SeqCst);
            min = min.min(pinned);
            record = r.next.load(Ordering::Acquire);
        }
        min
    }
}

// Records and retired cells hold raw pointers but are only handed across
// threads under the protocols above.
unsafe impl Send for ReclaimDomain {}
unsafe impl Sync for ReclaimDomain {}
unsafe impl Send for ReclaimRecord {}
unsafe impl Sync for ReclaimRecord {}

/// Deallocate a `Box`-allocated `T`.
///
/// # Safety
/// `ptr` must come from `Box::into_raw::<T>` and must not be used afterward.
pub unsafe fn dealloc_boxed<T>(ptr: *mut u8) {
    unsafe { drop(Box::from_raw(ptr.cast::<T>())) };
}
