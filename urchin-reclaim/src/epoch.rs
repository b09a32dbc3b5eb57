//! Epoch-based limbo for retired bucket arrays.
//!
//! Bucket arrays are replaced only by a resize and are referenced for the
//! whole duration of an operation, so they are reclaimed by pinned epochs
//! rather than hazard slots. The protocol:
//!
//! 1. An operator stores the global epoch into its record (`pin`) before
//!    reading the directory's array pointer, and stores the quiescent
//!    sentinel when the operation completes (`unpin`).
//! 2. The resizer swaps the directory pointer, then retires the old array:
//!    the array is stamped with the global epoch and the epoch is bumped.
//! 3. An array stamped with epoch `e` is freed once every record is pinned
//!    at an epoch greater than `e` or is quiescent. A record pinned after
//!    the bump observed an epoch past `e`, and its directory read — which
//!    follows the pin in the sequentially consistent order — can only see
//!    the new array.
//!
//! Freeing an old array also frees its still-linked nodes, so the epoch pin
//! transitively covers node hazards published while traversing it.

use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

/// Epoch value of a record that holds no epoch-protected pointers.
pub(crate) const QUIESCENT: u64 = u64::MAX;

struct LimboEntry {
    ptr: *mut u8,
    dealloc: unsafe fn(*mut u8),
    epoch: u64,
    next: *mut LimboEntry,
}

pub(crate) struct ArrayLimbo {
    global_epoch: AtomicU64,
    head: AtomicPtr<LimboEntry>,
}

impl ArrayLimbo {
    pub(crate) const fn new() -> Self {
        ArrayLimbo {
            // Starts above zero so a stamped epoch is always nonzero.
            global_epoch: AtomicU64::new(1),
            head: AtomicPtr::new(null_mut()),
        }
    }

    #[inline]
    pub(crate) fn global_epoch(&self) -> u64 {
        self.global_epoch.load(Ordering::SeqCst)
    }

    // Stamp with the pre-bump epoch, then bump. The caller has already made
    // `ptr` unreachable from the shared location.
    pub(crate) unsafe fn retire(&self, ptr: *mut u8, dealloc: unsafe fn(*mut u8)) {
        let epoch = self.global_epoch.fetch_add(1, Ordering::SeqCst);
        let entry = Box::into_raw(Box::new(LimboEntry {
            ptr,
            dealloc,
            epoch,
            next: null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*entry).next = head };
            match self
                .head
                .compare_exchange_weak(head, entry, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => head = actual,
            }
        }
    }

    // Detach the limbo and free every entry stamped strictly below the
    // minimum pinned epoch; later-stamped entries are re-pushed.
    pub(crate) fn collect(&self, min_pinned: u64) {
        let mut entry = self.head.swap(null_mut(), Ordering::Acquire);
        let mut freed = 0usize;

        while !entry.is_null() {
            let cell = unsafe { Box::from_raw(entry) };
            entry = cell.next;

            if cell.epoch < min_pinned {
                freed += 1;
                unsafe { (cell.dealloc)(cell.ptr) };
            } else {
                let cell = Box::into_raw(cell);
                let mut head = self.head.load(Ordering::Relaxed);
                loop {
                    unsafe { (*cell).next = head };
                    match self.head.compare_exchange_weak(
                        head,
                        cell,
                        Ordering::Release,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(actual) => head = actual,
                    }
                }
            }
        }

        if freed != 0 {
            tracing::debug!(freed, "collected retired bucket arrays");
        }
    }
}

unsafe impl Send for ArrayLimbo {}
unsafe impl Sync for ArrayLimbo {}
