use std::sync::atomic::Ordering;

use urchin_reclaim::{ReclaimDomain, ReclaimRecord};

use crate::data_structures::internal::tagged_ptr::{AtomicTaggedPtr, TaggedPtr};

type NodePtr<K, V> = *mut Node<K, V>;

// Hazard slot roles during a traversal: the successor about to be stepped
// to, the current node, and the node whose `next` field is the predecessor
// slot. Advancing rotates the roles so protection is never interrupted.
const SLOT_NEXT: usize = 0;
const SLOT_CURR: usize = 1;
const SLOT_PREV: usize = 2;

/// A bucket-list node. Linked into exactly one bucket until logically
/// deleted (mark set on `next`); never unmarked, re-inserted, or repurposed
/// afterward.
pub(crate) struct Node<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) next: AtomicTaggedPtr<Node<K, V>>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(key: K, value: V) -> Self {
        Node {
            key,
            value,
            next: AtomicTaggedPtr::null(),
        }
    }
}

// Result of a locate traversal.
//
// `prev` is the slot whose address field pointed at `curr` when the
// traversal validated it: either the bucket head (kept alive by the
// caller's epoch pin on the array) or the `next` field of the node
// protected in SLOT_PREV. `prev_tagged` is the validated contents of that
// slot, the expected value for the caller's CAS.
pub(crate) struct Location<K, V> {
    pub(crate) prev: *const AtomicTaggedPtr<Node<K, V>>,
    pub(crate) prev_tagged: TaggedPtr<Node<K, V>>,
    pub(crate) curr: NodePtr<K, V>,
}

/// One bucket's ordered singly-linked list, sorted strictly ascending by
/// key. The list owns no storage of its own; it operates on the head slot
/// borrowed from the bucket array.
pub(crate) struct BucketList<'a, K, V> {
    head: &'a AtomicTaggedPtr<Node<K, V>>,
}

impl<'a, K, V> BucketList<'a, K, V>
where
    K: Ord,
{
    pub(crate) fn new(head: &'a AtomicTaggedPtr<Node<K, V>>) -> Self {
        BucketList { head }
    }

    // Find-with-cleanup: returns the slot preceding the first node with
    // key >= `key` and that node (null if the list ends first). At the
    // moment the returned slot was validated it pointed at `curr`, and
    // `curr` was unmarked (marks are never cleared, so an unmarked read of
    // `curr.next` covers the earlier validation instant too).
    //
    // Marked nodes encountered on the way are unlinked and retired; a lost
    // unlink CAS restarts from the head, since the predecessor itself may
    // have left the list.
    fn locate(
        &self,
        key: &K,
        record: &ReclaimRecord,
        domain: &ReclaimDomain,
    ) -> Location<K, V> {
        'retry: loop {
            let mut prev: *const AtomicTaggedPtr<Node<K, V>> = self.head;
            let mut prev_tagged = unsafe { (*prev).load(Ordering::SeqCst) };

            loop {
                let curr = prev_tagged.ptr();
                if curr.is_null() {
                    return Location {
                        prev,
                        prev_tagged,
                        curr,
                    };
                }

                // Publish curr, then confirm prev still leads to it. A
                // mismatch means curr may already be unlinked and the
                // publication came too late to protect it.
                record.protect(SLOT_CURR, curr as usize);
                if unsafe { (*prev).load(Ordering::SeqCst) } != prev_tagged {
                    continue 'retry;
                }

                let curr_next = unsafe { (*curr).next.load(Ordering::SeqCst) };
                record.protect(SLOT_NEXT, curr_next.ptr() as usize);
                if unsafe { (*curr).next.load(Ordering::SeqCst) } != curr_next {
                    continue 'retry;
                }

                if curr_next.is_marked() {
                    // curr is logically deleted: unlink it before moving on.
                    let desired = TaggedPtr::new(
                        curr_next.ptr(),
                        false,
                        prev_tagged.tag().wrapping_add(1),
                    );
                    match unsafe {
                        (*prev).compare_exchange(
                            prev_tagged,
                            desired,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                    } {
                        Ok(_) => {
                            unsafe { domain.retire(curr) };
                            prev_tagged = desired;
                        }
                        Err(_) => continue 'retry,
                    }
                } else {
                    if unsafe { &(*curr).key } >= key {
                        return Location {
                            prev,
                            prev_tagged,
                            curr,
                        };
                    }

                    // Advance. The node now holding the prev slot moves to
                    // SLOT_PREV before SLOT_CURR is overwritten at the top
                    // of the loop; the new curr is already in SLOT_NEXT.
                    record.protect(SLOT_PREV, curr as usize);
                    prev = unsafe { &(*curr).next };
                    prev_tagged = curr_next;
                }
            }
        }
    }

    /// Link a caller-allocated node at its sorted position. Returns false
    /// (without consuming the node) if a live entry with the same key
    /// exists.
    pub(crate) fn insert_node(
        &self,
        node: NodePtr<K, V>,
        record: &ReclaimRecord,
        domain: &ReclaimDomain,
    ) -> bool {
        loop {
            let location = self.locate(unsafe { &(*node).key }, record, domain);

            if !location.curr.is_null() && unsafe { (*location.curr).key == (*node).key } {
                return false;
            }

            // The new node is unpublished until the CAS below succeeds.
            unsafe {
                (*node)
                    .next
                    .store(TaggedPtr::new(location.curr, false, 0), Ordering::Relaxed);
            }

            let desired = TaggedPtr::new(node, false, location.prev_tagged.tag().wrapping_add(1));
            let linked = unsafe {
                (*location.prev).compare_exchange(
                    location.prev_tagged,
                    desired,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
            };

            if linked.is_ok() {
                return true;
            }
        }
    }

    /// Logically delete the live entry with `key`, then attempt the
    /// physical unlink. Returns true iff this operator's mark CAS
    /// succeeded; a lost unlink is completed by a later traversal.
    pub(crate) fn remove(
        &self,
        key: &K,
        record: &ReclaimRecord,
        domain: &ReclaimDomain,
    ) -> bool {
        loop {
            let location = self.locate(key, record, domain);
            let curr = location.curr;

            if curr.is_null() || unsafe { &(*curr).key } != key {
                return false;
            }

            let curr_next = unsafe { (*curr).next.load(Ordering::SeqCst) };
            if curr_next.is_marked() {
                // Another operator got the logical delete; re-locate to
                // help unlink and re-check membership.
                continue;
            }

            let marked = TaggedPtr::new(curr_next.ptr(), true, curr_next.tag().wrapping_add(1));
            let logically_deleted = unsafe {
                (*curr).next.compare_exchange(
                    curr_next,
                    marked,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
            };
            if logically_deleted.is_err() {
                continue;
            }

            // The mark is the linearization point; the unlink is cleanup.
            let desired =
                TaggedPtr::new(curr_next.ptr(), false, location.prev_tagged.tag().wrapping_add(1));
            let unlinked = unsafe {
                (*location.prev).compare_exchange(
                    location.prev_tagged,
                    desired,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
            };
            if unlinked.is_ok() {
                unsafe { domain.retire(curr) };
            }

            return true;
        }
    }

    /// Membership query. Shares the locate traversal, so it participates in
    /// unlinking logically deleted nodes it encounters, but never allocates
    /// and never inserts or logically deletes.
    pub(crate) fn find(&self, key: &K, record: &ReclaimRecord, domain: &ReclaimDomain) -> bool {
        let location = self.locate(key, record, domain);
        !location.curr.is_null() && unsafe { &(*location.curr).key } == key
    }
}

impl<K, V> BucketList<'_, K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    /// Clone out every live entry, in key order. Used by the resize rebuild
    /// while mutators are drained; concurrent readers may still unlink
    /// marked nodes, so the walk keeps full hazard protection.
    pub(crate) fn collect_live(
        &self,
        record: &ReclaimRecord,
        domain: &ReclaimDomain,
    ) -> Vec<(K, V)> {
        'retry: loop {
            let mut entries = Vec::new();
            let mut prev: *const AtomicTaggedPtr<Node<K, V>> = self.head;
            let mut prev_tagged = unsafe { (*prev).load(Ordering::SeqCst) };

            loop {
                let curr = prev_tagged.ptr();
                if curr.is_null() {
                    return entries;
                }

                record.protect(SLOT_CURR, curr as usize);
                if unsafe { (*prev).load(Ordering::SeqCst) } != prev_tagged {
                    continue 'retry;
                }

                let curr_next = unsafe { (*curr).next.load(Ordering::SeqCst) };
                record.protect(SLOT_NEXT, curr_next.ptr() as usize);
                if unsafe { (*curr).next.load(Ordering::SeqCst) } != curr_next {
                    continue 'retry;
                }

                if curr_next.is_marked() {
                    let desired = TaggedPtr::new(
                        curr_next.ptr(),
                        false,
                        prev_tagged.tag().wrapping_add(1),
                    );
                    match unsafe {
                        (*prev).compare_exchange(
                            prev_tagged,
                            desired,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                    } {
                        Ok(_) => {
                            unsafe { domain.retire(curr) };
                            prev_tagged = desired;
                        }
                        Err(_) => continue 'retry,
                    }
                } else {
                    entries.push(unsafe { ((*curr).key.clone(), (*curr).value.clone()) });

                    record.protect(SLOT_PREV, curr as usize);
                    prev = unsafe { &(*curr).next };
                    prev_tagged = curr_next;
                }
            }
        }
    }

    /// Sorted insertion into a bucket of an array that has not been
    /// published yet. Single-writer by construction, so plain loads and
    /// stores suffice and the CAS-equivalent cannot fail.
    pub(crate) fn insert_unpublished(&self, node: NodePtr<K, V>) {
        unsafe {
            let mut prev: *const AtomicTaggedPtr<Node<K, V>> = self.head;
            let mut curr = (*prev).load(Ordering::Relaxed);

            while !curr.ptr().is_null() && (*curr.ptr()).key < (*node).key {
                prev = &(*curr.ptr()).next;
                curr = (*prev).load(Ordering::Relaxed);
            }

            (*node).next.store(curr, Ordering::Relaxed);
            (*prev).store(
                TaggedPtr::new(node, false, curr.tag().wrapping_add(1)),
                Ordering::Relaxed,
            );
        }
    }
}
