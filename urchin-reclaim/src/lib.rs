//! Safe memory reclamation for the urchin lock-free collections.
//!
//! Two cooperating schemes live here:
//!
//! - **Hazard pointers** ([`domain`]) protect individual list nodes. Each
//!   operator publishes the addresses it is about to dereference in a small
//!   fixed set of slots; retired nodes are only freed once no slot holds
//!   them.
//! - **Epochs** ([`epoch`]) protect whole bucket arrays. Arrays are replaced
//!   rarely and referenced for the full duration of an operation, so a
//!   pinned-epoch scheme is a better fit than burning a hazard slot on them.
//!
//! Both schemes share one process-wide [`ReclaimDomain`] and one record per
//! operator: the record carries the hazard slots and the pinned epoch.
//!
//! ```ignore
//! let record = urchin_reclaim::local_record();
//! let domain = ReclaimDomain::global();
//!
//! domain.pin(record);
//! record.protect(0, node_addr);
//! // ... dereference, CAS ...
//! record.clear_all();
//! domain.unpin(record);
//! ```

pub mod domain;
pub mod epoch;

pub use domain::{HAZARD_SLOTS, ReclaimDomain, ReclaimRecord, dealloc_boxed, local_record};
