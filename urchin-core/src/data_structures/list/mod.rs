//! Per-bucket ordered list with marked tagged references.
//!
//! Based on Michael's "High Performance Dynamic Lock-Free Hash Tables and
//! List-Based Sets": sorted singly-linked lists, logical deletion via a
//! mark bit on the successor word, cooperative physical unlinking, and
//! per-word version tags against ABA.

pub(crate) mod bucket_list;
