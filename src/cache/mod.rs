//! Disk-cache access for auxiliary resources such as source icons.
//!
//! [`DiskCache`] stores responses in one directory at a time. Several request
//! families share it, each with its own directory, so every read goes through
//! a [`CacheArbiter`] that only reassigns the directory once the previous
//! family's requests have drained.

pub mod arbiter;
pub mod disk;

pub use arbiter::{CacheArbiter, CachedResponse, PendingResponse, ResponseHandle};
pub use disk::{CacheError, CacheReply, DiskCache};
