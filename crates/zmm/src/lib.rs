//! Read-only decoding of the Zend Memory Manager (PHP's allocator) from
//! outside the process.
//!
//! Everything here works through [`MemoryReader`], a fallible byte source:
//! a live process behind a debugger, a core file, or captured segments in
//! tests. The target is assumed hostile. Any pointer may be garbage, any
//! list may loop, and every walk is bounded, so bad metadata degrades into
//! partial results instead of hangs or errors.

pub mod bins;
pub mod chunks;
pub mod classify;
pub mod freelist;
pub mod heap;
pub mod huge;
pub mod layout;
pub mod pagemap;
pub mod read;
pub mod resolve;

pub use classify::{Classification, UnmappedReason, classify};
pub use freelist::{FreeListWalk, WALK_CAP, WalkEnd, walk};
pub use heap::Heap;
pub use layout::HeapLayout;
pub use read::{Addr, MemoryReader, ReadError, SnapshotMemory};

/// Chunks are `ZEND_MM_CHUNK_SIZE` (2 MiB) and aligned to their size.
pub const CHUNK_SIZE: u64 = 2 * 1024 * 1024;
/// Pages are `ZEND_MM_PAGE_SIZE` (4 KiB).
pub const PAGE_SIZE: u64 = 4096;
/// 512 pages per chunk; page 0 always holds the chunk header.
pub const PAGES_PER_CHUNK: u32 = (CHUNK_SIZE / PAGE_SIZE) as u32;
