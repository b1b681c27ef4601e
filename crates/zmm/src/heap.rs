use crate::bins;
use crate::freelist::{self, FreeListWalk};
use crate::layout::HeapLayout;
use crate::read::{Addr, MemoryReader, ReadError};

/// Handle on one target heap: the address of its `zend_mm_heap` plus the
/// field layout of the build that produced it.
///
/// Holds no cached state. Every accessor goes back to target memory, so a
/// handle stays valid across process stops and never serves stale pointers.
#[derive(Debug, Clone, Copy)]
pub struct Heap {
    pub addr: Addr,
    pub layout: HeapLayout,
}

impl Heap {
    pub fn new(addr: Addr, layout: HeapLayout) -> Self {
        Self { addr, layout }
    }

    /// Head of the free list for `bin`, straight out of `free_slot[bin]`.
    pub fn free_slot_head(&self, r: &mut impl MemoryReader, bin: u32) -> Result<Addr, ReadError> {
        debug_assert!(bin < bins::COUNT);
        let slot = self
            .addr
            .wrapping_add(self.layout.heap_free_slot + u64::from(bin) * r.ptr_len() as u64);
        r.read_ptr(slot)
    }

    /// Head of the huge-allocation list.
    pub fn huge_list_head(&self, r: &mut impl MemoryReader) -> Result<Addr, ReadError> {
        r.read_ptr(self.addr.wrapping_add(self.layout.heap_huge_list))
    }

    /// The chunk the ring is anchored on. Never null in a live heap; the
    /// heap struct itself lives inside it.
    pub fn main_chunk(&self, r: &mut impl MemoryReader) -> Result<Addr, ReadError> {
        r.read_ptr(self.addr.wrapping_add(self.layout.heap_main_chunk))
    }

    /// Walk the free list of `bin`, visiting at most `cap` nodes.
    ///
    /// Only the initial `free_slot[bin]` read can fail; once a head is in
    /// hand the walk itself absorbs bad pointers into its outcome.
    pub fn walk_bin(
        &self,
        r: &mut impl MemoryReader,
        bin: u32,
        cap: usize,
    ) -> Result<FreeListWalk, ReadError> {
        let head = self.free_slot_head(r, bin)?;
        Ok(freelist::walk(r, self.layout.slot_next, head, cap))
    }
}
