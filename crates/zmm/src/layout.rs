/// Byte offsets of every `zend_mm_*` field the engine reads.
///
/// The offsets depend on how the target PHP was built (ZTS, debug asserts,
/// ZEND_MM_STAT/ZEND_MM_LIMIT, word size), so they are data rather than
/// constants. Hosts with debug symbols can probe the real values out of the
/// target and override the defaults field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapLayout {
    /// `zend_mm_heap.free_slot`, array of 30 list heads.
    pub heap_free_slot: u64,
    /// `zend_mm_heap.huge_list`.
    pub heap_huge_list: u64,
    /// `zend_mm_heap.main_chunk`.
    pub heap_main_chunk: u64,
    /// `zend_mm_chunk.next` (the ring is circular and doubly linked).
    pub chunk_next: u64,
    /// `zend_mm_chunk.free_pages`.
    pub chunk_free_pages: u64,
    /// `zend_mm_chunk.free_tail`.
    pub chunk_free_tail: u64,
    /// `zend_mm_chunk.num`.
    pub chunk_num: u64,
    /// `zend_mm_chunk.free_map`, one bit per page, LSB first in each word.
    pub chunk_free_map: u64,
    /// `zend_mm_chunk.map`, one `u32` per page.
    pub chunk_map: u64,
    /// `zend_mm_huge_list.ptr`.
    pub huge_ptr: u64,
    /// `zend_mm_huge_list.size`.
    pub huge_size: u64,
    /// `zend_mm_huge_list.next`.
    pub huge_next: u64,
    /// `zend_mm_free_slot.next_free_slot`, first field of every free element.
    pub slot_next: u64,
}

impl HeapLayout {
    /// Offsets for a stock PHP 8.0-8.2 NTS build on x86_64.
    ///
    /// Matches zend_alloc.c with ZEND_MM_STAT and ZEND_MM_LIMIT on (the
    /// release default) and ZEND_MM_CUSTOM on, which is how distro packages
    /// ship.
    pub fn php8_x86_64() -> Self {
        Self {
            heap_free_slot: 32,
            heap_huge_list: 304,
            heap_main_chunk: 312,
            chunk_next: 8,
            chunk_free_pages: 24,
            chunk_free_tail: 28,
            chunk_num: 32,
            chunk_free_map: 456,
            chunk_map: 520,
            huge_ptr: 0,
            huge_size: 8,
            huge_next: 16,
            slot_next: 0,
        }
    }
}

impl Default for HeapLayout {
    fn default() -> Self {
        Self::php8_x86_64()
    }
}
