use deku::ctx::Endian;
use log::warn;

use crate::heap::Heap;
use crate::layout::HeapLayout;
use crate::pagemap::{self, PageInfo};
use crate::read::{Addr, MemoryReader, ReadError};
use crate::{CHUNK_SIZE, PAGE_SIZE, PAGES_PER_CHUNK};

/// Ceiling on ring traversal. The ring is circular, so a healthy walk
/// always closes by revisiting main_chunk; a corrupted next pointer could
/// instead wander forever through readable garbage.
pub const RING_CAP: usize = 4096;

/// Counters from a chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub free_pages: u32,
    /// Pages at and past this index are free through the end of the chunk.
    pub free_tail: u32,
    pub num: u32,
}

/// How a full ring traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingEnd {
    /// Came back around to main_chunk.
    Closed,
    /// A chunk's next pointer could not be read.
    Unreadable { addr: Addr },
    /// The ceiling tripped before the ring closed.
    Capped,
}

/// Every chunk discovered by one trip around the ring, main chunk first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingWalk {
    pub chunks: Vec<Addr>,
    pub end: RingEnd,
}

/// Find the chunk whose 2 MiB span contains `addr`.
///
/// Walks the ring from main_chunk until the ring closes. `Ok(None)` means
/// the address is in no chunk; a next pointer that cannot be read is an
/// error, not a verdict.
pub fn locate(r: &mut impl MemoryReader, heap: &Heap, addr: Addr) -> Result<Option<Addr>, ReadError> {
    let main = heap.main_chunk(r)?;
    let mut current = main;
    for _ in 0..RING_CAP {
        if addr.checked_sub(current).is_some_and(|off| off < CHUNK_SIZE) {
            return Ok(Some(current));
        }
        let next = r.read_ptr(current.wrapping_add(heap.layout.chunk_next))?;
        if next == main {
            return Ok(None);
        }
        current = next;
    }
    warn!("chunk ring from {main:#x} did not close within {RING_CAP} chunks");
    Ok(None)
}

/// Collect the whole ring for a census. Never fails; a bad link ends the
/// walk with what was found so far.
pub fn ring(r: &mut impl MemoryReader, heap: &Heap) -> Result<RingWalk, ReadError> {
    let main = heap.main_chunk(r)?;
    let mut chunks = vec![main];
    let mut current = main;
    loop {
        if chunks.len() > RING_CAP {
            warn!("chunk ring from {main:#x} did not close within {RING_CAP} chunks");
            chunks.pop();
            return Ok(RingWalk { chunks, end: RingEnd::Capped });
        }
        match r.read_ptr(current.wrapping_add(heap.layout.chunk_next)) {
            Ok(next) if next == main => return Ok(RingWalk { chunks, end: RingEnd::Closed }),
            Ok(next) => {
                chunks.push(next);
                current = next;
            }
            Err(_) => {
                return Ok(RingWalk {
                    chunks,
                    end: RingEnd::Unreadable { addr: current },
                });
            }
        }
    }
}

pub fn read_header(
    r: &mut impl MemoryReader,
    layout: &HeapLayout,
    chunk: Addr,
) -> Result<ChunkHeader, ReadError> {
    Ok(ChunkHeader {
        free_pages: r.read_u32(chunk.wrapping_add(layout.chunk_free_pages))?,
        free_tail: r.read_u32(chunk.wrapping_add(layout.chunk_free_tail))?,
        num: r.read_u32(chunk.wrapping_add(layout.chunk_num))?,
    })
}

/// Index of the page holding `addr` within `chunk`.
pub fn page_of(chunk: Addr, addr: Addr) -> u32 {
    debug_assert!(addr >= chunk && addr - chunk < CHUNK_SIZE);
    ((addr - chunk) / PAGE_SIZE) as u32
}

/// Decode the map entry for one page.
pub fn page_info(
    r: &mut impl MemoryReader,
    layout: &HeapLayout,
    chunk: Addr,
    page: u32,
) -> Result<PageInfo, ReadError> {
    debug_assert!(page < PAGES_PER_CHUNK);
    let entry = r.read_u32(chunk.wrapping_add(layout.chunk_map + u64::from(page) * 4))?;
    Ok(pagemap::decode(entry))
}

/// Read the whole 512-entry page map in one go.
pub fn read_map(
    r: &mut impl MemoryReader,
    layout: &HeapLayout,
    chunk: Addr,
) -> Result<Vec<u32>, ReadError> {
    let raw = r.read_vec(chunk.wrapping_add(layout.chunk_map), PAGES_PER_CHUNK as usize * 4)?;
    let mut entries = Vec::with_capacity(PAGES_PER_CHUNK as usize);
    for word in raw.chunks_exact(4) {
        let bytes = [word[0], word[1], word[2], word[3]];
        entries.push(match r.endian() {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        });
    }
    Ok(entries)
}

/// Whether `page` is marked allocated in the chunk's free_map bitset.
///
/// The bitset is an array of `zend_ulong`, so the word size follows the
/// target's pointer size and bits fill each word LSB first.
pub fn page_allocated(
    r: &mut impl MemoryReader,
    layout: &HeapLayout,
    chunk: Addr,
    page: u32,
) -> Result<bool, ReadError> {
    debug_assert!(page < PAGES_PER_CHUNK);
    let word_bits = r.ptr_len() as u32 * 8;
    let word_addr =
        chunk.wrapping_add(layout.chunk_free_map + u64::from(page / word_bits) * r.ptr_len() as u64);
    let word = r.read_ptr(word_addr)?;
    Ok(word & (1 << (page % word_bits)) != 0)
}

/// Page-kind tallies over one chunk's map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapSummary {
    /// Small runs starting in this chunk.
    pub small_runs: u32,
    /// Pages carrying small elements, run heads and continuations alike.
    pub small_pages: u32,
    /// Large runs starting in this chunk.
    pub large_runs: u32,
    /// Pages covered by those runs, interior pages included.
    pub large_pages: u32,
    /// Pages backing nothing at all.
    pub free_pages: u32,
}

/// Tally a page map. Interior pages of a large run decode as free, so they
/// are attributed by stretching each LRUN head over its page count.
pub fn summarize(entries: &[u32]) -> MapSummary {
    let mut summary = MapSummary::default();
    let mut covered_until = 0u32;
    for (page, &entry) in entries.iter().enumerate() {
        let page = page as u32;
        match pagemap::decode(entry) {
            PageInfo::Free => {
                if page >= covered_until {
                    summary.free_pages += 1;
                }
            }
            PageInfo::SmallRun { .. } => {
                summary.small_runs += 1;
                summary.small_pages += 1;
            }
            PageInfo::SmallRunTail { .. } => summary.small_pages += 1,
            PageInfo::LargeRun { pages } => {
                summary.large_runs += 1;
                summary.large_pages += pages;
                covered_until = page + pages;
            }
        }
    }
    summary
}
