use std::fmt;

use log::warn;

use crate::heap::Heap;
use crate::pagemap::PageInfo;
use crate::read::{Addr, MemoryReader};
use crate::resolve::{self, SmallSlot};
use crate::{PAGE_SIZE, chunks, huge};

/// Why an address got no allocation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedReason {
    /// Outside every chunk and every huge block.
    NotInAnyChunk,
    /// Inside a chunk, but its page backs no allocation.
    FreePage,
    /// A structure needed for the verdict could not be read at `addr`.
    Unreadable(Addr),
}

impl fmt::Display for UnmappedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmappedReason::NotInAnyChunk => write!(f, "not in any chunk"),
            UnmappedReason::FreePage => write!(f, "points to free memory"),
            UnmappedReason::Unreadable(addr) => write!(f, "unreadable metadata at {addr:#x}"),
        }
    }
}

/// The allocation (or lack of one) behind an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Inside a huge block, tracked out of band and spanning whole chunks.
    Huge { start: Addr, size: u64 },
    /// Inside a large run of contiguous pages within one chunk.
    Large {
        chunk: Addr,
        start: Addr,
        size: u64,
        pages: u32,
    },
    /// Inside one element of a small run.
    Small {
        chunk: Addr,
        /// First page of the run, not necessarily the page holding the
        /// address.
        run_start: Addr,
        element_start: Addr,
        element_size: u32,
        bin: u32,
        elements: u32,
    },
    /// No allocation; the reason says how sure we are.
    Unmapped { reason: UnmappedReason },
}

/// Decide what allocation `addr` points into.
///
/// Precedence is fixed: the huge list is consulted first, because huge
/// mappings never appear in the chunk ring; then the ring narrows the
/// address to a chunk; then that chunk's page map gives the verdict.
///
/// Total by construction. Bad metadata ends up in
/// `Unmapped { reason: Unreadable(..) }` rather than an error, so one
/// garbage pointer in a batch never takes down the rest.
pub fn classify(r: &mut impl MemoryReader, heap: &Heap, addr: Addr) -> Classification {
    if let Some(block) = huge::find(r, heap, addr) {
        return Classification::Huge {
            start: block.start,
            size: block.size,
        };
    }
    let chunk = match chunks::locate(r, heap, addr) {
        Ok(Some(chunk)) => chunk,
        Ok(None) => {
            return Classification::Unmapped {
                reason: UnmappedReason::NotInAnyChunk,
            };
        }
        Err(err) => {
            return Classification::Unmapped {
                reason: UnmappedReason::Unreadable(err.addr),
            };
        }
    };
    let page = chunks::page_of(chunk, addr);
    let info = match chunks::page_info(r, &heap.layout, chunk, page) {
        Ok(info) => info,
        Err(err) => {
            return Classification::Unmapped {
                reason: UnmappedReason::Unreadable(err.addr),
            };
        }
    };
    match info {
        PageInfo::Free => free_page(r, heap, chunk, page),
        PageInfo::SmallRun { bin } => small(chunk, page, bin, addr),
        PageInfo::SmallRunTail { bin, offset } => match page.checked_sub(offset) {
            Some(head) => small(chunk, head, bin, addr),
            None => {
                // Continuation offset points before the chunk. Trust the
                // bin, not the offset.
                warn!(
                    "page {page} of chunk {chunk:#x} claims a run head {offset} pages back"
                );
                small(chunk, page, bin, addr)
            }
        },
        PageInfo::LargeRun { pages } => large(chunk, page, pages),
    }
}

fn large(chunk: Addr, head: u32, pages: u32) -> Classification {
    Classification::Large {
        chunk,
        start: chunk + u64::from(head) * PAGE_SIZE,
        size: u64::from(pages) * PAGE_SIZE,
        pages,
    }
}

fn small(chunk: Addr, head: u32, bin: u32, addr: Addr) -> Classification {
    let run_start = chunk + u64::from(head) * PAGE_SIZE;
    let SmallSlot {
        element_start,
        element_size,
        elements,
    } = resolve::resolve_element(run_start, bin, addr);
    Classification::Small {
        chunk,
        run_start,
        element_start,
        element_size,
        bin,
        elements,
    }
}

/// A zero map entry usually means a free page, but the interior pages of a
/// large run also read as zero. The free_map bitset breaks the tie: if the
/// page is marked allocated, scan backwards for the LRUN head covering it.
fn free_page(r: &mut impl MemoryReader, heap: &Heap, chunk: Addr, page: u32) -> Classification {
    match chunks::page_allocated(r, &heap.layout, chunk, page) {
        Ok(false) => Classification::Unmapped {
            reason: UnmappedReason::FreePage,
        },
        Ok(true) => match covering_large_run(r, heap, chunk, page) {
            Some((head, pages)) => large(chunk, head, pages),
            None => {
                warn!(
                    "page {page} of chunk {chunk:#x} marked allocated but no run covers it"
                );
                Classification::Unmapped {
                    reason: UnmappedReason::FreePage,
                }
            }
        },
        Err(err) => {
            // Without the bitset, fall back on the map alone.
            warn!("free_map of chunk {chunk:#x} unreadable ({err})");
            Classification::Unmapped {
                reason: UnmappedReason::FreePage,
            }
        }
    }
}

fn covering_large_run(
    r: &mut impl MemoryReader,
    heap: &Heap,
    chunk: Addr,
    page: u32,
) -> Option<(u32, u32)> {
    for candidate in (0..page).rev() {
        match chunks::page_info(r, &heap.layout, chunk, candidate) {
            // Keep scanning: interior pages of the run we are looking for.
            Ok(PageInfo::Free) => continue,
            Ok(PageInfo::LargeRun { pages }) if page - candidate < pages => {
                return Some((candidate, pages));
            }
            // The nearest mapped page does not reach us; give up.
            Ok(_) | Err(_) => return None,
        }
    }
    None
}
