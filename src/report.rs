//! Text rendering for survey output, one line per fact.
//!
//! Lines are built here rather than printed so the exact strings stay
//! testable; main only decides which lines to emit.

use zmm::Classification;
use zmm::bins;
use zmm::chunks::{ChunkHeader, MapSummary, RingEnd};
use zmm::freelist::{FreeListWalk, WalkEnd};
use zmm::huge::{HugeBlock, HugeListEnd};
use zmm::read::Addr;

/// Free list nodes shown before the middle of a long list is elided.
const LIST_PREVIEW: usize = 7;

/// One free list, rendered like the chain it is.
///
/// `  0x40 [  3]: 0x7ffff5e01010 -> 0x7ffff5e01050 -> 0x0`
pub fn free_list_line(bin: u32, walk: &FreeListWalk) -> String {
    let label = match bins::info(bin) {
        Some(info) => format!("{:#x}", info.size),
        None => format!("bin {bin}"),
    };
    let mut line = format!("{label:>6} [{:3}]: ", walk.len());
    if walk.is_empty() {
        line.push_str("0x0");
        return line;
    }
    let shown: Vec<String> =
        walk.visited.iter().take(LIST_PREVIEW).map(|addr| format!("{addr:#x}")).collect();
    line.push_str(&shown.join(" -> "));
    if walk.len() > LIST_PREVIEW {
        line.push_str(" -> ...");
    }
    match walk.end {
        WalkEnd::Null => line.push_str(" -> 0x0"),
        WalkEnd::Cycle { rank, addr } => {
            line.push_str(&format!(" -> {addr:#x} (cycle back to entry #{rank})"));
        }
        WalkEnd::Unreadable { .. } => line.push_str(" -> [unreadable]"),
        WalkEnd::Capped => line.push_str(&format!(" (capped at {} nodes)", walk.len())),
    }
    line
}

/// One classified address.
pub fn classification_line(addr: Addr, what: &Classification) -> String {
    match what {
        Classification::Huge { start, size } => {
            format!("{addr:#x}: huge {size} bytes at {start:#x}..{:#x}", start.wrapping_add(*size))
        }
        Classification::Large { chunk, start, size, pages } => format!(
            "{addr:#x}: large {size} bytes ({pages} pages) at {start:#x}..{:#x} in chunk {chunk:#x}",
            start.wrapping_add(*size)
        ),
        Classification::Small { chunk, run_start, element_start, element_size, bin, elements } => {
            format!(
                "{addr:#x}: small bin {bin} ({element_size} bytes x {elements}) element \
                 {element_start:#x}..{:#x}, run {run_start:#x} in chunk {chunk:#x}",
                element_start.wrapping_add(u64::from(*element_size))
            )
        }
        Classification::Unmapped { reason } => format!("{addr:#x}: {reason}"),
    }
}

/// One chunk of the ring: its self-reported counters next to a census of
/// its page map, so disagreement between the two is visible at a glance.
pub fn chunk_line(index: usize, addr: Addr, header: &ChunkHeader, summary: &MapSummary) -> String {
    format!(
        "chunk {index} at {addr:#x} (num {}): {} small runs on {} pages, \
         {} large runs on {} pages, {} pages free (header says {}, tail {})",
        header.num,
        summary.small_runs,
        summary.small_pages,
        summary.large_runs,
        summary.large_pages,
        summary.free_pages,
        header.free_pages,
        header.free_tail
    )
}

/// Stand-in when a chunk's own header cannot be read.
pub fn chunk_line_unreadable(index: usize, addr: Addr) -> String {
    format!("chunk {index} at {addr:#x}: metadata unreadable")
}

/// Trailing note when the ring ended early; `None` for a healthy ring.
pub fn ring_end_note(end: RingEnd, count: usize) -> Option<String> {
    match end {
        RingEnd::Closed => None,
        RingEnd::Unreadable { addr } => {
            Some(format!("ring broken: next pointer unreadable at {addr:#x}"))
        }
        RingEnd::Capped => Some(format!("ring did not close within {count} chunks")),
    }
}

/// One huge allocation.
pub fn huge_line(index: usize, block: &HugeBlock) -> String {
    format!(
        "huge {index}: {} bytes at {:#x}..{:#x} (record {:#x})",
        block.size,
        block.start,
        block.start.wrapping_add(block.size),
        block.record
    )
}

/// Trailing note when the huge list ended early; `None` when it ran out
/// normally.
pub fn huge_end_note(end: HugeListEnd, count: usize) -> Option<String> {
    match end {
        HugeListEnd::Done => None,
        HugeListEnd::Unreadable { addr } => {
            Some(format!("huge list broken: record unreadable at {addr:#x}"))
        }
        HugeListEnd::Capped => Some(format!("huge list did not end within {count} records")),
    }
}
