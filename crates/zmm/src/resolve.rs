use log::{debug, warn};

use crate::PAGE_SIZE;
use crate::bins;
use crate::read::Addr;

/// Exact boundaries of the slot an address falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmallSlot {
    pub element_start: Addr,
    pub element_size: u32,
    /// How many elements the run is carved into.
    pub elements: u32,
}

/// Place `addr` in its element within the small run starting at `run_start`.
///
/// Element boundaries come straight from the bin's size table. Runs are not
/// page-granular: bin 16 lays 320-byte elements across 5 pages, so an
/// element can straddle a page boundary and the division must be relative
/// to the run head, never the page holding `addr`.
///
/// A bin number with no table entry (possible, the map field is wider than
/// the table) degrades to one element spanning the page around `addr`
/// rather than failing the whole classification.
pub fn resolve_element(run_start: Addr, bin: u32, addr: Addr) -> SmallSlot {
    debug_assert!(addr >= run_start);
    match bins::info(bin) {
        Some(info) => {
            let size = u64::from(info.size);
            let index = (addr - run_start) / size;
            if index >= u64::from(info.elements) {
                // Stale map entry or short final page. Still report the
                // arithmetic slot; the caller sees where it would land.
                debug!(
                    "element {index} of {addr:#x} past the {} elements of bin {bin}",
                    info.elements
                );
            }
            SmallSlot {
                element_start: run_start + index * size,
                element_size: info.size,
                elements: info.elements,
            }
        }
        None => {
            warn!("no size table entry for bin {bin}, treating its page as one element");
            SmallSlot {
                element_start: addr & !(PAGE_SIZE - 1),
                element_size: PAGE_SIZE as u32,
                elements: 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const RUN: Addr = 0x7f00_0000_3000;

    #[rstest]
    // First element, first byte.
    #[case(7, RUN, RUN, 64)]
    // Last byte of element 0.
    #[case(7, RUN + 63, RUN, 64)]
    // First byte of element 1.
    #[case(7, RUN + 64, RUN + 64, 64)]
    // Interior pointer lands in its element.
    #[case(7, RUN + 1000, RUN + 960, 64)]
    fn test_element_boundaries(
        #[case] bin: u32,
        #[case] addr: Addr,
        #[case] start: Addr,
        #[case] size: u32,
    ) {
        let slot = resolve_element(RUN, bin, addr);
        assert_eq!(slot.element_start, start);
        assert_eq!(slot.element_size, size);
    }

    // Bin 16: 320-byte elements over a 5-page run. Element 12 spans
    // 3840..4160, straddling the first page boundary.
    #[test]
    fn test_element_straddles_page_boundary() {
        let addr = RUN + 4100;
        let slot = resolve_element(RUN, 16, addr);
        assert_eq!(slot.element_start, RUN + 3840);
        assert_eq!(slot.element_size, 320);
        assert_eq!(slot.elements, 64);
    }

    // Same byte offset, different run head page, different element.
    #[test]
    fn test_division_is_relative_to_run_head() {
        let addr = RUN + PAGE_SIZE + 100;
        let from_head = resolve_element(RUN, 16, addr);
        let from_tail_page = resolve_element(RUN + PAGE_SIZE, 16, addr);
        assert_eq!(from_head.element_start, RUN + 4160);
        assert_eq!(from_tail_page.element_start, RUN + PAGE_SIZE);
        assert_ne!(from_head.element_start, from_tail_page.element_start);
    }

    #[test]
    fn test_unknown_bin_degrades_to_whole_page() {
        let addr = RUN + PAGE_SIZE + 0x123;
        let slot = resolve_element(RUN, 31, addr);
        assert_eq!(slot.element_start, RUN + PAGE_SIZE);
        assert_eq!(slot.element_size, PAGE_SIZE as u32);
        assert_eq!(slot.elements, 1);
    }

    #[test]
    fn test_out_of_range_index_still_reports_slot() {
        // Bin 27 holds 2 elements of 2048. A stale map entry can hand the
        // resolver an address past the run; the arithmetic slot comes back
        // anyway instead of an error.
        let slot = resolve_element(RUN, 27, RUN + 5000);
        assert_eq!(slot.element_start, RUN + 4096);
        assert_eq!(slot.elements, 2);
    }
}
