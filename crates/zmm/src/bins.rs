/// One small-allocation size class.
///
/// Mirrors a row of the `ZEND_MM_BINS_INFO` table in zend_alloc_sizes.h.
/// A run is `pages` contiguous pages carved into `elements` slots of
/// `size` bytes each; for multi-page runs the slots straddle page
/// boundaries (bin 16 packs 320-byte slots across 5 pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinInfo {
    /// Element size in bytes.
    pub size: u32,
    /// Elements per run.
    pub elements: u32,
    /// Pages per run.
    pub pages: u32,
}

/// Number of size classes (`ZEND_MM_BINS`).
pub const COUNT: u32 = 30;

#[rustfmt::skip]
const TABLE: [BinInfo; COUNT as usize] = [
    BinInfo { size:    8, elements: 512, pages: 1 },
    BinInfo { size:   16, elements: 256, pages: 1 },
    BinInfo { size:   24, elements: 170, pages: 1 },
    BinInfo { size:   32, elements: 128, pages: 1 },
    BinInfo { size:   40, elements: 102, pages: 1 },
    BinInfo { size:   48, elements:  85, pages: 1 },
    BinInfo { size:   56, elements:  73, pages: 1 },
    BinInfo { size:   64, elements:  64, pages: 1 },
    BinInfo { size:   80, elements:  51, pages: 1 },
    BinInfo { size:   96, elements:  42, pages: 1 },
    BinInfo { size:  112, elements:  36, pages: 1 },
    BinInfo { size:  128, elements:  32, pages: 1 },
    BinInfo { size:  160, elements:  25, pages: 1 },
    BinInfo { size:  192, elements:  21, pages: 1 },
    BinInfo { size:  224, elements:  18, pages: 1 },
    BinInfo { size:  256, elements:  16, pages: 1 },
    BinInfo { size:  320, elements:  64, pages: 5 },
    BinInfo { size:  384, elements:  32, pages: 3 },
    BinInfo { size:  448, elements:   9, pages: 1 },
    BinInfo { size:  512, elements:   8, pages: 1 },
    BinInfo { size:  640, elements:  32, pages: 5 },
    BinInfo { size:  768, elements:  16, pages: 3 },
    BinInfo { size:  896, elements:   9, pages: 2 },
    BinInfo { size: 1024, elements:   4, pages: 1 },
    BinInfo { size: 1280, elements:  16, pages: 5 },
    BinInfo { size: 1536, elements:   8, pages: 3 },
    BinInfo { size: 1792, elements:  16, pages: 7 },
    BinInfo { size: 2048, elements:   2, pages: 1 },
    BinInfo { size: 2560, elements:   8, pages: 5 },
    BinInfo { size: 3072, elements:   4, pages: 3 },
];

/// Look up a size class by bin number.
///
/// The bin field of a page-map entry is 5 bits wide, so a corrupted entry
/// can carry an index (30 or 31) the table does not define; those return
/// `None` and callers degrade instead of indexing out of bounds.
pub fn info(bin: u32) -> Option<BinInfo> {
    TABLE.get(bin as usize).copied()
}

/// All size classes in bin order.
pub fn all() -> &'static [BinInfo] {
    &TABLE
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_known_bins() {
        assert_eq!(info(0), Some(BinInfo { size: 8, elements: 512, pages: 1 }));
        assert_eq!(info(7), Some(BinInfo { size: 64, elements: 64, pages: 1 }));
        assert_eq!(info(29), Some(BinInfo { size: 3072, elements: 4, pages: 3 }));
    }

    #[rstest]
    #[case(30)]
    #[case(31)]
    #[case(u32::MAX)]
    fn test_out_of_table_bins(#[case] bin: u32) {
        assert_eq!(info(bin), None);
    }

    // Each run must actually fit in the pages the table claims for it.
    #[test]
    fn test_runs_fit_their_pages() {
        for (bin, info) in all().iter().enumerate() {
            let used = u64::from(info.size) * u64::from(info.elements);
            let run = u64::from(info.pages) * 4096;
            assert!(used <= run, "bin {bin} overflows its run");
            // No row wastes a whole page at the tail.
            assert!(used > run - 4096, "bin {bin} claims too many pages");
        }
    }
}
