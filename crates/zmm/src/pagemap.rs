//! Decoding of `zend_mm_chunk.map` entries, one `u32` per page.

/// `ZEND_MM_IS_SRUN`: page starts (or continues) a small run.
pub const SRUN: u32 = 0x8000_0000;
/// `ZEND_MM_IS_LRUN`: page starts a large run.
pub const LRUN: u32 = 0x4000_0000;
/// Bin number of a small run, low 5 bits.
pub const SRUN_BIN_MASK: u32 = 0x0000_001f;
/// Page count of a large run, low 10 bits.
pub const LRUN_PAGES_MASK: u32 = 0x0000_03ff;
/// Pages back to the head of a multi-page small run, bits 16-24.
pub const SRUN_OFFSET_MASK: u32 = 0x01ff_0000;
pub const SRUN_OFFSET_SHIFT: u32 = 16;

/// What one page of a chunk is being used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageInfo {
    /// No allocation starts here. Interior pages of a large run also read
    /// as zero; only the chunk's free_map can tell the two apart.
    Free,
    /// First page of a small run carved into `bin`-sized elements.
    SmallRun { bin: u32 },
    /// Later page of a multi-page small run, `offset` pages after its head.
    SmallRunTail { bin: u32, offset: u32 },
    /// First page of a large run spanning `pages` pages.
    LargeRun { pages: u32 },
}

/// Decode one map entry. Total: every 32-bit pattern lands in exactly one
/// of the four states, keyed off the two flag bits alone.
pub fn decode(entry: u32) -> PageInfo {
    match (entry & SRUN != 0, entry & LRUN != 0) {
        (false, false) => PageInfo::Free,
        (true, false) => PageInfo::SmallRun {
            bin: entry & SRUN_BIN_MASK,
        },
        (false, true) => PageInfo::LargeRun {
            pages: entry & LRUN_PAGES_MASK,
        },
        (true, true) => PageInfo::SmallRunTail {
            bin: entry & SRUN_BIN_MASK,
            offset: (entry & SRUN_OFFSET_MASK) >> SRUN_OFFSET_SHIFT,
        },
    }
}

/// `ZEND_MM_SRUN(bin)`.
pub const fn srun(bin: u32) -> u32 {
    SRUN | (bin & SRUN_BIN_MASK)
}

/// `ZEND_MM_NRUN(bin, offset)`, the continuation pages of a multi-page run.
pub const fn nrun(bin: u32, offset: u32) -> u32 {
    SRUN | LRUN | ((offset << SRUN_OFFSET_SHIFT) & SRUN_OFFSET_MASK) | (bin & SRUN_BIN_MASK)
}

/// `ZEND_MM_LRUN(pages)`.
pub const fn lrun(pages: u32) -> u32 {
    LRUN | (pages & LRUN_PAGES_MASK)
}
