use log::warn;

use crate::heap::Heap;
use crate::read::{Addr, MemoryReader};

/// Ceiling on huge-list traversal, same reasoning as the chunk ring.
pub const HUGE_CAP: usize = 4096;

/// One record of `zend_mm_heap.huge_list`. Huge allocations bypass the
/// chunk machinery entirely; this list is the only trace they leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HugeBlock {
    /// Address of the list record itself (a normal small allocation).
    pub record: Addr,
    /// Start of the huge mapping.
    pub start: Addr,
    /// Its size in bytes, as requested plus page rounding.
    pub size: u64,
}

impl HugeBlock {
    pub fn contains(&self, addr: Addr) -> bool {
        addr.checked_sub(self.start).is_some_and(|off| off < self.size)
    }
}

/// How a huge-list scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HugeListEnd {
    Done,
    /// A record at `addr` could not be read.
    Unreadable { addr: Addr },
    Capped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HugeList {
    pub blocks: Vec<HugeBlock>,
    pub end: HugeListEnd,
}

fn read_block(r: &mut impl MemoryReader, heap: &Heap, record: Addr) -> Option<HugeBlock> {
    let layout = &heap.layout;
    let start = r.read_ptr(record.wrapping_add(layout.huge_ptr)).ok()?;
    let size = r.read_u64(record.wrapping_add(layout.huge_size)).ok()?;
    Some(HugeBlock { record, start, size })
}

/// Scan the huge list for a block containing `addr`.
///
/// First match in list order wins. Total by design: an unreadable head or
/// record logs a warning and reports no match, so classification can move
/// on to the chunk ring instead of giving up.
pub fn find(r: &mut impl MemoryReader, heap: &Heap, addr: Addr) -> Option<HugeBlock> {
    let mut record = match heap.huge_list_head(r) {
        Ok(head) => head,
        Err(err) => {
            warn!("huge list head unreadable ({err}), skipping huge scan");
            return None;
        }
    };
    for _ in 0..HUGE_CAP {
        if record == 0 {
            return None;
        }
        let Some(block) = read_block(r, heap, record) else {
            warn!("huge list record at {record:#x} unreadable, stopping scan");
            return None;
        };
        if block.contains(addr) {
            return Some(block);
        }
        match r.read_ptr(record.wrapping_add(heap.layout.huge_next)) {
            Ok(next) => record = next,
            Err(_) => {
                warn!("huge list record at {record:#x} unreadable, stopping scan");
                return None;
            }
        }
    }
    warn!("huge list did not terminate within {HUGE_CAP} records");
    None
}

/// Collect every huge block for display, in list order.
pub fn list(r: &mut impl MemoryReader, heap: &Heap) -> HugeList {
    let mut blocks = Vec::new();
    let mut record = match heap.huge_list_head(r) {
        Ok(head) => head,
        Err(err) => {
            return HugeList {
                blocks,
                end: HugeListEnd::Unreadable { addr: err.addr },
            };
        }
    };
    for _ in 0..HUGE_CAP {
        if record == 0 {
            return HugeList {
                blocks,
                end: HugeListEnd::Done,
            };
        }
        let Some(block) = read_block(r, heap, record) else {
            return HugeList {
                blocks,
                end: HugeListEnd::Unreadable { addr: record },
            };
        };
        blocks.push(block);
        match r.read_ptr(record.wrapping_add(heap.layout.huge_next)) {
            Ok(next) => record = next,
            Err(err) => {
                return HugeList {
                    blocks,
                    end: HugeListEnd::Unreadable { addr: err.addr },
                };
            }
        }
    }
    HugeList {
        blocks,
        end: HugeListEnd::Capped,
    }
}
