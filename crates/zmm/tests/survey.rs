//! End-to-end pass over a synthetic heap laid out the way zend_mm_init
//! and a few allocations would leave it: one chunk, a couple of small
//! runs, a large run, one huge mapping, and threaded free lists.

use zmm::classify::{Classification, UnmappedReason};
use zmm::freelist::{WALK_CAP, WalkEnd};
use zmm::read::{MemoryReader, SnapshotMemory};
use zmm::{CHUNK_SIZE, Heap, HeapLayout, PAGE_SIZE, chunks, classify, huge, pagemap};

const CHUNK: u64 = 0x7f80_0000_0000;
// The first heap lives inside its main chunk, right after the link fields.
const HEAP: u64 = CHUNK + 64;
const HUGE_START: u64 = 0x7fa0_0000_0000;
const HUGE_SIZE: u64 = 5 * CHUNK_SIZE;

fn build_target() -> (SnapshotMemory, Heap) {
    let layout = HeapLayout::php8_x86_64();
    let mut mem = SnapshotMemory::new();
    mem.map_zeroed(CHUNK, CHUNK_SIZE as usize);

    // Singleton ring.
    mem.put_ptr(HEAP + layout.heap_main_chunk, CHUNK);
    mem.put_ptr(CHUNK + layout.chunk_next, CHUNK);
    mem.put_u32(CHUNK + layout.chunk_num, 0);
    mem.put_u32(CHUNK + layout.chunk_free_pages, 502);
    mem.put_u32(CHUNK + layout.chunk_free_tail, 10);

    let map = |page: u64| CHUNK + layout.chunk_map + page * 4;
    let mark = |mem: &mut SnapshotMemory, page: u64| {
        let addr = CHUNK + layout.chunk_free_map + page / 64 * 8;
        let mut word = [0u8; 8];
        mem.read(addr, &mut word).unwrap();
        mem.put_u64(addr, u64::from_le_bytes(word) | 1 << (page % 64));
    };

    // Page 0: the chunk header itself.
    mem.put_u32(map(0), pagemap::lrun(1));
    mark(&mut mem, 0);

    // Page 1: bin 3 run (32 bytes x 128).
    mem.put_u32(map(1), pagemap::srun(3));
    mark(&mut mem, 1);

    // Pages 2..5: bin 17 run (384 bytes x 32 across 3 pages).
    mem.put_u32(map(2), pagemap::srun(17));
    mem.put_u32(map(3), pagemap::nrun(17, 1));
    mem.put_u32(map(4), pagemap::nrun(17, 2));
    for page in 2..5 {
        mark(&mut mem, page);
    }

    // Pages 5..10: a 5-page large run. Interior pages stay zero in the
    // map and set in the bitset.
    mem.put_u32(map(5), pagemap::lrun(5));
    for page in 5..10 {
        mark(&mut mem, page);
    }

    // Free list of bin 3: elements 5 -> 9 -> 2 -> null.
    let run1 = CHUNK + PAGE_SIZE;
    mem.put_ptr(HEAP + layout.heap_free_slot + 3 * 8, run1 + 5 * 32);
    mem.put_ptr(run1 + 5 * 32, run1 + 9 * 32);
    mem.put_ptr(run1 + 9 * 32, run1 + 2 * 32);
    mem.put_ptr(run1 + 2 * 32, 0);

    // One huge allocation; its tracking record occupies element 20 of the
    // bin 3 run, like the real allocator's list nodes do.
    let record = run1 + 20 * 32;
    mem.put_ptr(HEAP + layout.heap_huge_list, record);
    mem.put_ptr(record + layout.huge_ptr, HUGE_START);
    mem.put_u64(record + layout.huge_size, HUGE_SIZE);
    mem.put_ptr(record + layout.huge_next, 0);

    (mem, Heap::new(HEAP, layout))
}

#[test]
fn test_classify_across_the_whole_heap() {
    let (mut mem, heap) = build_target();
    let run1 = CHUNK + PAGE_SIZE;

    // Small element on a run head page.
    assert_eq!(
        classify(&mut mem, &heap, run1 + 9 * 32 + 17),
        Classification::Small {
            chunk: CHUNK,
            run_start: run1,
            element_start: run1 + 9 * 32,
            element_size: 32,
            bin: 3,
            elements: 128,
        }
    );

    // Small element reached through a continuation page: byte 4500 of the
    // bin 17 run is element 11 (4224..4608), resolved relative to the run
    // head one page back.
    let run2 = CHUNK + 2 * PAGE_SIZE;
    assert_eq!(
        classify(&mut mem, &heap, run2 + 4500),
        Classification::Small {
            chunk: CHUNK,
            run_start: run2,
            element_start: run2 + 11 * 384,
            element_size: 384,
            bin: 17,
            elements: 32,
        }
    );

    // Large run, head and interior page alike.
    let large = Classification::Large {
        chunk: CHUNK,
        start: CHUNK + 5 * PAGE_SIZE,
        size: 5 * PAGE_SIZE,
        pages: 5,
    };
    assert_eq!(classify(&mut mem, &heap, CHUNK + 5 * PAGE_SIZE), large);
    assert_eq!(classify(&mut mem, &heap, CHUNK + 9 * PAGE_SIZE + 0xabc), large);

    // Huge mapping, first and last byte.
    let huge_hit = Classification::Huge {
        start: HUGE_START,
        size: HUGE_SIZE,
    };
    assert_eq!(classify(&mut mem, &heap, HUGE_START), huge_hit);
    assert_eq!(classify(&mut mem, &heap, HUGE_START + HUGE_SIZE - 1), huge_hit);

    // Free page inside the chunk, and an address in no chunk at all.
    assert_eq!(
        classify(&mut mem, &heap, CHUNK + 11 * PAGE_SIZE),
        Classification::Unmapped {
            reason: UnmappedReason::FreePage
        }
    );
    assert_eq!(
        classify(&mut mem, &heap, HUGE_START + HUGE_SIZE),
        Classification::Unmapped {
            reason: UnmappedReason::NotInAnyChunk
        }
    );
}

#[test]
fn test_free_list_walk_matches_threading() {
    let (mut mem, heap) = build_target();
    let run1 = CHUNK + PAGE_SIZE;

    let walk = heap.walk_bin(&mut mem, 3, WALK_CAP).unwrap();
    assert_eq!(
        walk.visited,
        vec![run1 + 5 * 32, run1 + 9 * 32, run1 + 2 * 32]
    );
    assert_eq!(walk.end, WalkEnd::Null);
    assert_eq!(walk.terminal(), Some(run1 + 2 * 32));

    // Untouched bins are empty.
    let walk = heap.walk_bin(&mut mem, 0, WALK_CAP).unwrap();
    assert!(walk.is_empty());
    assert_eq!(walk.end, WalkEnd::Null);
}

#[test]
fn test_census_of_the_ring() {
    let (mut mem, heap) = build_target();

    let ring = chunks::ring(&mut mem, &heap).unwrap();
    assert_eq!(ring.chunks, vec![CHUNK]);
    assert_eq!(ring.end, chunks::RingEnd::Closed);

    let header = chunks::read_header(&mut mem, &heap.layout, CHUNK).unwrap();
    assert_eq!(header.free_pages, 502);
    assert_eq!(header.free_tail, 10);
    assert_eq!(header.num, 0);

    let entries = chunks::read_map(&mut mem, &heap.layout, CHUNK).unwrap();
    let summary = chunks::summarize(&entries);
    assert_eq!(summary.small_runs, 2);
    assert_eq!(summary.small_pages, 4);
    assert_eq!(summary.large_runs, 2);
    assert_eq!(summary.large_pages, 6);
    assert_eq!(summary.free_pages, 512 - 4 - 6);

    let huge = huge::list(&mut mem, &heap);
    assert_eq!(huge.blocks.len(), 1);
    assert_eq!(huge.blocks[0].start, HUGE_START);
    assert_eq!(huge.end, huge::HugeListEnd::Done);
}

// Corruption drills: the same target with deliberate damage.

#[test]
fn test_corrupted_free_list_cycles_and_dangles() {
    let (mut mem, heap) = build_target();
    let run1 = CHUNK + PAGE_SIZE;

    // Point the tail back at the second node.
    mem.put_ptr(run1 + 2 * 32, run1 + 9 * 32);
    let walk = heap.walk_bin(&mut mem, 3, WALK_CAP).unwrap();
    assert_eq!(walk.visited.len(), 3);
    assert_eq!(
        walk.end,
        WalkEnd::Cycle {
            rank: 2,
            addr: run1 + 9 * 32
        }
    );

    // Point it into the void instead.
    mem.put_ptr(run1 + 2 * 32, 0x13_3700_0000);
    let walk = heap.walk_bin(&mut mem, 3, WALK_CAP).unwrap();
    assert_eq!(walk.visited.len(), 4);
    assert_eq!(
        walk.end,
        WalkEnd::Unreadable {
            addr: 0x13_3700_0000
        }
    );
}

#[test]
fn test_one_bad_classification_does_not_poison_the_rest() {
    let (mut mem, heap) = build_target();

    // Break the huge list head; huge classification degrades, chunk
    // classification keeps working.
    mem.put_ptr(HEAP + heap.layout.heap_huge_list, 0xbad_0000);
    assert_eq!(
        classify(&mut mem, &heap, HUGE_START),
        Classification::Unmapped {
            reason: UnmappedReason::NotInAnyChunk
        }
    );
    assert!(matches!(
        classify(&mut mem, &heap, CHUNK + PAGE_SIZE + 40),
        Classification::Small { bin: 3, .. }
    ));
}
