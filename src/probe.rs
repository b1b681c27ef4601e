//! Target-side discovery: where the heap lives and how its structs are laid
//! out, answered by the debuggee's own debug info when available.

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use zmm::HeapLayout;

use crate::gdb::GdbSession;

/// Locate the Zend MM heap in the target.
///
/// PHP keeps the live heap pointer in `alloc_globals.mm_heap` on NTS builds.
/// ZTS builds hide it behind the tsrm cache, so `--heap` exists as an escape
/// hatch for any target where the symbol does not resolve.
pub fn find_heap(session: &mut GdbSession, override_addr: Option<u64>) -> Result<u64> {
    if let Some(addr) = override_addr {
        info!("using heap address override {addr:#x}");
        return Ok(addr);
    }
    let addr = session
        .eval_integer("(unsigned long) alloc_globals.mm_heap")
        .context("could not resolve alloc_globals.mm_heap; load debug symbols or pass --heap")?;
    if addr == 0 {
        bail!("alloc_globals.mm_heap is NULL, the allocator is not initialized yet");
    }
    debug!("mm_heap at {addr:#x}");
    Ok(addr)
}

/// Probe struct offsets out of the target's debug info.
///
/// Every field that cannot be probed keeps its built-in PHP 8 x86-64 value,
/// so a stripped target still gets a usable layout.
pub fn discover_layout(session: &mut GdbSession) -> HeapLayout {
    let mut layout = HeapLayout::php8_x86_64();
    let probes: [(&str, fn(&mut HeapLayout) -> &mut u64); 13] = [
        ("&((struct _zend_mm_heap *) 0)->free_slot[0]", |l| &mut l.heap_free_slot),
        ("&((struct _zend_mm_heap *) 0)->huge_list", |l| &mut l.heap_huge_list),
        ("&((struct _zend_mm_heap *) 0)->main_chunk", |l| &mut l.heap_main_chunk),
        ("&((struct _zend_mm_chunk *) 0)->next", |l| &mut l.chunk_next),
        ("&((struct _zend_mm_chunk *) 0)->free_pages", |l| &mut l.chunk_free_pages),
        ("&((struct _zend_mm_chunk *) 0)->free_tail", |l| &mut l.chunk_free_tail),
        ("&((struct _zend_mm_chunk *) 0)->num", |l| &mut l.chunk_num),
        ("&((struct _zend_mm_chunk *) 0)->free_map[0]", |l| &mut l.chunk_free_map),
        ("&((struct _zend_mm_chunk *) 0)->map[0]", |l| &mut l.chunk_map),
        ("&((struct _zend_mm_huge_list *) 0)->ptr", |l| &mut l.huge_ptr),
        ("&((struct _zend_mm_huge_list *) 0)->size", |l| &mut l.huge_size),
        ("&((struct _zend_mm_huge_list *) 0)->next", |l| &mut l.huge_next),
        ("&((struct _zend_mm_free_slot *) 0)->next_free_slot", |l| &mut l.slot_next),
    ];

    let mut missed = 0;
    for (expr, field) in probes {
        match session.eval_integer(&format!("(unsigned long) {expr}")) {
            Ok(offset) => *field(&mut layout) = offset,
            Err(err) => {
                debug!("layout probe failed: {err}");
                missed += 1;
            }
        }
    }
    if missed > 0 {
        warn!("{missed} layout probes failed, keeping built-in php 8 offsets for those fields");
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdb::fake_session;

    #[test]
    fn test_heap_override_skips_the_target() {
        let mut session = fake_session("");
        assert_eq!(find_heap(&mut session, Some(0x7f12_3400_0040)).unwrap(), 0x7f12_3400_0040);
    }

    #[test]
    fn test_null_heap_is_rejected() {
        let mut session = fake_session("^done,value=\"(zend_mm_heap *) 0x0\"\n");
        assert!(find_heap(&mut session, None).is_err());
    }

    #[test]
    fn test_find_heap_parses_pointer_value() {
        let mut session = fake_session("^done,value=\"(zend_mm_heap *) 0x7ffff5e00040\"\n");
        assert_eq!(find_heap(&mut session, None).unwrap(), 0x7ffff5e00040);
    }

    #[test]
    fn test_discovered_offsets_override_builtins() {
        // First probe answers with an unusual free_slot offset (a ZTS-style
        // shift), the rest fail and keep their built-in values.
        let mut transcript = String::from("^done,value=\"40\"\n");
        transcript.push_str(&"^error,msg=\"No symbol\"\n".repeat(12));
        let mut session = fake_session(&transcript);

        let layout = discover_layout(&mut session);
        assert_eq!(layout.heap_free_slot, 40);
        assert_eq!(layout.heap_main_chunk, HeapLayout::php8_x86_64().heap_main_chunk);
        assert_eq!(layout.chunk_map, HeapLayout::php8_x86_64().chunk_map);
    }

    #[test]
    fn test_all_probes_answered() {
        let transcript = (0..13).map(|i| format!("^done,value=\"{}\"\n", i * 8)).collect::<String>();
        let mut session = fake_session(&transcript);

        let layout = discover_layout(&mut session);
        assert_eq!(layout.heap_free_slot, 0);
        assert_eq!(layout.heap_huge_list, 8);
        assert_eq!(layout.heap_main_chunk, 16);
        assert_eq!(layout.slot_next, 96);
    }
}
