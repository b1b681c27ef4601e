use log::debug;

use crate::read::{Addr, MemoryReader};

/// Default ceiling on nodes visited in one walk. Far beyond any healthy
/// list; a corrupted next pointer into a self-referential region could
/// otherwise keep the walk going forever.
pub const WALK_CAP: usize = 100;

/// How a free-list walk came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkEnd {
    /// Null next pointer, the clean terminator.
    Null,
    /// `addr` came around again; `rank` is where it was first seen,
    /// counting from 1.
    Cycle { rank: usize, addr: Addr },
    /// `addr` was recorded but its next pointer could not be read.
    Unreadable { addr: Addr },
    /// The node ceiling tripped before any terminator was found.
    Capped,
}

/// One bounded traversal of a singly linked free list.
///
/// `visited` holds node addresses in discovery order and is meaningful for
/// every outcome: a walk that hits a cycle, an unreadable node, or the cap
/// still reports everything seen up to that point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeListWalk {
    pub visited: Vec<Addr>,
    pub end: WalkEnd,
}

impl FreeListWalk {
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Last node of a cleanly terminated list.
    pub fn terminal(&self) -> Option<Addr> {
        match self.end {
            WalkEnd::Null => self.visited.last().copied(),
            _ => None,
        }
    }
}

/// Follow a free list from `head`, reading each node's next pointer at
/// `next_offset`, visiting at most `cap` nodes.
///
/// Never fails: a node whose next pointer cannot be read ends the walk
/// with `WalkEnd::Unreadable` and everything visited so far intact. The
/// cycle check runs before the cap so a list of exactly `cap` nodes that
/// loops back on itself reports the cycle, not a truncation.
pub fn walk(r: &mut impl MemoryReader, next_offset: u64, head: Addr, cap: usize) -> FreeListWalk {
    let mut visited: Vec<Addr> = Vec::new();
    let mut current = head;
    loop {
        if current == 0 {
            return FreeListWalk {
                visited,
                end: WalkEnd::Null,
            };
        }
        if let Some(pos) = visited.iter().position(|&seen| seen == current) {
            return FreeListWalk {
                visited,
                end: WalkEnd::Cycle {
                    rank: pos + 1,
                    addr: current,
                },
            };
        }
        if visited.len() == cap {
            return FreeListWalk {
                visited,
                end: WalkEnd::Capped,
            };
        }
        visited.push(current);
        match r.read_ptr(current.wrapping_add(next_offset)) {
            Ok(next) => {
                debug!("free list hop {current:#x} -> {next:#x}");
                current = next;
            }
            Err(_) => {
                return FreeListWalk {
                    visited,
                    end: WalkEnd::Unreadable { addr: current },
                };
            }
        }
    }
}
