use std::fmt;

use deku::ctx::Endian;

/// Address in the target process, always widened to 64 bits.
pub type Addr = u64;

/// A read of target memory that could not be satisfied.
///
/// The target is another process (or a core file), so any pointer we follow
/// may be garbage. Carrying `addr` and `len` lets callers report exactly
/// which dereference failed instead of aborting the whole analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadError {
    pub addr: Addr,
    pub len: usize,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unreadable memory: {} bytes at {:#x}", self.len, self.addr)
    }
}

impl std::error::Error for ReadError {}

/// Source of raw bytes from the target process.
///
/// The engine never touches memory directly. Everything it learns about the
/// heap flows through this trait, so the same decoding works against a live
/// process behind GDB, a core file, or captured bytes in tests.
pub trait MemoryReader {
    /// Fill `buf` from target memory starting at `addr`.
    ///
    /// Must fail cleanly (no partial fills observable by the caller) if any
    /// byte of the range is unmapped.
    fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError>;

    /// Byte order of the target.
    fn endian(&self) -> Endian;

    /// Size of a target pointer in bytes (4 or 8).
    fn ptr_len(&self) -> usize;

    fn read_vec(&mut self, addr: Addr, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    fn read_u32(&mut self, addr: Addr) -> Result<u32, ReadError> {
        let mut buf = [0; 4];
        self.read(addr, &mut buf)?;
        Ok(match self.endian() {
            Endian::Little => u32::from_le_bytes(buf),
            Endian::Big => u32::from_be_bytes(buf),
        })
    }

    fn read_u64(&mut self, addr: Addr) -> Result<u64, ReadError> {
        let mut buf = [0; 8];
        self.read(addr, &mut buf)?;
        Ok(match self.endian() {
            Endian::Little => u64::from_le_bytes(buf),
            Endian::Big => u64::from_be_bytes(buf),
        })
    }

    /// Read one target pointer, widened to 64 bits.
    fn read_ptr(&mut self, addr: Addr) -> Result<Addr, ReadError> {
        if self.ptr_len() == 4 {
            Ok(u64::from(self.read_u32(addr)?))
        } else {
            self.read_u64(addr)
        }
    }
}

/// In-memory stand-in for a target: a sparse set of mapped segments.
///
/// Reads that touch any unmapped byte fail, which is exactly how a live
/// target behaves when a corrupted pointer leaves the address space.
#[derive(Debug)]
pub struct SnapshotMemory {
    segments: Vec<(Addr, Vec<u8>)>,
    endian: Endian,
    ptr_len: usize,
}

impl SnapshotMemory {
    /// Empty little-endian 64-bit snapshot.
    pub fn new() -> Self {
        Self::with_target(Endian::Little, 8)
    }

    pub fn with_target(endian: Endian, ptr_len: usize) -> Self {
        Self {
            segments: Vec::new(),
            endian,
            ptr_len,
        }
    }

    /// Map `bytes` at `base`. Segments must not be relied on to merge;
    /// a read crossing from one segment into another fails.
    pub fn map(&mut self, base: Addr, bytes: Vec<u8>) {
        self.segments.push((base, bytes));
    }

    pub fn map_zeroed(&mut self, base: Addr, len: usize) {
        self.segments.push((base, vec![0; len]));
    }

    /// # Panics
    /// Panics if the range is not inside one mapped segment.
    pub fn put(&mut self, addr: Addr, bytes: &[u8]) {
        for (base, data) in &mut self.segments {
            if let Some(off) = addr.checked_sub(*base)
                && off.saturating_add(bytes.len() as u64) <= data.len() as u64
            {
                let off = off as usize;
                data[off..off + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        panic!("put outside mapped segments: {} bytes at {addr:#x}", bytes.len());
    }

    pub fn put_u32(&mut self, addr: Addr, value: u32) {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.put(addr, &bytes);
    }

    pub fn put_u64(&mut self, addr: Addr, value: u64) {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.put(addr, &bytes);
    }

    pub fn put_ptr(&mut self, addr: Addr, value: Addr) {
        if self.ptr_len == 4 {
            self.put_u32(addr, value as u32);
        } else {
            self.put_u64(addr, value);
        }
    }
}

impl Default for SnapshotMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryReader for SnapshotMemory {
    fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        let err = ReadError {
            addr,
            len: buf.len(),
        };
        for (base, data) in &self.segments {
            if let Some(off) = addr.checked_sub(*base)
                && off.saturating_add(buf.len() as u64) <= data.len() as u64
            {
                let off = off as usize;
                buf.copy_from_slice(&data[off..off + buf.len()]);
                return Ok(());
            }
        }
        Err(err)
    }

    fn endian(&self) -> Endian {
        self.endian
    }

    fn ptr_len(&self) -> usize {
        self.ptr_len
    }
}
