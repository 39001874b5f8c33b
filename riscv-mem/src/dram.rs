use std::collections::BTreeMap;

use thiserror::Error;

use crate::bus::Device;

/// Guest page size in bytes.
pub const PAGE_SIZE: u64 = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u64 = 12;

/// Errors raised while constructing a [`Dram`].
#[derive(Debug, Error)]
pub enum DramError {
    #[error("memory size must be a positive multiple of 4 KiB (got {0:#x})")]
    InvalidSize(u64),
}

/// Sparse guest RAM backing a fixed `[0, size)` physical range.
///
/// Pages are allocated zero-filled on first touch, so host memory cost is
/// proportional to the number of touched pages rather than the declared
/// size. Pages are keyed by physical page number and live until the `Dram`
/// itself is dropped; there is no partial-free path.
///
/// Accesses take `&mut self`: a `Dram` shared between harts must be
/// serialized by the integrator, the same way a shared [`crate::bus::Bus`]
/// must be.
pub struct Dram {
    size: u64,
    pages: BTreeMap<u64, Box<[u8; PAGE_SIZE as usize]>>,
}

impl Dram {
    /// Create `size` bytes of guest RAM.
    ///
    /// The size is immutable after construction and must be a positive
    /// multiple of [`PAGE_SIZE`].
    pub fn new(size: u64) -> Result<Self, DramError> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return Err(DramError::InvalidSize(size));
        }
        Ok(Self {
            size,
            pages: BTreeMap::new(),
        })
    }

    /// Declared size of the guest range in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of pages currently committed.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Mutable view of the backing store from `addr` to the end of its page,
    /// committing a zero-filled page on first touch.
    fn page_at(&mut self, addr: u64) -> &mut [u8] {
        let ppn = addr >> PAGE_SHIFT;
        let pgoff = (addr % PAGE_SIZE) as usize;
        let page = self
            .pages
            .entry(ppn)
            .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
        &mut page[pgoff..]
    }

    /// Whole-request bounds check: the access must neither wrap the address
    /// space nor run past the declared size. Checked once, up front, so a
    /// chunked copy can never fail partway through.
    #[inline]
    fn in_range(&self, addr: u64, len: usize) -> bool {
        match addr.checked_add(len as u64) {
            Some(end) => end <= self.size,
            None => false,
        }
    }

    /// Chunk length for a copy starting at `addr`: up to the next page
    /// boundary, capped by the bytes remaining.
    #[inline]
    fn chunk_len(addr: u64, remaining: usize) -> usize {
        ((PAGE_SIZE - (addr % PAGE_SIZE)) as usize).min(remaining)
    }
}

impl Device for Dram {
    fn load(&mut self, offset: u64, bytes: &mut [u8]) -> bool {
        if !self.in_range(offset, bytes.len()) {
            return false;
        }
        let mut addr = offset;
        let mut bytes = bytes;
        while !bytes.is_empty() {
            let n = Self::chunk_len(addr, bytes.len());
            let (head, rest) = bytes.split_at_mut(n);
            head.copy_from_slice(&self.page_at(addr)[..n]);
            addr += n as u64;
            bytes = rest;
        }
        true
    }

    fn store(&mut self, offset: u64, bytes: &[u8]) -> bool {
        if !self.in_range(offset, bytes.len()) {
            return false;
        }
        let mut addr = offset;
        let mut bytes = bytes;
        while !bytes.is_empty() {
            let n = Self::chunk_len(addr, bytes.len());
            let (head, rest) = bytes.split_at(n);
            self.page_at(addr)[..n].copy_from_slice(head);
            addr += n as u64;
            bytes = rest;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_sizes() {
        assert!(matches!(Dram::new(0), Err(DramError::InvalidSize(0))));
        assert!(matches!(Dram::new(100), Err(DramError::InvalidSize(100))));
        assert!(matches!(Dram::new(PAGE_SIZE + 1), Err(DramError::InvalidSize(_))));
        assert!(Dram::new(PAGE_SIZE).is_ok());
        assert!(Dram::new(16 * PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_single_store_commits_one_page() {
        let mut mem = Dram::new(64 * PAGE_SIZE).unwrap();
        assert_eq!(mem.page_count(), 0);

        assert!(mem.store(5 * PAGE_SIZE + 17, &[0xab]));
        assert_eq!(mem.page_count(), 1);

        let mut byte = [0u8];
        assert!(mem.load(5 * PAGE_SIZE + 17, &mut byte));
        assert_eq!(byte[0], 0xab);
    }

    #[test]
    fn test_untouched_memory_reads_zero() {
        let mut mem = Dram::new(8 * PAGE_SIZE).unwrap();
        let mut buf = [0xffu8; 32];
        assert!(mem.load(3 * PAGE_SIZE + 100, &mut buf));
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_out_of_range_rejected_without_side_effect() {
        let size = 4 * PAGE_SIZE;
        let mut mem = Dram::new(size).unwrap();

        let mut buf = [0u8; 8];
        // One byte past the end.
        assert!(!mem.load(size - 7, &mut buf));
        assert!(!mem.store(size - 7, &buf));
        // Entirely past the end.
        assert!(!mem.load(size, &mut buf));
        // Address arithmetic wraps.
        assert!(!mem.load(u64::MAX - 3, &mut buf));
        assert!(!mem.store(u64::MAX, &buf));
        // A rejected access never commits a page.
        assert_eq!(mem.page_count(), 0);

        // The final in-bounds byte is still reachable.
        assert!(mem.store(size - 1, &[1]));
        assert!(mem.load(size - 8, &mut buf));
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_round_trip_across_page_boundaries() {
        let mut mem = Dram::new(16 * PAGE_SIZE).unwrap();

        // Starts 13 bytes before a page boundary and ends 13 bytes after the
        // third boundary down, touching four pages in all.
        let base = 2 * PAGE_SIZE + (PAGE_SIZE - 13);
        let pattern: Vec<u8> = (0..2 * PAGE_SIZE as usize + 26)
            .map(|i| (i * 7 + 3) as u8)
            .collect();

        assert!(mem.store(base, &pattern));
        assert_eq!(mem.page_count(), 4);

        let mut readback = vec![0u8; pattern.len()];
        assert!(mem.load(base, &mut readback));
        assert_eq!(readback, pattern);
    }

    #[test]
    fn test_zero_length_access() {
        let mut mem = Dram::new(PAGE_SIZE).unwrap();
        // In range, copies nothing.
        assert!(mem.store(10, &[]));
        // Still bounds-checked: the start itself must not exceed the size.
        assert!(mem.load(PAGE_SIZE, &mut []));
        assert!(!mem.load(PAGE_SIZE + 1, &mut []));
        assert_eq!(mem.page_count(), 0);
    }
}
