//! Hardware access boundary
//!
//! Register access and DMA memory come from the miniport/bus layer. Both are
//! passed in as explicit handles so that the core can run against the real
//! aperture or against the simulated chip in `sim`.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

/// Memory-mapped control registers of one chip
pub trait DeviceRegisters: Send + Sync {
    fn read32(&self, offset: u32) -> u32;
    fn write32(&self, offset: u32, value: u32);
    /// Busy-wait for roughly `us` microseconds
    fn stall_us(&self, us: u32);
}

/// Word memory visible to both the CPU and the DMA engine
#[derive(Clone)]
pub struct DmaBuffer {
    words: Arc<[AtomicU32]>,
    phys: u64,
}

impl DmaBuffer {
    /// Wrap shared memory living at bus address `phys`
    pub fn new(words: Arc<[AtomicU32]>, phys: u64) -> Self {
        Self { words, phys }
    }

    /// Zeroed memory with no bus address (CPU-copy transport)
    pub fn host(len_words: usize) -> Self {
        let words: Vec<AtomicU32> = (0..len_words).map(|_| AtomicU32::new(0)).collect();
        Self { words: words.into(), phys: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn phys(&self) -> u64 {
        self.phys
    }

    #[inline]
    pub fn words(&self) -> &[AtomicU32] {
        &self.words
    }

    #[inline]
    pub fn read(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    /// True if both handles refer to the same memory
    pub fn same_memory(&self, other: &DmaBuffer) -> bool {
        Arc::ptr_eq(&self.words, &other.words)
    }
}

impl core::fmt::Debug for DmaBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaBuffer")
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("words", &self.words.len())
            .finish()
    }
}

/// Bus-layer allocator for DMA-capable memory
pub trait DmaAllocator: Send + Sync {
    /// May return less than requested; None if nothing could be allocated
    fn allocate(&self, bytes: usize) -> Option<DmaBuffer>;
    fn free(&self, buffer: DmaBuffer);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_buffer() {
        let buf = DmaBuffer::host(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.phys(), 0);
        buf.words()[3].store(0xdead_beef, Ordering::Relaxed);
        let alias = buf.clone();
        assert!(alias.same_memory(&buf));
        assert_eq!(alias.read(3), 0xdead_beef);
        assert!(!DmaBuffer::host(16).same_memory(&buf));
    }
}
