//! Interrupt Control Block (ICB)
//!
//! State shared between the display driver, which produces commands into
//! the ring, and the interrupt service routine, which restarts DMA when the
//! previous transfer retires. The ISR may run on another core at any time.
//!
//! ```text
//!   BufferStart    PrevStart     NextStart      WritePos        WriteEnd  BufferEnd
//!   |              |<-in flight->|<--queued---->|<----free------>|         |
//! ```
//!
//! Every pointer mutation on either side happens under `ring`. The ISR only
//! ever calls `try_lock`; if the producer holds the lock the ISR gives up,
//! and the producer's next flush sees the idle DMA count and restarts the
//! transfer itself.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::hw::DeviceRegisters;
use crate::regs::{ERROR_FLAGS, INTR_DMA, INTR_ERROR, INT_ENABLE, INT_FLAGS, IN_DMA_ADDRESS, IN_DMA_COUNT};

/// "P2IC": identifies the block layout the display driver was built against
pub const ICB_MAGIC: u32 = u32::from_be_bytes(*b"P2IC");
pub const ICB_VERSION: u32 = 1;

/// Control word: set by the ISR once a DMA interrupt has been observed
pub const DMA_INTERRUPT_AVAILABLE: u32 = 1 << 0;

/// Ring pointers, all in words from the start of the command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RingPointers {
    pub buffer_start: usize,
    pub buffer_end: usize,
    /// End of valid data while a wrap is pending
    pub actual_buffer_end: usize,
    /// The producer must stay below this
    pub write_end: usize,
    /// Start of the transfer most recently handed to hardware
    pub prev_start: usize,
    /// Start of the next transfer to launch
    pub next_start: usize,
    pub write_pos: usize,
}

/// One hardware transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaSegment {
    pub start: usize,
    pub words: usize,
}

impl RingPointers {
    pub fn new(buffer_start: usize, buffer_end: usize) -> Self {
        Self {
            buffer_start,
            buffer_end,
            actual_buffer_end: buffer_end,
            write_end: buffer_end,
            prev_start: buffer_start,
            next_start: buffer_start,
            write_pos: buffer_start,
        }
    }

    /// Nothing queued and nothing outstanding
    #[inline]
    pub fn is_drained(&self) -> bool {
        self.write_pos == self.next_start && self.prev_start == self.next_start
    }

    pub fn rewind(&mut self) {
        *self = RingPointers::new(self.buffer_start, self.buffer_end);
    }

    /// Decide what to hand to hardware once the DMA count reads zero.
    ///
    /// Queued data between `next_start` and `write_pos` is launched as is;
    /// when the producer has wrapped, the tail up to `actual_buffer_end`
    /// goes first. With nothing queued the previous transfer is retired,
    /// and with `rewind_when_idle` the whole ring restarts at the bottom.
    pub fn next_segment(&mut self, rewind_when_idle: bool) -> Option<DmaSegment> {
        if self.write_pos > self.next_start {
            let segment = DmaSegment {
                start: self.next_start,
                words: self.write_pos - self.next_start,
            };
            self.write_end = self.buffer_end;
            self.prev_start = self.next_start;
            self.next_start = self.write_pos;
            Some(segment)
        } else if self.write_pos < self.next_start {
            let segment = DmaSegment {
                start: self.next_start,
                words: self.actual_buffer_end - self.next_start,
            };
            self.actual_buffer_end = self.buffer_end;
            self.write_end = self.next_start - 1;
            self.prev_start = self.next_start;
            self.next_start = self.buffer_start;
            Some(segment)
        } else {
            self.write_end = self.buffer_end;
            self.prev_start = self.next_start;
            if rewind_when_idle {
                self.rewind();
            }
            None
        }
    }
}

/// Counters kept by the block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IcbStats {
    pub interrupts: u64,
    pub lock_skips: u64,
    pub isr_launches: u64,
    pub error_interrupts: u64,
}

pub struct InterruptControlBlock {
    magic: u32,
    version: u32,
    control: AtomicU32,
    pub(crate) ring: Mutex<RingPointers>,
    dma_base: AtomicU64,
    interrupts: AtomicU64,
    lock_skips: AtomicU64,
    isr_launches: AtomicU64,
    error_interrupts: AtomicU64,
    /// ERROR_FLAGS bits seen by the ISR and not yet reported
    pending_errors: AtomicU32,
}

impl Default for InterruptControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControlBlock {
    pub fn new() -> Self {
        Self::with_protocol(ICB_MAGIC, ICB_VERSION)
    }

    /// Block advertising an arbitrary protocol (older or foreign miniports)
    pub fn with_protocol(magic: u32, version: u32) -> Self {
        Self {
            magic,
            version,
            control: AtomicU32::new(0),
            ring: Mutex::new(RingPointers::default()),
            dma_base: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            lock_skips: AtomicU64::new(0),
            isr_launches: AtomicU64::new(0),
            error_interrupts: AtomicU64::new(0),
            pending_errors: AtomicU32::new(0),
        }
    }

    /// Check, once at attach time, that both sides agree on the block
    pub fn attach(&self, magic: u32, version: u32) -> Result<(), &'static str> {
        if self.magic != magic {
            return Err("interrupt control block magic mismatch");
        }
        if self.version != version {
            return Err("interrupt control block version mismatch");
        }
        Ok(())
    }

    #[inline]
    pub fn control(&self) -> u32 {
        self.control.load(Ordering::Acquire)
    }

    pub fn clear_control(&self, bits: u32) {
        self.control.fetch_and(!bits, Ordering::AcqRel);
    }

    pub fn ring_snapshot(&self) -> RingPointers {
        *self.ring.lock()
    }

    pub(crate) fn reset_ring(&self, buffer_start: usize, buffer_end: usize) {
        *self.ring.lock() = RingPointers::new(buffer_start, buffer_end);
    }

    pub(crate) fn set_dma_base(&self, phys: u64) {
        self.dma_base.store(phys, Ordering::Release);
    }

    #[inline]
    pub fn dma_base(&self) -> u64 {
        self.dma_base.load(Ordering::Acquire)
    }

    /// Error flags accumulated by the ISR since the last call
    pub fn take_errors(&self) -> u32 {
        self.pending_errors.swap(0, Ordering::AcqRel)
    }

    pub fn stats(&self) -> IcbStats {
        IcbStats {
            interrupts: self.interrupts.load(Ordering::Relaxed),
            lock_skips: self.lock_skips.load(Ordering::Relaxed),
            isr_launches: self.isr_launches.load(Ordering::Relaxed),
            error_interrupts: self.error_interrupts.load(Ordering::Relaxed),
        }
    }
}

/// Program one transfer; the caller holds the ring lock
pub(crate) fn start_dma(regs: &dyn DeviceRegisters, base: u64, segment: DmaSegment) {
    debug_assert!(segment.words > 0, "empty DMA segment");
    let address = base + (segment.start as u64) * 4;
    regs.write32(IN_DMA_ADDRESS, address as u32);
    regs.write32(IN_DMA_COUNT, segment.words as u32);
    #[cfg(feature = "dma-trace")]
    crate::log_trace!("[P2DMA] launch {:#x} +{} words", address, segment.words);
}

/// Interrupt service routine body. Returns true if the interrupt was ours.
pub fn handle_interrupt(icb: &InterruptControlBlock, regs: &dyn DeviceRegisters) -> bool {
    let flags = regs.read32(INT_FLAGS);
    let mut claimed = false;

    if flags & INTR_ERROR != 0 {
        let errors = regs.read32(ERROR_FLAGS);
        regs.write32(ERROR_FLAGS, errors);
        regs.write32(INT_FLAGS, INTR_ERROR);
        icb.error_interrupts.fetch_add(1, Ordering::Relaxed);
        // No logging here: the console lock may be held by the interrupted thread
        icb.pending_errors.fetch_or(errors, Ordering::AcqRel);
        claimed = true;
    }

    if flags & INTR_DMA != 0 {
        claimed = true;
        icb.interrupts.fetch_add(1, Ordering::Relaxed);
        icb.control.fetch_or(DMA_INTERRUPT_AVAILABLE, Ordering::AcqRel);
        regs.write32(INT_FLAGS, INTR_DMA);

        match icb.ring.try_lock() {
            Some(mut ring) => {
                if regs.read32(IN_DMA_COUNT) == 0 {
                    match ring.next_segment(false) {
                        Some(segment) => {
                            start_dma(regs, icb.dma_base(), segment);
                            icb.isr_launches.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            // Drained: stay quiet until the producer queues more
                            let enable = regs.read32(INT_ENABLE);
                            regs.write32(INT_ENABLE, enable & !INTR_DMA);
                        }
                    }
                }
            }
            None => {
                icb.lock_skips.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    claimed
}
