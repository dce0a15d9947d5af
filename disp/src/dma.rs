//! Command Queue / DMA Transport
//!
//! Commands are tag/data word pairs written into a ring of DMA memory and
//! handed to the chip in segments. The ISR in `interrupt` relaunches the
//! next segment when the previous one retires; the producer re-checks the
//! hardware DMA count on every flush, so a skipped interrupt never loses
//! data.
//!
//! ```text
//!   IDLE ──reserve/commit──► PENDING ──flush, count==0──► DMA_ACTIVE
//!     ▲                         ▲                             │
//!     └──── drained ◄───────────┴──── ISR relaunch ◄──────────┘
//!   PENDING ──reservation would cross the end──► WRAP (tail deferred)
//! ```
//!
//! When the interrupt path cannot be verified at bring-up the transport runs
//! in emulation mode: flush copies the queued words straight into the input
//! FIFO and completion is synchronous.

use alloc::sync::Arc;
use core::cell::Cell;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::config::DisplayConfig;
use crate::hw::{DeviceRegisters, DmaAllocator, DmaBuffer};
use crate::interrupt::{
    start_dma, InterruptControlBlock, RingPointers, DMA_INTERRUPT_AVAILABLE, ICB_MAGIC,
    ICB_VERSION,
};
use crate::regs::*;

/// Smallest usable command buffer (bytes); also the emulation buffer size
pub const DMA_CMD_MIN_SIZE: usize = 0x2000;
/// Command buffer size requested by default (bytes)
pub const DMA_CMD_SIZE: usize = 0x40000;
/// Input FIFO depth in words; no single reservation may exceed it
pub const MAX_INPUT_FIFO_LENGTH: usize = 256;

/// VSyncs to wait for the first DMA interrupt during bring-up
const PROBE_VSYNC_BUDGET: u32 = 5;
/// About one second of 1 us polls
const OUTPUT_FIFO_TIMEOUT_POLLS: u32 = 1_000_000;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED STATE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct DmaSetup {
    buffer: DmaBuffer,
    emulated: bool,
    int_flags: u32,
}

/// Transport state shared by every display instance on one chip
pub struct SharedDma {
    icb: Arc<InterruptControlBlock>,
    allocator: Arc<dyn DmaAllocator>,
    setup: Mutex<Option<DmaSetup>>,
    instances: AtomicU32,
    committed_words: AtomicU64,
    flushes: AtomicU64,
}

impl SharedDma {
    pub fn new(icb: Arc<InterruptControlBlock>, allocator: Arc<dyn DmaAllocator>) -> Arc<Self> {
        Arc::new(Self {
            icb,
            allocator,
            setup: Mutex::new(None),
            instances: AtomicU32::new(0),
            committed_words: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    pub fn icb(&self) -> &Arc<InterruptControlBlock> {
        &self.icb
    }

    pub fn instances(&self) -> u32 {
        self.instances.load(Ordering::Acquire)
    }

    /// Words committed through every instance since creation
    pub fn committed_words(&self) -> u64 {
        self.committed_words.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// True while a command buffer is held
    pub fn is_allocated(&self) -> bool {
        self.setup.lock().is_some()
    }

    fn release(&self, regs: &dyn DeviceRegisters) {
        if self.instances.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let mut setup = self.setup.lock();
        if let Some(s) = setup.take() {
            if !s.emulated {
                regs.write32(INT_ENABLE, 0);
                self.allocator.free(s.buffer);
            }
        }
        self.icb.reset_ring(0, 0);
        self.icb.set_dma_base(0);
        self.icb.clear_control(DMA_INTERRUPT_AVAILABLE);
        crate::log!("[P2DMA] command buffer released");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WRITE CURSOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Producer cursor over a reserved stretch of the ring
pub struct DmaCursor<'a> {
    words: &'a [AtomicU32],
    start: usize,
    pos: usize,
    limit: usize,
}

impl DmaCursor<'_> {
    #[inline]
    pub fn push_word(&mut self, word: u32) {
        debug_assert!(self.pos < self.limit, "write past the reservation");
        self.words[self.pos].store(word, Ordering::Relaxed);
        self.pos += 1;
    }

    /// One register write
    #[inline]
    pub fn push(&mut self, tag: u32, data: u32) {
        self.push_word(tag);
        self.push_word(data);
    }

    /// Several data words for the same register
    pub fn push_hold(&mut self, tag: u32, data: &[u32]) {
        if data.is_empty() {
            return;
        }
        self.push_word(hold_tag(tag, data.len() as u32));
        for &d in data {
            self.push_word(d);
        }
    }

    /// Data words for consecutive registers starting at `tag`
    pub fn push_increment(&mut self, tag: u32, data: &[u32]) {
        if data.is_empty() {
            return;
        }
        self.push_word(increment_tag(tag, data.len() as u32));
        for &d in data {
            self.push_word(d);
        }
    }

    pub fn written(&self) -> usize {
        self.pos - self.start
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.pos
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

pub struct P2Dma {
    shared: Arc<SharedDma>,
    regs: Arc<dyn DeviceRegisters>,
    buffer: DmaBuffer,
    emulated: bool,
    int_flags: u32,
    reserved: Cell<bool>,
    attached: Cell<bool>,
}

impl P2Dma {
    /// Attach one display instance. The first instance on a chip brings the
    /// transport up; later ones share its buffer and mode.
    pub fn initialize(
        shared: &Arc<SharedDma>,
        regs: Arc<dyn DeviceRegisters>,
        config: &DisplayConfig,
    ) -> Result<P2Dma, &'static str> {
        config.validate()?;

        let setup = {
            let mut guard = shared.setup.lock();
            match guard.as_ref() {
                Some(s) => s.clone(),
                None => {
                    let s = Self::bring_up(shared, &regs, config);
                    *guard = Some(s.clone());
                    s
                }
            }
        };
        shared.instances.fetch_add(1, Ordering::AcqRel);

        Ok(P2Dma {
            shared: Arc::clone(shared),
            regs,
            buffer: setup.buffer,
            emulated: setup.emulated,
            int_flags: setup.int_flags,
            reserved: Cell::new(false),
            attached: Cell::new(true),
        })
    }

    fn bring_up(
        shared: &Arc<SharedDma>,
        regs: &Arc<dyn DeviceRegisters>,
        config: &DisplayConfig,
    ) -> DmaSetup {
        let icb = &shared.icb;
        let use_dma = config.accel_level == 0 && {
            match icb.attach(ICB_MAGIC, ICB_VERSION) {
                Ok(()) => true,
                Err(e) => {
                    crate::log_warn!("[P2DMA] {}, using emulation", e);
                    false
                }
            }
        };

        if use_dma {
            regs.write32(DMA_CONTROL, 0);
            regs.write32(INT_ENABLE, 0);
            regs.write32(FIFO_DISCON, FIFODISCON_ENABLE);

            match shared.allocator.allocate(config.dma_buffer_bytes) {
                Some(buffer) if buffer.len() * 4 >= DMA_CMD_MIN_SIZE => {
                    let probe = P2Dma {
                        shared: Arc::clone(shared),
                        regs: Arc::clone(regs),
                        buffer: buffer.clone(),
                        emulated: false,
                        int_flags: INTR_DMA,
                        reserved: Cell::new(false),
                        attached: Cell::new(false),
                    };
                    if probe.probe_interrupts() {
                        regs.write32(INT_ENABLE, INTR_DMA | INTR_ERROR);
                        crate::log!(
                            "[P2DMA] DMA transport up: {} words at {:#x}",
                            buffer.len(),
                            buffer.phys()
                        );
                        return DmaSetup {
                            buffer,
                            emulated: false,
                            int_flags: INTR_DMA | INTR_ERROR,
                        };
                    }
                    crate::log_warn!("[P2DMA] no DMA interrupt seen, using emulation");
                    regs.write32(INT_ENABLE, 0);
                    shared.allocator.free(buffer);
                }
                Some(buffer) => {
                    crate::log_warn!(
                        "[P2DMA] DMA buffer too small ({} bytes), using emulation",
                        buffer.len() * 4
                    );
                    shared.allocator.free(buffer);
                }
                None => crate::log_warn!("[P2DMA] DMA buffer allocation failed, using emulation"),
            }
        }

        let buffer = DmaBuffer::host(DMA_CMD_MIN_SIZE / 4);
        icb.reset_ring(0, buffer.len());
        icb.set_dma_base(0);
        crate::log!("[P2DMA] emulation transport: {} words", buffer.len());
        DmaSetup {
            buffer,
            emulated: true,
            int_flags: 0,
        }
    }

    /// Push a few reset words through DMA and wait for the interrupt that
    /// proves the ISR is wired up
    fn probe_interrupts(&self) -> bool {
        let icb = &self.shared.icb;
        icb.reset_ring(0, self.buffer.len());
        icb.set_dma_base(self.buffer.phys());
        icb.clear_control(DMA_INTERRUPT_AVAILABLE);

        self.regs.write32(ERROR_FLAGS, 0xffff_ffff);
        self.regs.write32(INT_FLAGS, INTR_DMA | INTR_ERROR | INTR_VSYNC);
        self.regs.write32(INT_ENABLE, INTR_DMA);

        let mut cursor = self.reserve(10);
        cursor.push(tag::DELTA_MODE, 0);
        cursor.push(tag::COLOR_DDA_MODE, 0);
        cursor.push(tag::SCISSOR_MODE, 0);
        cursor.push(tag::TEXTURE_COLOR_MODE, 0);
        cursor.push(tag::FOG_MODE, 0);
        self.commit(cursor);
        self.flush();

        let mut budget = PROBE_VSYNC_BUDGET;
        while icb.control() & DMA_INTERRUPT_AVAILABLE == 0 {
            if self.regs.read32(INT_FLAGS) & INTR_VSYNC != 0 {
                self.regs.write32(INT_FLAGS, INTR_VSYNC);
                budget -= 1;
                if budget == 0 {
                    return false;
                }
            }
        }
        self.wait_complete();
        true
    }

    #[inline]
    pub fn is_emulated(&self) -> bool {
        self.emulated
    }

    pub fn shared(&self) -> &Arc<SharedDma> {
        &self.shared
    }

    pub fn regs(&self) -> &Arc<dyn DeviceRegisters> {
        &self.regs
    }

    /// Capacity of the ring in words
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn ring(&self) -> RingPointers {
        self.shared.icb.ring_snapshot()
    }

    /// Wait for `n` free words and return a cursor over them.
    /// Never fails; spins and flushes while the ring is full.
    pub fn reserve(&self, n: usize) -> DmaCursor<'_> {
        debug_assert!(n <= MAX_INPUT_FIFO_LENGTH, "reservation larger than the FIFO");
        debug_assert!(!self.reserved.get(), "nested reservation");
        loop {
            {
                let ring = self.shared.icb.ring.lock();
                if ring.write_pos + n < ring.write_end {
                    self.reserved.set(true);
                    return DmaCursor {
                        words: self.buffer.words(),
                        start: ring.write_pos,
                        pos: ring.write_pos,
                        limit: ring.write_pos + n,
                    };
                }
            }
            self.check_end_of_buffer(n);
        }
    }

    /// Publish what the cursor wrote. Hardware does not see it until a flush.
    pub fn commit(&self, cursor: DmaCursor<'_>) {
        let mut ring = self.shared.icb.ring.lock();
        debug_assert_eq!(cursor.start, ring.write_pos, "stale cursor");
        ring.write_pos = cursor.pos;
        self.reserved.set(false);
        self.shared
            .committed_words
            .fetch_add(cursor.written() as u64, Ordering::Relaxed);
    }

    /// Hand queued words to the chip
    pub fn flush(&self) {
        self.shared.flushes.fetch_add(1, Ordering::Relaxed);
        let errors = self.shared.icb.take_errors();
        if errors != 0 {
            crate::log_warn!("[P2INT] error interrupt, flags={:#x}", errors);
        }
        if self.emulated {
            self.flush_emulated();
            return;
        }

        let icb = &self.shared.icb;
        let rewind = !self.reserved.get();
        let mut ring = icb.ring.lock();
        if self.regs.read32(IN_DMA_COUNT) != 0 {
            drop(ring);
            // Busy: let the completion interrupt pick the data up
            self.regs.write32(INT_FLAGS, INTR_DMA);
            self.regs.write32(INT_ENABLE, self.int_flags);
            return;
        }
        if let Some(segment) = ring.next_segment(rewind) {
            start_dma(&*self.regs, icb.dma_base(), segment);
        }
    }

    fn flush_emulated(&self) {
        let mut ring = self.shared.icb.ring.lock();
        let mut pos = ring.buffer_start;
        while pos < ring.write_pos {
            let space = self.regs.read32(IN_FIFO_SPACE) as usize;
            let chunk = space.min(ring.write_pos - pos);
            for i in pos..pos + chunk {
                self.regs.write32(FIFO_INTERFACE, self.buffer.read(i));
            }
            pos += chunk;
        }
        ring.rewind();
    }

    /// Wrap guard: when `n` more words would run past the end and the
    /// in-flight segment has moved away from the bottom, continue writing at
    /// the bottom and defer the tail.
    pub fn check_end_of_buffer(&self, n: usize) {
        if self.emulated {
            self.flush_emulated();
            return;
        }
        {
            let mut ring = self.shared.icb.ring.lock();
            if ring.write_pos + n >= ring.buffer_end
                && ring.prev_start <= ring.write_pos
                && ring.prev_start != ring.buffer_start
            {
                if ring.write_pos == ring.next_start {
                    ring.next_start = ring.buffer_start;
                } else {
                    ring.actual_buffer_end = ring.write_pos;
                }
                ring.write_end = ring.prev_start - 1;
                ring.write_pos = ring.buffer_start;
                #[cfg(feature = "dma-trace")]
                crate::log_trace!("[P2DMA] wrap, tail ends at {}", ring.actual_buffer_end);
            }
        }
        self.flush();
    }

    /// Spin until the chip has consumed everything and the ring is back at
    /// the bottom
    pub fn wait_complete(&self) {
        if self.emulated {
            self.flush_emulated();
            return;
        }
        loop {
            let busy = self.regs.read32(IN_DMA_COUNT) != 0;
            let drained = self.shared.icb.ring.lock().is_drained();
            if !busy && drained {
                break;
            }
            if busy {
                self.regs.stall_us(1);
            }
            self.flush();
        }
        self.flush();
    }

    /// Free entries a caller may batch without overrunning the input FIFO
    pub fn get_free_entries(&self) -> usize {
        let ring = self.shared.icb.ring.lock();
        (ring.write_end - ring.write_pos).min(MAX_INPUT_FIFO_LENGTH)
    }

    /// Upload a block of data words to one register, in FIFO-sized chunks
    pub fn block_load_input_fifo(&self, tag: u32, data: &[u32]) {
        let mut rest = data;
        while !rest.is_empty() {
            let n = rest.len().min(MAX_INPUT_FIFO_LENGTH - 1);
            let mut cursor = self.reserve(n + 1);
            cursor.push_hold(tag, &rest[..n]);
            self.commit(cursor);
            self.flush();
            rest = &rest[n..];
        }
    }

    /// Poll until the output FIFO holds data; returns the word count.
    /// Timing out means the command stream never asked for output.
    pub fn wait_output_fifo_ready(&self) -> u32 {
        for _ in 0..OUTPUT_FIFO_TIMEOUT_POLLS {
            let words = self.regs.read32(OUT_FIFO_WORDS);
            if words != 0 {
                return words;
            }
            if self.regs.read32(IN_DMA_COUNT) != 0 {
                self.regs.stall_us(1);
            } else {
                self.flush();
            }
        }
        crate::log_error!("[P2DMA] output FIFO never filled");
        debug_assert!(false, "output FIFO timeout");
        0
    }

    /// Round-trip a Sync tag so that everything queued before it has been
    /// executed
    pub fn sync_with_chip(&self) {
        let mut cursor = self.reserve(6);
        cursor.push(tag::FILTER_MODE, FILTER_MODE_PASS_SYNC);
        cursor.push(tag::SYNC, 0);
        cursor.push(tag::FILTER_MODE, 0);
        self.commit(cursor);
        self.flush();
        self.wait_complete();

        loop {
            if self.wait_output_fifo_ready() == 0 {
                break;
            }
            if self.regs.read32(FIFO_INTERFACE) == tag::SYNC {
                break;
            }
        }
    }

    pub fn draw_engine_busy(&self) -> bool {
        self.regs.read32(IN_DMA_COUNT) != 0
            || self.regs.read32(FIFO_DISCON) & FIFODISCON_GP_ACTIVE != 0
    }

    pub fn in_vertical_retrace(&self) -> bool {
        self.regs.read32(LINE_COUNT) < self.regs.read32(VB_END)
    }

    pub fn current_line(&self) -> u32 {
        self.regs.read32(LINE_COUNT)
    }

    /// Drain and detach this instance; the last one out frees the buffer
    pub fn detach(&self) {
        if self.attached.replace(false) {
            self.wait_complete();
            self.shared.release(&*self.regs);
        }
    }
}

impl Drop for P2Dma {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Latency, SimAllocator, SimChip, SimConfig};

    fn dma_setup(latency: Latency) -> (Arc<SimChip>, Arc<SharedDma>, P2Dma) {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig {
            latency,
            ..SimConfig::default()
        }, allocator.clone());
        let icb = Arc::new(InterruptControlBlock::new());
        chip.connect_interrupt(icb.clone());
        let shared = SharedDma::new(icb, allocator);
        let regs: Arc<dyn DeviceRegisters> = chip.clone();
        let config = DisplayConfig {
            dma_buffer_bytes: DMA_CMD_MIN_SIZE,
            ..DisplayConfig::default()
        };
        let dma = P2Dma::initialize(&shared, regs, &config).unwrap();
        (chip, shared, dma)
    }

    fn push_filler(dma: &P2Dma, pairs: usize, seed: u32) {
        let mut cursor = dma.reserve(pairs * 2);
        for i in 0..pairs {
            cursor.push(tag::FB_WRITE_DATA, seed.wrapping_add(i as u32));
        }
        dma.commit(cursor);
    }

    #[test]
    fn test_probe_selects_dma() {
        let (chip, shared, dma) = dma_setup(Latency::Fixed(3));
        assert!(!dma.is_emulated());
        assert_eq!(shared.instances(), 1);
        // The probe's reset words went through DMA
        assert_eq!(chip.consumed_words().len(), 10);
        assert_eq!(dma.ring(), RingPointers::new(0, DMA_CMD_MIN_SIZE / 4));
    }

    #[test]
    fn test_probe_falls_back_without_irq() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let shared = SharedDma::new(Arc::new(InterruptControlBlock::new()), allocator.clone());
        let dma = P2Dma::initialize(&shared, chip.clone(), &DisplayConfig::default()).unwrap();
        assert!(dma.is_emulated());
        assert_eq!(dma.capacity(), DMA_CMD_MIN_SIZE / 4);
        assert_eq!(allocator.live_buffers(), 0);
        assert_eq!(chip.read32(INT_ENABLE), 0);
    }

    #[test]
    fn test_accel_level_forces_emulation() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let icb = Arc::new(InterruptControlBlock::new());
        chip.connect_interrupt(icb.clone());
        let shared = SharedDma::new(icb, allocator.clone());
        let config = DisplayConfig {
            accel_level: 2,
            ..DisplayConfig::default()
        };
        let dma = P2Dma::initialize(&shared, chip.clone(), &config).unwrap();
        assert!(dma.is_emulated());
        assert_eq!(allocator.allocations(), 0);
    }

    #[test]
    fn test_version_mismatch_forces_emulation() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let icb = Arc::new(InterruptControlBlock::with_protocol(ICB_MAGIC, ICB_VERSION + 1));
        chip.connect_interrupt(icb.clone());
        let shared = SharedDma::new(icb, allocator);
        let dma = P2Dma::initialize(&shared, chip, &DisplayConfig::default()).unwrap();
        assert!(dma.is_emulated());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let shared = SharedDma::new(Arc::new(InterruptControlBlock::new()), allocator);
        let config = DisplayConfig {
            pel_size: 3,
            ..DisplayConfig::default()
        };
        assert!(P2Dma::initialize(&shared, chip, &config).is_err());
        assert_eq!(shared.instances(), 0);
    }

    #[test]
    fn test_emulated_flush_copies_in_order() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let shared = SharedDma::new(Arc::new(InterruptControlBlock::new()), allocator);
        let config = DisplayConfig {
            accel_level: 1,
            ..DisplayConfig::default()
        };
        let dma = P2Dma::initialize(&shared, chip.clone(), &config).unwrap();
        chip.clear_consumed();

        push_filler(&dma, 40, 7);
        assert!(chip.consumed_words().is_empty());
        dma.flush();
        let words = chip.consumed_words();
        assert_eq!(words.len(), 80);
        assert_eq!(words[0], tag::FB_WRITE_DATA);
        assert_eq!(words[79], 7 + 39);
        assert_eq!(dma.ring().write_pos, 0);
    }

    #[test]
    fn test_conservation_and_idle_return() {
        let (chip, shared, dma) = dma_setup(Latency::Fixed(5));
        chip.clear_consumed();
        let before = shared.committed_words();

        let mut expected = alloc::vec::Vec::new();
        for round in 0..20u32 {
            let pairs = 1 + (round as usize * 7) % 60;
            for i in 0..pairs {
                expected.push(tag::FB_WRITE_DATA);
                expected.push(round * 1000 + i as u32);
            }
            push_filler(&dma, pairs, round * 1000);
            if round % 3 == 0 {
                dma.flush();
            }
        }
        dma.wait_complete();

        let ring = dma.ring();
        assert_eq!(ring.write_pos, ring.buffer_start);
        assert_eq!(ring.next_start, ring.buffer_start);
        assert_eq!(ring.prev_start, ring.buffer_start);
        assert_eq!(chip.consumed_words(), expected);
        assert_eq!(shared.committed_words() - before, expected.len() as u64);
    }

    #[test]
    fn test_wraparound_never_overruns() {
        let (chip, _shared, dma) = dma_setup(Latency::Random { seed: 0x5eed, max: 40 });
        chip.clear_consumed();
        let mut rng = crate::sim::XorShift64::new(0x1234_5678);
        let mut expected = alloc::vec::Vec::new();

        // Several times around the ring with random sizes and flushes
        for round in 0..600u32 {
            let pairs = 1 + (rng.next() % 100) as usize;
            let mut cursor = dma.reserve(pairs * 2);
            let phys = dma.buffer.phys() + cursor.start as u64 * 4;
            // Reserved space must not hold words the chip has yet to read
            assert!(chip.region_is_retired(phys, pairs * 2));
            for i in 0..pairs {
                let value = round.wrapping_mul(131).wrapping_add(i as u32);
                cursor.push(tag::FB_WRITE_DATA, value);
                expected.push(tag::FB_WRITE_DATA);
                expected.push(value);
            }
            dma.commit(cursor);
            if rng.next() % 4 == 0 {
                dma.flush();
            }
        }
        dma.wait_complete();
        assert_eq!(chip.consumed_words(), expected);
        assert!(dma.ring().is_drained());
    }

    #[test]
    fn test_isr_on_another_thread() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(
            SimConfig {
                latency: Latency::Fixed(2),
                threaded_completion: true,
                ..SimConfig::default()
            },
            allocator.clone(),
        );
        let icb = Arc::new(InterruptControlBlock::new());
        chip.connect_interrupt(icb.clone());
        let hw = chip.spawn_hardware_thread();
        let shared = SharedDma::new(icb, allocator);
        let config = DisplayConfig {
            dma_buffer_bytes: DMA_CMD_MIN_SIZE,
            ..DisplayConfig::default()
        };
        let dma = P2Dma::initialize(&shared, chip.clone(), &config).unwrap();
        assert!(!dma.is_emulated());
        chip.clear_consumed();

        let mut total = 0;
        for round in 0..400u32 {
            let pairs = 1 + (round as usize % 50);
            push_filler(&dma, pairs, round);
            total += pairs * 2;
            dma.flush();
        }
        dma.wait_complete();
        chip.stop_hardware_thread(hw);
        assert_eq!(chip.consumed_words().len(), total);
    }

    #[test]
    fn test_block_load_chunks() {
        let (chip, _shared, dma) = dma_setup(Latency::Fixed(1));
        chip.clear_consumed();
        let data: alloc::vec::Vec<u32> = (0..600).collect();
        dma.block_load_input_fifo(tag::FB_WRITE_DATA, &data);
        dma.wait_complete();
        let words = chip.consumed_words();
        // 600 words in chunks of 255, each behind one header
        assert_eq!(words.len(), 603);
        assert_eq!(words[0], hold_tag(tag::FB_WRITE_DATA, 255));
        assert_eq!(words[256], hold_tag(tag::FB_WRITE_DATA, 255));
        assert_eq!(words[512], hold_tag(tag::FB_WRITE_DATA, 90));
        assert_eq!(chip.register(tag::FB_WRITE_DATA), 599);
    }

    #[test]
    fn test_sync_with_chip_round_trip() {
        let (chip, _shared, dma) = dma_setup(Latency::Fixed(4));
        push_filler(&dma, 10, 0);
        dma.sync_with_chip();
        assert!(dma.ring().is_drained());
        assert_eq!(chip.read32(OUT_FIFO_WORDS), 0);
        assert!(!dma.draw_engine_busy());
    }

    #[test]
    fn test_free_entries_bounded() {
        let (_chip, _shared, dma) = dma_setup(Latency::Fixed(1));
        assert_eq!(dma.get_free_entries(), MAX_INPUT_FIFO_LENGTH);
    }

    #[test]
    fn test_refcounted_teardown() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(SimConfig::default(), allocator.clone());
        let icb = Arc::new(InterruptControlBlock::new());
        chip.connect_interrupt(icb.clone());
        let shared = SharedDma::new(icb.clone(), allocator.clone());

        let first = P2Dma::initialize(&shared, chip.clone(), &DisplayConfig::default()).unwrap();
        let second = P2Dma::initialize(&shared, chip.clone(), &DisplayConfig::default()).unwrap();
        assert_eq!(allocator.allocations(), 1);
        assert_eq!(shared.instances(), 2);
        assert!(first.buffer.same_memory(&second.buffer));

        drop(first);
        assert!(shared.is_allocated());
        assert_eq!(allocator.live_buffers(), 1);

        push_filler(&second, 4, 0);
        drop(second);
        assert!(!shared.is_allocated());
        assert_eq!(allocator.live_buffers(), 0);
        assert!(icb.attach(ICB_MAGIC, ICB_VERSION).is_ok());
    }

    #[test]
    fn test_vertical_retrace_and_busy() {
        let (chip, _shared, dma) = dma_setup(Latency::Fixed(1000));
        push_filler(&dma, 4, 0);
        dma.flush();
        assert!(dma.draw_engine_busy());
        dma.wait_complete();
        assert!(!dma.draw_engine_busy());

        let vb_end = chip.read32(VB_END);
        let mut saw_retrace = false;
        let mut saw_active = false;
        for _ in 0..2000 {
            if dma.in_vertical_retrace() {
                saw_retrace = true;
            } else {
                saw_active = true;
            }
        }
        assert!(saw_retrace && saw_active);
        assert!(vb_end > 0);
    }
}
