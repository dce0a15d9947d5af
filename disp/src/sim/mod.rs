//! Simulated Permedia2
//!
//! A register-level model of the parts of the chip the driver core talks
//! to: interrupt flags, the input DMA engine, the input/output FIFOs, the
//! display line counter and a framebuffer behind the rasterizer.
//!
//! Time only moves when the driver looks at the chip. Every register read
//! (and every `stall_us`) advances one tick; a DMA transfer completes a
//! configurable number of ticks after it was started and only then reads
//! the words out of memory, so a producer that overwrites words the chip
//! has not fetched yet is caught. With `threaded_completion` a separate
//! hardware thread owns the clock and the ISR runs there.

pub mod raster;

pub use raster::{Interpreter, SimFramebuffer};

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use spin::Mutex;

use crate::hw::{DeviceRegisters, DmaAllocator, DmaBuffer};
use crate::interrupt::{handle_interrupt, InterruptControlBlock};
use crate::regs::*;

/// Small deterministic PRNG for latencies and randomized tests
#[derive(Debug, Clone)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9e37_79b9_7f4a_7c15 } else { seed },
        }
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

/// Ticks between starting a DMA transfer and its completion
#[derive(Debug, Clone, Copy)]
pub enum Latency {
    Fixed(u32),
    Random { seed: u64, max: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub latency: Latency,
    /// Ticks per frame; the VSync interrupt flag rises at the start of each
    pub vsync_period: u32,
    /// Lines of vertical blank at the start of a frame
    pub vblank_lines: u32,
    /// Input FIFO space reported to the CPU-copy path
    pub fifo_space: u32,
    /// Leave the clock (and the ISR) to `spawn_hardware_thread`
    pub threaded_completion: bool,
    pub width: u32,
    pub height: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            latency: Latency::Fixed(8),
            vsync_period: 1000,
            vblank_lines: 50,
            fifo_space: 32,
            threaded_completion: false,
            width: 256,
            height: 256,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DMA MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

const SIM_PHYS_BASE: u64 = 0x0010_0000;
const SIM_PAGE: u64 = 0x1000;

struct AllocState {
    next_phys: u64,
    live: Vec<DmaBuffer>,
    allocations: u32,
}

/// Bus memory for the simulated chip
pub struct SimAllocator {
    state: Mutex<AllocState>,
    limit: Option<usize>,
}

impl SimAllocator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocState {
                next_phys: SIM_PHYS_BASE,
                live: Vec::new(),
                allocations: 0,
            }),
            limit: None,
        }
    }

    /// Allocator that hands out at most `bytes` per request
    pub fn with_limit(bytes: usize) -> Self {
        Self { limit: Some(bytes), ..Self::new() }
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn allocations(&self) -> u32 {
        self.state.lock().allocations
    }

    /// Copy `count` words starting at bus address `phys`
    pub fn read_words(&self, phys: u64, count: usize) -> Option<Vec<u32>> {
        let state = self.state.lock();
        let buffer = state.live.iter().find(|b| {
            phys >= b.phys() && phys + count as u64 * 4 <= b.phys() + b.len() as u64 * 4
        })?;
        let first = ((phys - buffer.phys()) / 4) as usize;
        Some((first..first + count).map(|i| buffer.read(i)).collect())
    }
}

impl Default for SimAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for SimAllocator {
    fn allocate(&self, bytes: usize) -> Option<DmaBuffer> {
        let bytes = self.limit.map_or(bytes, |l| bytes.min(l));
        let len = bytes / 4;
        if len == 0 {
            return None;
        }
        let mut state = self.state.lock();
        let phys = state.next_phys;
        state.next_phys += (len as u64 * 4 + SIM_PAGE).next_multiple_of(SIM_PAGE);
        let words: Vec<AtomicU32> = (0..len).map(|_| AtomicU32::new(0)).collect();
        let buffer = DmaBuffer::new(words.into(), phys);
        state.live.push(buffer.clone());
        state.allocations += 1;
        Some(buffer)
    }

    fn free(&self, buffer: DmaBuffer) {
        self.state.lock().live.retain(|b| !b.same_memory(&buffer));
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHIP
// ═══════════════════════════════════════════════════════════════════════════════

type IsrHook = Arc<dyn Fn(&dyn DeviceRegisters) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct PendingDma {
    address: u32,
    count: u32,
    ticks_left: u32,
}

struct ChipState {
    ticks: u64,
    int_enable: u32,
    int_flags: u32,
    error_flags: u32,
    dma_control: u32,
    fifo_discon: u32,
    dma_address: u32,
    pending: Option<PendingDma>,
    rng: XorShift64,
    interp: Interpreter,
}

pub struct SimChip {
    config: SimConfig,
    state: Mutex<ChipState>,
    isr: Mutex<Option<IsrHook>>,
    in_isr: AtomicBool,
    stop: AtomicBool,
    allocator: Arc<SimAllocator>,
    interrupts: AtomicU64,
    overlapped_starts: AtomicU64,
    lost_transfers: AtomicU64,
}

impl SimChip {
    pub fn new(config: SimConfig, allocator: Arc<SimAllocator>) -> Arc<SimChip> {
        let seed = match config.latency {
            Latency::Random { seed, .. } => seed,
            Latency::Fixed(_) => 1,
        };
        Arc::new(SimChip {
            config,
            state: Mutex::new(ChipState {
                ticks: 0,
                int_enable: 0,
                int_flags: 0,
                error_flags: 0,
                dma_control: 0,
                fifo_discon: 0,
                dma_address: 0,
                pending: None,
                rng: XorShift64::new(seed),
                interp: Interpreter::new(config.width, config.height),
            }),
            isr: Mutex::new(None),
            in_isr: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            allocator,
            interrupts: AtomicU64::new(0),
            overlapped_starts: AtomicU64::new(0),
            lost_transfers: AtomicU64::new(0),
        })
    }

    /// Route the interrupt line to an arbitrary handler
    pub fn set_isr<F>(&self, hook: F)
    where
        F: Fn(&dyn DeviceRegisters) -> bool + Send + Sync + 'static,
    {
        *self.isr.lock() = Some(Arc::new(hook));
    }

    /// Route the interrupt line to the driver's ISR
    pub fn connect_interrupt(&self, icb: Arc<InterruptControlBlock>) {
        self.set_isr(move |regs| handle_interrupt(&icb, regs));
    }

    pub fn disconnect_interrupt(&self) {
        *self.isr.lock() = None;
    }

    /// Every word the graphics processor has consumed, in order
    pub fn consumed_words(&self) -> Vec<u32> {
        self.state.lock().interp.consumed().to_vec()
    }

    pub fn clear_consumed(&self) {
        self.state.lock().interp.clear_consumed();
    }

    /// GP register contents as last written through the FIFO
    pub fn register(&self, tag: u32) -> u32 {
        self.state.lock().interp.register(tag)
    }

    /// No in-flight transfer still has to read this stretch of bus memory
    pub fn region_is_retired(&self, phys: u64, words: usize) -> bool {
        match self.state.lock().pending {
            None => true,
            Some(p) => {
                let (a0, a1) = (p.address as u64, p.address as u64 + p.count as u64 * 4);
                let (b0, b1) = (phys, phys + words as u64 * 4);
                a1 <= b0 || b1 <= a0
            }
        }
    }

    pub fn with_framebuffer<R>(&self, f: impl FnOnce(&SimFramebuffer) -> R) -> R {
        f(self.state.lock().interp.framebuffer())
    }

    pub fn clear_framebuffer(&self, value: u32) {
        self.state.lock().interp.framebuffer_mut().clear(value);
    }

    pub fn pixel(&self, x: i32, y: i32) -> Option<u32> {
        self.state.lock().interp.framebuffer().pixel(x, y)
    }

    pub fn ticks(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Interrupts handed to the ISR
    pub fn interrupts(&self) -> u64 {
        self.interrupts.load(Ordering::Relaxed)
    }

    /// Transfers started while another one was still running
    pub fn overlapped_starts(&self) -> u64 {
        self.overlapped_starts.load(Ordering::Relaxed)
    }

    /// Transfers whose memory was gone when the chip went to read it
    pub fn lost_transfers(&self) -> u64 {
        self.lost_transfers.load(Ordering::Relaxed)
    }

    fn latency(&self, rng: &mut XorShift64) -> u32 {
        match self.config.latency {
            Latency::Fixed(n) => n.max(1),
            Latency::Random { max, .. } => 1 + (rng.next() % max.max(1) as u64) as u32,
        }
    }

    fn irq_pending(st: &ChipState) -> bool {
        st.int_flags & st.int_enable != 0
    }

    /// Advance one tick; returns true if the interrupt line is asserted
    fn advance(&self, st: &mut ChipState) -> bool {
        st.ticks += 1;
        if st.ticks % self.config.vsync_period as u64 == 0 {
            st.int_flags |= INTR_VSYNC;
        }
        if let Some(mut p) = st.pending {
            p.ticks_left = p.ticks_left.saturating_sub(1);
            if p.ticks_left == 0 {
                st.pending = None;
                match self.allocator.read_words(p.address as u64, p.count as usize) {
                    Some(words) => words.into_iter().for_each(|w| st.interp.feed(w)),
                    None => {
                        self.lost_transfers.fetch_add(1, Ordering::Relaxed);
                        st.error_flags |= 1;
                        st.int_flags |= INTR_ERROR;
                    }
                }
                st.int_flags |= INTR_DMA;
            } else {
                st.pending = Some(p);
            }
        }
        Self::irq_pending(st)
    }

    fn deliver_interrupt(&self) {
        if self.in_isr.swap(true, Ordering::AcqRel) {
            return;
        }
        let hook = self.isr.lock().clone();
        if let Some(hook) = hook {
            self.interrupts.fetch_add(1, Ordering::Relaxed);
            hook(self);
        }
        self.in_isr.store(false, Ordering::Release);
    }

    /// One hardware clock tick, delivering the interrupt if it is raised
    pub fn step(&self) {
        let raised = {
            let mut st = self.state.lock();
            self.advance(&mut st)
        };
        if raised {
            self.deliver_interrupt();
        }
    }

    fn cpu_tick(&self, st: &mut ChipState) -> bool {
        if self.config.threaded_completion {
            false
        } else {
            self.advance(st)
        }
    }

    /// Clock loop for a hardware thread; returns after `request_stop`
    pub fn run_until_stopped(&self) {
        while !self.stop.load(Ordering::Acquire) {
            self.step();
            relax();
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub fn spawn_hardware_thread(self: &Arc<Self>) -> std::thread::JoinHandle<()> {
        self.stop.store(false, Ordering::Release);
        let chip = Arc::clone(self);
        std::thread::spawn(move || chip.run_until_stopped())
    }

    #[cfg(test)]
    pub fn stop_hardware_thread(&self, handle: std::thread::JoinHandle<()>) {
        self.request_stop();
        let _ = handle.join();
    }
}

fn relax() {
    #[cfg(test)]
    std::thread::yield_now();
    #[cfg(not(test))]
    core::hint::spin_loop();
}

impl DeviceRegisters for SimChip {
    fn read32(&self, offset: u32) -> u32 {
        let (value, raised) = {
            let mut st = self.state.lock();
            let raised = self.cpu_tick(&mut st);
            let value = match offset {
                RESET_STATUS => 0,
                INT_ENABLE => st.int_enable,
                INT_FLAGS => st.int_flags,
                IN_FIFO_SPACE => self.config.fifo_space.max(1),
                OUT_FIFO_WORDS => st.interp.output_words() as u32,
                IN_DMA_ADDRESS => st.dma_address,
                IN_DMA_COUNT => st.pending.map_or(0, |p| p.count),
                ERROR_FLAGS => st.error_flags,
                DMA_CONTROL => st.dma_control,
                FIFO_DISCON => {
                    let active = if st.pending.is_some() { FIFODISCON_GP_ACTIVE } else { 0 };
                    st.fifo_discon | active
                }
                FIFO_INTERFACE => st.interp.pop_output().unwrap_or(0),
                VB_END => self.config.vblank_lines,
                LINE_COUNT => (st.ticks % self.config.vsync_period as u64) as u32,
                _ => 0,
            };
            (value, raised)
        };
        if raised {
            self.deliver_interrupt();
        }
        value
    }

    fn write32(&self, offset: u32, value: u32) {
        let raised = {
            let mut st = self.state.lock();
            match offset {
                INT_ENABLE => {
                    st.int_enable = value;
                    Self::irq_pending(&st)
                }
                INT_FLAGS => {
                    st.int_flags &= !value;
                    false
                }
                ERROR_FLAGS => {
                    st.error_flags &= !value;
                    false
                }
                IN_DMA_ADDRESS => {
                    st.dma_address = value;
                    false
                }
                IN_DMA_COUNT => {
                    if value != 0 {
                        if st.pending.is_some() {
                            self.overlapped_starts.fetch_add(1, Ordering::Relaxed);
                        }
                        let ticks_left = self.latency(&mut st.rng);
                        st.pending = Some(PendingDma {
                            address: st.dma_address,
                            count: value,
                            ticks_left,
                        });
                    }
                    false
                }
                DMA_CONTROL => {
                    st.dma_control = value;
                    false
                }
                FIFO_DISCON => {
                    st.fifo_discon = value & !FIFODISCON_GP_ACTIVE;
                    false
                }
                FIFO_INTERFACE => {
                    st.interp.feed(value);
                    false
                }
                _ => false,
            }
        };
        if raised {
            self.deliver_interrupt();
        }
    }

    fn stall_us(&self, us: u32) {
        if self.config.threaded_completion {
            relax();
            return;
        }
        for _ in 0..us.max(1) {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_limits_and_lookup() {
        let allocator = SimAllocator::with_limit(64);
        let buf = allocator.allocate(4096).unwrap();
        assert_eq!(buf.len(), 16);
        buf.words()[2].store(0xabcd, Ordering::Relaxed);
        assert_eq!(allocator.read_words(buf.phys() + 8, 1), Some(alloc::vec![0xabcd]));
        assert!(allocator.read_words(buf.phys() + 60, 2).is_none());
        allocator.free(buf);
        assert_eq!(allocator.live_buffers(), 0);
        assert!(SimAllocator::with_limit(2).allocate(16).is_none());
    }

    #[test]
    fn test_dma_completes_after_latency() {
        let allocator = Arc::new(SimAllocator::new());
        let chip = SimChip::new(
            SimConfig { latency: Latency::Fixed(3), ..SimConfig::default() },
            allocator.clone(),
        );
        let buf = allocator.allocate(64).unwrap();
        buf.words()[0].store(tag::FB_WRITE_DATA, Ordering::Relaxed);
        buf.words()[1].store(42, Ordering::Relaxed);

        chip.write32(IN_DMA_ADDRESS, buf.phys() as u32);
        chip.write32(IN_DMA_COUNT, 2);
        assert!(!chip.region_is_retired(buf.phys(), 1));
        assert_eq!(chip.read32(IN_DMA_COUNT), 2);
        assert_eq!(chip.read32(IN_DMA_COUNT), 2);
        assert_eq!(chip.read32(IN_DMA_COUNT), 0);
        assert_eq!(chip.register(tag::FB_WRITE_DATA), 42);
        assert_ne!(chip.read32(INT_FLAGS) & INTR_DMA, 0);
        chip.write32(INT_FLAGS, INTR_DMA);
        assert_eq!(chip.read32(INT_FLAGS) & INTR_DMA, 0);
        assert_eq!(chip.overlapped_starts(), 0);
    }

    #[test]
    fn test_interrupt_delivered_when_enabled() {
        let chip = SimChip::new(
            SimConfig { latency: Latency::Fixed(1), ..SimConfig::default() },
            Arc::new(SimAllocator::new()),
        );
        let seen = Arc::new(AtomicU32::new(0));
        let s = seen.clone();
        chip.set_isr(move |regs| {
            s.fetch_add(1, Ordering::Relaxed);
            regs.write32(INT_FLAGS, INTR_VSYNC);
            true
        });
        for _ in 0..999 {
            chip.step();
        }
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        chip.step();
        // Flag raised but masked
        assert_eq!(seen.load(Ordering::Relaxed), 0);
        chip.write32(INT_ENABLE, INTR_VSYNC);
        assert_eq!(seen.load(Ordering::Relaxed), 1);
        assert_eq!(chip.read32(INT_FLAGS) & INTR_VSYNC, 0);
    }

    #[test]
    fn test_line_counter_wraps_per_frame() {
        let chip = SimChip::new(
            SimConfig { vsync_period: 100, ..SimConfig::default() },
            Arc::new(SimAllocator::new()),
        );
        let lines: Vec<u32> = (0..250).map(|_| chip.read32(LINE_COUNT)).collect();
        assert!(lines.iter().all(|&l| l < 100));
        assert_eq!(lines[0], 1);
        assert_eq!(lines[99], 0);
    }

    #[test]
    fn test_xorshift_is_deterministic() {
        let mut a = XorShift64::new(7);
        let mut b = XorShift64::new(7);
        assert_eq!(a.next(), b.next());
        assert_ne!(XorShift64::new(0).next(), 0);
    }
}
