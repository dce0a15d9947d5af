//! Display device
//!
//! One enabled display instance: its handle on the shared command
//! transport, its configuration, the framebuffer window it draws into and
//! what the area stipple unit currently holds. The drawing entry points
//! return `false` when the call has to be rendered by a fallback.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::clip::ClipRegion;
use crate::config::DisplayConfig;
use crate::dma::{P2Dma, SharedDma};
use crate::fill::{Fill, FillEngine, StippleCache};
use crate::fixed::PointFix;
use crate::hw::DeviceRegisters;
use crate::lines::strips::{initialize_strips, reset_strips, StripSetup};
use crate::lines::style::{LineState, ResolvedStyle};
use crate::lines::{LineRenderer, LineStyle};
use crate::rop::{rop4_to_logic_ops, LogicOp};

pub struct DisplayDevice {
    dma: P2Dma,
    config: DisplayConfig,
    /// Pixel offset of the surface being drawn, added by the chip
    window_base: u32,
    stipple: StippleCache,
}

impl DisplayDevice {
    /// Attach to the chip behind `regs`. The first device on a chip brings
    /// the transport up.
    pub fn enable(
        shared: &Arc<SharedDma>,
        regs: Arc<dyn DeviceRegisters>,
        config: DisplayConfig,
    ) -> Result<DisplayDevice, &'static str> {
        let dma = P2Dma::initialize(shared, regs, &config)?;
        crate::log!(
            "[DISP] enabled: {} bpp, {}",
            config.pel_size * 8,
            if dma.is_emulated() { "emulated transport" } else { "DMA" }
        );
        Ok(DisplayDevice {
            dma,
            config,
            window_base: 0,
            stipple: StippleCache::new(),
        })
    }

    /// Drain outstanding work and detach from the transport
    pub fn disable(self) {
        crate::log!("[DISP] disable");
        self.dma.detach();
    }

    #[inline]
    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    #[inline]
    pub fn dma(&self) -> &P2Dma {
        &self.dma
    }

    /// Draw into the surface starting `base` pixels into the framebuffer
    pub fn set_window_base(&mut self, base: u32) {
        self.window_base = base;
    }

    /// Something other than this device loaded the stipple registers
    pub fn invalidate_brush(&mut self) {
        self.stipple.invalidate();
    }

    pub fn stipple_cache(&self) -> &StippleCache {
        &self.stipple
    }

    /// Stroke the polyline `points` (28.4). `closed` adds the edge back to
    /// the first point. The style state is updated for the next call.
    pub fn stroke_path(
        &mut self,
        points: &[PointFix],
        closed: bool,
        color: u32,
        rop4: u32,
        clip: &ClipRegion<'_>,
        style: Option<&mut LineStyle<'_>>,
    ) -> bool {
        let Some((logic_op, _)) = rop4_to_logic_ops(rop4) else {
            crate::log_trace!("[LINES] rop4 {:#06x} reads the source", rop4);
            return false;
        };

        let mut state = match style.as_deref() {
            None => None,
            Some(s) => match LineState::resolve(s) {
                None => {
                    crate::log_trace!("[LINES] unusable style");
                    return false;
                }
                Some(ResolvedStyle::Invisible) => return true,
                Some(ResolvedStyle::Solid) => None,
                Some(ResolvedStyle::Styled(ls)) => Some(ls),
            },
        };
        if points.len() < 2 {
            return true;
        }
        if matches!(clip, ClipRegion::Complex(rects) if rects.is_empty()) {
            return true;
        }

        let closing: Vec<PointFix>;
        let path = if closed {
            closing = points.iter().chain(points.first()).copied().collect();
            &closing[..]
        } else {
            points
        };

        let scissor = match clip {
            ClipRegion::Rect(r) => Some(*r),
            _ => None,
        };
        let setup = StripSetup { logic_op, color, window_base: self.window_base, clip: scissor };
        initialize_strips(&self.dma, &setup);
        let renderer = LineRenderer {
            dma: &self.dma,
            conformant: self.config.conformant_lines,
            half_flip: self.config.diagonal_strips,
            reads_dest: logic_op.reads_dest(),
        };
        renderer.stroke(path, clip, state.as_mut());
        reset_strips(&self.dma);
        self.dma.flush();

        if let (Some(style), Some(ls)) = (style, state) {
            style.state = ls.reported_state();
        }
        true
    }

    /// Fill the polygon `points` (28.4, implicitly closed)
    pub fn fill_polygon(&mut self, points: &[PointFix], fill: Fill<'_>, rop4: u32, clip: &ClipRegion<'_>) -> bool {
        let Some((fg_op, bg_op)) = rop4_to_logic_ops(rop4) else {
            crate::log_trace!("[FILL] rop4 {:#06x} reads the source", rop4);
            return false;
        };
        // A solid fill has no background pixels
        let bg_op = match fill {
            Fill::Solid(_) => fg_op,
            Fill::Brush(..) => bg_op,
        };
        let mut engine = FillEngine {
            dma: &self.dma,
            config: &self.config,
            window_base: self.window_base,
            stipple: &mut self.stipple,
        };
        let handled = engine.fill(points, fill, fg_op, bg_op, clip);
        if handled {
            self.dma.flush();
        }
        handled
    }

    /// Return once the chip has executed everything queued so far
    pub fn sync(&self) {
        self.dma.sync_with_chip();
    }

    /// Whether `rop4` has a logic-op form usable by the drawing entry points
    pub fn supports_rop(rop4: u32) -> bool {
        matches!(rop4_to_logic_ops(rop4), Some((fg, bg)) if fg == bg || bg == LogicOp::Noop)
    }
}
