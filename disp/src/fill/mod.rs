//! Polygon Fill Engine
//!
//! Non-complex polygons (one downward and one upward run around the outline)
//! are decomposed into hardware trapezoids:
//!
//! ```text
//!   walk outline ──► complex? ──────────────────────► punt
//!        │
//!        ├─ all y integer, in range ──► trapezoids, left/right edge walk
//!        │                              from the top vertex
//!        └─ fractional y ─────────────► span DDA (spans.rs), trivial clip only
//! ```
//!
//! Every feasibility check runs before the first command word is reserved:
//! a punt leaves the command stream untouched and the caller falls back to
//! a software renderer.

pub mod brush;
mod spans;

use crate::clip::{ClipRegion, Rect};
use crate::config::DisplayConfig;
use crate::dma::P2Dma;
use crate::fixed::{fix_to_fixed, PointFix, PointL, NEARLY_ONE};
use crate::regs::*;
use crate::rop::LogicOp;

use self::brush::{brush_passes, Pass};

pub use self::brush::{BrushId, MonoBrush, StippleCache};

/// Most clip rectangles a fill re-renders the polygon for
pub const CLIP_LIMIT: usize = 50;

// Trapezoid path bounds on non-negative coordinates (pixels)
const MAX_TRAPEZOID_X: u32 = 2047;
const MAX_TRAPEZOID_Y: u32 = 1023;

/// What a polygon is filled with
#[derive(Debug, Clone, Copy)]
pub enum Fill<'a> {
    Solid(u32),
    /// Pattern with pixel (0, 0) aligned to the origin
    Brush(&'a MonoBrush, PointL),
}

/// Rasterizer path chosen for a polygon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FillPath {
    Trapezoids,
    Spans,
}

/// Mode words a fill loads before rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FillMode {
    /// Register the pass color goes to
    pub(super) color_reg: u32,
    pub(super) render: u32,
    color_dda: u32,
    read_mode: u32,
    logic_mode: u32,
}

impl FillMode {
    /// `block_fill` uses the fast fill unit and is only valid for COPY
    fn new(op: LogicOp, block_fill: bool, stippled: bool) -> Self {
        let stipple = if stippled { RENDER_AREA_STIPPLE_ENABLE } else { 0 };
        if op == LogicOp::Copy {
            let (color_reg, fast) = if block_fill {
                (tag::FB_BLOCK_COLOR, RENDER_FAST_FILL_ENABLE)
            } else {
                (tag::FB_WRITE_DATA, 0)
            };
            Self {
                color_reg,
                render: RENDER_TRAPEZOID_PRIMITIVE | fast | stipple,
                color_dda: DISABLE,
                read_mode: DISABLE,
                logic_mode: CONSTANT_FB_WRITE,
            }
        } else {
            Self {
                color_reg: tag::CONSTANT_COLOR,
                render: RENDER_TRAPEZOID_PRIMITIVE | stipple,
                color_dda: COLOR_DDA_FLAT_SHADE,
                read_mode: if op.reads_dest() { FBREAD_DEST_ENABLE } else { DISABLE },
                logic_mode: enabled_logical_op(op.bits()),
            }
        }
    }
}

/// Topmost vertex and the OR of every coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Outline {
    pub top: usize,
    pub or_x: u32,
    pub or_y: u32,
}

struct Walk<'a> {
    points: &'a [PointFix],
    or_x: u32,
    or_y: u32,
    edges_left: usize,
}

impl Walk<'_> {
    #[inline]
    fn y(&self, i: usize) -> i32 {
        self.points[i].y
    }

    /// Visit point `i`; true once every edge has been walked
    #[inline]
    fn take(&mut self, i: usize) -> bool {
        self.or_x |= self.points[i].x as u32;
        self.or_y |= self.points[i].y as u32;
        self.edges_left -= 1;
        self.edges_left == 0
    }

    fn outline(&self, top: usize) -> Option<Outline> {
        Some(Outline { top, or_x: self.or_x, or_y: self.or_y })
    }
}

/// Walk the outline once. A non-complex polygon runs down, up, then down
/// again no lower than the first point (or the mirror image). Flat edges
/// continue whichever run they are in.
pub(crate) fn classify(points: &[PointFix]) -> Option<Outline> {
    debug_assert!(points.len() >= 2);
    let mut w = Walk {
        points,
        or_x: points[0].x as u32,
        or_y: points[0].y as u32,
        edges_left: points.len() - 1,
    };
    let first_y = points[0].y;
    let mut scan = 0;
    let mut top = 0;

    if w.y(1) > w.y(0) {
        // Down
        loop {
            scan += 1;
            if w.take(scan) {
                return w.outline(top);
            }
            if w.y(scan + 1) < w.y(scan) {
                break;
            }
        }
        // Up
        loop {
            scan += 1;
            if w.take(scan) {
                if w.y(scan) < w.y(top) {
                    top = scan;
                }
                return w.outline(top);
            }
            if w.y(scan + 1) > w.y(scan) {
                break;
            }
        }
        // Down again, never below the first point
        top = scan;
        loop {
            if w.y(scan + 1) > first_y {
                break;
            }
            scan += 1;
            if w.take(scan) {
                return w.outline(top);
            }
            if w.y(scan + 1) < w.y(scan) {
                break;
            }
        }
    } else {
        // Up
        loop {
            top += 1;
            if w.take(top) {
                return w.outline(top);
            }
            if w.y(top + 1) > w.y(top) {
                break;
            }
        }
        // Down
        scan = top;
        loop {
            scan += 1;
            if w.take(scan) {
                return w.outline(top);
            }
            if w.y(scan + 1) < w.y(scan) {
                break;
            }
        }
        // Up again, never above the first point
        loop {
            if w.y(scan + 1) < first_y {
                break;
            }
            scan += 1;
            if w.take(scan) {
                return w.outline(top);
            }
            if w.y(scan + 1) > w.y(scan) {
                break;
            }
        }
    }
    None
}

/// Pick the rasterizer for a classified polygon, or `None` if the
/// coordinates do not fit the trapezoid registers
pub(crate) fn choose_path(points: &[PointFix], outline: &Outline) -> Option<FillPath> {
    if outline.or_y & 0xffff_c00f == 0 && outline.or_x & 0xffff_8000 == 0 {
        return Some(FillPath::Trapezoids);
    }
    if outline.or_y & 0xf != 0 {
        return Some(FillPath::Spans);
    }

    // Integer y somewhere outside the cheap window: look at magnitudes
    let mut neg = 0u32;
    let mut pos_x = 0u32;
    let mut pos_y = 0u32;
    for p in points {
        for (v, pos) in [(p.x, &mut pos_x), (p.y, &mut pos_y)] {
            if v < 0 {
                neg |= v.unsigned_abs();
            } else {
                *pos |= v as u32;
            }
        }
    }
    if neg & 0xffff_f000 != 0 {
        return None;
    }
    // Limits are in whole pixels. Comparing the raw 28.4 OR against 2047/1023
    // would reject anything past x = 127 or y = 63.
    if (pos_x >> 4) > MAX_TRAPEZOID_X || (pos_y >> 4) > MAX_TRAPEZOID_Y {
        return None;
    }
    Some(FillPath::Trapezoids)
}

/// 16.16 x step per scanline and the scanline count of an integer-y edge
#[inline]
fn edge_slope(from: PointFix, to: PointFix) -> (u32, u32) {
    let dx = ((to.x - from.x) as i64) << 12;
    let dy = ((to.y - from.y) as i64) >> 4;
    (dx.div_euclid(dy) as u32, dy as u32)
}

#[inline]
fn start_x(p: PointFix) -> u32 {
    fix_to_fixed(p.x).wrapping_add(NEARLY_ONE) as u32
}

/// Trapezoid decomposition of an integer-y polygon
fn fill_trapezoids(dma: &P2Dma, points: &[PointFix], top: usize, render: u32) {
    let n = points.len();
    let prev = |i: usize| (i + n - 1) % n;
    let next = |i: usize| (i + 1) % n;
    let y = |i: usize| points[i].y;

    let mut nl = top;
    let mut nr = top;
    loop {
        // Skip flat edges on both sides
        let mut tl;
        loop {
            tl = nl;
            nl = prev(tl);
            if nl == nr {
                return;
            }
            if y(tl) != y(nl) {
                break;
            }
        }
        let mut tr;
        loop {
            tr = nr;
            nr = next(tr);
            if y(tr) != y(nr) {
                break;
            }
        }

        let (dl, dyl) = edge_slope(points[tl], points[nl]);
        let (dr, dyr) = edge_slope(points[tr], points[nr]);
        let mut cursor = dma.reserve(14);
        cursor.push(tag::START_X_DOM, start_x(points[tl]));
        cursor.push(tag::START_X_SUB, start_x(points[tr]));
        cursor.push(tag::START_Y, fix_to_fixed(points[tr].y) as u32);
        cursor.push(tag::D_X_DOM, dl);
        cursor.push(tag::D_X_SUB, dr);
        cursor.push(tag::COUNT, if y(nl) < y(nr) { dyl } else { dyr });
        cursor.push(tag::RENDER, render);
        dma.commit(cursor);

        while nl != nr && y(nl) != y(nr) {
            if y(nl) < y(nr) {
                // Left edge ran out first
                loop {
                    tl = nl;
                    nl = prev(tl);
                    if y(tl) != y(nl) {
                        break;
                    }
                }
                let (dl, dyl) = edge_slope(points[tl], points[nl]);
                let count = if y(nl) < y(nr) { dyl } else { (y(nr) - y(tl)).unsigned_abs() >> 4 };
                let mut cursor = dma.reserve(6);
                cursor.push(tag::START_X_DOM, start_x(points[tl]));
                cursor.push(tag::D_X_DOM, dl);
                cursor.push(tag::CONTINUE_NEW_DOM, count);
                dma.commit(cursor);
            } else {
                loop {
                    tr = nr;
                    nr = next(tr);
                    if y(tr) != y(nr) {
                        break;
                    }
                }
                let (dr, dyr) = edge_slope(points[tr], points[nr]);
                let count = if y(nr) < y(nl) { dyr } else { (y(nl) - y(tr)).unsigned_abs() >> 4 };
                let mut cursor = dma.reserve(6);
                cursor.push(tag::START_X_SUB, start_x(points[tr]));
                cursor.push(tag::D_X_SUB, dr);
                cursor.push(tag::CONTINUE_NEW_SUB, count);
                dma.commit(cursor);
            }
        }
        if nl == nr {
            return;
        }
    }
}

/// Put the registers a fill disturbs back to what the other primitives
/// expect
fn reset_fill(dma: &P2Dma, clipped: bool) {
    let mut cursor = dma.reserve(14);
    if clipped {
        cursor.push(tag::SCISSOR_MODE, SCREEN_SCISSOR_DEFAULT);
    }
    cursor.push(tag::COLOR_DDA_MODE, DISABLE);
    cursor.push(tag::D_Y, 1 << 16);
    cursor.push(tag::CONTINUE, 0);
    cursor.push(tag::CONTINUE_NEW_DOM, 0);
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_X_SUB, 0);
    dma.commit(cursor);
}

/// Fills polygons for one device
pub(crate) struct FillEngine<'a> {
    pub dma: &'a P2Dma,
    pub config: &'a DisplayConfig,
    pub window_base: u32,
    pub stipple: &'a mut StippleCache,
}

impl FillEngine<'_> {
    /// Fill the polygon `points` (28.4, implicitly closed). `fg_op` draws
    /// solid fills and brush foregrounds, `bg_op` brush backgrounds.
    /// Returns false, with nothing emitted, when the polygon has to be
    /// filled some other way.
    pub fn fill(&mut self, points: &[PointFix], fill: Fill<'_>, fg_op: LogicOp, bg_op: LogicOp, clip: &ClipRegion<'_>) -> bool {
        if points.len() < 3 {
            // Nothing inside
            return true;
        }
        let Some(outline) = classify(points) else {
            crate::log_trace!("[FILL] complex polygon, {} points", points.len());
            return false;
        };
        let Some(path) = choose_path(points, &outline) else {
            crate::log_debug!("[FILL] coordinates out of range");
            return false;
        };
        if matches!(fill, Fill::Brush(..)) && bg_op != fg_op && bg_op != LogicOp::Noop {
            crate::log_trace!("[FILL] brush rop pair {:?}/{:?}", fg_op, bg_op);
            return false;
        }
        let rects = clip.rects();
        if rects.len() > CLIP_LIMIT {
            crate::log_trace!("[FILL] {} clip rects", rects.len());
            return false;
        }
        if matches!(clip, ClipRegion::Complex(_)) && rects.is_empty() {
            return true;
        }
        if path == FillPath::Spans && !clip.is_trivial() {
            crate::log_trace!("[FILL] clipped span fill");
            return false;
        }

        self.render(points, outline.top, path, fill, fg_op, bg_op, clip);
        true
    }

    /// Emit a fill that already passed every check
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn render(
        &mut self,
        points: &[PointFix],
        top: usize,
        path: FillPath,
        fill: Fill<'_>,
        fg_op: LogicOp,
        bg_op: LogicOp,
        clip: &ClipRegion<'_>,
    ) {
        let dma = self.dma;
        let rects = clip.rects();
        let clipped = !clip.is_trivial();

        let mut cursor = dma.reserve(2);
        cursor.push(tag::FB_WINDOW_BASE, self.window_base);
        dma.commit(cursor);

        let (mode, passes, count) = match fill {
            Fill::Solid(color) => {
                let block = fg_op == LogicOp::Copy && !clipped;
                let color = if block { self.config.replicate_color(color) } else { color };
                let pass = Pass { color, stipple: None };
                (FillMode::new(fg_op, block, false), [pass, pass], 1)
            }
            Fill::Brush(brush, origin) => {
                let stipple_mode = self.stipple.realize(dma, brush, origin);
                let (passes, count) = brush_passes(brush, stipple_mode, fg_op, bg_op);
                (FillMode::new(fg_op, false, true), passes, count)
            }
        };
        let passes = &passes[..count];

        let mut cursor = dma.reserve(12);
        cursor.push(tag::COLOR_DDA_MODE, mode.color_dda);
        cursor.push(tag::FB_READ_MODE, mode.read_mode);
        cursor.push(tag::LOGICAL_OP_MODE, mode.logic_mode);
        if clipped {
            cursor.push(tag::SCISSOR_MODE, SCREEN_SCISSOR_DEFAULT | USER_SCISSOR_ENABLE);
        }
        if let [pass] = passes {
            cursor.push(mode.color_reg, pass.color);
            if let Some(stipple) = pass.stipple {
                cursor.push(tag::AREA_STIPPLE_MODE, stipple);
            }
        }
        dma.commit(cursor);

        crate::log_trace!("[FILL] {} points {:?} passes {} clip rects {}", points.len(), path, passes.len(), rects.len());

        match path {
            FillPath::Trapezoids => {
                if rects.is_empty() {
                    self.trapezoid_passes(points, top, &mode, passes);
                }
                for rect in rects {
                    load_scissor(dma, rect);
                    self.trapezoid_passes(points, top, &mode, passes);
                }
            }
            FillPath::Spans => spans::fill_spans(dma, points, top, &mode, passes),
        }

        reset_fill(dma, clipped);
    }

    fn trapezoid_passes(&self, points: &[PointFix], top: usize, mode: &FillMode, passes: &[Pass]) {
        for pass in passes {
            if passes.len() > 1 {
                let mut cursor = self.dma.reserve(4);
                cursor.push(mode.color_reg, pass.color);
                cursor.push(tag::AREA_STIPPLE_MODE, pass.stipple.unwrap_or(DISABLE));
                self.dma.commit(cursor);
            }
            fill_trapezoids(self.dma, points, top, mode.render);
        }
    }
}

fn load_scissor(dma: &P2Dma, rect: &Rect) {
    let mut cursor = dma.reserve(4);
    cursor.push(tag::SCISSOR_MIN_XY, scissor_xy(rect.left, rect.top));
    cursor.push(tag::SCISSOR_MAX_XY, scissor_xy(rect.right, rect.bottom));
    dma.commit(cursor);
}
