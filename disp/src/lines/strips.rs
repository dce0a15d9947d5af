//! Strip drawers
//!
//! The DDA hands over batches of run lengths. Each drawer replays a batch
//! with the trapezoid or line primitive and returns the position where the
//! next batch starts.
//!
//! ```text
//!   SolidHorizontal          one-row trapezoid, extended a run at a time
//!   SolidVertical            one-column trapezoid, one run per column
//!   SolidDiagonalHorizontal  diagonal line per run (half-flipped x-major)
//!   SolidDiagonalVertical    slanted trapezoid (half-flipped y-major)
//!   StyledHorizontal         line per dash, runs along x
//!   StyledVertical           line per dash, runs along y
//! ```

use crate::clip::Rect;
use crate::dma::P2Dma;
use crate::fixed::PointL;
use crate::regs::*;
use crate::rop::LogicOp;

use super::style::LineState;

/// Runs held before a batch is drawn
pub(crate) const STRIP_MAX: usize = 100;

const ONE: u32 = 1 << 16;

#[inline]
fn fixed(v: i32) -> u32 {
    (v as u32) << 16
}

/// One batch of runs
pub(crate) struct Strip {
    /// First pixel of the batch, in device coordinates
    pub start: PointL,
    /// +1 when the line runs down the screen, -1 when it runs up
    pub y_dir: i32,
    lens: [i32; STRIP_MAX],
    count: usize,
}

impl Strip {
    pub fn new(start: PointL, y_dir: i32) -> Self {
        Self { start, y_dir, lens: [0; STRIP_MAX], count: 0 }
    }

    #[inline]
    pub fn push(&mut self, len: i32) {
        self.lens[self.count] = len;
        self.count += 1;
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.count == STRIP_MAX
    }

    pub fn lens(&self) -> &[i32] {
        &self.lens[..self.count]
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StripDrawer {
    SolidHorizontal,
    SolidVertical,
    SolidDiagonalHorizontal,
    SolidDiagonalVertical,
    StyledHorizontal,
    StyledVertical,
}

impl StripDrawer {
    /// Drawer for a normalized line: `flip_d` when y is the major axis,
    /// `half_flip` when runs are measured along the diagonal
    pub fn select(flip_d: bool, half_flip: bool, styled: bool) -> Self {
        match (styled, flip_d, half_flip) {
            (true, false, _) => StripDrawer::StyledHorizontal,
            (true, true, _) => StripDrawer::StyledVertical,
            (false, false, false) => StripDrawer::SolidHorizontal,
            (false, true, false) => StripDrawer::SolidVertical,
            (false, false, true) => StripDrawer::SolidDiagonalHorizontal,
            (false, true, true) => StripDrawer::SolidDiagonalVertical,
        }
    }

    /// Draw the batch and move `strip.start` past it
    pub fn draw(self, dma: &P2Dma, strip: &mut Strip, style: Option<&mut LineState>) {
        if strip.lens().is_empty() {
            return;
        }
        strip.start = match (self, style) {
            (StripDrawer::SolidHorizontal, _) => solid_horizontal(dma, strip),
            (StripDrawer::SolidVertical, _) => solid_vertical(dma, strip),
            (StripDrawer::SolidDiagonalHorizontal, _) => solid_diagonal_horizontal(dma, strip),
            (StripDrawer::SolidDiagonalVertical, _) => solid_diagonal_vertical(dma, strip),
            (StripDrawer::StyledHorizontal, Some(ls)) => styled(dma, strip, ls, true),
            (StripDrawer::StyledVertical, Some(ls)) => styled(dma, strip, ls, false),
            (_, None) => {
                debug_assert!(false, "styled drawer without a line state");
                return;
            }
        };
        strip.clear();
    }
}

fn solid_horizontal(dma: &P2Dma, strip: &Strip) -> PointL {
    let PointL { x, y } = strip.start;
    let lens = strip.lens();
    let mut cur = x + lens[0];

    let mut cursor = dma.reserve(16);
    cursor.push(tag::START_X_DOM, fixed(x));
    cursor.push(tag::START_Y, fixed(y));
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_X_SUB, 0);
    cursor.push(tag::D_Y, fixed(strip.y_dir));
    cursor.push(tag::START_X_SUB, fixed(cur));
    cursor.push(tag::COUNT, 1);
    cursor.push(tag::RENDER, RENDER_TRAPEZOID_PRIMITIVE);
    dma.commit(cursor);

    // Alternate which edge moves so each row spans exactly one run
    for (i, &len) in lens[1..].iter().enumerate() {
        cur += len;
        let mut cursor = dma.reserve(4);
        if i % 2 == 0 {
            cursor.push(tag::START_X_DOM, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_DOM, 1);
        } else {
            cursor.push(tag::START_X_SUB, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_SUB, 1);
        }
        dma.commit(cursor);
    }

    if strip.y_dir < 0 {
        let mut cursor = dma.reserve(2);
        cursor.push(tag::D_Y, ONE);
        dma.commit(cursor);
    }
    PointL::new(cur, y + strip.y_dir * lens.len() as i32)
}

fn solid_vertical(dma: &P2Dma, strip: &Strip) -> PointL {
    let PointL { x, y } = strip.start;
    let lens = strip.lens();
    let mut cur = x + 1;

    let mut cursor = dma.reserve(16);
    cursor.push(tag::START_X_DOM, fixed(x));
    cursor.push(tag::START_Y, fixed(y));
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_X_SUB, 0);
    cursor.push(tag::D_Y, fixed(strip.y_dir));
    cursor.push(tag::START_X_SUB, fixed(cur));
    cursor.push(tag::COUNT, lens[0] as u32);
    cursor.push(tag::RENDER, RENDER_TRAPEZOID_PRIMITIVE);
    dma.commit(cursor);

    for (i, &len) in lens[1..].iter().enumerate() {
        cur += 1;
        let mut cursor = dma.reserve(4);
        if i % 2 == 0 {
            cursor.push(tag::START_X_DOM, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_DOM, len as u32);
        } else {
            cursor.push(tag::START_X_SUB, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_SUB, len as u32);
        }
        dma.commit(cursor);
    }

    let mut cursor = dma.reserve(2);
    cursor.push(tag::D_Y, ONE);
    dma.commit(cursor);

    let total: i32 = lens.iter().sum();
    PointL::new(cur, y + total * strip.y_dir)
}

fn solid_diagonal_horizontal(dma: &P2Dma, strip: &Strip) -> PointL {
    let PointL { mut x, mut y } = strip.start;

    let mut cursor = dma.reserve(6);
    cursor.push(tag::D_X_DOM, ONE);
    cursor.push(tag::D_X_SUB, ONE);
    cursor.push(tag::D_Y, fixed(strip.y_dir));
    dma.commit(cursor);

    for &len in strip.lens() {
        let mut cursor = dma.reserve(8);
        cursor.push(tag::START_X_DOM, fixed(x));
        cursor.push(tag::START_Y, fixed(y));
        cursor.push(tag::COUNT, len as u32);
        cursor.push(tag::RENDER, RENDER_LINE_PRIMITIVE);
        dma.commit(cursor);
        x += len;
        y += (len - 1) * strip.y_dir;
    }

    restore_deltas(dma);
    PointL::new(x, y)
}

fn solid_diagonal_vertical(dma: &P2Dma, strip: &Strip) -> PointL {
    let PointL { x, y } = strip.start;
    let lens = strip.lens();
    let mut cur = x + lens[0] - 1;

    let mut cursor = dma.reserve(16);
    cursor.push(tag::D_X_DOM, ONE);
    cursor.push(tag::D_X_SUB, ONE);
    cursor.push(tag::D_Y, fixed(strip.y_dir));
    cursor.push(tag::START_Y, fixed(y));
    cursor.push(tag::START_X_DOM, fixed(x + 1));
    cursor.push(tag::START_X_SUB, fixed(x));
    cursor.push(tag::COUNT, lens[0] as u32);
    cursor.push(tag::RENDER, RENDER_TRAPEZOID_PRIMITIVE);
    dma.commit(cursor);

    for (i, &len) in lens[1..].iter().enumerate() {
        let mut cursor = dma.reserve(4);
        if i % 2 == 0 {
            cursor.push(tag::START_X_DOM, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_DOM, len as u32);
        } else {
            cursor.push(tag::START_X_SUB, fixed(cur));
            cursor.push(tag::CONTINUE_NEW_SUB, len as u32);
        }
        dma.commit(cursor);
        cur += len - 1;
    }

    restore_deltas(dma);
    let total: i32 = lens.iter().sum();
    PointL::new(cur, y + total * strip.y_dir)
}

fn restore_deltas(dma: &P2Dma) {
    let mut cursor = dma.reserve(6);
    cursor.push(tag::D_X_DOM, 0);
    cursor.push(tag::D_X_SUB, 0);
    cursor.push(tag::D_Y, ONE);
    dma.commit(cursor);
}

/// Dashes along the runs. The dash/gap cursor lives in the line state so
/// the pattern carries over between batches and lines.
fn styled(dma: &P2Dma, strip: &Strip, ls: &mut LineState, horizontal: bool) -> PointL {
    let PointL { mut x, mut y } = strip.start;
    let y_dir = strip.y_dir;

    let mut cursor = dma.reserve(6);
    if horizontal {
        cursor.push(tag::D_X_DOM, ONE);
        cursor.push(tag::D_Y, 0);
    } else {
        cursor.push(tag::D_X_DOM, 0);
        cursor.push(tag::D_X_SUB, 0);
        cursor.push(tag::D_Y, fixed(y_dir));
    }
    dma.commit(cursor);

    let mut remaining = ls.sp_remaining;
    let mut gap = ls.gap;
    for &len in strip.lens() {
        let mut left = len as i64;
        while left > 0 {
            let n = left.min(remaining);
            if !gap {
                let mut cursor = dma.reserve(8);
                cursor.push(tag::START_X_DOM, fixed(x));
                cursor.push(tag::START_Y, fixed(y));
                cursor.push(tag::COUNT, n as u32);
                cursor.push(tag::RENDER, RENDER_LINE_PRIMITIVE);
                dma.commit(cursor);
            }
            remaining -= n;
            left -= n;
            if horizontal {
                x += n as i32;
            } else {
                y += n as i32 * y_dir;
            }
            if remaining == 0 {
                gap = !gap;
                remaining = ls.next_run();
            }
        }
        if horizontal {
            y += y_dir;
        } else {
            x += 1;
        }
    }
    ls.sp_remaining = remaining;
    ls.gap = gap;

    let mut cursor = dma.reserve(4);
    if horizontal {
        cursor.push(tag::D_X_DOM, 0);
    }
    cursor.push(tag::D_Y, ONE);
    dma.commit(cursor);
    PointL::new(x, y)
}

/// Render state shared by every line of one stroke
pub(crate) struct StripSetup {
    pub logic_op: LogicOp,
    pub color: u32,
    pub window_base: u32,
    /// Loaded into the user scissor
    pub clip: Option<Rect>,
}

/// Load the stroke's render state. Returns true when the color DDA mode was
/// changed and has to be put back by `reset_strips`.
pub(crate) fn initialize_strips(dma: &P2Dma, setup: &StripSetup) -> bool {
    let mut cursor = dma.reserve(16);
    cursor.push(tag::FB_WINDOW_BASE, setup.window_base);

    let changed_dda = if setup.logic_op == LogicOp::Copy {
        cursor.push(tag::LOGICAL_OP_MODE, CONSTANT_FB_WRITE);
        cursor.push(tag::FB_READ_MODE, DISABLE);
        cursor.push(tag::FB_WRITE_DATA, setup.color);
        false
    } else {
        let read_mode = if setup.logic_op.reads_dest() { FBREAD_DEST_ENABLE } else { DISABLE };
        cursor.push(tag::COLOR_DDA_MODE, COLOR_DDA_FLAT_SHADE);
        cursor.push(tag::LOGICAL_OP_MODE, enabled_logical_op(setup.logic_op.bits()));
        cursor.push(tag::FB_READ_MODE, read_mode);
        cursor.push(tag::CONSTANT_COLOR, setup.color);
        true
    };

    if let Some(clip) = setup.clip {
        cursor.push(tag::SCISSOR_MODE, SCREEN_SCISSOR_DEFAULT | USER_SCISSOR_ENABLE);
        cursor.push(tag::SCISSOR_MIN_XY, scissor_xy(clip.left, clip.top));
        cursor.push(tag::SCISSOR_MAX_XY, scissor_xy(clip.right, clip.bottom));
    }
    dma.commit(cursor);
    changed_dda
}

/// Put scissor and color DDA back to their defaults
pub(crate) fn reset_strips(dma: &P2Dma) {
    let mut cursor = dma.reserve(4);
    cursor.push(tag::SCISSOR_MODE, SCREEN_SCISSOR_DEFAULT);
    cursor.push(tag::COLOR_DDA_MODE, DISABLE);
    dma.commit(cursor);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_drawer() {
        assert_eq!(StripDrawer::select(false, false, false), StripDrawer::SolidHorizontal);
        assert_eq!(StripDrawer::select(true, false, false), StripDrawer::SolidVertical);
        assert_eq!(StripDrawer::select(false, true, false), StripDrawer::SolidDiagonalHorizontal);
        assert_eq!(StripDrawer::select(true, true, false), StripDrawer::SolidDiagonalVertical);
        assert_eq!(StripDrawer::select(true, false, true), StripDrawer::StyledVertical);
        assert_eq!(StripDrawer::select(false, true, true), StripDrawer::StyledHorizontal);
    }

    #[test]
    fn test_strip_buffer() {
        let mut strip = Strip::new(PointL::new(3, 4), -1);
        assert!(strip.lens().is_empty());
        for i in 0..STRIP_MAX {
            assert!(!strip.is_full());
            strip.push(i as i32);
        }
        assert!(strip.is_full());
        assert_eq!(strip.lens()[7], 7);
        strip.clear();
        assert!(strip.lens().is_empty());
    }
}
