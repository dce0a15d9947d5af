//! Monochrome brushes and the area stipple unit
//!
//! An 8x8 one-bit pattern is realized by loading the eight
//! AreaStipplePattern registers. The device remembers which brush is loaded
//! (by identity token, never by reference) and where its origin was, so a
//! repeat fill only pays for what changed.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::dma::P2Dma;
use crate::fixed::PointL;
use crate::regs::*;
use crate::rop::LogicOp;

/// Generation counter handing out brush identities
static NEXT_BRUSH_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a realized brush. Only ever compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrushId(u64);

impl BrushId {
    fn next() -> Self {
        BrushId(NEXT_BRUSH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Two-color 8x8 pattern. Bit `i` of `rows[j]` set means pattern pixel
/// (i, j) takes the foreground color.
///
/// Every construction, clone and edit takes a fresh `BrushId`, so a cached
/// stipple is never mistaken for different contents.
#[derive(Debug, PartialEq, Eq)]
pub struct MonoBrush {
    id: BrushId,
    rows: [u8; 8],
    fg: u32,
    bg: u32,
}

impl MonoBrush {
    pub fn new(rows: [u8; 8], fg: u32, bg: u32) -> Self {
        Self { id: BrushId::next(), rows, fg, bg }
    }

    #[inline]
    pub fn id(&self) -> BrushId {
        self.id
    }

    #[inline]
    pub fn rows(&self) -> [u8; 8] {
        self.rows
    }

    #[inline]
    pub fn fg(&self) -> u32 {
        self.fg
    }

    #[inline]
    pub fn bg(&self) -> u32 {
        self.bg
    }

    pub fn set_rows(&mut self, rows: [u8; 8]) {
        self.rows = rows;
        self.id = BrushId::next();
    }

    pub fn set_colors(&mut self, fg: u32, bg: u32) {
        self.fg = fg;
        self.bg = bg;
        self.id = BrushId::next();
    }
}

impl Clone for MonoBrush {
    fn clone(&self) -> Self {
        Self::new(self.rows, self.fg, self.bg)
    }
}

/// What the area stipple unit currently holds
#[derive(Debug, Default)]
pub struct StippleCache {
    brush: Option<BrushId>,
    origin: PointL,
    mode: u32,
    realizations: u32,
}

impl StippleCache {
    pub const fn new() -> Self {
        Self { brush: None, origin: PointL::new(0, 0), mode: 0, realizations: 0 }
    }

    /// Make `brush` current at `origin`; returns the stipple mode to load
    pub(crate) fn realize(&mut self, dma: &P2Dma, brush: &MonoBrush, origin: PointL) -> u32 {
        if self.brush != Some(brush.id()) {
            crate::log_trace!("[FILL] realize brush {:?}", brush.id());
            let rows = brush.rows.map(u32::from);
            let mut cursor = dma.reserve(1 + rows.len());
            cursor.push_increment(tag::AREA_STIPPLE_PATTERN0, &rows);
            dma.commit(cursor);
            self.brush = Some(brush.id());
            self.realizations += 1;
        } else if self.origin == origin {
            return self.mode;
        }
        self.origin = origin;
        self.mode = stipple_offset_mode(origin);
        self.mode
    }

    /// Forget the loaded pattern (the stipple registers were clobbered)
    pub fn invalidate(&mut self) {
        self.brush = None;
    }

    /// Full pattern uploads so far
    pub fn realizations(&self) -> u32 {
        self.realizations
    }
}

/// Stipple mode that lines pattern pixel (0, 0) up with `origin`
#[inline]
fn stipple_offset_mode(origin: PointL) -> u32 {
    area_stipple_mode(8 - (origin.x as u32 & 7), 8 - (origin.y as u32 & 7))
}

/// Color and stipple mode of one render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pass {
    pub color: u32,
    pub stipple: Option<u32>,
}

/// Passes a brush fill needs. Transparent backgrounds (NOOP, or XOR with a
/// zero background) take one pass with the foreground; XOR with a zero
/// foreground takes one inverted pass with the background. Anything else is
/// opaque: foreground, then background through the inverted pattern.
pub(crate) fn brush_passes(brush: &MonoBrush, mode: u32, fg_op: LogicOp, bg_op: LogicOp) -> ([Pass; 2], usize) {
    let fg = Pass { color: brush.fg, stipple: Some(mode) };
    let bg = Pass { color: brush.bg, stipple: Some(mode | AREA_STIPPLE_INVERT) };
    if bg_op == LogicOp::Noop || (fg_op == LogicOp::Xor && brush.bg == 0) {
        ([fg, fg], 1)
    } else if fg_op == LogicOp::Xor && brush.fg == 0 {
        ([bg, bg], 1)
    } else {
        ([fg, bg], 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brush_ids_are_unique() {
        let a = MonoBrush::new([0xaa; 8], 1, 2);
        let b = MonoBrush::new([0xaa; 8], 1, 2);
        assert_ne!(a.id(), b.id());
        assert_ne!(a.clone().id(), a.id());

        let mut c = a.clone();
        let before = c.id();
        c.set_rows([0x55; 8]);
        assert_ne!(c.id(), before);
        let before = c.id();
        c.set_colors(3, 4);
        assert_ne!(c.id(), before);
        assert_eq!((c.rows(), c.fg(), c.bg()), ([0x55; 8], 3, 4));
    }

    #[test]
    fn test_offset_mode() {
        let mode = stipple_offset_mode(PointL::new(3, 10));
        assert_eq!((mode >> AREA_STIPPLE_XOFFSET_SHIFT) & 7, 5);
        assert_eq!((mode >> AREA_STIPPLE_YOFFSET_SHIFT) & 7, 6);
        assert_eq!(stipple_offset_mode(PointL::new(8, -8)), stipple_offset_mode(PointL::new(0, 0)));
    }

    #[test]
    fn test_pass_selection() {
        let brush = MonoBrush::new([0x0f; 8], 0x11, 0);
        let (p, n) = brush_passes(&brush, 1, LogicOp::Copy, LogicOp::Noop);
        assert_eq!((n, p[0].color), (1, 0x11));
        let (_, n) = brush_passes(&brush, 1, LogicOp::Xor, LogicOp::Xor);
        assert_eq!(n, 1);

        let brush = MonoBrush::new([0x0f; 8], 0, 0x22);
        let (p, n) = brush_passes(&brush, 1, LogicOp::Xor, LogicOp::Xor);
        assert_eq!((n, p[0].color, p[0].stipple), (1, 0x22, Some(1 | AREA_STIPPLE_INVERT)));

        let (p, n) = brush_passes(&brush, 1, LogicOp::Copy, LogicOp::Copy);
        assert_eq!(n, 2);
        assert_eq!(p[1].stipple, Some(1 | AREA_STIPPLE_INVERT));
    }
}
